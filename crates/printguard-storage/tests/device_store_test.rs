//! DeviceStore integration tests.

use std::sync::Arc;

use chrono::{Duration, Utc};
use printguard_core::printer::AUTH_TOKEN_LEN;
use printguard_core::{CommandRequest, CommandStatus, EnqueueMode, Error as CoreError, Printer};
use printguard_storage::{DeviceStore, Error, StoreOptions};

fn open(dir: &tempfile::TempDir) -> Arc<DeviceStore> {
    DeviceStore::open(dir.path().join("db/printguard.redb"), StoreOptions::default()).unwrap()
}

fn register(store: &DeviceStore, id: &str, owner: &str, token_char: char) -> Printer {
    let printer = Printer::new(
        id,
        format!("Printer {}", id),
        owner,
        token_char.to_string().repeat(AUTH_TOKEN_LEN),
        Utc::now(),
    );
    store.write(|txn| txn.insert_printer(&printer)).unwrap();
    printer
}

#[test]
fn test_abort_existing_leaves_single_pending() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir);
    register(&store, "p1", "u1", 'a');

    let now = Utc::now();
    store
        .write(|txn| {
            txn.append_command("p1", CommandRequest::restore_temps(), EnqueueMode::Append, now)?;
            txn.append_command("p1", CommandRequest::resume(), EnqueueMode::Append, now)
        })
        .unwrap();
    assert_eq!(store.pending_commands("p1").unwrap().len(), 2);

    let (pause, aborted) = store
        .write(|txn| {
            txn.append_command("p1", CommandRequest::pause(), EnqueueMode::AbortExisting, now)
        })
        .unwrap();

    assert_eq!(aborted.len(), 2);
    let pending = store.pending_commands("p1").unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, pause.id);

    for id in aborted {
        let cmd = store.load_command("p1", id).unwrap().unwrap();
        assert_eq!(cmd.status, CommandStatus::Aborted);
    }
}

#[test]
fn test_abort_is_scoped_to_device() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir);
    register(&store, "p1", "u1", 'a');
    register(&store, "p2", "u1", 'b');

    let now = Utc::now();
    store
        .write(|txn| txn.append_command("p2", CommandRequest::resume(), EnqueueMode::Append, now))
        .unwrap();
    store
        .write(|txn| {
            txn.append_command("p1", CommandRequest::cancel(), EnqueueMode::AbortExisting, now)
        })
        .unwrap();

    assert_eq!(store.pending_commands("p2").unwrap().len(), 1);
}

#[test]
fn test_enqueue_unknown_device_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir);

    let err = store
        .write(|txn| {
            txn.append_command("ghost", CommandRequest::pause(), EnqueueMode::Append, Utc::now())
        })
        .unwrap_err();
    assert!(matches!(err, Error::Domain(CoreError::NotFound(_))));
}

#[test]
fn test_mark_sent_rules() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir);
    register(&store, "p1", "u1", 'a');
    let now = Utc::now();

    let (first, _) = store
        .write(|txn| txn.append_command("p1", CommandRequest::pause(), EnqueueMode::Append, now))
        .unwrap();

    let (sent, changed) = store.write(|txn| txn.mark_sent("p1", first.id, now)).unwrap();
    assert!(changed);
    assert_eq!(sent.status, CommandStatus::Sent);

    let (_, changed) = store.write(|txn| txn.mark_sent("p1", first.id, now)).unwrap();
    assert!(!changed);

    let (second, _) = store
        .write(|txn| txn.append_command("p1", CommandRequest::resume(), EnqueueMode::Append, now))
        .unwrap();
    store
        .write(|txn| {
            txn.append_command("p1", CommandRequest::cancel(), EnqueueMode::AbortExisting, now)
        })
        .unwrap();

    let err = store
        .write(|txn| txn.mark_sent("p1", second.id, now))
        .unwrap_err();
    assert!(matches!(err, Error::Domain(CoreError::InvalidTransition(_))));

    let err = store.write(|txn| txn.mark_sent("p1", 9_999, now)).unwrap_err();
    assert!(matches!(err, Error::Domain(CoreError::NotFound(_))));
}

#[test]
fn test_put_printer_stamps_updated_at_and_keeps_identity() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir);
    let mut printer = register(&store, "p1", "u1", 'a');

    let later = printer.created_at + Duration::seconds(30);
    printer.name = "Renamed".to_string();
    store
        .write(|txn| txn.put_printer(&mut printer, "renamed", later))
        .unwrap();
    let loaded = store.load_printer("p1").unwrap().unwrap();
    assert_eq!(loaded.name, "Renamed");
    assert_eq!(loaded.updated_at, later);

    let mut forged = loaded.clone();
    forged.auth_token = "z".repeat(AUTH_TOKEN_LEN);
    let err = store
        .write(|txn| txn.put_printer(&mut forged, "renamed", later))
        .unwrap_err();
    assert!(matches!(err, Error::Domain(CoreError::Validation(_))));
}

#[test]
fn test_owner_listing_and_token_lookup() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir);
    register(&store, "p1", "alice", 'a');
    register(&store, "p2", "alice", 'b');
    register(&store, "p3", "bob", 'c');

    let alice: Vec<String> = store
        .list_printers_for_owner("alice")
        .unwrap()
        .into_iter()
        .map(|p| p.id)
        .collect();
    assert_eq!(alice.len(), 2);
    assert!(alice.contains(&"p1".to_string()));
    assert!(alice.contains(&"p2".to_string()));
    assert!(store.list_printers_for_owner("carol").unwrap().is_empty());

    let found = store.find_by_token(&"c".repeat(AUTH_TOKEN_LEN)).unwrap().unwrap();
    assert_eq!(found.id, "p3");
    assert!(store.find_by_token("nope").unwrap().is_none());
}

#[test]
fn test_delete_cascades() {
    let dir = tempfile::tempdir().unwrap();
    let store = DeviceStore::open(
        dir.path().join("printguard.redb"),
        StoreOptions {
            record_history: true,
            create_dirs: true,
        },
    )
    .unwrap();
    let printer = register(&store, "p1", "u1", 'a');
    store
        .write(|txn| {
            txn.append_command("p1", CommandRequest::pause(), EnqueueMode::Append, Utc::now())
        })
        .unwrap();

    let deleted = store.delete_printer("p1").unwrap();
    assert_eq!(deleted.map(|p| p.id), Some("p1".to_string()));
    assert!(store.load_printer("p1").unwrap().is_none());
    assert!(store.list_commands("p1").unwrap().is_empty());
    assert!(store.history("p1").unwrap().is_empty());
    assert!(store.find_by_token(&printer.auth_token).unwrap().is_none());
    assert!(store.delete_printer("p1").unwrap().is_none());

    // The token is free again.
    register(&store, "p9", "u1", 'a');
}

#[test]
fn test_delete_owner_printers() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir);
    register(&store, "p1", "alice", 'a');
    register(&store, "p2", "alice", 'b');
    register(&store, "p3", "bob", 'c');

    let deleted = store.delete_owner_printers("alice").unwrap();
    assert_eq!(deleted.len(), 2);
    assert_eq!(store.printer_count().unwrap(), 1);
    assert_eq!(store.list_printers().unwrap()[0].id, "p3");
}

#[test]
fn test_owner_delete_rolls_back_with_its_transaction() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir);
    register(&store, "p1", "alice", 'a');
    register(&store, "p2", "alice", 'b');

    let result: Result<(), Error> = store.write(|txn| {
        let deleted = txn.delete_owner_printers("alice")?;
        assert_eq!(deleted.len(), 2);
        assert!(!txn.printer_exists("p1")?);
        Err(CoreError::Conflict("abandon".to_string()).into())
    });
    assert!(result.is_err());
    assert_eq!(store.list_printers_for_owner("alice").unwrap().len(), 2);
}

#[test]
fn test_records_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("printguard.redb");
    {
        let store = DeviceStore::open(&path, StoreOptions::default()).unwrap();
        register(&store, "p1", "u1", 'a');
    }

    let store = DeviceStore::open(&path, StoreOptions::default()).unwrap();
    assert!(store.load_printer("p1").unwrap().is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_write_blocking() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir);
    register(&store, "p1", "u1", 'a');

    let (command, _) = store
        .write_blocking(|txn| {
            let request = CommandRequest::pause();
            txn.append_command("p1", request, EnqueueMode::AbortExisting, Utc::now())
        })
        .await
        .map_err(CoreError::from)
        .unwrap();
    assert_eq!(command.name, "pause");
}
