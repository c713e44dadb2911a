//! Printer and command records using redb.
//!
//! Every mutation runs inside a single redb write transaction, so a printer
//! update and the commands it issues commit together or not at all. redb
//! serializes writers; readers see the last committed snapshot.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition, WriteTransaction};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use printguard_core::config::PrintGuardConfig;
use printguard_core::{
    Command, CommandId, CommandRequest, CommandStatus, DeviceId, EnqueueMode, Printer,
};

use crate::error::{CoreError, Error, Result};

// Printers table: key = device_id, value = Printer (JSON)
const PRINTERS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("printers");

// Token index: key = auth_token, value = device_id
const TOKEN_INDEX_TABLE: TableDefinition<&str, &str> =
    TableDefinition::new("printer_token_index");

// Owner index: key = (owner_id, device_id)
const OWNER_INDEX_TABLE: TableDefinition<(&str, &str), ()> =
    TableDefinition::new("printer_owner_index");

// Commands table: key = (device_id, command_id), value = Command (JSON)
const COMMANDS_TABLE: TableDefinition<(&str, u64), &str> = TableDefinition::new("commands");

// History table: key = (device_id, seq), value = HistoryEntry (JSON)
const HISTORY_TABLE: TableDefinition<(&str, u64), &str> = TableDefinition::new("printer_history");

// Sequence counters: key = sequence name, value = last issued value
const COUNTERS_TABLE: TableDefinition<&str, u64> = TableDefinition::new("counters");

const COMMAND_SEQ: &str = "command_id";
const HISTORY_SEQ: &str = "history_seq";

type DeviceRowTable = TableDefinition<'static, (&'static str, u64), &'static str>;

/// Options fixed when the store is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    /// Append a history row for every persisted printer mutation.
    pub record_history: bool,
    /// Create missing parent directories of the database file.
    pub create_dirs: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            record_history: false,
            create_dirs: true,
        }
    }
}

impl StoreOptions {
    pub fn from_config(config: &PrintGuardConfig) -> Self {
        Self {
            record_history: config.history.enabled,
            create_dirs: config.storage.create_dirs,
        }
    }
}

/// One row of the printer audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub seq: u64,
    pub device_id: DeviceId,
    /// Short name of the mutation ("registered", "print_started", ...).
    pub change: String,
    /// Printer state after the mutation.
    pub snapshot: Printer,
    pub recorded_at: DateTime<Utc>,
}

/// redb-backed store for printers, their commands and their history.
pub struct DeviceStore {
    db: Database,
    options: StoreOptions,
}

impl DeviceStore {
    /// Open or create a store at the given path.
    pub fn open<P: AsRef<Path>>(path: P, options: StoreOptions) -> Result<Arc<Self>> {
        let path_ref = path.as_ref();
        if options.create_dirs {
            if let Some(parent) = path_ref.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = if path_ref.exists() {
            Database::open(path_ref)?
        } else {
            Database::create(path_ref)?
        };

        // Read transactions fail on missing tables, so create them all up front.
        let write_txn = db.begin_write()?;
        {
            let _printers = write_txn.open_table(PRINTERS_TABLE)?;
            let _tokens = write_txn.open_table(TOKEN_INDEX_TABLE)?;
            let _owners = write_txn.open_table(OWNER_INDEX_TABLE)?;
            let _commands = write_txn.open_table(COMMANDS_TABLE)?;
            let _history = write_txn.open_table(HISTORY_TABLE)?;
            let _counters = write_txn.open_table(COUNTERS_TABLE)?;
        }
        write_txn.commit()?;

        info!(
            category = "storage",
            path = %path_ref.display(),
            record_history = options.record_history,
            "Device store opened"
        );

        Ok(Arc::new(Self { db, options }))
    }

    /// Run `f` inside one write transaction.
    ///
    /// Commits when `f` returns `Ok`, aborts otherwise. Nothing written by `f`
    /// is visible to readers until the commit.
    pub fn write<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut StoreTxn) -> std::result::Result<T, E>,
        E: From<Error>,
    {
        let txn = self.db.begin_write().map_err(Error::from)?;
        let mut store_txn = StoreTxn {
            txn,
            record_history: self.options.record_history,
        };

        match f(&mut store_txn) {
            Ok(value) => {
                store_txn.txn.commit().map_err(Error::from)?;
                Ok(value)
            }
            Err(e) => {
                if let Err(abort_err) = store_txn.txn.abort() {
                    warn!(category = "storage", error = %abort_err, "Transaction abort failed");
                }
                Err(e)
            }
        }
    }

    /// [`DeviceStore::write`] on the blocking thread pool, for async callers.
    pub async fn write_blocking<T, E, F>(self: &Arc<Self>, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut StoreTxn) -> std::result::Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: From<Error> + Send + 'static,
    {
        let store = Arc::clone(self);
        tokio::task::spawn_blocking(move || store.write(f))
            .await
            .map_err(Error::from)?
    }

    // ========== Printers ==========

    pub fn load_printer(&self, device_id: &str) -> Result<Option<Printer>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PRINTERS_TABLE)?;
        let result = match table.get(device_id)? {
            Some(value) => Some(decode(value.value())?),
            None => None,
        };
        Ok(result)
    }

    /// Look a printer up by its authentication token.
    pub fn find_by_token(&self, token: &str) -> Result<Option<Printer>> {
        let read_txn = self.db.begin_read()?;
        let device_id = {
            let tokens = read_txn.open_table(TOKEN_INDEX_TABLE)?;
            let found = tokens.get(token)?.map(|v| v.value().to_string());
            found
        };
        let Some(device_id) = device_id else {
            return Ok(None);
        };

        let printers = read_txn.open_table(PRINTERS_TABLE)?;
        let result = match printers.get(device_id.as_str())? {
            Some(value) => Some(decode(value.value())?),
            None => None,
        };
        Ok(result)
    }

    /// Printers of one owner, oldest first.
    pub fn list_printers_for_owner(&self, owner_id: &str) -> Result<Vec<Printer>> {
        let read_txn = self.db.begin_read()?;
        let device_ids = {
            let owners = read_txn.open_table(OWNER_INDEX_TABLE)?;
            owner_device_ids(&owners, owner_id)?
        };

        let printers = read_txn.open_table(PRINTERS_TABLE)?;
        let mut result = Vec::with_capacity(device_ids.len());
        for device_id in &device_ids {
            if let Some(value) = printers.get(device_id.as_str())? {
                result.push(decode::<Printer>(value.value())?);
            }
        }
        sort_by_creation(&mut result);
        Ok(result)
    }

    /// Every printer, oldest first.
    pub fn list_printers(&self) -> Result<Vec<Printer>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PRINTERS_TABLE)?;

        let mut result = Vec::new();
        for entry in table.iter()? {
            let (_key, value) = entry?;
            result.push(decode::<Printer>(value.value())?);
        }
        sort_by_creation(&mut result);
        Ok(result)
    }

    pub fn printer_count(&self) -> Result<usize> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PRINTERS_TABLE)?;
        Ok(table.iter()?.count())
    }

    /// Delete a printer with its token, commands and history.
    pub fn delete_printer(&self, device_id: &str) -> Result<Option<Printer>> {
        self.write(|txn| txn.delete_printer(device_id))
    }

    /// Delete every printer of an owner.
    pub fn delete_owner_printers(&self, owner_id: &str) -> Result<Vec<Printer>> {
        self.write(|txn| txn.delete_owner_printers(owner_id))
    }

    // ========== Commands ==========

    /// All commands of a device in creation order.
    pub fn list_commands(&self, device_id: &str) -> Result<Vec<Command>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(COMMANDS_TABLE)?;
        device_commands(&table, device_id)
    }

    /// Pending commands of a device in creation order.
    pub fn pending_commands(&self, device_id: &str) -> Result<Vec<Command>> {
        Ok(self
            .list_commands(device_id)?
            .into_iter()
            .filter(Command::is_pending)
            .collect())
    }

    pub fn load_command(&self, device_id: &str, command_id: CommandId) -> Result<Option<Command>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(COMMANDS_TABLE)?;
        let result = match table.get((device_id, command_id))? {
            Some(value) => Some(decode(value.value())?),
            None => None,
        };
        Ok(result)
    }

    // ========== History ==========

    /// Audit log of a device, oldest first. Empty when history is disabled.
    pub fn history(&self, device_id: &str) -> Result<Vec<HistoryEntry>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(HISTORY_TABLE)?;

        let mut result = Vec::new();
        for entry in table.range((device_id, 0u64)..=(device_id, u64::MAX))? {
            let (_key, value) = entry?;
            result.push(decode::<HistoryEntry>(value.value())?);
        }
        Ok(result)
    }
}

/// Handle to an open write transaction.
///
/// Obtained through [`DeviceStore::write`]; everything done through it
/// commits or rolls back as a unit.
pub struct StoreTxn {
    txn: WriteTransaction,
    record_history: bool,
}

impl StoreTxn {
    /// Load a printer, `NotFound` if it does not exist.
    pub fn printer(&self, device_id: &str) -> Result<Printer> {
        self.try_printer(device_id)?
            .ok_or_else(|| CoreError::NotFound(format!("printer {}", device_id)).into())
    }

    pub fn try_printer(&self, device_id: &str) -> Result<Option<Printer>> {
        let table = self.txn.open_table(PRINTERS_TABLE)?;
        let result = match table.get(device_id)? {
            Some(value) => Some(decode(value.value())?),
            None => None,
        };
        Ok(result)
    }

    pub fn printer_exists(&self, device_id: &str) -> Result<bool> {
        let table = self.txn.open_table(PRINTERS_TABLE)?;
        let exists = table.get(device_id)?.is_some();
        Ok(exists)
    }

    /// Insert a new printer. Ids and auth tokens must be unused.
    pub fn insert_printer(&mut self, printer: &Printer) -> Result<()> {
        if self.printer_exists(&printer.id)? {
            return Err(
                CoreError::Conflict(format!("printer {} already exists", printer.id)).into(),
            );
        }
        {
            let mut tokens = self.txn.open_table(TOKEN_INDEX_TABLE)?;
            let taken = tokens.get(printer.auth_token.as_str())?.is_some();
            if taken {
                return Err(CoreError::Conflict("auth token already in use".to_string()).into());
            }
            tokens.insert(printer.auth_token.as_str(), printer.id.as_str())?;
        }
        {
            let mut owners = self.txn.open_table(OWNER_INDEX_TABLE)?;
            owners.insert((printer.owner_id.as_str(), printer.id.as_str()), ())?;
        }
        self.write_printer(printer, "registered")
    }

    /// Persist a mutated printer, stamping `updated_at`.
    ///
    /// Identity fields (owner and auth token) cannot change.
    pub fn put_printer(
        &mut self,
        printer: &mut Printer,
        change: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let stored = self.printer(&printer.id)?;
        if stored.auth_token != printer.auth_token || stored.owner_id != printer.owner_id {
            return Err(CoreError::Validation(format!(
                "owner and auth token of printer {} are immutable",
                printer.id
            ))
            .into());
        }
        printer.updated_at = now;
        self.write_printer(printer, change)
    }

    /// Remove a printer and everything hanging off it.
    pub fn delete_printer(&mut self, device_id: &str) -> Result<Option<Printer>> {
        let Some(printer) = self.try_printer(device_id)? else {
            return Ok(None);
        };

        {
            let mut printers = self.txn.open_table(PRINTERS_TABLE)?;
            printers.remove(device_id)?;
        }
        {
            let mut tokens = self.txn.open_table(TOKEN_INDEX_TABLE)?;
            tokens.remove(printer.auth_token.as_str())?;
        }
        {
            let mut owners = self.txn.open_table(OWNER_INDEX_TABLE)?;
            owners.remove((printer.owner_id.as_str(), device_id))?;
        }
        let commands = self.remove_device_rows(COMMANDS_TABLE, device_id)?;
        let history = self.remove_device_rows(HISTORY_TABLE, device_id)?;

        debug!(
            category = "storage",
            device_id = %device_id,
            commands,
            history,
            "Printer rows removed"
        );
        Ok(Some(printer))
    }

    /// Remove every printer of `owner_id`, cascading like [`Self::delete_printer`].
    pub fn delete_owner_printers(&mut self, owner_id: &str) -> Result<Vec<Printer>> {
        let mut deleted = Vec::new();
        for device_id in self.printer_ids_for_owner(owner_id)? {
            if let Some(printer) = self.delete_printer(&device_id)? {
                deleted.push(printer);
            }
        }
        Ok(deleted)
    }

    pub fn printer_ids_for_owner(&self, owner_id: &str) -> Result<Vec<DeviceId>> {
        let owners = self.txn.open_table(OWNER_INDEX_TABLE)?;
        owner_device_ids(&owners, owner_id)
    }

    /// Insert a new pending command for `device_id`.
    ///
    /// With [`EnqueueMode::AbortExisting`] every pending command of the
    /// device is aborted first. Returns the new command and the ids aborted.
    pub fn append_command(
        &mut self,
        device_id: &str,
        request: CommandRequest,
        mode: EnqueueMode,
        now: DateTime<Utc>,
    ) -> Result<(Command, Vec<CommandId>)> {
        request.validate()?;
        if !self.printer_exists(device_id)? {
            return Err(CoreError::NotFound(format!("printer {}", device_id)).into());
        }

        let aborted = if mode.aborts_existing() {
            self.abort_pending(device_id, now)?
        } else {
            Vec::new()
        };

        let id = self.next_seq(COMMAND_SEQ)?;
        let command = Command::pending(id, device_id, request, now);
        self.put_command(&command)?;
        Ok((command, aborted))
    }

    /// Abort every pending command of a device.
    pub fn abort_pending(&mut self, device_id: &str, now: DateTime<Utc>) -> Result<Vec<CommandId>> {
        let mut aborted = Vec::new();
        for mut command in self.pending_commands(device_id)? {
            command.transition(CommandStatus::Aborted, now)?;
            self.put_command(&command)?;
            aborted.push(command.id);
        }
        Ok(aborted)
    }

    /// Move a command to SENT. Returns the command and whether it changed.
    pub fn mark_sent(
        &mut self,
        device_id: &str,
        command_id: CommandId,
        now: DateTime<Utc>,
    ) -> Result<(Command, bool)> {
        let mut command = self.command(device_id, command_id)?;
        let changed = command.transition(CommandStatus::Sent, now)?;
        if changed {
            self.put_command(&command)?;
        }
        Ok((command, changed))
    }

    pub fn command(&self, device_id: &str, command_id: CommandId) -> Result<Command> {
        let table = self.txn.open_table(COMMANDS_TABLE)?;
        let result = match table.get((device_id, command_id))? {
            Some(value) => decode(value.value()),
            None => Err(CoreError::NotFound(format!(
                "command {} of printer {}",
                command_id, device_id
            ))
            .into()),
        };
        result
    }

    pub fn commands(&self, device_id: &str) -> Result<Vec<Command>> {
        let table = self.txn.open_table(COMMANDS_TABLE)?;
        device_commands(&table, device_id)
    }

    pub fn pending_commands(&self, device_id: &str) -> Result<Vec<Command>> {
        Ok(self
            .commands(device_id)?
            .into_iter()
            .filter(Command::is_pending)
            .collect())
    }

    fn put_command(&mut self, command: &Command) -> Result<()> {
        let json = serde_json::to_string(command)?;
        let mut table = self.txn.open_table(COMMANDS_TABLE)?;
        table.insert((command.device_id.as_str(), command.id), json.as_str())?;
        Ok(())
    }

    fn write_printer(&mut self, printer: &Printer, change: &str) -> Result<()> {
        let json = serde_json::to_string(printer)?;
        {
            let mut table = self.txn.open_table(PRINTERS_TABLE)?;
            table.insert(printer.id.as_str(), json.as_str())?;
        }
        if self.record_history {
            self.append_history(printer, change)?;
        }
        Ok(())
    }

    fn append_history(&mut self, printer: &Printer, change: &str) -> Result<()> {
        let seq = self.next_seq(HISTORY_SEQ)?;
        let entry = HistoryEntry {
            seq,
            device_id: printer.id.clone(),
            change: change.to_string(),
            snapshot: printer.clone(),
            recorded_at: printer.updated_at,
        };
        let json = serde_json::to_string(&entry)?;
        let mut table = self.txn.open_table(HISTORY_TABLE)?;
        table.insert((printer.id.as_str(), seq), json.as_str())?;
        Ok(())
    }

    fn next_seq(&mut self, name: &str) -> Result<u64> {
        let mut table = self.txn.open_table(COUNTERS_TABLE)?;
        let current = table.get(name)?.map(|v| v.value()).unwrap_or(0);
        let next = current + 1;
        table.insert(name, next)?;
        Ok(next)
    }

    fn remove_device_rows(&mut self, definition: DeviceRowTable, device_id: &str) -> Result<usize> {
        let mut table = self.txn.open_table(definition)?;

        // Collect first; the range borrows the table.
        let mut keys = Vec::new();
        for entry in table.range((device_id, 0u64)..=(device_id, u64::MAX))? {
            let (key, _) = entry?;
            keys.push(key.value().1);
        }
        for key in &keys {
            table.remove((device_id, *key))?;
        }
        Ok(keys.len())
    }
}

fn decode<T: DeserializeOwned>(json: &str) -> Result<T> {
    Ok(serde_json::from_str(json)?)
}

fn sort_by_creation(printers: &mut [Printer]) {
    printers.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
}

fn device_commands<T>(table: &T, device_id: &str) -> Result<Vec<Command>>
where
    T: ReadableTable<(&'static str, u64), &'static str>,
{
    let mut commands = Vec::new();
    for entry in table.range((device_id, 0u64)..=(device_id, u64::MAX))? {
        let (_key, value) = entry?;
        commands.push(decode::<Command>(value.value())?);
    }
    Ok(commands)
}

fn owner_device_ids<T>(table: &T, owner_id: &str) -> Result<Vec<DeviceId>>
where
    T: ReadableTable<(&'static str, &'static str), ()>,
{
    let mut ids = Vec::new();
    for entry in table.range((owner_id, "")..)? {
        let (key, _) = entry?;
        let (owner, device_id) = key.value();
        if owner != owner_id {
            break;
        }
        ids.push(device_id.to_string());
    }
    Ok(ids)
}
