//! Concurrent dispatch against one printer.

mod common;

use std::collections::HashSet;

use common::harness;
use printguard_core::{CommandStatus, FailureAction, FailurePolicy};

const INTENTS: [&str; 3] = ["pause", "cancel", "resume"];

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_pause_and_cancel_leave_one_pending() {
    let h = harness();
    let p = h.printers.register("P", "u").await.unwrap();
    h.printers.start_print(&p.id, "a.gcode").await.unwrap();

    let mut tasks = Vec::new();
    for i in 0..32 {
        let printers = h.printers.clone();
        let id = p.id.clone();
        tasks.push(tokio::spawn(async move {
            if i % 2 == 0 {
                printers.pause(&id).await
            } else {
                printers.cancel(&id).await
            }
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let pending = h.printers.queue().pending(&p.id).unwrap();
    assert_eq!(pending.len(), 1);
    let stats = h.printers.queue().stats(&p.id).unwrap();
    assert_eq!(stats.total(), 32);
    assert_eq!(stats.aborted, 31);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_mixed_operations_keep_single_intent() {
    let h = harness();
    let p = h.printers.register("P", "u").await.unwrap();
    h.printers
        .update_policy(
            &p.id,
            FailurePolicy {
                action: FailureAction::Pause,
                tools_off_on_pause: true,
                bed_off_on_pause: true,
            },
        )
        .await
        .unwrap();

    let mut tasks = Vec::new();
    for i in 0..48 {
        let printers = h.printers.clone();
        let id = p.id.clone();
        tasks.push(tokio::spawn(async move {
            match i % 3 {
                0 => printers.pause(&id).await,
                1 => printers.cancel(&id).await,
                _ => printers.pause_on_failure(&id).await,
            }
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let pending = h.printers.queue().pending(&p.id).unwrap();
    assert!(pending.len() <= 3, "too many pending: {:?}", pending);
    let intents = pending
        .iter()
        .filter(|c| INTENTS.contains(&c.name.as_str()))
        .count();
    assert_eq!(intents, 1);
    // The intent command comes first; heater shutoffs can only follow it.
    assert!(INTENTS.contains(&pending[0].name.as_str()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_agent_never_receives_superseded_commands() {
    let h = harness();
    let p = h.printers.register("P", "u").await.unwrap();

    let writer = {
        let printers = h.printers.clone();
        let id = p.id.clone();
        tokio::spawn(async move {
            for i in 0..40 {
                if i % 2 == 0 {
                    printers.pause(&id).await.unwrap();
                } else {
                    printers.cancel(&id).await.unwrap();
                }
            }
        })
    };
    let agent = {
        let queue = h.printers.queue().clone();
        let id = p.id.clone();
        tokio::spawn(async move {
            let mut delivered = Vec::new();
            for _ in 0..40 {
                let batch = queue.dispatch(&id).await.unwrap();
                assert!(batch.len() <= 1, "agent saw conflicting intents: {:?}", batch);
                delivered.extend(batch.into_iter().map(|c| c.id));
                tokio::task::yield_now().await;
            }
            delivered
        })
    };

    writer.await.unwrap();
    let delivered: HashSet<u64> = agent.await.unwrap().into_iter().collect();

    for command in h.printers.queue().list(&p.id, None).unwrap() {
        if delivered.contains(&command.id) {
            assert_eq!(command.status, CommandStatus::Sent);
        } else {
            assert_ne!(command.status, CommandStatus::Sent);
        }
    }
}
