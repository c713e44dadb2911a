//! Per-device command queue.
//!
//! Commands are appended as PENDING. An enqueue with
//! [`EnqueueMode::AbortExisting`] aborts every pending command of the device
//! and inserts the new one in the same write transaction, so no reader ever
//! observes the superseded command next to its replacement.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use printguard_core::{
    Command, CommandId, CommandRequest, CommandStatus, EnqueueMode, Error, EventBus,
    PrinterEvent, Result, SharedClock,
};
use printguard_storage::DeviceStore;

use crate::agent::AgentSession;
use crate::batch::CommandBatch;

/// Event source name for queue events.
pub const EVENT_SOURCE: &str = "command_queue";

/// Command counts of one device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: usize,
    pub sent: usize,
    pub aborted: usize,
}

impl QueueStats {
    pub fn total(&self) -> usize {
        self.pending + self.sent + self.aborted
    }
}

/// Command queue backed by the device store.
#[derive(Clone)]
pub struct CommandQueue {
    store: Arc<DeviceStore>,
    events: EventBus,
    clock: SharedClock,
}

impl CommandQueue {
    pub fn new(store: Arc<DeviceStore>, events: EventBus, clock: SharedClock) -> Self {
        Self {
            store,
            events,
            clock,
        }
    }

    pub fn store(&self) -> &Arc<DeviceStore> {
        &self.store
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Enqueue a single command in its own transaction.
    ///
    /// Fails with `NotFound` when the device does not exist and with
    /// `Validation` when the arguments are not a JSON object.
    pub async fn enqueue(
        &self,
        device_id: &str,
        name: &str,
        args: serde_json::Value,
        mode: EnqueueMode,
    ) -> Result<Command> {
        self.enqueue_request(device_id, CommandRequest::new(name).with_args(args), mode)
            .await
    }

    pub async fn enqueue_request(
        &self,
        device_id: &str,
        request: CommandRequest,
        mode: EnqueueMode,
    ) -> Result<Command> {
        let device = device_id.to_string();
        let clock = Arc::clone(&self.clock);
        let batch = self
            .store
            .write_blocking(move |txn| -> Result<CommandBatch> {
                let mut batch = CommandBatch::new(device);
                batch.enqueue(txn, request, mode, clock.now())?;
                Ok(batch)
            })
            .await?;

        let command = batch
            .last()
            .cloned()
            .ok_or_else(|| Error::Persistence("enqueue committed no command".to_string()))?;
        self.announce(batch);
        Ok(command)
    }

    /// Log and publish what a committed batch did.
    pub fn announce(&self, batch: CommandBatch) {
        if batch.is_empty() {
            return;
        }
        info!(
            category = "commands",
            device_id = %batch.device_id(),
            commands = ?batch.names(),
            aborted = ?batch.aborted(),
            "Commands queued"
        );
        let (_, _, events) = batch.into_parts();
        self.events.publish_all(events, EVENT_SOURCE);
    }

    /// Commands of a device in creation order, optionally filtered by status.
    pub fn list(&self, device_id: &str, status: Option<CommandStatus>) -> Result<Vec<Command>> {
        self.ensure_device(device_id)?;
        let commands = self.store.list_commands(device_id)?;
        Ok(match status {
            Some(status) => commands.into_iter().filter(|c| c.status == status).collect(),
            None => commands,
        })
    }

    pub fn get(&self, device_id: &str, command_id: CommandId) -> Result<Command> {
        self.store.load_command(device_id, command_id)?.ok_or_else(|| {
            Error::NotFound(format!("command {} of printer {}", command_id, device_id))
        })
    }

    pub fn stats(&self, device_id: &str) -> Result<QueueStats> {
        let mut stats = QueueStats::default();
        for command in self.list(device_id, None)? {
            match command.status {
                CommandStatus::Pending => stats.pending += 1,
                CommandStatus::Sent => stats.sent += 1,
                CommandStatus::Aborted => stats.aborted += 1,
            }
        }
        Ok(stats)
    }

    // ========== Agent contract ==========

    /// Pending commands of a device in creation order.
    pub fn pending(&self, device_id: &str) -> Result<Vec<Command>> {
        self.ensure_device(device_id)?;
        Ok(self.store.pending_commands(device_id)?)
    }

    /// Record that the agent received a command.
    ///
    /// Marking a SENT command again is a no-op; an ABORTED command cannot
    /// be sent.
    pub async fn mark_sent(&self, device_id: &str, command_id: CommandId) -> Result<Command> {
        let device = device_id.to_string();
        let clock = Arc::clone(&self.clock);
        let (command, changed) = self
            .store
            .write_blocking(move |txn| -> Result<(Command, bool)> {
                Ok(txn.mark_sent(&device, command_id, clock.now())?)
            })
            .await?;

        if changed {
            info!(category = "commands", device_id = %device_id, command_id, "Command sent");
            self.events.publish(
                PrinterEvent::CommandSent {
                    device_id: device_id.to_string(),
                    command_id,
                },
                EVENT_SOURCE,
            );
        } else {
            debug!(
                category = "commands",
                device_id = %device_id,
                command_id,
                "Command already sent"
            );
        }
        Ok(command)
    }

    /// Hand every pending command to the agent and mark them SENT, in one
    /// transaction.
    pub async fn dispatch(&self, device_id: &str) -> Result<Vec<Command>> {
        let device = device_id.to_string();
        let clock = Arc::clone(&self.clock);
        let sent = self
            .store
            .write_blocking(move |txn| -> Result<Vec<Command>> {
                if !txn.printer_exists(&device)? {
                    return Err(Error::NotFound(format!("printer {}", device)));
                }
                let now = clock.now();
                let mut sent = Vec::new();
                for pending in txn.pending_commands(&device)? {
                    let (command, _) = txn.mark_sent(&device, pending.id, now)?;
                    sent.push(command);
                }
                Ok(sent)
            })
            .await?;

        if sent.is_empty() {
            debug!(category = "commands", device_id = %device_id, "Nothing to dispatch");
        } else {
            info!(
                category = "commands",
                device_id = %device_id,
                count = sent.len(),
                "Commands dispatched"
            );
            self.events.publish_all(
                sent.iter().map(|c| PrinterEvent::CommandSent {
                    device_id: c.device_id.clone(),
                    command_id: c.id,
                }),
                EVENT_SOURCE,
            );
        }
        Ok(sent)
    }

    /// Open an agent session for the printer holding `token`.
    pub fn agent_session(&self, token: &str) -> Result<AgentSession> {
        let printer = self
            .store
            .find_by_token(token)?
            .ok_or_else(|| Error::NotFound("no printer with this auth token".to_string()))?;
        Ok(AgentSession::new(self.clone(), printer.id))
    }

    fn ensure_device(&self, device_id: &str) -> Result<()> {
        match self.store.load_printer(device_id)? {
            Some(_) => Ok(()),
            None => Err(Error::NotFound(format!("printer {}", device_id))),
        }
    }
}
