//! Commands staged inside a printer transaction.

use chrono::{DateTime, Utc};

use printguard_core::{
    Command, CommandId, CommandRequest, CommandStatus, DeviceId, EnqueueMode, PrinterEvent, Result,
};
use printguard_storage::StoreTxn;

/// Commands enqueued for one device within a single write transaction.
///
/// The batch only records what happened; events are published by
/// [`crate::CommandQueue::announce`] once the transaction has committed.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandBatch {
    device_id: DeviceId,
    queued: Vec<Command>,
    aborted: Vec<CommandId>,
    events: Vec<PrinterEvent>,
}

impl CommandBatch {
    pub fn new(device_id: impl Into<DeviceId>) -> Self {
        Self {
            device_id: device_id.into(),
            queued: Vec::new(),
            aborted: Vec::new(),
            events: Vec::new(),
        }
    }

    /// Enqueue `request` through `txn`.
    pub fn enqueue(
        &mut self,
        txn: &mut StoreTxn,
        request: CommandRequest,
        mode: EnqueueMode,
        now: DateTime<Utc>,
    ) -> Result<&Command> {
        let (command, aborted) = txn.append_command(&self.device_id, request, mode, now)?;

        if !aborted.is_empty() {
            // Commands queued earlier in this batch can be superseded too.
            for cmd in self.queued.iter_mut().filter(|c| aborted.contains(&c.id)) {
                cmd.status = CommandStatus::Aborted;
                cmd.updated_at = now;
            }
            self.events.push(PrinterEvent::CommandsAborted {
                device_id: self.device_id.clone(),
                command_ids: aborted.clone(),
            });
            self.aborted.extend(aborted);
        }

        self.events.push(PrinterEvent::CommandQueued {
            device_id: self.device_id.clone(),
            command_id: command.id,
            name: command.name.clone(),
        });
        self.queued.push(command);
        Ok(&self.queued[self.queued.len() - 1])
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Commands inserted by this batch, in order.
    pub fn queued(&self) -> &[Command] {
        &self.queued
    }

    /// Ids of commands this batch aborted.
    pub fn aborted(&self) -> &[CommandId] {
        &self.aborted
    }

    pub fn is_empty(&self) -> bool {
        self.queued.is_empty()
    }

    /// Names of the inserted commands, in order.
    pub fn names(&self) -> Vec<&str> {
        self.queued.iter().map(|c| c.name.as_str()).collect()
    }

    /// Last command inserted.
    pub fn last(&self) -> Option<&Command> {
        self.queued.last()
    }

    pub fn into_parts(self) -> (Vec<Command>, Vec<CommandId>, Vec<PrinterEvent>) {
        (self.queued, self.aborted, self.events)
    }
}
