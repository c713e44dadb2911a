//! Device agent boundary.
//!
//! The agent polls the pending commands of its own printer and reports each
//! one it receives. It can only move commands to SENT.

use printguard_core::{Command, CommandId, DeviceId, Result};

use crate::queue::CommandQueue;

/// Queue access scoped to the printer an agent authenticated as.
#[derive(Clone)]
pub struct AgentSession {
    queue: CommandQueue,
    device_id: DeviceId,
}

impl AgentSession {
    pub(crate) fn new(queue: CommandQueue, device_id: DeviceId) -> Self {
        Self { queue, device_id }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Agent-facing payloads (`{"cmd", "args"}`) of the pending commands.
    pub fn poll(&self) -> Result<Vec<(CommandId, serde_json::Value)>> {
        Ok(self
            .queue
            .pending(&self.device_id)?
            .iter()
            .map(|c| (c.id, c.payload()))
            .collect())
    }

    pub fn pending(&self) -> Result<Vec<Command>> {
        self.queue.pending(&self.device_id)
    }

    pub async fn mark_sent(&self, command_id: CommandId) -> Result<Command> {
        self.queue.mark_sent(&self.device_id, command_id).await
    }

    pub async fn dispatch(&self) -> Result<Vec<Command>> {
        self.queue.dispatch(&self.device_id).await
    }
}
