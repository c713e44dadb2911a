//! Command data structures.
//!
//! A command is an instruction queued for the device agent. The core treats
//! its arguments as opaque; the agent receives `{"cmd": name, "args": args}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::printer::DeviceId;

/// Auto-generated command identifier, increasing with creation order.
pub type CommandId = u64;

/// Command names issued by the printer core.
pub mod names {
    pub const PAUSE: &str = "pause";
    pub const RESUME: &str = "resume";
    pub const CANCEL: &str = "cancel";
    pub const RESTORE_TEMPS: &str = "restore_temps";
    pub const SET_TEMPS: &str = "set_temps";
}

/// Command lifecycle status. Once `Sent` or `Aborted`, never `Pending` again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandStatus {
    /// Waiting for the agent to pick it up.
    Pending,
    /// Delivered to the agent.
    Sent,
    /// Superseded before delivery.
    Aborted,
}

impl CommandStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandStatus::Pending => "PENDING",
            CommandStatus::Sent => "SENT",
            CommandStatus::Aborted => "ABORTED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, CommandStatus::Pending)
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Some(CommandStatus::Pending),
            "SENT" => Some(CommandStatus::Sent),
            "ABORTED" => Some(CommandStatus::Aborted),
            _ => None,
        }
    }
}

impl std::fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CommandStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_string(s)
            .ok_or_else(|| Error::Validation(format!("unknown command status: {}", s)))
    }
}

/// How a new command interacts with commands still pending for the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnqueueMode {
    /// Abort every pending command, then insert; one atomic step.
    AbortExisting,
    /// Append without touching pending commands.
    Append,
}

impl EnqueueMode {
    pub fn aborts_existing(&self) -> bool {
        matches!(self, EnqueueMode::AbortExisting)
    }
}

/// Heater addressed by `set_temps`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Heater {
    Tools,
    Bed,
}

impl Heater {
    pub fn as_str(&self) -> &'static str {
        match self {
            Heater::Tools => "tools",
            Heater::Bed => "bed",
        }
    }
}

/// A command to be enqueued: a name plus opaque arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub name: String,
    #[serde(default = "empty_args")]
    pub args: serde_json::Value,
}

fn empty_args() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl CommandRequest {
    /// Create a request with empty arguments.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: empty_args(),
        }
    }

    /// Set the arguments. Anything that is not a JSON object is rejected at
    /// enqueue time by [`CommandRequest::validate`].
    pub fn with_args(mut self, args: serde_json::Value) -> Self {
        self.args = args;
        self
    }

    pub fn pause() -> Self {
        Self::new(names::PAUSE)
    }

    pub fn resume() -> Self {
        Self::new(names::RESUME)
    }

    pub fn cancel() -> Self {
        Self::new(names::CANCEL)
    }

    pub fn restore_temps() -> Self {
        Self::new(names::RESTORE_TEMPS)
    }

    /// Set a heater target; `save` asks the agent to remember the previous
    /// target so `restore_temps` can bring it back.
    pub fn set_temps(heater: Heater, target: f64) -> Self {
        Self::new(names::SET_TEMPS).with_args(serde_json::json!({
            "heater": heater.as_str(),
            "target": target,
            "save": true,
        }))
    }

    /// Reject empty names and non-object arguments.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Validation("command name must not be empty".to_string()));
        }
        if !self.args.is_object() {
            return Err(Error::Validation(format!(
                "arguments of command '{}' must be a JSON object",
                self.name
            )));
        }
        Ok(())
    }
}

/// A queued command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub id: CommandId,
    pub device_id: DeviceId,
    pub name: String,
    pub args: serde_json::Value,
    pub status: CommandStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Command {
    /// New pending command.
    pub fn pending(
        id: CommandId,
        device_id: impl Into<DeviceId>,
        request: CommandRequest,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            device_id: device_id.into(),
            name: request.name,
            args: request.args,
            status: CommandStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == CommandStatus::Pending
    }

    /// Agent-facing payload.
    pub fn payload(&self) -> serde_json::Value {
        serde_json::json!({
            "cmd": self.name,
            "args": self.args,
        })
    }

    /// Move to `next`, enforcing monotonic status.
    ///
    /// Returns `false` when the command already had that status.
    pub fn transition(&mut self, next: CommandStatus, now: DateTime<Utc>) -> Result<bool> {
        if self.status == next {
            return Ok(false);
        }
        if self.status.is_terminal() {
            return Err(Error::InvalidTransition(format!(
                "command {} is {} and cannot become {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        self.updated_at = now;
        Ok(true)
    }
}
