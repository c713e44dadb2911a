//! Printer lifecycle events observed by notification collaborators.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::command::CommandId;
use crate::printer::{DeviceId, UserId};

/// Event published after a printer transaction commits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PrinterEvent {
    PrinterRegistered {
        device_id: DeviceId,
        owner_id: UserId,
    },
    PrinterDeleted {
        device_id: DeviceId,
    },
    PrintStarted {
        device_id: DeviceId,
        filename: String,
        started_at: DateTime<Utc>,
    },
    PrintStopped {
        device_id: DeviceId,
        filename: String,
    },
    /// A failure alert was raised (or refreshed).
    AlertRaised {
        device_id: DeviceId,
        filename: String,
        alerted_at: DateTime<Utc>,
    },
    /// Someone acknowledged the alert. A muted acknowledgment leaves the alert set.
    AlertAcknowledged {
        device_id: DeviceId,
        muted: bool,
        acknowledged_at: DateTime<Utc>,
    },
    AlertCleared {
        device_id: DeviceId,
        acknowledged_at: DateTime<Utc>,
    },
    CommandQueued {
        device_id: DeviceId,
        command_id: CommandId,
        name: String,
    },
    CommandsAborted {
        device_id: DeviceId,
        command_ids: Vec<CommandId>,
    },
    CommandSent {
        device_id: DeviceId,
        command_id: CommandId,
    },
}

impl PrinterEvent {
    /// Printer the event is about.
    pub fn device_id(&self) -> &str {
        match self {
            PrinterEvent::PrinterRegistered { device_id, .. }
            | PrinterEvent::PrinterDeleted { device_id }
            | PrinterEvent::PrintStarted { device_id, .. }
            | PrinterEvent::PrintStopped { device_id, .. }
            | PrinterEvent::AlertRaised { device_id, .. }
            | PrinterEvent::AlertAcknowledged { device_id, .. }
            | PrinterEvent::AlertCleared { device_id, .. }
            | PrinterEvent::CommandQueued { device_id, .. }
            | PrinterEvent::CommandsAborted { device_id, .. }
            | PrinterEvent::CommandSent { device_id, .. } => device_id,
        }
    }

    /// Stable event type name.
    pub fn type_name(&self) -> &'static str {
        match self {
            PrinterEvent::PrinterRegistered { .. } => "printer_registered",
            PrinterEvent::PrinterDeleted { .. } => "printer_deleted",
            PrinterEvent::PrintStarted { .. } => "print_started",
            PrinterEvent::PrintStopped { .. } => "print_stopped",
            PrinterEvent::AlertRaised { .. } => "alert_raised",
            PrinterEvent::AlertAcknowledged { .. } => "alert_acknowledged",
            PrinterEvent::AlertCleared { .. } => "alert_cleared",
            PrinterEvent::CommandQueued { .. } => "command_queued",
            PrinterEvent::CommandsAborted { .. } => "commands_aborted",
            PrinterEvent::CommandSent { .. } => "command_sent",
        }
    }

    /// Alert transitions are what notification delivery keys off.
    pub fn is_alert_event(&self) -> bool {
        matches!(
            self,
            PrinterEvent::AlertRaised { .. }
                | PrinterEvent::AlertAcknowledged { .. }
                | PrinterEvent::AlertCleared { .. }
        )
    }
}

/// Metadata attached to every published event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    pub event_id: String,
    pub source: String,
    pub timestamp: DateTime<Utc>,
}

impl EventMetadata {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            source: source.into(),
            timestamp: Utc::now(),
        }
    }
}
