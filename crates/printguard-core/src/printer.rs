//! Printer aggregate record.
//!
//! The four legacy print/alert fields (filename, started-at, alerted-at,
//! acknowledged-at) live together in [`ActivePrint`], so "no print tracked"
//! always means all four are absent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::alert::{AlertState, Transition};
use crate::error::{Error, Result};

/// Opaque printer identifier.
pub type DeviceId = String;

/// Owning account reference supplied by the account collaborator.
pub type UserId = String;

/// Length of a printer authentication token.
pub const AUTH_TOKEN_LEN: usize = 28;

/// What the failure detector should do when a print looks failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureAction {
    /// Notify only.
    None,
    /// Pause the print and notify.
    #[default]
    Pause,
    /// Cancel the print and notify.
    Cancel,
}

impl FailureAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureAction::None => "NONE",
            FailureAction::Pause => "PAUSE",
            FailureAction::Cancel => "CANCEL",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NONE" => Some(FailureAction::None),
            "PAUSE" => Some(FailureAction::Pause),
            "CANCEL" => Some(FailureAction::Cancel),
            _ => None,
        }
    }
}

impl std::fmt::Display for FailureAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FailureAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_string(s)
            .ok_or_else(|| Error::Validation(format!("unknown failure action: {}", s)))
    }
}

/// Failure-response policy of a printer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailurePolicy {
    pub action: FailureAction,
    /// Power off tool heaters when pausing on failure.
    pub tools_off_on_pause: bool,
    /// Power off the bed heater when pausing on failure.
    pub bed_off_on_pause: bool,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self {
            action: FailureAction::Pause,
            tools_off_on_pause: true,
            bed_off_on_pause: false,
        }
    }
}

/// The print a printer is currently tracking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivePrint {
    pub filename: String,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub alert: AlertState,
}

impl ActivePrint {
    /// A fresh print always starts with no alert.
    pub fn new(filename: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            filename: filename.into(),
            started_at,
            alert: AlertState::Normal,
        }
    }
}

/// A registered printer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Printer {
    pub id: DeviceId,
    pub name: String,
    pub owner_id: UserId,
    pub auth_token: String,
    #[serde(default)]
    pub active_print: Option<ActivePrint>,
    #[serde(default)]
    pub policy: FailurePolicy,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Printer {
    /// Create a new printer record with the default failure policy.
    pub fn new(
        id: impl Into<DeviceId>,
        name: impl Into<String>,
        owner_id: impl Into<UserId>,
        auth_token: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            owner_id: owner_id.into(),
            auth_token: auth_token.into(),
            active_print: None,
            policy: FailurePolicy::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn current_print_filename(&self) -> Option<&str> {
        self.active_print.as_ref().map(|p| p.filename.as_str())
    }

    pub fn current_print_started_at(&self) -> Option<DateTime<Utc>> {
        self.active_print.as_ref().map(|p| p.started_at)
    }

    pub fn current_print_alerted_at(&self) -> Option<DateTime<Utc>> {
        self.active_print.as_ref().and_then(|p| p.alert.alerted_at())
    }

    pub fn alert_acknowledged_at(&self) -> Option<DateTime<Utc>> {
        self.active_print
            .as_ref()
            .and_then(|p| p.alert.acknowledged_at())
    }

    pub fn is_printing(&self) -> bool {
        self.active_print.is_some()
    }

    /// Alert sub-state, `Normal` when no print is tracked.
    pub fn alert_state(&self) -> AlertState {
        self.active_print
            .as_ref()
            .map(|p| p.alert)
            .unwrap_or_default()
    }

    /// Start tracking `filename`. Returns `false` when it is already the
    /// current print, in which case nothing changes.
    pub fn start_print(&mut self, filename: &str, now: DateTime<Utc>) -> Result<bool> {
        if filename.trim().is_empty() {
            return Err(Error::Validation("print filename must not be empty".to_string()));
        }
        if self.current_print_filename() == Some(filename) {
            return Ok(false);
        }
        self.active_print = Some(ActivePrint::new(filename, now));
        Ok(true)
    }

    /// Stop tracking the current print, returning it if there was one.
    pub fn stop_print(&mut self) -> Option<ActivePrint> {
        self.active_print.take()
    }

    /// Raise the failure alert on the active print.
    pub fn raise_alert(&mut self, now: DateTime<Utc>) -> Result<Transition> {
        match self.active_print.as_mut() {
            Some(print) => Ok(print.alert.raise(now)),
            None => Err(Error::InvalidTransition(format!(
                "printer {} has no active print to alert on",
                self.id
            ))),
        }
    }

    /// Record an acknowledgment; unmuted acknowledgment also clears the alert.
    pub fn acknowledge(&mut self, now: DateTime<Utc>, mute: bool) -> Transition {
        match self.active_print.as_mut() {
            Some(print) => print.alert.acknowledge(now, mute),
            None => Transition::NoActivePrint,
        }
    }

    /// Reset the alert flag and stamp the acknowledgment.
    pub fn clear_alert(&mut self, now: DateTime<Utc>) -> Transition {
        match self.active_print.as_mut() {
            Some(print) => print.alert.clear(now),
            None => Transition::NoActivePrint,
        }
    }
}
