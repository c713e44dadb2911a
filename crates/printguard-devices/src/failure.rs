//! Response to a detected print failure.
//!
//! The failure detector hands a printer id to [`FailureResponder::respond`].
//! The alert is raised and the printer's configured [`FailureAction`] is
//! carried out in the same transaction.

use serde::Serialize;
use tracing::info;

use printguard_core::{FailureAction, Result};

use crate::service::{
    raise_alert, stage_cancel, stage_pause_on_failure, PrinterService, PrinterUpdate,
};

/// What the responder did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureResponse {
    pub action: FailureAction,
    pub update: PrinterUpdate,
}

/// Applies printers' failure policies.
#[derive(Clone)]
pub struct FailureResponder {
    printers: PrinterService,
}

impl FailureResponder {
    pub fn new(printers: PrinterService) -> Self {
        Self { printers }
    }

    /// Raise the alert on `device_id` and act on its policy.
    ///
    /// Fails with `InvalidTransition` when the printer is not tracking a
    /// print; nothing is enqueued in that case.
    pub async fn respond(&self, device_id: &str) -> Result<FailureResponse> {
        let update = self
            .printers
            .apply(device_id, "failure_detected", move |printer, txn, batch, now| {
                let mut applied = raise_alert(printer, now)?;
                match printer.policy.action {
                    FailureAction::None => {}
                    FailureAction::Pause => stage_pause_on_failure(printer, txn, batch, now)?,
                    FailureAction::Cancel => {
                        let cancelled = stage_cancel(printer, txn, batch, now)?;
                        applied.events.extend(cancelled.events);
                    }
                }
                Ok(applied)
            })
            .await?;

        let action = update.printer.policy.action;
        info!(
            category = "printers",
            device_id = %device_id,
            action = action.as_str(),
            commands = ?update.command_names(),
            "Failure response applied"
        );
        Ok(FailureResponse { action, update })
    }
}
