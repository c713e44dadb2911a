//! Printer aggregate operations.
//!
//! Every operation runs in one store transaction: the printer is loaded, the
//! change is applied, the printer is written back and any commands are
//! enqueued, all committed together. Events are published after commit.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Serialize;
use tracing::{debug, info, warn};

use printguard_commands::{CommandBatch, CommandQueue};
use printguard_core::command::Heater;
use printguard_core::printer::AUTH_TOKEN_LEN;
use printguard_core::{
    Command, CommandId, CommandRequest, EnqueueMode, Error, EventBus, FailurePolicy, Printer,
    PrinterEvent, Result, SharedClock, Transition,
};
use printguard_storage::{DeviceStore, StoreTxn};

use crate::status_cache::{Fields, StatusCache};

/// Event source name for printer events.
pub const EVENT_SOURCE: &str = "printer_service";

const TOKEN_ATTEMPTS: usize = 3;

/// Result of a printer operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrinterUpdate {
    /// Printer state after the operation.
    pub printer: Printer,
    /// Whether the printer record changed.
    pub changed: bool,
    /// What happened to the alert, for operations that touch it.
    pub transition: Option<Transition>,
    /// Commands enqueued, in order.
    pub commands: Vec<Command>,
    /// Pending commands superseded by this operation.
    pub aborted: Vec<CommandId>,
}

impl PrinterUpdate {
    /// Names of the enqueued commands, in order.
    pub fn command_names(&self) -> Vec<&str> {
        self.commands.iter().map(|c| c.name.as_str()).collect()
    }
}

/// What an operation did to the printer inside the transaction.
pub(crate) struct Applied {
    pub changed: bool,
    pub transition: Option<Transition>,
    pub events: Vec<PrinterEvent>,
}

impl Applied {
    pub fn unchanged() -> Self {
        Self {
            changed: false,
            transition: None,
            events: Vec::new(),
        }
    }
}

/// Printer aggregate service.
#[derive(Clone)]
pub struct PrinterService {
    store: Arc<DeviceStore>,
    queue: CommandQueue,
    events: EventBus,
    clock: SharedClock,
    telemetry: Arc<StatusCache>,
}

impl PrinterService {
    pub fn new(queue: CommandQueue, telemetry: Arc<StatusCache>) -> Self {
        Self {
            store: Arc::clone(queue.store()),
            events: queue.events().clone(),
            clock: Arc::clone(queue.clock()),
            queue,
            telemetry,
        }
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    pub fn telemetry(&self) -> &Arc<StatusCache> {
        &self.telemetry
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    // ========== Registry ==========

    /// Register a printer with a fresh id and auth token.
    pub async fn register(&self, name: &str, owner_id: &str) -> Result<Printer> {
        let name = validate_name(name)?;
        if owner_id.trim().is_empty() {
            return Err(Error::Validation("owner must not be empty".to_string()));
        }

        let mut attempt = 0;
        let printer = loop {
            attempt += 1;
            let printer = Printer::new(
                uuid::Uuid::new_v4().to_string(),
                name.clone(),
                owner_id,
                generate_auth_token(),
                self.clock.now(),
            );
            let candidate = printer.clone();
            let result = self
                .store
                .write_blocking(move |txn| -> Result<()> { Ok(txn.insert_printer(&candidate)?) })
                .await;
            match result {
                Ok(()) => break printer,
                Err(Error::Conflict(reason)) if attempt < TOKEN_ATTEMPTS => {
                    debug!(
                        category = "printers",
                        reason = %reason,
                        "Regenerating printer identity"
                    );
                }
                Err(e) => return Err(e),
            }
        };

        info!(
            category = "printers",
            device_id = %printer.id,
            owner_id = %printer.owner_id,
            "Printer registered"
        );
        self.events.publish(
            PrinterEvent::PrinterRegistered {
                device_id: printer.id.clone(),
                owner_id: printer.owner_id.clone(),
            },
            EVENT_SOURCE,
        );
        Ok(printer)
    }

    pub fn get(&self, device_id: &str) -> Result<Printer> {
        self.store
            .load_printer(device_id)?
            .ok_or_else(|| Error::NotFound(format!("printer {}", device_id)))
    }

    pub fn find_by_token(&self, token: &str) -> Result<Option<Printer>> {
        Ok(self.store.find_by_token(token)?)
    }

    /// Printers of an owner, oldest first.
    pub fn list_for_owner(&self, owner_id: &str) -> Result<Vec<Printer>> {
        Ok(self.store.list_printers_for_owner(owner_id)?)
    }

    pub fn list_all(&self) -> Result<Vec<Printer>> {
        Ok(self.store.list_printers()?)
    }

    pub async fn update_policy(
        &self,
        device_id: &str,
        policy: FailurePolicy,
    ) -> Result<PrinterUpdate> {
        self.apply(device_id, "policy_updated", move |printer, _txn, _batch, _now| {
            let changed = printer.policy != policy;
            printer.policy = policy;
            Ok(Applied {
                changed,
                ..Applied::unchanged()
            })
        })
        .await
    }

    pub async fn rename(&self, device_id: &str, name: &str) -> Result<PrinterUpdate> {
        let name = validate_name(name)?;
        self.apply(device_id, "renamed", move |printer, _txn, _batch, _now| {
            let changed = printer.name != name;
            printer.name = name;
            Ok(Applied {
                changed,
                ..Applied::unchanged()
            })
        })
        .await
    }

    /// Delete a printer along with its commands and history.
    pub async fn delete(&self, device_id: &str) -> Result<Printer> {
        let device = device_id.to_string();
        let deleted = self
            .store
            .write_blocking(move |txn| -> Result<_> { Ok(txn.delete_printer(&device)?) })
            .await?
            .ok_or_else(|| Error::NotFound(format!("printer {}", device_id)))?;

        self.forget(&deleted);
        Ok(deleted)
    }

    /// Delete every printer of an owner (account removal).
    pub async fn delete_owner(&self, owner_id: &str) -> Result<Vec<Printer>> {
        let owner = owner_id.to_string();
        let deleted = self
            .store
            .write_blocking(move |txn| -> Result<_> { Ok(txn.delete_owner_printers(&owner)?) })
            .await?;

        for printer in &deleted {
            self.forget(printer);
        }
        info!(
            category = "printers",
            owner_id = %owner_id,
            count = deleted.len(),
            "Owner printers deleted"
        );
        Ok(deleted)
    }

    // ========== Print tracking ==========

    /// Start tracking `filename`. Starting the file already tracked is a no-op.
    pub async fn start_print(&self, device_id: &str, filename: &str) -> Result<PrinterUpdate> {
        let filename = filename.to_string();
        self.apply(device_id, "print_started", move |printer, _txn, _batch, now| {
            let previous = printer.current_print_filename().map(str::to_string);
            if !printer.start_print(&filename, now)? {
                return Ok(Applied::unchanged());
            }

            let mut events = Vec::new();
            if let Some(previous) = previous {
                events.push(PrinterEvent::PrintStopped {
                    device_id: printer.id.clone(),
                    filename: previous,
                });
            }
            events.push(PrinterEvent::PrintStarted {
                device_id: printer.id.clone(),
                filename,
                started_at: now,
            });
            Ok(Applied {
                changed: true,
                transition: None,
                events,
            })
        })
        .await
    }

    /// Stop tracking the current print. A no-op when nothing is tracked.
    pub async fn stop_print(&self, device_id: &str) -> Result<PrinterUpdate> {
        self.apply(device_id, "print_stopped", move |printer, _txn, _batch, _now| {
            let Some(stopped) = printer.stop_print() else {
                return Ok(Applied::unchanged());
            };
            Ok(Applied {
                changed: true,
                transition: None,
                events: vec![PrinterEvent::PrintStopped {
                    device_id: printer.id.clone(),
                    filename: stopped.filename,
                }],
            })
        })
        .await
    }

    // ========== Alerts ==========

    /// Raise the failure alert. Fails with `InvalidTransition` when no print
    /// is tracked.
    pub async fn raise_alert(&self, device_id: &str) -> Result<PrinterUpdate> {
        self.apply(device_id, "alert_raised", move |printer, _txn, _batch, now| {
            raise_alert(printer, now)
        })
        .await
    }

    /// Record an acknowledgment. Unless muted, the alert is cleared too.
    pub async fn acknowledge(&self, device_id: &str, mute: bool) -> Result<PrinterUpdate> {
        self.apply(device_id, "alert_acknowledged", move |printer, _txn, _batch, now| {
            Ok(acknowledge(printer, now, mute))
        })
        .await
    }

    pub async fn clear_alert(&self, device_id: &str) -> Result<PrinterUpdate> {
        self.apply(device_id, "alert_cleared", move |printer, _txn, _batch, now| {
            let transition = printer.clear_alert(now);
            let mut events = Vec::new();
            if let Transition::Cleared { acknowledged_at, .. } = transition {
                events.push(PrinterEvent::AlertCleared {
                    device_id: printer.id.clone(),
                    acknowledged_at,
                });
            }
            Ok(Applied {
                changed: transition.changed(),
                transition: Some(transition),
                events,
            })
        })
        .await
    }

    // ========== Print control ==========

    /// Acknowledge the alert and resume. Enqueues `restore_temps` then
    /// `resume`, neither aborting pending commands.
    pub async fn resume(&self, device_id: &str, mute_alert: bool) -> Result<PrinterUpdate> {
        self.apply(device_id, "resumed", move |printer, txn, batch, now| {
            let applied = acknowledge(printer, now, mute_alert);
            batch.enqueue(txn, CommandRequest::restore_temps(), EnqueueMode::Append, now)?;
            batch.enqueue(txn, CommandRequest::resume(), EnqueueMode::Append, now)?;
            Ok(applied)
        })
        .await
    }

    /// Pause, superseding any pending command.
    pub async fn pause(&self, device_id: &str) -> Result<PrinterUpdate> {
        self.apply(device_id, "paused", move |_printer, txn, batch, now| {
            batch.enqueue(txn, CommandRequest::pause(), EnqueueMode::AbortExisting, now)?;
            Ok(Applied::unchanged())
        })
        .await
    }

    /// Pause and switch heaters off as the failure policy says.
    pub async fn pause_on_failure(&self, device_id: &str) -> Result<PrinterUpdate> {
        self.apply(device_id, "paused_on_failure", move |printer, txn, batch, now| {
            stage_pause_on_failure(printer, txn, batch, now)?;
            Ok(Applied::unchanged())
        })
        .await
    }

    /// Cancel the print, superseding any pending command. Records an
    /// acknowledgment without clearing the alert.
    pub async fn cancel(&self, device_id: &str) -> Result<PrinterUpdate> {
        self.apply(device_id, "cancelled", move |printer, txn, batch, now| {
            stage_cancel(printer, txn, batch, now)
        })
        .await
    }

    // ========== Telemetry ==========

    /// Live status of a printer; `None` when no fresh telemetry exists.
    pub fn status(&self, device_id: &str) -> Result<Option<Fields>> {
        self.get(device_id)?;
        self.telemetry.get_status(device_id)
    }

    /// Live picture metadata of a printer; `None` when nothing fresh exists.
    pub fn picture(&self, device_id: &str) -> Result<Option<Fields>> {
        self.get(device_id)?;
        self.telemetry.get_picture(device_id)
    }

    // ========== Internals ==========

    /// Load, mutate, persist and enqueue in one transaction, then publish.
    pub(crate) async fn apply<F>(
        &self,
        device_id: &str,
        change: &'static str,
        op: F,
    ) -> Result<PrinterUpdate>
    where
        F: FnOnce(&mut Printer, &mut StoreTxn, &mut CommandBatch, DateTime<Utc>) -> Result<Applied>
            + Send
            + 'static,
    {
        let device = device_id.to_string();
        let clock = Arc::clone(&self.clock);
        let committed = self
            .store
            .write_blocking(move |txn| -> Result<(Printer, Applied, CommandBatch)> {
                let now = clock.now();
                let mut printer = txn.printer(&device)?;
                let mut batch = CommandBatch::new(device);
                let applied = op(&mut printer, txn, &mut batch, now)?;
                if applied.changed {
                    txn.put_printer(&mut printer, change, now)?;
                }
                Ok((printer, applied, batch))
            })
            .await;

        let (printer, applied, batch) = match committed {
            Ok(committed) => committed,
            Err(e) => {
                match &e {
                    Error::InvalidTransition(reason) => warn!(
                        category = "printers",
                        device_id = %device_id,
                        change,
                        reason = %reason,
                        "Transition rejected"
                    ),
                    _ => debug!(
                        category = "printers",
                        device_id = %device_id,
                        change,
                        error = %e,
                        "Operation failed"
                    ),
                }
                return Err(e);
            }
        };

        if applied.changed {
            info!(
                category = "printers",
                device_id = %device_id,
                change,
                alert = printer.alert_state().as_str(),
                "Printer updated"
            );
        } else if batch.is_empty() {
            debug!(category = "printers", device_id = %device_id, change, "No change");
        }

        let update = PrinterUpdate {
            printer,
            changed: applied.changed,
            transition: applied.transition,
            commands: batch.queued().to_vec(),
            aborted: batch.aborted().to_vec(),
        };
        self.events.publish_all(applied.events, EVENT_SOURCE);
        self.queue.announce(batch);
        Ok(update)
    }

    fn forget(&self, printer: &Printer) {
        self.telemetry.evict(&printer.id);
        info!(category = "printers", device_id = %printer.id, "Printer deleted");
        self.events.publish(
            PrinterEvent::PrinterDeleted {
                device_id: printer.id.clone(),
            },
            EVENT_SOURCE,
        );
    }
}

pub(crate) fn raise_alert(printer: &mut Printer, now: DateTime<Utc>) -> Result<Applied> {
    let transition = printer.raise_alert(now)?;
    let filename = printer.current_print_filename().unwrap_or_default().to_string();
    Ok(Applied {
        changed: true,
        transition: Some(transition),
        events: vec![PrinterEvent::AlertRaised {
            device_id: printer.id.clone(),
            filename,
            alerted_at: now,
        }],
    })
}

fn acknowledge(printer: &mut Printer, now: DateTime<Utc>, mute: bool) -> Applied {
    let transition = printer.acknowledge(now, mute);
    let mut events = Vec::new();
    if let Transition::Acknowledged {
        acknowledged_at,
        muted,
        ..
    } = transition
    {
        events.push(PrinterEvent::AlertAcknowledged {
            device_id: printer.id.clone(),
            muted,
            acknowledged_at,
        });
    }
    Applied {
        changed: transition.changed(),
        transition: Some(transition),
        events,
    }
}

pub(crate) fn stage_pause_on_failure(
    printer: &Printer,
    txn: &mut StoreTxn,
    batch: &mut CommandBatch,
    now: DateTime<Utc>,
) -> Result<()> {
    batch.enqueue(txn, CommandRequest::pause(), EnqueueMode::AbortExisting, now)?;
    if printer.policy.tools_off_on_pause {
        let tools_off = CommandRequest::set_temps(Heater::Tools, 0.0);
        batch.enqueue(txn, tools_off, EnqueueMode::Append, now)?;
    }
    if printer.policy.bed_off_on_pause {
        let bed_off = CommandRequest::set_temps(Heater::Bed, 0.0);
        batch.enqueue(txn, bed_off, EnqueueMode::Append, now)?;
    }
    Ok(())
}

pub(crate) fn stage_cancel(
    printer: &mut Printer,
    txn: &mut StoreTxn,
    batch: &mut CommandBatch,
    now: DateTime<Utc>,
) -> Result<Applied> {
    let applied = acknowledge(printer, now, true);
    batch.enqueue(txn, CommandRequest::cancel(), EnqueueMode::AbortExisting, now)?;
    Ok(applied)
}

fn validate_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(Error::Validation("printer name must not be empty".to_string()));
    }
    Ok(trimmed.to_string())
}

/// Random alphanumeric auth token.
pub fn generate_auth_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(AUTH_TOKEN_LEN)
        .map(char::from)
        .collect()
}
