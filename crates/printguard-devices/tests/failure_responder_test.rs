//! Failure policy dispatch.

mod common;

use common::harness;
use printguard_core::{AlertState, Error, FailureAction, FailurePolicy};

async fn printing_with(h: &common::Harness, action: FailureAction) -> String {
    let p = h.printers.register("P", "u").await.unwrap();
    h.printers
        .update_policy(
            &p.id,
            FailurePolicy {
                action,
                ..FailurePolicy::default()
            },
        )
        .await
        .unwrap();
    h.printers.start_print(&p.id, "benchy.gcode").await.unwrap();
    p.id
}

#[tokio::test]
async fn test_notify_only() {
    let h = harness();
    let id = printing_with(&h, FailureAction::None).await;

    let response = h.responder.respond(&id).await.unwrap();
    assert_eq!(response.action, FailureAction::None);
    assert!(response.update.commands.is_empty());
    assert!(matches!(
        response.update.printer.alert_state(),
        AlertState::Alerting { .. }
    ));
}

#[tokio::test]
async fn test_pause_policy() {
    let h = harness();
    let id = printing_with(&h, FailureAction::Pause).await;

    let response = h.responder.respond(&id).await.unwrap();
    // Default policy switches tool heaters off but leaves the bed on.
    assert_eq!(response.update.command_names(), vec!["pause", "set_temps"]);
    assert_eq!(response.update.commands[1].args["heater"], "tools");
    assert!(response.update.printer.current_print_alerted_at().is_some());
}

#[tokio::test]
async fn test_cancel_policy() {
    let h = harness();
    let id = printing_with(&h, FailureAction::Cancel).await;
    h.printers.resume(&id, false).await.unwrap();

    let response = h.responder.respond(&id).await.unwrap();
    assert_eq!(response.update.command_names(), vec!["cancel"]);
    assert_eq!(response.update.aborted.len(), 2);

    let printer = response.update.printer;
    assert!(printer.current_print_alerted_at().is_some());
    assert!(printer.alert_acknowledged_at().is_some());
}

#[tokio::test]
async fn test_no_print_is_rejected_without_commands() {
    let h = harness();
    let p = h.printers.register("P", "u").await.unwrap();

    let err = h.responder.respond(&p.id).await.unwrap_err();
    assert!(matches!(err, Error::InvalidTransition(_)));
    assert!(h.printers.queue().list(&p.id, None).unwrap().is_empty());
}
