//! Printer aggregate for PrintGuard.
//!
//! [`PrinterService`] owns print tracking, the alert lifecycle and print
//! control commands. [`StatusCache`] holds live telemetry.
//! [`FailureResponder`] turns a detected failure into the configured action.

pub mod failure;
pub mod service;
pub mod status_cache;

pub use failure::{FailureResponder, FailureResponse};
pub use service::{generate_auth_token, PrinterService, PrinterUpdate};
pub use status_cache::{Fields, StatusCache};
