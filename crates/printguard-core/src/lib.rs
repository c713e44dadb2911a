//! Core types for PrintGuard.
//!
//! Defines the printer aggregate record, its alert state machine, the command
//! model shared with the device agent, and the ambient pieces every other
//! crate uses: errors, configuration, the clock and the event bus.

pub mod alert;
pub mod clock;
pub mod command;
pub mod config;
pub mod error;
pub mod event;
pub mod eventbus;
pub mod printer;

pub use alert::{AlertState, Transition};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use command::{Command, CommandId, CommandRequest, CommandStatus, EnqueueMode, Heater};
pub use config::PrintGuardConfig;
pub use error::{Error, Result};
pub use event::{EventMetadata, PrinterEvent};
pub use eventbus::EventBus;
pub use printer::{ActivePrint, DeviceId, FailureAction, FailurePolicy, Printer, UserId};

/// Re-exports commonly used types.
pub mod prelude {
    pub use crate::alert::{AlertState, Transition};
    pub use crate::clock::{Clock, SharedClock, SystemClock};
    pub use crate::command::{Command, CommandId, CommandRequest, CommandStatus, EnqueueMode};
    pub use crate::error::{Error, Result};
    pub use crate::event::PrinterEvent;
    pub use crate::eventbus::EventBus;
    pub use crate::printer::{DeviceId, FailureAction, FailurePolicy, Printer};
}
