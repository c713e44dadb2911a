//! Command dispatch for PrintGuard printers.
//!
//! Provides:
//! - [`CommandQueue`]: per-device command log with abort-existing semantics
//! - [`CommandBatch`]: commands staged inside a larger printer transaction
//! - [`AgentSession`]: the device agent's view, scoped by auth token

pub mod agent;
pub mod batch;
pub mod queue;

pub use agent::AgentSession;
pub use batch::CommandBatch;
pub use queue::{CommandQueue, QueueStats};
