//! Durable storage for PrintGuard.
//!
//! A single redb database holds printers, their command queues and the
//! optional printer history. See [`DeviceStore`].

pub mod device_store;
pub mod error;

pub use device_store::{DeviceStore, HistoryEntry, StoreOptions, StoreTxn};
pub use error::{Error, Result};
