//! Shared fixtures for printer service tests.

#![allow(dead_code)]

use std::sync::Arc;

use printguard_commands::CommandQueue;
use printguard_core::config::TelemetryConfig;
use printguard_core::{EventBus, ManualClock, SharedClock};
use printguard_devices::{FailureResponder, PrinterService, StatusCache};
use printguard_storage::{DeviceStore, StoreOptions};

pub struct Harness {
    pub dir: tempfile::TempDir,
    pub store: Arc<DeviceStore>,
    pub clock: Arc<ManualClock>,
    pub bus: EventBus,
    pub printers: PrinterService,
    pub responder: FailureResponder,
}

pub fn harness() -> Harness {
    harness_with(StoreOptions::default())
}

pub fn harness_with(options: StoreOptions) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = DeviceStore::open(dir.path().join("printguard.redb"), options).unwrap();
    let clock = Arc::new(ManualClock::default());
    let shared: SharedClock = clock.clone();
    let bus = EventBus::new();

    let queue = CommandQueue::new(Arc::clone(&store), bus.clone(), Arc::clone(&shared));
    let telemetry = Arc::new(StatusCache::new(&TelemetryConfig::default(), shared));
    let printers = PrinterService::new(queue, telemetry);
    let responder = FailureResponder::new(printers.clone());

    Harness {
        dir,
        store,
        clock,
        bus,
        printers,
        responder,
    }
}
