//! Live telemetry cache.
//!
//! The telemetry producer overwrites a flat field map per device on every
//! push. Readers get the latest map, or `None` when nothing fresh exists.
//! A stored value that cannot be coerced to its expected type is reported as
//! [`Error::StaleData`], which is distinct from absence.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use moka::sync::Cache;
use serde_json::{Map, Number, Value};
use tracing::trace;

use printguard_core::config::TelemetryConfig;
use printguard_core::{DeviceId, Error, Result, SharedClock};

/// A telemetry field map.
pub type Fields = Map<String, Value>;

/// Remaining print time, coerced to an integer on read.
pub const SECONDS_LEFT: &str = "seconds_left";

/// Picture progress fraction, coerced to a float on read.
pub const PROGRESS: &str = "p";

#[derive(Clone)]
struct Snapshot {
    fields: Arc<Fields>,
    written_at: DateTime<Utc>,
}

/// Per-device status and picture snapshots with a time-to-live.
pub struct StatusCache {
    status: Cache<DeviceId, Snapshot>,
    pictures: Cache<DeviceId, Snapshot>,
    ttl: chrono::Duration,
    clock: SharedClock,
}

impl StatusCache {
    pub fn new(config: &TelemetryConfig, clock: SharedClock) -> Self {
        let ttl = std::time::Duration::from_secs(config.ttl_secs);
        let build = || -> Cache<DeviceId, Snapshot> {
            Cache::builder()
                .max_capacity(config.max_devices)
                .time_to_live(ttl)
                .build()
        };
        Self {
            status: build(),
            pictures: build(),
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::weeks(5200)),
            clock,
        }
    }

    /// Replace the status snapshot of a device.
    pub fn put_status(&self, device_id: &str, fields: Fields) {
        trace!(device_id = %device_id, fields = fields.len(), "Status snapshot stored");
        self.status.insert(device_id.to_string(), self.snapshot(fields));
    }

    /// Replace the picture snapshot of a device.
    pub fn put_picture(&self, device_id: &str, fields: Fields) {
        trace!(device_id = %device_id, fields = fields.len(), "Picture snapshot stored");
        self.pictures
            .insert(device_id.to_string(), self.snapshot(fields));
    }

    /// Drop both snapshots of a device.
    pub fn evict(&self, device_id: &str) {
        self.status.invalidate(device_id);
        self.pictures.invalidate(device_id);
    }

    /// Latest status, with `seconds_left` coerced to an integer.
    pub fn get_status(&self, device_id: &str) -> Result<Option<Fields>> {
        let Some(mut fields) = self.fresh(&self.status, device_id) else {
            return Ok(None);
        };
        if let Some(value) = fields.get_mut(SECONDS_LEFT) {
            let seconds = coerce_int(value).ok_or_else(|| stale(device_id, SECONDS_LEFT, value))?;
            *value = Value::Number(Number::from(seconds));
        }
        Ok(Some(fields))
    }

    /// Latest picture metadata, with `p` coerced to a float.
    pub fn get_picture(&self, device_id: &str) -> Result<Option<Fields>> {
        let Some(mut fields) = self.fresh(&self.pictures, device_id) else {
            return Ok(None);
        };
        if let Some(value) = fields.get_mut(PROGRESS) {
            let progress = coerce_float(value)
                .and_then(Number::from_f64)
                .ok_or_else(|| stale(device_id, PROGRESS, value))?;
            *value = Value::Number(progress);
        }
        Ok(Some(fields))
    }

    fn snapshot(&self, fields: Fields) -> Snapshot {
        Snapshot {
            fields: Arc::new(fields),
            written_at: self.clock.now(),
        }
    }

    /// Copy of an unexpired, non-empty snapshot.
    fn fresh(&self, cache: &Cache<DeviceId, Snapshot>, device_id: &str) -> Option<Fields> {
        let snapshot = cache.get(device_id)?;
        if self.clock.now() - snapshot.written_at >= self.ttl {
            cache.invalidate(device_id);
            return None;
        }
        if snapshot.fields.is_empty() {
            return None;
        }
        Some(snapshot.fields.as_ref().clone())
    }
}

// -2^63 and 2^63, exact in f64. `i64::MAX as f64` rounds up to the latter.
const I64_MIN_F64: f64 = -9_223_372_036_854_775_808.0;
const I64_END_F64: f64 = 9_223_372_036_854_775_808.0;

fn stale(device_id: &str, field: &str, value: &Value) -> Error {
    Error::StaleData {
        device_id: device_id.to_string(),
        field: field.to_string(),
        value: value.to_string(),
    }
}

/// Integer coercion: integers as-is, in-range floats truncated toward zero,
/// booleans as 0/1, numeric strings parsed. Values outside `i64` fail.
fn coerce_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .map(f64::trunc)
                .filter(|f| (I64_MIN_F64..I64_END_F64).contains(f))
                .map(|f| f as i64)
        }),
        Value::Bool(b) => Some(i64::from(*b)),
        Value::String(s) => s.trim().parse().ok(),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Float coercion: numbers, booleans as 0.0/1.0, numeric strings parsed.
fn coerce_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => s.trim().parse().ok(),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}
