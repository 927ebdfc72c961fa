//! Clock Port - injectable time source.
//!
//! Everything that needs the current time (slot timestamps, expiry
//! sweeps, escalation checks) reads it through this port so tests
//! never sleep or race the wall clock.

use chrono::{DateTime, Utc};

/// Port for the ambient time source.
pub trait Clock: Send + Sync {
    /// The current instant.
    fn now(&self) -> DateTime<Utc>;
}
