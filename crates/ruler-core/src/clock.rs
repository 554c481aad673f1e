//! Wall-clock time sources
//!
//! Rules take their notion of "now" and of the local hour from a [`Clock`]
//! so that tests can run against a controllable time source.

use chrono::{DateTime, Local, Timelike, Utc};
use std::sync::Arc;

/// A point in time as seen by the engine
pub type Timestamp = DateTime<Utc>;

/// Source of wall-clock time
pub trait Clock: Send + Sync + 'static {
    /// Current time
    fn now(&self) -> Timestamp;

    /// Current hour of the day in local time (0-23)
    fn local_hour(&self) -> u32;
}

/// Shared clock handle
pub type SharedClock = Arc<dyn Clock>;

/// The system clock in the host's local time zone
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }

    fn local_hour(&self) -> u32 {
        Local::now().hour()
    }
}
