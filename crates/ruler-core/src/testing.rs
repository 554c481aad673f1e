//! Test clock driven by the tokio clock
//!
//! Enabled for this crate's own tests and for dependents through the
//! `test-util` feature.

use chrono::{DateTime, FixedOffset, Offset, Timelike, Utc};

use crate::clock::{Clock, Timestamp};

/// A clock for tests that follows the tokio clock
///
/// Wall-clock time is `origin` plus however far the tokio clock has moved
/// since construction, so with a paused runtime `tokio::time::advance` moves
/// both timers and hours together. Local hours use a fixed offset.
#[derive(Debug, Clone)]
pub struct MockClock {
    origin: Timestamp,
    started: tokio::time::Instant,
    offset: FixedOffset,
}

impl MockClock {
    /// Create a clock reading `origin` now, with local time equal to UTC
    pub fn at(origin: Timestamp) -> Self {
        Self::with_offset(origin, Utc.fix())
    }

    /// Create a clock with a specific local offset
    pub fn with_offset(origin: Timestamp, offset: FixedOffset) -> Self {
        Self {
            origin,
            started: tokio::time::Instant::now(),
            offset,
        }
    }

    /// Parse an RFC 3339 origin
    pub fn parse(origin: &str) -> Result<Self, chrono::ParseError> {
        let origin = DateTime::parse_from_rfc3339(origin)?;
        Ok(Self::with_offset(origin.with_timezone(&Utc), *origin.offset()))
    }
}

impl Clock for MockClock {
    fn now(&self) -> Timestamp {
        let elapsed = tokio::time::Instant::now().duration_since(self.started);
        self.origin + chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero())
    }

    fn local_hour(&self) -> u32 {
        self.now().with_timezone(&self.offset).hour()
    }
}
