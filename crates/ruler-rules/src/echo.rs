//! Command echo tracking
//!
//! A command this process publishes comes back as a status report from the
//! device a moment later. The tracker remembers the last command issued for
//! one device and classifies status reports that arrive within the
//! suppression window as echoes rather than external changes.

use ruler_core::{CommandEcho, Timestamp};
use std::time::Duration;

use crate::chrono_duration;

/// Suppression window used when none is configured
pub const DEFAULT_ECHO_WINDOW: Duration = Duration::from_millis(1000);

/// Last locally issued command for one device
#[derive(Debug, Clone)]
pub struct EchoTracker {
    window: chrono::Duration,
    last: Option<CommandEcho>,
}

impl EchoTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window: chrono_duration(window),
            last: None,
        }
    }

    /// Remember a command issued at `at`
    pub fn record(&mut self, value: impl Into<String>, at: Timestamp) {
        self.last = Some(CommandEcho {
            value: value.into(),
            issued_at: at,
        });
    }

    /// The most recent command, if any
    pub fn last(&self) -> Option<&CommandEcho> {
        self.last.as_ref()
    }

    /// Whether a report observed at `observed_at` may be our own echo
    ///
    /// True when less than the window has passed since the last command,
    /// including reports that predate it.
    pub fn is_echo(&self, observed_at: Timestamp) -> bool {
        match &self.last {
            Some(echo) => observed_at - echo.issued_at < self.window,
            None => false,
        }
    }
}

impl Default for EchoTracker {
    fn default() -> Self {
        Self::new(DEFAULT_ECHO_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn at(ms: i64) -> Timestamp {
        Utc.with_ymd_and_hms(2024, 1, 1, 3, 0, 0).unwrap() + chrono::Duration::milliseconds(ms)
    }

    #[test]
    fn test_nothing_issued_is_never_an_echo() {
        let tracker = EchoTracker::default();
        assert!(tracker.last().is_none());
        assert!(!tracker.is_echo(at(0)));
    }

    #[test]
    fn test_window_boundary() {
        let mut tracker = EchoTracker::new(Duration::from_millis(1000));
        tracker.record("OFF", at(0));

        assert!(tracker.is_echo(at(0)));
        assert!(tracker.is_echo(at(999)));
        assert!(!tracker.is_echo(at(1000)));
        assert!(!tracker.is_echo(at(5000)));
    }

    #[test]
    fn test_reports_older_than_the_command_are_echoes() {
        let mut tracker = EchoTracker::default();
        tracker.record("ON", at(10_000));
        assert!(tracker.is_echo(at(9_000)));
    }

    #[test]
    fn test_latest_command_wins() {
        let mut tracker = EchoTracker::default();
        tracker.record("ON", at(0));
        tracker.record("OFF", at(5000));

        assert_eq!(tracker.last().unwrap().value, "OFF");
        assert!(tracker.is_echo(at(5500)));
    }
}
