//! Cascading interlock
//!
//! Several switches share one breaker zone. When any of them reports OFF,
//! every sibling is commanded OFF too. The cascade's own commands come back
//! as OFF reports from the siblings; each circuit's [`EchoTracker`] keeps
//! those from re-triggering it.

use ruler_bus::{merge, CommandSink, Subscription};
use ruler_core::{SharedClock, Status, Timestamp, Topic};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use crate::dispatcher::Dispatcher;
use crate::echo::{EchoTracker, DEFAULT_ECHO_WINDOW};
use crate::error::{RuleError, RuleResult};
use crate::rule::config_timer;

/// Per-circuit echo state of one zone
///
/// Circuits are identified by index. State is never shared between circuits.
#[derive(Debug, Clone)]
pub struct CascadeState {
    trackers: Vec<EchoTracker>,
}

impl CascadeState {
    pub fn new(circuits: usize, window: Duration) -> Self {
        Self {
            trackers: vec![EchoTracker::new(window); circuits],
        }
    }

    pub fn len(&self) -> usize {
        self.trackers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }

    /// Handle a status report from circuit `source`
    ///
    /// Returns the circuits to command OFF when the report triggers the
    /// cascade, and records the OFF command for each of them at `now`.
    pub fn on_status(
        &mut self,
        source: usize,
        status: Status,
        observed_at: Timestamp,
        now: Timestamp,
    ) -> Option<Vec<usize>> {
        if status != Status::Off {
            return None;
        }

        let tracker = self.trackers.get(source)?;
        if tracker.is_echo(observed_at) {
            trace!(circuit = source, "Suppressed OFF echo");
            return None;
        }

        let siblings: Vec<usize> = (0..self.trackers.len()).filter(|&i| i != source).collect();
        for &i in &siblings {
            self.trackers[i].record(Status::Off.as_str(), now);
        }
        Some(siblings)
    }

    /// Echo tracker of one circuit
    pub fn tracker(&self, circuit: usize) -> Option<&EchoTracker> {
        self.trackers.get(circuit)
    }
}

/// One switch in a zone
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitConfig {
    pub name: String,
    pub status: Topic,
    pub command: Topic,
}

/// Interlock rule configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterlockConfig {
    pub name: String,

    pub circuits: Vec<CircuitConfig>,

    #[serde(default = "default_echo_window_ms")]
    pub echo_window_ms: u64,
}

fn default_echo_window_ms() -> u64 {
    DEFAULT_ECHO_WINDOW.as_millis() as u64
}

/// A running interlock
pub struct Interlock {
    name: String,
    circuits: Vec<CircuitConfig>,
    sinks: Vec<CommandSink>,
    statuses: Vec<Subscription>,
    window: Duration,
}

impl Interlock {
    pub async fn build(config: InterlockConfig, dispatcher: &mut Dispatcher) -> RuleResult<Self> {
        if config.circuits.len() < 2 {
            return Err(RuleError::InvalidConfig(format!(
                "{}: an interlock needs at least two circuits",
                config.name
            )));
        }

        let window = config_timer(&config.name, "echo_window_ms", config.echo_window_ms)?;

        let mut statuses = Vec::with_capacity(config.circuits.len());
        let mut sinks = Vec::with_capacity(config.circuits.len());
        for circuit in &config.circuits {
            statuses.push(dispatcher.subscribe(&circuit.status).await?);
            sinks.push(dispatcher.sink(&circuit.command));
        }

        Ok(Self {
            name: config.name,
            circuits: config.circuits,
            sinks,
            statuses,
            window,
        })
    }

    pub async fn run(self, clock: SharedClock) {
        let mut state = CascadeState::new(self.circuits.len(), self.window);
        let mut reports = merge(self.statuses);

        while let Some((source, message)) = reports.recv().await {
            let status = match Status::from_payload(&message.payload) {
                Ok(status) => status,
                Err(e) => {
                    warn!(rule = %self.name, topic = %message.topic, error = %e, "Ignoring undecodable status");
                    continue;
                }
            };

            let now = clock.now();
            let Some(targets) = state.on_status(source, status, now, now) else {
                continue;
            };

            info!(
                rule = %self.name,
                source = %self.circuits[source].name,
                siblings = targets.len(),
                "Interlock: cascading OFF"
            );
            for i in targets {
                self.sinks[i].send(Status::Off);
            }
        }

        debug!(rule = %self.name, "Interlock inputs closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn at(ms: i64) -> Timestamp {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap() + chrono::Duration::milliseconds(ms)
    }

    fn zone() -> CascadeState {
        CascadeState::new(3, DEFAULT_ECHO_WINDOW)
    }

    #[test]
    fn test_external_off_cascades_to_siblings() {
        let mut state = zone();
        let targets = state.on_status(1, Status::Off, at(0), at(0)).unwrap();
        assert_eq!(targets, vec![0, 2]);

        assert!(state.tracker(0).unwrap().last().is_some());
        assert!(state.tracker(1).unwrap().last().is_none());
        assert!(state.tracker(2).unwrap().last().is_some());
    }

    #[test]
    fn test_on_reports_never_cascade() {
        let mut state = zone();
        assert!(state.on_status(0, Status::On, at(0), at(0)).is_none());
    }

    #[test]
    fn test_echo_within_window_is_suppressed() {
        let mut state = zone();
        state.on_status(0, Status::Off, at(0), at(0)).unwrap();

        // Sibling 1 echoes our OFF 500ms later
        assert!(state.on_status(1, Status::Off, at(500), at(500)).is_none());
        assert!(state.on_status(2, Status::Off, at(999), at(999)).is_none());
    }

    #[test]
    fn test_off_at_window_boundary_cascades() {
        let mut state = zone();
        state.on_status(0, Status::Off, at(0), at(0)).unwrap();

        let targets = state.on_status(1, Status::Off, at(1000), at(1000)).unwrap();
        assert_eq!(targets, vec![0, 2]);
    }

    #[test]
    fn test_trackers_are_per_circuit() {
        let mut state = zone();
        state.on_status(0, Status::Off, at(0), at(0)).unwrap();

        // Circuit 0 issued nothing itself, so its own OFF is never an echo
        assert!(state.on_status(0, Status::Off, at(100), at(100)).is_some());
    }

    #[test]
    fn test_repeated_cascade_yields_same_targets() {
        let mut state = zone();
        let first = state.on_status(2, Status::Off, at(0), at(0)).unwrap();
        let second = state.on_status(2, Status::Off, at(10), at(10)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_unknown_circuit_is_ignored() {
        let mut state = zone();
        assert!(state.on_status(7, Status::Off, at(0), at(0)).is_none());
    }
}
