//! Rule Engine
//!
//! This crate provides the rule composition and timing engine of mqtt-ruler.
//! Rules subscribe to topics, evaluate time-aware conditions and publish
//! commands back onto the bus.
//!
//! # Architecture
//!
//! ```text
//! TOPIC BUS → EVENT SOURCE → RULE PRIMITIVES → COMMAND SINK → TOPIC BUS
//! ```
//!
//! Rules never share memory. Each one owns its state and runs as its own
//! task; the bus is the only coupling between them.
//!
//! # Primitives
//!
//! - [`DebouncedCombiner`] - latest value of N inputs, emitted after a quiet period
//! - [`DeadlineStateMachine`] - ON on motion, OFF once a hold deadline passes
//! - [`CascadeState`] - OFF cascade across a circuit zone with echo suppression
//! - [`JitteredScheduler`] - hour-of-day trigger with a random delay
//!
//! # Key Types
//!
//! - [`RuleConfig`] - A rule definition from configuration
//! - [`Dispatcher`] - Wires topics to sources and sinks and starts rules

pub mod button;
pub mod combiner;
pub mod deadline;
pub mod dispatcher;
pub mod echo;
pub mod error;
pub mod interlock;
pub mod motion;
pub mod predicate;
pub mod rule;
pub mod scheduler;

pub use button::{ButtonConfig, ButtonRule};
pub use combiner::{DebouncedCombiner, DEFAULT_QUIET_PERIOD};
pub use deadline::{
    DeadlineStateMachine, NightlightConfig, NightlightRule, Observation, DEFAULT_HOLD,
    DEFAULT_TICK,
};
pub use dispatcher::Dispatcher;
pub use echo::{EchoTracker, DEFAULT_ECHO_WINDOW};
pub use error::{RuleError, RuleResult};
pub use interlock::{CascadeState, CircuitConfig, Interlock, InterlockConfig};
pub use motion::{MotionSwitchConfig, MotionSwitchRule, StatusRequirement};
pub use predicate::PredicateChain;
pub use rule::{Action, RuleConfig, MAX_TIMER};
pub use scheduler::{
    ArmState, JitteredScheduler, ScheduleConfig, ScheduleRule, DEFAULT_JITTER_CEILING,
    DEFAULT_PERIOD,
};

/// Convert a std duration for timestamp arithmetic
pub(crate) fn chrono_duration(duration: std::time::Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(i64::try_from(duration.as_millis()).unwrap_or(i64::MAX))
}
