//! Deadline state machine (the nightlight controller)
//!
//! Switches a light ON when motion is seen inside an hour window in low
//! ambient light, and OFF again once `observed_at + hold` has passed, but only
//! while the device still reports ON. An external OFF always beats an
//! internal hold.
//!
//! The reducer is a Moore machine over `{ON, OFF}` with the deadline as an
//! auxiliary timer value. It is evaluated on every motion report, every
//! status report and every periodic tick, and a command is published only
//! when the `(status, deadline)` pair changes.

use ruler_bus::{CommandSink, Subscription};
use ruler_core::{
    DeviceState, ExternalStatus, HourWindow, MotionEvent, MotionReading, SharedClock, Status,
    Timestamp, Topic,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::dispatcher::Dispatcher;
use crate::echo::{EchoTracker, DEFAULT_ECHO_WINDOW};
use crate::error::{RuleError, RuleResult};
use crate::rule::config_timer;
use crate::chrono_duration;

/// How long the light stays on after the last motion
pub const DEFAULT_HOLD: Duration = Duration::from_secs(120);

/// Period of the re-evaluation ticker
pub const DEFAULT_TICK: Duration = Duration::from_secs(5);

/// Inputs to one evaluation
#[derive(Debug, Clone, Copy)]
pub struct Observation<'a> {
    /// Motion report that caused this evaluation, if any
    pub motion: Option<&'a MotionEvent>,
    /// Last status the device reported on the bus
    pub external: Option<&'a ExternalStatus>,
    pub now: Timestamp,
    /// Local hour at `now`
    pub hour: u32,
}

/// The nightlight reducer
#[derive(Debug, Clone)]
pub struct DeadlineStateMachine {
    hours: HourWindow,
    illuminance_below: f64,
    hold: chrono::Duration,
}

impl DeadlineStateMachine {
    pub fn new(hours: HourWindow, illuminance_below: f64, hold: Duration) -> Self {
        Self {
            hours,
            illuminance_below,
            hold: chrono_duration(hold),
        }
    }

    /// Compute the next state
    ///
    /// 1. motion with occupancy, in the window, below the light threshold:
    ///    ON until `observed_at + hold`
    /// 2. deadline pending but the device reports OFF (and the report is not
    ///    an echo of our own command): OFF now
    /// 3. deadline passed and the device still reports ON: OFF
    /// 4. otherwise unchanged
    pub fn step(
        &self,
        state: &DeviceState,
        obs: &Observation<'_>,
        echo: &EchoTracker,
    ) -> RuleResult<DeviceState> {
        if let Some(motion) = obs.motion {
            if self.hours.contains(obs.hour)
                && motion.occupancy
                && motion.illuminance < self.illuminance_below
            {
                let deadline = motion
                    .observed_at
                    .checked_add_signed(self.hold)
                    .ok_or(RuleError::DeadlineOverflow {
                        observed_at: motion.observed_at,
                    })?;
                return Ok(DeviceState {
                    status: Status::On,
                    deadline,
                });
            }
        }

        if let Some(external) = obs.external {
            if state.deadline > obs.now
                && external.status == Status::Off
                && !echo.is_echo(external.observed_at)
            {
                return Ok(DeviceState {
                    status: Status::Off,
                    deadline: obs.now,
                });
            }

            if state.deadline <= obs.now && external.status == Status::On {
                return Ok(DeviceState {
                    status: Status::Off,
                    deadline: state.deadline,
                });
            }
        }

        Ok(*state)
    }
}

/// Nightlight rule configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NightlightConfig {
    pub name: String,

    /// Occupancy sensor topic
    pub motion: Topic,

    /// Status topic of the light
    pub status: Topic,

    /// Command topic of the light
    pub command: Topic,

    /// Local hours during which motion switches the light on
    pub hours: HourWindow,

    /// Motion only counts below this illuminance
    pub illuminance_below: f64,

    #[serde(default = "default_hold_ms")]
    pub hold_ms: u64,

    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,

    #[serde(default = "default_echo_window_ms")]
    pub echo_window_ms: u64,
}

fn default_hold_ms() -> u64 {
    DEFAULT_HOLD.as_millis() as u64
}

fn default_tick_ms() -> u64 {
    DEFAULT_TICK.as_millis() as u64
}

fn default_echo_window_ms() -> u64 {
    DEFAULT_ECHO_WINDOW.as_millis() as u64
}

impl NightlightConfig {
    pub fn validate(&self) -> RuleResult<()> {
        if self.hold_ms == 0 {
            return Err(RuleError::InvalidConfig(format!(
                "{}: hold_ms must be greater than zero",
                self.name
            )));
        }
        if self.tick_ms == 0 {
            return Err(RuleError::InvalidConfig(format!(
                "{}: tick_ms must be greater than zero",
                self.name
            )));
        }
        config_timer(&self.name, "hold_ms", self.hold_ms)?;
        config_timer(&self.name, "tick_ms", self.tick_ms)?;
        config_timer(&self.name, "echo_window_ms", self.echo_window_ms)?;
        if self.hours.start > 23 || self.hours.end > 23 {
            return Err(RuleError::InvalidConfig(format!(
                "{}: hours must be within 0-23",
                self.name
            )));
        }
        Ok(())
    }
}

/// A running nightlight
pub struct NightlightRule {
    name: String,
    machine: DeadlineStateMachine,
    motion: Subscription,
    status: Subscription,
    sink: CommandSink,
    clock: SharedClock,
    tick: Duration,
    echo_window: Duration,
}

impl NightlightRule {
    pub async fn build(config: NightlightConfig, dispatcher: &mut Dispatcher) -> RuleResult<Self> {
        config.validate()?;

        Ok(Self {
            machine: DeadlineStateMachine::new(
                config.hours,
                config.illuminance_below,
                Duration::from_millis(config.hold_ms),
            ),
            motion: dispatcher.subscribe(&config.motion).await?,
            status: dispatcher.subscribe(&config.status).await?,
            sink: dispatcher.sink(&config.command),
            clock: dispatcher.clock(),
            tick: Duration::from_millis(config.tick_ms),
            echo_window: Duration::from_millis(config.echo_window_ms),
            name: config.name,
        })
    }

    pub async fn run(mut self) {
        let mut state = DeviceState::off(self.clock.now());
        let mut external: Option<ExternalStatus> = None;
        let mut echo = EchoTracker::new(self.echo_window);

        let mut ticker = interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let motion = tokio::select! {
                message = self.motion.recv() => {
                    let Some(message) = message else { break };
                    match message.payload.parse::<MotionReading>() {
                        Ok(reading) => Some(MotionEvent::observe(&reading, self.clock.now())),
                        Err(e) => {
                            warn!(rule = %self.name, error = %e, "Ignoring undecodable motion report");
                            continue;
                        }
                    }
                }
                message = self.status.recv() => {
                    let Some(message) = message else { break };
                    match Status::from_payload(&message.payload) {
                        Ok(status) => {
                            external = Some(ExternalStatus {
                                status,
                                observed_at: self.clock.now(),
                            });
                            None
                        }
                        Err(e) => {
                            warn!(rule = %self.name, error = %e, "Ignoring undecodable status report");
                            continue;
                        }
                    }
                }
                _ = ticker.tick() => None,
            };

            let now = self.clock.now();
            let obs = Observation {
                motion: motion.as_ref(),
                external: external.as_ref(),
                now,
                hour: self.clock.local_hour(),
            };

            match self.machine.step(&state, &obs, &echo) {
                Ok(next) if next != state => {
                    info!(
                        rule = %self.name,
                        status = %next.status,
                        deadline = %next.deadline,
                        "Nightlight: switching"
                    );
                    self.sink.send(next.status);
                    echo.record(next.status.as_str(), now);
                    state = next;
                }
                Ok(_) => trace!(rule = %self.name, "Nightlight unchanged"),
                Err(e) => warn!(rule = %self.name, error = %e, "Skipping nightlight tick"),
            }
        }

        debug!(rule = %self.name, "Nightlight inputs closed");
    }
}
