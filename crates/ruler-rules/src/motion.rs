//! Motion switch rules
//!
//! A [`DebouncedCombiner`] over one occupancy sensor and any number of
//! device status topics. Once the inputs settle, the combination runs
//! through a predicate chain and, when every predicate holds, the command is
//! sent to the target. An optional off timer sends the off command later;
//! a newer emission restarts it.

use ruler_bus::{CommandSink, Subscription};
use ruler_core::{HourWindow, Message, MotionReading, Payload, SharedClock, Status, Topic};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::combiner::{DebouncedCombiner, DEFAULT_QUIET_PERIOD};
use crate::dispatcher::Dispatcher;
use crate::error::{RuleError, RuleResult};
use crate::predicate::PredicateChain;
use crate::rule::config_timer;

/// A device that must report a given status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRequirement {
    pub topic: Topic,
    pub status: Status,
}

/// Motion switch configuration
///
/// ```yaml
/// - rule: motion_switch
///   name: treppenhaus
///   motion: zigbee2mqtt/EG_Treppenhaus_Bewegung
///   requires:
///     - topic: stat/eg-treppenhaus/POWER
///       status: ON
///   target: cmnd/eg-treppenhaus/RuleTimer1
///   command: 240
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotionSwitchConfig {
    pub name: String,

    pub motion: Topic,

    #[serde(default)]
    pub requires: Vec<StatusRequirement>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub illuminance_below: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hours: Option<HourWindow>,

    #[serde(default = "default_quiet_period_ms")]
    pub quiet_period_ms: u64,

    pub target: Topic,

    pub command: Payload,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub off_after_ms: Option<u64>,

    #[serde(default = "default_off_command")]
    pub off_command: Payload,
}

fn default_quiet_period_ms() -> u64 {
    DEFAULT_QUIET_PERIOD.as_millis() as u64
}

fn default_off_command() -> Payload {
    Payload::from(Status::Off)
}

/// Settled inputs of one evaluation
#[derive(Debug, Clone)]
struct Snapshot {
    motion: Option<MotionReading>,
    statuses: Vec<Option<Status>>,
    hour: u32,
}

impl Snapshot {
    /// `combined[0]` is the sensor, the rest are status topics in order
    fn from_messages(combined: &[Message], hour: u32) -> Self {
        let motion = combined
            .first()
            .and_then(|m| m.payload.parse::<MotionReading>().ok());
        let statuses = combined
            .iter()
            .skip(1)
            .map(|m| Status::from_payload(&m.payload).ok())
            .collect();

        Self {
            motion,
            statuses,
            hour,
        }
    }
}

fn predicates(config: &MotionSwitchConfig) -> PredicateChain<Snapshot> {
    let mut chain = PredicateChain::new();

    if let Some(threshold) = config.illuminance_below {
        chain = chain.with("illuminance", move |s: &Snapshot| {
            s.motion.as_ref().is_some_and(|m| m.illuminance < threshold)
        });
    }

    chain = chain.with("occupancy", |s: &Snapshot| {
        s.motion.as_ref().is_some_and(|m| m.occupancy)
    });

    for (index, requirement) in config.requires.iter().enumerate() {
        let wanted = requirement.status;
        chain = chain.with(requirement.topic.to_string(), move |s: &Snapshot| {
            s.statuses.get(index).copied().flatten() == Some(wanted)
        });
    }

    if let Some(window) = config.hours {
        chain = chain.with("hours", move |s: &Snapshot| window.contains(s.hour));
    }

    chain
}

pub struct MotionSwitchRule {
    name: String,
    inputs: Vec<Subscription>,
    combiner: DebouncedCombiner,
    chain: PredicateChain<Snapshot>,
    sink: CommandSink,
    command: Payload,
    off_after: Option<Duration>,
    off_command: Payload,
    clock: SharedClock,
}

impl MotionSwitchRule {
    pub async fn build(config: MotionSwitchConfig, dispatcher: &mut Dispatcher) -> RuleResult<Self> {
        if config.off_after_ms == Some(0) {
            return Err(RuleError::InvalidConfig(format!(
                "{}: off_after_ms must be greater than zero",
                config.name
            )));
        }

        let quiet_period = config_timer(&config.name, "quiet_period_ms", config.quiet_period_ms)?;
        let off_after = config
            .off_after_ms
            .map(|ms| config_timer(&config.name, "off_after_ms", ms))
            .transpose()?;

        let mut inputs = Vec::with_capacity(config.requires.len() + 1);
        inputs.push(dispatcher.subscribe(&config.motion).await?);
        for requirement in &config.requires {
            inputs.push(dispatcher.subscribe(&requirement.topic).await?);
        }

        Ok(Self {
            chain: predicates(&config),
            inputs,
            combiner: DebouncedCombiner::new(quiet_period),
            sink: dispatcher.sink(&config.target),
            command: config.command,
            off_after,
            off_command: config.off_command,
            clock: dispatcher.clock(),
            name: config.name,
        })
    }

    pub async fn run(self) {
        let mut settled = self.combiner.combine(self.inputs);

        let off = sleep(Duration::ZERO);
        tokio::pin!(off);
        let mut off_pending = false;

        loop {
            tokio::select! {
                combined = settled.recv() => {
                    let Some(combined) = combined else { break };
                    let snapshot = Snapshot::from_messages(&combined, self.clock.local_hour());
                    if !self.chain.evaluate(&snapshot) {
                        continue;
                    }

                    info!(rule = %self.name, target = %self.sink.topic(), command = %self.command, "Motion switch: sending");
                    self.sink.send(self.command.clone());

                    if let Some(after) = self.off_after {
                        off.as_mut().reset(Instant::now() + after);
                        off_pending = true;
                    }
                }
                () = &mut off, if off_pending => {
                    off_pending = false;
                    info!(rule = %self.name, target = %self.sink.topic(), "Motion switch: off timer elapsed");
                    self.sink.send(self.off_command.clone());
                }
            }
        }

        debug!(rule = %self.name, "Motion switch inputs closed");
    }
}
