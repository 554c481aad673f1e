//! Rule definitions
//!
//! A rule is configuration. [`RuleConfig`] is the tagged union of every rule
//! kind the engine knows; [`RuleConfig::start`] wires one onto the bus and
//! spawns its task.

use ruler_bus::CommandSink;
use ruler_core::{Payload, Topic};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::button::{ButtonConfig, ButtonRule};
use crate::deadline::{NightlightConfig, NightlightRule};
use crate::dispatcher::Dispatcher;
use crate::error::{RuleError, RuleResult};
use crate::interlock::{Interlock, InterlockConfig};
use crate::motion::{MotionSwitchConfig, MotionSwitchRule};
use crate::scheduler::{ScheduleConfig, ScheduleRule};

/// Longest delay any configured rule timer may have
pub const MAX_TIMER: Duration = Duration::from_secs(7 * 24 * 3600);

/// A millisecond timer from configuration, bounded by [`MAX_TIMER`]
pub(crate) fn config_timer(rule: &str, field: &str, ms: u64) -> RuleResult<Duration> {
    let timer = Duration::from_millis(ms);
    if timer > MAX_TIMER {
        return Err(RuleError::InvalidConfig(format!(
            "{rule}: {field} must not exceed {} ms",
            MAX_TIMER.as_millis()
        )));
    }
    Ok(timer)
}

/// Send `command` to `topic`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub topic: Topic,
    pub command: Payload,
}

/// An action resolved to its command sink
#[derive(Clone)]
pub(crate) struct BoundAction {
    sink: CommandSink,
    command: Payload,
}

impl BoundAction {
    pub(crate) fn bind(action: Action, dispatcher: &mut Dispatcher) -> Self {
        Self {
            sink: dispatcher.sink(&action.topic),
            command: action.command,
        }
    }

    pub(crate) fn bind_all(actions: Vec<Action>, dispatcher: &mut Dispatcher) -> Vec<Self> {
        actions
            .into_iter()
            .map(|action| Self::bind(action, dispatcher))
            .collect()
    }

    pub(crate) fn fire(&self) {
        debug!(topic = %self.sink.topic(), command = %self.command, "Firing action");
        self.sink.send(self.command.clone());
    }
}

/// A rule definition
///
/// ```yaml
/// - rule: interlock
///   name: eg-kueche
///   circuits:
///     - name: licht
///       status: stat/eg-kueche-licht/POWER
///       command: cmnd/eg-kueche-licht/POWER
///     - name: steckdose
///       status: stat/eg-kueche-steckdose/POWER
///       command: cmnd/eg-kueche-steckdose/POWER
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum RuleConfig {
    Button(ButtonConfig),
    MotionSwitch(MotionSwitchConfig),
    Nightlight(NightlightConfig),
    Interlock(InterlockConfig),
    Schedule(ScheduleConfig),
}

impl RuleConfig {
    pub fn name(&self) -> &str {
        match self {
            RuleConfig::Button(c) => &c.name,
            RuleConfig::MotionSwitch(c) => &c.name,
            RuleConfig::Nightlight(c) => &c.name,
            RuleConfig::Interlock(c) => &c.name,
            RuleConfig::Schedule(c) => &c.name,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RuleConfig::Button(_) => "button",
            RuleConfig::MotionSwitch(_) => "motion_switch",
            RuleConfig::Nightlight(_) => "nightlight",
            RuleConfig::Interlock(_) => "interlock",
            RuleConfig::Schedule(_) => "schedule",
        }
    }

    /// Subscribe the rule's inputs, bind its outputs and spawn it
    pub async fn start(self, dispatcher: &mut Dispatcher) -> RuleResult<JoinHandle<()>> {
        let handle = match self {
            RuleConfig::Button(config) => {
                let rule = ButtonRule::build(config, dispatcher).await?;
                tokio::spawn(rule.run())
            }
            RuleConfig::MotionSwitch(config) => {
                let rule = MotionSwitchRule::build(config, dispatcher).await?;
                tokio::spawn(rule.run())
            }
            RuleConfig::Nightlight(config) => {
                let rule = NightlightRule::build(config, dispatcher).await?;
                tokio::spawn(rule.run())
            }
            RuleConfig::Interlock(config) => {
                let rule = Interlock::build(config, dispatcher).await?;
                tokio::spawn(rule.run(dispatcher.clock()))
            }
            RuleConfig::Schedule(config) => {
                let rule = ScheduleRule::build(config, dispatcher).await?;
                tokio::spawn(rule.run())
            }
        };
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_action_command_forms() {
        let text: Action = serde_json::from_value(json!({
            "topic": "cmnd/og-flur/POWER",
            "command": "TOGGLE"
        }))
        .unwrap();
        assert_eq!(text.command, Payload::from("TOGGLE"));

        let structured: Action = serde_json::from_value(json!({
            "topic": "zigbee2mqtt/OG_Bad_Licht/set",
            "command": {"state": "ON", "brightness": 40}
        }))
        .unwrap();
        assert_eq!(structured.command.as_structured().unwrap()["brightness"], 40);
    }

    #[test]
    fn test_rule_tag_selects_kind() {
        let rule: RuleConfig = serde_json::from_value(json!({
            "rule": "schedule",
            "name": "all-off",
            "hours": [23, 9],
            "actions": [{"topic": "cmnd/tasmotas/POWER", "command": "OFF"}]
        }))
        .unwrap();

        assert_eq!(rule.kind(), "schedule");
        assert_eq!(rule.name(), "all-off");
        let RuleConfig::Schedule(schedule) = rule else {
            panic!("expected a schedule");
        };
        assert_eq!(schedule.period_ms, 60_000);
        assert_eq!(schedule.jitter_ms, 600_000);
    }

    #[test]
    fn test_config_timer_bounds() {
        assert_eq!(config_timer("r", "jitter_ms", 0).unwrap(), Duration::ZERO);
        assert_eq!(
            config_timer("r", "jitter_ms", MAX_TIMER.as_millis() as u64).unwrap(),
            MAX_TIMER
        );
        assert!(matches!(
            config_timer("r", "jitter_ms", u64::MAX),
            Err(RuleError::InvalidConfig(msg)) if msg.contains("jitter_ms")
        ));
    }

    #[test]
    fn test_unknown_rule_kind_is_rejected() {
        let result: Result<RuleConfig, _> =
            serde_json::from_value(json!({"rule": "teleport", "name": "x"}));
        assert!(result.is_err());
    }
}
