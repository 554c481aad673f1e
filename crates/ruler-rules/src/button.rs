//! Button rules: map click kinds to actions

use ruler_core::{ButtonPress, Topic};
use ruler_bus::Subscription;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::dispatcher::Dispatcher;
use crate::error::RuleResult;
use crate::rule::{Action, BoundAction};

/// Button rule configuration
///
/// ```yaml
/// - rule: button
///   name: kellerabgang
///   source: zigbee2mqtt/Kellerabgang_Button
///   clicks:
///     single:
///       - topic: cmnd/keller-licht/POWER
///         command: TOGGLE
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ButtonConfig {
    pub name: String,
    pub source: Topic,
    pub clicks: HashMap<String, Vec<Action>>,
}

pub struct ButtonRule {
    name: String,
    presses: Subscription,
    clicks: HashMap<String, Vec<BoundAction>>,
}

impl ButtonRule {
    pub async fn build(config: ButtonConfig, dispatcher: &mut Dispatcher) -> RuleResult<Self> {
        let presses = dispatcher.subscribe(&config.source).await?;
        let clicks = config
            .clicks
            .into_iter()
            .map(|(click, actions)| (click, BoundAction::bind_all(actions, dispatcher)))
            .collect();

        Ok(Self {
            name: config.name,
            presses,
            clicks,
        })
    }

    pub async fn run(mut self) {
        while let Some(message) = self.presses.recv().await {
            // Buttons also report battery and link quality without a click
            let press = match message.payload.parse::<ButtonPress>() {
                Ok(press) => press,
                Err(e) => {
                    debug!(rule = %self.name, error = %e, "Not a click");
                    continue;
                }
            };

            match self.clicks.get(&press.click) {
                Some(actions) => {
                    info!(rule = %self.name, click = %press.click, "Button pressed");
                    for action in actions {
                        action.fire();
                    }
                }
                None => debug!(rule = %self.name, click = %press.click, "Unmapped click"),
            }
        }
    }
}
