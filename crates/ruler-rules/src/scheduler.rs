//! Jittered hour-of-day scheduler
//!
//! A fixed-period ticker checks the local hour. The first matching tick of a
//! run arms a one-shot delay drawn uniformly from `[0, jitter_ceiling]`, and
//! the action fires once when it elapses. Further matching ticks in the same
//! run do nothing; the scheduler re-arms only after the hour stops matching
//! and then matches again. Missed ticks are not caught up.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use ruler_core::SharedClock;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::dispatcher::Dispatcher;
use crate::error::{RuleError, RuleResult};
use crate::rule::{config_timer, Action, BoundAction};

/// Ticker period used when none is configured
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(60);

/// Upper bound of the random delay used when none is configured
pub const DEFAULT_JITTER_CEILING: Duration = Duration::from_secs(600);

/// Edge detector over consecutive tick results
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArmState {
    matching: bool,
}

impl ArmState {
    /// Feed one tick; true only for the first match of a run
    pub fn observe(&mut self, matches: bool) -> bool {
        let first = matches && !self.matching;
        self.matching = matches;
        first
    }
}

pub struct JitteredScheduler {
    hours: Vec<u32>,
    period: Duration,
    jitter_ceiling: Duration,
    rng: StdRng,
}

impl JitteredScheduler {
    pub fn new(hours: Vec<u32>, period: Duration, jitter_ceiling: Duration) -> Self {
        Self {
            hours,
            period,
            jitter_ceiling,
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic variant for tests
    pub fn with_seed(hours: Vec<u32>, period: Duration, jitter_ceiling: Duration, seed: u64) -> Self {
        Self {
            hours,
            period,
            jitter_ceiling,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn matches(&self, hour: u32) -> bool {
        self.hours.contains(&hour)
    }

    /// Draw the next random delay
    pub fn next_delay(&mut self) -> Duration {
        let ceiling = u64::try_from(self.jitter_ceiling.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(self.rng.gen_range(0..=ceiling))
    }

    /// Tick forever, calling `action` once per matching run
    pub async fn run<F>(mut self, clock: SharedClock, mut action: F)
    where
        F: FnMut() + Send,
    {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut arm = ArmState::default();
        let fire = sleep(Duration::ZERO);
        tokio::pin!(fire);
        let mut armed = false;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let hour = clock.local_hour();
                    if !arm.observe(self.matches(hour)) {
                        continue;
                    }
                    if armed {
                        debug!(hour, "Previous trigger still pending, not re-arming");
                        continue;
                    }

                    let delay = self.next_delay();
                    info!(hour, delay_ms = delay.as_millis() as u64, "Scheduler armed");
                    fire.as_mut().reset(Instant::now() + delay);
                    armed = true;
                }
                () = &mut fire, if armed => {
                    armed = false;
                    action();
                }
            }
        }
    }
}

/// Schedule rule configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub name: String,

    /// Local hours (0-23) at which the actions fire
    pub hours: Vec<u32>,

    pub actions: Vec<Action>,

    #[serde(default = "default_period_ms")]
    pub period_ms: u64,

    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

fn default_period_ms() -> u64 {
    DEFAULT_PERIOD.as_millis() as u64
}

fn default_jitter_ms() -> u64 {
    DEFAULT_JITTER_CEILING.as_millis() as u64
}

/// A running schedule
pub struct ScheduleRule {
    name: String,
    scheduler: JitteredScheduler,
    actions: Vec<BoundAction>,
    clock: SharedClock,
}

impl ScheduleRule {
    pub async fn build(config: ScheduleConfig, dispatcher: &mut Dispatcher) -> RuleResult<Self> {
        if config.hours.is_empty() || config.hours.iter().any(|&h| h > 23) {
            return Err(RuleError::InvalidConfig(format!(
                "{}: hours must be a non-empty list within 0-23",
                config.name
            )));
        }
        if config.period_ms == 0 {
            return Err(RuleError::InvalidConfig(format!(
                "{}: period_ms must be greater than zero",
                config.name
            )));
        }

        let period = config_timer(&config.name, "period_ms", config.period_ms)?;
        let jitter = config_timer(&config.name, "jitter_ms", config.jitter_ms)?;

        Ok(Self {
            scheduler: JitteredScheduler::new(config.hours, period, jitter),
            actions: BoundAction::bind_all(config.actions, dispatcher),
            clock: dispatcher.clock(),
            name: config.name,
        })
    }

    pub async fn run(self) {
        let name = self.name;
        let actions = self.actions;
        self.scheduler
            .run(self.clock, move || {
                info!(rule = %name, actions = actions.len(), "Schedule fired");
                for action in &actions {
                    action.fire();
                }
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ruler_core::MockClock;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    #[test]
    fn test_arm_state_fires_once_per_run() {
        let mut arm = ArmState::default();
        let fired: Vec<bool> = [false, true, true, true, false, false, true, true]
            .into_iter()
            .map(|m| arm.observe(m))
            .collect();
        assert_eq!(
            fired,
            vec![false, true, false, false, false, false, true, false]
        );
    }

    #[test]
    fn test_delay_within_ceiling() {
        let mut scheduler = JitteredScheduler::with_seed(vec![23], DEFAULT_PERIOD, DEFAULT_JITTER_CEILING, 7);
        for _ in 0..100 {
            assert!(scheduler.next_delay() <= DEFAULT_JITTER_CEILING);
        }

        let mut zero = JitteredScheduler::with_seed(vec![23], DEFAULT_PERIOD, Duration::ZERO, 7);
        assert_eq!(zero.next_delay(), Duration::ZERO);
    }

    fn spawn_scheduler(origin: &str) -> mpsc::UnboundedReceiver<chrono::DateTime<chrono::Utc>> {
        let clock: SharedClock = Arc::new(MockClock::parse(origin).unwrap());
        let scheduler = JitteredScheduler::with_seed(vec![23], DEFAULT_PERIOD, DEFAULT_JITTER_CEILING, 42);
        let (tx, rx) = mpsc::unbounded_channel();

        let action_clock = clock.clone();
        tokio::spawn(scheduler.run(clock, move || {
            let _ = tx.send(action_clock.now());
        }));
        rx
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_fire_per_matching_hour() {
        let mut fired = spawn_scheduler("2024-01-01T22:30:00Z");

        sleep(Duration::from_secs(2 * 3600)).await;
        let first = fired.try_recv().unwrap();
        assert!(fired.try_recv().is_err(), "fired more than once in one hour");

        let start = chrono::DateTime::parse_from_rfc3339("2024-01-01T23:00:00Z").unwrap();
        let latest = chrono::DateTime::parse_from_rfc3339("2024-01-01T23:11:00Z").unwrap();
        assert!(first >= start && first <= latest);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearms_after_hour_leaves_and_returns() {
        let mut fired = spawn_scheduler("2024-01-01T22:30:00Z");

        sleep(Duration::from_secs(26 * 3600)).await;
        assert!(fired.try_recv().is_ok());
        assert!(fired.try_recv().is_ok());
        assert!(fired.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_outside_hours_never_fires() {
        let mut fired = spawn_scheduler("2024-01-01T08:00:00Z");

        sleep(Duration::from_secs(10 * 3600)).await;
        assert!(fired.try_recv().is_err());
    }
}
