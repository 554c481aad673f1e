//! Debounced combination of several topics
//!
//! Keeps the latest message of every input and emits the whole combination
//! once no input has changed for the quiet period. Emission only starts once
//! every input has delivered at least one message. Continuous input defers
//! emission indefinitely; there is no maximum wait.

use ruler_bus::{merge, Subscription};
use ruler_core::Message;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};
use tracing::{debug, trace};

/// Quiet period used when none is configured
pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_secs(5);

/// Combines inputs and waits for them to settle
#[derive(Debug, Clone, Copy)]
pub struct DebouncedCombiner {
    quiet_period: Duration,
}

impl DebouncedCombiner {
    pub fn new(quiet_period: Duration) -> Self {
        Self { quiet_period }
    }

    pub fn quiet_period(&self) -> Duration {
        self.quiet_period
    }

    /// Start combining
    ///
    /// Each emitted vector holds one message per input, in input order.
    pub fn combine(self, inputs: Vec<Subscription>) -> mpsc::Receiver<Vec<Message>> {
        let (tx, rx) = mpsc::channel(16);
        let slots = inputs.len();
        let merged = merge(inputs);

        tokio::spawn(self.run(slots, merged, tx));
        rx
    }

    async fn run(
        self,
        slots: usize,
        mut merged: mpsc::Receiver<(usize, Message)>,
        tx: mpsc::Sender<Vec<Message>>,
    ) {
        let mut latest: Vec<Option<Message>> = vec![None; slots];
        let quiet = sleep(self.quiet_period);
        tokio::pin!(quiet);
        let mut pending = false;

        loop {
            tokio::select! {
                next = merged.recv() => {
                    let Some((index, message)) = next else {
                        debug!("Combiner inputs closed");
                        break;
                    };
                    trace!(index, topic = %message.topic, "Combiner input");
                    latest[index] = Some(message);

                    if latest.iter().all(Option::is_some) {
                        quiet.as_mut().reset(Instant::now() + self.quiet_period);
                        pending = true;
                    }
                }
                () = &mut quiet, if pending => {
                    pending = false;
                    let combined: Vec<Message> = latest.iter().flatten().cloned().collect();
                    debug!(inputs = combined.len(), "Inputs settled");
                    if tx.send(combined).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
}

impl Default for DebouncedCombiner {
    fn default() -> Self {
        Self::new(DEFAULT_QUIET_PERIOD)
    }
}
