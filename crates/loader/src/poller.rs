use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::ReadinessProbe;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollOutcome {
    Ready,
    TimedOut,
}

/// Fixed-cadence readiness check with a deadline measured from `start`.
#[derive(Clone, Copy, Debug)]
pub struct Poller {
    interval: Duration,
    timeout: Duration,
}

impl Poller {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    pub fn start(&self, probe: Arc<dyn ReadinessProbe>) -> PollHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let (tx, rx) = oneshot::channel();
        let interval = self.interval;
        let deadline = Instant::now() + self.timeout;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = ticker.tick() => {
                        if probe.is_ready() {
                            let _ = tx.send(PollOutcome::Ready);
                            return;
                        }
                        if Instant::now() >= deadline {
                            let _ = tx.send(PollOutcome::TimedOut);
                            return;
                        }
                    }
                }
            }
        });

        PollHandle { cancel, outcome: rx }
    }
}

/// Stops the poll loop on [`PollHandle::stop`] or drop.
pub struct PollHandle {
    cancel: CancellationToken,
    outcome: oneshot::Receiver<PollOutcome>,
}

impl PollHandle {
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// `None` once the loop was stopped without an outcome.
    pub async fn outcome(&mut self) -> Option<PollOutcome> {
        (&mut self.outcome).await.ok()
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
