//! One-shot broadcast readiness signal.
//!
//! The owning loader settles it exactly once; any number of listeners can
//! await the outcome, before or after it settles.

use tokio::sync::watch;

use crate::{LoadError, Result};

#[derive(Clone, Debug)]
enum Outcome {
    Pending,
    Ready,
    Failed(LoadError),
}

impl Outcome {
    fn settled(&self) -> Option<Result<()>> {
        match self {
            Outcome::Pending => None,
            Outcome::Ready => Some(Ok(())),
            Outcome::Failed(e) => Some(Err(e.clone())),
        }
    }
}

pub struct ReadySignal {
    tx: watch::Sender<Outcome>,
}

impl ReadySignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Outcome::Pending);
        Self { tx }
    }

    /// Returns false if the signal had already settled.
    pub fn resolve(&self) -> bool {
        self.settle(Outcome::Ready)
    }

    /// Returns false if the signal had already settled.
    pub fn reject(&self, error: LoadError) -> bool {
        self.settle(Outcome::Failed(error))
    }

    pub fn is_settled(&self) -> bool {
        self.peek().is_some()
    }

    pub fn peek(&self) -> Option<Result<()>> {
        self.tx.borrow().settled()
    }

    pub fn listener(&self) -> ReadyListener {
        ReadyListener { rx: self.tx.subscribe() }
    }

    fn settle(&self, outcome: Outcome) -> bool {
        self.tx.send_if_modified(|current| {
            if matches!(current, Outcome::Pending) {
                *current = outcome;
                true
            } else {
                false
            }
        })
    }
}

impl Default for ReadySignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Cloneable handle for awaiting a [`ReadySignal`].
#[derive(Clone)]
pub struct ReadyListener {
    rx: watch::Receiver<Outcome>,
}

impl ReadyListener {
    /// Waits until the signal settles. If the owning signal is dropped while
    /// still pending, waiters observe [`LoadError::Shutdown`].
    pub async fn wait(&self) -> Result<()> {
        let mut rx = self.rx.clone();
        let settled = match rx.wait_for(|o| !matches!(o, Outcome::Pending)).await {
            Ok(outcome) => outcome.settled(),
            Err(_) => None,
        };
        settled.unwrap_or(Err(LoadError::Shutdown))
    }

    pub fn peek(&self) -> Option<Result<()>> {
        self.rx.borrow().settled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolves_every_listener() {
        let signal = ReadySignal::new();
        let a = signal.listener();
        let b = signal.listener();

        let wa = tokio::spawn(async move { a.wait().await });
        let wb = tokio::spawn(async move { b.wait().await });
        tokio::task::yield_now().await;

        assert!(signal.resolve());
        assert_eq!(wa.await.unwrap(), Ok(()));
        assert_eq!(wb.await.unwrap(), Ok(()));

        // late listeners see the settled value
        assert_eq!(signal.listener().wait().await, Ok(()));
    }

    #[tokio::test]
    async fn test_settles_only_once() {
        let signal = ReadySignal::new();
        assert!(signal.reject(LoadError::Timeout { timeout_ms: 5 }));
        assert!(!signal.resolve());
        assert!(!signal.reject(LoadError::Shutdown));

        let res = signal.listener().wait().await;
        assert_eq!(res, Err(LoadError::Timeout { timeout_ms: 5 }));
    }

    #[tokio::test]
    async fn test_dropped_signal_does_not_hang_waiters() {
        let signal = ReadySignal::new();
        let listener = signal.listener();
        drop(signal);
        assert_eq!(listener.wait().await, Err(LoadError::Shutdown));
    }
}
