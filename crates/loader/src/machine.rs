//! Library load state machine.
//!
//! idle -> loading -> ready | error. Failed attempts (script error or poll
//! deadline) stay in loading and are retried with backoff until
//! `max_retries` attempts have been made.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    LoadError, LoadStatus, PollOutcome, Poller, ReadinessProbe, ReadyListener, ReadySignal,
    Result, RetryPolicy, ScriptHost, ScriptId, ScriptSpec,
};

pub const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_millis(60_000);
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

pub type ErrorCallback = Arc<dyn Fn(&LoadError) + Send + Sync>;

#[derive(Clone, Debug)]
pub struct LoaderConfig {
    /// Label used in logs.
    pub name: String,
    pub module_url: String,
    pub global_name: String,
    /// Names imported by the injected module.
    pub entry_points: Vec<String>,
    pub load_timeout: Duration,
    pub max_retries: u32,
    pub poll_interval: Duration,
    pub retry: RetryPolicy,
    pub nonce: Option<String>,
}

impl LoaderConfig {
    pub fn new(name: &str, module_url: &str, global_name: &str, entry_point: &str) -> Self {
        Self {
            name: name.to_string(),
            module_url: module_url.to_string(),
            global_name: global_name.to_string(),
            entry_points: vec![entry_point.to_string()],
            load_timeout: DEFAULT_LOAD_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            poll_interval: POLL_INTERVAL,
            retry: RetryPolicy::default(),
            nonce: None,
        }
    }

    pub fn with_entry_point(mut self, name: &str) -> Self {
        self.entry_points.push(name.to_string());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.load_timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_nonce(mut self, nonce: Option<String>) -> Self {
        self.nonce = nonce;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn script(&self) -> ScriptSpec {
        ScriptSpec {
            id: ScriptId::next(),
            module_url: self.module_url.clone(),
            global_name: self.global_name.clone(),
            entry_points: self.entry_points.clone(),
            nonce: self.nonce.clone(),
        }
    }
}

#[derive(Default)]
struct Control {
    started: bool,
    attempts: u32,
    script: Option<ScriptId>,
    last_error: Option<LoadError>,
}

enum Attempt {
    Ready,
    Failed(LoadError),
    Cancelled,
}

struct Inner {
    config: LoaderConfig,
    host: Arc<dyn ScriptHost>,
    probe: Arc<dyn ReadinessProbe>,
    status: watch::Sender<LoadStatus>,
    signal: ReadySignal,
    on_error: Option<ErrorCallback>,
    control: Mutex<Control>,
    shutdown: CancellationToken,
}

/// Loads one runtime. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct LibraryLoader {
    inner: Arc<Inner>,
}

impl LibraryLoader {
    pub fn new(
        config: LoaderConfig,
        host: Arc<dyn ScriptHost>,
        probe: Arc<dyn ReadinessProbe>,
        on_error: Option<ErrorCallback>,
    ) -> Self {
        let (status, _) = watch::channel(LoadStatus::Idle);
        Self {
            inner: Arc::new(Inner {
                config,
                host,
                probe,
                status,
                signal: ReadySignal::new(),
                on_error,
                control: Mutex::new(Control::default()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Starts loading if the loader is idle; no-op otherwise.
    pub fn try_load(&self) {
        {
            let mut ctl = self.inner.control.lock();
            if ctl.started || *self.inner.status.borrow() != LoadStatus::Idle {
                debug!(runtime=%self.inner.config.name, "load already triggered");
                return;
            }
            ctl.started = true;
            self.inner.status.send_replace(LoadStatus::Loading);
        }

        let inner = self.inner.clone();
        tokio::spawn(async move { inner.run().await });
    }

    /// Stops polling and pending retries and removes the injected script.
    /// Waiters on an unsettled signal observe [`LoadError::Shutdown`], and
    /// the loader ends in `Error` with `Shutdown` as its last error.
    pub fn shutdown(&self) {
        let rejected = {
            let mut control = self.inner.control.lock();
            self.inner.shutdown.cancel();
            let rejected = self.inner.signal.reject(LoadError::Shutdown);
            if rejected {
                control.last_error = Some(LoadError::Shutdown);
                self.inner.status.send_replace(LoadStatus::Error);
            }
            rejected
        };
        self.inner.remove_script();
        if rejected {
            info!(runtime=%self.inner.config.name, "loader shut down before settling");
        }
    }

    pub fn status(&self) -> LoadStatus {
        *self.inner.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LoadStatus> {
        self.inner.status.subscribe()
    }

    pub fn ready(&self) -> ReadyListener {
        self.inner.signal.listener()
    }

    pub async fn wait_ready(&self) -> Result<()> {
        self.inner.signal.listener().wait().await
    }

    pub fn attempts(&self) -> u32 {
        self.inner.control.lock().attempts
    }

    pub fn last_error(&self) -> Option<LoadError> {
        self.inner.control.lock().last_error.clone()
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.inner.config
    }
}

impl Inner {
    async fn run(self: Arc<Self>) {
        // Runtime may already be present from an earlier mount.
        if self.probe.is_ready() {
            self.mark_ready();
            return;
        }

        loop {
            let failure = match self.attempt().await {
                Attempt::Ready => {
                    self.mark_ready();
                    return;
                }
                Attempt::Cancelled => return,
                Attempt::Failed(e) => e,
            };

            let attempts = {
                let mut ctl = self.control.lock();
                if self.shutdown.is_cancelled() {
                    return;
                }
                ctl.attempts += 1;
                ctl.last_error = Some(failure.clone());
                ctl.attempts
            };

            if attempts >= self.config.max_retries {
                self.mark_failed(LoadError::Exhausted {
                    attempts,
                    last: Box::new(failure),
                });
                return;
            }

            let delay = self.config.retry.delay(attempts);
            warn!(
                runtime=%self.config.name,
                attempt=attempts,
                delay_ms=delay.as_millis() as u64,
                error=%failure,
                "runtime load failed, retrying"
            );

            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn attempt(&self) -> Attempt {
        let spec = self.config.script();
        let script = match self.host.inject(&spec) {
            Ok(s) => s,
            Err(e) => return Attempt::Failed(e),
        };
        self.control.lock().script = Some(script.id);
        info!(
            runtime=%self.config.name,
            url=%spec.module_url,
            script=%script.id,
            "injected runtime script"
        );

        let mut poll = Poller::new(self.config.poll_interval, self.config.load_timeout)
            .start(self.probe.clone());
        let mut errors = script.errors;
        let mut errors_open = true;

        let outcome = loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break Attempt::Cancelled,
                res = &mut errors, if errors_open => match res {
                    Ok(message) => break Attempt::Failed(LoadError::Injection {
                        url: spec.module_url.clone(),
                        message,
                    }),
                    Err(_) => errors_open = false,
                },
                out = poll.outcome() => match out {
                    Some(PollOutcome::Ready) => break Attempt::Ready,
                    Some(PollOutcome::TimedOut) => break Attempt::Failed(LoadError::Timeout {
                        timeout_ms: self.config.load_timeout.as_millis() as u64,
                    }),
                    None => break Attempt::Cancelled,
                },
            }
        };

        poll.stop();
        self.remove_script();
        outcome
    }

    fn remove_script(&self) {
        if let Some(id) = self.control.lock().script.take() {
            self.host.remove(id);
        }
    }

    // Both marks take the control lock so they cannot interleave with
    // shutdown; once shut down the status is final.
    fn mark_ready(&self) {
        let resolved = {
            let _control = self.control.lock();
            if self.shutdown.is_cancelled() {
                return;
            }
            self.status.send_replace(LoadStatus::Ready);
            self.signal.resolve()
        };
        if resolved {
            info!(runtime=%self.config.name, "runtime ready");
        }
    }

    fn mark_failed(&self, e: LoadError) {
        let rejected = {
            let mut control = self.control.lock();
            if self.shutdown.is_cancelled() {
                return;
            }
            control.last_error = Some(e.clone());
            self.status.send_replace(LoadStatus::Error);
            self.signal.reject(e.clone())
        };
        if rejected {
            error!(runtime=%self.config.name, error=%e, "runtime failed to load");
            if let Some(cb) = &self.on_error {
                cb(&e);
            }
        }
    }
}
