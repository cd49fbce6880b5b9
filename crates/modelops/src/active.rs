//! Engine session manager: owns at most one live LLM engine.

use std::sync::Arc;

use futures::StreamExt;
use loader::{LibraryLoader, LoadStatus, ReadyListener};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{ModelError, Result};
use crate::runtime::{Engine, LlmRuntime, ProgressCallback, RuntimeProvider};
use crate::schema::{
    ChatCompletion, ChatMessage, ChatOptions, ChatRequest, LoadProgress, ModelStatus,
};

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SessionState {
    pub status: ModelStatus,
    pub model_id: Option<String>,
    pub progress: Option<LoadProgress>,
    pub error: Option<String>,
}

pub struct EngineSession {
    pub model_id: String,
    engine: Arc<dyn Engine>,
}

pub(crate) struct SessionInner {
    library: watch::Receiver<LoadStatus>,
    ready: ReadyListener,
    pub(crate) provider: Arc<dyn RuntimeProvider<dyn LlmRuntime>>,
    // Held across teardown and creation so two engines never coexist.
    switch: tokio::sync::Mutex<()>,
    // Emptied before teardown starts; readers never wait on a switch.
    active: Mutex<Option<EngineSession>>,
    state: watch::Sender<SessionState>,
    on_progress: Option<ProgressCallback>,
}

#[derive(Clone)]
pub struct EngineSessionManager {
    pub(crate) inner: Arc<SessionInner>,
}

impl EngineSessionManager {
    pub fn new(
        library: &LibraryLoader,
        provider: Arc<dyn RuntimeProvider<dyn LlmRuntime>>,
        on_progress: Option<ProgressCallback>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::default());
        Self {
            inner: Arc::new(SessionInner {
                library: library.subscribe(),
                ready: library.ready(),
                provider,
                switch: tokio::sync::Mutex::new(()),
                active: Mutex::new(None),
                state,
                on_progress,
            }),
        }
    }

    /// Loads `model_id`, disposing of any session for a different model
    /// first. Failures are returned as-is; there is no retry at this layer.
    pub async fn load_model(
        &self,
        model_id: &str,
        on_progress: Option<ProgressCallback>,
    ) -> Result<()> {
        if *self.inner.library.borrow() != LoadStatus::Ready {
            return Err(ModelError::LibraryNotReady);
        }
        let runtime = self.inner.provider.runtime().ok_or(ModelError::LibraryNotReady)?;

        let _switch = self.inner.switch.lock().await;
        let previous = {
            let mut active = self.inner.active.lock();
            if active.as_ref().is_some_and(|s| s.model_id == model_id) {
                debug!(model_id, "engine already loaded");
                return Ok(());
            }
            active.take()
        };
        if let Some(previous) = previous {
            info!(from=%previous.model_id, to=%model_id, "replacing engine session");
            if let Err(e) = previous.engine.unload().await {
                warn!(model_id=%previous.model_id, error=%e, "engine unload failed");
            }
        }

        self.inner.state.send_replace(SessionState {
            status: ModelStatus::Loading,
            model_id: Some(model_id.to_string()),
            progress: Some(LoadProgress::default()),
            error: None,
        });

        let sink = self.progress_sink(on_progress);
        match runtime.create_engine(model_id, sink).await {
            Ok(engine) => {
                *self.inner.active.lock() =
                    Some(EngineSession { model_id: model_id.to_string(), engine });
                self.inner.state.send_modify(|s| {
                    s.status = ModelStatus::Ready;
                    s.progress = Some(LoadProgress { progress: 1.0, text: "ready".into() });
                });
                info!(model_id, "engine ready");
                Ok(())
            }
            Err(e) => {
                let err = ModelError::Engine(format!("{e:#}"));
                self.inner.state.send_replace(SessionState {
                    status: ModelStatus::Error,
                    model_id: None,
                    progress: None,
                    error: Some(err.to_string()),
                });
                warn!(model_id, error=%err, "engine load failed");
                Err(err)
            }
        }
    }

    pub async fn chat_completion(
        &self,
        messages: Vec<ChatMessage>,
        options: ChatOptions,
    ) -> Result<ChatCompletion> {
        let engine = self.engine()?;
        self.inner.ready.wait().await?;
        engine
            .chat_completion(ChatRequest::new(messages, options))
            .await
            .map_err(|e| ModelError::Inference(format!("{e:#}")))
    }

    /// Streams a completion, calling `on_chunk` for every non-empty delta in
    /// emission order. Returns the concatenated text.
    pub async fn stream_chat_completion<F>(
        &self,
        messages: Vec<ChatMessage>,
        mut on_chunk: F,
        options: ChatOptions,
    ) -> Result<String>
    where
        F: FnMut(&str) + Send,
    {
        let engine = self.engine()?;
        self.inner.ready.wait().await?;
        let mut stream = engine
            .chat_completion_stream(ChatRequest::streaming(messages, options))
            .await
            .map_err(|e| ModelError::Inference(format!("{e:#}")))?;

        let mut text = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| ModelError::Inference(format!("{e:#}")))?;
            match chunk.content() {
                Some(content) if !content.is_empty() => {
                    on_chunk(content);
                    text.push_str(content);
                }
                _ => {}
            }
        }
        Ok(text)
    }

    /// Disposes of the active session, if any, and resets to idle. The
    /// state is reset even with no session, which clears a load that was
    /// cancelled part way.
    pub async fn unload(&self) {
        let _switch = self.inner.switch.lock().await;
        let previous = self.inner.active.lock().take();
        if let Some(previous) = previous {
            if let Err(e) = previous.engine.unload().await {
                warn!(model_id=%previous.model_id, error=%e, "engine unload failed");
            }
            info!(model_id=%previous.model_id, "engine unloaded");
        }
        self.inner.state.send_replace(SessionState::default());
    }

    pub fn state(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Model id of the live engine. `None` while a switch is tearing down
    /// or creating.
    pub fn active_model(&self) -> Option<String> {
        self.inner.active.lock().as_ref().map(|s| s.model_id.clone())
    }

    fn engine(&self) -> Result<Arc<dyn Engine>> {
        self.inner
            .active
            .lock()
            .as_ref()
            .map(|s| s.engine.clone())
            .ok_or(ModelError::NoSession)
    }

    /// Clamps to [0, 1], never lets progress go backwards, and fans out to
    /// the per-call and configured observers.
    fn progress_sink(&self, per_call: Option<ProgressCallback>) -> ProgressCallback {
        let inner = self.inner.clone();
        let high_water = Mutex::new(0.0_f64);
        Arc::new(move |p: &LoadProgress| {
            let progress = {
                let mut hw = high_water.lock();
                *hw = hw.max(p.progress.clamp(0.0, 1.0));
                *hw
            };
            let report = LoadProgress { progress, text: p.text.clone() };
            inner.state.send_modify(|s| s.progress = Some(report.clone()));
            if let Some(cb) = &per_call {
                cb(&report);
            }
            if let Some(cb) = &inner.on_progress {
                cb(&report);
            }
        })
    }
}
