//! Mock runtimes shared by the modelops integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use loader::{GlobalNamespace, ReadySignal};
use modelops::{
    publish_transformers, publish_webllm, ChatChoice, ChatChunk, ChatCompletion, ChatMessage,
    ChatRequest, Engine, LlmRuntime, LoadProgress, ModelCache, NamespaceRuntime, Pipeline,
    PipelineInput, PrebuiltModel, ProgressCallback, TransformersRuntime,
};
use parking_lot::Mutex;
use serde_json::Value;

// ---------------- transformer runtime ---------------- //

pub struct MockPipeline {
    pub model_id: String,
    output: Value,
    disposed: Arc<AtomicUsize>,
    pub inputs: Mutex<Vec<PipelineInput>>,
}

#[async_trait]
impl Pipeline for MockPipeline {
    async fn run(&self, input: PipelineInput, _options: Value) -> anyhow::Result<Value> {
        self.inputs.lock().push(input);
        Ok(self.output.clone())
    }

    async fn dispose(&self) -> anyhow::Result<()> {
        self.disposed.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("dispose errors are swallowed")
    }
}

pub struct MockTransformers {
    pub calls: Mutex<Vec<(String, String)>>,
    failures_left: AtomicUsize,
    delay: Duration,
    output: Value,
    pub disposed: Arc<AtomicUsize>,
}

impl MockTransformers {
    pub fn new(output: Value) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failures_left: AtomicUsize::new(0),
            delay: Duration::from_millis(100),
            output,
            disposed: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing(self, times: usize) -> Self {
        self.failures_left.store(times, Ordering::SeqCst);
        self
    }

    pub fn calls_for(&self, model_id: &str) -> usize {
        self.calls.lock().iter().filter(|(_, m)| m == model_id).count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl TransformersRuntime for MockTransformers {
    async fn pipeline(&self, task: &str, model_id: &str) -> anyhow::Result<Arc<dyn Pipeline>> {
        self.calls.lock().push((task.to_string(), model_id.to_string()));
        tokio::time::sleep(self.delay).await;
        let fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            anyhow::bail!("could not fetch weights for {model_id}");
        }
        Ok(Arc::new(MockPipeline {
            model_id: model_id.to_string(),
            output: self.output.clone(),
            disposed: self.disposed.clone(),
            inputs: Mutex::new(Vec::new()),
        }))
    }
}

/// Cache over `runtime`, plus the signal that gates it.
pub fn cache_with(runtime: Arc<MockTransformers>, retries: u32) -> (ModelCache, ReadySignal) {
    let ns = GlobalNamespace::new();
    publish_transformers(&ns, runtime);
    let signal = ReadySignal::new();
    let cache = ModelCache::new(
        signal.listener(),
        Arc::new(NamespaceRuntime::<dyn TransformersRuntime>::transformers(ns)),
        retries,
        None,
    );
    (cache, signal)
}

// ---------------- LLM runtime ---------------- //

/// Ordered record of engine lifecycle events, shared by all mock engines.
pub type EventLog = Arc<Mutex<Vec<String>>>;

pub struct MockEngine {
    model_id: String,
    events: EventLog,
    live: Arc<AtomicUsize>,
    chunks: Vec<&'static str>,
}

#[async_trait]
impl Engine for MockEngine {
    async fn chat_completion(&self, request: ChatRequest) -> anyhow::Result<ChatCompletion> {
        let last = request.messages.last().map(|m| m.content.clone()).unwrap_or_default();
        Ok(ChatCompletion {
            choices: vec![ChatChoice {
                message: ChatMessage::assistant(format!("{}: {last}", self.model_id)),
                finish_reason: Some("stop".into()),
            }],
            usage: None,
        })
    }

    async fn chat_completion_stream(
        &self,
        request: ChatRequest,
    ) -> anyhow::Result<BoxStream<'static, anyhow::Result<ChatChunk>>> {
        anyhow::ensure!(request.stream, "stream flag not set");
        let mut chunks: Vec<ChatChunk> = Vec::new();
        chunks.push(ChatChunk { choices: vec![] });
        for c in &self.chunks {
            chunks.push(ChatChunk::text(c));
            chunks.push(ChatChunk::text(""));
        }
        Ok(stream::iter(chunks)
            .then(|c| async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok::<_, anyhow::Error>(c)
            })
            .boxed())
    }

    async fn unload(&self) -> anyhow::Result<()> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.live.fetch_sub(1, Ordering::SeqCst);
        self.events.lock().push(format!("unload {}", self.model_id));
        Ok(())
    }
}

pub struct MockLlm {
    pub events: EventLog,
    pub live: Arc<AtomicUsize>,
    pub max_live: AtomicUsize,
    pub creates: AtomicUsize,
    pub fail_models: Vec<String>,
    pub catalog: Option<Vec<PrebuiltModel>>,
    pub cached: Option<Vec<String>>,
    pub chunks: Vec<&'static str>,
    pub progress_steps: Vec<f64>,
}

impl Default for MockLlm {
    fn default() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            live: Arc::new(AtomicUsize::new(0)),
            max_live: AtomicUsize::new(0),
            creates: AtomicUsize::new(0),
            fail_models: Vec::new(),
            catalog: None,
            cached: None,
            chunks: vec!["Hello", " there", "!"],
            progress_steps: vec![0.1, 0.5, 0.3, 1.0],
        }
    }
}

#[async_trait]
impl LlmRuntime for MockLlm {
    async fn create_engine(
        &self,
        model_id: &str,
        progress: ProgressCallback,
    ) -> anyhow::Result<Arc<dyn Engine>> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.events.lock().push(format!("create {model_id}"));
        for p in &self.progress_steps {
            tokio::time::sleep(Duration::from_millis(20)).await;
            progress(&LoadProgress { progress: *p, text: format!("fetching {model_id}") });
        }
        if self.fail_models.iter().any(|m| m == model_id) {
            anyhow::bail!("out of GPU memory for {model_id}");
        }
        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live.fetch_max(live, Ordering::SeqCst);
        Ok(Arc::new(MockEngine {
            model_id: model_id.to_string(),
            events: self.events.clone(),
            live: self.live.clone(),
            chunks: self.chunks.clone(),
        }))
    }

    fn prebuilt_models(&self) -> Option<Vec<PrebuiltModel>> {
        self.catalog.clone()
    }

    async fn has_model_in_cache(&self, model_id: &str) -> Option<anyhow::Result<bool>> {
        let cached = self.cached.as_ref()?;
        if model_id.is_empty() {
            return Some(Err(anyhow::anyhow!("empty model id")));
        }
        Some(Ok(cached.iter().any(|m| m == model_id)))
    }
}

/// A module body for `ModuleHost` that publishes `runtime` as the LLM runtime.
pub fn llm_module(
    runtime: Arc<MockLlm>,
) -> impl Fn(&GlobalNamespace, &loader::ScriptSpec) -> anyhow::Result<()> + Send + Sync {
    move |ns: &GlobalNamespace, _spec: &loader::ScriptSpec| -> anyhow::Result<()> {
        publish_webllm(ns, runtime.clone());
        Ok(())
    }
}

/// A module body that publishes `runtime` as the transformer runtime.
pub fn transformers_module(
    runtime: Arc<MockTransformers>,
) -> impl Fn(&GlobalNamespace, &loader::ScriptSpec) -> anyhow::Result<()> + Send + Sync {
    move |ns: &GlobalNamespace, _spec: &loader::ScriptSpec| -> anyhow::Result<()> {
        publish_transformers(ns, runtime.clone());
        Ok(())
    }
}
