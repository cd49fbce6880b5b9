//! Contracts of the side-loaded runtimes, and the provider that reads them
//! from the global namespace once their module has executed.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use loader::{GlobalNamespace, ReadinessProbe};

use crate::input::{ImageInput, PreparedAudio};
use crate::schema::{ChatChunk, ChatCompletion, ChatRequest, LoadProgress, PrebuiltModel};

pub const TRANSFORMERS_GLOBAL: &str = "transformers";
pub const PIPELINE_ENTRY: &str = "pipeline";

pub const WEBLLM_GLOBAL: &str = "webllm";
pub const CREATE_ENGINE_ENTRY: &str = "CreateMLCEngine";
pub const PREBUILT_CONFIG_ENTRY: &str = "prebuiltAppConfig";
pub const CACHE_PROBE_ENTRY: &str = "hasModelInCache";

pub type ProgressCallback = Arc<dyn Fn(&LoadProgress) + Send + Sync>;

#[derive(Clone, Debug, PartialEq)]
pub enum PipelineInput {
    Text(String),
    Audio(PreparedAudio),
    Image(ImageInput),
}

/// A loaded transformer pipeline.
#[async_trait]
pub trait Pipeline: Send + Sync {
    async fn run(
        &self,
        input: PipelineInput,
        options: serde_json::Value,
    ) -> anyhow::Result<serde_json::Value>;

    /// Releases runtime resources. Handles without a disposal routine keep
    /// the default.
    async fn dispose(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// The transformer runtime's `pipeline(task, model)` factory.
#[async_trait]
pub trait TransformersRuntime: Send + Sync {
    async fn pipeline(&self, task: &str, model_id: &str) -> anyhow::Result<Arc<dyn Pipeline>>;
}

/// A live LLM engine.
#[async_trait]
pub trait Engine: Send + Sync {
    async fn chat_completion(&self, request: ChatRequest) -> anyhow::Result<ChatCompletion>;

    async fn chat_completion_stream(
        &self,
        request: ChatRequest,
    ) -> anyhow::Result<BoxStream<'static, anyhow::Result<ChatChunk>>>;

    async fn unload(&self) -> anyhow::Result<()>;
}

/// The LLM runtime's `CreateMLCEngine` factory plus its optional catalog
/// and cache-probe capabilities.
#[async_trait]
pub trait LlmRuntime: Send + Sync {
    async fn create_engine(
        &self,
        model_id: &str,
        progress: ProgressCallback,
    ) -> anyhow::Result<Arc<dyn Engine>>;

    /// `prebuiltAppConfig.model_list`, when the runtime ships one.
    fn prebuilt_models(&self) -> Option<Vec<PrebuiltModel>> {
        None
    }

    /// `hasModelInCache`, when the runtime exposes it.
    async fn has_model_in_cache(&self, _model_id: &str) -> Option<anyhow::Result<bool>> {
        None
    }
}

/// Readiness plus access to the runtime's entry point.
pub trait RuntimeProvider<R: ?Sized>: ReadinessProbe {
    fn runtime(&self) -> Option<Arc<R>>;
}

/// Reads `global.entry` from a [`GlobalNamespace`], where a module
/// published an `Arc<R>`.
pub struct NamespaceRuntime<R: ?Sized> {
    namespace: GlobalNamespace,
    global: String,
    entry: String,
    _runtime: PhantomData<fn() -> Arc<R>>,
}

impl<R: ?Sized + Send + Sync + 'static> NamespaceRuntime<R> {
    pub fn new(namespace: GlobalNamespace, global: &str, entry: &str) -> Self {
        Self {
            namespace,
            global: global.to_string(),
            entry: entry.to_string(),
            _runtime: PhantomData,
        }
    }
}

impl NamespaceRuntime<dyn TransformersRuntime> {
    pub fn transformers(namespace: GlobalNamespace) -> Self {
        Self::new(namespace, TRANSFORMERS_GLOBAL, PIPELINE_ENTRY)
    }
}

impl NamespaceRuntime<dyn LlmRuntime> {
    pub fn webllm(namespace: GlobalNamespace) -> Self {
        Self::new(namespace, WEBLLM_GLOBAL, CREATE_ENGINE_ENTRY)
    }
}

impl<R: ?Sized + Send + Sync + 'static> ReadinessProbe for NamespaceRuntime<R> {
    fn is_ready(&self) -> bool {
        self.namespace.contains(&self.global, &self.entry)
    }
}

impl<R: ?Sized + Send + Sync + 'static> RuntimeProvider<R> for NamespaceRuntime<R> {
    fn runtime(&self) -> Option<Arc<R>> {
        self.namespace.get::<Arc<R>>(&self.global, &self.entry)
    }
}

/// What a transformer runtime module publishes when it executes.
pub fn publish_transformers(namespace: &GlobalNamespace, runtime: Arc<dyn TransformersRuntime>) {
    namespace.publish(TRANSFORMERS_GLOBAL, PIPELINE_ENTRY, runtime);
}

/// What an LLM runtime module publishes when it executes.
pub fn publish_webllm(namespace: &GlobalNamespace, runtime: Arc<dyn LlmRuntime>) {
    namespace.publish(WEBLLM_GLOBAL, CREATE_ENGINE_ENTRY, runtime);
}
