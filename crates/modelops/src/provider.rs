//! Mounts both runtimes and the layers built on them.

use std::sync::Arc;
use std::time::Duration;

use loader::{
    ErrorCallback, GlobalNamespace, LibraryLoader, LoadStatus, LoaderConfig, ScriptHost,
    DEFAULT_MAX_RETRIES,
};
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::active::EngineSessionManager;
use crate::error::{ModelError, Result};
use crate::runtime::{
    LlmRuntime, NamespaceRuntime, ProgressCallback, TransformersRuntime, CACHE_PROBE_ENTRY,
    CREATE_ENGINE_ENTRY, PIPELINE_ENTRY, PREBUILT_CONFIG_ENTRY, TRANSFORMERS_GLOBAL, WEBLLM_GLOBAL,
};
use crate::schema::DEFAULT_LLM_MODEL;
use crate::store::{ModelCache, ModelErrorCallback, DEFAULT_MODEL_RETRIES};

pub const DEFAULT_TRANSFORMERS_URL: &str =
    "https://cdn.jsdelivr.net/npm/@huggingface/transformers@3.0.2";
pub const DEFAULT_WEBLLM_URL: &str = "https://esm.run/@mlc-ai/web-llm";

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub module_url: String,
    pub load_timeout_ms: u64,
    pub max_retries: u32,
    pub nonce: Option<String>,
    pub enable_webllm: bool,
    pub webllm_module_url: String,
    pub default_llm_model: String,
    /// Per-call factory retry budget, independent of `max_retries`.
    pub model_retry_count: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            module_url: DEFAULT_TRANSFORMERS_URL.to_string(),
            load_timeout_ms: 60_000,
            max_retries: DEFAULT_MAX_RETRIES,
            nonce: None,
            enable_webllm: false,
            webllm_module_url: DEFAULT_WEBLLM_URL.to_string(),
            default_llm_model: DEFAULT_LLM_MODEL.to_string(),
            model_retry_count: DEFAULT_MODEL_RETRIES,
        }
    }
}

impl ProviderConfig {
    pub fn transformers_loader(&self) -> LoaderConfig {
        LoaderConfig::new("transformers", &self.module_url, TRANSFORMERS_GLOBAL, PIPELINE_ENTRY)
            .with_timeout(Duration::from_millis(self.load_timeout_ms))
            .with_max_retries(self.max_retries)
            .with_nonce(self.nonce.clone())
    }

    pub fn webllm_loader(&self) -> LoaderConfig {
        LoaderConfig::new("webllm", &self.webllm_module_url, WEBLLM_GLOBAL, CREATE_ENGINE_ENTRY)
            .with_entry_point(PREBUILT_CONFIG_ENTRY)
            .with_entry_point(CACHE_PROBE_ENTRY)
            .with_timeout(Duration::from_millis(self.load_timeout_ms))
            .with_max_retries(self.max_retries)
            .with_nonce(self.nonce.clone())
    }
}

#[derive(Clone, Default)]
pub struct ProviderCallbacks {
    pub on_library_error: Option<ErrorCallback>,
    pub on_model_error: Option<ModelErrorCallback>,
    pub on_llm_progress: Option<ProgressCallback>,
}

struct WebLlm {
    loader: LibraryLoader,
    sessions: EngineSessionManager,
    autoload: JoinHandle<()>,
}

pub struct Provider {
    transformers: LibraryLoader,
    models: ModelCache,
    webllm: Option<WebLlm>,
}

impl Provider {
    /// Builds both layers and starts loading. Must be called inside a tokio
    /// runtime.
    pub fn mount(
        config: &ProviderConfig,
        callbacks: ProviderCallbacks,
        host: Arc<dyn ScriptHost>,
        namespace: GlobalNamespace,
    ) -> Self {
        let tf_runtime = Arc::new(NamespaceRuntime::<dyn TransformersRuntime>::transformers(
            namespace.clone(),
        ));
        let transformers = LibraryLoader::new(
            config.transformers_loader(),
            host.clone(),
            tf_runtime.clone(),
            callbacks.on_library_error.clone(),
        );
        let models = ModelCache::new(
            transformers.ready(),
            tf_runtime,
            config.model_retry_count,
            callbacks.on_model_error.clone(),
        );
        transformers.try_load();

        let webllm = config.enable_webllm.then(|| {
            let llm_runtime = Arc::new(NamespaceRuntime::<dyn LlmRuntime>::webllm(namespace));
            let loader = LibraryLoader::new(
                config.webllm_loader(),
                host,
                llm_runtime.clone(),
                callbacks.on_library_error.clone(),
            );
            let sessions =
                EngineSessionManager::new(&loader, llm_runtime, callbacks.on_llm_progress.clone());
            loader.try_load();

            // The default model is pushed as soon as the runtime is ready.
            let ready = loader.ready();
            let auto = sessions.clone();
            let model_id = config.default_llm_model.clone();
            let autoload = tokio::spawn(async move {
                if ready.wait().await.is_err() {
                    return;
                }
                if let Err(e) = auto.load_model(&model_id, None).await {
                    warn!(model_id=%model_id, error=%e, "default LLM model failed to load");
                }
            });

            WebLlm { loader, sessions, autoload }
        });

        Self { transformers, models, webllm }
    }

    pub fn status(&self) -> LoadStatus {
        self.transformers.status()
    }

    pub fn transformers_loader(&self) -> &LibraryLoader {
        &self.transformers
    }

    pub fn models(&self) -> &ModelCache {
        &self.models
    }

    /// Suspends until the transformer runtime is ready or failed for good.
    pub async fn wait_ready(&self) -> Result<()> {
        Ok(self.transformers.wait_ready().await?)
    }

    pub fn webllm_enabled(&self) -> bool {
        self.webllm.is_some()
    }

    pub fn webllm_loader(&self) -> Result<&LibraryLoader> {
        self.webllm.as_ref().map(|w| &w.loader).ok_or(ModelError::FeatureDisabled)
    }

    pub fn webllm(&self) -> Result<&EngineSessionManager> {
        self.webllm.as_ref().map(|w| &w.sessions).ok_or(ModelError::FeatureDisabled)
    }

    pub async fn wait_webllm_ready(&self) -> Result<()> {
        Ok(self.webllm_loader()?.wait_ready().await?)
    }

    /// Tears down both loaders and the LLM session.
    pub async fn shutdown(&self) {
        self.transformers.shutdown();
        if let Some(w) = &self.webllm {
            w.autoload.abort();
            w.loader.shutdown();
            // Also clears the state of an autoload cut off above.
            w.sessions.unload().await;
        }
    }
}
