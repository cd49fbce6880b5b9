//! Model cache.
//!
//! At most one factory call is in flight per model id: concurrent requests
//! share the pending load and observe the same handle or the same error.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use loader::ReadyListener;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{ModelError, Result};
use crate::runtime::{Pipeline, PipelineInput, RuntimeProvider, TransformersRuntime};
use crate::schema::ModelStatus;

pub type ModelHandle = Arc<dyn Pipeline>;
pub type ModelErrorCallback = Arc<dyn Fn(&str, &ModelError) + Send + Sync>;

/// Extra factory attempts after the first failure.
pub const DEFAULT_MODEL_RETRIES: u32 = 1;

type SharedLoad = Shared<BoxFuture<'static, Result<ModelHandle>>>;

struct PendingLoad {
    generation: u64,
    load: SharedLoad,
}

#[derive(Default)]
struct Tables {
    models: HashMap<String, ModelHandle>,
    pending: HashMap<String, PendingLoad>,
    status: HashMap<String, ModelStatus>,
    errors: HashMap<String, ModelError>,
    generation: u64,
}

struct CacheInner {
    ready: ReadyListener,
    provider: Arc<dyn RuntimeProvider<dyn TransformersRuntime>>,
    retries: u32,
    on_model_error: Option<ModelErrorCallback>,
    tables: Mutex<Tables>,
}

#[derive(Clone)]
pub struct ModelCache {
    inner: Arc<CacheInner>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ModelEntry {
    pub model_id: String,
    pub status: ModelStatus,
    pub loaded: bool,
    pub pending: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ModelCache {
    pub fn new(
        ready: ReadyListener,
        provider: Arc<dyn RuntimeProvider<dyn TransformersRuntime>>,
        retries: u32,
        on_model_error: Option<ModelErrorCallback>,
    ) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                ready,
                provider,
                retries,
                on_model_error,
                tables: Mutex::new(Tables::default()),
            }),
        }
    }

    /// Returns the cached handle, joins an in-flight load, or starts one
    /// with the default retry budget.
    pub async fn load_model(&self, model_id: &str, task: &str) -> Result<ModelHandle> {
        self.load_model_with_retries(model_id, task, self.inner.retries).await
    }

    pub async fn load_model_with_retries(
        &self,
        model_id: &str,
        task: &str,
        retries: u32,
    ) -> Result<ModelHandle> {
        let load = {
            let mut t = self.inner.tables.lock();
            if let Some(handle) = t.models.get(model_id) {
                debug!(model_id, "model cache hit");
                return Ok(handle.clone());
            }
            if let Some(pending) = t.pending.get(model_id) {
                debug!(model_id, "joining in-flight model load");
                pending.load.clone()
            } else {
                t.generation += 1;
                let generation = t.generation;
                t.status.insert(model_id.to_string(), ModelStatus::Loading);
                t.errors.remove(model_id);

                // Detached so the load finishes even if every caller goes away.
                let task_handle = tokio::spawn(self.inner.clone().load(
                    model_id.to_string(),
                    task.to_string(),
                    retries,
                    generation,
                ));
                let id = model_id.to_string();
                let load = async move {
                    match task_handle.await {
                        Ok(res) => res,
                        Err(_) => Err(ModelError::Abandoned { model_id: id }),
                    }
                }
                .boxed()
                .shared();

                t.pending.insert(
                    model_id.to_string(),
                    PendingLoad { generation, load: load.clone() },
                );
                info!(model_id, task, "loading model");
                load
            }
        };
        load.await
    }

    /// Load (or reuse) a model and run it on `input`.
    pub async fn run(
        &self,
        model_id: &str,
        task: &str,
        input: PipelineInput,
        options: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let handle = self.load_model(model_id, task).await?;
        handle
            .run(input, options)
            .await
            .map_err(|e| ModelError::Inference(format!("{e:#}")))
    }

    /// Forgets the model and disposes its handle. An in-flight load is no
    /// longer tracked; its result is dropped when it lands.
    pub async fn unload_model(&self, model_id: &str) {
        let handle = {
            let mut t = self.inner.tables.lock();
            t.pending.remove(model_id);
            t.status.remove(model_id);
            t.errors.remove(model_id);
            t.models.remove(model_id)
        };
        let Some(handle) = handle else { return };

        if let Err(e) = handle.dispose().await {
            warn!(model_id, error=%e, "model dispose failed");
        }
        info!(model_id, "model unloaded");
    }

    pub fn status(&self, model_id: &str) -> ModelStatus {
        self.inner
            .tables
            .lock()
            .status
            .get(model_id)
            .copied()
            .unwrap_or_default()
    }

    pub fn error(&self, model_id: &str) -> Option<ModelError> {
        self.inner.tables.lock().errors.get(model_id).cloned()
    }

    pub fn is_loaded(&self, model_id: &str) -> bool {
        self.inner.tables.lock().models.contains_key(model_id)
    }

    pub fn is_pending(&self, model_id: &str) -> bool {
        self.inner.tables.lock().pending.contains_key(model_id)
    }

    /// True if the id appears in any table.
    pub fn is_tracked(&self, model_id: &str) -> bool {
        let t = self.inner.tables.lock();
        t.models.contains_key(model_id)
            || t.pending.contains_key(model_id)
            || t.status.contains_key(model_id)
            || t.errors.contains_key(model_id)
    }

    pub fn loaded_models(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.tables.lock().models.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn snapshot(&self) -> Vec<ModelEntry> {
        let t = self.inner.tables.lock();
        let mut out: Vec<ModelEntry> = t
            .status
            .iter()
            .map(|(id, status)| ModelEntry {
                model_id: id.clone(),
                status: *status,
                loaded: t.models.contains_key(id),
                pending: t.pending.contains_key(id),
                error: t.errors.get(id).map(|e| e.to_string()),
            })
            .collect();
        out.sort_by(|a, b| a.model_id.cmp(&b.model_id));
        out
    }
}

impl CacheInner {
    async fn load(
        self: Arc<Self>,
        model_id: String,
        task: String,
        retries: u32,
        generation: u64,
    ) -> Result<ModelHandle> {
        let result = self.fetch(&model_id, &task, retries).await;

        {
            let mut t = self.tables.lock();
            let tracked = t
                .pending
                .get(&model_id)
                .is_some_and(|p| p.generation == generation);
            if !tracked {
                // Unloaded while in flight; the handle is not disposed.
                warn!(model_id, "discarding result of untracked model load");
                return result;
            }
            t.pending.remove(&model_id);
            match &result {
                Ok(handle) => {
                    t.models.insert(model_id.clone(), handle.clone());
                    t.status.insert(model_id.clone(), ModelStatus::Ready);
                }
                Err(e) => {
                    t.status.insert(model_id.clone(), ModelStatus::Error);
                    t.errors.insert(model_id.clone(), e.clone());
                }
            }
        }

        match &result {
            Ok(_) => info!(model_id, "model ready"),
            Err(e) => {
                warn!(model_id, error=%e, "model load failed");
                if let Some(cb) = &self.on_model_error {
                    cb(&model_id, e);
                }
            }
        }
        result
    }

    async fn fetch(&self, model_id: &str, task: &str, retries: u32) -> Result<ModelHandle> {
        self.ready.wait().await?;
        let runtime = self.provider.runtime().ok_or(ModelError::LibraryNotReady)?;

        let mut remaining = retries;
        loop {
            match runtime.pipeline(task, model_id).await {
                Ok(handle) => return Ok(handle),
                Err(e) if remaining > 0 => {
                    remaining -= 1;
                    warn!(model_id, remaining, error=%e, "model factory failed, retrying");
                }
                Err(e) => {
                    return Err(ModelError::Factory {
                        model_id: model_id.to_string(),
                        message: format!("{e:#}"),
                    })
                }
            }
        }
    }
}
