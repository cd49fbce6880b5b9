//! HTTP-backed runtimes.
//!
//! The transformer runtime forwards to a pipeline server
//! (`POST {base}/pipeline/{task}`); the LLM runtime talks to an
//! OpenAI-compatible chat server such as LM Studio. Each one is registered
//! with the module host under its module URL, so "executing" the module pings
//! the backend and publishes the runtime's entry points.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::future;
use futures::stream::{BoxStream, Stream, StreamExt};
use loader::{GlobalNamespace, Module, ScriptSpec};
use modelops::{
    publish_transformers, publish_webllm, ChatChunk, ChatCompletion, ChatRequest, Engine,
    LlmRuntime, LoadProgress, Pipeline, PipelineInput, PrebuiltModel, ProgressCallback,
    TransformersRuntime,
};
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

// ---------------- transformer pipelines ---------------- //

pub struct HttpPipelineRuntime {
    base_url: String,
    client: reqwest::Client,
}

impl HttpPipelineRuntime {
    pub fn new(base_url: String) -> Self {
        Self { base_url, client: reqwest::Client::new() }
    }

    pub async fn ping(&self) -> anyhow::Result<()> {
        let url = format!("{}/health", self.base_url);
        self.client.get(url).send().await?.error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl TransformersRuntime for HttpPipelineRuntime {
    async fn pipeline(&self, task: &str, model_id: &str) -> anyhow::Result<Arc<dyn Pipeline>> {
        let url = format!("{}/pipeline/{task}", self.base_url);
        // A warmup request makes the backend fetch the weights now rather
        // than on the first inference.
        self.client
            .post(&url)
            .json(&json!({ "model": model_id, "warmup": true }))
            .send()
            .await
            .with_context(|| format!("pipeline backend unreachable at {url}"))?
            .error_for_status()?;
        Ok(Arc::new(HttpPipeline {
            url,
            model_id: model_id.to_string(),
            client: self.client.clone(),
        }))
    }
}

struct HttpPipeline {
    url: String,
    model_id: String,
    client: reqwest::Client,
}

#[async_trait]
impl Pipeline for HttpPipeline {
    async fn run(&self, input: PipelineInput, options: Value) -> anyhow::Result<Value> {
        let body = json!({
            "model": self.model_id,
            "inputs": encode_input(&input),
            "options": options,
        });
        let resp = self.client.post(&self.url).json(&body).send().await?.error_for_status()?;
        Ok(resp.json().await?)
    }
}

fn encode_input(input: &PipelineInput) -> Value {
    match input {
        PipelineInput::Text(text) => Value::String(text.clone()),
        PipelineInput::Audio(audio) => json!({
            "samples": audio.samples,
            "sampling_rate": audio.sampling_rate,
        }),
        PipelineInput::Image(image) => Value::String(image.to_source()),
    }
}

pub struct PipelineModule {
    pub runtime: Arc<HttpPipelineRuntime>,
}

#[async_trait]
impl Module for PipelineModule {
    async fn execute(&self, namespace: &GlobalNamespace, spec: &ScriptSpec) -> anyhow::Result<()> {
        self.runtime
            .ping()
            .await
            .with_context(|| format!("pipeline backend for {} is down", spec.module_url))?;
        publish_transformers(namespace, self.runtime.clone());
        info!(base_url=%self.runtime.base_url, "pipeline runtime published");
        Ok(())
    }
}

// ---------------- chat engine ---------------- //

#[derive(Deserialize)]
struct ModelList {
    data: Vec<ModelListEntry>,
}

#[derive(Deserialize)]
struct ModelListEntry {
    id: String,
}

pub struct HttpLlmRuntime {
    base_url: String,
    client: reqwest::Client,
    catalog: RwLock<Vec<PrebuiltModel>>,
}

impl HttpLlmRuntime {
    pub fn new(base_url: String) -> Self {
        Self { base_url, client: reqwest::Client::new(), catalog: RwLock::new(Vec::new()) }
    }

    async fn served_models(&self) -> anyhow::Result<Vec<String>> {
        let url = format!("{}/v1/models", self.base_url);
        let list: ModelList =
            self.client.get(url).send().await?.error_for_status()?.json().await?;
        Ok(list.data.into_iter().map(|m| m.id).collect())
    }

    /// Pings the backend and refreshes the catalog from what it serves.
    pub async fn ping(&self) -> anyhow::Result<()> {
        let served = self.served_models().await?;
        *self.catalog.write() = served
            .into_iter()
            .map(|model_id| PrebuiltModel {
                model_id,
                vram_required_mb: None,
                low_resource_required: false,
            })
            .collect();
        Ok(())
    }
}

#[async_trait]
impl LlmRuntime for HttpLlmRuntime {
    async fn create_engine(
        &self,
        model_id: &str,
        progress: ProgressCallback,
    ) -> anyhow::Result<Arc<dyn Engine>> {
        progress(&LoadProgress { progress: 0.0, text: format!("contacting {}", self.base_url) });
        let served = self.served_models().await?;
        if !served.iter().any(|m| m == model_id) {
            anyhow::bail!("model {model_id} is not served by {}", self.base_url);
        }
        progress(&LoadProgress { progress: 1.0, text: format!("{model_id} available") });
        Ok(Arc::new(HttpEngine {
            base_url: self.base_url.clone(),
            model_id: model_id.to_string(),
            client: self.client.clone(),
        }))
    }

    fn prebuilt_models(&self) -> Option<Vec<PrebuiltModel>> {
        Some(self.catalog.read().clone())
    }

    async fn has_model_in_cache(&self, model_id: &str) -> Option<anyhow::Result<bool>> {
        Some(self.served_models().await.map(|served| served.iter().any(|m| m == model_id)))
    }
}

pub struct LlmModule {
    pub runtime: Arc<HttpLlmRuntime>,
}

#[async_trait]
impl Module for LlmModule {
    async fn execute(&self, namespace: &GlobalNamespace, spec: &ScriptSpec) -> anyhow::Result<()> {
        self.runtime
            .ping()
            .await
            .with_context(|| format!("chat backend for {} is down", spec.module_url))?;
        publish_webllm(namespace, self.runtime.clone());
        info!(base_url=%self.runtime.base_url, "chat runtime published");
        Ok(())
    }
}

struct HttpEngine {
    base_url: String,
    model_id: String,
    client: reqwest::Client,
}

impl HttpEngine {
    fn body(&self, request: &ChatRequest) -> anyhow::Result<Value> {
        let mut body = serde_json::to_value(request)?;
        body["model"] = Value::String(self.model_id.clone());
        Ok(body)
    }

    async fn post(&self, request: &ChatRequest) -> anyhow::Result<reqwest::Response> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let resp = self.client.post(url).json(&self.body(request)?).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("chat backend returned {status}: {text}");
        }
        Ok(resp)
    }
}

#[async_trait]
impl Engine for HttpEngine {
    async fn chat_completion(&self, request: ChatRequest) -> anyhow::Result<ChatCompletion> {
        Ok(self.post(&request).await?.json().await?)
    }

    async fn chat_completion_stream(
        &self,
        request: ChatRequest,
    ) -> anyhow::Result<BoxStream<'static, anyhow::Result<ChatChunk>>> {
        Ok(decode_chunks(self.post(&request).await?.bytes_stream()))
    }

    async fn unload(&self) -> anyhow::Result<()> {
        // The backend owns the weights; dropping the session is enough.
        debug!(model_id=%self.model_id, "chat engine released");
        Ok(())
    }
}

/// Decodes an OpenAI-style event stream into chunks, stopping at `[DONE]`.
fn decode_chunks<S, B, E>(bytes: S) -> BoxStream<'static, anyhow::Result<ChatChunk>>
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    bytes
        .eventsource()
        .take_while(|event| {
            future::ready(!matches!(event, Ok(e) if e.data.trim() == "[DONE]"))
        })
        .filter_map(|event| async move {
            match event {
                Ok(e) if e.data.trim().is_empty() => None,
                Ok(e) => Some(
                    serde_json::from_str::<ChatChunk>(&e.data)
                        .with_context(|| format!("bad stream chunk: {}", e.data)),
                ),
                Err(e) => Some(Err(anyhow::anyhow!("chat stream broke: {e}"))),
            }
        })
        .boxed()
}
