//! Handler tests that drive the router with in-process runtimes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::http::{header, Request, StatusCode};
use futures::stream::{self, BoxStream, StreamExt};
use loader::{GlobalNamespace, ModuleHost, ScriptSpec};
use modelops::{
    publish_transformers, publish_webllm, ChatChoice, ChatChunk, ChatCompletion, ChatMessage,
    ChatRequest, Engine, LlmRuntime, ModelStatus, Pipeline, PipelineInput, PrebuiltModel,
    ProgressCallback, Provider, ProviderCallbacks, ProviderConfig, TransformersRuntime,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use crate::app;
use crate::config::AppConfig;
use crate::state::{AppState, SharedState};

const TF_URL: &str = "https://cdn.test/transformers.js";
const LLM_URL: &str = "https://esm.test/web-llm";
const DEFAULT_MODEL: &str = "tiny";
/// Engines for this model break after the first chunk.
const FLAKY_MODEL: &str = "flaky";
/// Engines for this model stream forever, one chunk a second.
const ENDLESS_MODEL: &str = "endless";

static ENDLESS_STREAM_DROPPED: AtomicBool = AtomicBool::new(false);

struct DropFlag;

impl Drop for DropFlag {
    fn drop(&mut self) {
        ENDLESS_STREAM_DROPPED.store(true, Ordering::SeqCst);
    }
}

struct LabelPipeline;

#[async_trait]
impl Pipeline for LabelPipeline {
    async fn run(&self, _input: PipelineInput, _options: Value) -> anyhow::Result<Value> {
        Ok(json!([{ "label": "POSITIVE", "score": 0.98 }]))
    }
}

struct StubTransformers;

#[async_trait]
impl TransformersRuntime for StubTransformers {
    async fn pipeline(&self, _task: &str, _model_id: &str) -> anyhow::Result<Arc<dyn Pipeline>> {
        Ok(Arc::new(LabelPipeline))
    }
}

struct StubEngine {
    model_id: String,
}

#[async_trait]
impl Engine for StubEngine {
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
        _request: ChatRequest,
    ) -> anyhow::Result<BoxStream<'static, anyhow::Result<ChatChunk>>> {
        if self.model_id == ENDLESS_MODEL {
            let endless = stream::unfold(DropFlag, |flag| async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Some((Ok::<_, anyhow::Error>(ChatChunk::text(".")), flag))
            });
            return Ok(endless.boxed());
        }
        let mut chunks = vec![Ok(ChatChunk::text("Hel"))];
        if self.model_id == FLAKY_MODEL {
            chunks.push(Err(anyhow::anyhow!("backend dropped the connection")));
        } else {
            chunks.push(Ok(ChatChunk::text("lo")));
        }
        Ok(stream::iter(chunks).boxed())
    }

    async fn unload(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

struct StubLlm;

#[async_trait]
impl LlmRuntime for StubLlm {
    async fn create_engine(
        &self,
        model_id: &str,
        _progress: ProgressCallback,
    ) -> anyhow::Result<Arc<dyn Engine>> {
        Ok(Arc::new(StubEngine { model_id: model_id.to_string() }))
    }

    fn prebuilt_models(&self) -> Option<Vec<PrebuiltModel>> {
        Some(vec![PrebuiltModel {
            model_id: DEFAULT_MODEL.into(),
            vram_required_mb: Some(512.0),
            low_resource_required: true,
        }])
    }
}

/// Mounts a provider over stub runtimes and waits until it is usable.
async fn mounted(enable_webllm: bool) -> SharedState {
    let ns = GlobalNamespace::new();
    let host = Arc::new(ModuleHost::new(ns.clone()));
    host.register(TF_URL, |ns: &GlobalNamespace, _: &ScriptSpec| -> anyhow::Result<()> {
        publish_transformers(ns, Arc::new(StubTransformers));
        Ok(())
    });
    host.register(LLM_URL, |ns: &GlobalNamespace, _: &ScriptSpec| -> anyhow::Result<()> {
        publish_webllm(ns, Arc::new(StubLlm));
        Ok(())
    });

    let provider_cfg = ProviderConfig {
        module_url: TF_URL.into(),
        webllm_module_url: LLM_URL.into(),
        enable_webllm,
        default_llm_model: DEFAULT_MODEL.into(),
        ..Default::default()
    };
    let provider = Provider::mount(&provider_cfg, ProviderCallbacks::default(), host, ns);
    provider.wait_ready().await.unwrap();
    if enable_webllm {
        provider.wait_webllm_ready().await.unwrap();
        provider
            .webllm()
            .unwrap()
            .subscribe()
            .wait_for(|s| s.status == ModelStatus::Ready)
            .await
            .unwrap();
    }

    let cfg = AppConfig {
        pipeline_url: "http://pipelines.test".into(),
        llm_url: "http://llm.test".into(),
        bind_addr: "127.0.0.1:0".into(),
        provider: provider_cfg,
    };
    Arc::new(AppState::new(provider, cfg))
}

fn request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder().method(method).uri(uri);
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string())),
        None => builder.body(Body::empty()),
    }
    .unwrap()
}

async fn call(
    state: &SharedState,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Bytes) {
    let req = request(method, uri, body);
    let resp = app(state.clone()).oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, bytes)
}

fn error_message(bytes: &Bytes) -> String {
    let body: Value = serde_json::from_slice(bytes).unwrap();
    body["error"].as_str().unwrap_or_default().to_string()
}

/// Payloads of the `data:` lines in an event-stream body.
fn data_lines(bytes: &Bytes) -> Vec<String> {
    String::from_utf8(bytes.to_vec())
        .unwrap()
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| data.trim().to_string())
        .collect()
}

fn chat_body(stream: bool) -> Value {
    json!({
        "messages": [{ "role": "user", "content": "hi" }],
        "stream": stream,
        "temperature": 0.2,
    })
}

#[tokio::test(start_paused = true)]
async fn test_streaming_chat_sends_chunks_then_done() {
    let state = mounted(true).await;
    let (status, body) = call(&state, "POST", "/chat/completions", Some(chat_body(true))).await;
    assert_eq!(status, StatusCode::OK);

    let data = data_lines(&body);
    assert_eq!(data.last().map(String::as_str), Some("[DONE]"));
    let text: String = data[..data.len() - 1]
        .iter()
        .map(|d| serde_json::from_str::<ChatChunk>(d).unwrap())
        .filter_map(|c| c.content().map(str::to_string))
        .collect();
    assert_eq!(text, "Hello");
}

#[tokio::test(start_paused = true)]
async fn test_stream_failure_ends_with_error_event() {
    let state = mounted(true).await;
    let (status, _) =
        call(&state, "POST", "/llm/load", Some(json!({ "model_id": FLAKY_MODEL }))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(&state, "POST", "/chat/completions", Some(chat_body(true))).await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("event: error"), "{text}");
    assert!(text.contains("backend dropped the connection"), "{text}");
    assert!(!text.contains("[DONE]"), "{text}");
}

#[tokio::test(start_paused = true)]
async fn test_client_disconnect_stops_generation() {
    let state = mounted(true).await;
    let (status, _) =
        call(&state, "POST", "/llm/load", Some(json!({ "model_id": ENDLESS_MODEL }))).await;
    assert_eq!(status, StatusCode::OK);

    let req = request("POST", "/chat/completions", Some(chat_body(true)));
    let resp = app(state.clone()).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(!ENDLESS_STREAM_DROPPED.load(Ordering::SeqCst));

    drop(resp);
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(ENDLESS_STREAM_DROPPED.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn test_plain_chat_returns_completion() {
    let state = mounted(true).await;
    let (status, body) = call(&state, "POST", "/chat/completions", Some(chat_body(false))).await;
    assert_eq!(status, StatusCode::OK);
    let out: ChatCompletion = serde_json::from_slice(&body).unwrap();
    assert_eq!(out.text(), Some("tiny: hi"));
}

#[tokio::test(start_paused = true)]
async fn test_chat_after_unload_is_conflict() {
    let state = mounted(true).await;
    let (status, _) = call(&state, "DELETE", "/llm/session", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = call(&state, "POST", "/chat/completions", Some(chat_body(true))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(error_message(&body).contains("no active LLM session"));
}

#[tokio::test(start_paused = true)]
async fn test_empty_messages_are_rejected() {
    let state = mounted(true).await;
    let (status, _) =
        call(&state, "POST", "/chat/completions", Some(json!({ "messages": [] }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test(start_paused = true)]
async fn test_llm_routes_without_webllm_are_not_found() {
    let state = mounted(false).await;

    let (status, body) = call(&state, "GET", "/llm/models", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_message(&body), modelops::ModelError::FeatureDisabled.to_string());

    let (status, _) = call(&state, "POST", "/chat/completions", Some(chat_body(false))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = call(&state, "DELETE", "/llm/session", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test(start_paused = true)]
async fn test_llm_catalog_lists_prebuilt_models() {
    let state = mounted(true).await;
    let (status, body) = call(&state, "GET", "/llm/models", None).await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["models"][0]["model_id"], DEFAULT_MODEL);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_image_task_is_not_found() {
    let state = mounted(false).await;
    let (status, body) = call(
        &state,
        "POST",
        "/tasks/image/blur",
        Some(json!({ "image_url": "https://x/cat.png" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(error_message(&body).contains("unknown image task: blur"));
    // nothing was loaded for it
    assert!(state.provider.models().snapshot().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_sentiment_loads_model_once() {
    let state = mounted(false).await;
    for _ in 0..2 {
        let (status, body) =
            call(&state, "POST", "/tasks/sentiment", Some(json!({ "text": "great" }))).await;
        assert_eq!(status, StatusCode::OK);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["results"][0]["label"], "POSITIVE");
    }

    let (_, body) = call(&state, "GET", "/models", None).await;
    let body: Value = serde_json::from_slice(&body).unwrap();
    let models = body["models"].as_array().unwrap();
    assert_eq!(models.len(), 1);
    assert_eq!(models[0]["status"], "ready");
    assert_eq!(models[0]["loaded"], true);
}

#[tokio::test(start_paused = true)]
async fn test_runtime_report_shows_both_loaders() {
    let state = mounted(true).await;
    let (status, body) = call(&state, "GET", "/runtime", None).await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["transformers"]["status"], "ready");
    assert_eq!(body["webllm"]["status"], "ready");
    assert_eq!(body["session"]["model_id"], DEFAULT_MODEL);
}
