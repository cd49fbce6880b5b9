mod config;
mod error;
mod routes_chat;
mod routes_models;
mod routes_runtime;
mod routes_tasks;
mod runtime_http;
mod state;

#[cfg(test)]
mod api_tests;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    routing::{delete, get, post},
    Router,
};
use loader::{GlobalNamespace, LoadError, ModuleHost};
use modelops::{LoadProgress, ModelError, Provider, ProviderCallbacks};
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info};

use crate::config::AppConfig;
use crate::runtime_http::{HttpLlmRuntime, HttpPipelineRuntime, LlmModule, PipelineModule};
use crate::state::{AppState, SharedState};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cfg = AppConfig::from_env()?;

    // Module URLs resolve to the HTTP runtimes instead of fetched scripts.
    let namespace = GlobalNamespace::new();
    let host = Arc::new(ModuleHost::new(namespace.clone()));
    host.register(
        &cfg.provider.module_url,
        PipelineModule { runtime: Arc::new(HttpPipelineRuntime::new(cfg.pipeline_url.clone())) },
    );
    host.register(
        &cfg.provider.webllm_module_url,
        LlmModule { runtime: Arc::new(HttpLlmRuntime::new(cfg.llm_url.clone())) },
    );

    let callbacks = ProviderCallbacks {
        on_library_error: Some(Arc::new(|e: &LoadError| {
            error!(error=%e, "runtime library failed to load");
        })),
        on_model_error: Some(Arc::new(|model_id: &str, e: &ModelError| {
            error!(model_id, error=%e, "model failed to load");
        })),
        on_llm_progress: Some(Arc::new(|p: &LoadProgress| {
            debug!(progress = p.progress, text=%p.text, "LLM load progress");
        })),
    };
    let provider = Provider::mount(&cfg.provider, callbacks, host, namespace);
    let app_state = Arc::new(AppState::new(provider, cfg.clone()));

    let router = app(app_state.clone());

    let addr = &cfg.bind_addr;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "bridge listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    app_state.provider.shutdown().await;
    info!("bridge stopped");
    Ok(())
}

fn app(state: SharedState) -> Router {
    Router::new()
        .route("/runtime", get(crate::routes_runtime::get_runtime))
        .route("/models", get(crate::routes_models::get_models))
        .route("/models/:id", delete(crate::routes_models::delete_model))
        .route("/tasks/sentiment", post(crate::routes_tasks::post_sentiment))
        .route("/tasks/transcribe", post(crate::routes_tasks::post_transcribe))
        .route("/tasks/image/:kind", post(crate::routes_tasks::post_image))
        .route("/llm/models", get(crate::routes_models::get_llm_models))
        .route("/llm/cache/:id", get(crate::routes_models::get_llm_cache))
        .route("/llm/load", post(crate::routes_models::post_llm_load))
        .route("/llm/session", delete(crate::routes_models::delete_llm_session))
        .route("/chat/completions", post(crate::routes_chat::chat_complete))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error=%e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
