use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use modelops::{ModelEntry, PrebuiltModel, SessionState};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ApiError;
use crate::state::SharedState;

#[derive(Serialize)]
pub struct ModelsResponse {
    pub models: Vec<ModelEntry>,
}

pub async fn get_models(State(st): State<SharedState>) -> Json<ModelsResponse> {
    Json(ModelsResponse { models: st.provider.models().snapshot() })
}

pub async fn delete_model(
    State(st): State<SharedState>,
    Path(model_id): Path<String>,
) -> StatusCode {
    st.provider.models().unload_model(&model_id).await;
    StatusCode::NO_CONTENT
}

#[derive(Serialize)]
pub struct CatalogResponse {
    pub models: Vec<PrebuiltModel>,
}

pub async fn get_llm_models(
    State(st): State<SharedState>,
) -> Result<Json<CatalogResponse>, ApiError> {
    let sessions = st.provider.webllm()?;
    Ok(Json(CatalogResponse { models: sessions.available_models() }))
}

#[derive(Serialize)]
pub struct CacheResponse {
    pub model_id: String,
    pub cached: bool,
}

pub async fn get_llm_cache(
    State(st): State<SharedState>,
    Path(model_id): Path<String>,
) -> Result<Json<CacheResponse>, ApiError> {
    let cached = st.provider.webllm()?.has_model_in_cache(&model_id).await;
    Ok(Json(CacheResponse { model_id, cached }))
}

#[derive(Deserialize)]
pub struct LoadReq {
    pub model_id: String,
}

pub async fn post_llm_load(
    State(st): State<SharedState>,
    Json(req): Json<LoadReq>,
) -> Result<Json<SessionState>, ApiError> {
    if req.model_id.trim().is_empty() {
        return Err(ApiError::bad_request("model_id must not be empty"));
    }
    let sessions = st.provider.webllm()?;
    info!(model_id=%req.model_id, "LLM load requested");
    sessions.load_model(&req.model_id, None).await?;
    Ok(Json(sessions.state()))
}

pub async fn delete_llm_session(State(st): State<SharedState>) -> Result<StatusCode, ApiError> {
    st.provider.webllm()?.unload().await;
    Ok(StatusCode::NO_CONTENT)
}
