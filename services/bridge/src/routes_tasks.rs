use axum::{
    extract::{Path, State},
    Json,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use modelops::{tasks, AudioInput, ImageInput};
use serde::Deserialize;
use serde_json::Value;

use crate::error::ApiError;
use crate::state::SharedState;

#[derive(Deserialize)]
pub struct SentimentReq {
    pub text: String,
    pub model: Option<String>,
}

pub async fn post_sentiment(
    State(st): State<SharedState>,
    Json(req): Json<SentimentReq>,
) -> Result<Json<Value>, ApiError> {
    let out = tasks::analyze_sentiment(st.provider.models(), &req.text, req.model.as_deref())
        .await?;
    Ok(Json(serde_json::json!({ "results": out })))
}

#[derive(Deserialize)]
pub struct TranscribeReq {
    /// Interleaved PCM samples.
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    #[serde(default = "one")]
    pub channels: u16,
    pub model: Option<String>,
}

fn one() -> u16 {
    1
}

pub async fn post_transcribe(
    State(st): State<SharedState>,
    Json(req): Json<TranscribeReq>,
) -> Result<Json<modelops::Transcription>, ApiError> {
    if req.sample_rate == 0 || req.channels == 0 {
        return Err(ApiError::bad_request("sample_rate and channels must be positive"));
    }
    let audio = AudioInput {
        samples: req.samples,
        channels: req.channels,
        sample_rate: req.sample_rate,
    };
    let out = tasks::transcribe_audio(st.provider.models(), &audio, req.model.as_deref()).await?;
    Ok(Json(out))
}

#[derive(Deserialize)]
pub struct ImageReq {
    pub image_url: Option<String>,
    /// Base64 of the encoded image file.
    pub image_base64: Option<String>,
    pub model: Option<String>,
    pub top_k: Option<u32>,
}

impl ImageReq {
    fn image(&self) -> Result<ImageInput, ApiError> {
        match (&self.image_url, &self.image_base64) {
            (Some(url), None) => Ok(ImageInput::Url(url.clone())),
            (None, Some(b64)) => STANDARD
                .decode(b64.trim())
                .map(ImageInput::Bytes)
                .map_err(|e| ApiError::bad_request(format!("image_base64: {e}"))),
            _ => Err(ApiError::bad_request("exactly one of image_url or image_base64 is required")),
        }
    }
}

pub async fn post_image(
    State(st): State<SharedState>,
    Path(kind): Path<String>,
    Json(req): Json<ImageReq>,
) -> Result<Json<Value>, ApiError> {
    let image = req.image()?;
    let models = st.provider.models();
    let model = req.model.as_deref();

    let results = match kind.as_str() {
        "segment" => serde_json::to_value(tasks::segment_image(models, &image, model).await?),
        "caption" => serde_json::to_value(tasks::caption_image(models, &image, model).await?),
        "classify" => {
            serde_json::to_value(tasks::classify_image(models, &image, req.top_k, model).await?)
        }
        other => return Err(ApiError::not_found(format!("unknown image task: {other}"))),
    }
    .map_err(|e| ApiError::bad_request(e.to_string()))?;

    Ok(Json(serde_json::json!({ "results": results })))
}
