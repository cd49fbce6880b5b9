//! Typed task helpers with default models.

use serde::de::DeserializeOwned;
use serde_json::json;

use crate::active::EngineSessionManager;
use crate::error::{ModelError, Result};
use crate::input::{AudioInput, ImageInput};
use crate::runtime::PipelineInput;
use crate::schema::*;
use crate::store::ModelCache;

fn decode<T: DeserializeOwned>(task: &str, value: serde_json::Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| ModelError::InvalidOutput(format!("{task}: {e}")))
}

pub async fn analyze_sentiment(
    models: &ModelCache,
    text: &str,
    model: Option<&str>,
) -> Result<Vec<SentimentResult>> {
    let model = model.unwrap_or(DEFAULT_SENTIMENT_MODEL);
    let out = models
        .run(model, TASK_SENTIMENT, PipelineInput::Text(text.to_string()), json!({}))
        .await?;
    decode(TASK_SENTIMENT, out)
}

pub async fn transcribe_audio(
    models: &ModelCache,
    audio: &AudioInput,
    model: Option<&str>,
) -> Result<Transcription> {
    let model = model.unwrap_or(DEFAULT_TRANSCRIPTION_MODEL);
    let out = models
        .run(model, TASK_TRANSCRIPTION, PipelineInput::Audio(audio.prepare()), json!({}))
        .await?;
    decode(TASK_TRANSCRIPTION, out)
}

pub async fn segment_image(
    models: &ModelCache,
    image: &ImageInput,
    model: Option<&str>,
) -> Result<Vec<Segment>> {
    let model = model.unwrap_or(DEFAULT_SEGMENTATION_MODEL);
    let out = models
        .run(model, TASK_IMAGE_SEGMENTATION, PipelineInput::Image(image.clone()), json!({}))
        .await?;
    decode(TASK_IMAGE_SEGMENTATION, out)
}

pub async fn caption_image(
    models: &ModelCache,
    image: &ImageInput,
    model: Option<&str>,
) -> Result<Vec<Caption>> {
    let model = model.unwrap_or(DEFAULT_CAPTION_MODEL);
    let out = models
        .run(model, TASK_IMAGE_CAPTION, PipelineInput::Image(image.clone()), json!({}))
        .await?;
    decode(TASK_IMAGE_CAPTION, out)
}

pub async fn classify_image(
    models: &ModelCache,
    image: &ImageInput,
    top_k: Option<u32>,
    model: Option<&str>,
) -> Result<Vec<Classification>> {
    let model = model.unwrap_or(DEFAULT_CLASSIFICATION_MODEL);
    let options = match top_k {
        Some(k) => json!({ "top_k": k }),
        None => json!({}),
    };
    let out = models
        .run(model, TASK_IMAGE_CLASSIFICATION, PipelineInput::Image(image.clone()), options)
        .await?;
    decode(TASK_IMAGE_CLASSIFICATION, out)
}

pub async fn chat(
    sessions: &EngineSessionManager,
    messages: Vec<ChatMessage>,
    options: ChatOptions,
) -> Result<ChatCompletion> {
    sessions.chat_completion(messages, options).await
}

pub async fn stream_chat<F>(
    sessions: &EngineSessionManager,
    messages: Vec<ChatMessage>,
    on_chunk: F,
    options: ChatOptions,
) -> Result<String>
where
    F: FnMut(&str) + Send,
{
    sessions.stream_chat_completion(messages, on_chunk, options).await
}
