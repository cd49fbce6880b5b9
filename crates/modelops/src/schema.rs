use serde::{Deserialize, Serialize};

pub const TASK_SENTIMENT: &str = "sentiment-analysis";
pub const TASK_TRANSCRIPTION: &str = "automatic-speech-recognition";
pub const TASK_IMAGE_SEGMENTATION: &str = "image-segmentation";
pub const TASK_IMAGE_CAPTION: &str = "image-to-text";
pub const TASK_IMAGE_CLASSIFICATION: &str = "image-classification";

pub const DEFAULT_SENTIMENT_MODEL: &str = "Xenova/distilbert-base-uncased-finetuned-sst-2-english";
pub const DEFAULT_TRANSCRIPTION_MODEL: &str = "distil-whisper/distil-small.en";
pub const DEFAULT_SEGMENTATION_MODEL: &str = "Xenova/detr-resnet-50-panoptic";
pub const DEFAULT_CAPTION_MODEL: &str = "Xenova/vit-gpt2-image-captioning";
pub const DEFAULT_CLASSIFICATION_MODEL: &str = "Xenova/vit-base-patch16-224";
pub const DEFAULT_LLM_MODEL: &str = "Llama-3.2-1B-Instruct-q4f16_1-MLC";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelStatus {
    #[default]
    Idle,
    Loading,
    Ready,
    Error,
}

// ---- pipeline outputs, passed through from the runtime ----

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SentimentResult {
    pub label: String,
    pub score: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transcription {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunks: Option<serde_json::Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub label: String,
    pub score: Option<f64>,
    pub mask: serde_json::Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Caption {
    pub generated_text: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub label: String,
    pub score: f64,
}

// ---- chat ----

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".into(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".into(), content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant".into(), content: content.into() }
    }
}

/// Sampling options merged into the request next to `messages`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    /// Anything else the runtime understands.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
    #[serde(flatten)]
    pub options: ChatOptions,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>, options: ChatOptions) -> Self {
        Self { messages, stream: false, options }
    }

    pub fn streaming(messages: Vec<ChatMessage>, options: ChatOptions) -> Self {
        Self { messages, stream: true, options }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletion {
    pub choices: Vec<ChatChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl ChatCompletion {
    /// Content of the first choice.
    pub fn text(&self) -> Option<&str> {
        self.choices.first().map(|c| c.message.content.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatChoice {
    pub message: ChatMessage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatChunk {
    pub choices: Vec<ChunkChoice>,
}

impl ChatChunk {
    pub fn text(content: &str) -> Self {
        Self {
            choices: vec![ChunkChoice {
                delta: Delta { content: Some(content.to_string()) },
            }],
        }
    }

    /// Incremental text of the first choice, if any.
    pub fn content(&self) -> Option<&str> {
        self.choices.first()?.delta.content.as_deref()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: Delta,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    #[serde(default)]
    pub content: Option<String>,
}

/// Entry of the LLM runtime's prebuilt model catalog.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PrebuiltModel {
    pub model_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vram_required_mb: Option<f64>,
    #[serde(default)]
    pub low_resource_required: bool,
}

/// Download/initialisation progress reported while an engine loads.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadProgress {
    /// 0.0 ..= 1.0
    pub progress: f64,
    pub text: String,
}
