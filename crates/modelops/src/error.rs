use loader::LoadError;
use thiserror::Error;

/// Cloneable so one failure can be handed to every caller sharing a load.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error(transparent)]
    Library(#[from] LoadError),

    #[error("failed to load model {model_id}: {message}")]
    Factory { model_id: String, message: String },

    #[error("library not loaded yet")]
    LibraryNotReady,

    #[error("feature not enabled: WebLLM support is disabled in the provider config")]
    FeatureDisabled,

    #[error("no active LLM session: load a model first")]
    NoSession,

    #[error("engine error: {0}")]
    Engine(String),

    #[error("inference error: {0}")]
    Inference(String),

    #[error("unexpected runtime output: {0}")]
    InvalidOutput(String),

    #[error("load of model {model_id} was abandoned")]
    Abandoned { model_id: String },
}

pub type Result<T> = std::result::Result<T, ModelError>;
