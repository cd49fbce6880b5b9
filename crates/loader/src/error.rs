use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("failed to load runtime script from {url}: {message}")]
    Injection { url: String, message: String },

    #[error("runtime entry point did not appear within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("runtime failed to load after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: Box<LoadError> },

    #[error("runtime loader was shut down")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, LoadError>;
