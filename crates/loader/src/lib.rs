//! Runtime Library Loader
//!
//! Side-loads an inference runtime by injecting a module script into the host
//! document, polls the shared global namespace until the runtime publishes its
//! entry point, and retries with exponential backoff when it does not.

mod backoff;
mod error;
mod host;
mod machine;
mod namespace;
mod poller;
mod script;
mod signal;
mod status;

pub use backoff::RetryPolicy;
pub use error::{LoadError, Result};
pub use host::{Module, ModuleHost, ScriptElement};
pub use machine::{
    ErrorCallback, LibraryLoader, LoaderConfig, DEFAULT_LOAD_TIMEOUT, DEFAULT_MAX_RETRIES,
    POLL_INTERVAL,
};
pub use namespace::{EntryPointProbe, GlobalNamespace, ReadinessProbe};
pub use poller::{PollHandle, PollOutcome, Poller};
pub use script::{ErrorReporter, InjectedScript, ScriptHost, ScriptId, ScriptSpec};
pub use signal::{ReadyListener, ReadySignal};
pub use status::LoadStatus;
