use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::oneshot;

use crate::Result;

static NEXT_SCRIPT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ScriptId(u64);

impl ScriptId {
    pub fn next() -> Self {
        Self(NEXT_SCRIPT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ScriptId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "runtime-script-{}", self.0)
    }
}

/// A module script that imports the runtime's entry points and assigns them
/// onto a global object.
#[derive(Clone, Debug)]
pub struct ScriptSpec {
    pub id: ScriptId,
    pub module_url: String,
    pub global_name: String,
    pub entry_points: Vec<String>,
    pub nonce: Option<String>,
}

impl ScriptSpec {
    pub fn body(&self) -> String {
        let names = self.entry_points.join(", ");
        format!(
            "import {{ {names} }} from '{url}';\nwindow.{global} = {{ {names} }};\n",
            url = self.module_url,
            global = self.global_name,
        )
    }
}

/// Result of inserting a script. `errors` fires at most once, when the
/// script fails to fetch or execute; it closes silently otherwise.
pub struct InjectedScript {
    pub id: ScriptId,
    pub errors: oneshot::Receiver<String>,
}

impl InjectedScript {
    pub fn channel(id: ScriptId) -> (Self, ErrorReporter) {
        let (tx, rx) = oneshot::channel();
        (Self { id, errors: rx }, ErrorReporter(tx))
    }
}

/// The `onerror` side of an injected script.
pub struct ErrorReporter(oneshot::Sender<String>);

impl ErrorReporter {
    pub fn report(self, message: impl Into<String>) {
        let _ = self.0.send(message.into());
    }
}

/// Inserts and removes script elements in the host document.
pub trait ScriptHost: Send + Sync {
    fn inject(&self, spec: &ScriptSpec) -> Result<InjectedScript>;
    fn remove(&self, id: ScriptId);
}
