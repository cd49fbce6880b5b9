//! In-process script host.
//!
//! Keeps the list of script elements currently in the document head and
//! "executes" an injected script by running the module registered for its URL
//! against the shared namespace.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::{GlobalNamespace, InjectedScript, Result, ScriptHost, ScriptId, ScriptSpec};

/// Code behind a module URL. Publishing entry points into the namespace is
/// how a module signals that it loaded.
#[async_trait]
pub trait Module: Send + Sync {
    async fn execute(&self, namespace: &GlobalNamespace, spec: &ScriptSpec) -> anyhow::Result<()>;
}

#[async_trait]
impl<F> Module for F
where
    F: Fn(&GlobalNamespace, &ScriptSpec) -> anyhow::Result<()> + Send + Sync,
{
    async fn execute(&self, namespace: &GlobalNamespace, spec: &ScriptSpec) -> anyhow::Result<()> {
        self(namespace, spec)
    }
}

#[derive(Clone, Debug)]
pub struct ScriptElement {
    pub id: ScriptId,
    pub module_url: String,
    pub nonce: Option<String>,
    pub body: String,
}

pub struct ModuleHost {
    namespace: GlobalNamespace,
    modules: RwLock<HashMap<String, Arc<dyn Module>>>,
    head: Mutex<Vec<ScriptElement>>,
    injections: AtomicUsize,
}

impl ModuleHost {
    pub fn new(namespace: GlobalNamespace) -> Self {
        Self {
            namespace,
            modules: RwLock::new(HashMap::new()),
            head: Mutex::new(Vec::new()),
            injections: AtomicUsize::new(0),
        }
    }

    pub fn register(&self, url: &str, module: impl Module + 'static) {
        self.modules.write().insert(url.to_string(), Arc::new(module));
    }

    pub fn namespace(&self) -> &GlobalNamespace {
        &self.namespace
    }

    /// Elements currently attached to the document head.
    pub fn elements(&self) -> Vec<ScriptElement> {
        self.head.lock().clone()
    }

    /// Total number of injections over the host's lifetime.
    pub fn injection_count(&self) -> usize {
        self.injections.load(Ordering::SeqCst)
    }
}

impl ScriptHost for ModuleHost {
    fn inject(&self, spec: &ScriptSpec) -> Result<InjectedScript> {
        self.head.lock().push(ScriptElement {
            id: spec.id,
            module_url: spec.module_url.clone(),
            nonce: spec.nonce.clone(),
            body: spec.body(),
        });
        self.injections.fetch_add(1, Ordering::SeqCst);

        let (script, reporter) = InjectedScript::channel(spec.id);
        let module = self.modules.read().get(&spec.module_url).cloned();
        let namespace = self.namespace.clone();
        let spec = spec.clone();

        tokio::spawn(async move {
            let Some(module) = module else {
                reporter.report(format!("failed to fetch module {}", spec.module_url));
                return;
            };
            if let Err(e) = module.execute(&namespace, &spec).await {
                reporter.report(format!("{e:#}"));
            }
        });

        debug!(script=%script.id, "script element inserted");
        Ok(script)
    }

    fn remove(&self, id: ScriptId) {
        self.head.lock().retain(|e| e.id != id);
    }
}
