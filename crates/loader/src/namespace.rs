//! Shared global namespace that side-loaded runtimes publish into.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

type Value = Arc<dyn Any + Send + Sync>;

/// Stand-in for the host's global object: `global -> property -> value`.
/// Written by executed modules, read by probes and runtime providers.
#[derive(Clone, Default)]
pub struct GlobalNamespace {
    globals: Arc<RwLock<HashMap<String, HashMap<String, Value>>>>,
}

impl GlobalNamespace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish<T: Any + Send + Sync>(&self, global: &str, property: &str, value: T) {
        self.globals
            .write()
            .entry(global.to_string())
            .or_default()
            .insert(property.to_string(), Arc::new(value));
    }

    pub fn get<T: Any + Clone>(&self, global: &str, property: &str) -> Option<T> {
        let globals = self.globals.read();
        globals
            .get(global)?
            .get(property)?
            .downcast_ref::<T>()
            .cloned()
    }

    pub fn contains(&self, global: &str, property: &str) -> bool {
        self.globals
            .read()
            .get(global)
            .is_some_and(|g| g.contains_key(property))
    }
}

pub trait ReadinessProbe: Send + Sync {
    fn is_ready(&self) -> bool;
}

/// Ready once `global.entry_point` exists.
#[derive(Clone)]
pub struct EntryPointProbe {
    namespace: GlobalNamespace,
    global: String,
    entry_point: String,
}

impl EntryPointProbe {
    pub fn new(namespace: GlobalNamespace, global: &str, entry_point: &str) -> Self {
        Self {
            namespace,
            global: global.to_string(),
            entry_point: entry_point.to_string(),
        }
    }
}

impl ReadinessProbe for EntryPointProbe {
    fn is_ready(&self) -> bool {
        self.namespace.contains(&self.global, &self.entry_point)
    }
}
