//! Advisory catalog queries against the LLM runtime. Both fail soft.

use tracing::debug;

use crate::active::EngineSessionManager;
use crate::schema::PrebuiltModel;

impl EngineSessionManager {
    /// The runtime's prebuilt model list, or empty when unavailable.
    pub fn available_models(&self) -> Vec<PrebuiltModel> {
        self.inner
            .provider
            .runtime()
            .and_then(|rt| rt.prebuilt_models())
            .unwrap_or_default()
    }

    /// Whether the runtime has `model_id` cached locally; false when the
    /// runtime is absent, lacks a cache probe, or the probe fails.
    pub async fn has_model_in_cache(&self, model_id: &str) -> bool {
        let Some(runtime) = self.inner.provider.runtime() else {
            return false;
        };
        match runtime.has_model_in_cache(model_id).await {
            Some(Ok(cached)) => cached,
            Some(Err(e)) => {
                debug!(model_id, error=%e, "cache probe failed");
                false
            }
            None => false,
        }
    }
}
