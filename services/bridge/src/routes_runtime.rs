use axum::{extract::State, Json};
use loader::LibraryLoader;
use serde_json::{json, Value};

use crate::state::SharedState;

fn loader_view(loader: &LibraryLoader) -> Value {
    json!({
        "module_url": loader.config().module_url,
        "status": loader.status(),
        "attempts": loader.attempts(),
        "error": loader.last_error().map(|e| e.to_string()),
    })
}

pub async fn get_runtime(State(st): State<SharedState>) -> Json<Value> {
    let provider = &st.provider;

    let webllm = provider.webllm_loader().ok().map(loader_view);
    let session = provider.webllm().ok().map(|s| s.state());

    Json(json!({
        "backends": {
            "pipeline": st.cfg.pipeline_url,
            "llm": st.cfg.llm_url,
        },
        "transformers": loader_view(provider.transformers_loader()),
        "webllm": webllm,
        "session": session,
    }))
}
