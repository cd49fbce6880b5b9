use std::sync::Arc;

use modelops::Provider;

use crate::config::AppConfig;

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub provider: Provider,
    pub cfg: AppConfig,
}

impl AppState {
    pub fn new(provider: Provider, cfg: AppConfig) -> Self {
        Self { provider, cfg }
    }
}
