use std::sync::Arc;

use crate::core::AppConfig;
use crate::deepseek::{CompletionProvider, DeepSeekClient};

pub struct AppState {
    pub config: AppConfig,
    // Each request drives its own upstream call through this; nothing
    // else is shared between requests.
    pub provider: Arc<dyn CompletionProvider>,
}

impl AppState {
    pub fn new(config: AppConfig, provider: Arc<dyn CompletionProvider>) -> Self {
        Self { config, provider }
    }

    pub fn from_config(config: AppConfig) -> Self {
        let provider = Arc::new(DeepSeekClient::from_config(&config));
        Self::new(config, provider)
    }
}

pub type SharedState = Arc<AppState>;
