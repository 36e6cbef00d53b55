use std::sync::Arc;

use curator_core::{Config, SanitizedConfig, Watcher};

/// Shared application state
pub struct AppState {
    config: Config,
    watcher: Option<Arc<Watcher>>,
}

impl AppState {
    pub fn new(config: Config, watcher: Option<Arc<Watcher>>) -> Self {
        Self { config, watcher }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn watcher(&self) -> Option<&Arc<Watcher>> {
        self.watcher.as_ref()
    }
}
