use std::sync::Arc;

use crate::pipeline::{AppContext, Text2SqlService};

/// Shared application state for the web server
pub struct AppState {
    pub service: Text2SqlService,
}

impl AppState {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self {
            service: Text2SqlService::new(ctx),
        }
    }

    pub fn context(&self) -> &AppContext {
        self.service.context()
    }

    /// Databases on disk for the configured dataset.
    pub async fn available_databases(&self) -> Vec<String> {
        let paths = self.context().schemas.paths().clone();
        tokio::task::spawn_blocking(move || paths.list_databases())
            .await
            .unwrap_or_default()
    }
}
