//! Application state provider.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::{app_context::AppState, config::ConfigManager, providers::traits::AsyncProvider};

/// Builds the [`AppState`] from the loaded configuration.
pub struct AppStateProvider {
    config_manager: ConfigManager,
    seed: u64,
}

impl AppStateProvider {
    pub const fn new(config_manager: ConfigManager, seed: u64) -> Self {
        Self {
            config_manager,
            seed,
        }
    }
}

#[async_trait]
impl AsyncProvider<Arc<AppState>> for AppStateProvider {
    async fn provide(&self) -> Result<Arc<AppState>> {
        let app_state = AppState::new(self.config_manager.clone(), self.seed).await?;
        Ok(Arc::new(app_state))
    }
}
