//! System coordinator: builds the state, starts the services, waits for a
//! termination signal and shuts everything down.

use std::sync::Arc;

use anyhow::{Context, Result};
use log::{error, info, warn};
use tokio::signal::unix::{SignalKind, signal};

use crate::{
    app_context::AppState,
    config::ConfigManager,
    providers::{
        AppStateProvider, AsyncProvider, FanControlServiceProvider, ServiceProvider,
        StandbyServiceProvider,
    },
    task_manager::TaskManager,
};

/// Manages the lifecycle of every service.
pub struct SystemCoordinator {
    task_manager: TaskManager,
    shared_state: Option<Arc<AppState>>,
    service_providers: Vec<Box<dyn ServiceProvider>>,
}

impl Default for SystemCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemCoordinator {
    pub fn new() -> Self {
        Self {
            task_manager: TaskManager::new(),
            shared_state: None,
            service_providers: Vec::new(),
        }
    }

    /// Builds every component from the configuration and registers the
    /// services. Any configuration error aborts here.
    pub async fn initialize(&mut self, config_manager: ConfigManager, seed: u64) -> Result<()> {
        info!("Initializing SystemCoordinator...");

        let state = AppStateProvider::new(config_manager, seed)
            .provide()
            .await
            .context("Failed to initialize application state")?;
        self.shared_state = Some(state.clone());

        let mut providers: Vec<Box<dyn ServiceProvider>> = vec![
            Box::new(FanControlServiceProvider::new(state.clone())),
            Box::new(StandbyServiceProvider::new(state)),
        ];
        providers.sort_by_key(|p| std::cmp::Reverse(p.priority()));
        self.service_providers = providers;

        info!(
            "Registered {} service providers in priority order",
            self.service_providers.len()
        );
        Ok(())
    }

    /// Starts the services in priority order. Critical services must start,
    /// the others may fail with a warning.
    pub async fn start_all_services(&mut self) -> Result<()> {
        for provider in &self.service_providers {
            match provider.start(&mut self.task_manager).await {
                Ok(()) => info!(
                    "Service '{}' started (priority: {}, critical: {})",
                    provider.name(),
                    provider.priority(),
                    provider.is_critical()
                ),
                Err(e) if provider.is_critical() => {
                    return Err(e).with_context(|| {
                        format!("Critical service '{}' failed to start", provider.name())
                    });
                }
                Err(e) => warn!(
                    "Non-critical service '{}' failed to start: {e:#}",
                    provider.name()
                ),
            }
        }
        info!(
            "{} tasks running",
            self.task_manager.running_count()
        );
        Ok(())
    }

    /// Waits for Ctrl-C or SIGTERM, then shuts down.
    pub async fn run_main_loop(&mut self) -> Result<()> {
        let mut terminate =
            signal(SignalKind::terminate()).context("Failed to listen for SIGTERM")?;

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl+C")?;
                info!("Received Ctrl+C, initiating graceful shutdown...");
            }
            _ = terminate.recv() => {
                info!("Received SIGTERM, initiating graceful shutdown...");
            }
        }

        self.shutdown().await
    }

    /// Stops every task, then hands the fans back with the exit command.
    pub async fn shutdown(&mut self) -> Result<()> {
        info!("Initiating graceful shutdown...");

        if let Err(e) = self.task_manager.shutdown_all().await {
            error!("Error during task shutdown: {e:#}");
        }

        if let Some(fan_control) = self
            .shared_state
            .as_ref()
            .and_then(|state| state.fan_control.as_ref())
        {
            if let Err(e) = fan_control.lock().await.control().exit().await {
                error!("Fan control exit command failed: {e}");
            }
        }

        info!("Shutdown complete");
        Ok(())
    }

    pub fn state(&self) -> Option<&Arc<AppState>> {
        self.shared_state.as_ref()
    }

    pub fn running_services(&self) -> Vec<&'static str> {
        self.service_providers.iter().map(|p| p.name()).collect()
    }
}
