use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{info, warn};
use std::sync::Arc;

use crate::{app_context::AppState, providers::traits::ServiceProvider, task_manager::TaskManager};

/// Fan control service: one sampling loop per zone sensor.
///
/// Starting runs the controller init command, drives every zone to its
/// default speed and spawns the sensor loops. When the init command fails
/// the fans are left to the firmware and nothing is spawned.
pub struct FanControlServiceProvider {
    state: Arc<AppState>,
}

impl FanControlServiceProvider {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl ServiceProvider for FanControlServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let Some(fan_control) = &self.state.fan_control else {
            info!("No fan control configured");
            return Ok(());
        };
        let mut fan_control = fan_control.lock().await;

        if let Err(e) = fan_control.control().init().await {
            warn!("Fan control init failed, fans left to the firmware: {e}");
            return Ok(());
        }
        fan_control.apply_default_speeds().await;

        for (zone, sensor) in fan_control.take_sensors() {
            let name = format!("{zone}/{}", sensor.name());
            task_manager
                .spawn_task(name.clone(), move |token| async move {
                    Ok(sensor.run(token).await?)
                })
                .await
                .with_context(|| format!("Failed to start sensor {name}"))?;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "FanControlService"
    }

    fn priority(&self) -> i32 {
        10
    }

    fn is_critical(&self) -> bool {
        true
    }
}
