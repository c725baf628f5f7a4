use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::{app_context::AppState, providers::traits::ServiceProvider, task_manager::TaskManager};

/// Forced standby service: one watch loop per disk with `standby_after`.
pub struct StandbyServiceProvider {
    state: Arc<AppState>,
}

impl StandbyServiceProvider {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl ServiceProvider for StandbyServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        for (name, disk) in &self.state.disks {
            if !disk.has_forced_standby() {
                continue;
            }
            let disk = disk.clone();
            task_manager
                .spawn_task(format!("standby/{name}"), move |token| async move {
                    disk.standby_watch(token).await;
                    Ok(())
                })
                .await?;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "StandbyService"
    }

    fn priority(&self) -> i32 {
        5
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{Config, ConfigManager},
        diskstats::DiskstatsReader,
    };
    use std::{fs, path::PathBuf, time::Duration};
    use tempfile::TempDir;

    #[tokio::test]
    async fn watches_only_disks_with_forced_standby() {
        let dir = TempDir::new().unwrap();
        for device in ["sda", "sdb"] {
            fs::write(dir.path().join(device), "").unwrap();
        }
        fs::write(dir.path().join("diskstats"), "").unwrap();
        let yaml = format!(
            r#"
simulation: true
disk_power_status:
  hdparm:
    check_command: "hdparm -C $DEVICE"
    standby_command: "hdparm -y $DEVICE"
disks:
  archive:
    device: "{root}/sda"
    standby_after: "30m"
  system:
    device: "{root}/sdb"
"#,
            root = dir.path().display()
        );
        let manager = ConfigManager::new(
            Config::from_yaml(&yaml).unwrap(),
            PathBuf::from("/tmp/hw_eventsd.yml"),
        );
        let diskstats = Arc::new(DiskstatsReader::new(
            dir.path().join("diskstats"),
            Duration::from_secs(60),
        ));
        let state = Arc::new(
            AppState::with_diskstats(manager, 42, diskstats)
                .await
                .unwrap(),
        );

        let mut task_manager = TaskManager::new();
        StandbyServiceProvider::new(state)
            .start(&mut task_manager)
            .await
            .unwrap();
        assert_eq!(task_manager.active_count(), 1);
        assert!(task_manager.is_running("standby/archive"));
        task_manager.shutdown_all().await.unwrap();
    }
}
