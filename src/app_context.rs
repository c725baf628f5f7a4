//! Application state: every component built from the configuration.

use std::{collections::BTreeMap, sync::Arc};

use anyhow::{Context, Result};
use log::{error, info};
use tokio::sync::Mutex;

use crate::{
    config::{Config, ConfigManager},
    control::FanControl,
    disk::Disk,
    disk_status::{DiskStatus, PowerStatus},
    diskstats::DiskstatsReader,
    sensor::{HardwareSensor, HwSensor, SensorReader, TemperatureSource},
    simulation::{SimulatedDiskStatus, SimulatedSensor},
};

/// Shared application state.
///
/// Built once at startup, in dependency order: power status probes, then
/// sensors, then disks (which use both), then fan control (which reads
/// sensors and disks). Nothing is rebuilt afterwards.
pub struct AppState {
    pub config_manager: Arc<ConfigManager>,
    pub power_statuses: BTreeMap<String, Arc<dyn PowerStatus>>,
    pub sensors: BTreeMap<String, Arc<dyn HardwareSensor>>,
    pub disks: BTreeMap<String, Arc<Disk>>,
    /// Taken apart by the fan control service when it starts.
    pub fan_control: Option<Mutex<FanControl>>,
    pub diskstats: Arc<DiskstatsReader>,
}

impl AppState {
    /// Builds the state, seeding simulated sensors with `seed`.
    pub async fn new(config_manager: ConfigManager, seed: u64) -> Result<Self> {
        Self::with_diskstats(config_manager, seed, Arc::new(DiskstatsReader::default())).await
    }

    /// Same as [`AppState::new`] with a specific diskstats source.
    pub async fn with_diskstats(
        config_manager: ConfigManager,
        seed: u64,
        diskstats: Arc<DiskstatsReader>,
    ) -> Result<Self> {
        let config = config_manager.clone_config().await;
        let simulate = config.simulation;
        if simulate {
            info!("simulation mode, no hardware will be touched");
        }

        let power_statuses = build_power_statuses(&config, simulate)?;
        let sensors = build_sensors(&config, simulate, seed)?;
        let disks = build_disks(&config, &power_statuses, &sensors, &diskstats);

        let fan_control = match &config.fan_control {
            Some(fan_config) => {
                let fan_control = FanControl::new(fan_config, simulate, |name| {
                    temperature_source(&sensors, &disks, name)
                })
                .context("Failed to initialize fan control")?;
                Some(Mutex::new(fan_control))
            }
            None => None,
        };

        info!(
            "{} power status probe(s), {} sensor(s), {} disk(s)",
            power_statuses.len(),
            sensors.len(),
            disks.len()
        );

        Ok(Self {
            config_manager: Arc::new(config_manager),
            power_statuses,
            sensors,
            disks,
            fan_control,
            diskstats,
        })
    }

    /// Gets a read-only reference to the current configuration.
    pub async fn config(&self) -> tokio::sync::RwLockReadGuard<'_, Config> {
        self.config_manager.get().await
    }

    /// Resolves a zone sensor name: a configured sensor first, then a disk.
    pub fn temperature_source(&self, name: &str) -> Option<Arc<dyn TemperatureSource>> {
        temperature_source(&self.sensors, &self.disks, name)
    }
}

fn temperature_source(
    sensors: &BTreeMap<String, Arc<dyn HardwareSensor>>,
    disks: &BTreeMap<String, Arc<Disk>>,
    name: &str,
) -> Option<Arc<dyn TemperatureSource>> {
    if let Some(sensor) = sensors.get(name) {
        return Some(Arc::new(SensorReader(sensor.clone())));
    }
    disks
        .get(name)
        .map(|disk| disk.clone() as Arc<dyn TemperatureSource>)
}

fn build_power_statuses(
    config: &Config,
    simulate: bool,
) -> Result<BTreeMap<String, Arc<dyn PowerStatus>>> {
    config
        .disk_power_status
        .iter()
        .map(|(name, status)| {
            let power_status: Arc<dyn PowerStatus> = if simulate {
                Arc::new(SimulatedDiskStatus::new(
                    &status.check_command,
                    &status.standby_command,
                ))
            } else {
                Arc::new(
                    DiskStatus::new(name, status)
                        .with_context(|| format!("Invalid power status '{name}'"))?,
                )
            };
            Ok((name.clone(), power_status))
        })
        .collect()
}

fn build_sensors(
    config: &Config,
    simulate: bool,
    seed: u64,
) -> Result<BTreeMap<String, Arc<dyn HardwareSensor>>> {
    config
        .sensors
        .iter()
        .enumerate()
        .map(|(index, (name, sensor))| {
            let hardware: Arc<dyn HardwareSensor> = if simulate {
                Arc::new(SimulatedSensor::new(name, seed.wrapping_add(index as u64)))
            } else {
                Arc::new(
                    HwSensor::new(name, sensor)
                        .with_context(|| format!("Invalid sensor '{name}'"))?,
                )
            };
            Ok((name.clone(), hardware))
        })
        .collect()
}

fn build_disks(
    config: &Config,
    power_statuses: &BTreeMap<String, Arc<dyn PowerStatus>>,
    sensors: &BTreeMap<String, Arc<dyn HardwareSensor>>,
    diskstats: &Arc<DiskstatsReader>,
) -> BTreeMap<String, Arc<Disk>> {
    config
        .disks
        .iter()
        .filter_map(|(name, disk)| {
            match Disk::new(name, disk, power_statuses, sensors, diskstats.clone()) {
                Ok(disk) => Some((name.clone(), Arc::new(disk))),
                Err(e) => {
                    error!("skipping disk {name:?} ({}): {e}", disk.device);
                    None
                }
            }
        })
        .collect()
}
