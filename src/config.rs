//! Configuration management for the hw_eventsd daemon.
//!
//! Handles loading, parsing, and validation of the YAML configuration file
//! that declares power-status probes, sensors, disks and fan zones.

use std::{
    collections::BTreeMap,
    env,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::duration::parse_optional;

/// Main configuration structure for the hw_eventsd daemon.
///
/// # Example
///
/// ```yaml
/// disk_power_status:
///   hdparm:
///     check_command: "hdparm -C $DEVICE"
///     active: "active/idle"
///     standby: "standby"
///     sleeping: "sleeping"
///     standby_command: "hdparm -y $DEVICE"
///
/// sensors:
///   cpu:
///     file: "/sys/class/hwmon/hwmon*/temp1_input"
///     divider: 1000
///
/// disks:
///   data:
///     device: "/dev/disk/by-id/ata-WDC_WD40EFRX"
///     standby_after: "30m"
///
/// fan_control:
///   set_command: "ipmitool raw 0x30 0x70 0x66 0x01 $FAN_ZONE $FAN_SPEED"
///   parameters:
///     FAN_ZONE:
///       format: "0x%02x"
///   zones:
///     system:
///       id: 0
///       run_every: "15s"
///       sensors:
///         cpu:
///           average: "1m"
///           rules:
///             - temperature: { from: 40, to: 70 }
///               fan_speed: { from: 30, to: 100 }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Replace every command, power probe and sensor with synthetic values.
    #[serde(default)]
    pub simulation: bool,

    /// Named disk power-status probes.
    #[serde(default)]
    pub disk_power_status: BTreeMap<String, PowerStatusCfg>,

    /// Named temperature sources.
    #[serde(default)]
    pub sensors: BTreeMap<String, SensorCfg>,

    /// Physical disks to watch.
    #[serde(default)]
    pub disks: BTreeMap<String, DiskCfg>,

    /// Fan actuation and zones. Absent means no fan control.
    #[serde(default)]
    pub fan_control: Option<FanControlCfg>,
}

/// How to query (and change) a disk power state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerStatusCfg {
    /// Command printing the power state; takes precedence over `file`.
    pub check_command: String,
    /// Status file (glob allowed, must match exactly one file).
    pub file: String,
    /// Marker found in the output when the disk spins.
    pub active: String,
    pub standby: String,
    pub sleeping: String,
    /// Command putting the disk into standby.
    pub standby_command: String,
    pub timeout: String,
}

/// How several sensor files are combined into one value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    #[default]
    Average,
    Max,
    Min,
}

/// Temperature source: a command, a single file, or a set of file globs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorCfg {
    pub command: String,
    /// First capture group replaces the command output when it matches.
    pub regexp: String,
    pub file: String,
    pub files: Vec<String>,
    /// Raw value is divided by this when positive (sysfs reports m°C).
    pub divider: i32,
    pub aggregation: Aggregation,
    pub timeout: String,
}

/// When a disk temperature may be read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorTemperature {
    #[default]
    Never,
    Always,
    /// Only when the disk spins and is not idle, to avoid waking it up.
    WhenActive,
}

/// Physical disk configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskCfg {
    /// Device node or a symlink to it (`/dev/disk/by-id/...`).
    pub device: String,
    /// Name of a `disk_power_status` entry.
    pub power_status: String,
    /// Name of a `sensors` entry used for the disk temperature.
    pub temperature_sensor: String,
    pub monitor_temperature: MonitorTemperature,
    /// Inactivity after which the disk counts as idle (default 1m).
    pub last_active: String,
    /// Inactivity after which the disk is put into standby; empty disables.
    pub standby_after: String,
}

/// Fan actuation commands and zones.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FanControlCfg {
    pub init_command: String,
    /// Receives `$FAN_ZONE` and `$FAN_SPEED`.
    pub set_command: String,
    pub exit_command: String,
    pub timeout: String,
    /// printf-style formats for the substituted parameters.
    pub parameters: BTreeMap<String, ParameterCfg>,
    pub zones: BTreeMap<String, FanZoneCfg>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterCfg {
    pub format: String,
}

/// A group of fans sharing one speed output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FanZoneCfg {
    pub id: i32,
    pub min_speed: i32,
    pub max_speed: i32,
    pub default_speed: i32,
    /// Default sampling interval of the zone sensors.
    pub run_every: String,
    /// Sensor or disk name → rules.
    pub sensors: BTreeMap<String, ZoneSensorCfg>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoneSensorCfg {
    /// Moving average window, at least one sampling interval long.
    pub average: String,
    /// Overrides the zone sampling interval.
    pub run_every: String,
    pub rules: Vec<RuleCfg>,
}

/// Temperature range to fan speed segment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleCfg {
    pub temperature: FromTo,
    pub fan_speed: SetFromTo,
    /// Sampling interval while this rule is active.
    pub run_every: String,
}

/// Range bounds; 0 leaves that side open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FromTo {
    pub from: i32,
    pub to: i32,
}

/// Either a fixed `set` speed or a `from`..`to` interpolation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SetFromTo {
    pub set: i32,
    pub from: i32,
    pub to: i32,
}

impl Config {
    /// Parses a YAML document.
    pub fn from_yaml(content: &str) -> Result<Self> {
        // an empty document ("---") deserializes to null
        let config: Option<Config> =
            serde_yaml::from_str(content).context("Failed to parse YAML configuration")?;
        Ok(config.unwrap_or_default())
    }

    /// Validates the configuration for consistency.
    ///
    /// Rejects malformed durations and a fan control section with zones but
    /// no set command. Zone sensors that resolve to nothing are only
    /// reported: such a sensor stops on its first reading.
    pub fn validate(&self) -> Result<()> {
        for (name, status) in &self.disk_power_status {
            parse_optional(&status.timeout)
                .with_context(|| format!("disk_power_status '{name}'"))?;
        }
        for (name, sensor) in &self.sensors {
            parse_optional(&sensor.timeout).with_context(|| format!("sensor '{name}'"))?;
        }
        for (name, disk) in &self.disks {
            parse_optional(&disk.last_active).with_context(|| format!("disk '{name}'"))?;
            parse_optional(&disk.standby_after).with_context(|| format!("disk '{name}'"))?;
            if !disk.power_status.is_empty() && !self.disk_power_status.contains_key(&disk.power_status)
            {
                warn!(
                    "disk '{name}' references unknown power status '{}'",
                    disk.power_status
                );
            }
        }

        let Some(fan_control) = &self.fan_control else {
            return Ok(());
        };
        if !fan_control.zones.is_empty() && fan_control.set_command.trim().is_empty() {
            anyhow::bail!("fan_control has zones but no set_command");
        }
        parse_optional(&fan_control.timeout).context("fan_control timeout")?;
        for (zone_name, zone) in &fan_control.zones {
            parse_optional(&zone.run_every).with_context(|| format!("zone '{zone_name}'"))?;
            for (sensor_name, sensor) in &zone.sensors {
                let context = || format!("zone '{zone_name}' sensor '{sensor_name}'");
                if parse_optional(&sensor.average).with_context(context)?.is_none() {
                    anyhow::bail!("{} has no average duration", context());
                }
                parse_optional(&sensor.run_every).with_context(context)?;
                for rule in &sensor.rules {
                    parse_optional(&rule.run_every).with_context(context)?;
                }
                if !self.sensors.contains_key(sensor_name) && !self.disks.contains_key(sensor_name)
                {
                    warn!("{} names neither a sensor nor a disk", context());
                }
            }
        }
        Ok(())
    }
}

fn locate_config() -> Result<PathBuf> {
    if let Ok(env_path) = env::var("HW_EVENTSD_CONFIG") {
        return Ok(PathBuf::from(env_path));
    }

    if let Some(mut cfg_dir) = env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| env::var_os("HOME").map(|h| Path::new(&h).join(".config")))
    {
        cfg_dir.push("hw_eventsd/config.yml");
        if cfg_dir.exists() {
            return Ok(cfg_dir);
        }
    }

    let etc = Path::new("/etc/hw_eventsd/config.yml");
    if etc.exists() {
        return Ok(etc.to_path_buf());
    }

    anyhow::bail!("Configuration file not found in any standard location")
}

/// Configuration manager owning the parsed configuration and its origin.
///
/// # Example
///
/// ```no_run
/// use hw_eventsd::config::ConfigManager;
/// use std::path::PathBuf;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config_manager = ConfigManager::load(Some(PathBuf::from("config.yml"))).await?;
/// let simulation = config_manager.get().await.simulation;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: Arc<RwLock<Config>>,
    path: PathBuf,
}

impl ConfigManager {
    pub fn new(config: Config, path: PathBuf) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            path,
        }
    }

    /// Loads configuration from file or standard locations.
    ///
    /// Searches in order:
    /// 1. Provided path parameter
    /// 2. HW_EVENTSD_CONFIG environment variable
    /// 3. XDG_CONFIG_HOME/hw_eventsd/config.yml or ~/.config/hw_eventsd/config.yml
    /// 4. /etc/hw_eventsd/config.yml
    pub async fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p,
            None => locate_config().context("No configuration file found")?,
        };

        info!("Loading config from: {}", config_path.display());
        let config = Self::load_config_from_path(&config_path).await?;

        Ok(Self::new(config, config_path))
    }

    pub async fn get(&self) -> tokio::sync::RwLockReadGuard<'_, Config> {
        self.config.read().await
    }

    /// Forces simulation mode regardless of the file content.
    pub async fn enable_simulation(&self) {
        self.config.write().await.simulation = true;
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn clone_config(&self) -> Config {
        self.config.read().await.clone()
    }

    async fn load_config_from_path(path: &Path) -> Result<Config> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config = Config::from_yaml(&content)
            .with_context(|| format!("Failed to parse YAML in: {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("Configuration validation failed for: {}", path.display()))?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(content.as_bytes()).unwrap();
        temp_file.flush().unwrap();
        temp_file
    }

    const FULL: &str = r#"
simulation: false
disk_power_status:
  hdparm:
    check_command: "hdparm -C $DEVICE"
    active: "active/idle"
    standby: "standby"
    sleeping: "sleeping"
    standby_command: "hdparm -y $DEVICE"
    timeout: "5s"
sensors:
  cpu:
    file: "/sys/class/hwmon/hwmon0/temp1_input"
    divider: 1000
  smartctl:
    command: "smartctl -A $DEVICE"
    regexp: 'Temperature_Celsius.*\s(\d+)$'
  cores:
    files: ["/sys/class/hwmon/hwmon1/temp*_input"]
    aggregation: max
disks:
  disk1:
    device: "/dev/sda"
    power_status: hdparm
    temperature_sensor: smartctl
    monitor_temperature: when_active
    last_active: "10m"
    standby_after: "30m"
fan_control:
  set_command: "ipmitool raw 0x30 0x70 0x66 0x01 $FAN_ZONE $FAN_SPEED"
  timeout: "3s"
  parameters:
    FAN_ZONE:
      format: "0x%02x"
  zones:
    system:
      id: 0
      min_speed: 20
      run_every: "15s"
      sensors:
        cpu:
          average: "1m"
          rules:
            - temperature: { from: 40, to: 70 }
              fan_speed: { from: 30, to: 100 }
              run_every: "5s"
            - temperature: { from: 70 }
              fan_speed: { set: 100 }
        disk1:
          average: "30s"
          rules:
            - temperature: { to: 45 }
              fan_speed: { set: 30 }
"#;

    #[test]
    fn empty_configuration() {
        let config = Config::from_yaml("---").unwrap();
        assert_eq!(config.disks.len(), 0);
        assert!(config.fan_control.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn simple_configuration() {
        let content = r#"---
disks:
  # comment
  disk1:
    device: "/dev/sda"
    temperature_sensor: smartctl
    monitor_temperature: always
  disk2:
    device: "/dev/sdb"
    temperature_sensor: none
    monitor_temperature: never
"#;
        let config = Config::from_yaml(content).unwrap();
        assert_eq!(config.disks.len(), 2);
        assert_eq!(
            config.disks["disk1"].monitor_temperature,
            MonitorTemperature::Always
        );
    }

    #[test]
    fn full_configuration() {
        let config = Config::from_yaml(FULL).unwrap();
        config.validate().unwrap();

        assert_eq!(config.sensors["cores"].aggregation, Aggregation::Max);
        assert_eq!(config.sensors["cpu"].divider, 1000);
        assert_eq!(
            config.disks["disk1"].monitor_temperature,
            MonitorTemperature::WhenActive
        );

        let fan_control = config.fan_control.unwrap();
        assert_eq!(fan_control.parameters["FAN_ZONE"].format, "0x%02x");
        let zone = &fan_control.zones["system"];
        assert_eq!(zone.min_speed, 20);
        let cpu = &zone.sensors["cpu"];
        assert_eq!(cpu.rules.len(), 2);
        assert_eq!(cpu.rules[0].temperature, FromTo { from: 40, to: 70 });
        assert_eq!(
            cpu.rules[1].fan_speed,
            SetFromTo {
                set: 100,
                from: 0,
                to: 0
            }
        );
    }

    #[test]
    fn zones_without_set_command_are_rejected() {
        let content = r#"
fan_control:
  zones:
    system:
      run_every: "10s"
"#;
        let config = Config::from_yaml(content).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("set_command"));
    }

    #[test]
    fn zone_sensor_without_average_is_rejected() {
        let content = FULL.replace("          average: \"30s\"\n", "");
        let config = Config::from_yaml(&content).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("disk1"));
    }

    #[test]
    fn invalid_durations_are_rejected() {
        let content = r#"
disks:
  disk1:
    device: "/dev/sda"
    standby_after: "thirty minutes"
"#;
        let config = Config::from_yaml(content).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_aggregation_fails_to_parse() {
        let content = r#"
sensors:
  cpu:
    files: ["/tmp/x"]
    aggregation: median
"#;
        assert!(Config::from_yaml(content).is_err());
    }

    #[tokio::test]
    async fn config_manager_loads_file() {
        let temp_file = create_temp_config(FULL);
        let manager = ConfigManager::load(Some(temp_file.path().to_path_buf()))
            .await
            .unwrap();
        assert_eq!(manager.path(), temp_file.path());
        assert_eq!(manager.get().await.disks.len(), 1);

        manager.enable_simulation().await;
        assert!(manager.clone_config().await.simulation);
    }

    #[tokio::test]
    async fn config_manager_reports_missing_file() {
        let err = ConfigManager::load(Some(PathBuf::from("/nonexistent/hw_eventsd.yml")))
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("Failed to read config file"));
    }
}
