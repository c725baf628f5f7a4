//! Disk power state probes.
//!
//! A [`DiskStatus`] reads the power state of a disk from a command output
//! (`hdparm -C`, `smartctl -n standby`) or from a status file, and can put
//! the disk into standby.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use log::{debug, trace};
use tokio::sync::Mutex;

use crate::{
    command::{self, CommandRunner, Expander, expand_vars},
    config::PowerStatusCfg,
    duration::parse_optional,
    error::{Error, Result},
    sensor::read_globbed_file,
};

/// Power state of a disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum DiskPowerState {
    #[default]
    Unknown,
    Active,
    Standby,
    Sleeping,
}

impl fmt::Display for DiskPowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "unknown",
            Self::Active => "active",
            Self::Standby => "standby",
            Self::Sleeping => "sleeping",
        };
        f.write_str(name)
    }
}

/// Reads and changes the power state of the disk named by the expander.
#[async_trait]
pub trait PowerStatus: Send + Sync + fmt::Debug {
    /// Current state; any failure reads as [`DiskPowerState::Unknown`].
    async fn get(&self, expand: &Expander<'_>) -> DiskPowerState;

    async fn standby(&self, expand: &Expander<'_>) -> Result<()>;
}

/// Markers searched in the probe output, in priority order.
#[derive(Debug, Clone, Default)]
struct Markers {
    active: String,
    standby: String,
    sleeping: String,
}

impl Markers {
    fn classify(&self, output: &str) -> DiskPowerState {
        let contains = |marker: &str| !marker.is_empty() && output.contains(marker);
        if contains(&self.active) {
            DiskPowerState::Active
        } else if contains(&self.standby) {
            DiskPowerState::Standby
        } else if contains(&self.sleeping) {
            DiskPowerState::Sleeping
        } else {
            DiskPowerState::Unknown
        }
    }
}

#[derive(Debug)]
pub struct DiskStatus {
    name: String,
    check_command: Option<Arc<dyn CommandRunner>>,
    file: Option<String>,
    standby_command: Option<Arc<dyn CommandRunner>>,
    markers: Markers,
    lock: Mutex<()>,
}

impl DiskStatus {
    pub fn new(name: impl Into<String>, config: &PowerStatusCfg) -> Result<Self> {
        let timeout = parse_optional(&config.timeout)?;
        Ok(Self::with_commands(
            name,
            config,
            command::build_optional(&config.check_command, timeout, false)?,
            command::build_optional(&config.standby_command, timeout, false)?,
        ))
    }

    /// Same as [`DiskStatus::new`] with the commands already built.
    pub fn with_commands(
        name: impl Into<String>,
        config: &PowerStatusCfg,
        check_command: Option<Arc<dyn CommandRunner>>,
        standby_command: Option<Arc<dyn CommandRunner>>,
    ) -> Self {
        Self {
            name: name.into(),
            check_command,
            file: Some(config.file.clone()).filter(|file| !file.is_empty()),
            standby_command,
            markers: Markers {
                active: config.active.clone(),
                standby: config.standby.clone(),
                sleeping: config.sleeping.clone(),
            },
            lock: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn probe(&self, expand: &Expander<'_>) -> Result<String> {
        if let Some(command) = &self.check_command {
            return command.run(None, Some(expand)).await;
        }
        if let Some(file) = &self.file {
            return read_globbed_file(&expand_vars(file, expand)).await;
        }
        Err(Error::config(format!(
            "{}: neither check_command nor file defined",
            self.name
        )))
    }
}

#[async_trait]
impl PowerStatus for DiskStatus {
    async fn get(&self, expand: &Expander<'_>) -> DiskPowerState {
        let _guard = self.lock.lock().await;
        match self.probe(expand).await {
            Ok(output) => {
                let state = self.markers.classify(output.trim());
                trace!("{}: {state}", self.name);
                state
            }
            Err(e) => {
                debug!("{}: cannot read power status: {e}", self.name);
                DiskPowerState::Unknown
            }
        }
    }

    async fn standby(&self, expand: &Expander<'_>) -> Result<()> {
        let _guard = self.lock.lock().await;
        let Some(command) = &self.standby_command else {
            return Err(Error::config(
                "no command defined to put the disk in standby mode",
            ));
        };
        command.run(None, Some(expand)).await.map(|_| ())
    }
}
