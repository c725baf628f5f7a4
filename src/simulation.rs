//! Synthetic hardware for running the daemon without touching any device.
//!
//! Commands only log what they would run, disks always answer "active"
//! until told to spin down, and sensors follow a bounded random walk.

use std::{collections::HashMap, sync::Mutex};

use async_trait::async_trait;
use log::debug;
use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::{
    command::{CommandRunner, Expander, expand_vars},
    disk_status::{DiskPowerState, PowerStatus},
    error::Result,
    sensor::HardwareSensor,
};

pub const DEFAULT_SEED: u64 = 42;
pub const MIN_TEMPERATURE: f64 = 20.0;
pub const MAX_TEMPERATURE: f64 = 70.0;
pub const START_TEMPERATURE: f64 = 35.0;

fn expanded(command_line: &str, expand: Option<&Expander<'_>>) -> String {
    match expand {
        Some(mapping) => expand_vars(command_line, mapping),
        None => command_line.to_string(),
    }
}

/// Command that logs its expanded line and returns an empty output.
#[derive(Debug, Clone)]
pub struct SimulatedCommand {
    command_line: String,
}

impl SimulatedCommand {
    pub fn new(command_line: impl Into<String>) -> Self {
        Self {
            command_line: command_line.into(),
        }
    }
}

#[async_trait]
impl CommandRunner for SimulatedCommand {
    async fn run(&self, _stdin: Option<&str>, expand: Option<&Expander<'_>>) -> Result<String> {
        debug!("command: {}", expanded(&self.command_line, expand));
        Ok(String::new())
    }

    fn command_line(&self) -> &str {
        &self.command_line
    }
}

/// Power state kept in memory per `$DEVICE`.
#[derive(Debug, Default)]
pub struct SimulatedDiskStatus {
    check_command: String,
    standby_command: String,
    states: Mutex<HashMap<String, DiskPowerState>>,
}

impl SimulatedDiskStatus {
    pub fn new(check_command: impl Into<String>, standby_command: impl Into<String>) -> Self {
        Self {
            check_command: check_command.into(),
            standby_command: standby_command.into(),
            states: Mutex::new(HashMap::new()),
        }
    }

    fn states(&self) -> std::sync::MutexGuard<'_, HashMap<String, DiskPowerState>> {
        self.states.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl PowerStatus for SimulatedDiskStatus {
    async fn get(&self, expand: &Expander<'_>) -> DiskPowerState {
        debug!("command: {}", expand_vars(&self.check_command, expand));
        *self
            .states()
            .entry(expand("DEVICE"))
            .or_insert(DiskPowerState::Active)
    }

    async fn standby(&self, expand: &Expander<'_>) -> Result<()> {
        debug!("command: {}", expand_vars(&self.standby_command, expand));
        self.states()
            .insert(expand("DEVICE"), DiskPowerState::Standby);
        Ok(())
    }
}

#[derive(Debug)]
struct Walk {
    rng: StdRng,
    values: HashMap<String, f64>,
}

/// Temperature following a random walk between 20 and 70 °C, one walk per
/// `$DEVICE`.
#[derive(Debug)]
pub struct SimulatedSensor {
    name: String,
    walk: Mutex<Walk>,
}

impl SimulatedSensor {
    pub fn new(name: impl Into<String>, seed: u64) -> Self {
        Self {
            name: name.into(),
            walk: Mutex::new(Walk {
                rng: StdRng::seed_from_u64(seed),
                values: HashMap::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl HardwareSensor for SimulatedSensor {
    async fn get(&self, expand: Option<&Expander<'_>>) -> Result<i32> {
        let device = expand.map(|mapping| mapping("DEVICE")).unwrap_or_default();
        let mut walk = self
            .walk
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut value = walk
            .values
            .get(&device)
            .copied()
            .unwrap_or(START_TEMPERATURE);
        // rise faster in the lower half, cool down faster in the upper half
        let pull = if value > (MAX_TEMPERATURE + MIN_TEMPERATURE) / 2.0 {
            6.0
        } else {
            4.0
        };
        value += walk.rng.random::<f64>() * 10.0 - pull;
        let value = value.clamp(MIN_TEMPERATURE, MAX_TEMPERATURE);
        walk.values.insert(device, value);
        Ok(value.round() as i32)
    }
}
