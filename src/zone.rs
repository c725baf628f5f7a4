//! Fan zones: bid arbitration between the sensors sharing one fan output.

use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use log::{error, trace};
use tokio::sync::Mutex;

use crate::{
    config::FanZoneCfg,
    duration::parse_optional,
    error::{Error, Result},
    sensor::TemperatureSource,
    temperature_sensor::{SpeedRequester, TemperatureSensor},
};

pub const DEFAULT_SPEED: i32 = 50;
pub const DEFAULT_MIN_SPEED: i32 = 0;
pub const DEFAULT_MAX_SPEED: i32 = 100;

/// Sends a fan speed to the hardware.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SpeedActuator: Send + Sync {
    async fn set_speed(&self, zone_id: i32, speed: i32) -> Result<()>;
}

#[derive(Debug, Default)]
struct ZoneState {
    /// Last speed sent to the actuator; `None` until the first one.
    current_speed: Option<i32>,
    bids: HashMap<String, i32>,
}

/// One independently actuated fan output.
///
/// Every sensor of the zone bids a speed; the zone runs at the highest
/// standing bid, clamped to its bounds. A bid stays until the same sensor
/// bids again.
pub struct Zone {
    id: i32,
    name: String,
    min_speed: i32,
    max_speed: i32,
    default_speed: i32,
    state: Mutex<ZoneState>,
    actuator: Option<Arc<dyn SpeedActuator>>,
}

impl fmt::Debug for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Zone")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("min_speed", &self.min_speed)
            .field("max_speed", &self.max_speed)
            .finish_non_exhaustive()
    }
}

impl Zone {
    /// Creates a zone. Speeds left at 0 take the defaults (50, 0, 100).
    pub fn new(
        name: impl Into<String>,
        config: &FanZoneCfg,
        actuator: Option<Arc<dyn SpeedActuator>>,
    ) -> Result<Self> {
        let name = name.into();
        let or_default = |value: i32, default: i32| if value > 0 { value } else { default };
        let min_speed = or_default(config.min_speed, DEFAULT_MIN_SPEED);
        let max_speed = or_default(config.max_speed, DEFAULT_MAX_SPEED);
        if min_speed > max_speed {
            return Err(Error::config(format!(
                "zone '{name}': min_speed {min_speed} above max_speed {max_speed}"
            )));
        }
        Ok(Self {
            id: config.id,
            name,
            min_speed,
            max_speed,
            default_speed: or_default(config.default_speed, DEFAULT_SPEED),
            state: Mutex::new(ZoneState::default()),
            actuator,
        })
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn min_speed(&self) -> i32 {
        self.min_speed
    }

    pub fn max_speed(&self) -> i32 {
        self.max_speed
    }

    pub fn default_speed(&self) -> i32 {
        self.default_speed
    }

    pub async fn current_speed(&self) -> Option<i32> {
        self.state.lock().await.current_speed
    }

    /// Clamps and applies `speed`, skipping the actuator when unchanged.
    pub async fn set_speed(&self, speed: i32) {
        let mut state = self.state.lock().await;
        self.apply(&mut state, speed).await;
    }

    async fn apply(&self, state: &mut ZoneState, speed: i32) {
        let speed = speed.clamp(self.min_speed, self.max_speed);
        if state.current_speed == Some(speed) {
            return;
        }
        trace!("{}: set fan speed {speed}%", self.name);
        state.current_speed = Some(speed);
        if let Some(actuator) = &self.actuator {
            if let Err(e) = actuator.set_speed(self.id, speed).await {
                error!("{}: cannot set fan speed to {speed}%: {e}", self.name);
            }
        }
    }
}

#[async_trait]
impl SpeedRequester for Zone {
    async fn request_speed(&self, sensor: &str, speed: i32, want_min: bool, want_max: bool) {
        let speed = if want_min {
            self.min_speed
        } else if want_max {
            self.max_speed
        } else {
            speed
        };

        let mut state = self.state.lock().await;
        state.bids.insert(sensor.to_string(), speed);
        trace!("{sensor}: request fan speed {speed}%");

        let highest = state.bids.values().copied().max().unwrap_or(speed);
        self.apply(&mut state, highest).await;
    }
}

/// A zone together with the sensors bidding on it.
#[derive(Debug)]
pub struct FanZone {
    zone: Arc<Zone>,
    sensors: Vec<TemperatureSensor>,
}

impl FanZone {
    /// Builds the zone and one sampling sensor per configured entry.
    ///
    /// `reader` resolves a sensor name to its temperature source; an
    /// unresolved name still yields a sensor, which stops on its first tick.
    pub fn new<F>(
        name: &str,
        config: &FanZoneCfg,
        reader: F,
        actuator: Option<Arc<dyn SpeedActuator>>,
    ) -> Result<Self>
    where
        F: Fn(&str) -> Option<Arc<dyn TemperatureSource>>,
    {
        let zone_timer: Option<Duration> = parse_optional(&config.run_every)?;
        let zone = Arc::new(Zone::new(name, config, actuator)?);

        let sensors = config
            .sensors
            .iter()
            .map(|(sensor_name, sensor_cfg)| {
                let requester: Arc<dyn SpeedRequester> = zone.clone();
                TemperatureSensor::new(
                    sensor_name.clone(),
                    sensor_cfg,
                    zone_timer,
                    reader(sensor_name),
                    Some(requester),
                )
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { zone, sensors })
    }

    pub fn zone(&self) -> &Arc<Zone> {
        &self.zone
    }

    pub fn sensors(&self) -> &[TemperatureSensor] {
        &self.sensors
    }

    /// Hands the sensors over to whoever runs their loops.
    pub fn take_sensors(&mut self) -> Vec<TemperatureSensor> {
        std::mem::take(&mut self.sensors)
    }
}
