//! Zone sensor sampling loop.
//!
//! Each [`TemperatureSensor`] belongs to one zone. It samples its source on
//! a timer, keeps a moving average, evaluates its rules and sends the
//! resulting speed bid to the zone. A rule may ask for a different sampling
//! interval while it applies.

use std::{collections::VecDeque, fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use log::{debug, error, trace};
use tokio_util::sync::CancellationToken;

use crate::{
    config::ZoneSensorCfg,
    duration::parse_optional,
    error::{Error, Result},
    rule::{Rule, hottest_first},
    sensor::TemperatureSource,
};

/// Receiver of the speed bids emitted by zone sensors.
///
/// When `want_min` or `want_max` is set the receiver substitutes its own
/// bound for `speed`.
#[async_trait]
pub trait SpeedRequester: Send + Sync {
    async fn request_speed(&self, sensor: &str, speed: i32, want_min: bool, want_max: bool);
}

pub struct TemperatureSensor {
    name: String,
    rules: Vec<Rule>,
    window: VecDeque<i32>,
    capacity: usize,
    default_timer: Duration,
    run_timer: Duration,
    min_temp: i32,
    max_temp: i32,
    reader: Option<Arc<dyn TemperatureSource>>,
    requester: Option<Arc<dyn SpeedRequester>>,
}

impl fmt::Debug for TemperatureSensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemperatureSensor")
            .field("name", &self.name)
            .field("rules", &self.rules.len())
            .field("capacity", &self.capacity)
            .field("run_timer", &self.run_timer)
            .finish()
    }
}

impl TemperatureSensor {
    /// Builds a sensor from its zone entry.
    ///
    /// The sensor `run_every` overrides `zone_timer`. The averaging window
    /// holds `average / interval` samples (rounded down), which must be at
    /// least one.
    pub fn new(
        name: impl Into<String>,
        config: &ZoneSensorCfg,
        zone_timer: Option<Duration>,
        reader: Option<Arc<dyn TemperatureSource>>,
        requester: Option<Arc<dyn SpeedRequester>>,
    ) -> Result<Self> {
        let name = name.into();
        let timer = parse_optional(&config.run_every)?
            .or(zone_timer)
            .filter(|timer| !timer.is_zero())
            .ok_or_else(|| Error::config(format!("{name}: no sampling interval (run_every)")))?;

        let average = parse_optional(&config.average)?
            .ok_or_else(|| Error::config(format!("{name}: no average duration")))?;
        let capacity = (average.as_nanos() / timer.as_nanos()) as usize;
        if capacity == 0 {
            return Err(Error::config(format!(
                "{name}: cannot keep an average of {} of data when taking values every {timer:?}",
                config.average
            )));
        }

        let mut rules = config
            .rules
            .iter()
            .map(Rule::new)
            .collect::<Result<Vec<_>>>()?;
        rules.sort_by(hottest_first);

        let min_temp = rules
            .iter()
            .map(|rule| rule.temperature_from)
            .filter(|&t| t > 0)
            .min()
            .unwrap_or(0);
        let max_temp = rules
            .iter()
            .map(|rule| rule.temperature_to)
            .filter(|&t| t > 0)
            .max()
            .unwrap_or(0);

        Ok(Self {
            name,
            rules,
            window: VecDeque::with_capacity(capacity),
            capacity,
            default_timer: timer,
            run_timer: timer,
            min_temp,
            max_temp,
            reader,
            requester,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Number of samples in the moving average.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Interval until the next sample.
    pub fn run_timer(&self) -> Duration {
        self.run_timer
    }

    /// Lowest bounded rule temperature, 0 if none.
    pub fn min_temp(&self) -> i32 {
        self.min_temp
    }

    /// Highest bounded rule temperature, 0 if none.
    pub fn max_temp(&self) -> i32 {
        self.max_temp
    }

    /// Samples forever until `token` is cancelled.
    ///
    /// The first failed reading stops the loop for good: the error is
    /// logged and returned, and the sensor stays silent afterwards.
    pub async fn run(mut self, token: CancellationToken) -> Result<()> {
        debug!("{}: sampling every {:?}", self.name, self.run_timer);
        loop {
            tokio::select! {
                () = token.cancelled() => {
                    debug!("{}: sampling stopped", self.name);
                    return Ok(());
                }
                () = tokio::time::sleep(self.run_timer) => {
                    if let Err(e) = self.tick().await {
                        error!("{e}");
                        return Err(e);
                    }
                }
            }
        }
    }

    /// Takes one sample and forwards the resulting bid.
    pub async fn tick(&mut self) -> Result<()> {
        let Some(reader) = &self.reader else {
            return Err(Error::config(format!(
                "{}: no temperature sensor attached, cancelling sampling now",
                self.name
            )));
        };
        let Some(requester) = self.requester.clone() else {
            return Err(Error::config(format!(
                "{}: no fan speed attached, cancelling sampling now",
                self.name
            )));
        };

        let sample = reader
            .read_temperature()
            .await
            .map_err(|e| prefixed(&self.name, e))?;
        let temperature = self.average(sample);
        trace!(
            "{}: {temperature}°C (average {} * {:?})",
            self.name, self.capacity, self.run_timer
        );

        if let Some(rule) = self.rules.iter().find(|r| r.match_temperature(temperature)) {
            let (speed, timer) = rule.calculate_fan_speed(temperature);
            self.run_timer = if timer.is_zero() {
                self.default_timer
            } else {
                timer
            };
            requester.request_speed(&self.name, speed, false, false).await;
            return Ok(());
        }

        if temperature > self.max_temp {
            // keep the latest timer
            requester.request_speed(&self.name, 0, false, true).await;
        } else {
            requester.request_speed(&self.name, 0, true, false).await;
            self.run_timer = self.default_timer;
        }
        Ok(())
    }

    /// Pushes a sample and returns the integer mean of the window.
    pub fn average(&mut self, temperature: i32) -> i32 {
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(temperature);
        let total: i64 = self.window.iter().map(|&t| i64::from(t)).sum();
        (total / self.window.len() as i64) as i32
    }
}

fn prefixed(name: &str, error: Error) -> Error {
    match error {
        Error::Config(msg) => Error::Config(format!("{name}: {msg}")),
        Error::Parse(msg) => Error::Parse(format!("{name}: {msg}")),
        other => other,
    }
}
