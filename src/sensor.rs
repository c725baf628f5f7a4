//! Hardware value sources: commands and sysfs files returning integers.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use log::trace;
use tokio::sync::Mutex;

use crate::{
    command::{Command, CommandRunner, Expander, expand_vars},
    config::{Aggregation, SensorCfg},
    duration::parse_optional,
    error::{Error, Result},
};

/// A configured sensor, read with optional `$DEVICE` style expansion.
#[async_trait]
pub trait HardwareSensor: Send + Sync + fmt::Debug {
    async fn get(&self, expand: Option<&Expander<'_>>) -> Result<i32>;
}

/// Temperature reader fed into a zone sensor loop.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TemperatureSource: Send + Sync {
    async fn read_temperature(&self) -> Result<i32>;
}

/// Where a [`HwSensor`] takes its raw values from.
#[derive(Debug)]
enum Input {
    Command(Arc<dyn CommandRunner>),
    /// Glob that must resolve to exactly one file.
    File(String),
    /// Globs whose matches are all read and aggregated.
    Files(Vec<String>),
}

/// Sensor backed by a command, a single file, or a set of files.
///
/// Values are parsed as integers, aggregated when there are several, then
/// divided by `divider` when positive.
#[derive(Debug)]
pub struct HwSensor {
    name: String,
    input: Input,
    divider: i32,
    aggregation: Aggregation,
    lock: Mutex<()>,
}

impl HwSensor {
    pub fn new(name: impl Into<String>, config: &SensorCfg) -> Result<Self> {
        let name = name.into();
        let input = if !config.command.is_empty() {
            let timeout = parse_optional(&config.timeout)?;
            Input::Command(Arc::new(Command::new(
                config.command.clone(),
                &config.regexp,
                timeout,
            )?))
        } else if !config.file.is_empty() {
            Input::File(config.file.clone())
        } else if !config.files.is_empty() {
            Input::Files(config.files.clone())
        } else {
            return Err(Error::config(format!(
                "sensor '{name}': one of command, file or files is required"
            )));
        };
        Ok(Self {
            name,
            input,
            divider: config.divider,
            aggregation: config.aggregation,
            lock: Mutex::new(()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn raw_values(&self, expand: Option<&Expander<'_>>) -> Result<Vec<String>> {
        let _guard = self.lock.lock().await;
        match &self.input {
            Input::Command(command) => {
                let output = command.run(None, expand).await?;
                Ok(vec![output.trim().to_string()])
            }
            Input::File(pattern) => {
                let pattern = match expand {
                    Some(mapping) => expand_vars(pattern, mapping),
                    None => pattern.clone(),
                };
                Ok(vec![read_globbed_file(&pattern).await?])
            }
            Input::Files(patterns) => {
                let mut values = Vec::new();
                for pattern in patterns {
                    for path in glob_paths(pattern)? {
                        values.push(read_trimmed(&path).await?);
                    }
                }
                Ok(values)
            }
        }
    }
}

#[async_trait]
impl HardwareSensor for HwSensor {
    async fn get(&self, expand: Option<&Expander<'_>>) -> Result<i32> {
        let raw = self.raw_values(expand).await?;
        if raw.is_empty() {
            return Err(Error::parse(format!("{}: no value returned", self.name)));
        }
        let values = raw
            .iter()
            .map(|value| {
                value.parse::<i32>().map_err(|e| {
                    Error::parse(format!("{}: invalid value {value:?}: {e}", self.name))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut value = aggregate(&values, self.aggregation);
        if self.divider > 0 {
            value /= self.divider;
        }
        trace!("{}: {value}", self.name);
        Ok(value)
    }
}

/// Reads a named sensor without device expansion.
#[derive(Debug)]
pub struct SensorReader(pub Arc<dyn HardwareSensor>);

#[async_trait]
impl TemperatureSource for SensorReader {
    async fn read_temperature(&self) -> Result<i32> {
        self.0.get(None).await
    }
}

/// Combines several readings; an empty slice gives 0.
pub fn aggregate(values: &[i32], method: Aggregation) -> i32 {
    if values.is_empty() {
        return 0;
    }
    match method {
        Aggregation::Average => {
            let total: i64 = values.iter().map(|&v| i64::from(v)).sum();
            (total / values.len() as i64) as i32
        }
        Aggregation::Max => values.iter().copied().max().unwrap_or_default(),
        Aggregation::Min => values.iter().copied().min().unwrap_or_default(),
    }
}

fn glob_paths(pattern: &str) -> Result<Vec<std::path::PathBuf>> {
    let paths = glob::glob(pattern)
        .map_err(|e| Error::config(format!("invalid file pattern {pattern:?}: {e}")))?;
    Ok(paths.filter_map(std::result::Result::ok).collect())
}

/// Reads the only file matching `pattern`, trimmed.
pub(crate) async fn read_globbed_file(pattern: &str) -> Result<String> {
    let mut matches = glob_paths(pattern)?;
    if matches.len() != 1 {
        return Err(Error::NotFound {
            pattern: pattern.to_string(),
            found: matches.len(),
        });
    }
    let path = matches.remove(0);
    trace!("reading file {}", path.display());
    read_trimmed(&path).await
}

async fn read_trimmed(path: &std::path::Path) -> Result<String> {
    let content = tokio::fs::read_to_string(path).await?;
    Ok(content.trim().to_string())
}
