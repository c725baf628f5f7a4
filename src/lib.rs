//! # hw_eventsd
//!
//! A Linux daemon driving fan speeds from temperatures and putting idle
//! disks into standby.
//!
//! ## Features
//!
//! - **Fan zones**: each zone sensor samples a temperature, averages it
//!   over a window and bids a fan speed from linear rules; the zone runs at
//!   the highest bid
//! - **Any fan controller**: speeds are sent through configured commands
//!   (typically `ipmitool raw ...`) with printf-style parameters
//! - **Disks**: activity from `/proc/diskstats`, power state from `hdparm`
//!   or sysfs, temperature only when it will not wake the disk up, forced
//!   standby after inactivity
//! - **Simulation**: synthetic commands, disks and sensors for dry runs
//!
//! ## Architecture
//!
//! - [`SystemCoordinator`](coordinator::SystemCoordinator) builds the
//!   [`AppState`](app_context::AppState) and runs the services
//! - [`FanControl`](control::FanControl) owns the zones and the
//!   actuation commands
//! - [`TaskManager`](task_manager::TaskManager) runs one loop per zone
//!   sensor and per disk with forced standby
//!
//! ## Example
//!
//! ```no_run
//! use hw_eventsd::{application::Application, config::ConfigManager};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config_manager = ConfigManager::load(None).await?;
//!     Application::builder()
//!         .with_config_manager(config_manager)
//!         .build()?
//!         .run()
//!         .await
//! }
//! ```

pub mod app_context;
pub mod application;
pub mod cache;
pub mod cli;
pub mod command;
pub mod config;
pub mod control;
pub mod coordinator;
pub mod disk;
pub mod disk_status;
pub mod diskstats;
pub mod duration;
pub mod error;
pub mod providers;
pub mod rule;
pub mod sensor;
pub mod simulation;
pub mod task_manager;
pub mod temperature_sensor;
pub mod zone;
