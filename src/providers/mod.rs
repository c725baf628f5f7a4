//! Providers building the application state and starting the services.

pub mod app_state;
pub mod fan_control;
pub mod standby;
pub mod traits;

pub use app_state::AppStateProvider;
pub use fan_control::FanControlServiceProvider;
pub use standby::StandbyServiceProvider;
pub use traits::{AsyncProvider, ServiceProvider};
