#![warn(clippy::unwrap_used)]

pub mod clock;
pub mod config;
pub mod error;
pub mod event_bus;
pub mod store;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::AppConfig;
pub use error::{OptimizerError, OptimizerResult};
pub use event_bus::NotificationSink;
pub use store::{CampaignStore, EventQuery, EventStore};
