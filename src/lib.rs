// Pairlink - Resilient two-device link manager

pub mod config;
pub mod error;
pub mod exchange;
pub mod link;
pub mod network;
pub mod platform;
pub mod radio;
pub mod transport;

pub use config::{LinkConfig, Role};
pub use error::{ConfigError, DriverError, LinkError};
pub use link::{LinkManager, LinkState};
pub use platform::{HostPlatform, Platform};
pub use transport::TransportDriver;
