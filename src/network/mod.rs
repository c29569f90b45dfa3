//! Local wireless network transport
//!
//! The responder runs an access point with a single TCP listener; the
//! initiator joins as a station and connects to the gateway address.

pub mod driver;
pub mod wifi;

pub use driver::{NetworkDriver, NetworkRole};
pub use wifi::{HostAccessPoint, HostStation, WifiAccessPoint, WifiStation};
