//! Short-range radio transport
//!
//! Provides the BLE abstraction traits, the GATT service the two devices
//! exchange data over, an in-process simulator for hosts without radio
//! hardware, and the [`RadioDriver`] that plugs all of it into the link
//! manager.

pub mod driver;
pub mod gatt;
pub mod simulated;
pub mod transport;

use thiserror::Error;

pub use driver::{RadioDriver, RadioRole};
pub use gatt::LinkService;
pub use simulated::{SimRadioDevice, SimRadioNetwork};
pub use transport::{BleAddress, BleAdvertisement, BleCentral, BleConnection, BlePeripheral};

#[derive(Error, Debug)]
pub enum BleError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Advertising error: {0}")]
    AdvertisingError(String),

    #[error("Scan error: {0}")]
    ScanError(String),

    #[error("GATT error: {0}")]
    GattError(String),

    #[error("Payload exceeds MTU ({size} > {mtu})")]
    MtuExceeded { size: usize, mtu: usize },

    #[error("Peer disconnected")]
    Disconnected,

    #[error("Operation timed out")]
    Timeout,
}
