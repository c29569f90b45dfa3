//! BLE transport trait definitions and core types
//!
//! Defines the abstract radio interface that the simulated air and any
//! hardware-backed stack conform to.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use super::BleError;

/// A 6-byte BLE hardware address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BleAddress(pub [u8; 6]);

impl fmt::Display for BleAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}", a, b, c, d, e, g)
    }
}

impl FromStr for BleAddress {
    type Err = BleError;

    /// Accepts `dc:06:75:68:0b:52`, `dc-06-75-68-0b-52` or `dc0675680b52`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let compact: String = s.chars().filter(|c| *c != ':' && *c != '-').collect();
        let bytes = hex::decode(&compact)
            .map_err(|e| BleError::ConnectionError(format!("invalid address {:?}: {}", s, e)))?;
        let octets: [u8; 6] = bytes.try_into().map_err(|_| {
            BleError::ConnectionError(format!("address {:?} is not 6 bytes long", s))
        })?;
        Ok(BleAddress(octets))
    }
}

impl Serialize for BleAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for BleAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// A received BLE advertisement.
#[derive(Debug, Clone)]
pub struct BleAdvertisement {
    /// Raw advertisement data.
    pub data: Vec<u8>,
    /// Received signal strength indicator (if available).
    pub rssi: Option<i16>,
    /// Address of the advertising device.
    pub source_address: BleAddress,
}

/// What a characteristic allows the remote side to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CharacteristicProperties {
    pub write: bool,
    pub notify: bool,
}

/// A characteristic as declared by the peripheral before registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattCharacteristicDef {
    pub uuid: Uuid,
    pub properties: CharacteristicProperties,
}

/// A service as declared by the peripheral before registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattServiceDef {
    pub uuid: Uuid,
    pub characteristics: Vec<GattCharacteristicDef>,
}

/// A registered characteristic with its attribute value handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattCharacteristic {
    pub uuid: Uuid,
    pub value_handle: u16,
    pub properties: CharacteristicProperties,
}

/// A registered service as seen through service discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattService {
    pub uuid: Uuid,
    pub characteristics: Vec<GattCharacteristic>,
}

/// An active BLE connection to a peer.
///
/// On the central side `write` is a GATT write; on the peripheral side it
/// is a notification.
#[async_trait]
pub trait BleConnection: Send + Sync {
    /// Send data on the given characteristic value handle.
    async fn write(&self, value_handle: u16, data: &[u8]) -> Result<(), BleError>;

    /// Receive the next value and the handle it arrived on.
    async fn recv(&self) -> Result<(u16, Vec<u8>), BleError>;

    /// Enumerate the remote GATT table.
    async fn discover_services(&self) -> Result<Vec<GattService>, BleError>;

    /// Enable notifications for a value handle (CCCD write).
    async fn subscribe(&self, value_handle: u16) -> Result<(), BleError>;

    /// Disconnect from the peer.
    async fn disconnect(&self) -> Result<(), BleError>;

    /// Get the current RSSI (if supported).
    fn rssi(&self) -> Option<i16>;

    /// Get the peer's BLE address.
    fn peer_address(&self) -> &BleAddress;

    /// Check whether the connection is still active.
    fn is_connected(&self) -> bool;
}

/// BLE central role: scanning for advertisements and connecting to peripherals.
#[async_trait]
pub trait BleCentral: Send + Sync {
    /// Start scanning for BLE advertisements.
    async fn start_scan(&self) -> Result<(), BleError>;

    /// Stop scanning.
    async fn stop_scan(&self) -> Result<(), BleError>;

    /// Wait up to `timeout` for the next advertisement heard while scanning.
    async fn next_advertisement(
        &self,
        timeout: Duration,
    ) -> Result<Option<BleAdvertisement>, BleError>;

    /// Connect to a peripheral at the given address.
    async fn connect(&self, address: &BleAddress) -> Result<Box<dyn BleConnection>, BleError>;
}

/// BLE peripheral role: advertising and accepting incoming connections.
#[async_trait]
pub trait BlePeripheral: Send + Sync {
    /// Register the GATT table and return it with assigned value handles.
    async fn register_services(
        &self,
        services: Vec<GattServiceDef>,
    ) -> Result<Vec<GattService>, BleError>;

    /// Start advertising with the given data and begin accepting connections.
    async fn start_advertising(&self, data: Vec<u8>) -> Result<(), BleError>;

    /// Stop advertising.
    async fn stop_advertising(&self) -> Result<(), BleError>;

    /// Accept the next incoming connection from a central.
    async fn accept(&self) -> Result<Box<dyn BleConnection>, BleError>;
}
