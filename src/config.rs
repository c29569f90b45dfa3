//! Link configuration
//!
//! Everything the firmware hard-coded (peer address, network credentials,
//! service identifiers, timing constants) lives here. Every field has a
//! default, so an empty JSON object is a valid configuration.

use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ConfigError;
use crate::radio::gatt::{NOTIFY_CHARACTERISTIC_UUID, SERVICE_UUID, WRITE_CHARACTERISTIC_UUID};
use crate::radio::{BleAddress, LinkService};
use crate::transport::{PeerIdentity, TransportKind};

/// Which side of the pair this device plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Central or station: scans, joins and connects.
    Initiator,
    /// Peripheral or access point: advertises, listens and accepts.
    Responder,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Initiator => write!(f, "initiator"),
            Role::Responder => write!(f, "responder"),
        }
    }
}

/// The payload carried over the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    /// Text greeting answered with a suffixed echo.
    Greeting,
    /// One-way ADC samples driving an output level on the peer.
    Sensor,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    pub kind: ExchangeKind,
    /// The side that speaks first each period. For the sensor exchange this
    /// is the side that samples.
    pub originator: Role,
    pub message: String,
    pub suffix: String,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            kind: ExchangeKind::Greeting,
            originator: Role::Responder,
            message: "hello".to_string(),
            suffix: " world".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TransportConfig {
    Radio {
        #[serde(default = "default_peer_address")]
        peer_address: BleAddress,
        #[serde(default = "default_advertised_name")]
        advertised_name: String,
        #[serde(default = "default_service_uuid")]
        service_uuid: Uuid,
        #[serde(default = "default_write_uuid")]
        write_characteristic_uuid: Uuid,
        #[serde(default = "default_notify_uuid")]
        notify_characteristic_uuid: Uuid,
    },
    Network {
        #[serde(default = "default_ssid")]
        ssid: String,
        #[serde(default = "default_passphrase")]
        passphrase: String,
        #[serde(default = "default_port")]
        port: u16,
        /// Address the station connects to after joining.
        #[serde(default = "default_gateway")]
        gateway: IpAddr,
        /// Address the access point listens on.
        #[serde(default = "default_bind")]
        bind: IpAddr,
    },
}

fn default_peer_address() -> BleAddress {
    BleAddress([0xdc, 0x06, 0x75, 0x68, 0x0b, 0x52])
}

fn default_advertised_name() -> String {
    "ESP32_BLE_Server".to_string()
}

fn default_service_uuid() -> Uuid {
    SERVICE_UUID
}

fn default_write_uuid() -> Uuid {
    WRITE_CHARACTERISTIC_UUID
}

fn default_notify_uuid() -> Uuid {
    NOTIFY_CHARACTERISTIC_UUID
}

fn default_ssid() -> String {
    "ESP32_AP".to_string()
}

fn default_passphrase() -> String {
    "12345678".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_gateway() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(192, 168, 4, 1))
}

fn default_bind() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

impl TransportConfig {
    pub fn radio() -> Self {
        TransportConfig::Radio {
            peer_address: default_peer_address(),
            advertised_name: default_advertised_name(),
            service_uuid: default_service_uuid(),
            write_characteristic_uuid: default_write_uuid(),
            notify_characteristic_uuid: default_notify_uuid(),
        }
    }

    pub fn network() -> Self {
        TransportConfig::Network {
            ssid: default_ssid(),
            passphrase: default_passphrase(),
            port: default_port(),
            gateway: default_gateway(),
            bind: default_bind(),
        }
    }

    pub fn kind(&self) -> TransportKind {
        match self {
            TransportConfig::Radio { .. } => TransportKind::Radio,
            TransportConfig::Network { .. } => TransportKind::Network,
        }
    }

    /// The identity filter the driver discovers by.
    pub fn identity(&self) -> PeerIdentity {
        match self {
            TransportConfig::Radio { peer_address, .. } => PeerIdentity::Radio {
                address: *peer_address,
            },
            TransportConfig::Network {
                ssid,
                passphrase,
                port,
                ..
            } => PeerIdentity::Network {
                ssid: ssid.clone(),
                passphrase: passphrase.clone(),
                port: *port,
            },
        }
    }

    /// GATT identifiers for the radio transport; `None` for the network.
    pub fn link_service(&self) -> Option<LinkService> {
        match self {
            TransportConfig::Radio {
                advertised_name,
                service_uuid,
                write_characteristic_uuid,
                notify_characteristic_uuid,
                ..
            } => Some(LinkService {
                advertised_name: advertised_name.clone(),
                service_uuid: *service_uuid,
                write_uuid: *write_characteristic_uuid,
                notify_uuid: *notify_characteristic_uuid,
            }),
            TransportConfig::Network { .. } => None,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::radio()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Consecutive counted failures that force a restart.
    pub ceiling: u32,
    /// Minimum spacing between connection attempts.
    pub min_interval_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            ceiling: 5,
            min_interval_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub exchange_period_ms: u64,
    /// Silence longer than `timeout_multiplier * exchange_period_ms` after
    /// the last exchange is a fault.
    pub timeout_multiplier: u32,
    pub discovery_window_ms: u64,
    pub connect_timeout_ms: u64,
    pub negotiation_timeout_ms: u64,
    pub join_timeout_ms: u64,
    pub receive_poll_ms: u64,
    pub tick_ms: u64,
    pub boot_delay_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            exchange_period_ms: 5000,
            timeout_multiplier: 2,
            discovery_window_ms: 10_000,
            connect_timeout_ms: 5000,
            negotiation_timeout_ms: 5000,
            join_timeout_ms: 30_000,
            receive_poll_ms: 100,
            tick_ms: 100,
            boot_delay_ms: 1000,
        }
    }
}

impl TimingConfig {
    pub fn exchange_timeout_ms(&self) -> u64 {
        self.exchange_period_ms
            .saturating_mul(u64::from(self.timeout_multiplier))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn negotiation_timeout(&self) -> Duration {
        Duration::from_millis(self.negotiation_timeout_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn receive_poll(&self) -> Duration {
        Duration::from_millis(self.receive_poll_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Level a full-scale sample maps to.
    pub max: u16,
    /// Changes smaller than this are not applied.
    pub threshold: u16,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            max: 255,
            threshold: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Largest value the ADC produces.
    pub full_scale: u16,
    /// Samples averaged into each transmitted reading.
    pub smoothing_window: usize,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            full_scale: 4095,
            smoothing_window: 5,
        }
    }
}

/// Complete configuration of one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub role: Role,
    pub exchange: ExchangeConfig,
    pub transport: TransportConfig,
    pub retry: RetryConfig,
    pub timing: TimingConfig,
    pub output: OutputConfig,
    pub sensor: SensorConfig,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            role: Role::Initiator,
            exchange: ExchangeConfig::default(),
            transport: TransportConfig::default(),
            retry: RetryConfig::default(),
            timing: TimingConfig::default(),
            output: OutputConfig::default(),
            sensor: SensorConfig::default(),
        }
    }
}

impl LinkConfig {
    /// Load and validate a JSON configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read(path)?;
        let config: LinkConfig = serde_json::from_slice(&data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// The same configuration for the other side of the pair.
    pub fn for_role(&self, role: Role) -> Self {
        Self {
            role,
            ..self.clone()
        }
    }

    /// Whether this device originates each exchange cycle.
    pub fn originates(&self) -> bool {
        self.role == self.exchange.originator
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.retry.ceiling < 1 {
            return invalid("retry.ceiling must be at least 1");
        }
        if self.timing.exchange_period_ms == 0 {
            return invalid("timing.exchange_period_ms must be positive");
        }
        if self.timing.timeout_multiplier < 1 {
            return invalid("timing.timeout_multiplier must be at least 1");
        }
        if self.timing.tick_ms == 0 || self.timing.receive_poll_ms == 0 {
            return invalid("timing.tick_ms and timing.receive_poll_ms must be positive");
        }
        if self.sensor.smoothing_window < 1 {
            return invalid("sensor.smoothing_window must be at least 1");
        }
        if self.sensor.full_scale == 0 {
            return invalid("sensor.full_scale must be positive");
        }
        if self.exchange.kind == ExchangeKind::Greeting && self.exchange.message.is_empty() {
            return invalid("exchange.message must not be empty");
        }
        if let TransportConfig::Network {
            ssid, passphrase, ..
        } = &self.transport
        {
            if ssid.is_empty() || ssid.len() > 32 {
                return invalid("network ssid must be 1 to 32 bytes");
            }
            if passphrase.len() < 8 || passphrase.len() > 63 {
                return invalid("network passphrase must be 8 to 63 bytes");
            }
        }
        Ok(())
    }
}
