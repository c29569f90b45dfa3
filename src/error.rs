//! Error types for the link manager
//!
//! `DriverError` is what a transport driver reports. `LinkError` is the
//! taxonomy the link state machine works with: every driver error is
//! translated into one of its variants at the state machine boundary.

use std::io;

use thiserror::Error;

use crate::radio::BleError;
use crate::transport::ConnectionHandle;

/// Failures reported by a transport driver.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("Operation timed out")]
    Timeout,

    #[error("Peer disconnected")]
    Disconnected,

    #[error("No active connection")]
    NotConnected,

    #[error("Unknown connection handle {0}")]
    UnknownHandle(ConnectionHandle),

    #[error("Scan error: {0}")]
    Scan(String),

    #[error("Advertising error: {0}")]
    Advertising(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("GATT error: {0}")]
    Gatt(String),

    #[error("Network join failed: {0}")]
    Join(String),

    #[error("Listener bind failed: {0}")]
    Bind(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Payload exceeds MTU ({size} > {mtu})")]
    MtuExceeded { size: usize, mtu: usize },
}

impl From<io::Error> for DriverError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => DriverError::Timeout,
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::NotConnected => DriverError::Disconnected,
            _ => DriverError::Io(err.to_string()),
        }
    }
}

impl From<BleError> for DriverError {
    fn from(err: BleError) -> Self {
        match err {
            BleError::ConnectionError(msg) => DriverError::Connection(msg),
            BleError::AdvertisingError(msg) => DriverError::Advertising(msg),
            BleError::ScanError(msg) => DriverError::Scan(msg),
            BleError::GattError(msg) => DriverError::Gatt(msg),
            BleError::MtuExceeded { size, mtu } => DriverError::MtuExceeded { size, mtu },
            BleError::Disconnected => DriverError::Disconnected,
            BleError::Timeout => DriverError::Timeout,
        }
    }
}

/// Link-level failures. Everything except `ReceiveTimeout` counts against
/// the retry ceiling.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("Discovery failed: {0}")]
    DiscoveryFailure(DriverError),

    #[error("Connect failed: {0}")]
    ConnectFailure(DriverError),

    #[error("Characteristic negotiation failed: {0}")]
    NegotiationFailure(DriverError),

    #[error("Send failed: {0}")]
    SendFailure(DriverError),

    #[error("No inbound data before the poll timeout")]
    ReceiveTimeout,

    #[error("Receive failed: {0}")]
    ReceiveFailure(DriverError),

    #[error("Peer disconnected")]
    PeerDisconnected,

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("No inbound exchange for {elapsed_ms} ms")]
    ExchangeTimeout { elapsed_ms: u64 },

    #[error("Retry ceiling reached after {count} consecutive failures")]
    RetryCeilingReached { count: u32 },
}

impl LinkError {
    /// Whether this failure increments the retry counter.
    pub fn is_counted(&self) -> bool {
        !matches!(self, LinkError::ReceiveTimeout)
    }

    /// Classify a failed send. A vanished peer is reported as a disconnect
    /// rather than a generic send failure.
    pub fn from_send(err: DriverError) -> Self {
        match err {
            DriverError::Disconnected => LinkError::PeerDisconnected,
            other => LinkError::SendFailure(other),
        }
    }

    /// Classify the outcome of a receive poll. `Ok(None)` becomes the
    /// uncounted `ReceiveTimeout`.
    pub fn from_receive(
        result: Result<Option<Vec<u8>>, DriverError>,
    ) -> Result<Vec<u8>, LinkError> {
        match result {
            Ok(Some(bytes)) => Ok(bytes),
            Ok(None) => Err(LinkError::ReceiveTimeout),
            Err(DriverError::Disconnected) => Err(LinkError::PeerDisconnected),
            Err(other) => Err(LinkError::ReceiveFailure(other)),
        }
    }
}

/// Configuration loading and validation failures.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_receive_timeout_is_uncounted() {
        assert!(!LinkError::ReceiveTimeout.is_counted());
        assert!(LinkError::PeerDisconnected.is_counted());
        assert!(LinkError::ReceiveFailure(DriverError::Io("reset".into())).is_counted());
        assert!(LinkError::MalformedPayload("odd length".into()).is_counted());
        assert!(LinkError::ExchangeTimeout { elapsed_ms: 10_001 }.is_counted());
    }

    #[test]
    fn test_receive_classification() {
        assert_eq!(LinkError::from_receive(Ok(Some(vec![1]))), Ok(vec![1]));
        assert_eq!(LinkError::from_receive(Ok(None)), Err(LinkError::ReceiveTimeout));
        assert_eq!(
            LinkError::from_receive(Err(DriverError::Disconnected)),
            Err(LinkError::PeerDisconnected)
        );
        assert_eq!(
            LinkError::from_receive(Err(DriverError::Timeout)),
            Err(LinkError::ReceiveFailure(DriverError::Timeout))
        );
    }

    #[test]
    fn test_send_classification() {
        assert_eq!(
            LinkError::from_send(DriverError::Disconnected),
            LinkError::PeerDisconnected
        );
        assert_eq!(
            LinkError::from_send(DriverError::Gatt("bad handle".into())),
            LinkError::SendFailure(DriverError::Gatt("bad handle".into()))
        );
    }

    #[test]
    fn test_io_error_mapping() {
        let reset = io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer");
        assert_eq!(DriverError::from(reset), DriverError::Disconnected);

        let timed_out = io::Error::new(io::ErrorKind::TimedOut, "slow");
        assert_eq!(DriverError::from(timed_out), DriverError::Timeout);

        let other = io::Error::new(io::ErrorKind::PermissionDenied, "nope");
        assert!(matches!(DriverError::from(other), DriverError::Io(_)));
    }

    #[test]
    fn test_ble_error_mapping() {
        assert_eq!(DriverError::from(BleError::Disconnected), DriverError::Disconnected);
        assert_eq!(
            DriverError::from(BleError::MtuExceeded { size: 30, mtu: 20 }),
            DriverError::MtuExceeded { size: 30, mtu: 20 }
        );
    }
}
