//! Transport driver capability contract
//!
//! Both the radio and the network transport implement [`TransportDriver`].
//! The link manager drives them through this trait only; connection
//! objects stay inside the driver and are referred to by an opaque
//! [`ConnectionHandle`].

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DriverError;
use crate::radio::BleAddress;

/// Which of the two interchangeable transports a driver implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Radio,
    Network,
}

impl TransportKind {
    /// Radio links resolve characteristics after connecting; network links
    /// are usable as soon as the socket is up.
    pub fn negotiates(self) -> bool {
        matches!(self, TransportKind::Radio)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Radio => write!(f, "radio"),
            TransportKind::Network => write!(f, "network"),
        }
    }
}

/// Who the link is allowed to talk to. Fixed for the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerIdentity {
    /// Hardware address the central filters scan results by.
    Radio { address: BleAddress },
    /// Network the station joins and the port both sides use.
    Network {
        ssid: String,
        passphrase: String,
        port: u16,
    },
}

/// Opaque, driver-assigned identifier of an open connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionHandle(pub u32);

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Value handles resolved during radio characteristic negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CharacteristicHandle {
    /// Characteristic the central writes to.
    pub write: u16,
    /// Characteristic the peripheral notifies on.
    pub notify: u16,
}

/// A peer found during discovery that a connection can be attempted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Candidate {
    /// An advertiser whose address matched the identity filter.
    Advertiser {
        address: BleAddress,
        rssi: Option<i16>,
    },
    /// A peer that connected to us and is parked in the driver until adopted.
    Inbound { peer: String },
    /// A reachable socket endpoint (the access point's gateway address).
    Endpoint { addr: SocketAddr },
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Candidate::Advertiser { address, rssi: Some(rssi) } => {
                write!(f, "advertiser {} (rssi {})", address, rssi)
            }
            Candidate::Advertiser { address, rssi: None } => write!(f, "advertiser {}", address),
            Candidate::Inbound { peer } => write!(f, "inbound {}", peer),
            Candidate::Endpoint { addr } => write!(f, "endpoint {}", addr),
        }
    }
}

/// Transport-specific primitives used by the link manager.
///
/// Every method that can suspend is bounded: either it takes an explicit
/// timeout or the manager wraps it in one.
#[async_trait]
pub trait TransportDriver: Send {
    /// Which transport this driver implements.
    fn kind(&self) -> TransportKind;

    /// Start scanning, advertising or listening. Calling it while already
    /// discovering is a no-op and does not reset internal timers.
    async fn begin_discovery(&mut self, filter: &PeerIdentity) -> Result<(), DriverError>;

    /// Cancel an outstanding discovery. Never fails from the caller's view.
    async fn stop_discovery(&mut self);

    /// Wait up to `timeout` for a candidate matching the identity filter.
    async fn poll_discovery(
        &mut self,
        filter: &PeerIdentity,
        timeout: Duration,
    ) -> Result<Option<Candidate>, DriverError>;

    /// Open a connection to `candidate`.
    async fn attempt_connect(&mut self, candidate: Candidate) -> Result<ConnectionHandle, DriverError>;

    /// Resolve the characteristics used for exchange. Transports without a
    /// negotiation phase return `Ok(None)` immediately.
    async fn negotiate(
        &mut self,
        handle: ConnectionHandle,
    ) -> Result<Option<CharacteristicHandle>, DriverError>;

    /// Send one message.
    async fn send(&mut self, handle: ConnectionHandle, bytes: &[u8]) -> Result<(), DriverError>;

    /// Wait up to `timeout` for one message. `Ok(None)` means nothing
    /// arrived; `Err` means the connection is broken.
    async fn poll_receive(
        &mut self,
        handle: ConnectionHandle,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>, DriverError>;

    /// Release the connection. Best effort, swallows its own errors.
    async fn close(&mut self, handle: ConnectionHandle);
}

#[cfg(test)]
pub(crate) mod scripted;
