//! Wireless network association
//!
//! The station joins the access point's network and learns the gateway
//! address the server listens on; the access point brings its network up
//! and reports the address to bind. On a host both are stand-ins over an
//! already configured interface.

use std::net::{IpAddr, Ipv4Addr};

use async_trait::async_trait;

use crate::error::DriverError;

/// Station side: joins the responder's network.
#[async_trait]
pub trait WifiStation: Send {
    /// Join `ssid` and return the gateway address.
    async fn join(&mut self, ssid: &str, passphrase: &str) -> Result<IpAddr, DriverError>;

    /// Drop the association. Never fails from the caller's view.
    async fn leave(&mut self);
}

/// Access point side: hosts the network the station joins.
#[async_trait]
pub trait WifiAccessPoint: Send {
    /// Bring the network up and return the address to listen on.
    async fn bring_up(&mut self, ssid: &str, passphrase: &str) -> Result<IpAddr, DriverError>;
}

/// Host stand-in for a station: the interface is already up, so joining
/// just reports the configured gateway.
#[derive(Debug, Clone)]
pub struct HostStation {
    gateway: IpAddr,
}

impl HostStation {
    pub fn new(gateway: IpAddr) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl WifiStation for HostStation {
    async fn join(&mut self, ssid: &str, _passphrase: &str) -> Result<IpAddr, DriverError> {
        log::info!("Joined {:?}, gateway {}", ssid, self.gateway);
        Ok(self.gateway)
    }

    async fn leave(&mut self) {
        log::debug!("Left network, gateway {}", self.gateway);
    }
}

/// Host stand-in for an access point: listens on a local address.
#[derive(Debug, Clone)]
pub struct HostAccessPoint {
    bind: IpAddr,
}

impl HostAccessPoint {
    pub fn new(bind: IpAddr) -> Self {
        Self { bind }
    }
}

impl Default for HostAccessPoint {
    fn default() -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
    }
}

#[async_trait]
impl WifiAccessPoint for HostAccessPoint {
    async fn bring_up(&mut self, ssid: &str, _passphrase: &str) -> Result<IpAddr, DriverError> {
        log::info!("Access point {:?} up on {}", ssid, self.bind);
        Ok(self.bind)
    }
}
