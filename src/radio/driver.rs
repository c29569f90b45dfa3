//! Radio implementation of the transport driver
//!
//! The initiator acts as a BLE central: it scans for the configured peer
//! address, connects, discovers the link service and enables
//! notifications. The responder acts as a peripheral: it registers the
//! link service once, advertises, and adopts whichever central connects.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{timeout, Instant};

use super::gatt::LinkService;
use super::transport::{BleCentral, BleConnection, BlePeripheral};
use crate::error::DriverError;
use crate::transport::{
    Candidate, CharacteristicHandle, ConnectionHandle, PeerIdentity, TransportDriver,
    TransportKind,
};

/// The radio stack a driver runs on, by side.
pub enum RadioRole {
    Central(Arc<dyn BleCentral>),
    Peripheral(Arc<dyn BlePeripheral>),
}

struct ActiveLink {
    handle: ConnectionHandle,
    conn: Box<dyn BleConnection>,
    characteristic: Option<CharacteristicHandle>,
}

pub struct RadioDriver {
    role: RadioRole,
    service: LinkService,
    discovering: bool,
    /// Handles of our own registered table (peripheral only).
    registered: Option<CharacteristicHandle>,
    /// A central that connected while we were advertising, not yet adopted.
    pending: Option<Box<dyn BleConnection>>,
    active: Option<ActiveLink>,
    next_handle: u32,
}

impl RadioDriver {
    pub fn new(role: RadioRole, service: LinkService) -> Self {
        Self {
            role,
            service,
            discovering: false,
            registered: None,
            pending: None,
            active: None,
            next_handle: 1,
        }
    }

    pub fn central(central: Arc<dyn BleCentral>, service: LinkService) -> Self {
        Self::new(RadioRole::Central(central), service)
    }

    pub fn peripheral(peripheral: Arc<dyn BlePeripheral>, service: LinkService) -> Self {
        Self::new(RadioRole::Peripheral(peripheral), service)
    }

    /// Whether a scan or advertisement is outstanding.
    pub fn is_discovering(&self) -> bool {
        self.discovering
    }

    fn link(&self, handle: ConnectionHandle) -> Result<&ActiveLink, DriverError> {
        match &self.active {
            Some(link) if link.handle == handle => Ok(link),
            _ => Err(DriverError::UnknownHandle(handle)),
        }
    }

    fn install(&mut self, conn: Box<dyn BleConnection>) -> ConnectionHandle {
        let handle = ConnectionHandle(self.next_handle);
        self.next_handle = self.next_handle.wrapping_add(1);
        self.active = Some(ActiveLink {
            handle,
            conn,
            characteristic: None,
        });
        handle
    }

    async fn ensure_registered(
        &mut self,
        peripheral: &Arc<dyn BlePeripheral>,
    ) -> Result<CharacteristicHandle, DriverError> {
        if let Some(handles) = self.registered {
            return Ok(handles);
        }
        let table = peripheral
            .register_services(vec![self.service.definition()])
            .await?;
        let handles = self.service.resolve(&table)?;
        log::info!(
            "Registered service {} (write 0x{:04x}, notify 0x{:04x})",
            self.service.service_uuid,
            handles.write,
            handles.notify
        );
        self.registered = Some(handles);
        Ok(handles)
    }

    /// Which handle inbound values arrive on for this side.
    fn inbound_handle(&self, characteristic: &CharacteristicHandle) -> u16 {
        match self.role {
            RadioRole::Central(_) => characteristic.notify,
            RadioRole::Peripheral(_) => characteristic.write,
        }
    }

    /// Which handle outbound values are sent on for this side.
    fn outbound_handle(&self, characteristic: &CharacteristicHandle) -> u16 {
        match self.role {
            RadioRole::Central(_) => characteristic.write,
            RadioRole::Peripheral(_) => characteristic.notify,
        }
    }
}

#[async_trait]
impl TransportDriver for RadioDriver {
    fn kind(&self) -> TransportKind {
        TransportKind::Radio
    }

    async fn begin_discovery(&mut self, filter: &PeerIdentity) -> Result<(), DriverError> {
        if self.discovering {
            return Ok(());
        }
        match &self.role {
            RadioRole::Central(central) => {
                let central = Arc::clone(central);
                // Never leave two scans outstanding.
                let _ = central.stop_scan().await;
                central.start_scan().await?;
                if let PeerIdentity::Radio { address } = filter {
                    log::info!("Scanning for {}", address);
                }
            }
            RadioRole::Peripheral(peripheral) => {
                let peripheral = Arc::clone(peripheral);
                self.ensure_registered(&peripheral).await?;
                peripheral
                    .start_advertising(self.service.advertisement())
                    .await?;
                log::info!("Advertising as {:?}", self.service.advertised_name);
            }
        }
        self.discovering = true;
        Ok(())
    }

    async fn stop_discovery(&mut self) {
        if !self.discovering {
            return;
        }
        let result = match &self.role {
            RadioRole::Central(central) => central.stop_scan().await,
            RadioRole::Peripheral(peripheral) => peripheral.stop_advertising().await,
        };
        if let Err(e) = result {
            log::debug!("Stopping discovery failed: {}", e);
        }
        self.discovering = false;
    }

    async fn poll_discovery(
        &mut self,
        filter: &PeerIdentity,
        wait: Duration,
    ) -> Result<Option<Candidate>, DriverError> {
        match &self.role {
            RadioRole::Central(central) => {
                let PeerIdentity::Radio { address: wanted } = filter else {
                    return Err(DriverError::Scan(
                        "radio discovery needs a hardware address filter".to_string(),
                    ));
                };
                let deadline = Instant::now() + wait;
                loop {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    let Some(adv) = central.next_advertisement(remaining).await? else {
                        return Ok(None);
                    };
                    if adv.source_address == *wanted {
                        return Ok(Some(Candidate::Advertiser {
                            address: adv.source_address,
                            rssi: adv.rssi,
                        }));
                    }
                    log::debug!("Ignoring advertisement from {}", adv.source_address);
                    if remaining.is_zero() {
                        return Ok(None);
                    }
                }
            }
            RadioRole::Peripheral(peripheral) => {
                match timeout(wait, peripheral.accept()).await {
                    Ok(Ok(conn)) => {
                        let peer = conn.peer_address().to_string();
                        // Connected peripherals stop advertising.
                        self.discovering = false;
                        self.pending = Some(conn);
                        Ok(Some(Candidate::Inbound { peer }))
                    }
                    Ok(Err(e)) => Err(e.into()),
                    Err(_) => Ok(None),
                }
            }
        }
    }

    async fn attempt_connect(&mut self, candidate: Candidate) -> Result<ConnectionHandle, DriverError> {
        if let Some(stale) = self.active.take() {
            let _ = stale.conn.disconnect().await;
        }
        let conn = match (&self.role, candidate) {
            (RadioRole::Central(central), Candidate::Advertiser { address, .. }) => {
                central.connect(&address).await?
            }
            (RadioRole::Peripheral(_), Candidate::Inbound { .. }) => self
                .pending
                .take()
                .ok_or_else(|| DriverError::Connection("no pending central".to_string()))?,
            (_, other) => {
                return Err(DriverError::Connection(format!(
                    "radio driver cannot connect to {}",
                    other
                )))
            }
        };
        log::info!("Connected to {}", conn.peer_address());
        Ok(self.install(conn))
    }

    async fn negotiate(
        &mut self,
        handle: ConnectionHandle,
    ) -> Result<Option<CharacteristicHandle>, DriverError> {
        let characteristic = match &self.role {
            RadioRole::Central(_) => {
                let link = self.link(handle)?;
                let table = link.conn.discover_services().await?;
                let resolved = self.service.resolve(&table)?;
                link.conn.subscribe(resolved.notify).await?;
                resolved
            }
            RadioRole::Peripheral(_) => {
                self.link(handle)?;
                self.registered.ok_or_else(|| {
                    DriverError::Gatt("service was never registered".to_string())
                })?
            }
        };
        if let Some(link) = self.active.as_mut() {
            link.characteristic = Some(characteristic);
        }
        Ok(Some(characteristic))
    }

    async fn send(&mut self, handle: ConnectionHandle, bytes: &[u8]) -> Result<(), DriverError> {
        let link = self.link(handle)?;
        let characteristic = link
            .characteristic
            .ok_or_else(|| DriverError::Gatt("characteristics not negotiated".to_string()))?;
        let target = self.outbound_handle(&characteristic);
        link.conn.write(target, bytes).await?;
        Ok(())
    }

    async fn poll_receive(
        &mut self,
        handle: ConnectionHandle,
        wait: Duration,
    ) -> Result<Option<Vec<u8>>, DriverError> {
        let link = self.link(handle)?;
        let characteristic = link
            .characteristic
            .ok_or_else(|| DriverError::Gatt("characteristics not negotiated".to_string()))?;
        let expected = self.inbound_handle(&characteristic);
        match timeout(wait, link.conn.recv()).await {
            Ok(Ok((value_handle, data))) if value_handle == expected => Ok(Some(data)),
            Ok(Ok((value_handle, _))) => {
                log::debug!("Ignoring value on unexpected handle 0x{:04x}", value_handle);
                Ok(None)
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) if !link.conn.is_connected() => Err(DriverError::Disconnected),
            Err(_) => Ok(None),
        }
    }

    async fn close(&mut self, handle: ConnectionHandle) {
        match self.active.take() {
            Some(link) if link.handle == handle => {
                if let Err(e) = link.conn.disconnect().await {
                    log::debug!("Disconnect of {} failed: {}", handle, e);
                }
            }
            other => self.active = other,
        }
    }
}
