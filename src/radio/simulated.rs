//! In-process radio simulator
//!
//! Provides a simulated air where devices can advertise, scan, connect and
//! exchange GATT writes and notifications entirely in-process. Used by the
//! tests and by `pairlink simulate` on hosts without radio hardware.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::time::{sleep_until, Instant};

use super::transport::{
    BleAddress, BleAdvertisement, BleCentral, BleConnection, BlePeripheral, GattCharacteristic,
    GattService, GattServiceDef,
};
use super::BleError;

/// How often an advertiser is heard by a scanning device.
pub const ADVERTISING_INTERVAL: Duration = Duration::from_millis(100);

/// RSSI reported for every simulated advertisement.
const SIM_RSSI: i16 = -50;

/// First attribute handle handed out by service registration.
const FIRST_ATTRIBUTE_HANDLE: u16 = 0x0010;

struct Advertiser {
    data: Vec<u8>,
    conn_tx: mpsc::Sender<Box<dyn BleConnection>>,
    services: Arc<Vec<GattService>>,
}

/// The simulated "air" shared by every device created from it.
pub struct SimRadioNetwork {
    /// Peripherals currently advertising, keyed by address.
    advertisers: Mutex<HashMap<BleAddress, Advertiser>>,
    /// Wakes scanners when a new advertiser appears.
    advertised: Notify,
    /// Every link formed on this network, for fault injection.
    links: std::sync::Mutex<Vec<Weak<LinkShared>>>,
    next_address: AtomicU32,
    refused_connects: AtomicU32,
}

impl SimRadioNetwork {
    /// Create a new simulated radio network.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            advertisers: Mutex::new(HashMap::new()),
            advertised: Notify::new(),
            links: std::sync::Mutex::new(Vec::new()),
            next_address: AtomicU32::new(1),
            refused_connects: AtomicU32::new(0),
        })
    }

    /// Create a device with a locally administered address.
    pub fn create_device(self: &Arc<Self>) -> SimRadioDevice {
        let n = self.next_address.fetch_add(1, Ordering::SeqCst).to_be_bytes();
        self.create_device_with_address(BleAddress([0x02, 0x00, n[0], n[1], n[2], n[3]]))
    }

    /// Create a device with a fixed address, e.g. the configured peer address.
    pub fn create_device_with_address(self: &Arc<Self>, address: BleAddress) -> SimRadioDevice {
        let (conn_tx, conn_rx) = mpsc::channel(16);
        SimRadioDevice {
            address,
            network: Arc::clone(self),
            mtu: 247,
            latency: Duration::ZERO,
            conn_tx,
            conn_rx: Mutex::new(conn_rx),
            services: Mutex::new(Arc::new(Vec::new())),
            scanning: AtomicBool::new(false),
            heard_at: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Make the next `count` connection attempts fail.
    pub fn refuse_connections(&self, count: u32) {
        self.refused_connects.store(count, Ordering::SeqCst);
    }

    /// Drop every live link on the network, as if the peers walked out of
    /// range. Returns how many links were severed.
    pub fn sever_links(&self) -> usize {
        let mut links = match self.links.lock() {
            Ok(links) => links,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut severed = 0;
        links.retain(|weak| match weak.upgrade() {
            Some(link) => {
                if link.is_up() {
                    link.sever();
                    severed += 1;
                }
                false
            }
            None => false,
        });
        severed
    }

    /// Whether a device is currently advertising.
    pub async fn is_advertising(&self, address: &BleAddress) -> bool {
        self.advertisers.lock().await.contains_key(address)
    }

    fn track(&self, link: &Arc<LinkShared>) {
        let mut links = match self.links.lock() {
            Ok(links) => links,
            Err(poisoned) => poisoned.into_inner(),
        };
        links.retain(|weak| weak.strong_count() > 0);
        links.push(Arc::downgrade(link));
    }

    fn take_refusal(&self) -> bool {
        self.refused_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// A simulated device that can act as both central and peripheral.
pub struct SimRadioDevice {
    address: BleAddress,
    network: Arc<SimRadioNetwork>,
    mtu: usize,
    /// Simulated link-layer latency applied to each write.
    latency: Duration,
    /// Sender used to deliver incoming connections (registered while advertising).
    conn_tx: mpsc::Sender<Box<dyn BleConnection>>,
    /// Receiver for incoming connections (peripheral role).
    conn_rx: Mutex<mpsc::Receiver<Box<dyn BleConnection>>>,
    /// Registered GATT table (peripheral role).
    services: Mutex<Arc<Vec<GattService>>>,
    scanning: AtomicBool,
    /// When each advertiser was last reported to this scanner.
    heard_at: std::sync::Mutex<HashMap<BleAddress, Instant>>,
}

impl SimRadioDevice {
    /// Get this device's BLE address.
    pub fn address(&self) -> &BleAddress {
        &self.address
    }

    /// Set the MTU for connections created by this device.
    pub fn set_mtu(&mut self, mtu: usize) {
        self.mtu = mtu;
    }

    /// Set the simulated link-layer latency for connections created by this
    /// device. Uses tokio time, so paused clocks advance instantly in tests.
    pub fn set_latency(&mut self, latency: Duration) {
        self.latency = latency;
    }

    /// Report one advertiser that is due to be heard, or the earliest
    /// instant one will be.
    async fn hear(&self, now: Instant) -> (Option<BleAdvertisement>, Option<Instant>) {
        let advertisers = self.network.advertisers.lock().await;
        let mut heard_at = match self.heard_at.lock() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };

        let mut addresses: Vec<&BleAddress> =
            advertisers.keys().filter(|a| **a != self.address).collect();
        addresses.sort();

        let mut next_due: Option<Instant> = None;
        for address in addresses {
            let due = heard_at
                .get(address)
                .map(|last| *last + ADVERTISING_INTERVAL)
                .unwrap_or(now);
            if due <= now {
                heard_at.insert(*address, now);
                let adv = &advertisers[address];
                return (
                    Some(BleAdvertisement {
                        data: adv.data.clone(),
                        rssi: Some(SIM_RSSI),
                        source_address: *address,
                    }),
                    None,
                );
            }
            next_due = Some(next_due.map_or(due, |d| d.min(due)));
        }
        (None, next_due)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Central,
    Peripheral,
}

/// State shared by both ends of one simulated link.
struct LinkShared {
    central_up: AtomicBool,
    peripheral_up: AtomicBool,
    subscribed: AtomicBool,
    down: Notify,
    services: Arc<Vec<GattService>>,
}

impl LinkShared {
    fn is_up(&self) -> bool {
        self.central_up.load(Ordering::SeqCst) && self.peripheral_up.load(Ordering::SeqCst)
    }

    fn sever(&self) {
        self.central_up.store(false, Ordering::SeqCst);
        self.peripheral_up.store(false, Ordering::SeqCst);
        self.down.notify_waiters();
    }

    fn characteristic(&self, value_handle: u16) -> Option<&GattCharacteristic> {
        self.services
            .iter()
            .flat_map(|s| s.characteristics.iter())
            .find(|c| c.value_handle == value_handle)
    }
}

/// One end of a simulated link backed by tokio mpsc channels.
pub struct SimRadioConnection {
    side: Side,
    tx: mpsc::Sender<(u16, Vec<u8>)>,
    rx: Mutex<mpsc::Receiver<(u16, Vec<u8>)>>,
    shared: Arc<LinkShared>,
    peer_address: BleAddress,
    mtu: usize,
    latency: Duration,
}

impl SimRadioConnection {
    /// Create both ends of a link between a central and a peripheral.
    fn create_pair(
        central: BleAddress,
        peripheral: BleAddress,
        shared: Arc<LinkShared>,
        mtu: usize,
        latency: Duration,
    ) -> (SimRadioConnection, SimRadioConnection) {
        let (tx_cp, rx_cp) = mpsc::channel(64);
        let (tx_pc, rx_pc) = mpsc::channel(64);

        let conn_central = SimRadioConnection {
            side: Side::Central,
            tx: tx_cp,
            rx: Mutex::new(rx_pc),
            shared: Arc::clone(&shared),
            peer_address: peripheral,
            mtu,
            latency,
        };
        let conn_peripheral = SimRadioConnection {
            side: Side::Peripheral,
            tx: tx_pc,
            rx: Mutex::new(rx_cp),
            shared,
            peer_address: central,
            mtu,
            latency,
        };
        (conn_central, conn_peripheral)
    }

    fn mark_down(&self) {
        match self.side {
            Side::Central => self.shared.central_up.store(false, Ordering::SeqCst),
            Side::Peripheral => self.shared.peripheral_up.store(false, Ordering::SeqCst),
        }
        self.shared.down.notify_waiters();
    }
}

impl Drop for SimRadioConnection {
    fn drop(&mut self) {
        self.mark_down();
    }
}

#[async_trait]
impl BleConnection for SimRadioConnection {
    async fn write(&self, value_handle: u16, data: &[u8]) -> Result<(), BleError> {
        if !self.is_connected() {
            return Err(BleError::Disconnected);
        }
        if data.len() > self.mtu {
            return Err(BleError::MtuExceeded {
                size: data.len(),
                mtu: self.mtu,
            });
        }
        let characteristic = self.shared.characteristic(value_handle).ok_or_else(|| {
            BleError::GattError(format!("unknown value handle 0x{:04x}", value_handle))
        })?;
        match self.side {
            Side::Central if !characteristic.properties.write => {
                return Err(BleError::GattError(format!(
                    "handle 0x{:04x} is not writable",
                    value_handle
                )));
            }
            Side::Peripheral if !characteristic.properties.notify => {
                return Err(BleError::GattError(format!(
                    "handle 0x{:04x} does not notify",
                    value_handle
                )));
            }
            // Notifications nobody subscribed to go nowhere.
            Side::Peripheral if !self.shared.subscribed.load(Ordering::SeqCst) => return Ok(()),
            _ => {}
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.tx
            .try_send((value_handle, data.to_vec()))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => BleError::Timeout,
                mpsc::error::TrySendError::Closed(_) => BleError::Disconnected,
            })
    }

    async fn recv(&self) -> Result<(u16, Vec<u8>), BleError> {
        let mut rx = self.rx.lock().await;
        let down = self.shared.down.notified();
        tokio::pin!(down);
        down.as_mut().enable();
        if !self.is_connected() {
            return Err(BleError::Disconnected);
        }
        tokio::select! {
            message = rx.recv() => message.ok_or(BleError::Disconnected),
            _ = &mut down => Err(BleError::Disconnected),
        }
    }

    async fn discover_services(&self) -> Result<Vec<GattService>, BleError> {
        if !self.is_connected() {
            return Err(BleError::Disconnected);
        }
        Ok(self.shared.services.as_ref().clone())
    }

    async fn subscribe(&self, value_handle: u16) -> Result<(), BleError> {
        if !self.is_connected() {
            return Err(BleError::Disconnected);
        }
        if self.side != Side::Central {
            return Err(BleError::GattError("only a central can subscribe".to_string()));
        }
        match self.shared.characteristic(value_handle) {
            Some(c) if c.properties.notify => {
                self.shared.subscribed.store(true, Ordering::SeqCst);
                Ok(())
            }
            _ => Err(BleError::GattError(format!(
                "handle 0x{:04x} does not support notifications",
                value_handle
            ))),
        }
    }

    async fn disconnect(&self) -> Result<(), BleError> {
        self.mark_down();
        Ok(())
    }

    fn rssi(&self) -> Option<i16> {
        Some(SIM_RSSI)
    }

    fn peer_address(&self) -> &BleAddress {
        &self.peer_address
    }

    fn is_connected(&self) -> bool {
        self.shared.is_up()
    }
}

#[async_trait]
impl BleCentral for SimRadioDevice {
    async fn start_scan(&self) -> Result<(), BleError> {
        self.scanning.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), BleError> {
        self.scanning.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn next_advertisement(
        &self,
        timeout: Duration,
    ) -> Result<Option<BleAdvertisement>, BleError> {
        if !self.scanning.load(Ordering::SeqCst) {
            return Err(BleError::ScanError("scan not started".to_string()));
        }
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.network.advertised.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let (adv, next_due) = self.hear(Instant::now()).await;
            if adv.is_some() {
                return Ok(adv);
            }
            let wake = next_due.map_or(deadline, |due| due.min(deadline));
            tokio::select! {
                _ = &mut notified => {}
                _ = sleep_until(wake) => {
                    if Instant::now() >= deadline {
                        return Ok(None);
                    }
                }
            }
        }
    }

    async fn connect(&self, address: &BleAddress) -> Result<Box<dyn BleConnection>, BleError> {
        if self.network.take_refusal() {
            return Err(BleError::ConnectionError(format!(
                "connection to {} refused",
                address
            )));
        }

        // A peripheral stops advertising once a central connects.
        let advertiser = self
            .network
            .advertisers
            .lock()
            .await
            .remove(address)
            .ok_or_else(|| BleError::ConnectionError(format!("No peripheral at {}", address)))?;

        let shared = Arc::new(LinkShared {
            central_up: AtomicBool::new(true),
            peripheral_up: AtomicBool::new(true),
            subscribed: AtomicBool::new(false),
            down: Notify::new(),
            services: Arc::clone(&advertiser.services),
        });
        self.network.track(&shared);

        let (conn_central, conn_peripheral) =
            SimRadioConnection::create_pair(self.address, *address, shared, self.mtu, self.latency);

        advertiser
            .conn_tx
            .try_send(Box::new(conn_peripheral))
            .map_err(|_| {
                BleError::ConnectionError(
                    "Peripheral is no longer accepting connections".to_string(),
                )
            })?;

        Ok(Box::new(conn_central))
    }
}

#[async_trait]
impl BlePeripheral for SimRadioDevice {
    async fn register_services(
        &self,
        services: Vec<GattServiceDef>,
    ) -> Result<Vec<GattService>, BleError> {
        let mut next = FIRST_ATTRIBUTE_HANDLE;
        let mut registered = Vec::with_capacity(services.len());
        for service in services {
            // Service declaration.
            next += 1;
            let mut characteristics = Vec::with_capacity(service.characteristics.len());
            for def in service.characteristics {
                // Characteristic declaration, then the value attribute.
                let value_handle = next + 1;
                next += 2;
                if def.properties.notify {
                    // Client characteristic configuration descriptor.
                    next += 1;
                }
                characteristics.push(GattCharacteristic {
                    uuid: def.uuid,
                    value_handle,
                    properties: def.properties,
                });
            }
            registered.push(GattService {
                uuid: service.uuid,
                characteristics,
            });
        }
        *self.services.lock().await = Arc::new(registered.clone());
        Ok(registered)
    }

    async fn start_advertising(&self, data: Vec<u8>) -> Result<(), BleError> {
        let services = Arc::clone(&*self.services.lock().await);
        {
            let mut advertisers = self.network.advertisers.lock().await;
            advertisers.insert(
                self.address,
                Advertiser {
                    data,
                    conn_tx: self.conn_tx.clone(),
                    services,
                },
            );
        }
        self.network.advertised.notify_waiters();
        Ok(())
    }

    async fn stop_advertising(&self) -> Result<(), BleError> {
        let mut advertisers = self.network.advertisers.lock().await;
        advertisers.remove(&self.address);
        Ok(())
    }

    async fn accept(&self) -> Result<Box<dyn BleConnection>, BleError> {
        let mut rx = self.conn_rx.lock().await;
        rx.recv().await.ok_or(BleError::Disconnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::gatt::LinkService;
    use crate::transport::CharacteristicHandle;

    async fn advertising_peripheral(network: &Arc<SimRadioNetwork>) -> (SimRadioDevice, CharacteristicHandle) {
        let device = network.create_device();
        let service = LinkService::default();
        let table = device.register_services(vec![service.definition()]).await.unwrap();
        let handles = service.resolve(&table).unwrap();
        device.start_advertising(service.advertisement()).await.unwrap();
        (device, handles)
    }

    async fn connected_pair(
        network: &Arc<SimRadioNetwork>,
    ) -> (Box<dyn BleConnection>, Box<dyn BleConnection>, CharacteristicHandle) {
        let (peripheral, handles) = advertising_peripheral(network).await;
        let central = network.create_device();
        let conn_c = central.connect(peripheral.address()).await.unwrap();
        let conn_p = peripheral.accept().await.unwrap();
        (conn_c, conn_p, handles)
    }

    #[tokio::test]
    async fn test_scanner_hears_advertiser() {
        let network = SimRadioNetwork::new();
        let (peripheral, _) = advertising_peripheral(&network).await;
        let central = network.create_device();

        central.start_scan().await.unwrap();
        let adv = central
            .next_advertisement(Duration::from_millis(500))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(adv.source_address, *peripheral.address());
        assert_eq!(adv.rssi, Some(SIM_RSSI));
    }

    #[tokio::test]
    async fn test_scan_must_be_started() {
        let network = SimRadioNetwork::new();
        let central = network.create_device();
        let result = central.next_advertisement(Duration::from_millis(10)).await;
        assert!(matches!(result, Err(BleError::ScanError(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_times_out_without_advertisers() {
        let network = SimRadioNetwork::new();
        let central = network.create_device();
        central.start_scan().await.unwrap();

        let before = Instant::now();
        let adv = central.next_advertisement(Duration::from_secs(2)).await.unwrap();
        assert!(adv.is_none());
        assert!(before.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_advertiser_heard_at_advertising_interval() {
        let network = SimRadioNetwork::new();
        let _peripheral = advertising_peripheral(&network).await;
        let central = network.create_device();
        central.start_scan().await.unwrap();

        central.next_advertisement(Duration::from_secs(1)).await.unwrap().unwrap();
        let before = Instant::now();
        central.next_advertisement(Duration::from_secs(1)).await.unwrap().unwrap();
        let elapsed = before.elapsed();
        assert!(elapsed >= ADVERTISING_INTERVAL);
        assert!(elapsed < ADVERTISING_INTERVAL * 2);
    }

    #[tokio::test]
    async fn test_connected_peripheral_stops_advertising() {
        let network = SimRadioNetwork::new();
        let (peripheral, _) = advertising_peripheral(&network).await;
        let central = network.create_device();

        assert!(network.is_advertising(peripheral.address()).await);
        let _conn = central.connect(peripheral.address()).await.unwrap();
        assert!(!network.is_advertising(peripheral.address()).await);
    }

    #[tokio::test]
    async fn test_write_and_notify() {
        let network = SimRadioNetwork::new();
        let (conn_c, conn_p, handles) = connected_pair(&network).await;

        // Central -> peripheral over the writable characteristic.
        conn_c.write(handles.write, b"hello world").await.unwrap();
        let (handle, data) = conn_p.recv().await.unwrap();
        assert_eq!(handle, handles.write);
        assert_eq!(data, b"hello world");

        // Peripheral -> central once notifications are enabled.
        conn_c.subscribe(handles.notify).await.unwrap();
        conn_p.write(handles.notify, b"hello").await.unwrap();
        let (handle, data) = conn_c.recv().await.unwrap();
        assert_eq!(handle, handles.notify);
        assert_eq!(data, b"hello");
    }

    #[tokio::test(start_paused = true)]
    async fn test_notify_without_subscription_is_dropped() {
        let network = SimRadioNetwork::new();
        let (conn_c, conn_p, handles) = connected_pair(&network).await;

        conn_p.write(handles.notify, b"lost").await.unwrap();
        let result = tokio::time::timeout(Duration::from_millis(100), conn_c.recv()).await;
        assert!(result.is_err(), "nothing should arrive before subscribing");
    }

    #[tokio::test]
    async fn test_gatt_property_enforcement() {
        let network = SimRadioNetwork::new();
        let (conn_c, conn_p, handles) = connected_pair(&network).await;

        assert!(matches!(
            conn_c.write(handles.notify, b"x").await,
            Err(BleError::GattError(_))
        ));
        assert!(matches!(
            conn_p.write(handles.write, b"x").await,
            Err(BleError::GattError(_))
        ));
        assert!(matches!(conn_c.write(0x00ff, b"x").await, Err(BleError::GattError(_))));
        assert!(matches!(conn_c.subscribe(handles.write).await, Err(BleError::GattError(_))));
    }

    #[tokio::test]
    async fn test_discovered_table_matches_registration() {
        let network = SimRadioNetwork::new();
        let (conn_c, _conn_p, handles) = connected_pair(&network).await;

        let table = conn_c.discover_services().await.unwrap();
        assert_eq!(LinkService::default().resolve(&table).unwrap(), handles);
    }

    #[tokio::test]
    async fn test_disconnect() {
        let network = SimRadioNetwork::new();
        let (conn_c, conn_p, _) = connected_pair(&network).await;

        assert!(conn_c.is_connected());
        assert!(conn_p.is_connected());

        conn_c.disconnect().await.unwrap();
        assert!(!conn_c.is_connected());
        assert!(!conn_p.is_connected());
        assert!(matches!(conn_p.recv().await, Err(BleError::Disconnected)));
    }

    #[tokio::test]
    async fn test_dropping_a_connection_disconnects_the_peer() {
        let network = SimRadioNetwork::new();
        let (conn_c, conn_p, _) = connected_pair(&network).await;

        drop(conn_p);
        assert!(!conn_c.is_connected());
    }

    #[tokio::test]
    async fn test_sever_wakes_pending_receiver() {
        let network = SimRadioNetwork::new();
        let (conn_c, _conn_p, _) = connected_pair(&network).await;
        let network_clone = Arc::clone(&network);

        let (result, severed) = tokio::join!(conn_c.recv(), async move {
            tokio::task::yield_now().await;
            network_clone.sever_links()
        });
        assert_eq!(severed, 1);
        assert!(matches!(result, Err(BleError::Disconnected)));
    }

    #[tokio::test]
    async fn test_refused_connections() {
        let network = SimRadioNetwork::new();
        let (peripheral, _) = advertising_peripheral(&network).await;
        let central = network.create_device();

        network.refuse_connections(1);
        assert!(matches!(
            central.connect(peripheral.address()).await,
            Err(BleError::ConnectionError(_))
        ));
        assert!(central.connect(peripheral.address()).await.is_ok());
    }

    #[tokio::test]
    async fn test_mtu_enforcement() {
        let network = SimRadioNetwork::new();
        let (peripheral, handles) = advertising_peripheral(&network).await;
        let mut central = network.create_device();
        central.set_mtu(10);

        let conn = central.connect(peripheral.address()).await.unwrap();
        conn.write(handles.write, &[0u8; 10]).await.unwrap();
        let result = conn.write(handles.write, &[0u8; 11]).await;
        assert!(matches!(result, Err(BleError::MtuExceeded { size: 11, mtu: 10 })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_delays_write() {
        let network = SimRadioNetwork::new();
        let (peripheral, handles) = advertising_peripheral(&network).await;
        let mut central = network.create_device();
        central.set_latency(Duration::from_millis(100));

        let conn = central.connect(peripheral.address()).await.unwrap();
        let before = Instant::now();
        conn.write(handles.write, b"hello").await.unwrap();
        let elapsed = before.elapsed();
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_fixed_address_device() {
        let network = SimRadioNetwork::new();
        let address: BleAddress = "dc:06:75:68:0b:52".parse().unwrap();
        let device = network.create_device_with_address(address);
        assert_eq!(*device.address(), address);
    }
}
