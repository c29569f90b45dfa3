//! Network implementation of the transport driver
//!
//! Stream sockets over tokio. Each `read` is treated as one complete
//! message, matching how the peers write one message per send.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use super::wifi::{WifiAccessPoint, WifiStation};
use crate::error::DriverError;
use crate::transport::{
    Candidate, CharacteristicHandle, ConnectionHandle, PeerIdentity, TransportDriver,
    TransportKind,
};

/// Largest message read in one receive.
pub const RECEIVE_BUFFER_SIZE: usize = 1024;

/// The network a driver runs on, by side.
pub enum NetworkRole {
    Station(Box<dyn WifiStation>),
    AccessPoint(Box<dyn WifiAccessPoint>),
}

pub struct NetworkDriver {
    role: NetworkRole,
    join_timeout: Duration,
    /// The one listening socket, bound on first discovery and kept for the
    /// rest of the process.
    listener: Option<TcpListener>,
    /// Gateway learned from the last successful join (station only).
    gateway: Option<IpAddr>,
    discovering: bool,
    /// A client accepted during discovery, not yet adopted.
    pending: Option<TcpStream>,
    active: Option<(ConnectionHandle, TcpStream)>,
    next_handle: u32,
    buf: Vec<u8>,
}

impl NetworkDriver {
    pub fn new(role: NetworkRole, join_timeout: Duration) -> Self {
        Self {
            role,
            join_timeout,
            listener: None,
            gateway: None,
            discovering: false,
            pending: None,
            active: None,
            next_handle: 1,
            buf: vec![0u8; RECEIVE_BUFFER_SIZE],
        }
    }

    pub fn station(station: impl WifiStation + 'static, join_timeout: Duration) -> Self {
        Self::new(NetworkRole::Station(Box::new(station)), join_timeout)
    }

    pub fn access_point(ap: impl WifiAccessPoint + 'static) -> Self {
        Self::new(NetworkRole::AccessPoint(Box::new(ap)), Duration::ZERO)
    }

    /// Address the listener is bound to, once discovery has started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    fn credentials(filter: &PeerIdentity) -> Result<(&str, &str, u16), DriverError> {
        match filter {
            PeerIdentity::Network { ssid, passphrase, port } => Ok((ssid, passphrase, *port)),
            PeerIdentity::Radio { .. } => Err(DriverError::Join(
                "network discovery needs network credentials".to_string(),
            )),
        }
    }

    fn stream(&mut self, handle: ConnectionHandle) -> Result<&mut TcpStream, DriverError> {
        match self.active.as_mut() {
            Some((active, stream)) if *active == handle => Ok(stream),
            _ => Err(DriverError::UnknownHandle(handle)),
        }
    }

    fn install(&mut self, stream: TcpStream) -> ConnectionHandle {
        if let Err(e) = stream.set_nodelay(true) {
            log::debug!("Could not disable Nagle: {}", e);
        }
        let handle = ConnectionHandle(self.next_handle);
        self.next_handle = self.next_handle.wrapping_add(1);
        self.active = Some((handle, stream));
        handle
    }
}

#[async_trait]
impl TransportDriver for NetworkDriver {
    fn kind(&self) -> TransportKind {
        TransportKind::Network
    }

    async fn begin_discovery(&mut self, filter: &PeerIdentity) -> Result<(), DriverError> {
        if self.discovering {
            return Ok(());
        }
        let (ssid, passphrase, port) = Self::credentials(filter)?;
        if let NetworkRole::AccessPoint(ap) = &mut self.role {
            if self.listener.is_none() {
                let ip = ap.bring_up(ssid, passphrase).await?;
                let listener = TcpListener::bind(SocketAddr::new(ip, port))
                    .await
                    .map_err(|e| DriverError::Bind(e.to_string()))?;
                if let Ok(addr) = listener.local_addr() {
                    log::info!("Listening on {}", addr);
                }
                self.listener = Some(listener);
            }
        }
        self.discovering = true;
        Ok(())
    }

    async fn stop_discovery(&mut self) {
        // The listener outlives discovery; only the flag changes.
        self.discovering = false;
    }

    async fn poll_discovery(
        &mut self,
        filter: &PeerIdentity,
        wait: Duration,
    ) -> Result<Option<Candidate>, DriverError> {
        let (ssid, passphrase, port) = Self::credentials(filter)?;
        match &mut self.role {
            NetworkRole::Station(station) => {
                let gateway = match self.gateway {
                    Some(gateway) => gateway,
                    None => {
                        let gateway = timeout(self.join_timeout, station.join(ssid, passphrase))
                            .await
                            .map_err(|_| {
                                DriverError::Join(format!(
                                    "no association with {:?} after {:?}",
                                    ssid, self.join_timeout
                                ))
                            })??;
                        self.gateway = Some(gateway);
                        gateway
                    }
                };
                Ok(Some(Candidate::Endpoint {
                    addr: SocketAddr::new(gateway, port),
                }))
            }
            NetworkRole::AccessPoint(_) => {
                let listener = self
                    .listener
                    .as_ref()
                    .ok_or_else(|| DriverError::Bind("listener not bound".to_string()))?;
                match timeout(wait, listener.accept()).await {
                    Ok(Ok((stream, peer))) => {
                        self.pending = Some(stream);
                        Ok(Some(Candidate::Inbound {
                            peer: peer.to_string(),
                        }))
                    }
                    Ok(Err(e)) => Err(e.into()),
                    Err(_) => Ok(None),
                }
            }
        }
    }

    async fn attempt_connect(&mut self, candidate: Candidate) -> Result<ConnectionHandle, DriverError> {
        if let Some((_, mut stale)) = self.active.take() {
            let _ = stale.shutdown().await;
        }
        let stream = match (&mut self.role, candidate) {
            (NetworkRole::Station(station), Candidate::Endpoint { addr }) => {
                match TcpStream::connect(addr).await {
                    Ok(stream) => {
                        log::info!("Connected to {}", addr);
                        stream
                    }
                    Err(e) => {
                        // The access point may have restarted; join again next time.
                        self.gateway = None;
                        station.leave().await;
                        return Err(DriverError::Connection(format!("{}: {}", addr, e)));
                    }
                }
            }
            (NetworkRole::AccessPoint(_), Candidate::Inbound { peer }) => {
                let stream = self
                    .pending
                    .take()
                    .ok_or_else(|| DriverError::Connection("no pending client".to_string()))?;
                log::info!("Client connected: {}", peer);
                stream
            }
            (_, other) => {
                return Err(DriverError::Connection(format!(
                    "network driver cannot connect to {}",
                    other
                )))
            }
        };
        Ok(self.install(stream))
    }

    async fn negotiate(
        &mut self,
        handle: ConnectionHandle,
    ) -> Result<Option<CharacteristicHandle>, DriverError> {
        self.stream(handle)?;
        Ok(None)
    }

    async fn send(&mut self, handle: ConnectionHandle, bytes: &[u8]) -> Result<(), DriverError> {
        let stream = self.stream(handle)?;
        stream.write_all(bytes).await?;
        Ok(())
    }

    async fn poll_receive(
        &mut self,
        handle: ConnectionHandle,
        wait: Duration,
    ) -> Result<Option<Vec<u8>>, DriverError> {
        let stream = match self.active.as_mut() {
            Some((active, stream)) if *active == handle => stream,
            _ => return Err(DriverError::UnknownHandle(handle)),
        };
        match timeout(wait, stream.read(&mut self.buf)).await {
            Ok(Ok(0)) => Err(DriverError::Disconnected),
            Ok(Ok(n)) => Ok(Some(self.buf[..n].to_vec())),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Ok(None),
        }
    }

    async fn close(&mut self, handle: ConnectionHandle) {
        match self.active.take() {
            Some((active, mut stream)) if active == handle => {
                if let Err(e) = stream.shutdown().await {
                    log::debug!("Shutdown of {} failed: {}", handle, e);
                }
            }
            other => self.active = other,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::network::wifi::{HostAccessPoint, HostStation};

    const LOOPBACK: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
    const WAIT: Duration = Duration::from_millis(500);

    fn identity(port: u16) -> PeerIdentity {
        PeerIdentity::Network {
            ssid: "ESP32_AP".to_string(),
            passphrase: "12345678".to_string(),
            port,
        }
    }

    /// Bring up an access point on an ephemeral loopback port and return it
    /// with the identity a station needs to reach it.
    async fn access_point() -> (NetworkDriver, PeerIdentity) {
        let mut ap = NetworkDriver::access_point(HostAccessPoint::new(LOOPBACK));
        ap.begin_discovery(&identity(0)).await.unwrap();
        let port = ap.local_addr().unwrap().port();
        (ap, identity(port))
    }

    async fn connect_both(
        ap: &mut NetworkDriver,
        station: &mut NetworkDriver,
        filter: &PeerIdentity,
    ) -> (ConnectionHandle, ConnectionHandle) {
        station.begin_discovery(filter).await.unwrap();
        let endpoint = station.poll_discovery(filter, WAIT).await.unwrap().unwrap();
        let h_s = station.attempt_connect(endpoint).await.unwrap();

        let inbound = ap.poll_discovery(filter, WAIT).await.unwrap().unwrap();
        let h_a = ap.attempt_connect(inbound).await.unwrap();
        (h_a, h_s)
    }

    #[tokio::test]
    async fn test_station_targets_gateway() {
        let mut station = NetworkDriver::station(HostStation::new(LOOPBACK), WAIT);
        let filter = identity(8080);
        station.begin_discovery(&filter).await.unwrap();
        let candidate = station.poll_discovery(&filter, WAIT).await.unwrap();
        assert_eq!(
            candidate,
            Some(Candidate::Endpoint {
                addr: "127.0.0.1:8080".parse().unwrap()
            })
        );
    }

    #[tokio::test]
    async fn test_round_trip_over_loopback() {
        let (mut ap, filter) = access_point().await;
        let mut station = NetworkDriver::station(HostStation::new(LOOPBACK), WAIT);
        let (h_a, h_s) = connect_both(&mut ap, &mut station, &filter).await;

        assert_eq!(ap.negotiate(h_a).await.unwrap(), None);
        assert_eq!(station.negotiate(h_s).await.unwrap(), None);

        ap.send(h_a, b"hello").await.unwrap();
        let got = station.poll_receive(h_s, WAIT).await.unwrap();
        assert_eq!(got.as_deref(), Some(&b"hello"[..]));

        station.send(h_s, b"hello world").await.unwrap();
        let got = ap.poll_receive(h_a, WAIT).await.unwrap();
        assert_eq!(got.as_deref(), Some(&b"hello world"[..]));
    }

    #[tokio::test]
    async fn test_receive_timeout_is_not_an_error() {
        let (mut ap, filter) = access_point().await;
        let mut station = NetworkDriver::station(HostStation::new(LOOPBACK), WAIT);
        let (_h_a, h_s) = connect_both(&mut ap, &mut station, &filter).await;

        let got = station
            .poll_receive(h_s, Duration::from_millis(50))
            .await
            .unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn test_peer_close_is_reported_as_disconnect() {
        let (mut ap, filter) = access_point().await;
        let mut station = NetworkDriver::station(HostStation::new(LOOPBACK), WAIT);
        let (h_a, h_s) = connect_both(&mut ap, &mut station, &filter).await;

        station.close(h_s).await;
        let result = ap.poll_receive(h_a, WAIT).await;
        assert_eq!(result, Err(DriverError::Disconnected));
    }

    #[tokio::test]
    async fn test_listener_survives_rediscovery() {
        let (mut ap, filter) = access_point().await;
        let bound = ap.local_addr().unwrap();

        ap.stop_discovery().await;
        ap.begin_discovery(&filter).await.unwrap();
        assert_eq!(ap.local_addr(), Some(bound));
    }

    #[tokio::test]
    async fn test_access_point_accepts_again_after_client_leaves() {
        let (mut ap, filter) = access_point().await;
        let mut station = NetworkDriver::station(HostStation::new(LOOPBACK), WAIT);
        let (h_a, h_s) = connect_both(&mut ap, &mut station, &filter).await;

        station.close(h_s).await;
        ap.close(h_a).await;

        let (h_a2, h_s2) = connect_both(&mut ap, &mut station, &filter).await;
        assert_ne!(h_a, h_a2);
        station.send(h_s2, b"again").await.unwrap();
        let got = ap.poll_receive(h_a2, WAIT).await.unwrap();
        assert_eq!(got.as_deref(), Some(&b"again"[..]));
    }

    #[tokio::test]
    async fn test_connect_refused_forces_rejoin() {
        // Grab a free port, then release it so nothing listens there.
        let probe = TcpListener::bind((LOOPBACK, 0)).await.unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);

        let mut station = NetworkDriver::station(HostStation::new(LOOPBACK), WAIT);
        let filter = identity(port);
        station.begin_discovery(&filter).await.unwrap();
        let endpoint = station.poll_discovery(&filter, WAIT).await.unwrap().unwrap();
        assert!(matches!(
            station.attempt_connect(endpoint).await,
            Err(DriverError::Connection(_))
        ));
        assert!(station.gateway.is_none());
    }

    #[tokio::test]
    async fn test_rejects_radio_identity() {
        let mut station = NetworkDriver::station(HostStation::new(LOOPBACK), WAIT);
        let filter = PeerIdentity::Radio {
            address: "dc:06:75:68:0b:52".parse().unwrap(),
        };
        assert!(matches!(
            station.begin_discovery(&filter).await,
            Err(DriverError::Join(_))
        ));
    }

    struct UnreachableAp;

    #[async_trait]
    impl WifiStation for UnreachableAp {
        async fn join(&mut self, _ssid: &str, _passphrase: &str) -> Result<IpAddr, DriverError> {
            std::future::pending().await
        }

        async fn leave(&mut self) {}
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_is_bounded() {
        let mut station = NetworkDriver::station(UnreachableAp, Duration::from_secs(30));
        let filter = identity(8080);
        station.begin_discovery(&filter).await.unwrap();
        let result = station.poll_discovery(&filter, WAIT).await;
        assert!(matches!(result, Err(DriverError::Join(_))));
    }
}
