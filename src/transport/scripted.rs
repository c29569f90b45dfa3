//! Scripted driver for exercising the link manager
//!
//! Each operation pops its next outcome from a queue. Empty queues fall
//! back to a healthy but quiet link: connects succeed, sends succeed and
//! polls wait out their timeout with nothing to report.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;

use super::{
    Candidate, CharacteristicHandle, ConnectionHandle, PeerIdentity, TransportDriver,
    TransportKind,
};
use crate::error::DriverError;

/// One scripted outcome. `Hang` never completes, so the caller's own
/// timeout has to fire.
#[derive(Debug, Clone)]
pub(crate) enum Step<T> {
    Return(T),
    Hang,
}

/// Driver calls, in the order they were made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    BeginDiscovery,
    StopDiscovery,
    PollDiscovery,
    Connect(Candidate),
    Negotiate(ConnectionHandle),
    Send(ConnectionHandle, Vec<u8>),
    PollReceive(ConnectionHandle),
    Close(ConnectionHandle),
}

pub(crate) struct ScriptedDriver {
    kind: TransportKind,
    pub discovery: VecDeque<Step<Result<Option<Candidate>, DriverError>>>,
    pub begins: VecDeque<Result<(), DriverError>>,
    pub connects: VecDeque<Step<Result<ConnectionHandle, DriverError>>>,
    pub negotiations: VecDeque<Step<Result<Option<CharacteristicHandle>, DriverError>>>,
    pub sends: VecDeque<Result<(), DriverError>>,
    pub inbound: VecDeque<Result<Option<Vec<u8>>, DriverError>>,
    pub calls: Vec<Call>,
    discovering: bool,
    next_handle: u32,
}

impl ScriptedDriver {
    pub fn new(kind: TransportKind) -> Self {
        Self {
            kind,
            discovery: VecDeque::new(),
            begins: VecDeque::new(),
            connects: VecDeque::new(),
            negotiations: VecDeque::new(),
            sends: VecDeque::new(),
            inbound: VecDeque::new(),
            calls: Vec::new(),
            discovering: false,
            next_handle: 1,
        }
    }

    /// A driver whose first discovery poll finds the peer.
    pub fn finding_peer(kind: TransportKind) -> Self {
        let mut driver = Self::new(kind);
        driver.discovery.push_back(Step::Return(Ok(Some(Self::candidate()))));
        driver
    }

    pub fn candidate() -> Candidate {
        Candidate::Endpoint {
            addr: "192.168.4.1:8080".parse().expect("literal address"),
        }
    }

    pub fn characteristic() -> CharacteristicHandle {
        CharacteristicHandle {
            write: 0x0012,
            notify: 0x0014,
        }
    }

    /// Payloads passed to `send`, in order.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                Call::Send(_, bytes) => Some(bytes.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, wanted: impl Fn(&Call) -> bool) -> usize {
        self.calls.iter().filter(|call| wanted(call)).count()
    }
}

async fn hang<T>() -> T {
    std::future::pending().await
}

#[async_trait]
impl TransportDriver for ScriptedDriver {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn begin_discovery(&mut self, _filter: &PeerIdentity) -> Result<(), DriverError> {
        self.calls.push(Call::BeginDiscovery);
        if self.discovering {
            return Ok(());
        }
        let result = self.begins.pop_front().unwrap_or(Ok(()));
        self.discovering = result.is_ok();
        result
    }

    async fn stop_discovery(&mut self) {
        self.calls.push(Call::StopDiscovery);
        self.discovering = false;
    }

    async fn poll_discovery(
        &mut self,
        _filter: &PeerIdentity,
        timeout: Duration,
    ) -> Result<Option<Candidate>, DriverError> {
        self.calls.push(Call::PollDiscovery);
        match self.discovery.pop_front() {
            Some(Step::Return(result)) => result,
            Some(Step::Hang) => hang().await,
            None => {
                tokio::time::sleep(timeout).await;
                Ok(None)
            }
        }
    }

    async fn attempt_connect(&mut self, candidate: Candidate) -> Result<ConnectionHandle, DriverError> {
        self.calls.push(Call::Connect(candidate));
        match self.connects.pop_front() {
            Some(Step::Return(result)) => result,
            Some(Step::Hang) => hang().await,
            None => {
                let handle = ConnectionHandle(self.next_handle);
                self.next_handle += 1;
                Ok(handle)
            }
        }
    }

    async fn negotiate(
        &mut self,
        handle: ConnectionHandle,
    ) -> Result<Option<CharacteristicHandle>, DriverError> {
        self.calls.push(Call::Negotiate(handle));
        match self.negotiations.pop_front() {
            Some(Step::Return(result)) => result,
            Some(Step::Hang) => hang().await,
            None if self.kind.negotiates() => Ok(Some(Self::characteristic())),
            None => Ok(None),
        }
    }

    async fn send(&mut self, handle: ConnectionHandle, bytes: &[u8]) -> Result<(), DriverError> {
        self.calls.push(Call::Send(handle, bytes.to_vec()));
        self.sends.pop_front().unwrap_or(Ok(()))
    }

    async fn poll_receive(
        &mut self,
        handle: ConnectionHandle,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>, DriverError> {
        self.calls.push(Call::PollReceive(handle));
        match self.inbound.pop_front() {
            Some(result) => result,
            None => {
                tokio::time::sleep(timeout).await;
                Ok(None)
            }
        }
    }

    async fn close(&mut self, handle: ConnectionHandle) {
        self.calls.push(Call::Close(handle));
    }
}
