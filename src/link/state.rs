//! Link state machine
//!
//! A pure transition function: events in, directives out. The machine
//! never touches the driver; the manager executes its directives and feeds
//! the outcomes back as events.

use std::fmt;

use super::governor::{RetryGovernor, Verdict};
use crate::config::Role;
use crate::error::LinkError;
use crate::transport::{Candidate, CharacteristicHandle, ConnectionHandle, TransportKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkState {
    Idle,
    Discovering,
    Connecting,
    /// Radio only: resolving characteristics and enabling notifications.
    ServiceDiscovery,
    Ready,
    Disconnecting,
    Faulted,
}

/// Something that happened to the link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Start,
    CandidateFound(Candidate),
    DiscoveryWindowElapsed,
    DiscoveryFailed(LinkError),
    Connected(ConnectionHandle),
    ConnectFailed(LinkError),
    Negotiated {
        connection: ConnectionHandle,
        characteristic: Option<CharacteristicHandle>,
    },
    NegotiationFailed {
        connection: ConnectionHandle,
        error: LinkError,
    },
    PeerDisconnected,
    ExchangeFailed(LinkError),
    ExchangeTimeout { elapsed_ms: u64 },
    Closed,
    RetryPermitted,
}

impl fmt::Display for LinkEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkEvent::Start => write!(f, "start"),
            LinkEvent::CandidateFound(candidate) => write!(f, "found {}", candidate),
            LinkEvent::DiscoveryWindowElapsed => write!(f, "discovery window elapsed"),
            LinkEvent::DiscoveryFailed(e) => write!(f, "{}", e),
            LinkEvent::Connected(handle) => write!(f, "connected {}", handle),
            LinkEvent::ConnectFailed(e) => write!(f, "{}", e),
            LinkEvent::Negotiated { connection, .. } => write!(f, "negotiated {}", connection),
            LinkEvent::NegotiationFailed { error, .. } => write!(f, "{}", error),
            LinkEvent::PeerDisconnected => write!(f, "peer disconnected"),
            LinkEvent::ExchangeFailed(e) => write!(f, "{}", e),
            LinkEvent::ExchangeTimeout { elapsed_ms } => {
                write!(f, "no exchange for {} ms", elapsed_ms)
            }
            LinkEvent::Closed => write!(f, "closed"),
            LinkEvent::RetryPermitted => write!(f, "retry permitted"),
        }
    }
}

/// Work the manager must carry out, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    BeginDiscovery,
    /// Stop and start discovery again.
    RestartDiscovery,
    /// Stop discovery, then connect.
    Connect(Candidate),
    Negotiate(ConnectionHandle),
    EnterReady,
    ExitReady,
    Close(ConnectionHandle),
    Restart,
}

pub struct LinkStateMachine {
    role: Role,
    transport: TransportKind,
    state: LinkState,
    connection: Option<ConnectionHandle>,
    characteristic: Option<CharacteristicHandle>,
    governor: RetryGovernor,
    /// The fault that took the link out of Ready, counted on Faulted entry.
    fault: Option<LinkError>,
    last_error: Option<LinkError>,
    faults: u32,
    restarting: bool,
}

impl LinkStateMachine {
    pub fn new(role: Role, transport: TransportKind, governor: RetryGovernor) -> Self {
        Self {
            role,
            transport,
            state: LinkState::Idle,
            connection: None,
            characteristic: None,
            governor,
            fault: None,
            last_error: None,
            faults: 0,
            restarting: false,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Handle of the open connection. Only set while Ready.
    pub fn connection(&self) -> Option<ConnectionHandle> {
        self.connection
    }

    /// Negotiated characteristics. Only set while Ready on the radio.
    pub fn characteristic(&self) -> Option<CharacteristicHandle> {
        self.characteristic
    }

    pub fn governor(&self) -> &RetryGovernor {
        &self.governor
    }

    pub fn last_error(&self) -> Option<&LinkError> {
        self.last_error.as_ref()
    }

    /// Faulted entries since boot.
    pub fn faults(&self) -> u32 {
        self.faults
    }

    /// Whether a restart has been issued. No further transitions happen.
    pub fn is_restarting(&self) -> bool {
        self.restarting
    }

    /// Whether a Faulted initiator is waiting on the governor.
    pub fn awaiting_retry(&self) -> bool {
        self.state == LinkState::Faulted && self.role == Role::Initiator && !self.restarting
    }

    pub fn handle(&mut self, event: LinkEvent, now_ms: u64) -> Vec<Directive> {
        if self.restarting {
            log::debug!("Ignoring {} while restarting", event);
            return Vec::new();
        }
        let mut out = Vec::new();
        match (self.state, &event) {
            (LinkState::Idle, LinkEvent::Start) => {
                self.governor.record_attempt(now_ms);
                self.transition(LinkState::Discovering, &event);
                out.push(Directive::BeginDiscovery);
            }

            (LinkState::Discovering, LinkEvent::DiscoveryWindowElapsed) => {
                self.transition(LinkState::Discovering, &event);
                out.push(Directive::RestartDiscovery);
            }
            (LinkState::Discovering, LinkEvent::CandidateFound(candidate)) => {
                self.governor.record_attempt(now_ms);
                self.transition(LinkState::Connecting, &event);
                out.push(Directive::Connect(candidate.clone()));
            }
            (LinkState::Discovering, LinkEvent::DiscoveryFailed(error)) => {
                self.fail(error.clone(), &event, &mut out);
            }

            (LinkState::Connecting, LinkEvent::Connected(connection)) => {
                self.governor.record_success();
                if self.transport.negotiates() {
                    self.transition(LinkState::ServiceDiscovery, &event);
                    out.push(Directive::Negotiate(*connection));
                } else {
                    self.enter_ready(*connection, None, &event, &mut out);
                }
            }
            (LinkState::Connecting, LinkEvent::ConnectFailed(error)) => {
                self.fail(error.clone(), &event, &mut out);
            }

            (
                LinkState::ServiceDiscovery,
                LinkEvent::Negotiated {
                    connection,
                    characteristic,
                },
            ) => {
                self.enter_ready(*connection, *characteristic, &event, &mut out);
            }
            (LinkState::ServiceDiscovery, LinkEvent::NegotiationFailed { connection, error }) => {
                out.push(Directive::Close(*connection));
                self.fail(error.clone(), &event, &mut out);
            }

            (LinkState::Ready, LinkEvent::PeerDisconnected) => {
                self.leave_ready(LinkError::PeerDisconnected, &event, &mut out);
            }
            (LinkState::Ready, LinkEvent::ExchangeFailed(error)) => {
                self.leave_ready(error.clone(), &event, &mut out);
            }
            (LinkState::Ready, LinkEvent::ExchangeTimeout { elapsed_ms }) => {
                let error = LinkError::ExchangeTimeout {
                    elapsed_ms: *elapsed_ms,
                };
                self.leave_ready(error, &event, &mut out);
            }

            (LinkState::Disconnecting, LinkEvent::Closed) => {
                let error = self.fault.take().unwrap_or(LinkError::PeerDisconnected);
                self.fail(error, &event, &mut out);
            }

            (LinkState::Faulted, LinkEvent::RetryPermitted) if self.role == Role::Initiator => {
                // Each pass through discovery is an attempt, so a failing
                // scan waits out the interval like a failing connect.
                self.governor.record_attempt(now_ms);
                self.transition(LinkState::Discovering, &event);
                out.push(Directive::BeginDiscovery);
            }

            (state, _) => {
                log::debug!("Ignoring {} in {:?}", event, state);
            }
        }
        out
    }

    fn transition(&mut self, to: LinkState, event: &LinkEvent) {
        let from = self.state;
        self.state = to;
        if to != LinkState::Ready {
            self.connection = None;
            self.characteristic = None;
        }
        log::info!(
            "[{}/{}] {:?} -> {:?} on {} (retries {}/{})",
            self.role,
            self.transport,
            from,
            to,
            event,
            self.governor.count(),
            self.governor.ceiling()
        );
    }

    fn enter_ready(
        &mut self,
        connection: ConnectionHandle,
        characteristic: Option<CharacteristicHandle>,
        event: &LinkEvent,
        out: &mut Vec<Directive>,
    ) {
        self.governor.record_success();
        self.transition(LinkState::Ready, event);
        self.connection = Some(connection);
        self.characteristic = characteristic;
        out.push(Directive::EnterReady);
    }

    fn leave_ready(&mut self, error: LinkError, event: &LinkEvent, out: &mut Vec<Directive>) {
        let connection = self.connection;
        self.fault = Some(error);
        self.transition(LinkState::Disconnecting, event);
        out.push(Directive::ExitReady);
        if let Some(connection) = connection {
            out.push(Directive::Close(connection));
        }
    }

    /// Enter Faulted, count the failure and decide what comes next.
    fn fail(&mut self, error: LinkError, event: &LinkEvent, out: &mut Vec<Directive>) {
        let verdict = if error.is_counted() {
            log::warn!("[{}/{}] {}", self.role, self.transport, error);
            Some(self.governor.record_failure())
        } else {
            None
        };
        self.last_error = Some(error);
        self.faults += 1;
        self.transition(LinkState::Faulted, event);

        match verdict {
            Some(Verdict::Terminal) => {
                let error = LinkError::RetryCeilingReached {
                    count: self.governor.count(),
                };
                log::error!("[{}/{}] {}, restarting", self.role, self.transport, error);
                self.last_error = Some(error);
                self.restarting = true;
                out.push(Directive::Restart);
            }
            _ if self.role == Role::Responder => {
                // Re-advertise or re-listen straight away.
                self.transition(LinkState::Idle, &LinkEvent::RetryPermitted);
                self.transition(LinkState::Discovering, &LinkEvent::Start);
                out.push(Directive::BeginDiscovery);
            }
            Some(Verdict::RetryAfter(delay)) => {
                log::debug!("Next attempt no sooner than {} ms after the last", delay);
            }
            None => {}
        }
    }
}
