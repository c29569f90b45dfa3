//! Link manager run loop
//!
//! Owns everything mutable about one side of the link: the state machine,
//! the exchange scheduler, the driver and the platform. One tick polls the
//! driver for whatever the current state is waiting on, feeds the outcome
//! to the state machine and executes the resulting directives in order.

use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use tokio::time::timeout;

use super::governor::RetryGovernor;
use super::state::{Directive, LinkEvent, LinkState, LinkStateMachine};
use crate::config::LinkConfig;
use crate::error::{ConfigError, DriverError, LinkError};
use crate::exchange::{ExchangeScheduler, Inbound};
use crate::platform::Platform;
use crate::transport::{ConnectionHandle, PeerIdentity, TransportDriver};

/// Counters reported by the CLI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LinkStats {
    pub ready_entries: u32,
    pub faults: u32,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub cycles: u64,
    pub retry_count: u32,
}

/// Bound a driver call, reporting an overrun as a driver timeout.
async fn bounded<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, DriverError>>,
) -> Result<T, DriverError> {
    match timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => {
            log::debug!("Driver call overran {:?}", limit);
            Err(DriverError::Timeout)
        }
    }
}

/// Events for a failed exchange. A vanished peer gets its own event.
fn exchange_fault(error: LinkError) -> LinkEvent {
    match error {
        LinkError::PeerDisconnected => LinkEvent::PeerDisconnected,
        other => LinkEvent::ExchangeFailed(other),
    }
}

pub struct LinkManager<D, P> {
    config: LinkConfig,
    identity: PeerIdentity,
    machine: LinkStateMachine,
    exchange: ExchangeScheduler,
    driver: D,
    platform: P,
    queue: VecDeque<Directive>,
    discovery_started_ms: u64,
    messages_sent: u64,
    messages_received: u64,
    ready_entries: u32,
}

impl<D: TransportDriver, P: Platform> LinkManager<D, P> {
    pub fn new(config: LinkConfig, driver: D, platform: P) -> Result<Self, ConfigError> {
        config.validate()?;
        if driver.kind() != config.transport.kind() {
            return Err(ConfigError::Invalid(format!(
                "configured for {} but given a {} driver",
                config.transport.kind(),
                driver.kind()
            )));
        }
        let machine = LinkStateMachine::new(
            config.role,
            driver.kind(),
            RetryGovernor::from_config(&config.retry),
        );
        Ok(Self {
            identity: config.transport.identity(),
            exchange: ExchangeScheduler::new(&config),
            machine,
            config,
            driver,
            platform,
            queue: VecDeque::new(),
            discovery_started_ms: 0,
            messages_sent: 0,
            messages_received: 0,
            ready_entries: 0,
        })
    }

    pub fn state(&self) -> LinkState {
        self.machine.state()
    }

    pub fn machine(&self) -> &LinkStateMachine {
        &self.machine
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn stats(&self) -> LinkStats {
        LinkStats {
            ready_entries: self.ready_entries,
            faults: self.machine.faults(),
            messages_sent: self.messages_sent,
            messages_received: self.messages_received,
            cycles: self.exchange.sequence(),
            retry_count: self.machine.governor().count(),
        }
    }

    /// Run until the device restarts. Returns the reason.
    pub async fn run(&mut self) -> LinkError {
        self.start().await;
        loop {
            self.tick().await;
            if self.machine.is_restarting() {
                return self
                    .machine
                    .last_error()
                    .cloned()
                    .unwrap_or(LinkError::RetryCeilingReached {
                        count: self.machine.governor().count(),
                    });
            }
            self.platform.sleep_ms(self.config.timing.tick_ms).await;
        }
    }

    /// Wait out the boot delay and leave Idle.
    pub async fn start(&mut self) {
        if self.config.timing.boot_delay_ms > 0 {
            self.platform.sleep_ms(self.config.timing.boot_delay_ms).await;
        }
        log::info!(
            "Starting {} over {} ({:?} exchange)",
            self.config.role,
            self.config.transport.kind(),
            self.config.exchange.kind
        );
        self.feed(LinkEvent::Start);
        self.dispatch().await;
    }

    /// One pass of the run loop.
    pub async fn tick(&mut self) {
        let now = self.platform.now_ms();
        match self.machine.state() {
            LinkState::Discovering => self.poll_discovery(now).await,
            LinkState::Ready => self.exchange_step(now).await,
            LinkState::Faulted if self.machine.awaiting_retry() => {
                if self.machine.governor().may_attempt(now) {
                    self.feed(LinkEvent::RetryPermitted);
                } else {
                    log::debug!(
                        "Waiting {} ms before the next attempt",
                        self.machine.governor().wait_remaining(now)
                    );
                }
            }
            _ => {}
        }
        self.dispatch().await;
    }

    fn feed(&mut self, event: LinkEvent) {
        let now = self.platform.now_ms();
        let directives = self.machine.handle(event, now);
        self.queue.extend(directives);
    }

    fn call_limit(&self) -> Duration {
        self.config.timing.connect_timeout()
    }

    async fn poll_discovery(&mut self, now: u64) {
        let window = self.config.timing.discovery_window_ms;
        let elapsed = now.saturating_sub(self.discovery_started_ms);
        if elapsed >= window {
            self.feed(LinkEvent::DiscoveryWindowElapsed);
            return;
        }
        let wait = Duration::from_millis((window - elapsed).min(self.config.timing.receive_poll_ms));
        // The station joins its network inside a discovery poll.
        let limit = wait + self.config.timing.join_timeout();
        let result = bounded(limit, self.driver.poll_discovery(&self.identity, wait)).await;
        match result {
            Ok(Some(candidate)) => self.feed(LinkEvent::CandidateFound(candidate)),
            Ok(None) => {}
            Err(e) => self.feed(LinkEvent::DiscoveryFailed(LinkError::DiscoveryFailure(e))),
        }
    }

    async fn exchange_step(&mut self, now: u64) {
        let Some(handle) = self.machine.connection() else {
            return;
        };
        if let Some(elapsed_ms) = self.exchange.timed_out(now) {
            self.feed(LinkEvent::ExchangeTimeout { elapsed_ms });
            return;
        }

        if self.exchange.is_due(now) {
            let platform = &mut self.platform;
            let bytes = self.exchange.originate(|| platform.read_sensor());
            if let Err(error) = self.send(handle, &bytes).await {
                self.feed(exchange_fault(error));
                return;
            }
            self.exchange.on_sent(now);
        }

        let poll = self.config.timing.receive_poll();
        let result = bounded(poll + self.call_limit(), self.driver.poll_receive(handle, poll)).await;
        let bytes = match LinkError::from_receive(result) {
            Ok(bytes) => bytes,
            Err(LinkError::ReceiveTimeout) => return,
            Err(error) => {
                self.feed(exchange_fault(error));
                return;
            }
        };
        self.messages_received += 1;

        let now = self.platform.now_ms();
        match self.exchange.on_inbound(&bytes, now) {
            Ok(Inbound::Reply(reply)) => {
                if let Err(error) = self.send(handle, &reply).await {
                    self.feed(exchange_fault(error));
                }
            }
            Ok(Inbound::Sample {
                level: Some(level), ..
            }) => self.platform.set_output_level(level),
            Ok(_) => {}
            Err(error) => self.feed(exchange_fault(error)),
        }
    }

    async fn send(&mut self, handle: ConnectionHandle, bytes: &[u8]) -> Result<(), LinkError> {
        bounded(self.call_limit(), self.driver.send(handle, bytes))
            .await
            .map_err(LinkError::from_send)?;
        self.messages_sent += 1;
        Ok(())
    }

    async fn begin_discovery(&mut self) {
        let limit = self.call_limit();
        match bounded(limit, self.driver.begin_discovery(&self.identity)).await {
            Ok(()) => self.discovery_started_ms = self.platform.now_ms(),
            Err(e) => self.feed(LinkEvent::DiscoveryFailed(LinkError::DiscoveryFailure(e))),
        }
    }

    async fn stop_discovery(&mut self) {
        if timeout(self.call_limit(), self.driver.stop_discovery())
            .await
            .is_err()
        {
            log::debug!("Stopping discovery timed out");
        }
    }

    fn force_output_off(&mut self) {
        if self.exchange.drives_output() {
            self.platform.set_output_level(0);
        }
    }

    /// Execute queued directives, including any their outcomes produce.
    async fn dispatch(&mut self) {
        while let Some(directive) = self.queue.pop_front() {
            log::debug!("Executing {:?}", directive);
            match directive {
                Directive::BeginDiscovery => self.begin_discovery().await,
                Directive::RestartDiscovery => {
                    self.stop_discovery().await;
                    self.begin_discovery().await;
                }
                Directive::Connect(candidate) => {
                    self.stop_discovery().await;
                    let limit = self.call_limit();
                    match bounded(limit, self.driver.attempt_connect(candidate)).await {
                        Ok(handle) => self.feed(LinkEvent::Connected(handle)),
                        Err(e) => self.feed(LinkEvent::ConnectFailed(LinkError::ConnectFailure(e))),
                    }
                }
                Directive::Negotiate(connection) => {
                    let limit = self.config.timing.negotiation_timeout();
                    match bounded(limit, self.driver.negotiate(connection)).await {
                        Ok(characteristic) => self.feed(LinkEvent::Negotiated {
                            connection,
                            characteristic,
                        }),
                        Err(e) => self.feed(LinkEvent::NegotiationFailed {
                            connection,
                            error: LinkError::NegotiationFailure(e),
                        }),
                    }
                }
                Directive::EnterReady => {
                    self.ready_entries += 1;
                    let now = self.platform.now_ms();
                    self.exchange.on_ready(now);
                }
                Directive::ExitReady => {
                    self.exchange.on_exit();
                    self.force_output_off();
                }
                Directive::Close(connection) => {
                    if timeout(self.call_limit(), self.driver.close(connection))
                        .await
                        .is_err()
                    {
                        log::debug!("Close of {} timed out", connection);
                    }
                    if self.machine.state() == LinkState::Disconnecting {
                        self.feed(LinkEvent::Closed);
                    }
                }
                Directive::Restart => {
                    self.queue.clear();
                    self.force_output_off();
                    self.platform.restart_device();
                }
            }
        }
    }
}
