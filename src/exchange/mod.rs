//! Exchange scheduler
//!
//! Runs only while the link is Ready. The originating side sends every
//! period; the other side answers (greeting) or applies the value
//! (sensor). Silence for longer than the configured multiple of the
//! period after the last completed exchange is reported as a timeout.

pub mod payload;

use crate::config::{ExchangeKind, LinkConfig};
use crate::error::LinkError;
use payload::{
    decode_sample, decode_text, encode_sample, reply_to, OutputMapper, SampleSmoother,
    ADC_REFERENCE_VOLTS,
};

/// When the originator last sent, and how often it sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangeClock {
    pub last_send_ms: u64,
    pub period_ms: u64,
}

impl ExchangeClock {
    pub fn new(period_ms: u64) -> Self {
        Self {
            last_send_ms: 0,
            period_ms,
        }
    }

    pub fn is_due(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_send_ms) >= self.period_ms
    }

    pub fn mark(&mut self, now_ms: u64) {
        self.last_send_ms = now_ms;
    }
}

/// What the caller should do with an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Send these bytes back in the same tick.
    Reply(Vec<u8>),
    /// The reply to our greeting arrived; the cycle is complete.
    Completed(String),
    /// A sensor sample arrived. `level` is set when the output must change.
    Sample { value: u16, level: Option<u16> },
    /// Nothing to do.
    Ignored,
}

pub struct ExchangeScheduler {
    kind: ExchangeKind,
    originates: bool,
    message: String,
    suffix: String,
    clock: ExchangeClock,
    timeout_ms: u64,
    last_exchange_ms: u64,
    awaiting_reply: bool,
    sequence: u64,
    active: bool,
    smoother: SampleSmoother,
    mapper: OutputMapper,
    full_scale: u16,
}

impl ExchangeScheduler {
    pub fn new(config: &LinkConfig) -> Self {
        Self {
            kind: config.exchange.kind,
            originates: config.originates(),
            message: config.exchange.message.clone(),
            suffix: config.exchange.suffix.clone(),
            clock: ExchangeClock::new(config.timing.exchange_period_ms),
            timeout_ms: config.timing.exchange_timeout_ms(),
            last_exchange_ms: 0,
            awaiting_reply: false,
            sequence: 0,
            active: false,
            smoother: SampleSmoother::new(
                config.sensor.smoothing_window,
                config.sensor.full_scale,
            ),
            mapper: OutputMapper::new(
                config.output.max,
                config.output.threshold,
                config.sensor.full_scale,
            ),
            full_scale: config.sensor.full_scale,
        }
    }

    pub fn originates(&self) -> bool {
        self.originates
    }

    /// Whether this side must hear from the peer to stay Ready.
    pub fn expects_inbound(&self) -> bool {
        match self.kind {
            ExchangeKind::Greeting => true,
            ExchangeKind::Sensor => !self.originates,
        }
    }

    /// Whether this side drives the output level.
    pub fn drives_output(&self) -> bool {
        self.kind == ExchangeKind::Sensor && !self.originates
    }

    /// Completed cycles since boot.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Start exchanging. Ready entry counts as an exchange, and the first
    /// send is one period later.
    pub fn on_ready(&mut self, now_ms: u64) {
        self.active = true;
        self.awaiting_reply = false;
        self.clock.mark(now_ms);
        self.last_exchange_ms = now_ms;
    }

    /// Stop exchanging after the link left Ready.
    pub fn on_exit(&mut self) {
        self.active = false;
        self.awaiting_reply = false;
        self.smoother.clear();
        self.mapper.reset();
    }

    pub fn is_due(&self, now_ms: u64) -> bool {
        self.active && self.originates && self.clock.is_due(now_ms)
    }

    /// Build the next outbound message. `read_sensor` is called once for
    /// the sensor exchange.
    pub fn originate(&mut self, read_sensor: impl FnOnce() -> u16) -> Vec<u8> {
        let cycle = self.sequence + 1;
        match self.kind {
            ExchangeKind::Greeting => {
                log::info!("[cycle {}] 1/4 send {:?}", cycle, self.message);
                self.message.as_bytes().to_vec()
            }
            ExchangeKind::Sensor => {
                let value = self.smoother.push(read_sensor());
                log::info!(
                    "[cycle {}] send ADC={:4} ({:.2} V)",
                    cycle,
                    value,
                    self.volts(value)
                );
                encode_sample(value).to_vec()
            }
        }
    }

    /// Record that the originated message went out.
    pub fn on_sent(&mut self, now_ms: u64) {
        self.clock.mark(now_ms);
        match self.kind {
            ExchangeKind::Greeting => self.awaiting_reply = true,
            ExchangeKind::Sensor => {
                self.sequence += 1;
                self.last_exchange_ms = now_ms;
            }
        }
    }

    pub fn on_inbound(&mut self, bytes: &[u8], now_ms: u64) -> Result<Inbound, LinkError> {
        let cycle = self.sequence + 1;
        match (self.kind, self.originates) {
            (ExchangeKind::Greeting, false) => {
                let text = decode_text(bytes)?;
                log::info!("[cycle {}] 2/4 received {:?}", cycle, text);
                let reply = reply_to(&text, &self.suffix);
                log::info!("[cycle {}] 3/4 reply {:?}", cycle, reply);
                self.complete(now_ms);
                Ok(Inbound::Reply(reply.into_bytes()))
            }
            (ExchangeKind::Greeting, true) => {
                let text = decode_text(bytes)?;
                if !self.awaiting_reply {
                    log::debug!("Unsolicited message {:?}", text);
                    return Ok(Inbound::Ignored);
                }
                let expected = reply_to(&self.message, &self.suffix);
                if text != expected {
                    return Err(LinkError::MalformedPayload(format!(
                        "expected {:?}, got {:?}",
                        expected, text
                    )));
                }
                log::info!("[cycle {}] 4/4 reply received {:?}", cycle, text);
                self.awaiting_reply = false;
                self.complete(now_ms);
                Ok(Inbound::Completed(text))
            }
            (ExchangeKind::Sensor, false) => {
                let value = decode_sample(bytes)?;
                log::info!(
                    "[cycle {}] received ADC={:4} ({:.2} V)",
                    cycle,
                    value,
                    self.volts(value)
                );
                let level = self.mapper.apply(value);
                match level {
                    Some(level) => log::info!("Output level {}", level),
                    None => log::debug!("Output change below threshold, keeping {}", self.mapper.last()),
                }
                self.complete(now_ms);
                Ok(Inbound::Sample { value, level })
            }
            (ExchangeKind::Sensor, true) => {
                log::debug!("Ignoring {} inbound bytes on the sensor side", bytes.len());
                Ok(Inbound::Ignored)
            }
        }
    }

    /// Milliseconds of silence if the peer has been quiet for too long.
    pub fn timed_out(&self, now_ms: u64) -> Option<u64> {
        if !self.active || !self.expects_inbound() {
            return None;
        }
        let elapsed = now_ms.saturating_sub(self.last_exchange_ms);
        (elapsed > self.timeout_ms).then_some(elapsed)
    }

    fn complete(&mut self, now_ms: u64) {
        self.sequence += 1;
        self.last_exchange_ms = now_ms;
    }

    fn volts(&self, value: u16) -> f32 {
        f32::from(value) / f32::from(self.full_scale) * ADC_REFERENCE_VOLTS
    }
}
