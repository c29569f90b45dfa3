//! Retry/backoff governor
//!
//! Counts consecutive failures, spaces connection attempts, and decides
//! when soft recovery has been exhausted and the device must restart.

use crate::config::RetryConfig;

/// Outcome of recording a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The ceiling was reached; the caller must restart the device.
    Terminal,
    /// Retry allowed once this many milliseconds have passed since the
    /// last attempt.
    RetryAfter(u64),
}

#[derive(Debug, Clone)]
pub struct RetryGovernor {
    count: u32,
    last_attempt_ms: Option<u64>,
    ceiling: u32,
    min_interval_ms: u64,
}

impl RetryGovernor {
    pub fn new(ceiling: u32, min_interval_ms: u64) -> Self {
        Self {
            count: 0,
            last_attempt_ms: None,
            ceiling: ceiling.max(1),
            min_interval_ms,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.ceiling, config.min_interval_ms)
    }

    /// Count a failure. The counter never exceeds the ceiling.
    pub fn record_failure(&mut self) -> Verdict {
        self.count = (self.count + 1).min(self.ceiling);
        if self.count >= self.ceiling {
            Verdict::Terminal
        } else {
            Verdict::RetryAfter(self.min_interval_ms)
        }
    }

    pub fn record_success(&mut self) {
        self.count = 0;
    }

    /// Note the start of a connection attempt.
    pub fn record_attempt(&mut self, now_ms: u64) {
        self.last_attempt_ms = Some(now_ms);
    }

    /// Whether enough time has passed since the last attempt.
    pub fn may_attempt(&self, now_ms: u64) -> bool {
        match self.last_attempt_ms {
            Some(last) => now_ms.saturating_sub(last) >= self.min_interval_ms,
            None => true,
        }
    }

    /// Milliseconds until `may_attempt` turns true.
    pub fn wait_remaining(&self, now_ms: u64) -> u64 {
        match self.last_attempt_ms {
            Some(last) => (last + self.min_interval_ms).saturating_sub(now_ms),
            None => 0,
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn ceiling(&self) -> u32 {
        self.ceiling
    }
}
