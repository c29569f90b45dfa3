//! Device collaborator
//!
//! The link manager reaches the hardware only through [`Platform`]: one
//! ADC input, one PWM-style output, a monotonic clock and the reset line.

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::time::{Duration, Instant};

#[async_trait]
pub trait Platform: Send {
    /// Take one raw ADC sample.
    fn read_sensor(&mut self) -> u16;

    /// Drive the output to `level`.
    fn set_output_level(&mut self, level: u16);

    /// Milliseconds since boot.
    fn now_ms(&self) -> u64;

    async fn sleep_ms(&mut self, ms: u64);

    /// Reset the device. On hardware this does not return.
    fn restart_device(&mut self);
}

/// Where a host platform's sensor readings come from.
pub enum SensorSource {
    /// Always the same value.
    Constant(u16),
    /// Values handed out in order; the last one repeats once exhausted.
    Script { values: VecDeque<u16>, last: u16 },
    /// Computed on each read.
    Generator(Box<dyn FnMut(u64) -> u16 + Send>),
}

impl SensorSource {
    pub fn script(values: impl IntoIterator<Item = u16>) -> Self {
        SensorSource::Script {
            values: values.into_iter().collect(),
            last: 0,
        }
    }

    pub fn generator(f: impl FnMut(u64) -> u16 + Send + 'static) -> Self {
        SensorSource::Generator(Box::new(f))
    }

    fn next(&mut self, now_ms: u64) -> u16 {
        match self {
            SensorSource::Constant(value) => *value,
            SensorSource::Script { values, last } => {
                if let Some(value) = values.pop_front() {
                    *last = value;
                }
                *last
            }
            SensorSource::Generator(f) => f(now_ms),
        }
    }
}

/// Platform for running on a host: tokio clock, synthetic sensor, and an
/// output that is recorded instead of driving a pin.
pub struct HostPlatform {
    boot: Instant,
    sensor: SensorSource,
    output: u16,
    history: Vec<u16>,
    restarts: u32,
}

impl HostPlatform {
    pub fn new(sensor: SensorSource) -> Self {
        Self {
            boot: Instant::now(),
            sensor,
            output: 0,
            history: Vec::new(),
            restarts: 0,
        }
    }

    /// Current output level.
    pub fn output_level(&self) -> u16 {
        self.output
    }

    /// Every level written, in order.
    pub fn output_history(&self) -> &[u16] {
        &self.history
    }

    pub fn restart_count(&self) -> u32 {
        self.restarts
    }
}

impl Default for HostPlatform {
    fn default() -> Self {
        Self::new(SensorSource::Constant(0))
    }
}

#[async_trait]
impl Platform for HostPlatform {
    fn read_sensor(&mut self) -> u16 {
        let now = self.now_ms();
        self.sensor.next(now)
    }

    fn set_output_level(&mut self, level: u16) {
        self.output = level;
        self.history.push(level);
    }

    fn now_ms(&self) -> u64 {
        self.boot.elapsed().as_millis() as u64
    }

    async fn sleep_ms(&mut self, ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    fn restart_device(&mut self) {
        log::error!("Restart requested ({} so far)", self.restarts);
        self.restarts += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_clock_follows_tokio_time() {
        let mut platform = HostPlatform::default();
        assert_eq!(platform.now_ms(), 0);
        platform.sleep_ms(1500).await;
        assert_eq!(platform.now_ms(), 1500);
    }

    #[test]
    fn test_script_repeats_last_value() {
        let mut platform = HostPlatform::new(SensorSource::script([10, 20]));
        assert_eq!(platform.read_sensor(), 10);
        assert_eq!(platform.read_sensor(), 20);
        assert_eq!(platform.read_sensor(), 20);
    }

    #[tokio::test(start_paused = true)]
    async fn test_generator_sees_clock() {
        let mut platform = HostPlatform::new(SensorSource::generator(|now| now as u16));
        platform.sleep_ms(42).await;
        assert_eq!(platform.read_sensor(), 42);
    }

    #[test]
    fn test_output_is_recorded() {
        let mut platform = HostPlatform::default();
        platform.set_output_level(128);
        platform.set_output_level(0);
        assert_eq!(platform.output_level(), 0);
        assert_eq!(platform.output_history(), &[128, 0]);

        platform.restart_device();
        assert_eq!(platform.restart_count(), 1);
    }
}
