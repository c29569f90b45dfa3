//! Wire payloads and sample conditioning
//!
//! Greetings are bare UTF-8 text. Sensor samples are a single
//! little-endian `u16`. Neither carries a length prefix: one transport
//! delivery is one message.

use std::collections::VecDeque;

use crate::error::LinkError;

/// ADC reference voltage, used for log output only.
pub const ADC_REFERENCE_VOLTS: f32 = 3.3;

pub fn decode_text(bytes: &[u8]) -> Result<String, LinkError> {
    String::from_utf8(bytes.to_vec())
        .map_err(|e| LinkError::MalformedPayload(format!("greeting is not UTF-8: {}", e)))
}

/// The responder's answer to a greeting.
pub fn reply_to(greeting: &str, suffix: &str) -> String {
    format!("{}{}", greeting, suffix)
}

pub fn encode_sample(value: u16) -> [u8; 2] {
    value.to_le_bytes()
}

/// Decode one sample. Several samples delivered together yield the newest.
pub fn decode_sample(bytes: &[u8]) -> Result<u16, LinkError> {
    if bytes.is_empty() || bytes.len() % 2 != 0 {
        return Err(LinkError::MalformedPayload(format!(
            "sample payload of {} bytes",
            bytes.len()
        )));
    }
    let tail = &bytes[bytes.len() - 2..];
    Ok(u16::from_le_bytes([tail[0], tail[1]]))
}

/// Moving average over the most recent raw ADC reads.
#[derive(Debug, Clone)]
pub struct SampleSmoother {
    samples: VecDeque<u16>,
    window: usize,
    full_scale: u16,
}

impl SampleSmoother {
    pub fn new(window: usize, full_scale: u16) -> Self {
        let window = window.max(1);
        Self {
            samples: VecDeque::with_capacity(window),
            window,
            full_scale,
        }
    }

    /// Add a raw read and return the current average. Reads above full
    /// scale are clamped first.
    pub fn push(&mut self, raw: u16) -> u16 {
        if self.samples.len() == self.window {
            self.samples.pop_front();
        }
        self.samples.push_back(raw.min(self.full_scale));
        let sum: u32 = self.samples.iter().map(|&s| u32::from(s)).sum();
        (sum / self.samples.len() as u32) as u16
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

/// Maps received samples to output levels, suppressing small changes.
#[derive(Debug, Clone)]
pub struct OutputMapper {
    max: u16,
    threshold: u16,
    full_scale: u16,
    last: u16,
}

impl OutputMapper {
    pub fn new(max: u16, threshold: u16, full_scale: u16) -> Self {
        Self {
            max,
            threshold,
            full_scale: full_scale.max(1),
            last: 0,
        }
    }

    /// `round(value / full_scale * max)`, clamped to `[0, max]`.
    pub fn level_for(&self, value: u16) -> u16 {
        let value = u32::from(value.min(self.full_scale));
        let full_scale = u32::from(self.full_scale);
        let level = (value * u32::from(self.max) + full_scale / 2) / full_scale;
        level.min(u32::from(self.max)) as u16
    }

    /// The level to drive for `value`, or `None` when the change from the
    /// last applied level is below the threshold.
    pub fn apply(&mut self, value: u16) -> Option<u16> {
        let level = self.level_for(value);
        if level.abs_diff(self.last) < self.threshold {
            return None;
        }
        self.last = level;
        Some(level)
    }

    /// Last level applied.
    pub fn last(&self) -> u16 {
        self.last
    }

    /// Forget the applied level after the output was forced off.
    pub fn reset(&mut self) {
        self.last = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_wire_format() {
        assert_eq!(encode_sample(2048), [0x00, 0x08]);
        assert_eq!(decode_sample(&[0x00, 0x08]), Ok(2048));
        assert_eq!(decode_sample(&encode_sample(4095)), Ok(4095));
    }

    #[test]
    fn test_coalesced_samples_yield_newest() {
        assert_eq!(decode_sample(&[0x01, 0x00, 0xff, 0x0f]), Ok(4095));
    }

    #[test]
    fn test_odd_or_empty_sample_is_malformed() {
        assert!(matches!(decode_sample(&[0x01]), Err(LinkError::MalformedPayload(_))));
        assert!(matches!(decode_sample(&[]), Err(LinkError::MalformedPayload(_))));
        assert!(matches!(
            decode_sample(&[1, 2, 3]),
            Err(LinkError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_greeting_reply() {
        let text = decode_text(b"hello").unwrap();
        assert_eq!(reply_to(&text, " world"), "hello world");
        assert!(decode_text(&[0xff, 0xfe]).is_err());
    }

    #[test]
    fn test_level_mapping() {
        let mapper = OutputMapper::new(255, 10, 4095);
        assert_eq!(mapper.level_for(0), 0);
        assert_eq!(mapper.level_for(4095), 255);
        assert_eq!(mapper.level_for(2048), 128);
        assert_eq!(mapper.level_for(u16::MAX), 255);
    }

    #[test]
    fn test_small_changes_are_suppressed() {
        let mut mapper = OutputMapper::new(255, 10, 4095);
        assert_eq!(mapper.level_for(1606), 100);
        assert_eq!(mapper.level_for(1686), 105);

        assert_eq!(mapper.apply(1606), Some(100));
        assert_eq!(mapper.apply(1686), None);
        assert_eq!(mapper.last(), 100);
        assert_eq!(mapper.apply(4095), Some(255));
    }

    #[test]
    fn test_first_small_level_is_suppressed() {
        let mut mapper = OutputMapper::new(255, 10, 4095);
        assert_eq!(mapper.apply(50), None);
        assert_eq!(mapper.last(), 0);
    }

    #[test]
    fn test_reset_forgets_last_level() {
        let mut mapper = OutputMapper::new(255, 10, 4095);
        mapper.apply(2048);
        mapper.reset();
        assert_eq!(mapper.apply(2048), Some(128));
    }

    #[test]
    fn test_smoother_averages_filled_samples() {
        let mut smoother = SampleSmoother::new(5, 4095);
        assert_eq!(smoother.push(100), 100);
        assert_eq!(smoother.push(200), 150);
        for _ in 0..5 {
            smoother.push(1000);
        }
        assert_eq!(smoother.push(1000), 1000);
        assert_eq!(smoother.push(5000), 4095 / 5 + 800);
    }
}
