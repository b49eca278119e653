//! Voice capture buffer for the voice device
//!
//! Captures 16 kHz 16-bit mono PCM into a preallocated buffer, applying a
//! fixed 4x software gain with saturation. The gain law is
//! `clamp(sample << 2, -32768, 32767)` and must stay bit-exact.

use tracing::debug;

/// Capture sample rate
pub const SAMPLE_RATE_HZ: u32 = 16_000;

/// Capture buffer size in bytes
pub const BUFFER_BYTES: usize = 160 * 1024;

/// Capture buffer size in samples
pub const BUFFER_SAMPLES: usize = BUFFER_BYTES / 2;

/// Apply the 4x gain to one sample
#[inline]
pub fn apply_gain(sample: i16) -> i16 {
    ((sample as i32) << 2).clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

/// Fixed-capacity PCM recorder
#[derive(Debug)]
pub struct PcmRecorder {
    samples: Vec<i16>,
}

impl PcmRecorder {
    /// Allocate the full capture buffer up front
    pub fn new() -> Self {
        Self {
            samples: Vec::with_capacity(BUFFER_SAMPLES),
        }
    }

    /// Append raw samples with gain applied; returns how many were taken
    pub fn push(&mut self, raw: &[i16]) -> usize {
        let room = BUFFER_SAMPLES - self.samples.len();
        let take = raw.len().min(room);
        self.samples
            .extend(raw[..take].iter().copied().map(apply_gain));
        if take < raw.len() {
            debug!(dropped = raw.len() - take, "Capture buffer full");
        }
        take
    }

    /// Captured samples
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// Captured duration in milliseconds
    pub fn duration_ms(&self) -> u32 {
        (self.samples.len() as u64 * 1000 / SAMPLE_RATE_HZ as u64) as u32
    }

    /// Whether the buffer has no room left
    pub fn is_full(&self) -> bool {
        self.samples.len() >= BUFFER_SAMPLES
    }

    /// Discard the capture, keeping the allocation
    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

impl Default for PcmRecorder {
    fn default() -> Self {
        Self::new()
    }
}
