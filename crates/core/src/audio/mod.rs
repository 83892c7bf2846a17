//! Audio acquisition.
//!
//! Every source hands out fixed-size mono [`SampleBlock`]s in arrival order.
//! Timestamps are derived from the running sample count so that analysis is
//! reproducible for a given input, independent of scheduler jitter.

use std::{
    thread,
    time::{Duration, Instant},
};

use crate::Result;

#[cfg(feature = "device")]
mod device;
mod reader;
mod synthetic;

#[cfg(feature = "device")]
pub use device::DeviceSource;
pub use reader::ReaderSource;
pub use synthetic::{ClickTrackSource, SilenceSource};

/// Ordered block of mono samples produced by an [`AudioSource`].
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBlock {
    /// Monotonically increasing block counter.
    pub sequence: u64,
    /// Offset of the first sample from the start of the stream.
    pub timestamp: Duration,
    pub samples: Vec<f32>,
}

impl SampleBlock {
    /// An all-zero block, used wherever real audio is unavailable.
    pub fn silent(sequence: u64, timestamp: Duration, len: usize) -> Self {
        Self {
            sequence,
            timestamp,
            samples: vec![0.0; len],
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Root mean square of the block, treating non-finite samples as zero.
    pub fn rms(&self) -> f32 {
        compute_rms(&self.samples)
    }
}

/// Anything that can deliver fixed-size sample blocks.
///
/// `next_block` blocks until a full block is available. A recoverable error
/// (for example [`crate::LightingError::DeviceLost`]) tells the caller to
/// substitute silence and try again on the next cadence.
pub trait AudioSource {
    fn next_block(&mut self) -> Result<SampleBlock>;

    fn sample_rate(&self) -> u32;

    fn block_size(&self) -> usize;

    /// Human readable description used in log output.
    fn describe(&self) -> String {
        format!("{} Hz / {} samples", self.sample_rate(), self.block_size())
    }

    /// Input buffers lost so far because analysis fell behind.
    fn overflows(&self) -> u64 {
        0
    }
}

impl<S: AudioSource + ?Sized> AudioSource for Box<S> {
    fn next_block(&mut self) -> Result<SampleBlock> {
        (**self).next_block()
    }

    fn sample_rate(&self) -> u32 {
        (**self).sample_rate()
    }

    fn block_size(&self) -> usize {
        (**self).block_size()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }

    fn overflows(&self) -> u64 {
        (**self).overflows()
    }
}

/// Maps block sequence numbers to stream time.
#[derive(Debug, Clone, Copy)]
pub struct BlockClock {
    sample_rate: u32,
    block_size: usize,
}

impl BlockClock {
    pub fn new(sample_rate: u32, block_size: usize) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            block_size,
        }
    }

    pub fn timestamp(&self, sequence: u64) -> Duration {
        let samples = sequence as f64 * self.block_size as f64;
        Duration::from_secs_f64(samples / self.sample_rate as f64)
    }

    pub fn block_duration(&self) -> Duration {
        Duration::from_secs_f64(self.block_size as f64 / self.sample_rate as f64)
    }
}

/// Re-chunks arbitrarily sized sample buffers into fixed-size blocks.
#[derive(Debug)]
pub struct BlockAssembler {
    clock: BlockClock,
    block_size: usize,
    pending: Vec<f32>,
    sequence: u64,
}

impl BlockAssembler {
    pub fn new(sample_rate: u32, block_size: usize) -> Self {
        Self {
            clock: BlockClock::new(sample_rate, block_size),
            block_size,
            pending: Vec::with_capacity(block_size * 2),
            sequence: 0,
        }
    }

    /// Appends samples and returns every block that became complete.
    pub fn push(&mut self, samples: &[f32]) -> Vec<SampleBlock> {
        self.pending
            .extend(samples.iter().map(|s| if s.is_finite() { *s } else { 0.0 }));

        let mut ready = Vec::new();
        while self.pending.len() >= self.block_size {
            let rest = self.pending.split_off(self.block_size);
            let samples = std::mem::replace(&mut self.pending, rest);
            ready.push(SampleBlock {
                sequence: self.sequence,
                timestamp: self.clock.timestamp(self.sequence),
                samples,
            });
            self.sequence += 1;
        }
        ready
    }
}

/// Sleeps so that successive calls are spaced by a fixed interval.
#[derive(Debug)]
pub(crate) struct Pacer {
    interval: Duration,
    next: Option<Instant>,
}

impl Pacer {
    pub(crate) fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: None,
        }
    }

    pub(crate) fn wait(&mut self) {
        let now = Instant::now();
        let deadline = self.next.unwrap_or(now);
        if deadline > now {
            thread::sleep(deadline - now);
        }
        // Fall back to "now" if we are more than one interval late.
        let base = if now > deadline + self.interval {
            now
        } else {
            deadline
        };
        self.next = Some(base + self.interval);
    }
}

/// Describes an input device reported by the audio host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputDeviceInfo {
    pub name: String,
    pub is_default: bool,
}

/// Enumerates the capture devices of the default audio host.
#[cfg(feature = "device")]
pub fn list_input_devices() -> Result<Vec<InputDeviceInfo>> {
    device::list_input_devices()
}

/// Enumerates the capture devices of the default audio host.
#[cfg(not(feature = "device"))]
pub fn list_input_devices() -> Result<Vec<InputDeviceInfo>> {
    Err(crate::LightingError::NoAudioSubsystem(
        "built without the `device` feature".to_string(),
    ))
}

pub(crate) fn compute_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples
        .iter()
        .filter(|s| s.is_finite())
        .map(|sample| sample * sample)
        .sum();
    (sum / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembles_fixed_blocks_in_order() {
        let mut assembler = BlockAssembler::new(100, 4);

        assert!(assembler.push(&[0.1, 0.2, 0.3]).is_empty());
        let blocks = assembler.push(&[0.4, 0.5, 0.6, 0.7, 0.8, 0.9]);

        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].samples, vec![0.1, 0.2, 0.3, 0.4]);
        assert_eq!(blocks[1].samples, vec![0.5, 0.6, 0.7, 0.8]);
        assert_eq!(blocks[0].sequence, 0);
        assert_eq!(blocks[1].sequence, 1);
        assert_eq!(blocks[1].timestamp, Duration::from_millis(40));
        assert_eq!(assembler.push(&[1.0; 4])[0].sequence, 2);
    }

    #[test]
    fn replaces_non_finite_samples() {
        let mut assembler = BlockAssembler::new(100, 2);
        let blocks = assembler.push(&[f32::NAN, f32::INFINITY]);
        assert_eq!(blocks[0].samples, vec![0.0, 0.0]);
    }

    #[test]
    fn rms_of_constant_signal() {
        let block = SampleBlock {
            sequence: 0,
            timestamp: Duration::ZERO,
            samples: vec![0.5; 64],
        };
        assert!((block.rms() - 0.5).abs() < 1e-6);
        assert_eq!(SampleBlock::silent(0, Duration::ZERO, 8).rms(), 0.0);
    }
}
