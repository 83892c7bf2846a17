use std::f32::consts::PI;

use super::{AudioSource, BlockClock, Pacer, SampleBlock};
use crate::Result;

/// Steady stream of all-zero blocks.
#[derive(Debug)]
pub struct SilenceSource {
    clock: BlockClock,
    block_size: usize,
    sample_rate: u32,
    sequence: u64,
    pacer: Option<Pacer>,
}

impl SilenceSource {
    /// Creates a source that returns blocks as fast as they are requested.
    pub fn new(sample_rate: u32, block_size: usize) -> Self {
        let clock = BlockClock::new(sample_rate, block_size);
        Self {
            clock,
            block_size,
            sample_rate,
            sequence: 0,
            pacer: None,
        }
    }

    /// Creates a source that delivers one block per block duration, like a
    /// real device would.
    pub fn paced(sample_rate: u32, block_size: usize) -> Self {
        let mut source = Self::new(sample_rate, block_size);
        source.pacer = Some(Pacer::new(source.clock.block_duration()));
        source
    }
}

impl AudioSource for SilenceSource {
    fn next_block(&mut self) -> Result<SampleBlock> {
        if let Some(pacer) = self.pacer.as_mut() {
            pacer.wait();
        }
        let block = SampleBlock::silent(
            self.sequence,
            self.clock.timestamp(self.sequence),
            self.block_size,
        );
        self.sequence += 1;
        Ok(block)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn block_size(&self) -> usize {
        self.block_size
    }

    fn describe(&self) -> String {
        "silence".to_string()
    }
}

/// Deterministic metronome: short percussive bursts at a fixed tempo.
///
/// Each click is a decaying mix of a low thump and a bright transient so
/// that it registers in both the bass and the high band.
#[derive(Debug)]
pub struct ClickTrackSource {
    clock: BlockClock,
    block_size: usize,
    sample_rate: u32,
    bpm: f32,
    amplitude: f32,
    position: u64,
    sequence: u64,
    pacer: Option<Pacer>,
}

const CLICK_SECONDS: f32 = 0.06;
const CLICK_DECAY: f32 = 0.015;

impl ClickTrackSource {
    pub fn new(sample_rate: u32, block_size: usize, bpm: f32) -> Self {
        Self {
            clock: BlockClock::new(sample_rate, block_size),
            block_size,
            sample_rate,
            bpm: bpm.max(1.0),
            amplitude: 0.8,
            position: 0,
            sequence: 0,
            pacer: None,
        }
    }

    /// Delivers blocks at real-time cadence.
    pub fn paced(mut self) -> Self {
        self.pacer = Some(Pacer::new(self.clock.block_duration()));
        self
    }

    fn sample_at(&self, index: u64) -> f32 {
        let rate = self.sample_rate as f32;
        let period = (rate * 60.0 / self.bpm) as u64;
        let offset = index % period.max(1);
        let t = offset as f32 / rate;
        if t >= CLICK_SECONDS {
            return 0.0;
        }
        let envelope = (-t / CLICK_DECAY).exp();
        let thump = (2.0 * PI * 90.0 * t).sin();
        let snap = (2.0 * PI * 3_200.0 * t).sin() * 0.5;
        self.amplitude * envelope * (thump + snap) / 1.5
    }
}

impl AudioSource for ClickTrackSource {
    fn next_block(&mut self) -> Result<SampleBlock> {
        if let Some(pacer) = self.pacer.as_mut() {
            pacer.wait();
        }
        let samples = (0..self.block_size as u64)
            .map(|i| self.sample_at(self.position + i))
            .collect();
        self.position += self.block_size as u64;

        let block = SampleBlock {
            sequence: self.sequence,
            timestamp: self.clock.timestamp(self.sequence),
            samples,
        };
        self.sequence += 1;
        Ok(block)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn block_size(&self) -> usize {
        self.block_size
    }

    fn describe(&self) -> String {
        format!("click track at {:.1} BPM", self.bpm)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn silence_is_all_zero_and_sequenced() {
        let mut source = SilenceSource::new(44_100, 512);
        let first = source.next_block().unwrap();
        let second = source.next_block().unwrap();

        assert_eq!(first.len(), 512);
        assert!(first.samples.iter().all(|s| *s == 0.0));
        assert_eq!(second.sequence, first.sequence + 1);
        assert!(second.timestamp > first.timestamp);
    }

    #[test]
    fn click_track_is_deterministic() {
        let mut a = ClickTrackSource::new(44_100, 512, 120.0);
        let mut b = ClickTrackSource::new(44_100, 512, 120.0);
        for _ in 0..50 {
            assert_eq!(a.next_block().unwrap(), b.next_block().unwrap());
        }
    }

    #[test]
    fn click_track_places_clicks_on_the_beat() {
        let mut source = ClickTrackSource::new(1_000, 100, 120.0);
        // 120 BPM at 1 kHz: a click every 500 samples, i.e. every fifth block.
        let loud: Vec<u64> = (0..20)
            .map(|_| source.next_block().unwrap())
            .filter(|block| block.rms() > 0.05)
            .map(|block| block.sequence)
            .collect();
        assert_eq!(loud, vec![0, 5, 10, 15]);
        assert_eq!(BlockClock::new(1_000, 100).timestamp(5), Duration::from_millis(500));
    }
}
