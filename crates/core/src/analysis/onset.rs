use std::{collections::VecDeque, time::Duration};

use serde::{Deserialize, Serialize};

use crate::AnalysisConfig;

const MIN_FLUX: f32 = 1e-7;
const BPM_BIN_WIDTH: f32 = 2.0;

/// A detected onset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BeatEvent {
    /// Stream time of the block in which the onset was found.
    pub timestamp: Duration,
    /// How far the onset stood out from recent flux, in `[0, 1]`.
    pub confidence: f32,
    /// Tempo estimate including this beat, if one is known.
    pub estimated_bpm: Option<f32>,
}

/// Spectral-flux onset detector.
///
/// Flux is the summed positive change of the magnitude spectrum between
/// consecutive windows. A block is an onset when its flux exceeds the recent
/// average by `flux_ratio`, the resulting confidence clears
/// `beat_confidence_thresh`, the block is not silent, and the previous onset
/// is at least `min_beat_interval_secs` old.
#[derive(Debug)]
pub struct OnsetAnalyzer {
    flux_ratio: f32,
    confidence_thresh: f32,
    min_interval: f32,
    bpm_timeout: f32,
    flux_history_len: usize,
    previous: Vec<f32>,
    flux_history: VecDeque<f32>,
    last_beat: Option<f32>,
    last_sound: Option<f32>,
    tempo: TempoTracker,
}

impl OnsetAnalyzer {
    pub fn new(config: &AnalysisConfig) -> Self {
        Self {
            flux_ratio: config.flux_ratio.max(1.0),
            confidence_thresh: config.beat_confidence_thresh,
            min_interval: config.min_beat_interval_secs.max(0.0),
            bpm_timeout: config.bpm_timeout_secs,
            flux_history_len: config.flux_history.max(1),
            previous: Vec::new(),
            flux_history: VecDeque::with_capacity(config.flux_history.max(1)),
            last_beat: None,
            last_sound: None,
            tempo: TempoTracker::new(config.min_bpm, config.max_bpm, config.beat_history),
        }
    }

    pub fn bpm(&self) -> Option<f32> {
        self.tempo.bpm()
    }

    /// Feeds one magnitude spectrum taken at `seconds` stream time.
    pub fn process(&mut self, seconds: f32, magnitudes: &[f32], silent: bool) -> Option<BeatEvent> {
        let flux = self.spectral_flux(magnitudes);
        let mean = if self.flux_history.is_empty() {
            0.0
        } else {
            self.flux_history.iter().sum::<f32>() / self.flux_history.len() as f32
        };

        if self.flux_history.len() == self.flux_history_len {
            self.flux_history.pop_front();
        }
        self.flux_history.push_back(flux);

        if silent {
            let quiet_for = self.last_sound.map(|t| seconds - t).unwrap_or(f32::MAX);
            if quiet_for >= self.bpm_timeout && self.tempo.bpm().is_some() {
                tracing::debug!(quiet_for, "tempo estimate expired after silence");
                self.tempo.clear();
            }
            return None;
        }
        self.last_sound = Some(seconds);

        if flux <= MIN_FLUX || flux <= mean * self.flux_ratio {
            return None;
        }
        let confidence = ((flux - mean) / flux).clamp(0.0, 1.0);
        if confidence < self.confidence_thresh {
            return None;
        }
        if let Some(last) = self.last_beat {
            if seconds - last < self.min_interval {
                return None;
            }
        }

        self.last_beat = Some(seconds);
        let estimated_bpm = self.tempo.record(seconds);
        Some(BeatEvent {
            timestamp: Duration::from_secs_f32(seconds.max(0.0)),
            confidence,
            estimated_bpm,
        })
    }

    fn spectral_flux(&mut self, magnitudes: &[f32]) -> f32 {
        if self.previous.len() != magnitudes.len() {
            self.previous = vec![0.0; magnitudes.len()];
        }
        let mut flux = 0.0;
        for (prev, current) in self.previous.iter_mut().zip(magnitudes) {
            let rise = current - *prev;
            if rise > 0.0 {
                flux += rise;
            }
            *prev = *current;
        }
        if magnitudes.is_empty() {
            0.0
        } else {
            flux / magnitudes.len() as f32
        }
    }
}

/// Estimates tempo from the spacing of the most recent beats.
///
/// Inter-beat intervals are converted to BPM candidates, candidates outside
/// `[min_bpm, max_bpm]` are discarded, and the densest neighbourhood of a
/// 2 BPM histogram wins. An update that yields no usable candidate leaves
/// the previous estimate in place.
#[derive(Debug, Clone)]
pub struct TempoTracker {
    min_bpm: f32,
    max_bpm: f32,
    capacity: usize,
    beats: VecDeque<f32>,
    bpm: Option<f32>,
}

impl TempoTracker {
    pub fn new(min_bpm: f32, max_bpm: f32, capacity: usize) -> Self {
        Self {
            min_bpm,
            max_bpm,
            capacity: capacity.max(2),
            beats: VecDeque::with_capacity(capacity.max(2)),
            bpm: None,
        }
    }

    pub fn bpm(&self) -> Option<f32> {
        self.bpm
    }

    /// Records a beat at `seconds` and returns the updated estimate.
    pub fn record(&mut self, seconds: f32) -> Option<f32> {
        if self.beats.len() == self.capacity {
            self.beats.pop_front();
        }
        self.beats.push_back(seconds);

        if let Some(bpm) = self.estimate() {
            self.bpm = Some(bpm);
        }
        self.bpm
    }

    /// Forgets all beats and the current estimate.
    pub fn clear(&mut self) {
        self.beats.clear();
        self.bpm = None;
    }

    fn estimate(&self) -> Option<f32> {
        let candidates: Vec<f32> = self
            .beats
            .iter()
            .zip(self.beats.iter().skip(1))
            .map(|(a, b)| b - a)
            .filter(|interval| *interval > 0.0)
            .map(|interval| 60.0 / interval)
            .filter(|bpm| *bpm >= self.min_bpm && *bpm <= self.max_bpm)
            .collect();
        if candidates.is_empty() {
            return None;
        }

        let bins = ((self.max_bpm - self.min_bpm) / BPM_BIN_WIDTH).ceil() as usize + 1;
        let bin_of = |bpm: f32| (((bpm - self.min_bpm) / BPM_BIN_WIDTH) as usize).min(bins - 1);
        let mut counts = vec![0usize; bins];
        for bpm in &candidates {
            counts[bin_of(*bpm)] += 1;
        }

        let score = |bin: usize| {
            let below = if bin > 0 { counts[bin - 1] } else { 0 };
            let above = counts.get(bin + 1).copied().unwrap_or(0);
            below + counts[bin] + above
        };
        let best = (0..bins)
            .max_by(|a, b| score(*a).cmp(&score(*b)).then(b.cmp(a)))
            .unwrap_or(0);

        let mut cluster: Vec<f32> = candidates
            .into_iter()
            .filter(|bpm| bin_of(*bpm).abs_diff(best) <= 1)
            .collect();
        cluster.sort_by(|a, b| a.total_cmp(b));
        let median = cluster.get(cluster.len() / 2).copied()?;
        Some(median.clamp(self.min_bpm, self.max_bpm))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tempo_from_regular_beats() {
        let mut tracker = TempoTracker::new(60.0, 180.0, 8);
        assert_eq!(tracker.record(0.0), None);
        for i in 1..8 {
            tracker.record(i as f32 * 0.5);
        }
        let bpm = tracker.bpm().unwrap();
        assert!((bpm - 120.0).abs() < 0.5, "bpm {bpm}");
    }

    #[test]
    fn out_of_range_intervals_keep_previous_estimate() {
        let mut tracker = TempoTracker::new(60.0, 180.0, 8);
        tracker.record(0.0);
        tracker.record(0.5);
        assert!((tracker.bpm().unwrap() - 120.0).abs() < 0.5);

        // 0.2 s apart is 300 BPM, 3 s apart is 20 BPM.
        tracker.clear();
        tracker.record(10.0);
        tracker.record(10.2);
        assert_eq!(tracker.bpm(), None);

        tracker.record(10.7);
        let bpm = tracker.bpm().unwrap();
        tracker.record(13.7);
        assert_eq!(tracker.bpm(), Some(bpm));
    }

    #[test]
    fn outliers_do_not_move_the_estimate() {
        let mut tracker = TempoTracker::new(60.0, 180.0, 8);
        for t in [0.0, 0.5, 1.0, 1.5, 2.0, 2.3, 2.5, 3.0] {
            tracker.record(t);
        }
        let bpm = tracker.bpm().unwrap();
        assert!((bpm - 120.0).abs() < 1.0, "bpm {bpm}");
    }

    fn spectrum(level: f32) -> Vec<f32> {
        vec![level; 16]
    }

    #[test]
    fn flux_jump_is_an_onset() {
        let mut onset = OnsetAnalyzer::new(&AnalysisConfig::default());
        for i in 0..10 {
            assert!(onset.process(i as f32 * 0.01, &spectrum(0.0), false).is_none());
        }
        let beat = onset.process(0.1, &spectrum(1.0), false).unwrap();
        assert!(beat.confidence >= 0.2);
        assert_eq!(beat.estimated_bpm, None);
    }

    #[test]
    fn silent_blocks_never_beat() {
        let mut onset = OnsetAnalyzer::new(&AnalysisConfig::default());
        onset.process(0.0, &spectrum(0.0), true);
        assert!(onset.process(0.5, &spectrum(1.0), true).is_none());
    }

    #[test]
    fn min_interval_suppresses_double_triggers() {
        let mut onset = OnsetAnalyzer::new(&AnalysisConfig::default());
        assert!(onset.process(0.0, &spectrum(1.0), false).is_some());
        onset.process(0.02, &spectrum(0.0), false);
        assert!(onset.process(0.05, &spectrum(2.0), false).is_none());
    }

    #[test]
    fn tempo_expires_after_long_silence() {
        let config = AnalysisConfig::default();
        let mut onset = OnsetAnalyzer::new(&config);
        let mut t = 0.0;
        for _ in 0..4 {
            onset.process(t, &spectrum(1.0), false);
            onset.process(t + 0.25, &spectrum(0.0), false);
            t += 0.5;
        }
        assert!(onset.bpm().is_some());

        onset.process(t, &spectrum(0.0), true);
        assert!(onset.bpm().is_some());
        onset.process(t + config.bpm_timeout_secs + 0.1, &spectrum(0.0), true);
        assert_eq!(onset.bpm(), None);
    }
}
