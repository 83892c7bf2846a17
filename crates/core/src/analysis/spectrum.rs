use serde::{Deserialize, Serialize};

pub const BASS_RANGE: (f32, f32) = (20.0, 250.0);
pub const MID_RANGE: (f32, f32) = (250.0, 2_000.0);
pub const HIGH_RANGE: (f32, f32) = (2_000.0, 20_000.0);

// Per-block decay of the running peak used for normalisation; about a
// halving every eight seconds at the default block rate.
const PEAK_DECAY: f32 = 0.999;
const PEAK_FLOOR: f32 = 1e-9;

/// Smoothed band levels, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BandEnergies {
    pub bass: f32,
    pub mid: f32,
    pub high: f32,
    /// Smoothed RMS loudness.
    pub loudness: f32,
}

impl BandEnergies {
    /// Level of the strongest band.
    pub fn peak(&self) -> f32 {
        self.bass.max(self.mid).max(self.high)
    }
}

/// Splits a magnitude spectrum into bass, mid and high energy.
///
/// Each band is normalised against its own slowly decaying peak and then
/// exponentially smoothed, so levels stay in `[0, 1]` regardless of input
/// gain.
#[derive(Debug, Clone)]
pub struct SpectrumAnalyzer {
    smoothing: f32,
    bass_bins: (usize, usize),
    mid_bins: (usize, usize),
    high_bins: (usize, usize),
    peaks: [f32; 3],
    current: BandEnergies,
}

impl SpectrumAnalyzer {
    pub fn new(sample_rate: u32, win_size: usize, smoothing: f32) -> Self {
        let bin_hz = sample_rate as f32 / win_size.max(1) as f32;
        let bins = win_size / 2 + 1;
        let range = |(low, high): (f32, f32)| {
            let start = ((low / bin_hz).ceil() as usize).min(bins);
            let end = ((high / bin_hz).floor() as usize + 1).min(bins);
            (start, end.max(start))
        };
        Self {
            smoothing: smoothing.clamp(0.0, 0.999),
            bass_bins: range(BASS_RANGE),
            mid_bins: range(MID_RANGE),
            high_bins: range(HIGH_RANGE),
            peaks: [PEAK_FLOOR; 3],
            current: BandEnergies::default(),
        }
    }

    pub fn current(&self) -> BandEnergies {
        self.current
    }

    pub fn process(&mut self, magnitudes: &[f32], rms: f32) -> BandEnergies {
        let raw = [
            band_energy(magnitudes, self.bass_bins),
            band_energy(magnitudes, self.mid_bins),
            band_energy(magnitudes, self.high_bins),
        ];

        let mut normalised = [0.0f32; 3];
        for ((peak, energy), level) in self.peaks.iter_mut().zip(raw).zip(normalised.iter_mut()) {
            *peak = (*peak * PEAK_DECAY).max(energy).max(PEAK_FLOOR);
            *level = if energy > PEAK_FLOOR {
                (energy / *peak).clamp(0.0, 1.0)
            } else {
                0.0
            };
        }

        let keep = self.smoothing;
        let blend = |previous: f32, target: f32| previous * keep + target * (1.0 - keep);
        let loudness = if rms.is_finite() { rms.clamp(0.0, 1.0) } else { 0.0 };
        self.current = BandEnergies {
            bass: blend(self.current.bass, normalised[0]),
            mid: blend(self.current.mid, normalised[1]),
            high: blend(self.current.high, normalised[2]),
            loudness: blend(self.current.loudness, loudness),
        };
        self.current
    }
}

fn band_energy(magnitudes: &[f32], (start, end): (usize, usize)) -> f32 {
    magnitudes
        .get(start..end.min(magnitudes.len()))
        .map(|bins| bins.iter().map(|m| m * m).sum())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spectrum_with_peak_at(hz: f32) -> Vec<f32> {
        let mut bins = vec![0.0; 513];
        let index = (hz / (44_100.0 / 1024.0)).round() as usize;
        bins[index] = 1.0;
        bins
    }

    #[test]
    fn energy_lands_in_the_matching_band() {
        let mut analyzer = SpectrumAnalyzer::new(44_100, 1024, 0.0);

        let bass = analyzer.process(&spectrum_with_peak_at(100.0), 0.5);
        assert!(bass.bass > 0.9 && bass.mid == 0.0 && bass.high == 0.0);

        let high = analyzer.process(&spectrum_with_peak_at(5_000.0), 0.5);
        assert!(high.high > 0.9 && high.bass == 0.0);
        assert!((high.loudness - 0.5).abs() < 1e-6);
    }

    #[test]
    fn levels_stay_in_unit_range_under_smoothing() {
        let mut analyzer = SpectrumAnalyzer::new(44_100, 1024, 0.95);
        let loud: Vec<f32> = vec![10.0; 513];
        for _ in 0..500 {
            let bands = analyzer.process(&loud, 3.0);
            for level in [bands.bass, bands.mid, bands.high, bands.loudness] {
                assert!((0.0..=1.0).contains(&level));
            }
        }
        assert!(analyzer.current().peak() > 0.99);
    }

    #[test]
    fn smoothing_decays_toward_zero() {
        let mut analyzer = SpectrumAnalyzer::new(44_100, 1024, 0.95);
        analyzer.process(&vec![1.0; 513], 1.0);
        let first = analyzer.current();
        let silence = vec![0.0; 513];
        let mut last = first;
        for _ in 0..100 {
            last = analyzer.process(&silence, 0.0);
        }
        assert!(last.bass < first.bass * 0.01);
        assert!(last.loudness < 0.01);
    }
}
