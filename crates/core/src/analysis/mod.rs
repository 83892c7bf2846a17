use std::{f32::consts::PI, fmt, sync::Arc, time::Duration};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};
use serde::{Deserialize, Serialize};

use crate::{audio::compute_rms, AnalysisConfig, LightingError, Result, SampleBlock};

mod features;
mod onset;
mod spectrum;

pub use features::{Dynamics, DynamicsTracker, Genre, GenreDetector};
pub use onset::{BeatEvent, OnsetAnalyzer, TempoTracker};
pub use spectrum::{BandEnergies, SpectrumAnalyzer};

/// Everything the analysis stage learned from one sample block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisFrame {
    pub sequence: u64,
    pub timestamp: Duration,
    /// Raw block RMS before smoothing.
    pub rms: f32,
    pub beat: Option<BeatEvent>,
    pub bands: BandEnergies,
    /// Current tempo estimate, `None` while unknown.
    pub bpm: Option<f32>,
    /// False once enough consecutive silent blocks have been seen.
    pub audio_active: bool,
    pub dynamics: Dynamics,
    pub genre: Genre,
}

/// Runs onset, spectrum and feature analysis over a shared sliding window.
///
/// One Hann-windowed real FFT of the last `win_size` samples is computed per
/// block; both the onset detector and the band analyzer read the same
/// magnitude spectrum.
pub struct AnalysisEngine {
    config: AnalysisConfig,
    sample_rate: u32,
    window: Vec<f32>,
    hann: Vec<f32>,
    magnitudes: Vec<f32>,
    fft_planner: RealFftPlanner<f32>,
    fft: Option<FftResources>,
    onset: OnsetAnalyzer,
    spectrum: SpectrumAnalyzer,
    dynamics: DynamicsTracker,
    genre: GenreDetector,
    silent_blocks: u32,
    processed_blocks: u64,
}

impl AnalysisEngine {
    pub fn new(config: &AnalysisConfig, sample_rate: u32) -> Self {
        let win_size = config.win_size.max(2);
        Self {
            config: config.clone(),
            sample_rate,
            window: vec![0.0; win_size],
            hann: (0..win_size).map(|i| hann_value(i, win_size)).collect(),
            magnitudes: vec![0.0; win_size / 2 + 1],
            fft_planner: RealFftPlanner::new(),
            fft: None,
            onset: OnsetAnalyzer::new(config),
            spectrum: SpectrumAnalyzer::new(sample_rate, win_size, config.smoothing),
            dynamics: DynamicsTracker::new(),
            genre: GenreDetector::new(),
            silent_blocks: config.silence_blocks,
            processed_blocks: 0,
        }
    }

    /// Analyses one block. A block of the wrong length is rejected so the
    /// caller can substitute silence for it.
    pub fn process_block(&mut self, block: &SampleBlock) -> Result<AnalysisFrame> {
        if block.is_empty() {
            return Err(LightingError::msg("analysis requires at least one sample"));
        }
        if block.len() > self.window.len() {
            return Err(LightingError::msg(format!(
                "block of {} samples exceeds the {}-sample analysis window",
                block.len(),
                self.window.len()
            )));
        }

        self.slide_window(&block.samples);
        self.compute_magnitudes()?;
        self.processed_blocks += 1;

        let seconds = block.timestamp.as_secs_f32();
        let rms = compute_rms(&block.samples);
        let silent = rms < self.config.silence_threshold;
        if silent {
            self.silent_blocks = self.silent_blocks.saturating_add(1);
        } else {
            self.silent_blocks = 0;
        }
        let audio_active = self.silent_blocks < self.config.silence_blocks;

        let beat = self.onset.process(seconds, &self.magnitudes, silent);
        let bands = self.spectrum.process(&self.magnitudes, rms);
        let dynamics = self.dynamics.update(seconds, bands.loudness);
        let bpm = self.onset.bpm();
        let genre = self.genre.update(bpm, bands.bass, beat.is_some());

        if self.processed_blocks % 500 == 0 {
            tracing::debug!(
                blocks = self.processed_blocks,
                bpm = ?bpm,
                loudness = bands.loudness,
                audio_active,
                "analysis progress"
            );
        }

        Ok(AnalysisFrame {
            sequence: block.sequence,
            timestamp: block.timestamp,
            rms,
            beat,
            bands,
            bpm,
            audio_active,
            dynamics,
            genre,
        })
    }

    fn slide_window(&mut self, samples: &[f32]) {
        let len = samples.len();
        self.window.copy_within(len.., 0);
        let start = self.window.len() - len;
        for (slot, sample) in self.window[start..].iter_mut().zip(samples) {
            *slot = if sample.is_finite() { *sample } else { 0.0 };
        }
    }

    fn compute_magnitudes(&mut self) -> Result<()> {
        let size = self.window.len();
        let rebuild = self
            .fft
            .as_ref()
            .map(|fft| fft.size != size)
            .unwrap_or(true);

        if rebuild {
            let plan = self.fft_planner.plan_fft_forward(size);
            let scratch = plan.make_scratch_vec();
            let spectrum = plan.make_output_vec();
            let input = plan.make_input_vec();
            self.fft = Some(FftResources {
                size,
                plan,
                scratch,
                spectrum,
                input,
            });
        }

        let fft = self
            .fft
            .as_mut()
            .ok_or_else(|| LightingError::msg("fft resources missing"))?;

        for ((slot, sample), weight) in fft.input.iter_mut().zip(&self.window).zip(&self.hann) {
            *slot = sample * weight;
        }

        fft.plan
            .process_with_scratch(&mut fft.input, &mut fft.spectrum, &mut fft.scratch)
            .map_err(|err| LightingError::msg(format!("fft failed: {err}")))?;

        let norm = 1.0 / size as f32;
        for (magnitude, bin) in self.magnitudes.iter_mut().zip(&fft.spectrum) {
            *magnitude = bin.norm() * norm;
        }
        Ok(())
    }
}

struct FftResources {
    size: usize,
    plan: Arc<dyn RealToComplex<f32>>,
    scratch: Vec<Complex32>,
    spectrum: Vec<Complex32>,
    input: Vec<f32>,
}

impl fmt::Debug for AnalysisEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisEngine")
            .field("sample_rate", &self.sample_rate)
            .field("win_size", &self.window.len())
            .field("processed_blocks", &self.processed_blocks)
            .field("silent_blocks", &self.silent_blocks)
            .field("bpm", &self.onset.bpm())
            .finish()
    }
}

impl fmt::Debug for FftResources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FftResources")
            .field("size", &self.size)
            .finish()
    }
}

fn hann_value(index: usize, len: usize) -> f32 {
    if len <= 1 {
        return 1.0;
    }

    0.5 - 0.5 * ((2.0 * PI * index as f32) / (len as f32 - 1.0)).cos()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AudioSource, ClickTrackSource, SilenceSource};

    fn build_engine() -> AnalysisEngine {
        AnalysisEngine::new(&AnalysisConfig::default(), 44_100)
    }

    #[test]
    fn silence_yields_no_beats_and_quiet_bands() {
        let mut engine = build_engine();
        let mut source = SilenceSource::new(44_100, 512);

        let mut beats = 0;
        let mut last = AnalysisFrame::default();
        for _ in 0..200 {
            last = engine.process_block(&source.next_block().unwrap()).unwrap();
            beats += usize::from(last.beat.is_some());
        }

        assert_eq!(beats, 0);
        assert_eq!(last.bpm, None);
        assert!(last.bands.loudness < 1e-6);
        assert!(!last.audio_active);
    }

    #[test]
    fn loudness_decays_after_audio_stops() {
        let mut engine = build_engine();
        let mut clicks = ClickTrackSource::new(44_100, 512, 120.0);
        for _ in 0..200 {
            engine.process_block(&clicks.next_block().unwrap()).unwrap();
        }

        let mut silence = SilenceSource::new(44_100, 512);
        let mut beats = 0;
        let mut frame = AnalysisFrame::default();
        for i in 0..150u64 {
            let mut block = silence.next_block().unwrap();
            block.sequence = 200 + i;
            block.timestamp = crate::audio::BlockClock::new(44_100, 512).timestamp(200 + i);
            frame = engine.process_block(&block).unwrap();
            beats += usize::from(frame.beat.is_some());
        }

        assert_eq!(beats, 0);
        assert!(frame.bands.loudness < 0.01, "loudness {}", frame.bands.loudness);
    }

    #[test]
    fn click_track_tempo_is_detected() {
        let mut engine = build_engine();
        let mut source = ClickTrackSource::new(44_100, 512, 120.0);

        let mut beats = 0;
        let mut bpm = None;
        // Ten seconds of audio.
        for _ in 0..861 {
            let frame = engine.process_block(&source.next_block().unwrap()).unwrap();
            beats += usize::from(frame.beat.is_some());
            bpm = frame.bpm;
            assert!(frame.audio_active);
        }

        assert!((18..=22).contains(&beats), "detected {beats} beats");
        let bpm = bpm.expect("tempo should be known");
        assert!((bpm - 120.0).abs() < 5.0, "estimated {bpm}");
    }

    #[test]
    fn bpm_stays_within_configured_bounds() {
        let config = AnalysisConfig::default();
        let mut engine = AnalysisEngine::new(&config, 44_100);
        // 300 BPM clicks are faster than the allowed range.
        let mut source = ClickTrackSource::new(44_100, 512, 300.0);
        for _ in 0..600 {
            let frame = engine.process_block(&source.next_block().unwrap()).unwrap();
            if let Some(bpm) = frame.bpm {
                assert!(bpm >= config.min_bpm && bpm <= config.max_bpm);
            }
        }
    }

    #[test]
    fn rejects_empty_and_oversized_blocks() {
        let mut engine = build_engine();
        let empty = SampleBlock::silent(0, Duration::ZERO, 0);
        assert!(engine.process_block(&empty).is_err());

        let huge = SampleBlock::silent(0, Duration::ZERO, 4096);
        assert!(engine.process_block(&huge).is_err());
    }
}
