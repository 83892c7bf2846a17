use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{frame::FixtureLayout, LightingError, Result, MAX_LIGHTS, UNIVERSE_SIZE};

/// Top-level configuration structure for the application.
///
/// Loaded once at startup and handed to each component's constructor. Every
/// section falls back to its defaults when omitted from the TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub analysis: AnalysisConfig,
    pub render: RenderConfig,
    pub output: OutputConfig,
    pub fixture: FixtureLayout,
}

impl AppConfig {
    pub fn live_defaults() -> Self {
        Self::default()
    }

    /// Reads and validates a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&text)?;
        tracing::info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Parses and validates configuration from TOML text.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let audio = &self.audio;
        let analysis = &self.analysis;

        if audio.sample_rate < 8_000 {
            return Err(config_error("audio.sample_rate must be at least 8000 Hz"));
        }
        if audio.block_size < 2 || audio.block_size > 16_384 {
            return Err(config_error("audio.block_size must be within 2..=16384"));
        }
        if !analysis.win_size.is_power_of_two() {
            return Err(config_error("analysis.win_size must be a power of two"));
        }
        if analysis.hop_size == 0 || analysis.hop_size > analysis.win_size {
            return Err(config_error(
                "analysis.hop_size must be non-zero and no larger than win_size",
            ));
        }
        if analysis.hop_size != audio.block_size {
            return Err(config_error(
                "analysis.hop_size must equal audio.block_size (one analysis step per block)",
            ));
        }
        if !(analysis.min_bpm > 0.0 && analysis.min_bpm < analysis.max_bpm) {
            return Err(config_error("analysis.min_bpm must be positive and below max_bpm"));
        }
        if !(0.0..=1.0).contains(&analysis.beat_confidence_thresh) {
            return Err(config_error("analysis.beat_confidence_thresh must be within 0..=1"));
        }
        if !(0.0..1.0).contains(&analysis.smoothing) {
            return Err(config_error("analysis.smoothing must be within 0..1"));
        }
        if analysis.beat_history < 2 {
            return Err(config_error("analysis.beat_history must keep at least two beats"));
        }
        if !(1..=100).contains(&self.render.fps) {
            return Err(config_error("render.fps must be within 1..=100"));
        }
        if !(1..=MAX_LIGHTS).contains(&self.render.default_light_count) {
            return Err(config_error(format!(
                "render.default_light_count must be within 1..={MAX_LIGHTS}"
            )));
        }
        if self.output.universe == 0 {
            return Err(config_error("output.universe must be a positive integer"));
        }
        if self.output.reconnect_initial_ms == 0
            || self.output.reconnect_initial_ms > self.output.reconnect_max_ms
        {
            return Err(config_error(
                "output.reconnect_initial_ms must be non-zero and not exceed reconnect_max_ms",
            ));
        }

        self.fixture.validate()?;
        let universe_channels = MAX_LIGHTS * self.fixture.channels_per_fixture;
        if universe_channels > UNIVERSE_SIZE {
            return Err(config_error(format!(
                "{MAX_LIGHTS} fixtures of {} channels exceed the {UNIVERSE_SIZE}-channel universe",
                self.fixture.channels_per_fixture
            )));
        }

        Ok(())
    }
}

fn config_error(msg: impl Into<String>) -> LightingError {
    LightingError::Config(msg.into())
}

/// Configuration specific to the audio subsystem.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    /// Input device name; `None` selects the system default.
    pub device_name: Option<String>,
    pub sample_rate: u32,
    pub block_size: usize,
}

impl AudioConfig {
    /// Wall-clock duration covered by one block.
    pub fn block_duration(&self) -> Duration {
        Duration::from_secs_f64(self.block_size as f64 / self.sample_rate.max(1) as f64)
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device_name: None,
            sample_rate: 44_100,
            block_size: 512,
        }
    }
}

/// Tuning for onset detection, tempo tracking and band analysis.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnalysisConfig {
    pub win_size: usize,
    pub hop_size: usize,
    pub min_bpm: f32,
    pub max_bpm: f32,
    pub beat_confidence_thresh: f32,
    /// Block RMS below this counts as silence.
    pub silence_threshold: f32,
    /// Consecutive silent blocks before audio is reported as paused.
    pub silence_blocks: u32,
    /// Seconds of silence before the tempo estimate becomes unknown.
    pub bpm_timeout_secs: f32,
    pub smoothing: f32,
    pub min_beat_interval_secs: f32,
    /// Beats kept for inter-onset tempo estimation.
    pub beat_history: usize,
    /// Flux values in the moving threshold (about half a second).
    pub flux_history: usize,
    /// Multiple of the moving flux average an onset must exceed.
    pub flux_ratio: f32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            win_size: 1024,
            hop_size: 512,
            min_bpm: 60.0,
            max_bpm: 180.0,
            beat_confidence_thresh: 0.2,
            silence_threshold: 0.01,
            silence_blocks: 44,
            bpm_timeout_secs: 3.0,
            smoothing: 0.95,
            min_beat_interval_secs: 0.1,
            beat_history: 8,
            flux_history: 43,
            flux_ratio: 1.5,
        }
    }
}

/// Render tick configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RenderConfig {
    pub fps: u32,
    pub default_light_count: usize,
    /// Ticks a beat-triggered strobe flash stays lit.
    pub flash_ticks: u32,
    /// Seed for pattern randomness; `None` draws one from the OS.
    pub seed: Option<u64>,
}

impl RenderConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps.max(1) as f64)
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            fps: 30,
            default_light_count: 4,
            flash_ticks: 2,
            seed: None,
        }
    }
}

/// Connection settings for the lighting daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    pub universe: u16,
    /// Art-Net input of the lighting daemon.
    pub daemon_address: String,
    pub reconnect_initial_ms: u64,
    pub reconnect_max_ms: u64,
    /// Consecutive failed attempts before the daemon is reported unreachable.
    pub max_attempts: u32,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            universe: 1,
            daemon_address: "127.0.0.1:6454".to_string(),
            reconnect_initial_ms: 250,
            reconnect_max_ms: 5_000,
            max_attempts: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::live_defaults();
        config.validate().unwrap();
        assert_eq!(config.audio.sample_rate, 44_100);
        assert_eq!(config.audio.block_size, 512);
        assert_eq!(config.render.fps, 30);
        assert_eq!(config.output.universe, 1);
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [render]
            fps = 40

            [output]
            universe = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.render.fps, 40);
        assert_eq!(config.output.universe, 3);
        assert_eq!(config.analysis.win_size, 1024);
        assert_eq!(config.fixture.channels_per_fixture, 8);
    }

    #[test]
    fn rejects_colliding_channel_mapping() {
        let err = AppConfig::from_toml(
            r#"
            [fixture]
            red = 0
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, LightingError::Config(_)));
    }

    #[test]
    fn rejects_oversized_fixtures() {
        let err = AppConfig::from_toml(
            r#"
            [fixture]
            channels_per_fixture = 96
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("universe"));
    }

    #[test]
    fn rejects_inverted_bpm_range() {
        let mut config = AppConfig::default();
        config.analysis.min_bpm = 200.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[audio]\nsample_rate = 48000").unwrap();

        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.audio.sample_rate, 48_000);
    }

    #[test]
    fn block_duration_matches_rate() {
        let audio = AudioConfig::default();
        let millis = audio.block_duration().as_secs_f64() * 1000.0;
        assert!((millis - 11.61).abs() < 0.01);
    }
}
