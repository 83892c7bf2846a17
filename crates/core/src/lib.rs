//! Core library for PulseDMX, an audio-reactive DMX lighting controller.
//!
//! Audio blocks flow from an [`AudioSource`] through the [`AnalysisEngine`]
//! (beats, tempo, band energies). A fixed-rate render loop combines the latest
//! analysis with a [`ParameterStore`] snapshot in the [`PatternEngine`], packs
//! the result into a [`DmxFrame`] and hands it to a [`FrameSink`]. The
//! [`Pipeline`] wires those stages onto their own threads.

pub mod analysis;
pub mod audio;
pub mod config;
pub mod error;
pub mod frame;
pub mod output;
pub mod params;
pub mod pattern;
pub mod pipeline;

/// Channels in one DMX universe.
pub const UNIVERSE_SIZE: usize = 512;
/// Upper bound on the number of addressable lights.
pub const MAX_LIGHTS: usize = 8;
/// Lights driven when nothing else is configured.
pub const DEFAULT_LIGHT_COUNT: usize = 4;

pub use analysis::{AnalysisEngine, AnalysisFrame, BandEnergies, BeatEvent, Genre};
pub use audio::{
    list_input_devices, AudioSource, ClickTrackSource, InputDeviceInfo, ReaderSource, SampleBlock,
    SilenceSource,
};
#[cfg(feature = "device")]
pub use audio::DeviceSource;
pub use config::{AnalysisConfig, AppConfig, AudioConfig, OutputConfig, RenderConfig};
pub use error::{LightingError, Result};
pub use frame::{DmxFrame, FixtureLayout, FrameBuilder, LightState};
pub use output::{ArtNetSink, FrameSink, FrameTransmitter, MemorySink, NullSink, TransmitStats};
pub use params::{
    Control, ControlCommand, ControlSurface, Effect, Mode, ParameterSnapshot, ParameterStore, PatternId,
    ProgramId, Telemetry, Theme,
};
pub use pattern::{PatternEngine, TickInput};
pub use pipeline::{AnalysisFeed, Pipeline, PipelineHandle, SourceFactory};
