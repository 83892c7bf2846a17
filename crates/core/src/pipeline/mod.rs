//! Thread wiring.
//!
//! Four long-lived threads cooperate:
//!
//! * audio: pulls blocks from the source, analyses them, publishes the latest
//!   [`AnalysisFrame`] and queues beats;
//! * control: applies queued [`ControlCommand`]s to the parameter store;
//! * render: ticks at the configured rate, computes light states and builds
//!   frames;
//! * transmit: owned by the render thread through [`FrameTransmitter`].
//!
//! The audio path never blocks on the render path: beats go through a bounded
//! queue with `try_send`, the latest analysis through an atomic pointer swap.

mod clock;

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use arc_swap::{ArcSwap, ArcSwapOption};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};

use crate::{
    analysis::{AnalysisEngine, AnalysisFrame, BeatEvent},
    audio::{AudioSource, BlockClock, Pacer, SampleBlock},
    config::AppConfig,
    frame::FrameBuilder,
    output::{FrameSink, FrameTransmitter, TransmitStats},
    params::{ControlCommand, ControlSurface, ParameterStore, Telemetry},
    pattern::{PatternEngine, TickInput},
    LightingError, Result,
};

pub use clock::{ClockTick, RenderClock};

const BEAT_QUEUE: usize = 64;
const CONTROL_POLL: Duration = Duration::from_millis(50);
/// Render ticks between debug summaries.
const RENDER_LOG_EVERY: u64 = 300;

/// Latest analysis plus beat bookkeeping, written only by the audio thread.
#[derive(Debug, Default)]
pub struct AnalysisFeed {
    latest: ArcSwap<AnalysisFrame>,
    last_beat: ArcSwapOption<BeatEvent>,
    beat_count: AtomicU64,
    input_overflows: AtomicU64,
}

impl AnalysisFeed {
    pub fn publish(&self, frame: AnalysisFrame) {
        if let Some(beat) = frame.beat {
            self.last_beat.store(Some(Arc::new(beat)));
            self.beat_count.fetch_add(1, Ordering::Relaxed);
        }
        self.latest.store(Arc::new(frame));
    }

    pub fn latest(&self) -> Arc<AnalysisFrame> {
        self.latest.load_full()
    }

    pub fn last_beat(&self) -> Option<BeatEvent> {
        self.last_beat.load_full().map(|beat| *beat)
    }

    pub fn beat_count(&self) -> u64 {
        self.beat_count.load(Ordering::Relaxed)
    }

    /// Input buffers the audio source lost before analysis saw them.
    pub fn input_overflows(&self) -> u64 {
        self.input_overflows.load(Ordering::Relaxed)
    }

    fn record_input_overflows(&self, total: u64) {
        self.input_overflows.store(total, Ordering::Relaxed);
    }
}

/// Builds the audio source inside the audio thread, so sources that are not
/// `Send` (live device streams) can be used.
pub type SourceFactory = Box<dyn FnOnce() -> Result<Box<dyn AudioSource>> + Send>;

/// Entry point for starting the threads.
#[derive(Debug)]
pub struct Pipeline;

impl Pipeline {
    pub fn start(
        config: AppConfig,
        open_source: SourceFactory,
        sink: Box<dyn FrameSink>,
        store: Arc<ParameterStore>,
    ) -> Result<PipelineHandle> {
        config.validate()?;

        let stop = Arc::new(AtomicBool::new(false));
        let feed = Arc::new(AnalysisFeed::default());
        let stats = Arc::new(TransmitStats::default());
        let (beat_tx, beat_rx) = bounded(BEAT_QUEUE);
        let (command_tx, command_rx) = unbounded();

        let transmitter = FrameTransmitter::spawn(sink, &config.output, stats.clone())?;
        let mut threads = Vec::with_capacity(3);

        let audio = AudioStage {
            config: config.clone(),
            feed: feed.clone(),
            beats: beat_tx,
            stop: stop.clone(),
        };
        threads.push(spawn("pulsedmx-audio", move || audio.run(open_source))?);

        let control = ControlStage {
            store: store.clone(),
            commands: command_rx,
            stop: stop.clone(),
        };
        threads.push(spawn("pulsedmx-control", move || control.run())?);

        let render = RenderStage {
            config: config.clone(),
            store: store.clone(),
            feed: feed.clone(),
            beats: beat_rx,
            stop: stop.clone(),
        };
        threads.push(spawn("pulsedmx-render", move || render.run(transmitter))?);

        tracing::info!(
            fps = config.render.fps,
            universe = config.output.universe,
            "pipeline started"
        );

        Ok(PipelineHandle {
            stop,
            threads,
            surface: ControlSurface::new(command_tx, store, feed, stats),
        })
    }
}

fn spawn<F>(name: &str, body: F) -> Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    Ok(thread::Builder::new().name(name.to_string()).spawn(body)?)
}

/// Running pipeline. Dropping it stops the threads as well.
#[derive(Debug)]
pub struct PipelineHandle {
    stop: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
    surface: ControlSurface,
}

impl PipelineHandle {
    pub fn control(&self) -> ControlSurface {
        self.surface.clone()
    }

    pub fn telemetry(&self) -> Telemetry {
        self.surface.telemetry()
    }

    pub fn is_running(&self) -> bool {
        !self.stop.load(Ordering::Relaxed)
    }

    /// Raises the stop flag and joins every thread after its current block
    /// or tick. The render thread sends a final blackout on the way out.
    pub fn shutdown(mut self) -> Result<()> {
        self.stop_and_join()
    }

    fn stop_and_join(&mut self) -> Result<()> {
        self.stop.store(true, Ordering::Relaxed);
        let mut panicked = Vec::new();
        for handle in self.threads.drain(..) {
            let name = handle.thread().name().unwrap_or("pipeline").to_string();
            if handle.join().is_err() {
                panicked.push(name);
            }
        }
        if panicked.is_empty() {
            tracing::info!("pipeline stopped");
            Ok(())
        } else {
            Err(LightingError::msg(format!(
                "pipeline threads panicked: {}",
                panicked.join(", ")
            )))
        }
    }
}

impl Drop for PipelineHandle {
    fn drop(&mut self) {
        if !self.threads.is_empty() {
            if let Err(err) = self.stop_and_join() {
                tracing::error!(error = %err, "pipeline did not stop cleanly");
            }
        }
    }
}

struct AudioStage {
    config: AppConfig,
    feed: Arc<AnalysisFeed>,
    beats: Sender<BeatEvent>,
    stop: Arc<AtomicBool>,
}

impl AudioStage {
    fn run(self, open_source: SourceFactory) {
        let audio = &self.config.audio;
        let mut source = match open_source() {
            Ok(source) => {
                tracing::info!(source = %source.describe(), "audio source opened");
                if source.sample_rate() != audio.sample_rate || source.block_size() != audio.block_size {
                    tracing::warn!(
                        source_rate = source.sample_rate(),
                        source_block = source.block_size(),
                        "audio source format differs from configuration"
                    );
                }
                Some(source)
            }
            Err(err) => {
                tracing::error!(error = %err, "no audio input, continuing with silence");
                None
            }
        };

        let mut engine = AnalysisEngine::new(&self.config.analysis, audio.sample_rate);
        let clock = BlockClock::new(audio.sample_rate, audio.block_size);
        let mut pacer = Pacer::new(clock.block_duration());
        let mut sequence = 0u64;
        let mut degraded = false;

        while !self.stop.load(Ordering::Relaxed) {
            let next = source.as_mut().map(|source| source.next_block());
            if let Some(source) = source.as_ref() {
                self.feed.record_input_overflows(source.overflows());
            }
            let samples = match next {
                Some(Ok(block)) if block.len() == audio.block_size => {
                    if degraded {
                        tracing::info!("audio input recovered");
                        degraded = false;
                    }
                    block.samples
                }
                Some(Ok(block)) => {
                    tracing::warn!(len = block.len(), "dropping block of unexpected size");
                    vec![0.0; audio.block_size]
                }
                Some(Err(err)) => {
                    if !degraded {
                        tracing::warn!(error = %err, "audio input failed, substituting silence");
                        degraded = true;
                    }
                    if !err.is_recoverable() {
                        tracing::error!(error = %err, "closing audio source");
                        source = None;
                    }
                    pacer.wait();
                    vec![0.0; audio.block_size]
                }
                None => {
                    pacer.wait();
                    vec![0.0; audio.block_size]
                }
            };

            let block = SampleBlock {
                sequence,
                timestamp: clock.timestamp(sequence),
                samples,
            };
            sequence += 1;

            match engine.process_block(&block) {
                Ok(frame) => {
                    if let Some(beat) = frame.beat {
                        // A full queue means the render thread is behind; the
                        // beat is still reflected in the published frame.
                        let _ = self.beats.try_send(beat);
                    }
                    self.feed.publish(frame);
                }
                Err(err) => tracing::warn!(error = %err, sequence = block.sequence, "analysis failed"),
            }
        }
        tracing::debug!(blocks = sequence, "audio thread stopped");
    }
}

struct ControlStage {
    store: Arc<ParameterStore>,
    commands: Receiver<ControlCommand>,
    stop: Arc<AtomicBool>,
}

impl ControlStage {
    fn run(self) {
        while !self.stop.load(Ordering::Relaxed) {
            match self.commands.recv_timeout(CONTROL_POLL) {
                Ok(command) => {
                    let description = format!("{command:?}");
                    match command.apply(&self.store) {
                        Ok(()) => tracing::info!(command = %description, "control applied"),
                        Err(err) => tracing::warn!(error = %err, "control rejected"),
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }
}

struct RenderStage {
    config: AppConfig,
    store: Arc<ParameterStore>,
    feed: Arc<AnalysisFeed>,
    beats: Receiver<BeatEvent>,
    stop: Arc<AtomicBool>,
}

impl RenderStage {
    fn run(self, transmitter: FrameTransmitter) {
        let mut clock = RenderClock::new(self.config.render.tick_interval());
        let mut engine = PatternEngine::new(&self.config.render);
        let builder = FrameBuilder::new(self.config.fixture.clone(), self.config.output.universe);
        let mut dropped = 0u64;

        while !self.stop.load(Ordering::Relaxed) {
            let tick = clock.wait();
            let params = self.store.snapshot();
            let beats: Vec<BeatEvent> = self.beats.try_iter().collect();
            let analysis = self.feed.latest();

            let lights = engine.compute(&TickInput {
                tick: tick.index,
                time: tick.time,
                dt: tick.dt,
                beats: &beats,
                analysis: &analysis,
                params: &params,
            });

            match builder.build(&lights) {
                Ok(frame) => {
                    if !transmitter.submit(frame) {
                        dropped += 1;
                    }
                }
                Err(err) => tracing::warn!(error = %err, tick = tick.index, "frame skipped"),
            }

            if tick.index % RENDER_LOG_EVERY == 0 {
                tracing::debug!(
                    tick = tick.index,
                    lights = lights.len(),
                    dropped,
                    skipped = clock.skipped(),
                    "render progress"
                );
            }
        }

        transmitter.shutdown(builder.blackout(self.store.light_count()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::{ClickTrackSource, SilenceSource},
        output::MemorySink,
    };

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.render.seed = Some(11);
        config
    }

    fn click_track(config: &AppConfig) -> SourceFactory {
        let (rate, size) = (config.audio.sample_rate, config.audio.block_size);
        Box::new(move || Ok(Box::new(ClickTrackSource::new(rate, size, 120.0).paced()) as Box<dyn AudioSource>))
    }

    #[test]
    fn feed_counts_beats() {
        let feed = AnalysisFeed::default();
        assert!(feed.last_beat().is_none());
        let beat = BeatEvent {
            timestamp: Duration::from_millis(500),
            confidence: 0.9,
            estimated_bpm: None,
        };
        feed.publish(AnalysisFrame {
            beat: Some(beat),
            ..AnalysisFrame::default()
        });
        feed.publish(AnalysisFrame::default());
        assert_eq!(feed.beat_count(), 1);
        assert_eq!(feed.last_beat(), Some(beat));
        assert!(feed.latest().beat.is_none());
    }

    #[test]
    fn click_track_drives_lights_end_to_end() {
        let config = config();
        let sink = MemorySink::new();
        let store = Arc::new(ParameterStore::default());
        let handle = Pipeline::start(config.clone(), click_track(&config), Box::new(sink.clone()), store).unwrap();

        thread::sleep(Duration::from_millis(2_500));
        let control = handle.control();
        control.set("light_count", "6").unwrap();
        thread::sleep(Duration::from_millis(500));

        let telemetry = handle.telemetry();
        handle.shutdown().unwrap();

        assert!(telemetry.beat_count >= 2, "{telemetry:?}");
        assert!(telemetry.audio_active);
        assert!(telemetry.frames_sent > 0);

        let frames = sink.frames();
        assert!(frames.iter().any(|f| f.len() == 32 && !f.is_dark()));
        assert!(frames.iter().any(|f| f.len() == 48));
        let last = frames.last().unwrap();
        assert!(last.is_dark());
        assert_eq!(last.universe, config.output.universe);
    }

    #[test]
    fn silence_keeps_the_rig_dark() {
        let config = config();
        let (rate, size) = (config.audio.sample_rate, config.audio.block_size);
        let sink = MemorySink::new();
        let store = Arc::new(ParameterStore::default());
        let source: SourceFactory =
            Box::new(move || Ok(Box::new(SilenceSource::paced(rate, size)) as Box<dyn AudioSource>));
        let handle = Pipeline::start(config, source, Box::new(sink.clone()), store).unwrap();

        thread::sleep(Duration::from_millis(500));
        let telemetry = handle.telemetry();
        handle.shutdown().unwrap();

        assert_eq!(telemetry.beat_count, 0);
        assert!(!telemetry.audio_active);
        let frames = sink.frames();
        assert!(!frames.is_empty());
        assert!(frames.iter().all(|f| f.is_dark()));
    }

    #[test]
    fn missing_audio_falls_back_to_silence() {
        let config = config();
        let sink = MemorySink::new();
        let store = Arc::new(ParameterStore::default());
        let source: SourceFactory =
            Box::new(|| Err(LightingError::NoAudioSubsystem("no host".to_string())));
        let handle = Pipeline::start(config, source, Box::new(sink.clone()), store).unwrap();

        thread::sleep(Duration::from_millis(300));
        assert!(handle.is_running());
        handle.shutdown().unwrap();
        assert!(sink.frames().iter().all(|f| f.is_dark()));
        assert!(!sink.is_empty());
    }

    /// Silence that reports a fixed number of lost input buffers.
    struct OverflowingSource(SilenceSource);

    impl AudioSource for OverflowingSource {
        fn next_block(&mut self) -> Result<SampleBlock> {
            self.0.next_block()
        }

        fn sample_rate(&self) -> u32 {
            self.0.sample_rate()
        }

        fn block_size(&self) -> usize {
            self.0.block_size()
        }

        fn overflows(&self) -> u64 {
            7
        }
    }

    #[test]
    fn input_overflows_reach_telemetry() {
        let config = config();
        let (rate, size) = (config.audio.sample_rate, config.audio.block_size);
        let source: SourceFactory = Box::new(move || {
            Ok(Box::new(OverflowingSource(SilenceSource::paced(rate, size))) as Box<dyn AudioSource>)
        });
        let handle = Pipeline::start(config, source, Box::new(MemorySink::new()), Arc::new(ParameterStore::default()))
            .unwrap();

        thread::sleep(Duration::from_millis(200));
        let telemetry = handle.telemetry();
        handle.shutdown().unwrap();
        assert_eq!(telemetry.input_overflows, 7);
    }

    #[test]
    fn rejects_invalid_configuration() {
        let mut config = config();
        config.render.fps = 0;
        let result = Pipeline::start(
            config.clone(),
            click_track(&config),
            Box::new(MemorySink::new()),
            Arc::new(ParameterStore::default()),
        );
        assert!(result.is_err());
    }
}
