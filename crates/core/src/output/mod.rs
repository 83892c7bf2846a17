//! Frame delivery to the lighting daemon.
//!
//! The render loop never talks to the network. It hands each frame to a
//! [`FrameTransmitter`], which owns the [`FrameSink`] on a dedicated thread
//! behind a rendezvous channel: a frame is only taken while the worker is
//! idle. A frame arriving while the previous one is still in flight is
//! dropped and counted.

mod artnet;

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::{config::OutputConfig, frame::DmxFrame, LightingError, Result};

pub use artnet::{build_packet, ArtNetSink, ARTNET_PORT};

/// Destination for finished frames.
pub trait FrameSink: Send {
    fn connect(&mut self) -> Result<()>;

    fn send_frame(&mut self, universe: u16, data: &[u8]) -> Result<()>;

    fn is_connected(&self) -> bool;

    fn describe(&self) -> String {
        "frame sink".to_string()
    }
}

/// Discards every frame.
#[derive(Debug, Default)]
pub struct NullSink {
    connected: bool,
}

impl FrameSink for NullSink {
    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        Ok(())
    }

    fn send_frame(&mut self, _universe: u16, _data: &[u8]) -> Result<()> {
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn describe(&self) -> String {
        "null output".to_string()
    }
}

/// Keeps every frame in memory. Clones share the same buffer, so a test can
/// hand one clone to the transmitter and inspect the other.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    frames: Arc<Mutex<Vec<DmxFrame>>>,
    connected: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> Vec<DmxFrame> {
        match self.frames.lock() {
            Ok(frames) => frames.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.frames().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FrameSink for MemorySink {
    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        Ok(())
    }

    fn send_frame(&mut self, universe: u16, data: &[u8]) -> Result<()> {
        let mut frames = self
            .frames
            .lock()
            .map_err(|_| LightingError::msg("memory sink has been poisoned"))?;
        frames.push(DmxFrame {
            universe,
            data: data.to_vec(),
        });
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn describe(&self) -> String {
        "memory output".to_string()
    }
}

/// Delivery counters, shared with telemetry.
#[derive(Debug, Default)]
pub struct TransmitStats {
    sent: AtomicU64,
    dropped: AtomicU64,
    failures: AtomicU64,
    connected: AtomicBool,
}

impl TransmitStats {
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Frames never handed to the sink: the slot was busy or the daemon was
    /// unreachable.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Failed connection attempts and failed sends.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }
}

enum Outgoing {
    Frame(DmxFrame),
    /// Sent regardless of backoff, then the worker exits.
    Final(DmxFrame),
}

/// Exponential reconnect schedule.
#[derive(Debug)]
struct Backoff {
    initial: Duration,
    max: Duration,
    delay: Duration,
    retry_at: Option<Instant>,
    failures: u32,
    max_attempts: u32,
    reported: bool,
}

impl Backoff {
    fn new(config: &OutputConfig) -> Self {
        let initial = Duration::from_millis(config.reconnect_initial_ms);
        Self {
            initial,
            max: Duration::from_millis(config.reconnect_max_ms).max(initial),
            delay: initial,
            retry_at: None,
            failures: 0,
            max_attempts: config.max_attempts.max(1),
            reported: false,
        }
    }

    fn ready(&self, now: Instant) -> bool {
        self.retry_at.map(|at| now >= at).unwrap_or(true)
    }

    fn succeeded(&mut self) {
        self.delay = self.initial;
        self.retry_at = None;
        self.failures = 0;
        self.reported = false;
    }

    /// Schedules the next attempt. Returns true exactly once per outage, when
    /// the failure count first reaches the limit.
    fn failed(&mut self, now: Instant) -> bool {
        self.failures = self.failures.saturating_add(1);
        self.retry_at = Some(now + self.delay);
        self.delay = (self.delay * 2).min(self.max);
        if self.failures >= self.max_attempts && !self.reported {
            self.reported = true;
            return true;
        }
        false
    }
}

struct Worker {
    sink: Box<dyn FrameSink>,
    stats: Arc<TransmitStats>,
    backoff: Backoff,
}

impl Worker {
    fn run(mut self, frames: Receiver<Outgoing>) {
        tracing::info!(sink = %self.sink.describe(), "frame transmitter started");
        self.connect(Instant::now());
        for outgoing in frames.iter() {
            match outgoing {
                Outgoing::Frame(frame) => self.deliver(&frame, false),
                Outgoing::Final(frame) => {
                    self.deliver(&frame, true);
                    break;
                }
            }
        }
        self.stats.set_connected(false);
        tracing::info!(
            sent = self.stats.sent(),
            dropped = self.stats.dropped(),
            "frame transmitter stopped"
        );
    }

    /// Only a delivered frame clears the backoff.
    fn deliver(&mut self, frame: &DmxFrame, force: bool) {
        let now = Instant::now();
        if !force && !self.backoff.ready(now) {
            self.stats.record_dropped();
            return;
        }
        if !self.sink.is_connected() && !self.connect(now) {
            self.stats.record_dropped();
            return;
        }

        match self.sink.send_frame(frame.universe, frame.as_bytes()) {
            Ok(()) => {
                self.stats.record_sent();
                self.backoff.succeeded();
            }
            Err(err) => {
                self.fail(now, err);
                self.stats.record_dropped();
            }
        }
        self.stats.set_connected(self.sink.is_connected());
    }

    fn connect(&mut self, now: Instant) -> bool {
        match self.sink.connect() {
            Ok(()) => {
                if self.backoff.failures == 0 {
                    tracing::info!(sink = %self.sink.describe(), "connected to lighting daemon");
                } else {
                    tracing::debug!(sink = %self.sink.describe(), "reconnected to lighting daemon");
                }
                self.stats.set_connected(true);
                true
            }
            Err(err) => {
                self.fail(now, err);
                false
            }
        }
    }

    fn fail(&mut self, now: Instant, err: LightingError) {
        self.stats.record_failure();
        let first = self.backoff.failures == 0;
        if self.backoff.failed(now) {
            tracing::error!(
                "{}",
                LightingError::DaemonUnreachable {
                    attempts: self.backoff.failures
                }
            );
        } else if first {
            tracing::warn!(error = %err, "frame delivery failed, will retry");
        } else {
            tracing::debug!(error = %err, failures = self.backoff.failures, "frame delivery failed");
        }
    }
}

/// Owns the transmit thread.
#[derive(Debug)]
pub struct FrameTransmitter {
    frames: Option<Sender<Outgoing>>,
    stats: Arc<TransmitStats>,
    worker: Option<JoinHandle<()>>,
}

impl FrameTransmitter {
    pub fn spawn(sink: Box<dyn FrameSink>, config: &OutputConfig, stats: Arc<TransmitStats>) -> Result<Self> {
        let (tx, rx) = bounded(0);
        let worker = Worker {
            sink,
            stats: stats.clone(),
            backoff: Backoff::new(config),
        };
        let handle = thread::Builder::new()
            .name("pulsedmx-transmit".to_string())
            .spawn(move || worker.run(rx))?;
        Ok(Self {
            frames: Some(tx),
            stats,
            worker: Some(handle),
        })
    }

    /// Hands a frame to the worker without blocking. Returns false when the
    /// frame was dropped because the previous one is still being delivered.
    pub fn submit(&self, frame: DmxFrame) -> bool {
        let Some(frames) = self.frames.as_ref() else {
            return false;
        };
        match frames.try_send(Outgoing::Frame(frame)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.stats.record_dropped();
                false
            }
        }
    }

    /// Delivers `last` (normally a blackout) and stops the thread.
    pub fn shutdown(mut self, last: DmxFrame) {
        self.finish(Some(last));
    }

    fn finish(&mut self, last: Option<DmxFrame>) {
        if let Some(frames) = self.frames.take() {
            if let Some(frame) = last {
                let _ = frames.send(Outgoing::Final(frame));
            }
        }
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                tracing::error!("frame transmitter thread panicked");
            }
        }
    }
}

impl Drop for FrameTransmitter {
    fn drop(&mut self) {
        self.finish(None);
    }
}
