use std::{path::Path, sync::Arc, time::Duration};

use crossbeam_channel::Sender;
use serde::Serialize;

use super::{Control, ParameterSnapshot, ParameterStore};
use crate::{analysis::Genre, output::TransmitStats, pipeline::AnalysisFeed, LightingError, Result};

/// A write queued from the control surface to the parameter store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Set { control: Control, value: String },
    Reset,
}

impl ControlCommand {
    /// Applies the command. The store validates again, so a command built by
    /// hand cannot smuggle in an out-of-range value.
    pub fn apply(self, store: &ParameterStore) -> Result<()> {
        match self {
            ControlCommand::Set { control, value } => store.set(control, &value),
            ControlCommand::Reset => {
                store.reset();
                Ok(())
            }
        }
    }
}

/// Read-only state for display next to the controls.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Telemetry {
    pub bpm: Option<f32>,
    pub loudness: f32,
    pub bass: f32,
    pub mid: f32,
    pub high: f32,
    pub beat_count: u64,
    pub last_beat: Option<Duration>,
    pub building: bool,
    pub drop: bool,
    pub genre: Genre,
    pub audio_active: bool,
    pub input_overflows: u64,
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub transmit_failures: u64,
    pub daemon_connected: bool,
}

/// Handle given to whatever drives the controls (console, UI, tests).
///
/// Writes are validated up front for immediate feedback and then queued for
/// the control thread; reads go straight to the store.
#[derive(Debug, Clone)]
pub struct ControlSurface {
    commands: Sender<ControlCommand>,
    store: Arc<ParameterStore>,
    feed: Arc<AnalysisFeed>,
    stats: Arc<TransmitStats>,
}

impl ControlSurface {
    pub(crate) fn new(
        commands: Sender<ControlCommand>,
        store: Arc<ParameterStore>,
        feed: Arc<AnalysisFeed>,
        stats: Arc<TransmitStats>,
    ) -> Self {
        Self {
            commands,
            store,
            feed,
            stats,
        }
    }

    pub fn set(&self, name: &str, value: &str) -> Result<()> {
        let control = Control::from_name(name)?;
        control.encode(value)?;
        self.send(ControlCommand::Set {
            control,
            value: value.trim().to_string(),
        })
    }

    pub fn get(&self, name: &str) -> Result<String> {
        self.store.get_by_name(name)
    }

    pub fn reset(&self) -> Result<()> {
        self.send(ControlCommand::Reset)
    }

    pub fn snapshot(&self) -> ParameterSnapshot {
        self.store.snapshot()
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        self.store.save_json(path)
    }

    pub fn telemetry(&self) -> Telemetry {
        let frame = self.feed.latest();
        Telemetry {
            bpm: frame.bpm,
            loudness: frame.bands.loudness,
            bass: frame.bands.bass,
            mid: frame.bands.mid,
            high: frame.bands.high,
            beat_count: self.feed.beat_count(),
            last_beat: self.feed.last_beat().map(|beat| beat.timestamp),
            building: frame.dynamics.building,
            drop: frame.dynamics.drop,
            genre: frame.genre,
            audio_active: frame.audio_active,
            input_overflows: self.feed.input_overflows(),
            frames_sent: self.stats.sent(),
            frames_dropped: self.stats.dropped(),
            transmit_failures: self.stats.failures(),
            daemon_connected: self.stats.is_connected(),
        }
    }

    fn send(&self, command: ControlCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| LightingError::msg("pipeline is shutting down"))
    }
}

#[cfg(test)]
mod tests {
    use crossbeam_channel::unbounded;

    use super::*;

    fn surface() -> (ControlSurface, crossbeam_channel::Receiver<ControlCommand>, Arc<ParameterStore>) {
        let (tx, rx) = unbounded();
        let store = Arc::new(ParameterStore::default());
        let surface = ControlSurface::new(
            tx,
            store.clone(),
            Arc::new(AnalysisFeed::default()),
            Arc::new(TransmitStats::default()),
        );
        (surface, rx, store)
    }

    #[test]
    fn writes_are_queued_not_applied_directly() {
        let (surface, rx, store) = surface();
        surface.set("strobe", "30").unwrap();
        assert_eq!(store.snapshot().strobe, 0);

        let command = rx.try_recv().unwrap();
        command.apply(&store).unwrap();
        assert_eq!(surface.get("strobe").unwrap(), "30");
    }

    #[test]
    fn invalid_writes_fail_before_queueing() {
        let (surface, rx, _) = surface();
        assert!(surface.set("strobe", "300").is_err());
        assert!(surface.set("nonsense", "1").is_err());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn telemetry_starts_quiet() {
        let (surface, _, _) = surface();
        let telemetry = surface.telemetry();
        assert_eq!(telemetry.bpm, None);
        assert_eq!(telemetry.beat_count, 0);
        assert!(!telemetry.daemon_connected);
    }

    #[test]
    fn closed_queue_is_an_error() {
        let (surface, rx, _) = surface();
        drop(rx);
        assert!(surface.reset().is_err());
    }
}
