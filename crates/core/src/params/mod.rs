//! Live-tunable controls.
//!
//! Every control lives in its own atomic cell so a write never tears and a
//! reader never blocks. The render loop takes one [`ParameterSnapshot`] per
//! tick; there is no cross-control atomicity beyond that.

use std::{
    fmt,
    path::Path,
    str::FromStr,
    sync::atomic::{AtomicU8, Ordering},
};

use serde::{Deserialize, Serialize};

use crate::{LightingError, Result, MAX_LIGHTS};

mod choices;
mod control;

pub use choices::{Effect, Mode, PatternId, ProgramId, Theme};
pub use control::{ControlCommand, ControlSurface, Telemetry};

/// Allowed values of the BPM sync divisor.
pub const SYNC_DIVISORS: [u8; 5] = [1, 2, 4, 8, 16];

/// Every control the store knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Control {
    Speed,
    Brightness,
    Rainbow,
    Strobe,
    BpmSyncDivisor,
    LightCount,
    Mode,
    Program,
    Pattern,
    Theme,
    Effect,
    Sensitivity,
    Echo,
    FrequencyColors,
    MoodMatch,
    Ambient,
    AutoGenre,
    SpectrumDisplay,
}

const CONTROL_COUNT: usize = 18;

impl Control {
    pub const ALL: [Control; CONTROL_COUNT] = [
        Control::Speed,
        Control::Brightness,
        Control::Rainbow,
        Control::Strobe,
        Control::BpmSyncDivisor,
        Control::LightCount,
        Control::Mode,
        Control::Program,
        Control::Pattern,
        Control::Theme,
        Control::Effect,
        Control::Sensitivity,
        Control::Echo,
        Control::FrequencyColors,
        Control::MoodMatch,
        Control::Ambient,
        Control::AutoGenre,
        Control::SpectrumDisplay,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Control::Speed => "speed",
            Control::Brightness => "brightness",
            Control::Rainbow => "rainbow",
            Control::Strobe => "strobe",
            Control::BpmSyncDivisor => "bpm_sync_divisor",
            Control::LightCount => "light_count",
            Control::Mode => "mode",
            Control::Program => "program",
            Control::Pattern => "pattern",
            Control::Theme => "theme",
            Control::Effect => "effect",
            Control::Sensitivity => "sensitivity",
            Control::Echo => "echo",
            Control::FrequencyColors => "frequency_colors",
            Control::MoodMatch => "mood_match",
            Control::Ambient => "ambient",
            Control::AutoGenre => "auto_genre",
            Control::SpectrumDisplay => "spectrum_display",
        }
    }

    /// Looks a control up by name; `-` and `_` are interchangeable and a few
    /// short aliases are accepted.
    pub fn from_name(name: &str) -> Result<Self> {
        let wanted = name.trim().to_ascii_lowercase().replace('-', "_");
        let alias = match wanted.as_str() {
            "bpm_sync" | "sync" | "divisor" => Some(Control::BpmSyncDivisor),
            "lights" => Some(Control::LightCount),
            _ => None,
        };
        alias
            .or_else(|| Self::ALL.iter().copied().find(|c| c.name() == wanted))
            .ok_or_else(|| LightingError::UnknownParameter(name.trim().to_string()))
    }

    /// Human readable range, for help output.
    pub fn range(self) -> String {
        match self {
            Control::Speed
            | Control::Brightness
            | Control::Rainbow
            | Control::Strobe
            | Control::Sensitivity
            | Control::Echo => "0-100".to_string(),
            Control::BpmSyncDivisor => "1, 2, 4, 8, 16".to_string(),
            Control::LightCount => format!("1-{MAX_LIGHTS}"),
            Control::Mode => Mode::names(),
            Control::Program => ProgramId::names(),
            Control::Pattern => PatternId::names(),
            Control::Theme => Theme::names(),
            Control::Effect => Effect::names(),
            Control::FrequencyColors
            | Control::MoodMatch
            | Control::Ambient
            | Control::AutoGenre
            | Control::SpectrumDisplay => "on, off".to_string(),
        }
    }

    fn slot(self) -> usize {
        self as usize
    }

    /// Validates a textual value and converts it to the stored cell value.
    pub fn encode(self, value: &str) -> Result<u8> {
        let value = value.trim();
        match self {
            Control::Speed
            | Control::Brightness
            | Control::Rainbow
            | Control::Strobe
            | Control::Sensitivity
            | Control::Echo => {
                let level: u32 = value
                    .parse()
                    .map_err(|_| LightingError::invalid(self.name(), "expected an integer 0-100"))?;
                check_level(self, level)
            }
            Control::BpmSyncDivisor => {
                let divisor: u32 = value
                    .parse()
                    .map_err(|_| LightingError::invalid(self.name(), "expected 1, 2, 4, 8 or 16"))?;
                check_divisor(divisor)
            }
            Control::LightCount => {
                let count: usize = value.parse().map_err(|_| {
                    LightingError::invalid(self.name(), format!("expected an integer 1-{MAX_LIGHTS}"))
                })?;
                check_light_count(count)
            }
            Control::Mode => Ok(Mode::from_str(value)?.index()),
            Control::Program => Ok(ProgramId::from_str(value)?.index()),
            Control::Pattern => Ok(PatternId::from_str(value)?.index()),
            Control::Theme => Ok(Theme::from_str(value)?.index()),
            Control::Effect => Ok(Effect::from_str(value)?.index()),
            Control::FrequencyColors
            | Control::MoodMatch
            | Control::Ambient
            | Control::AutoGenre
            | Control::SpectrumDisplay => parse_switch(value)
                .map(u8::from)
                .ok_or_else(|| LightingError::invalid(self.name(), "expected on or off")),
        }
    }

    fn decode(self, raw: u8) -> String {
        match self {
            Control::Mode => Mode::from_index(raw).to_string(),
            Control::Program => ProgramId::from_index(raw).to_string(),
            Control::Pattern => PatternId::from_index(raw).to_string(),
            Control::Theme => Theme::from_index(raw).to_string(),
            Control::Effect => Effect::from_index(raw).to_string(),
            Control::FrequencyColors
            | Control::MoodMatch
            | Control::Ambient
            | Control::AutoGenre
            | Control::SpectrumDisplay => if raw != 0 { "on" } else { "off" }.to_string(),
            _ => raw.to_string(),
        }
    }
}

impl fmt::Display for Control {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn check_level(control: Control, level: u32) -> Result<u8> {
    if level > 100 {
        return Err(LightingError::invalid(control.name(), "must be within 0-100"));
    }
    Ok(level as u8)
}

fn check_divisor(divisor: u32) -> Result<u8> {
    SYNC_DIVISORS
        .iter()
        .copied()
        .find(|d| u32::from(*d) == divisor)
        .ok_or_else(|| LightingError::invalid("bpm_sync_divisor", "must be 1, 2, 4, 8 or 16"))
}

fn check_light_count(count: usize) -> Result<u8> {
    if !(1..=MAX_LIGHTS).contains(&count) {
        return Err(LightingError::invalid(
            "light_count",
            format!("must be within 1-{MAX_LIGHTS}"),
        ));
    }
    Ok(count as u8)
}

fn parse_switch(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "on" | "true" | "yes" | "1" => Some(true),
        "off" | "false" | "no" | "0" => Some(false),
        _ => None,
    }
}

/// Immutable copy of every control, taken once per render tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterSnapshot {
    pub speed: u8,
    pub brightness: u8,
    pub rainbow: u8,
    pub strobe: u8,
    pub bpm_sync_divisor: u8,
    pub light_count: usize,
    pub mode: Mode,
    pub program: ProgramId,
    pub pattern: PatternId,
    pub theme: Theme,
    pub effect: Effect,
    pub sensitivity: u8,
    pub echo: u8,
    pub frequency_colors: bool,
    pub mood_match: bool,
    pub ambient: bool,
    pub auto_genre: bool,
    pub spectrum_display: bool,
}

impl Default for ParameterSnapshot {
    fn default() -> Self {
        Self {
            speed: 50,
            brightness: 50,
            rainbow: 50,
            strobe: 0,
            bpm_sync_divisor: 1,
            light_count: crate::DEFAULT_LIGHT_COUNT,
            mode: Mode::default(),
            program: ProgramId::default(),
            pattern: PatternId::default(),
            theme: Theme::default(),
            effect: Effect::default(),
            sensitivity: 50,
            echo: 0,
            frequency_colors: false,
            mood_match: false,
            ambient: false,
            auto_genre: false,
            spectrum_display: false,
        }
    }
}

impl ParameterSnapshot {
    /// Checks every value against its control's range.
    pub fn validate(&self) -> Result<()> {
        for (control, level) in [
            (Control::Speed, self.speed),
            (Control::Brightness, self.brightness),
            (Control::Rainbow, self.rainbow),
            (Control::Strobe, self.strobe),
            (Control::Sensitivity, self.sensitivity),
            (Control::Echo, self.echo),
        ] {
            check_level(control, u32::from(level))?;
        }
        check_divisor(u32::from(self.bpm_sync_divisor))?;
        check_light_count(self.light_count)?;
        Ok(())
    }

    fn raw(&self, control: Control) -> u8 {
        match control {
            Control::Speed => self.speed,
            Control::Brightness => self.brightness,
            Control::Rainbow => self.rainbow,
            Control::Strobe => self.strobe,
            Control::BpmSyncDivisor => self.bpm_sync_divisor,
            Control::LightCount => self.light_count as u8,
            Control::Mode => self.mode.index(),
            Control::Program => self.program.index(),
            Control::Pattern => self.pattern.index(),
            Control::Theme => self.theme.index(),
            Control::Effect => self.effect.index(),
            Control::Sensitivity => self.sensitivity,
            Control::Echo => self.echo,
            Control::FrequencyColors => u8::from(self.frequency_colors),
            Control::MoodMatch => u8::from(self.mood_match),
            Control::Ambient => u8::from(self.ambient),
            Control::AutoGenre => u8::from(self.auto_genre),
            Control::SpectrumDisplay => u8::from(self.spectrum_display),
        }
    }

    fn from_raw(raw: &[u8; CONTROL_COUNT]) -> Self {
        let get = |control: Control| raw[control.slot()];
        Self {
            speed: get(Control::Speed),
            brightness: get(Control::Brightness),
            rainbow: get(Control::Rainbow),
            strobe: get(Control::Strobe),
            bpm_sync_divisor: get(Control::BpmSyncDivisor),
            light_count: usize::from(get(Control::LightCount)),
            mode: Mode::from_index(get(Control::Mode)),
            program: ProgramId::from_index(get(Control::Program)),
            pattern: PatternId::from_index(get(Control::Pattern)),
            theme: Theme::from_index(get(Control::Theme)),
            effect: Effect::from_index(get(Control::Effect)),
            sensitivity: get(Control::Sensitivity),
            echo: get(Control::Echo),
            frequency_colors: get(Control::FrequencyColors) != 0,
            mood_match: get(Control::MoodMatch) != 0,
            ambient: get(Control::Ambient) != 0,
            auto_genre: get(Control::AutoGenre) != 0,
            spectrum_display: get(Control::SpectrumDisplay) != 0,
        }
    }
}

/// Process-wide table of live controls.
#[derive(Debug)]
pub struct ParameterStore {
    cells: [AtomicU8; CONTROL_COUNT],
    defaults: ParameterSnapshot,
}

impl Default for ParameterStore {
    fn default() -> Self {
        Self::new(ParameterSnapshot::default())
    }
}

impl ParameterStore {
    /// Creates a store holding `defaults`. Out-of-range defaults fall back to
    /// the built-in defaults for the offending control.
    pub fn new(defaults: ParameterSnapshot) -> Self {
        let defaults = match defaults.validate() {
            Ok(()) => defaults,
            Err(err) => {
                tracing::warn!(error = %err, "invalid parameter defaults, using built-in values");
                ParameterSnapshot::default()
            }
        };
        let cells = std::array::from_fn(|slot| AtomicU8::new(defaults.raw(Control::ALL[slot])));
        Self { cells, defaults }
    }

    /// Sets a control from its textual value. Invalid values are rejected and
    /// the previous value stays in place.
    pub fn set(&self, control: Control, value: &str) -> Result<()> {
        let raw = control.encode(value)?;
        self.store_raw(control, raw);
        Ok(())
    }

    pub fn set_by_name(&self, name: &str, value: &str) -> Result<()> {
        self.set(Control::from_name(name)?, value)
    }

    /// Stores an already validated cell value.
    pub(crate) fn store_raw(&self, control: Control, raw: u8) {
        self.cells[control.slot()].store(raw, Ordering::Release);
        tracing::debug!(control = control.name(), value = %control.decode(raw), "control updated");
    }

    pub fn get(&self, control: Control) -> String {
        control.decode(self.cells[control.slot()].load(Ordering::Acquire))
    }

    pub fn get_by_name(&self, name: &str) -> Result<String> {
        Ok(self.get(Control::from_name(name)?))
    }

    pub fn light_count(&self) -> usize {
        usize::from(self.cells[Control::LightCount.slot()].load(Ordering::Acquire))
    }

    pub fn snapshot(&self) -> ParameterSnapshot {
        let raw: [u8; CONTROL_COUNT] =
            std::array::from_fn(|slot| self.cells[slot].load(Ordering::Acquire));
        ParameterSnapshot::from_raw(&raw)
    }

    /// Writes every control from a snapshot after validating all of them.
    pub fn apply(&self, snapshot: &ParameterSnapshot) -> Result<()> {
        snapshot.validate()?;
        for control in Control::ALL {
            self.cells[control.slot()].store(snapshot.raw(control), Ordering::Release);
        }
        Ok(())
    }

    /// Restores the values the store was created with.
    pub fn reset(&self) {
        for control in Control::ALL {
            self.cells[control.slot()].store(self.defaults.raw(control), Ordering::Release);
        }
        tracing::info!("controls reset to defaults");
    }

    /// Persists the current values as JSON.
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(&self.snapshot())?;
        std::fs::write(path, json)?;
        tracing::info!(path = %path.display(), "saved parameters");
        Ok(())
    }

    /// Loads values saved by [`ParameterStore::save_json`]. Missing fields
    /// take the built-in defaults; an invalid file leaves the store untouched.
    pub fn load_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let snapshot: ParameterSnapshot = serde_json::from_str(&text)?;
        self.apply(&snapshot)?;
        tracing::info!(path = %path.display(), "loaded parameters");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;

    #[test]
    fn set_and_get_by_name() {
        let store = ParameterStore::default();
        store.set_by_name("brightness", "80").unwrap();
        store.set_by_name("program", "vu meter").unwrap();
        store.set_by_name("frequency-colors", "on").unwrap();
        store.set_by_name("bpm_sync", "4").unwrap();

        assert_eq!(store.get_by_name("brightness").unwrap(), "80");
        assert_eq!(store.get(Control::Program), "vu-meter");
        let snapshot = store.snapshot();
        assert!(snapshot.frequency_colors);
        assert_eq!(snapshot.bpm_sync_divisor, 4);
    }

    #[test]
    fn invalid_writes_keep_previous_value() {
        let store = ParameterStore::default();
        store.set(Control::Speed, "70").unwrap();

        assert!(store.set(Control::Speed, "101").is_err());
        assert!(store.set(Control::Speed, "fast").is_err());
        assert!(store.set(Control::BpmSyncDivisor, "3").is_err());
        assert!(store.set(Control::LightCount, "0").is_err());
        assert!(store.set(Control::LightCount, "9").is_err());
        assert!(store.set(Control::Theme, "plaid").is_err());

        let snapshot = store.snapshot();
        assert_eq!(snapshot.speed, 70);
        assert_eq!(snapshot.bpm_sync_divisor, 1);
        assert_eq!(snapshot.light_count, crate::DEFAULT_LIGHT_COUNT);
        assert_eq!(snapshot.theme, Theme::Classic);
    }

    #[test]
    fn unknown_control_is_reported() {
        let store = ParameterStore::default();
        let err = store.set_by_name("volume", "3").unwrap_err();
        assert!(matches!(err, LightingError::UnknownParameter(name) if name == "volume"));
    }

    #[test]
    fn snapshot_is_detached_from_later_writes() {
        let store = ParameterStore::default();
        let before = store.snapshot();
        store.set(Control::Rainbow, "5").unwrap();
        assert_eq!(before.rainbow, 50);
        assert_eq!(store.snapshot().rainbow, 5);
    }

    #[test]
    fn reset_restores_creation_values() {
        let defaults = ParameterSnapshot {
            light_count: 6,
            ..ParameterSnapshot::default()
        };
        let store = ParameterStore::new(defaults.clone());
        store.set(Control::LightCount, "2").unwrap();
        store.set(Control::Mode, "advanced").unwrap();
        store.reset();
        assert_eq!(store.snapshot(), defaults);
    }

    #[test]
    fn json_round_trip_and_bad_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("params.json");

        let store = ParameterStore::default();
        store.set(Control::Theme, "galaxy").unwrap();
        store.set(Control::Echo, "40").unwrap();
        store.save_json(&path).unwrap();

        let restored = ParameterStore::default();
        restored.load_json(&path).unwrap();
        assert_eq!(restored.snapshot(), store.snapshot());

        std::fs::write(&path, r#"{"brightness": 250}"#).unwrap();
        assert!(restored.load_json(&path).is_err());
        assert_eq!(restored.snapshot().theme, Theme::Galaxy);
    }

    #[test]
    fn concurrent_writers_never_tear_values() {
        let store = Arc::new(ParameterStore::default());
        let writer = {
            let store = store.clone();
            thread::spawn(move || {
                for i in 0..2_000u32 {
                    let value = if i % 2 == 0 { "1" } else { "16" };
                    store.set(Control::BpmSyncDivisor, value).unwrap();
                }
            })
        };
        for _ in 0..2_000 {
            let divisor = store.snapshot().bpm_sync_divisor;
            assert!(divisor == 1 || divisor == 16);
        }
        writer.join().unwrap();
    }
}
