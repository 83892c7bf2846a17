//! Lighting programs.
//!
//! [`PatternEngine`] turns one render tick's inputs (parameters, beats since
//! the previous tick and the latest analysis) into a colour and level for
//! every light. Two families share the engine: self-contained simple presets
//! and the parametric advanced patterns. Beat-driven steps go through the
//! `bpm_sync_divisor` counter; the strobe overlay sits on top of both.

mod advanced;
pub mod color;
mod simple;
pub mod timing;

use std::time::Duration;

use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{
    analysis::{AnalysisFrame, BandEnergies, BeatEvent},
    config::RenderConfig,
    frame::LightState,
    params::{Mode, ParameterSnapshot, PatternId, ProgramId, Theme},
    MAX_LIGHTS,
};

use self::{
    advanced::{effective_params, AdvancedState},
    color::Rgb,
    simple::SimpleProgram,
    timing::{brightness_multiplier, speed_rate, unit, BeatDivider},
};

pub use self::advanced::ECHO_FRAMES;

/// Reference frame rate for per-frame motion constants.
const NOMINAL_FPS: f32 = 30.0;

/// Colour plus level in `0.0..=1.0` for one light, before brightness.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Shade {
    pub color: Rgb,
    pub level: f32,
}

impl Shade {
    pub const DARK: Shade = Shade {
        color: Rgb::BLACK,
        level: 0.0,
    };

    pub fn new(color: Rgb, level: f32) -> Self {
        let level = if level.is_finite() { level.clamp(0.0, 1.0) } else { 0.0 };
        Self { color, level }
    }
}

/// Everything a render tick consumes.
#[derive(Debug, Clone, Copy)]
pub struct TickInput<'a> {
    pub tick: u64,
    /// Time since the render loop started.
    pub time: Duration,
    /// Time since the previous tick.
    pub dt: Duration,
    /// Beats detected since the previous tick, oldest first.
    pub beats: &'a [BeatEvent],
    pub analysis: &'a AnalysisFrame,
    pub params: &'a ParameterSnapshot,
}

/// Per-tick view handed to the program families.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Cues<'a> {
    pub(crate) time: f32,
    pub(crate) dt: f32,
    pub(crate) lights: usize,
    /// Set when the divided beat counter fired this tick.
    pub(crate) trigger: bool,
    pub(crate) raw_beats: usize,
    pub(crate) bands: BandEnergies,
    pub(crate) intensity: f32,
    pub(crate) rate: f32,
    pub(crate) divisor: f32,
    pub(crate) theme: Theme,
    pub(crate) palette: &'a [Rgb],
}

impl Cues<'_> {
    /// Elapsed time in nominal frames, scaled by the speed control.
    pub(crate) fn frames(&self) -> f32 {
        self.dt * NOMINAL_FPS * self.rate
    }
}

#[derive(Debug, Clone)]
enum Family {
    Simple(SimpleProgram),
    Advanced(AdvancedState),
}

/// The selection that owns the running program state. Changing any part
/// restarts the program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Selection {
    mode: Mode,
    program: ProgramId,
    pattern: PatternId,
    lights: usize,
}

impl Selection {
    fn of(params: &ParameterSnapshot) -> Self {
        Self {
            mode: params.mode,
            program: params.program,
            pattern: params.pattern,
            lights: params.light_count.clamp(1, MAX_LIGHTS),
        }
    }
}

/// Stateful program runner. Seeded engines fed identical inputs produce
/// identical output.
#[derive(Debug)]
pub struct PatternEngine {
    rng: StdRng,
    flash_ticks: u32,
    flash_remaining: u32,
    divider: BeatDivider,
    selection: Option<Selection>,
    family: Family,
}

impl PatternEngine {
    pub fn new(config: &RenderConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng,
            flash_ticks: config.flash_ticks,
            flash_remaining: 0,
            divider: BeatDivider::default(),
            selection: None,
            family: Family::Advanced(AdvancedState::new(1)),
        }
    }

    /// Computes one light state per configured light.
    pub fn compute(&mut self, input: &TickInput<'_>) -> Vec<LightState> {
        let params = input.params;
        let selection = Selection::of(params);
        if self.selection != Some(selection) {
            self.restart(selection, params.theme);
        }
        let lights = selection.lights;

        if !input.analysis.audio_active && !params.ambient {
            self.flash_remaining = 0;
            return (0..lights).map(LightState::off).collect();
        }

        let effective = match params.mode {
            Mode::Advanced => effective_params(params, input.analysis),
            Mode::Simple => params.clone(),
        };

        let mut trigger = false;
        for _ in input.beats {
            trigger |= self.divider.on_beat(effective.bpm_sync_divisor);
            if effective.strobe > 0 && self.rng.gen::<f32>() < unit(effective.strobe) {
                self.flash_remaining = self.flash_ticks;
            }
        }

        let cues = Cues {
            time: input.time.as_secs_f32(),
            dt: input.dt.as_secs_f32(),
            lights,
            trigger,
            raw_beats: input.beats.len(),
            bands: input.analysis.bands,
            intensity: input.analysis.bands.peak(),
            rate: speed_rate(effective.speed),
            divisor: f32::from(effective.bpm_sync_divisor.max(1)),
            theme: effective.theme,
            palette: effective.theme.palette(),
        };

        let mut shades = match &mut self.family {
            Family::Simple(program) => program.render(&cues, &mut self.rng),
            Family::Advanced(state) => state.render(&cues, &effective, &mut self.rng),
        };
        shades.resize(lights, Shade::DARK);

        let flashing = self.flash_remaining > 0;
        self.flash_remaining = self.flash_remaining.saturating_sub(1);

        let multiplier = brightness_multiplier(params.brightness);
        shades
            .into_iter()
            .enumerate()
            .map(|(index, shade)| {
                if flashing {
                    flash(index)
                } else {
                    to_light(index, shade, multiplier)
                }
            })
            .collect()
    }

    fn restart(&mut self, selection: Selection, theme: Theme) {
        tracing::debug!(
            mode = %selection.mode,
            program = %selection.program,
            pattern = %selection.pattern,
            lights = selection.lights,
            "restarting lighting program"
        );
        self.family = match selection.mode {
            Mode::Simple => Family::Simple(SimpleProgram::new(
                selection.program,
                selection.lights,
                theme.palette(),
                &mut self.rng,
            )),
            Mode::Advanced => Family::Advanced(AdvancedState::new(selection.lights)),
        };
        self.divider.reset();
        self.flash_remaining = 0;
        self.selection = Some(selection);
    }
}

fn to_light(index: usize, shade: Shade, multiplier: f32) -> LightState {
    let [red, green, blue] = shade.color.to_bytes();
    LightState {
        index,
        red,
        green,
        blue,
        white: 0,
        dimmer: (shade.level * multiplier * 255.0).round().clamp(0.0, 255.0) as u8,
        strobe: false,
    }
}

fn flash(index: usize) -> LightState {
    LightState {
        index,
        red: 255,
        green: 255,
        blue: 255,
        white: 255,
        dimmer: 255,
        strobe: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FPS: u32 = 30;

    fn engine(seed: u64) -> PatternEngine {
        PatternEngine::new(&RenderConfig {
            seed: Some(seed),
            ..RenderConfig::default()
        })
    }

    fn active(bass: f32) -> AnalysisFrame {
        AnalysisFrame {
            audio_active: true,
            bands: BandEnergies {
                bass,
                mid: 0.3,
                high: 0.2,
                loudness: 0.2,
            },
            ..AnalysisFrame::default()
        }
    }

    fn beat(tick: u64) -> BeatEvent {
        BeatEvent {
            timestamp: Duration::from_millis(tick * 1000 / u64::from(FPS)),
            confidence: 0.8,
            estimated_bpm: Some(120.0),
        }
    }

    /// Runs `ticks` ticks at 30 fps with a 120 BPM beat on every 15th tick.
    fn run(engine: &mut PatternEngine, params: &ParameterSnapshot, ticks: u64) -> Vec<Vec<LightState>> {
        let analysis = active(0.5);
        let dt = Duration::from_secs(1) / FPS;
        (0..ticks)
            .map(|tick| {
                let beats = if tick % 15 == 14 { vec![beat(tick)] } else { Vec::new() };
                engine.compute(&TickInput {
                    tick,
                    time: dt * tick as u32,
                    dt,
                    beats: &beats,
                    analysis: &analysis,
                    params,
                })
            })
            .collect()
    }

    #[test]
    fn seeded_engines_are_deterministic_for_every_program() {
        for program in ProgramId::ALL {
            let params = ParameterSnapshot {
                program: *program,
                light_count: 6,
                strobe: 20,
                ..ParameterSnapshot::default()
            };
            let first = run(&mut engine(42), &params, 120);
            let second = run(&mut engine(42), &params, 120);
            assert_eq!(first, second, "{program}");
        }
        for pattern in PatternId::ALL {
            let params = ParameterSnapshot {
                mode: Mode::Advanced,
                pattern: *pattern,
                effect: crate::params::Effect::Sparkle,
                ..ParameterSnapshot::default()
            };
            assert_eq!(run(&mut engine(7), &params, 120), run(&mut engine(7), &params, 120));
        }
    }

    #[test]
    fn divisor_of_four_steps_every_two_seconds_at_120_bpm() {
        let params = ParameterSnapshot {
            program: ProgramId::Chase,
            bpm_sync_divisor: 4,
            light_count: 8,
            ..ParameterSnapshot::default()
        };
        let frames = run(&mut engine(1), &params, 8 * u64::from(FPS));
        let heads: Vec<usize> = frames
            .iter()
            .map(|lights| lights.iter().position(|l| l.dimmer == 255).unwrap())
            .collect();
        let steps: Vec<usize> = heads
            .windows(2)
            .enumerate()
            .filter(|(_, pair)| pair[0] != pair[1])
            .map(|(tick, _)| tick + 1)
            .collect();
        // Beats land on ticks 14, 29, 44, ...; every fourth one moves the head.
        assert_eq!(steps, [59, 119, 179, 239]);
    }

    #[test]
    fn brightness_scales_dimmer_monotonically() {
        let dimmer = |brightness: u8| {
            let params = ParameterSnapshot {
                program: ProgramId::Pulse,
                brightness,
                ..ParameterSnapshot::default()
            };
            run(&mut engine(3), &params, 1)[0][0].dimmer
        };
        let mid = f32::from(dimmer(50));
        assert!((f32::from(dimmer(0)) - mid * 0.1).abs() <= 1.0);
        assert!((f32::from(dimmer(100)) - mid * 1.2).abs() <= 1.0);
        for b in 0..100u8 {
            assert!(dimmer(b + 1) >= dimmer(b));
        }
    }

    #[test]
    fn light_count_changes_resize_output() {
        let mut engine = engine(4);
        let mut params = ParameterSnapshot::default();
        assert_eq!(run(&mut engine, &params, 3)[2].len(), 4);
        params.light_count = 7;
        let frames = run(&mut engine, &params, 3);
        assert!(frames.iter().all(|lights| lights.len() == 7));
        assert_eq!(frames[0][6].index, 6);
    }

    #[test]
    fn advanced_patterns_handle_a_single_light() {
        for pattern in PatternId::ALL {
            for effect in crate::params::Effect::ALL {
                let params = ParameterSnapshot {
                    mode: Mode::Advanced,
                    pattern: *pattern,
                    effect: *effect,
                    light_count: 1,
                    echo: 60,
                    frequency_colors: true,
                    mood_match: true,
                    ..ParameterSnapshot::default()
                };
                let frames = run(&mut engine(8), &params, 90);
                assert!(
                    frames.iter().all(|lights| lights.len() == 1 && lights[0].index == 0),
                    "{pattern} with {effect}"
                );
            }
        }
    }

    #[test]
    fn advanced_mode_follows_light_count_changes() {
        let mut engine = engine(9);
        let mut params = ParameterSnapshot {
            mode: Mode::Advanced,
            pattern: PatternId::Wave,
            echo: 50,
            ..ParameterSnapshot::default()
        };
        assert!(run(&mut engine, &params, 30).iter().all(|lights| lights.len() == 4));

        params.light_count = 1;
        assert!(run(&mut engine, &params, 30).iter().all(|lights| lights.len() == 1));

        params.light_count = 8;
        let frames = run(&mut engine, &params, 30);
        assert!(frames.iter().all(|lights| lights.len() == 8));
        assert_eq!(frames[29][7].index, 7);
    }

    #[test]
    fn silence_blacks_out_unless_ambient() {
        let mut engine = engine(5);
        let silent = AnalysisFrame::default();
        let dt = Duration::from_secs(1) / FPS;
        let mut params = ParameterSnapshot {
            mode: Mode::Advanced,
            ..ParameterSnapshot::default()
        };
        let input = |params: &ParameterSnapshot, engine: &mut PatternEngine| {
            engine.compute(&TickInput {
                tick: 0,
                time: dt,
                dt,
                beats: &[],
                analysis: &silent,
                params,
            })
        };
        assert!(input(&params, &mut engine).iter().all(|l| l.dimmer == 0));
        params.ambient = true;
        assert!(input(&params, &mut engine).iter().all(|l| l.dimmer > 0));
    }

    #[test]
    fn full_strobe_flashes_for_configured_ticks() {
        let params = ParameterSnapshot {
            program: ProgramId::Pulse,
            strobe: 100,
            ..ParameterSnapshot::default()
        };
        let frames = run(&mut engine(6), &params, 20);
        let flashing: Vec<u64> = frames
            .iter()
            .enumerate()
            .filter(|(_, lights)| lights.iter().all(|l| l.strobe && l.dimmer == 255))
            .map(|(tick, _)| tick as u64)
            .collect();
        assert_eq!(flashing, [14, 15]);
    }
}
