//! Parametric patterns: colour scheduling, spatial propagation, effect
//! overlays and the echo trail.

use std::{collections::VecDeque, f32::consts::TAU};

use rand::{rngs::StdRng, Rng};

use super::{
    color::{frequency_blend, mood_adjust, pick, rainbow_targets, spectrum_color, Rgb},
    timing::{beat_response, ease_in_out, fade_seconds, flash_seconds, smoothness, unit},
    Cues, Shade,
};
use crate::{
    analysis::{AnalysisFrame, Genre},
    params::{Effect, ParameterSnapshot, PatternId, Theme},
};

const STARTING_COLORS: [Rgb; 8] = [
    Rgb::new(255, 0, 0),
    Rgb::new(0, 255, 0),
    Rgb::new(0, 0, 255),
    Rgb::new(255, 255, 0),
    Rgb::new(255, 0, 255),
    Rgb::new(0, 255, 255),
    Rgb::new(255, 128, 0),
    Rgb::new(128, 0, 255),
];

/// Longest echo trail, in frames.
pub const ECHO_FRAMES: usize = 60;
const ECHO_MAX_SECONDS: f32 = 2.0;
const BASE_BRIGHTNESS: f32 = 0.6;
const MIN_LEVEL: f32 = 0.01;
const PULSE_SECONDS: f32 = 0.1;

/// Applies genre presets and the drop boost to a copy of the parameters.
/// The store itself is never touched.
pub(crate) fn effective_params(params: &ParameterSnapshot, analysis: &AnalysisFrame) -> ParameterSnapshot {
    let mut effective = params.clone();
    if params.auto_genre {
        match analysis.genre {
            Genre::Edm => {
                effective.speed = 80;
                effective.sensitivity = 80;
                effective.strobe = 30;
            }
            Genre::HipHop => {
                effective.speed = 60;
                effective.sensitivity = 90;
                effective.rainbow = 30;
            }
            Genre::Rock => {
                effective.speed = 50;
                effective.sensitivity = 60;
                if effective.theme == Theme::Classic {
                    effective.theme = Theme::Warm;
                }
            }
            Genre::Jazz => {
                effective.speed = 20;
                effective.sensitivity = 30;
                effective.rainbow = 20;
            }
            Genre::Ambient => {
                effective.speed = 5;
                effective.sensitivity = 10;
                effective.ambient = true;
            }
            Genre::Auto => {}
        }
    }
    if analysis.dynamics.drop {
        effective.sensitivity = 100;
        effective.strobe = effective.strobe.max(50);
    }
    effective
}

/// Seconds until the next scheduled colour change for a rainbow level.
fn change_interval(rainbow: u8, rng: &mut StdRng) -> f32 {
    match rainbow {
        0..=19 => rng.gen_range(3.0..8.0),
        20..=49 => rng.gen_range(2.0..5.0),
        50..=79 => rng.gen_range(1.0..3.0),
        _ => rng.gen_range(0.5..1.5),
    }
}

/// Whether a beat may force a colour change at this rainbow level.
fn changes_on_beat(rainbow: u8, intensity: f32) -> bool {
    match rainbow {
        0..=19 => false,
        20..=49 => intensity > 0.6,
        50..=79 => intensity > 0.4,
        _ => true,
    }
}

#[derive(Debug, Clone)]
pub(crate) struct AdvancedState {
    from: Vec<Rgb>,
    target: Vec<Rgb>,
    current: Vec<Rgb>,
    progress: f32,
    since_change: f32,
    next_change: f32,
    cursor: usize,
    swell_phase: f32,
    last_trigger: Option<f32>,
    twinkle: Vec<f32>,
    trail: VecDeque<Vec<Shade>>,
}

impl AdvancedState {
    pub fn new(lights: usize) -> Self {
        let colors: Vec<Rgb> = (0..lights).map(|i| pick(&STARTING_COLORS, i)).collect();
        Self {
            from: colors.clone(),
            target: colors.clone(),
            current: colors,
            progress: 1.0,
            since_change: 0.0,
            next_change: 0.0,
            cursor: 0,
            swell_phase: 0.0,
            last_trigger: None,
            twinkle: vec![0.0; lights],
            trail: VecDeque::with_capacity(ECHO_FRAMES),
        }
    }

    pub fn render(&mut self, cues: &Cues<'_>, params: &ParameterSnapshot, rng: &mut StdRng) -> Vec<Shade> {
        let n = cues.lights;
        self.schedule_colors(cues, params, rng);
        if cues.trigger {
            self.last_trigger = Some(cues.time);
        }
        self.advance_fade(cues.dt, params.speed);

        let level = self.base_level(cues, params);
        let mut shades: Vec<Shade> = (0..n)
            .map(|i| {
                let (color, factor) = self.pattern_color(i, cues, params);
                Shade::new(self.color_source(color, cues, params), level * factor)
            })
            .collect();

        self.apply_effect(&mut shades, cues, params, rng);
        for shade in shades.iter_mut() {
            shade.level = shade.level.clamp(MIN_LEVEL, 1.0);
        }
        self.apply_echo(shades, cues.dt, params.echo)
    }

    fn schedule_colors(&mut self, cues: &Cues<'_>, params: &ParameterSnapshot, rng: &mut StdRng) {
        let n = cues.lights;
        if self.current.len() != n {
            *self = Self::new(n);
        }
        self.since_change += cues.dt;

        let beat_change = cues.trigger
            && params.pattern != PatternId::Swell
            && !params.spectrum_display
            && changes_on_beat(params.rainbow, cues.intensity);
        if !beat_change && self.since_change < self.next_change {
            return;
        }

        self.from = self.current.clone();
        self.target = if params.pattern == PatternId::Swell {
            self.cursor = (self.cursor + 1) % cues.palette.len().max(1);
            vec![pick(cues.palette, self.cursor); n]
        } else {
            rainbow_targets(cues.palette, params.rainbow, n, &mut self.cursor, rng)
        };
        self.progress = 0.0;
        self.since_change = 0.0;
        self.next_change = change_interval(params.rainbow, rng) / cues.rate;
    }

    fn advance_fade(&mut self, dt: f32, speed: u8) {
        if self.progress >= 1.0 {
            return;
        }
        self.progress = (self.progress + dt / fade_seconds(speed)).min(1.0);
        let eased = ease_in_out(self.progress);
        for ((current, from), target) in self.current.iter_mut().zip(&self.from).zip(&self.target) {
            *current = from.lerp(*target, eased);
        }
    }

    fn beat_boost(&self, time: f32, params: &ParameterSnapshot) -> f32 {
        let Some(last) = self.last_trigger else {
            return 0.0;
        };
        let elapsed = time - last;
        let duration = flash_seconds(params.speed, params.sensitivity);
        if elapsed < 0.0 || elapsed >= duration {
            return 0.0;
        }
        beat_response(params.speed, params.sensitivity) * (1.0 - elapsed / duration)
    }

    fn base_level(&mut self, cues: &Cues<'_>, params: &ParameterSnapshot) -> f32 {
        let bands = &cues.bands;
        if params.spectrum_display {
            return (bands.bass * 0.5 + bands.mid * 0.3 + bands.high * 0.2) * BASE_BRIGHTNESS;
        }
        if params.pattern == PatternId::Swell {
            let hz = 0.1 + (1.0 - smoothness(params.speed)) * 0.5;
            self.swell_phase = (self.swell_phase + hz * cues.dt).fract();
            let swell = ((TAU * self.swell_phase).sin() + 1.0) / 2.0;
            return (0.2 + cues.intensity * 0.5 + swell * 0.3) * BASE_BRIGHTNESS;
        }
        let sensitivity = unit(params.sensitivity);
        (cues.intensity * (0.5 + sensitivity) * BASE_BRIGHTNESS + self.beat_boost(cues.time, params)).min(1.0)
    }

    /// Colour for light `i` under the selected pattern, with a level factor.
    fn pattern_color(&self, i: usize, cues: &Cues<'_>, params: &ParameterSnapshot) -> (Rgb, f32) {
        let n = self.current.len();
        let wave_hz = 0.7 * cues.rate;
        let wave = |index: usize| {
            let blend = ((TAU * (cues.time * wave_hz - index as f32 * 0.2)).sin() + 1.0) / 2.0;
            self.current[index].lerp(self.current[(index + 1) % n], blend)
        };

        match params.pattern {
            PatternId::Sync => (self.current[i], 1.0),
            PatternId::Wave => (wave(i), 1.0),
            PatternId::Center => {
                let lead = n / 2;
                let half = (n as f32 / 2.0).max(1.0);
                let distance = (i as f32 - (n as f32 - 1.0) / 2.0).abs() / half;
                let blend = ((TAU * (cues.time * wave_hz - distance)).sin() + 1.0) / 2.0;
                (self.current[i].lerp(self.current[lead], blend), 1.0)
            }
            PatternId::Alternate => {
                let phase = (cues.time * 2.0 * cues.rate) as usize % 2;
                let factor = if i % 2 == phase { 1.0 } else { 0.3 };
                (self.current[i], factor)
            }
            PatternId::Mirror => (wave(i.min(n - 1 - i)), 1.0),
            PatternId::Swell => (self.current[0], 1.0),
        }
    }

    fn color_source(&self, color: Rgb, cues: &Cues<'_>, params: &ParameterSnapshot) -> Rgb {
        let bands = &cues.bands;
        let color = if params.spectrum_display {
            spectrum_color(bands.bass, bands.mid, bands.high)
        } else if params.frequency_colors {
            frequency_blend(color, bands.bass, bands.mid, bands.high)
        } else {
            color
        };
        if params.mood_match {
            mood_adjust(color, cues.intensity)
        } else {
            color
        }
    }

    fn apply_effect(&mut self, shades: &mut [Shade], cues: &Cues<'_>, params: &ParameterSnapshot, rng: &mut StdRng) {
        let n = shades.len();
        let t = cues.time;
        let ambient = params.ambient;
        match params.effect {
            Effect::None => {}
            Effect::Breathe => {
                let rate = if ambient { 0.2 } else { 0.5 };
                let factor = 0.5 + 0.5 * ((t * rate).sin() + 1.0) / 2.0;
                for shade in shades.iter_mut() {
                    shade.level *= factor;
                }
            }
            Effect::Sparkle => {
                if rng.gen::<f32>() < 0.05 * (1.0 + cues.intensity) {
                    let chosen = rng.gen_range(0..n);
                    shades[chosen] = Shade::new(Rgb::WHITE, 1.0);
                }
            }
            Effect::Chase => {
                let rate = if ambient { 0.5 } else { 2.0 };
                let position = (t * rate) as usize % n;
                for (i, shade) in shades.iter_mut().enumerate() {
                    shade.level *= if i == position { 2.0 } else { 0.3 };
                }
            }
            Effect::Pulse => {
                let recent = self
                    .last_trigger
                    .map(|last| t - last < PULSE_SECONDS)
                    .unwrap_or(false);
                if recent {
                    let factor = 1.0 + unit(params.sensitivity) * 0.5;
                    for shade in shades.iter_mut() {
                        shade.level *= factor;
                    }
                }
            }
            Effect::Sweep => {
                let rate = if ambient { 0.3 } else { 1.0 };
                for (i, shade) in shades.iter_mut().enumerate() {
                    let phase = (t * rate + i as f32 * 0.2).rem_euclid(1.0);
                    let c = shade.color;
                    shade.color = match (phase * 3.0) as usize {
                        0 => c,
                        1 => Rgb { r: c.b, g: c.r, b: c.g },
                        _ => Rgb { r: c.g, g: c.b, b: c.r },
                    };
                }
            }
            Effect::Firefly => {
                self.twinkle.resize(n, 0.0);
                let decay = 0.95f32.powf(cues.frames());
                for (twinkle, shade) in self.twinkle.iter_mut().zip(shades.iter_mut()) {
                    if *twinkle < MIN_LEVEL && rng.gen::<f32>() < 0.01 {
                        *twinkle = 1.0;
                    }
                    shade.color = shade.color.lerp(Rgb::WHITE, *twinkle);
                    shade.level = shade.level.max(*twinkle);
                    *twinkle *= decay;
                }
            }
        }
    }

    /// Lets recent frames linger: a light shows whichever is brighter, its
    /// fresh shade or a fading copy of an earlier one.
    fn apply_echo(&mut self, fresh: Vec<Shade>, dt: f32, echo: u8) -> Vec<Shade> {
        if echo == 0 || dt <= 0.0 {
            self.trail.clear();
            return fresh;
        }
        let seconds = unit(echo) * ECHO_MAX_SECONDS;
        let length = ((seconds / dt).round() as usize).clamp(1, ECHO_FRAMES);
        self.trail.truncate(length);

        let mut output = fresh.clone();
        for (age, past) in self.trail.iter().enumerate() {
            if past.len() != output.len() {
                continue;
            }
            let weight = 1.0 - (age + 1) as f32 / (length + 1) as f32;
            for (out, old) in output.iter_mut().zip(past) {
                let faded = old.level * weight;
                if faded > out.level {
                    *out = Shade::new(old.color, faded);
                }
            }
        }

        self.trail.push_front(fresh);
        self.trail.truncate(length);
        output
    }
}
