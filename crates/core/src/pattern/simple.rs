//! Self-contained preset programs.
//!
//! Every program keeps its own state and advances it from [`Cues`]: the
//! divided beat trigger, band energies, intensity and elapsed time. Motion
//! rates are expressed per nominal frame and scaled by elapsed time and the
//! speed control, so output does not depend on the render rate.

use std::f32::consts::TAU;

use rand::{rngs::StdRng, Rng};

use super::{
    color::{pick, random_pick, Rgb},
    Cues, Shade,
};
use crate::params::{ProgramId, Theme};

const BASS_RED: Rgb = Rgb::new(255, 0, 0);
const MID_YELLOW: Rgb = Rgb::new(255, 255, 0);
const HIGH_BLUE: Rgb = Rgb::new(0, 128, 255);
const COOL_BASS: Rgb = Rgb::new(0, 255, 128);
const COOL_MID: Rgb = Rgb::new(0, 255, 0);

const PSYCH_PAIRS: [(Rgb, Rgb); 5] = [
    (Rgb::new(255, 0, 0), Rgb::new(0, 255, 255)),
    (Rgb::new(0, 0, 255), Rgb::new(255, 128, 0)),
    (Rgb::new(0, 255, 0), Rgb::new(255, 0, 255)),
    (Rgb::new(255, 255, 0), Rgb::new(128, 0, 255)),
    (Rgb::new(255, 64, 160), Rgb::new(0, 160, 160)),
];
const PSYCH_SHAPES: u8 = 5;
const PSYCH_BEATS_PER_SHAPE: u32 = 16;

const RIPPLE_WAVES: usize = 3;
const RIPPLE_REACH: f32 = 3.0;
const RIPPLE_MARGIN: f32 = 5.0;

/// Level of a light `distance` positions away from a moving head.
fn tail_level(distance: usize) -> f32 {
    match distance {
        0 => 1.0,
        1 => 0.5,
        2 => 0.2,
        _ => 0.05,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BounceStyle {
    Same,
    Different,
    Discrete,
}

#[derive(Debug, Clone)]
pub(crate) struct DiscoLight {
    color: Rgb,
    level: f32,
    fade: f32,
    rising: bool,
}

impl DiscoLight {
    fn random(palette: &[Rgb], rng: &mut StdRng) -> Self {
        Self {
            color: random_pick(palette, rng),
            level: rng.gen::<f32>(),
            fade: 0.01 + rng.gen::<f32>() * 0.03,
            rising: rng.gen_bool(0.5),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Psychedelic {
    shape: u8,
    beats: u32,
    pair: usize,
    phase: f32,
    spiral: f32,
    morph: f32,
    flicker: Vec<f32>,
}

/// Running state of one preset program.
#[derive(Debug, Clone)]
pub(crate) enum SimpleProgram {
    Bounce {
        style: BounceStyle,
        position: usize,
        forward: bool,
        color_index: usize,
        colors: Vec<Rgb>,
    },
    Swell {
        same: bool,
        phase: f32,
        color_index: usize,
    },
    Disco(Vec<DiscoLight>),
    Psych(Psychedelic),
    Strobe {
        on: bool,
        color: Rgb,
    },
    Alternating {
        flipped: bool,
        color_index: usize,
    },
    Pulse {
        color_index: usize,
    },
    Spectrum,
    VuMeter {
        peak: f32,
    },
    Chase {
        head: usize,
        color_index: usize,
    },
    CenterBurst {
        radius: f32,
        color_index: usize,
    },
    Ripple {
        waves: [f32; RIPPLE_WAVES],
        color_index: usize,
    },
}

impl SimpleProgram {
    pub fn new(id: ProgramId, lights: usize, palette: &[Rgb], rng: &mut StdRng) -> Self {
        let bounce = |style| SimpleProgram::Bounce {
            style,
            position: 0,
            forward: true,
            color_index: 0,
            colors: vec![pick(palette, 0); lights],
        };
        match id {
            ProgramId::BounceSame => bounce(BounceStyle::Same),
            ProgramId::BounceDifferent => bounce(BounceStyle::Different),
            ProgramId::BounceDiscrete => bounce(BounceStyle::Discrete),
            ProgramId::SwellSame | ProgramId::SwellDifferent => SimpleProgram::Swell {
                same: id == ProgramId::SwellSame,
                phase: 0.0,
                color_index: 0,
            },
            ProgramId::Disco => {
                SimpleProgram::Disco((0..lights).map(|_| DiscoLight::random(palette, rng)).collect())
            }
            ProgramId::Psych => SimpleProgram::Psych(Psychedelic {
                shape: 0,
                beats: 0,
                pair: 0,
                phase: 0.0,
                spiral: 0.0,
                morph: 0.0,
                flicker: vec![1.0; lights],
            }),
            ProgramId::Strobe => SimpleProgram::Strobe {
                on: false,
                color: pick(palette, 0),
            },
            ProgramId::Alternating => SimpleProgram::Alternating {
                flipped: false,
                color_index: 0,
            },
            ProgramId::Pulse => SimpleProgram::Pulse { color_index: 0 },
            ProgramId::Spectrum => SimpleProgram::Spectrum,
            ProgramId::VuMeter => SimpleProgram::VuMeter { peak: 0.0 },
            ProgramId::Chase => SimpleProgram::Chase {
                head: 0,
                color_index: 0,
            },
            ProgramId::CenterBurst => SimpleProgram::CenterBurst {
                radius: 1.0,
                color_index: 0,
            },
            ProgramId::Ripple => SimpleProgram::Ripple {
                waves: [0.0, 0.2, 0.4],
                color_index: 0,
            },
        }
    }

    /// Advances the program by one tick and returns one shade per light.
    pub fn render(&mut self, cues: &Cues<'_>, rng: &mut StdRng) -> Vec<Shade> {
        let n = cues.lights;
        let palette = cues.palette;
        let frames = cues.frames();
        let intensity = cues.intensity;

        match self {
            SimpleProgram::Bounce {
                style,
                position,
                forward,
                color_index,
                colors,
            } => {
                colors.resize(n, pick(palette, *color_index));
                *position = (*position).min(n - 1);
                if cues.trigger {
                    let at_end = step_bounce(position, forward, n);
                    match style {
                        BounceStyle::Same | BounceStyle::Discrete if at_end => *color_index += 1,
                        BounceStyle::Different => colors[*position] = random_pick(palette, rng),
                        _ => {}
                    }
                }
                let edge = *position == 0 || *position + 1 == n;
                (0..n)
                    .map(|i| {
                        let distance = i.abs_diff(*position);
                        match style {
                            BounceStyle::Discrete => {
                                let level = if distance == 0 { 1.0 } else { 0.0 };
                                Shade::new(pick(palette, *color_index), level)
                            }
                            BounceStyle::Same => {
                                let color = if distance == 0 && edge {
                                    pick(palette, *color_index + 1)
                                } else {
                                    pick(palette, *color_index)
                                };
                                Shade::new(color, tail_level(distance))
                            }
                            BounceStyle::Different => Shade::new(colors[i], tail_level(distance)),
                        }
                    })
                    .collect()
            }

            SimpleProgram::Swell {
                same,
                phase,
                color_index,
            } => {
                if cues.trigger {
                    *color_index += 1;
                }
                *phase = (*phase + 0.5 / cues.divisor * cues.rate * cues.dt).fract();
                let level = 0.1 + 0.9 * ((TAU * *phase).sin() + 1.0) / 2.0;
                (0..n)
                    .map(|i| {
                        let offset = if *same { 0 } else { i };
                        Shade::new(pick(palette, *color_index + offset), level)
                    })
                    .collect()
            }

            SimpleProgram::Disco(lights) => {
                while lights.len() < n {
                    lights.push(DiscoLight::random(palette, rng));
                }
                lights.truncate(n);
                for light in lights.iter_mut() {
                    if cues.trigger && rng.gen_bool(0.3) {
                        light.color = random_pick(palette, rng);
                        light.level = 1.0;
                        light.rising = false;
                        continue;
                    }
                    let step = light.fade * frames;
                    if light.rising {
                        light.level += step;
                        if light.level >= 1.0 {
                            light.level = 1.0;
                            light.rising = false;
                        }
                    } else {
                        light.level -= step;
                        if light.level <= 0.0 {
                            light.level = 0.0;
                            light.rising = true;
                            light.color = random_pick(palette, rng);
                        }
                    }
                }
                lights.iter().map(|l| Shade::new(l.color, l.level)).collect()
            }

            SimpleProgram::Psych(state) => state.render(cues, rng),

            SimpleProgram::Strobe { on, color } => {
                if cues.trigger {
                    *on = !*on;
                    if *on {
                        *color = random_pick(palette, rng);
                    }
                }
                let level = if *on { 0.5 + 0.5 * intensity } else { 0.0 };
                vec![Shade::new(*color, level); n]
            }

            SimpleProgram::Alternating {
                flipped,
                color_index,
            } => {
                if cues.trigger {
                    *flipped = !*flipped;
                    *color_index += 1;
                }
                let first = pick(palette, *color_index);
                let second = pick(palette, *color_index + palette.len() / 2);
                let gain = 0.5 + 0.5 * intensity;
                (0..n)
                    .map(|i| {
                        if (i % 2 == 0) != *flipped {
                            Shade::new(first, 0.8 * gain)
                        } else {
                            Shade::new(second, 0.3 * gain)
                        }
                    })
                    .collect()
            }

            SimpleProgram::Pulse { color_index } => {
                if cues.trigger {
                    *color_index += 1;
                }
                vec![Shade::new(pick(palette, *color_index), 0.1 + 0.9 * intensity); n]
            }

            SimpleProgram::Spectrum => {
                let cool = matches!(cues.theme, Theme::Cool | Theme::Ocean);
                let group = (n / 3).max(1);
                let bands = &cues.bands;
                (0..n)
                    .map(|i| {
                        let (color, level) = match (i / group).min(2) {
                            0 => (if cool { COOL_BASS } else { BASS_RED }, bands.bass),
                            1 => (if cool { COOL_MID } else { MID_YELLOW }, bands.mid),
                            _ => (HIGH_BLUE, bands.high),
                        };
                        Shade::new(color, 0.1 + 0.9 * level)
                    })
                    .collect()
            }

            SimpleProgram::VuMeter { peak } => {
                let lit = ((intensity * n as f32) as usize).min(n);
                *peak = (*peak - 0.1 * frames).max(lit as f32);
                let peak_light = (peak.ceil() as usize).checked_sub(1).filter(|p| *p >= lit && *p < n);
                (0..n)
                    .map(|i| {
                        if i < lit {
                            Shade::new(meter_color(i as f32 / n as f32), 1.0)
                        } else if Some(i) == peak_light {
                            Shade::new(Rgb::WHITE, 0.5)
                        } else {
                            Shade::DARK
                        }
                    })
                    .collect()
            }

            SimpleProgram::Chase { head, color_index } => {
                if cues.trigger {
                    *head = (*head + 1) % n;
                    if *head == 0 {
                        *color_index += 1;
                    }
                }
                let head = (*head).min(n - 1);
                let color = pick(palette, *color_index);
                (0..n)
                    .map(|i| Shade::new(color, tail_level((head + n - i) % n)))
                    .collect()
            }

            SimpleProgram::CenterBurst {
                radius,
                color_index,
            } => {
                if cues.trigger {
                    *radius = 0.0;
                    *color_index += 1;
                }
                *radius = (*radius + 0.25 / cues.divisor * frames).min(1.5);
                let energy = 0.7 + 0.3 * intensity;
                let inner = pick(palette, *color_index);
                let outer = pick(palette, *color_index + 1);
                let half = n as f32 / 2.0;
                let spread = ((*radius - 0.5) * 2.0).clamp(0.0, 1.0);
                (0..n)
                    .map(|i| {
                        let distance = (i as f32 - half + 0.5).abs() / half;
                        let central = distance < 0.5;
                        if *radius < 0.5 {
                            if central {
                                Shade::new(inner, *radius * 2.0 * energy)
                            } else {
                                Shade::new(outer, 0.05)
                            }
                        } else if central {
                            Shade::new(inner, ((1.0 - spread) * energy).max(0.05))
                        } else {
                            Shade::new(outer, (spread * energy).max(0.05))
                        }
                    })
                    .collect()
            }

            SimpleProgram::Ripple { waves, color_index } => {
                if cues.trigger {
                    *color_index += 1;
                }
                let step = 0.1 / cues.divisor * frames;
                for wave in waves.iter_mut() {
                    *wave += step;
                    if *wave > n as f32 + RIPPLE_MARGIN {
                        *wave = -RIPPLE_MARGIN;
                    }
                }
                (0..n)
                    .map(|i| {
                        let mut color = Rgb::BLACK;
                        let mut level = 0.05;
                        for (w, wave) in waves.iter().enumerate() {
                            let distance = (i as f32 - wave).abs();
                            if distance < RIPPLE_REACH {
                                let weight = (1.0 - distance / RIPPLE_REACH) * 0.7;
                                color = color.add(pick(palette, *color_index + w * 3).scale(weight));
                                level += weight;
                            }
                        }
                        if color == Rgb::BLACK {
                            color = pick(palette, *color_index);
                        }
                        Shade::new(color, level.min(1.0))
                    })
                    .collect()
            }
        }
    }
}

/// Moves the bounce head one step. Returns true when it reversed at an end.
fn step_bounce(position: &mut usize, forward: &mut bool, lights: usize) -> bool {
    if lights <= 1 {
        *position = 0;
        return true;
    }
    if *forward {
        *position = (*position + 1).min(lights - 1);
        if *position == lights - 1 {
            *forward = false;
            return true;
        }
    } else {
        *position = position.saturating_sub(1);
        if *position == 0 {
            *forward = true;
            return true;
        }
    }
    false
}

fn meter_color(fraction: f32) -> Rgb {
    let green = Rgb::new(0, 255, 0);
    let yellow = Rgb::new(255, 255, 0);
    let red = Rgb::new(255, 0, 0);
    if fraction < 0.5 {
        green.lerp(yellow, fraction * 2.0)
    } else {
        yellow.lerp(red, (fraction - 0.5) * 2.0)
    }
}

impl Psychedelic {
    fn render(&mut self, cues: &Cues<'_>, rng: &mut StdRng) -> Vec<Shade> {
        let n = cues.lights;
        let bands = &cues.bands;

        for _ in 0..cues.raw_beats {
            self.beats += 1;
            if self.beats % PSYCH_BEATS_PER_SHAPE == 0 {
                self.shape = (self.shape + 1) % PSYCH_SHAPES;
                self.pair = (self.pair + 1) % PSYCH_PAIRS.len();
            }
        }
        let seconds = cues.dt * cues.rate;
        self.phase = (self.phase + (0.5 + bands.bass * 0.5) / cues.divisor * seconds).fract();
        self.spiral = (self.spiral + (bands.mid * 0.1 + 0.02) * seconds).fract();
        self.morph = (self.morph + (bands.high * 0.05 + 0.01) * seconds).fract();

        self.flicker.resize(n, 1.0);
        for flicker in self.flicker.iter_mut() {
            if rng.gen_bool(0.1) {
                *flicker = 1.0 - rng.gen::<f32>() * 0.15;
            }
        }

        let (first, second) = PSYCH_PAIRS[self.pair];
        let center = (n as f32 - 1.0) / 2.0;
        (0..n)
            .map(|i| {
                let position = i as f32 / n as f32;
                let distance = (i as f32 - center).abs() / n as f32;
                let wave = |x: f32| ((TAU * x).sin() + 1.0) / 2.0;
                let value = match self.shape {
                    0 => wave(self.phase + distance),
                    1 => wave(self.phase + position + self.spiral),
                    2 => wave(self.phase * (1.0 + 0.5 * (TAU * self.morph).sin()) + position),
                    3 => {
                        if (i + (self.phase * 2.0) as usize) % 2 == 0 {
                            1.0
                        } else {
                            0.2
                        }
                    }
                    _ => (self.phase - distance).rem_euclid(1.0),
                };
                let base = first.lerp(second, value);
                let color = Rgb::from_f32(
                    base.r * (1.0 + bands.bass * 0.3),
                    base.g * (1.0 + bands.mid * 0.3),
                    base.b * (1.0 + bands.high * 0.3),
                );
                let level = (0.3 + value * 0.5) * self.flicker[i] * (0.7 + cues.intensity * 0.3);
                Shade::new(color, level)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;
    use crate::{analysis::BandEnergies, params::ParameterSnapshot};

    fn cues(params: &ParameterSnapshot, trigger: bool) -> Cues<'_> {
        Cues {
            time: 0.0,
            dt: 1.0 / 30.0,
            lights: params.light_count,
            trigger,
            raw_beats: usize::from(trigger),
            bands: BandEnergies {
                bass: 0.8,
                mid: 0.4,
                high: 0.2,
                loudness: 0.3,
            },
            intensity: 0.8,
            rate: 1.0,
            divisor: 1.0,
            theme: params.theme,
            palette: params.theme.palette(),
        }
    }

    #[test]
    fn bounce_reverses_at_the_ends() {
        let mut rng = StdRng::seed_from_u64(3);
        let params = ParameterSnapshot::default();
        let mut program = SimpleProgram::new(ProgramId::BounceDiscrete, 4, params.theme.palette(), &mut rng);
        let mut lit = Vec::new();
        for _ in 0..7 {
            let shades = program.render(&cues(&params, true), &mut rng);
            lit.push(shades.iter().position(|s| s.level > 0.0).unwrap());
        }
        assert_eq!(lit, [1, 2, 3, 2, 1, 0, 1]);
    }

    #[test]
    fn chase_head_moves_one_light_per_trigger() {
        let mut rng = StdRng::seed_from_u64(3);
        let params = ParameterSnapshot::default();
        let mut program = SimpleProgram::new(ProgramId::Chase, 4, params.theme.palette(), &mut rng);
        let head = |shades: &[Shade]| shades.iter().position(|s| s.level == 1.0).unwrap();

        let still = program.render(&cues(&params, false), &mut rng);
        assert_eq!(head(&still), 0);
        let moved = program.render(&cues(&params, true), &mut rng);
        assert_eq!(head(&moved), 1);
        assert_eq!(moved[0].level, 0.5);
    }

    #[test]
    fn vu_meter_lights_in_proportion_to_intensity() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut params = ParameterSnapshot::default();
        params.light_count = 8;
        let mut program = SimpleProgram::new(ProgramId::VuMeter, 8, params.theme.palette(), &mut rng);
        let shades = program.render(&cues(&params, false), &mut rng);
        let lit = shades.iter().filter(|s| s.level == 1.0).count();
        assert_eq!(lit, 6);
    }

    #[test]
    fn spectrum_groups_follow_bands() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut params = ParameterSnapshot::default();
        params.light_count = 6;
        let mut program = SimpleProgram::new(ProgramId::Spectrum, 6, params.theme.palette(), &mut rng);
        let shades = program.render(&cues(&params, false), &mut rng);
        assert_eq!(shades[0].color, BASS_RED);
        assert_eq!(shades[5].color, HIGH_BLUE);
        assert!(shades[0].level > shades[5].level);
    }

    #[test]
    fn single_light_programs_do_not_panic() {
        let mut params = ParameterSnapshot::default();
        params.light_count = 1;
        for id in ProgramId::ALL {
            let mut rng = StdRng::seed_from_u64(9);
            let mut program = SimpleProgram::new(*id, 1, params.theme.palette(), &mut rng);
            for tick in 0..20 {
                let shades = program.render(&cues(&params, tick % 3 == 0), &mut rng);
                assert_eq!(shades.len(), 1, "{id}");
            }
        }
    }
}
