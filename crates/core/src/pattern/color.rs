use rand::{rngs::StdRng, seq::SliceRandom, Rng};

use crate::params::Theme;

/// RGB colour with components in `0.0..=255.0`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Rgb {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb::new(0, 0, 0);
    pub const WHITE: Rgb = Rgb::new(255, 255, 255);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self {
            r: r as f32,
            g: g as f32,
            b: b as f32,
        }
    }

    pub fn from_f32(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }.clamped()
    }

    pub fn lerp(self, other: Rgb, t: f32) -> Rgb {
        let t = t.clamp(0.0, 1.0);
        Rgb {
            r: self.r + (other.r - self.r) * t,
            g: self.g + (other.g - self.g) * t,
            b: self.b + (other.b - self.b) * t,
        }
    }

    pub fn scale(self, factor: f32) -> Rgb {
        Rgb::from_f32(self.r * factor, self.g * factor, self.b * factor)
    }

    /// Component-wise saturating sum.
    pub fn add(self, other: Rgb) -> Rgb {
        Rgb::from_f32(self.r + other.r, self.g + other.g, self.b + other.b)
    }

    pub fn clamped(self) -> Rgb {
        let clamp = |v: f32| if v.is_finite() { v.clamp(0.0, 255.0) } else { 0.0 };
        Rgb {
            r: clamp(self.r),
            g: clamp(self.g),
            b: clamp(self.b),
        }
    }

    pub fn to_bytes(self) -> [u8; 3] {
        let c = self.clamped();
        [c.r.round() as u8, c.g.round() as u8, c.b.round() as u8]
    }
}

const CLASSIC: [Rgb; 14] = [
    Rgb::new(255, 0, 0),
    Rgb::new(255, 64, 0),
    Rgb::new(255, 128, 0),
    Rgb::new(255, 192, 0),
    Rgb::new(255, 255, 0),
    Rgb::new(192, 255, 0),
    Rgb::new(0, 255, 0),
    Rgb::new(0, 255, 128),
    Rgb::new(0, 255, 255),
    Rgb::new(0, 128, 255),
    Rgb::new(0, 0, 255),
    Rgb::new(128, 0, 255),
    Rgb::new(255, 0, 255),
    Rgb::new(255, 0, 128),
];

const SUNSET: [Rgb; 10] = [
    Rgb::new(128, 0, 128),
    Rgb::new(192, 0, 128),
    Rgb::new(255, 0, 128),
    Rgb::new(255, 64, 128),
    Rgb::new(255, 128, 64),
    Rgb::new(255, 192, 0),
    Rgb::new(255, 128, 0),
    Rgb::new(255, 64, 0),
    Rgb::new(255, 0, 0),
    Rgb::new(192, 0, 0),
];

const OCEAN: [Rgb; 10] = [
    Rgb::new(0, 0, 64),
    Rgb::new(0, 0, 128),
    Rgb::new(0, 64, 192),
    Rgb::new(0, 128, 255),
    Rgb::new(0, 192, 255),
    Rgb::new(0, 255, 255),
    Rgb::new(64, 255, 192),
    Rgb::new(128, 255, 128),
    Rgb::new(0, 255, 128),
    Rgb::new(0, 192, 128),
];

const FIRE: [Rgb; 10] = [
    Rgb::new(64, 0, 0),
    Rgb::new(128, 0, 0),
    Rgb::new(192, 0, 0),
    Rgb::new(255, 0, 0),
    Rgb::new(255, 64, 0),
    Rgb::new(255, 128, 0),
    Rgb::new(255, 192, 0),
    Rgb::new(255, 255, 0),
    Rgb::new(255, 255, 128),
    Rgb::new(255, 255, 255),
];

const FOREST: [Rgb; 10] = [
    Rgb::new(0, 64, 0),
    Rgb::new(0, 96, 0),
    Rgb::new(0, 128, 0),
    Rgb::new(0, 192, 0),
    Rgb::new(64, 255, 0),
    Rgb::new(128, 255, 0),
    Rgb::new(192, 255, 0),
    Rgb::new(255, 255, 0),
    Rgb::new(192, 192, 0),
    Rgb::new(128, 128, 0),
];

const GALAXY: [Rgb; 10] = [
    Rgb::new(64, 0, 128),
    Rgb::new(96, 0, 192),
    Rgb::new(128, 0, 255),
    Rgb::new(64, 64, 255),
    Rgb::new(0, 128, 255),
    Rgb::new(0, 192, 255),
    Rgb::new(0, 255, 255),
    Rgb::new(128, 255, 255),
    Rgb::new(192, 192, 255),
    Rgb::new(255, 255, 255),
];

const MONOCHROME: [Rgb; 10] = [
    Rgb::new(255, 255, 255),
    Rgb::new(224, 224, 224),
    Rgb::new(192, 192, 192),
    Rgb::new(160, 160, 160),
    Rgb::new(128, 128, 128),
    Rgb::new(96, 96, 96),
    Rgb::new(64, 64, 64),
    Rgb::new(32, 32, 32),
    Rgb::new(64, 64, 64),
    Rgb::new(128, 128, 128),
];

const WARM: [Rgb; 12] = [
    Rgb::new(255, 0, 0),
    Rgb::new(255, 32, 0),
    Rgb::new(255, 64, 0),
    Rgb::new(255, 96, 0),
    Rgb::new(255, 128, 0),
    Rgb::new(255, 160, 0),
    Rgb::new(255, 192, 0),
    Rgb::new(255, 224, 0),
    Rgb::new(255, 255, 0),
    Rgb::new(255, 255, 64),
    Rgb::new(255, 192, 128),
    Rgb::new(255, 128, 64),
];

const COOL: [Rgb; 12] = [
    Rgb::new(0, 0, 255),
    Rgb::new(0, 64, 255),
    Rgb::new(0, 128, 255),
    Rgb::new(0, 192, 255),
    Rgb::new(0, 255, 255),
    Rgb::new(0, 255, 192),
    Rgb::new(0, 255, 128),
    Rgb::new(64, 128, 255),
    Rgb::new(128, 0, 255),
    Rgb::new(192, 0, 255),
    Rgb::new(255, 0, 255),
    Rgb::new(255, 0, 192),
];

impl Theme {
    pub fn palette(self) -> &'static [Rgb] {
        match self {
            Theme::Classic => &CLASSIC,
            Theme::Sunset => &SUNSET,
            Theme::Ocean => &OCEAN,
            Theme::Fire => &FIRE,
            Theme::Forest => &FOREST,
            Theme::Galaxy => &GALAXY,
            Theme::Monochrome => &MONOCHROME,
            Theme::Warm => &WARM,
            Theme::Cool => &COOL,
        }
    }
}

/// Wraps an index into the palette.
pub fn pick(palette: &[Rgb], index: usize) -> Rgb {
    if palette.is_empty() {
        return Rgb::WHITE;
    }
    palette[index % palette.len()]
}

pub fn random_pick(palette: &[Rgb], rng: &mut StdRng) -> Rgb {
    palette.choose(rng).copied().unwrap_or(Rgb::WHITE)
}

/// Chooses one target colour per light. `rainbow` (0-100) widens the spread
/// across the palette in four tiers: one shared colour, neighbouring
/// colours, one colour per palette third, and distinct random colours.
pub fn rainbow_targets(
    palette: &[Rgb],
    rainbow: u8,
    lights: usize,
    cursor: &mut usize,
    rng: &mut StdRng,
) -> Vec<Rgb> {
    let size = palette.len().max(1);
    match rainbow {
        0..=19 => {
            *cursor = (*cursor + 1) % size;
            vec![pick(palette, *cursor); lights]
        }
        20..=49 => {
            let base = rng.gen_range(0..size);
            let spread = (size * 3 / 10).max(1);
            (0..lights)
                .map(|i| pick(palette, base + i * spread / lights.max(1)))
                .collect()
        }
        50..=79 => {
            let spread = (size / 3).max(1);
            (0..lights)
                .map(|i| pick(palette, i * spread + rng.gen_range(0..spread)))
                .collect()
        }
        _ => {
            let mut indices: Vec<usize> = (0..size).collect();
            indices.shuffle(rng);
            (0..lights)
                .map(|i| pick(palette, indices[i % indices.len()]))
                .collect()
        }
    }
}

/// Shifts colour temperature with intensity: cooler below 0.3, warmer
/// above 0.7, unchanged in between.
pub fn mood_adjust(color: Rgb, intensity: f32) -> Rgb {
    if intensity < 0.3 {
        let cool = 1.0 - intensity / 0.3;
        Rgb::from_f32(
            color.r * (0.5 + 0.5 * (1.0 - cool)),
            color.g * (0.7 + 0.3 * (1.0 - cool)),
            color.b * (1.0 + cool * 0.5),
        )
    } else if intensity > 0.7 {
        let warm = ((intensity - 0.7) / 0.3).min(1.0);
        Rgb::from_f32(
            color.r * (1.0 + warm * 0.5),
            color.g * (0.8 + 0.2 * (1.0 - warm * 0.5)),
            color.b * (0.5 + 0.5 * (1.0 - warm)),
        )
    } else {
        color
    }
}

/// Blends a colour toward bass=red, mid=green, high=blue.
pub fn frequency_blend(color: Rgb, bass: f32, mid: f32, high: f32) -> Rgb {
    Rgb::from_f32(
        color.r * 0.3 + bass * 255.0 * 0.7,
        color.g * 0.3 + mid * 255.0 * 0.7,
        color.b * 0.3 + high * 255.0 * 0.7,
    )
}

/// A colour made only from the band balance, never fully dark.
pub fn spectrum_color(bass: f32, mid: f32, high: f32) -> Rgb {
    let color = Rgb::from_f32(
        255.0 * (bass * 0.8 + mid * 0.2),
        255.0 * (mid * 0.7 + bass * 0.2 + high * 0.1),
        255.0 * (high * 0.8 + mid * 0.2),
    );
    if color.r + color.g + color.b < 100.0 {
        Rgb::from_f32(color.r.max(40.0), color.g.max(40.0), color.b.max(40.0))
    } else {
        color
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn every_theme_has_a_palette() {
        for theme in Theme::ALL {
            assert!(theme.palette().len() >= 10, "{theme}");
        }
    }

    #[test]
    fn low_rainbow_gives_one_shared_colour() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut cursor = 0;
        let targets = rainbow_targets(Theme::Classic.palette(), 10, 6, &mut cursor, &mut rng);
        assert!(targets.iter().all(|c| *c == targets[0]));
        assert_eq!(cursor, 1);
    }

    #[test]
    fn full_rainbow_gives_distinct_colours() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut cursor = 0;
        let targets = rainbow_targets(Theme::Classic.palette(), 100, 8, &mut cursor, &mut rng);
        for (i, a) in targets.iter().enumerate() {
            for b in &targets[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn mood_cools_quiet_and_warms_loud() {
        let grey = Rgb::new(128, 128, 128);
        let cool = mood_adjust(grey, 0.0);
        assert!(cool.b > cool.r);
        let warm = mood_adjust(grey, 1.0);
        assert!(warm.r > warm.b);
        assert_eq!(mood_adjust(grey, 0.5), grey);
    }

    #[test]
    fn colour_math_stays_in_range() {
        let c = Rgb::new(200, 10, 250).scale(2.0).add(Rgb::WHITE);
        assert_eq!(c.to_bytes(), [255, 255, 255]);
        assert_eq!(spectrum_color(0.0, 0.0, 0.0).to_bytes(), [40, 40, 40]);
    }
}
