//! Control-level to time-domain mappings shared by both program families.

use std::f32::consts::PI;

/// Rate multiplier for the `speed` control.
///
/// 0 → 0.1×, 50 → 1×, 100 → roughly 6.3×. The two halves are exponential
/// so each step feels like the same proportional change.
pub fn speed_rate(speed: u8) -> f32 {
    let s = f32::from(speed.min(100));
    if s <= 50.0 {
        100f32.powf((s - 50.0) / 100.0)
    } else {
        40f32.powf((s - 50.0) / 100.0)
    }
}

/// Inverse of speed in `0.0..=1.0`, used by the advanced family where slow
/// settings mean longer fades.
pub fn smoothness(speed: u8) -> f32 {
    1.0 - f32::from(speed.min(100)) / 100.0
}

/// Colour crossfade duration in seconds. 1 s at the midpoint.
pub fn fade_seconds(speed: u8) -> f32 {
    1.0 / speed_rate(speed)
}

/// How long a beat flash lasts before it has fully decayed.
pub fn flash_seconds(speed: u8, sensitivity: u8) -> f32 {
    let s = smoothness(speed);
    let base = if s < 0.5 {
        0.2 + s * 1.6
    } else {
        1.0 + (s - 0.5) * 6.0
    };
    0.5 * base * (0.5 + unit(sensitivity) * 1.5)
}

/// Peak brightness boost contributed by a beat.
pub fn beat_response(speed: u8, sensitivity: u8) -> f32 {
    let s = smoothness(speed);
    let shape = if s < 0.5 {
        1.0 - s * 0.3
    } else {
        0.7 - (s - 0.5) * 0.4
    };
    (0.05 + unit(sensitivity) * 0.75) * shape
}

/// Output multiplier for the `brightness` control: 10% at 0, 100% at 50 and
/// 120% at 100, linear on each side of the midpoint.
pub fn brightness_multiplier(brightness: u8) -> f32 {
    let b = f32::from(brightness.min(100));
    if b <= 50.0 {
        0.1 + 0.9 * b / 50.0
    } else {
        1.0 + 0.2 * (b - 50.0) / 50.0
    }
}

/// Cosine ease-in-out over `0.0..=1.0`.
pub fn ease_in_out(t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    0.5 - 0.5 * (PI * t).cos()
}

/// A 0-100 control as a fraction.
pub fn unit(level: u8) -> f32 {
    f32::from(level.min(100)) / 100.0
}

/// Counts raw beats and fires once every `divisor` of them.
#[derive(Debug, Clone, Default)]
pub struct BeatDivider {
    count: u32,
}

impl BeatDivider {
    /// Registers one beat. Returns true when this beat completes a group.
    pub fn on_beat(&mut self, divisor: u8) -> bool {
        self.count += 1;
        if self.count >= u32::from(divisor.max(1)) {
            self.count = 0;
            true
        } else {
            false
        }
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }
}
