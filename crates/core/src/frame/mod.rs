//! DMX frame assembly.
//!
//! Each light owns a contiguous block of `channels_per_fixture` channels. The
//! [`FixtureLayout`] says where dimmer, colour, strobe and an optional white
//! channel sit inside that block; anything unmapped stays at zero. The default
//! matches the 7-channel PAR map (mode and speed at 5 and 6 must stay at zero
//! for manual control) in an 8-channel slot.

use serde::{Deserialize, Serialize};

use crate::{LightingError, Result, MAX_LIGHTS, UNIVERSE_SIZE};

/// Strobe channel value written while a light's strobe flag is set.
pub const STROBE_ON: u8 = 255;

/// Output of the pattern engine for one light.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightState {
    pub index: usize,
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    pub white: u8,
    pub dimmer: u8,
    pub strobe: bool,
}

impl LightState {
    /// A dark light.
    pub fn off(index: usize) -> Self {
        Self {
            index,
            ..Self::default()
        }
    }
}

/// Channel offsets inside one fixture block.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FixtureLayout {
    pub channels_per_fixture: usize,
    pub dimmer: usize,
    pub red: usize,
    pub green: usize,
    pub blue: usize,
    pub strobe: usize,
    /// Fixtures without a white emitter leave this unset.
    pub white: Option<usize>,
}

impl Default for FixtureLayout {
    fn default() -> Self {
        Self {
            channels_per_fixture: 8,
            dimmer: 0,
            red: 1,
            green: 2,
            blue: 3,
            strobe: 4,
            white: None,
        }
    }
}

impl FixtureLayout {
    fn offsets(&self) -> Vec<(&'static str, usize)> {
        let mut offsets = vec![
            ("dimmer", self.dimmer),
            ("red", self.red),
            ("green", self.green),
            ("blue", self.blue),
            ("strobe", self.strobe),
        ];
        if let Some(white) = self.white {
            offsets.push(("white", white));
        }
        offsets
    }

    /// Checks that every offset fits inside the fixture block and that no
    /// two functions share a channel.
    pub fn validate(&self) -> Result<()> {
        if self.channels_per_fixture == 0 || self.channels_per_fixture > UNIVERSE_SIZE {
            return Err(LightingError::Config(format!(
                "fixture.channels_per_fixture must be within 1..={UNIVERSE_SIZE}"
            )));
        }

        let offsets = self.offsets();
        for (i, (name, offset)) in offsets.iter().enumerate() {
            if *offset >= self.channels_per_fixture {
                return Err(LightingError::Config(format!(
                    "fixture.{name} offset {offset} is outside the {}-channel fixture",
                    self.channels_per_fixture
                )));
            }
            if let Some((other, _)) = offsets[..i].iter().find(|(_, o)| o == offset) {
                return Err(LightingError::Config(format!(
                    "fixture.{name} and fixture.{other} both map to channel {offset}"
                )));
            }
        }
        Ok(())
    }
}

/// A complete channel buffer for one universe, ready for transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DmxFrame {
    pub universe: u16,
    pub data: Vec<u8>,
}

impl DmxFrame {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// The frame zero-padded to a full 512-channel universe.
    pub fn to_universe(&self) -> [u8; UNIVERSE_SIZE] {
        let mut universe = [0u8; UNIVERSE_SIZE];
        let len = self.data.len().min(UNIVERSE_SIZE);
        universe[..len].copy_from_slice(&self.data[..len]);
        universe
    }

    /// Whether every channel is zero.
    pub fn is_dark(&self) -> bool {
        self.data.iter().all(|b| *b == 0)
    }
}

/// Maps light states onto the fixture layout.
#[derive(Debug, Clone)]
pub struct FrameBuilder {
    layout: FixtureLayout,
    universe: u16,
}

impl FrameBuilder {
    pub fn new(layout: FixtureLayout, universe: u16) -> Self {
        Self { layout, universe }
    }

    /// Frame length for `light_count` fixtures.
    pub fn frame_len(&self, light_count: usize) -> usize {
        light_count * self.layout.channels_per_fixture
    }

    /// Builds a frame of exactly `lights.len() × channels_per_fixture` bytes.
    /// Lights are placed by their position in the slice.
    pub fn build(&self, lights: &[LightState]) -> Result<DmxFrame> {
        if lights.is_empty() || lights.len() > MAX_LIGHTS {
            return Err(LightingError::msg(format!(
                "frame needs 1..={MAX_LIGHTS} lights, got {}",
                lights.len()
            )));
        }
        let len = self.frame_len(lights.len());
        if len > UNIVERSE_SIZE {
            return Err(LightingError::msg(format!(
                "{len} channels exceed the {UNIVERSE_SIZE}-channel universe"
            )));
        }

        let mut data = vec![0u8; len];
        let layout = &self.layout;
        for (slot, light) in data.chunks_exact_mut(layout.channels_per_fixture).zip(lights) {
            slot[layout.dimmer] = light.dimmer;
            slot[layout.red] = light.red;
            slot[layout.green] = light.green;
            slot[layout.blue] = light.blue;
            if let Some(white) = layout.white {
                slot[white] = light.white;
            }
            slot[layout.strobe] = if light.strobe { STROBE_ON } else { 0 };
        }

        Ok(DmxFrame {
            universe: self.universe,
            data,
        })
    }

    /// An all-zero frame for `light_count` fixtures.
    pub fn blackout(&self, light_count: usize) -> DmxFrame {
        let count = light_count.clamp(1, MAX_LIGHTS);
        DmxFrame {
            universe: self.universe,
            data: vec![0; self.frame_len(count).min(UNIVERSE_SIZE)],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit(index: usize) -> LightState {
        LightState {
            index,
            red: 10,
            green: 20,
            blue: 30,
            white: 40,
            dimmer: 255,
            strobe: true,
        }
    }

    #[test]
    fn frame_length_follows_light_count() {
        let builder = FrameBuilder::new(FixtureLayout::default(), 1);
        for count in 1..=MAX_LIGHTS {
            let lights: Vec<_> = (0..count).map(lit).collect();
            let frame = builder.build(&lights).unwrap();
            assert_eq!(frame.len(), count * 8);
            assert_eq!(frame.universe, 1);
        }
    }

    #[test]
    fn channels_land_in_fixture_slots() {
        let builder = FrameBuilder::new(FixtureLayout::default(), 1);
        let frame = builder.build(&[LightState::off(0), lit(1)]).unwrap();

        assert_eq!(&frame.data[..8], &[0; 8]);
        assert_eq!(&frame.data[8..], &[255, 10, 20, 30, STROBE_ON, 0, 0, 0]);
    }

    #[test]
    fn flash_leaves_mode_and_speed_channels_at_zero() {
        let builder = FrameBuilder::new(FixtureLayout::default(), 1);
        let flash = LightState {
            index: 0,
            red: 255,
            green: 255,
            blue: 255,
            white: 255,
            dimmer: 255,
            strobe: true,
        };
        let frame = builder.build(&[flash, flash]).unwrap();
        for slot in frame.data.chunks_exact(8) {
            assert_eq!(slot[4], STROBE_ON);
            assert_eq!(&slot[5..], &[0, 0, 0]);
        }
    }

    #[test]
    fn white_is_written_only_when_mapped() {
        let layout = FixtureLayout {
            white: Some(7),
            ..FixtureLayout::default()
        };
        layout.validate().unwrap();
        let frame = FrameBuilder::new(layout, 1).build(&[lit(0)]).unwrap();
        assert_eq!(frame.data, vec![255, 10, 20, 30, STROBE_ON, 0, 0, 40]);

        let clash = FixtureLayout {
            white: Some(4),
            ..FixtureLayout::default()
        };
        let err = clash.validate().unwrap_err().to_string();
        assert!(err.contains("white") && err.contains("strobe"));
    }

    #[test]
    fn custom_layout_is_respected() {
        let layout = FixtureLayout {
            channels_per_fixture: 6,
            dimmer: 5,
            red: 0,
            green: 1,
            blue: 2,
            strobe: 4,
            white: Some(3),
        };
        layout.validate().unwrap();
        let frame = FrameBuilder::new(layout, 2).build(&[lit(0)]).unwrap();
        assert_eq!(frame.data, vec![10, 20, 30, 40, STROBE_ON, 255]);
    }

    #[test]
    fn rejects_empty_and_oversized_light_sets() {
        let builder = FrameBuilder::new(FixtureLayout::default(), 1);
        assert!(builder.build(&[]).is_err());
        let lights: Vec<_> = (0..MAX_LIGHTS + 1).map(lit).collect();
        assert!(builder.build(&lights).is_err());
    }

    #[test]
    fn layout_validation_catches_bad_offsets() {
        let mut layout = FixtureLayout::default();
        layout.strobe = 8;
        assert!(layout.validate().is_err());

        let mut layout = FixtureLayout::default();
        layout.blue = layout.green;
        let err = layout.validate().unwrap_err().to_string();
        assert!(err.contains("blue") && err.contains("green"));
    }

    #[test]
    fn universe_padding_and_blackout() {
        let builder = FrameBuilder::new(FixtureLayout::default(), 1);
        let frame = builder.build(&[lit(0)]).unwrap();
        let universe = frame.to_universe();
        assert_eq!(universe[0], 255);
        assert!(universe[8..].iter().all(|b| *b == 0));

        let dark = builder.blackout(3);
        assert_eq!(dark.len(), 24);
        assert!(dark.is_dark());
    }
}
