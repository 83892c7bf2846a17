use std::{fmt, str::FromStr};

use crate::LightingError;

/// Declares a selectable option set with stable names.
///
/// Names are matched case-insensitively, with `_` and spaces accepted in
/// place of `-`. Serialisation uses the name.
macro_rules! choice_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $control:literal {
            $($(#[$vmeta:meta])* $variant:ident => $label:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn name(self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }

            pub fn from_name(value: &str) -> Option<Self> {
                let wanted = value.trim().to_ascii_lowercase().replace(['_', ' '], "-");
                Self::ALL.iter().copied().find(|choice| choice.name() == wanted)
            }

            pub(crate) fn index(self) -> u8 {
                Self::ALL
                    .iter()
                    .position(|choice| *choice == self)
                    .unwrap_or(0) as u8
            }

            pub(crate) fn from_index(index: u8) -> Self {
                Self::ALL
                    .get(usize::from(index))
                    .copied()
                    .unwrap_or(Self::ALL[0])
            }

            /// Comma separated list of every name, for help output.
            pub fn names() -> String {
                Self::ALL
                    .iter()
                    .map(|choice| choice.name())
                    .collect::<Vec<_>>()
                    .join(", ")
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        }

        impl FromStr for $name {
            type Err = LightingError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                Self::from_name(value).ok_or_else(|| {
                    LightingError::invalid($control, format!("expected one of: {}", Self::names()))
                })
            }
        }

        impl TryFrom<String> for $name {
            type Error = LightingError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.name().to_string()
            }
        }
    };
}

choice_enum! {
    /// Which program family drives the lights.
    Mode, "mode" {
        Simple => "simple",
        Advanced => "advanced",
    }
}

choice_enum! {
    /// The fixed set of self-contained simple programs.
    ProgramId, "program" {
        BounceSame => "bounce-same",
        BounceDifferent => "bounce-different",
        BounceDiscrete => "bounce-discrete",
        SwellSame => "swell-same",
        SwellDifferent => "swell-different",
        Disco => "disco",
        Psych => "psych",
        Strobe => "strobe",
        Alternating => "alternating",
        Pulse => "pulse",
        Spectrum => "spectrum",
        VuMeter => "vu-meter",
        Chase => "chase",
        CenterBurst => "center-burst",
        Ripple => "ripple",
    }
}

choice_enum! {
    /// Spatial propagation rules of the advanced family.
    PatternId, "pattern" {
        Sync => "sync",
        Wave => "wave",
        Center => "center",
        Alternate => "alternate",
        Mirror => "mirror",
        Swell => "swell",
    }
}

choice_enum! {
    /// Overlay applied on top of an advanced pattern.
    Effect, "effect" {
        None => "none",
        Breathe => "breathe",
        Sparkle => "sparkle",
        Chase => "chase",
        Pulse => "pulse",
        Sweep => "sweep",
        Firefly => "firefly",
    }
}

choice_enum! {
    /// Colour palette selection.
    Theme, "theme" {
        Classic => "default",
        Sunset => "sunset",
        Ocean => "ocean",
        Fire => "fire",
        Forest => "forest",
        Galaxy => "galaxy",
        Monochrome => "monochrome",
        Warm => "warm",
        Cool => "cool",
    }
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Simple
    }
}

impl Default for ProgramId {
    fn default() -> Self {
        ProgramId::BounceSame
    }
}

impl Default for PatternId {
    fn default() -> Self {
        PatternId::Wave
    }
}

impl Default for Effect {
    fn default() -> Self {
        Effect::None
    }
}

impl Default for Theme {
    fn default() -> Self {
        Theme::Classic
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_forgiving() {
        assert_eq!(ProgramId::from_name("VU_Meter"), Some(ProgramId::VuMeter));
        assert_eq!(ProgramId::from_name("center burst"), Some(ProgramId::CenterBurst));
        assert_eq!(Theme::from_name("default"), Some(Theme::Classic));
        assert_eq!(Effect::from_name("lasers"), None);
    }

    #[test]
    fn there_are_fifteen_programs() {
        assert_eq!(ProgramId::ALL.len(), 15);
        for program in ProgramId::ALL {
            assert_eq!(ProgramId::from_index(program.index()), *program);
        }
    }

    #[test]
    fn parse_errors_name_the_control() {
        let err = "plaid".parse::<Theme>().unwrap_err();
        assert!(matches!(err, LightingError::InvalidParameter { ref name, .. } if name == "theme"));
    }

    #[test]
    fn serialises_by_name() {
        let json = serde_json::to_string(&PatternId::Mirror).unwrap();
        assert_eq!(json, "\"mirror\"");
        let theme: Theme = serde_json::from_str("\"ocean\"").unwrap();
        assert_eq!(theme, Theme::Ocean);
    }
}
