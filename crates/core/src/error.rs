/// Result alias that carries the custom [`LightingError`] type.
pub type Result<T> = std::result::Result<T, LightingError>;

/// Common error type for the core crate.
///
/// Variants fall into three groups. Transient failures (`DeviceLost`,
/// `Transmit`) are logged and replaced with silence or a dropped frame.
/// Configuration failures (`Config`, `InvalidParameter`, `UnknownParameter`)
/// are rejected at the boundary that produced them. Fatal failures
/// (`NoAudioSubsystem`, `DaemonUnreachable`) are reported to the operator
/// while the render loop keeps running.
#[derive(Debug, thiserror::Error)]
pub enum LightingError {
    /// Free-form error used where no more specific variant applies.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// The audio input device disappeared or its stream failed.
    #[error("audio device lost: {0}")]
    DeviceLost(String),
    /// A frame could not be delivered to the lighting daemon.
    #[error("frame transmit failed: {0}")]
    Transmit(String),
    /// The configuration failed validation.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// A control write carried a value outside the control's range.
    #[error("invalid value for `{name}`: {reason}")]
    InvalidParameter { name: String, reason: String },
    /// A control name that the parameter store does not know.
    #[error("unknown control `{0}`")]
    UnknownParameter(String),
    /// No audio host or input device could be opened at all.
    #[error("no audio subsystem available: {0}")]
    NoAudioSubsystem(String),
    /// The lighting daemon stayed unreachable after repeated retries.
    #[error("lighting daemon unreachable after {attempts} attempts")]
    DaemonUnreachable { attempts: u32 },
    #[error("{0}")]
    Toml(#[from] toml::de::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

impl LightingError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    /// Creates an [`LightingError::InvalidParameter`] for the named control.
    pub fn invalid(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Whether the pipeline should substitute silence or drop a frame and
    /// carry on at the next cadence tick.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::DeviceLost(_) | Self::Transmit(_) | Self::Io(_) | Self::Message(_)
        )
    }
}

impl From<&str> for LightingError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for LightingError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_transient_failures_as_recoverable() {
        assert!(LightingError::DeviceLost("unplugged".into()).is_recoverable());
        assert!(LightingError::Transmit("refused".into()).is_recoverable());
        assert!(!LightingError::Config("bad".into()).is_recoverable());
        assert!(!LightingError::DaemonUnreachable { attempts: 3 }.is_recoverable());
    }

    #[test]
    fn formats_invalid_parameter() {
        let err = LightingError::invalid("brightness", "must be within 0..=100");
        assert_eq!(
            err.to_string(),
            "invalid value for `brightness`: must be within 0..=100"
        );
    }
}
