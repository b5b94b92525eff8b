use thiserror::Error;

/// Errors returned by the replay engine's setup and control surface.
///
/// Transient per-packet send failures are *not* represented here — they are
/// folded into `Stats::failed` instead (see `crate::types::Stats`), matching
/// the taxonomy that distinguishes "this call failed" from "one packet
/// failed to go out".
#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("invalid state: {0}")]
    State(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("replay already running")]
    AlreadyRunning,
}

impl ReplayError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        ReplayError::Configuration(msg.into())
    }

    pub fn io(msg: impl Into<String>) -> Self {
        ReplayError::Io(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        ReplayError::State(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        ReplayError::InvalidArgument(msg.into())
    }
}

/// A tagged error/warning with call-site context, the Rust equivalent of
/// the original API's fixed `errstr`/`warnstr` buffers carrying
/// `From file:func() line N`.
#[derive(Debug, Clone)]
pub struct TaggedMessage {
    pub file: &'static str,
    pub line: u32,
    pub message: String,
}

impl std::fmt::Display for TaggedMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "from {}:{}: {}", self.file, self.line, self.message)
    }
}

/// Captures `file!()`/`line!()` at the call site, the way
/// `__tcpreplay_seterr` captured `__FILE__`/`__LINE__` via its macro wrapper.
#[macro_export]
macro_rules! tagged_message {
    ($($arg:tt)*) => {
        $crate::error::TaggedMessage {
            file: file!(),
            line: line!(),
            message: format!($($arg)*),
        }
    };
}
