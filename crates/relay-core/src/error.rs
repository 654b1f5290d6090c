use std::fmt;

/// Errors raised by the pure/transform pieces of the core: routing, masking,
/// session bookkeeping, and id sanitization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    UnknownModel(String),
    InvalidInput(String),
    Unauthorized,
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::UnknownModel(m) => write!(f, "unknown_model: {m}"),
            CoreError::InvalidInput(m) => write!(f, "invalid_input: {m}"),
            CoreError::Unauthorized => write!(f, "unauthorized"),
        }
    }
}

impl std::error::Error for CoreError {}

/// Transport/upstream error kinds surfaced by C3 and recorded on a metric row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamErrorKind {
    ReadError,
    ConnectError,
    TimeoutError,
    DecodeError,
    Unknown,
}

impl StreamErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamErrorKind::ReadError => "read_error",
            StreamErrorKind::ConnectError => "connect_error",
            StreamErrorKind::TimeoutError => "timeout_error",
            StreamErrorKind::DecodeError => "decode_error",
            StreamErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for StreamErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
