//! Error taxonomy for searches, the harness and index maintenance.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LsmError {
    /// The caller drove a cursor out of protocol: `advance` with nothing
    /// left, reading the current tuple with none pending, or using a cursor
    /// that is not open.
    #[error("invalid cursor state: {0}")]
    State(String),

    /// A fault raised by an underlying component (I/O, corruption). Never
    /// retried here; the caller decides.
    #[error(transparent)]
    Storage(#[from] anyhow::Error),

    /// Lifecycle misuse: double close, reset while a harness reference is
    /// held, unknown search token, sources out of recency order, or a
    /// component stream that is not strictly ascending.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Rejected input (e.g. a tuple with fewer fields than the key).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl LsmError {
    pub(crate) fn state(msg: impl Into<String>) -> Self {
        LsmError::State(msg.into())
    }

    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        LsmError::ProtocolViolation(msg.into())
    }

    #[must_use]
    pub fn is_storage(&self) -> bool {
        matches!(self, LsmError::Storage(_))
    }

    #[must_use]
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, LsmError::ProtocolViolation(_))
    }

    #[must_use]
    pub fn is_state(&self) -> bool {
        matches!(self, LsmError::State(_))
    }

    /// Converts into an `anyhow::Error` without re-wrapping storage faults.
    pub fn into_anyhow(self) -> anyhow::Error {
        match self {
            LsmError::Storage(e) => e,
            other => anyhow::Error::new(other),
        }
    }
}

impl From<std::io::Error> for LsmError {
    fn from(e: std::io::Error) -> Self {
        LsmError::Storage(e.into())
    }
}

/// Result type for index, harness and cursor operations.
pub type LsmResult<T> = Result<T, LsmError>;
