use thiserror::Error;

use crate::protocol::{ResultCode, MAX_LINE_SIZE};

/// Errors surfaced by the stratum codec and server.
#[derive(Error, Debug)]
pub enum StratumError {
    #[error("line exceeds {} bytes", MAX_LINE_SIZE)]
    LineTooLong,

    #[error("message is not valid UTF-8")]
    BadEncoding,

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("unsupported stratum method: {0}")]
    UnsupportedMethod(String),

    #[error("invalid hex field `{field}`")]
    InvalidHex { field: &'static str },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StratumError {
    /// Wire code reported back to the peer for this error.
    pub fn code(&self) -> ResultCode {
        ResultCode::BadProtocol
    }

    /// Whether the stream can keep going after this error. Oversized
    /// lines poison the framing and terminate the connection; everything
    /// else is skipped.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, StratumError::LineTooLong | StratumError::Io(_))
    }
}

impl From<serde_json::Error> for StratumError {
    fn from(err: serde_json::Error) -> Self {
        StratumError::Malformed(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StratumError>;
