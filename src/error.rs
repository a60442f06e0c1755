//! Error taxonomy for the payout daemon, per the transport / framing /
//! encryption / protocol / semantic / bus-layer split described in the
//! design doc.

use thiserror::Error;

/// A protocol response code, as returned in the first byte of every SSP
/// response payload. Mirrors the teacher's `ssp::ResponseStatus` surface,
/// narrowed to the codes this daemon actually has to reason about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    Ok,
    UnknownCommand,
    IncorrectParameters,
    InvalidParameter,
    CommandNotProcessed,
    SoftwareError,
    ChecksumError,
    Failure,
    HeaderFailure,
    KeyNotSet,
}

impl ResponseCode {
    pub fn from_byte(b: u8) -> Option<Self> {
        Some(match b {
            0xF0 => Self::Ok,
            0xF2 => Self::UnknownCommand,
            0xF3 => Self::IncorrectParameters,
            0xF4 => Self::InvalidParameter,
            0xF5 => Self::CommandNotProcessed,
            0xF6 => Self::SoftwareError,
            0xF8 => Self::ChecksumError,
            0xF9 => Self::Failure,
            0xFA => Self::HeaderFailure,
            0xFC => Self::KeyNotSet,
            _ => return None,
        })
    }

    pub fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Human-readable string for the `sspError` field of a response
    /// envelope, matching `replyWithSspResponse` in the original daemon.
    pub fn as_error_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::UnknownCommand => "unknown command",
            Self::IncorrectParameters => "incorrect parameters",
            Self::InvalidParameter => "invalid parameter",
            Self::CommandNotProcessed => "command not processed",
            Self::SoftwareError => "software error",
            Self::ChecksumError => "checksum error",
            Self::Failure => "failure",
            Self::HeaderFailure => "header failure",
            Self::KeyNotSet => "key not set",
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serial port error: {0}")]
    SerialPort(#[from] serialport::Error),

    #[error("{0} is not a character device")]
    NotADevice(String),

    #[error("timed out waiting for response")]
    Timeout,

    #[error("crc mismatch: expected {expected:#06x}, got {actual:#06x}")]
    CrcMismatch { expected: u16, actual: u16 },

    #[error("truncated frame: expected at least {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("unexpected address/sequence in response: expected {expected:#04x}, got {actual:#04x}")]
    UnexpectedAddress { expected: u8, actual: u8 },

    #[error("encryption key not set for this peer and renegotiation failed")]
    KeyNotSet,

    #[error("encrypted response counter mismatch: expected {expected}, got {actual}")]
    CounterMismatch { expected: u32, actual: u32 },

    #[error("encryption error: {0}")]
    Crypto(String),

    #[error("ssp response {0:?}")]
    Protocol(ResponseCode),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("hardware unavailable")]
    HardwareUnavailable,
}

pub type Result<T> = std::result::Result<T, Error>;
