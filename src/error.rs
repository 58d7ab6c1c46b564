//! # M-Bus Error Handling
//!
//! This module defines the MBusError enum, which represents the different error
//! types that can occur while talking to a meter, decoding its frames and
//! building reading snapshots.
//!
//! Every layer below the coordinator returns these errors unchanged; the
//! coordinator is the only place that decides what a failure means for the
//! next poll. [`ErrorKind`] is the `Copy` classifier it matches on.

use std::time::Duration;
use thiserror::Error;

/// Represents the different error types that can occur in the crate.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MBusError {
    /// The configured device path does not exist.
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// The device exists but the process may not open it.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Indicates an error related to the serial port communication.
    #[error("Serial port error: {0}")]
    SerialPortError(String),

    /// An operation needed an open line but the transport is closed.
    #[error("Serial line is not open")]
    NotConnected,

    /// No response frame arrived within the read window.
    #[error("No response within {0:?}")]
    Timeout(Duration),

    /// Fewer bytes than the smallest long frame.
    #[error("Frame too short: {actual} bytes, need at least {minimum}")]
    FrameTooShort { actual: usize, minimum: usize },

    /// One of the two `0x68` start markers is missing.
    #[error("Invalid start byte 0x{found:02X} at offset {offset}")]
    InvalidStartByte { offset: usize, found: u8 },

    /// The trailing `0x16` stop marker is missing.
    #[error("Invalid stop byte 0x{0:02X}")]
    InvalidStopByte(u8),

    /// The length field disagrees with itself or with the bytes received.
    #[error("Length mismatch: declared {declared}, actual {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    /// Indicates a checksum mismatch.
    #[error("Invalid checksum: expected 0x{expected:02X}, calculated 0x{calculated:02X}")]
    ChecksumMismatch { expected: u8, calculated: u8 },

    /// A record boundary could not be determined.
    #[error("Malformed record at offset {offset}: {reason}")]
    MalformedRecord { offset: usize, reason: String },

    /// A BCD digit outside 0-9.
    #[error("Invalid BCD byte 0x{0:02X}")]
    InvalidBcd(u8),

    /// A mandatory reading is missing from an otherwise valid frame.
    #[error("Incomplete snapshot: missing {0}")]
    IncompleteSnapshot(String),

    /// Indicates an invalid hexadecimal string was provided.
    #[error("Invalid hexadecimal string")]
    InvalidHexString,

    /// Configuration rejected by validation.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The poll was abandoned before it completed.
    #[error("Poll cancelled")]
    Cancelled,
}

/// Field-less classification of [`MBusError`], used for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    DeviceNotFound,
    PermissionDenied,
    SerialPort,
    NotConnected,
    Timeout,
    FrameTooShort,
    InvalidStartByte,
    InvalidStopByte,
    LengthMismatch,
    ChecksumMismatch,
    MalformedRecord,
    InvalidBcd,
    IncompleteSnapshot,
    InvalidHexString,
    InvalidConfig,
    Cancelled,
}

impl ErrorKind {
    /// True when retrying cannot help until an operator changes something
    /// (plugs the optical head in, fixes the path or the device permissions).
    pub fn is_actionable(self) -> bool {
        matches!(self, ErrorKind::DeviceNotFound | ErrorKind::PermissionDenied)
    }

    /// True for errors raised by the frame codec.
    pub fn is_frame_error(self) -> bool {
        matches!(
            self,
            ErrorKind::FrameTooShort
                | ErrorKind::InvalidStartByte
                | ErrorKind::InvalidStopByte
                | ErrorKind::LengthMismatch
                | ErrorKind::ChecksumMismatch
        )
    }
}

impl MBusError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MBusError::DeviceNotFound(_) => ErrorKind::DeviceNotFound,
            MBusError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            MBusError::SerialPortError(_) => ErrorKind::SerialPort,
            MBusError::NotConnected => ErrorKind::NotConnected,
            MBusError::Timeout(_) => ErrorKind::Timeout,
            MBusError::FrameTooShort { .. } => ErrorKind::FrameTooShort,
            MBusError::InvalidStartByte { .. } => ErrorKind::InvalidStartByte,
            MBusError::InvalidStopByte(_) => ErrorKind::InvalidStopByte,
            MBusError::LengthMismatch { .. } => ErrorKind::LengthMismatch,
            MBusError::ChecksumMismatch { .. } => ErrorKind::ChecksumMismatch,
            MBusError::MalformedRecord { .. } => ErrorKind::MalformedRecord,
            MBusError::InvalidBcd(_) => ErrorKind::InvalidBcd,
            MBusError::IncompleteSnapshot(_) => ErrorKind::IncompleteSnapshot,
            MBusError::InvalidHexString => ErrorKind::InvalidHexString,
            MBusError::InvalidConfig(_) => ErrorKind::InvalidConfig,
            MBusError::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub(crate) fn malformed(offset: usize, reason: impl Into<String>) -> Self {
        MBusError::MalformedRecord {
            offset,
            reason: reason.into(),
        }
    }
}

impl From<tokio_serial::Error> for MBusError {
    fn from(e: tokio_serial::Error) -> Self {
        MBusError::SerialPortError(e.to_string())
    }
}

impl From<std::io::Error> for MBusError {
    fn from(e: std::io::Error) -> Self {
        MBusError::SerialPortError(e.to_string())
    }
}
