//! Error types for session steps.

use thiserror::Error;

use crate::config::ConfigError;
use crate::image::FileError;
use crate::protocol::frame::FramingError;
use crate::session::{SessionState, Step};
use crate::transport::TransportError;

/// Result type for hbl-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for bootloader session operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Timeout, disconnect, or I/O failure on the link.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Malformed HID frame.
    #[error("Framing error: {0}")]
    Framing(#[from] FramingError),

    /// Unexpected response opcode or length.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Firmware file could not be used.
    #[error("File error: {0}")]
    File(#[from] FileError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The abort flag was observed.
    #[error("Aborted by user")]
    Aborted,

    /// Device contents do not match the image.
    #[error(
        "Verify mismatch at 0x{address:08X} ({length} bytes): expected 0x{expected:X}, {}",
        describe_actual(.actual)
    )]
    VerifyMismatch {
        address: u32,
        length: u32,
        expected: u32,
        /// Checksum reported by the device, when it reports one.
        actual: Option<u32>,
    },

    /// Programming was requested before a firmware file was loaded.
    #[error("No firmware image loaded")]
    NoImage,

    /// A step was started out of order or after a terminal state.
    #[error("Cannot {step} while {state}")]
    InvalidState { state: SessionState, step: Step },
}

fn describe_actual(actual: &Option<u32>) -> String {
    match actual {
        Some(crc) => format!("device reported 0x{crc:X}"),
        None => "device rejected the image".to_string(),
    }
}

impl Error {
    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Whether this is a content mismatch rather than a link problem.
    pub fn is_verify_mismatch(&self) -> bool {
        matches!(self, Self::VerifyMismatch { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_mismatch_message() {
        let err = Error::VerifyMismatch {
            address: 0x9D00_0000,
            length: 16,
            expected: 0x1234,
            actual: Some(0xBEEF),
        };
        assert_eq!(
            err.to_string(),
            "Verify mismatch at 0x9D000000 (16 bytes): expected 0x1234, device reported 0xBEEF"
        );
        assert!(err.is_verify_mismatch());
        assert!(!Error::Aborted.is_verify_mismatch());
    }
}
