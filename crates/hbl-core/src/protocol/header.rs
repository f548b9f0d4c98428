//! UART packet header.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;
use thiserror::Error;

use super::constants::{BTL_GUARD, UartCommand};

#[derive(Error, Debug)]
pub enum HeaderError {
    #[error("Buffer too small: expected {expected}, got {actual}")]
    BufferTooSmall { expected: usize, actual: usize },
    #[error("Invalid guard: expected 0x{expected:08X}, got 0x{actual:08X}")]
    InvalidGuard { expected: u32, actual: u32 },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// UART packet header (9 bytes, packed, little-endian).
///
/// Sent on its own, ahead of the payload it describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxHeader {
    pub guard: u32,
    /// Payload length in bytes.
    pub size: u32,
    pub command: u8,
}

impl TxHeader {
    pub const SIZE: usize = 9;

    pub fn new(command: UartCommand, size: u32) -> Self {
        Self {
            guard: BTL_GUARD,
            size,
            command: command.code(),
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[..4].copy_from_slice(&self.guard.to_le_bytes());
        buf[4..8].copy_from_slice(&self.size.to_le_bytes());
        buf[8] = self.command;
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, HeaderError> {
        if data.len() < Self::SIZE {
            return Err(HeaderError::BufferTooSmall {
                expected: Self::SIZE,
                actual: data.len(),
            });
        }
        let mut cursor = Cursor::new(data);
        let guard = cursor.read_u32::<LittleEndian>()?;
        if guard != BTL_GUARD {
            return Err(HeaderError::InvalidGuard {
                expected: BTL_GUARD,
                actual: guard,
            });
        }
        Ok(Self {
            guard,
            size: cursor.read_u32::<LittleEndian>()?,
            command: cursor.read_u8()?,
        })
    }
}
