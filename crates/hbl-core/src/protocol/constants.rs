//! Wire constants for the HID and UART bootloaders.

use std::time::Duration;

// HID frame markers
pub const SOH: u8 = 0x01;
pub const EOT: u8 = 0x04;
pub const DLE: u8 = 0x10;

/// HID report size in bytes (both directions).
pub const HID_REPORT_SIZE: usize = 64;

/// Largest Intel HEX record body: count + address + type + 255 data + checksum.
pub const MAX_RECORD_LEN: usize = 1 + 2 + 1 + 255 + 1;

/// Worst-case encoded frame: every byte escaped, plus markers.
pub const MAX_FRAME_LEN: usize = 2 + 2 * (1 + MAX_RECORD_LEN + 2);

// Default HID identifiers
pub const DEFAULT_VENDOR_ID: u16 = 0x4d63;
pub const DEFAULT_PRODUCT_ID: u16 = 0x1234;

// UART
pub const BTL_GUARD: u32 = 0x5048434D; // 'MCHP'
pub const DEFAULT_BAUD_RATE: u32 = 115200;
pub const DEFAULT_APP_START: u32 = 0x0040_2000;
pub const DEFAULT_ERASE_BLOCK_SIZE: u32 = 8192;

// Timeouts
pub const RESPONSE_TIMEOUT: Duration = Duration::from_millis(1000);
pub const ERASE_TIMEOUT: Duration = Duration::from_millis(30_000);
pub const FRAME_TIMEOUT: Duration = Duration::from_millis(500);

/// HID bootloader opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HidCommand {
    ReadBootInfo = 1,
    EraseFlash = 2,
    ProgramFlash = 3,
    ReadCrc = 4,
    JumpToApp = 5,
}

impl HidCommand {
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// UART bootloader commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum UartCommand {
    Unlock = 0xa0,
    Data = 0xa1,
    Verify = 0xa2,
    Reset = 0xa3,
}

impl UartCommand {
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Single-byte UART responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UartResponse {
    Ok,
    Error,
    Invalid,
    CrcOk,
    CrcFail,
    Unknown(u8),
}

impl From<u8> for UartResponse {
    fn from(value: u8) -> Self {
        match value {
            0x50 => Self::Ok,
            0x51 => Self::Error,
            0x52 => Self::Invalid,
            0x53 => Self::CrcOk,
            0x54 => Self::CrcFail,
            other => Self::Unknown(other),
        }
    }
}

impl UartResponse {
    pub fn code(self) -> u8 {
        match self {
            Self::Ok => 0x50,
            Self::Error => 0x51,
            Self::Invalid => 0x52,
            Self::CrcOk => 0x53,
            Self::CrcFail => 0x54,
            Self::Unknown(b) => b,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_spells_mchp() {
        assert_eq!(&BTL_GUARD.to_le_bytes(), b"MCHP");
    }

    #[test]
    fn test_uart_response_codes() {
        for code in 0x50..=0x54u8 {
            assert_eq!(UartResponse::from(code).code(), code);
        }
        assert_eq!(UartResponse::from(0x99), UartResponse::Unknown(0x99));
    }
}
