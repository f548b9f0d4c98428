//! Checksums shared by both wire formats.
//!
//! - CRC-16 (CCITT, polynomial 0x1021) guards every HID frame and every
//!   flash region. It is computed with the same 16-entry nibble table the
//!   bootloader firmware uses, so the two sides agree bit for bit.
//! - CRC-32 (reflected 0xEDB88320, init 0xFFFFFFFF, no final XOR) covers the
//!   whole padded image on the UART link.

use crc::{CRC_32_JAMCRC, Crc};

/// Nibble lookup table for CRC-16/CCITT.
pub const CRC16_TABLE: [u16; 16] = [
    0x0000, 0x1021, 0x2042, 0x3063, 0x4084, 0x50a5, 0x60c6, 0x70e7, 0x8108, 0x9129, 0xa14a, 0xb16b,
    0xc18c, 0xd1ad, 0xe1ce, 0xf1ef,
];

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_JAMCRC);

/// CRC-16 of `data`, starting from 0.
pub fn crc16(data: &[u8]) -> u16 {
    crc16_update(0, data)
}

/// Continue a running CRC-16 over more bytes.
///
/// `crc16_update(crc16(a), b) == crc16(a ++ b)`.
pub fn crc16_update(mut crc: u16, data: &[u8]) -> u16 {
    for &byte in data {
        let i = (crc >> 12) ^ u16::from(byte >> 4);
        crc = CRC16_TABLE[usize::from(i & 0x0F)] ^ (crc << 4);
        let i = (crc >> 12) ^ u16::from(byte);
        crc = CRC16_TABLE[usize::from(i & 0x0F)] ^ (crc << 4);
    }
    crc
}

/// CRC-32 as checked by the UART bootloader.
pub fn crc32(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHECK: &[u8] = b"123456789";

    #[test]
    fn test_crc16_check_value() {
        assert_eq!(crc16(CHECK), 0x31C3);
    }

    #[test]
    fn test_crc16_empty() {
        assert_eq!(crc16(&[]), 0);
    }

    #[test]
    fn test_crc16_matches_xmodem() {
        let xmodem = Crc::<u16>::new(&crc::CRC_16_XMODEM);
        let data: Vec<u8> = (0..=255u8).collect();
        assert_eq!(crc16(&data), xmodem.checksum(&data));
        assert_eq!(crc16(&[0x01, 0x04, 0x10]), xmodem.checksum(&[0x01, 0x04, 0x10]));
    }

    #[test]
    fn test_crc16_update_chains() {
        let (a, b) = CHECK.split_at(4);
        assert_eq!(crc16_update(crc16(a), b), crc16(CHECK));
    }

    #[test]
    fn test_crc32_check_value() {
        assert_eq!(crc32(CHECK), 0x340B_C6D9);
    }

    #[test]
    fn test_crc32_empty() {
        assert_eq!(crc32(&[]), 0xFFFF_FFFF);
    }

    #[test]
    fn test_crc32_erased_block() {
        // Reflected register with no XOR-out is the complement of the zlib CRC.
        let zlib = Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);
        let block = vec![0xFFu8; 8192];
        assert_eq!(crc32(&block), !zlib.checksum(&block));
    }
}
