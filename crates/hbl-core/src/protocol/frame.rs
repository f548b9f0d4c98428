//! HID frame codec.
//!
//! ```text
//! +-----+---------+-----------------+---------+-----+
//! | SOH | command |     payload     | CRC16LE | EOT |
//! +-----+---------+-----------------+---------+-----+
//! ```
//!
//! Every byte between the markers that equals SOH, EOT or DLE is preceded
//! by a DLE. The CRC covers `command ++ payload` before stuffing.

use thiserror::Error;

use super::constants::{DLE, EOT, MAX_FRAME_LEN, SOH};
use crate::checksum::crc16;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FramingError {
    #[error("Frame does not start with SOH")]
    MissingStart,
    #[error("Frame has no terminating EOT")]
    MissingEnd,
    #[error("Frame body too short: {len} bytes")]
    TooShort { len: usize },
    #[error("Frame CRC mismatch: expected 0x{expected:04X}, got 0x{actual:04X}")]
    CrcMismatch { expected: u16, actual: u16 },
}

/// Frame encoder/decoder owning reusable scratch buffers.
///
/// One instance belongs to one session; buffers are never shared.
#[derive(Debug)]
pub struct FrameCodec {
    tx: Vec<u8>,
    rx: Vec<u8>,
    body: Vec<u8>,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    pub fn new() -> Self {
        Self {
            tx: Vec::with_capacity(MAX_FRAME_LEN),
            rx: Vec::with_capacity(MAX_FRAME_LEN),
            body: Vec::with_capacity(MAX_FRAME_LEN),
        }
    }

    /// Encode `command ++ payload` into the transmit buffer.
    pub fn encode(&mut self, command: u8, payload: &[u8]) -> &[u8] {
        self.body.clear();
        self.body.push(command);
        self.body.extend_from_slice(payload);
        let crc = crc16(&self.body);
        self.body.extend_from_slice(&crc.to_le_bytes());

        self.tx.clear();
        self.tx.push(SOH);
        for &b in &self.body {
            if is_reserved(b) {
                self.tx.push(DLE);
            }
            self.tx.push(b);
        }
        self.tx.push(EOT);
        &self.tx
    }

    /// Decode a received frame; returns the body without its CRC.
    pub fn decode(&mut self, raw: &[u8]) -> Result<&[u8], FramingError> {
        unstuff(raw, &mut self.rx)?;
        let len = check_crc(&self.rx)?;
        Ok(&self.rx[..len])
    }
}

/// Encode a frame into a fresh buffer.
pub fn encode_frame(command: u8, payload: &[u8]) -> Vec<u8> {
    FrameCodec::new().encode(command, payload).to_vec()
}

/// Decode a frame into a fresh buffer.
pub fn decode_frame(raw: &[u8]) -> Result<Vec<u8>, FramingError> {
    let mut body = Vec::with_capacity(raw.len());
    unstuff(raw, &mut body)?;
    let len = check_crc(&body)?;
    body.truncate(len);
    Ok(body)
}

/// Whether `raw` already holds an unescaped EOT after the leading SOH.
pub fn is_complete(raw: &[u8]) -> bool {
    let mut iter = raw.iter().skip(1);
    while let Some(&b) = iter.next() {
        match b {
            EOT => return true,
            DLE => {
                iter.next();
            }
            _ => {}
        }
    }
    false
}

fn is_reserved(b: u8) -> bool {
    b == SOH || b == EOT || b == DLE
}

fn unstuff(raw: &[u8], out: &mut Vec<u8>) -> Result<(), FramingError> {
    out.clear();
    if raw.first() != Some(&SOH) {
        return Err(FramingError::MissingStart);
    }
    let mut iter = raw[1..].iter();
    while let Some(&b) = iter.next() {
        match b {
            EOT => return Ok(()),
            DLE => match iter.next() {
                Some(&escaped) => out.push(escaped),
                None => break,
            },
            _ => out.push(b),
        }
    }
    Err(FramingError::MissingEnd)
}

fn check_crc(body: &[u8]) -> Result<usize, FramingError> {
    if body.len() < 2 {
        return Err(FramingError::TooShort { len: body.len() });
    }
    let len = body.len() - 2;
    let expected = u16::from_le_bytes([body[len], body[len + 1]]);
    let actual = crc16(&body[..len]);
    if expected != actual {
        return Err(FramingError::CrcMismatch { expected, actual });
    }
    Ok(len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_read_boot_info() {
        // crc16([0x01]) = 0x1021 -> low byte 0x21, high byte 0x10 (escaped)
        let frame = encode_frame(0x01, &[]);
        assert_eq!(frame, vec![SOH, DLE, 0x01, 0x21, DLE, 0x10, EOT]);
    }

    fn assert_roundtrip(command: u8, payload: &[u8]) {
        let frame = encode_frame(command, payload);

        // Only the final EOT terminates the frame.
        assert!(is_complete(&frame));
        assert!(!is_complete(&frame[..frame.len() - 1]));
        let decoded = decode_frame(&frame).unwrap();
        assert_eq!(decoded[0], command);
        assert_eq!(&decoded[1..], payload);
    }

    #[test]
    fn test_roundtrip_with_reserved_bytes() {
        assert_roundtrip(0x03, &[SOH, EOT, DLE, 0x00, 0xFF, DLE, DLE, EOT, 0x42]);
    }

    #[test]
    fn test_roundtrip_every_byte_value() {
        for b in 0..=u8::MAX {
            assert_roundtrip(b, &[]);
            assert_roundtrip(0x03, &[b]);
            assert_roundtrip(0x03, &[b, b]);
        }
        let all: Vec<u8> = (0..=u8::MAX).collect();
        assert_roundtrip(0x03, &all);
        let reversed: Vec<u8> = all.iter().rev().copied().collect();
        assert_roundtrip(0x04, &reversed);
    }

    #[test]
    fn test_roundtrip_only_reserved_bytes() {
        for b in [SOH, EOT, DLE] {
            for len in [1, 2, 3, 8, 63, 64, 200] {
                let payload = vec![b; len];
                assert_roundtrip(0x03, &payload);
                let frame = encode_frame(0x03, &payload);
                let stuffed = frame.iter().filter(|&&x| x == DLE).count();
                assert!(stuffed >= len);
            }
        }
        let mixed: Vec<u8> = [SOH, EOT, DLE].iter().cycle().take(99).copied().collect();
        assert_roundtrip(0x03, &mixed);
    }

    #[test]
    fn test_codec_reuses_buffers() {
        let mut codec = FrameCodec::new();
        let first = codec.encode(0x02, &[]).to_vec();
        let second = codec.encode(0x05, &[0x10]).to_vec();
        assert_eq!(codec.decode(&first).unwrap(), &[0x02]);
        assert_eq!(codec.decode(&second).unwrap(), &[0x05, 0x10]);
    }

    #[test]
    fn test_decode_ignores_trailing_padding() {
        let mut report = encode_frame(0x02, &[]);
        report.resize(64, 0);
        assert_eq!(decode_frame(&report).unwrap(), vec![0x02]);
    }

    #[test]
    fn test_decode_missing_start() {
        assert_eq!(decode_frame(&[0x02, 0x03, EOT]), Err(FramingError::MissingStart));
        assert_eq!(decode_frame(&[]), Err(FramingError::MissingStart));
    }

    #[test]
    fn test_decode_missing_end() {
        let mut frame = encode_frame(0x02, &[0xAA]);
        frame.pop();
        assert_eq!(decode_frame(&frame), Err(FramingError::MissingEnd));
        assert!(!is_complete(&frame));

        // Escaped EOT is data, not a terminator.
        assert_eq!(decode_frame(&[SOH, 0x02, DLE, EOT]), Err(FramingError::MissingEnd));
        assert!(!is_complete(&[SOH, 0x02, DLE, EOT]));
    }

    #[test]
    fn test_decode_too_short() {
        assert_eq!(
            decode_frame(&[SOH, 0x02, EOT]),
            Err(FramingError::TooShort { len: 1 })
        );
    }

    #[test]
    fn test_decode_crc_mismatch() {
        let mut frame = encode_frame(0x04, &[0x11, 0x22]);
        // Corrupt a payload byte (0x11 is not reserved, so no escape shift).
        let pos = frame.iter().position(|&b| b == 0x11).unwrap();
        frame[pos] = 0x12;
        assert!(matches!(
            decode_frame(&frame),
            Err(FramingError::CrcMismatch { .. })
        ));
    }
}
