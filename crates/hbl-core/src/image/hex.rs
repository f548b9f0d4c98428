//! Intel HEX parsing.
//!
//! Produces three views of one file:
//! - the decoded bytes of every record, in file order (the HID bootloader
//!   is programmed record by record);
//! - the list of contiguous flash regions with their CRC-16, used to verify
//!   the device after programming;
//! - a flat image with gaps filled by erased bytes (for the UART link).
//!
//! Regions follow file order, not address order: a region closes whenever a
//! data record does not start exactly where the previous one ended.

use std::io::BufRead;
use std::path::Path;

use tracing::{debug, info};

use super::{ERASED_BYTE, FileError, FirmwareImage};
use crate::checksum::crc16_update;

/// Largest address span a flattened image may cover.
pub const MAX_IMAGE_SPAN: u64 = 64 * 1024 * 1024;

const RECORD_DATA: u8 = 0x00;
const RECORD_EOF: u8 = 0x01;
const RECORD_EXT_SEGMENT: u8 = 0x02;
const RECORD_EXT_LINEAR: u8 = 0x04;

/// How Extended Segment Address (type 02) records are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SegmentAddressing {
    /// `value << 4` replaces the linear accumulator. This is what deployed
    /// tooling for these bootloaders does; kept as the default until the
    /// intended semantics are confirmed.
    #[default]
    LinearAccumulator,
    /// `value << 4` is kept as a separate segment base added to the
    /// linear base.
    SegmentBase,
}

/// Contiguous flash extent covered by consecutive data records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashRegion {
    pub start_address: u32,
    pub length: u32,
    pub crc16: u16,
}

impl FlashRegion {
    pub fn end_address(&self) -> u64 {
        u64::from(self.start_address) + u64::from(self.length)
    }
}

/// Result of parsing one HEX file.
#[derive(Debug, Clone)]
pub struct HexImage {
    records: Vec<Vec<u8>>,
    regions: Vec<FlashRegion>,
    image: FirmwareImage,
}

impl HexImage {
    /// Decoded bytes of every record, EOF included.
    pub fn records(&self) -> &[Vec<u8>] {
        &self.records
    }

    pub fn regions(&self) -> &[FlashRegion] {
        &self.regions
    }

    pub fn image(&self) -> &FirmwareImage {
        &self.image
    }

    pub fn into_image(self) -> FirmwareImage {
        self.image
    }
}

/// Intel HEX parser.
#[derive(Debug, Default, Clone, Copy)]
pub struct HexParser {
    segment_addressing: SegmentAddressing,
}

impl HexParser {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_segment_addressing(mut self, mode: SegmentAddressing) -> Self {
        self.segment_addressing = mode;
        self
    }

    pub fn parse_file<P: AsRef<Path>>(&self, path: P) -> Result<HexImage, FileError> {
        let file = std::fs::File::open(path.as_ref())?;
        info!(path = %path.as_ref().display(), "Parsing HEX file");
        self.parse_reader(std::io::BufReader::new(file))
    }

    pub fn parse_str(&self, text: &str) -> Result<HexImage, FileError> {
        self.parse_reader(text.as_bytes())
    }

    pub fn parse_reader<R: BufRead>(&self, reader: R) -> Result<HexImage, FileError> {
        let mut state = ParseState::new(self.segment_addressing);

        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let record = decode_record(line, idx + 1)?;
            let done = state.apply(&record, idx + 1)?;
            state.records.push(record);
            if done {
                return state.finish();
            }
        }

        Err(FileError::MissingEof)
    }
}

/// Parse HEX text with default settings.
pub fn parse_hex(text: &str) -> Result<HexImage, FileError> {
    HexParser::new().parse_str(text)
}

struct ParseState {
    mode: SegmentAddressing,
    segment_base: u32,
    linear_base: u32,
    region_start: u32,
    region_end: u32,
    region_crc: u16,
    regions: Vec<FlashRegion>,
    records: Vec<Vec<u8>>,
    chunks: Vec<(u32, Vec<u8>)>,
}

impl ParseState {
    fn new(mode: SegmentAddressing) -> Self {
        Self {
            mode,
            segment_base: 0,
            linear_base: 0,
            region_start: 0,
            region_end: 0,
            region_crc: 0,
            regions: Vec::new(),
            records: Vec::new(),
            chunks: Vec::new(),
        }
    }

    /// Apply one record; returns `true` on EOF.
    fn apply(&mut self, record: &[u8], line: usize) -> Result<bool, FileError> {
        let offset = u32::from(record[1]) << 8 | u32::from(record[2]);
        let kind = record[3];
        let data = &record[4..record.len() - 1];

        match kind {
            RECORD_DATA => {
                let address = offset
                    .wrapping_add(self.segment_base)
                    .wrapping_add(self.linear_base);
                if address != self.region_end {
                    self.close_region();
                    self.region_start = address;
                    self.region_end = address;
                    self.region_crc = 0;
                }
                self.region_crc = crc16_update(self.region_crc, data);
                self.region_end = self.region_end.wrapping_add(data.len() as u32);
                if !data.is_empty() {
                    self.chunks.push((address, data.to_vec()));
                }
            }
            RECORD_EOF => {
                self.close_region();
                return Ok(true);
            }
            RECORD_EXT_SEGMENT => {
                let value = address_value(data, line)?;
                match self.mode {
                    SegmentAddressing::LinearAccumulator => self.linear_base = value << 4,
                    SegmentAddressing::SegmentBase => self.segment_base = value << 4,
                }
            }
            RECORD_EXT_LINEAR => {
                self.linear_base = address_value(data, line)? << 16;
            }
            other => {
                debug!(line, record_type = other, "Ignoring HEX record");
            }
        }
        Ok(false)
    }

    fn close_region(&mut self) {
        let length = self.region_end.wrapping_sub(self.region_start);
        if length > 0 {
            self.regions.push(FlashRegion {
                start_address: self.region_start,
                length,
                crc16: self.region_crc,
            });
        }
    }

    fn finish(self) -> Result<HexImage, FileError> {
        let image = flatten(&self.chunks)?;
        info!(
            records = self.records.len(),
            regions = self.regions.len(),
            base = %format!("0x{:08X}", image.base_address()),
            size = image.len(),
            "HEX file parsed"
        );
        Ok(HexImage {
            records: self.records,
            regions: self.regions,
            image,
        })
    }
}

fn flatten(chunks: &[(u32, Vec<u8>)]) -> Result<FirmwareImage, FileError> {
    let Some(base) = chunks.iter().map(|(addr, _)| *addr).min() else {
        return Err(FileError::Empty);
    };
    let end = chunks
        .iter()
        .map(|(addr, data)| u64::from(*addr) + data.len() as u64)
        .max()
        .unwrap_or(u64::from(base));
    let span = end - u64::from(base);
    if span > MAX_IMAGE_SPAN {
        return Err(FileError::ImageTooLarge {
            span,
            limit: MAX_IMAGE_SPAN,
        });
    }

    let mut data = vec![ERASED_BYTE; span as usize];
    for (addr, bytes) in chunks {
        let offset = (addr - base) as usize;
        data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }
    Ok(FirmwareImage::new(base, data))
}

fn address_value(data: &[u8], line: usize) -> Result<u32, FileError> {
    if data.len() < 2 {
        return Err(malformed(line, "extended address record needs two data bytes"));
    }
    Ok(u32::from(data[0]) << 8 | u32::from(data[1]))
}

/// Decode one `:`-prefixed line into its raw record bytes.
fn decode_record(line: &str, line_no: usize) -> Result<Vec<u8>, FileError> {
    let Some(digits) = line.strip_prefix(':') else {
        return Err(malformed(line_no, "missing ':' start code"));
    };
    let digits = digits.as_bytes();
    if digits.len() % 2 != 0 {
        return Err(malformed(line_no, "odd number of hex digits"));
    }

    let mut bytes = Vec::with_capacity(digits.len() / 2);
    for pair in digits.chunks(2) {
        match (hex_digit(pair[0]), hex_digit(pair[1])) {
            (Some(hi), Some(lo)) => bytes.push(hi << 4 | lo),
            _ => return Err(malformed(line_no, "invalid hex digit")),
        }
    }

    if bytes.len() < 5 {
        return Err(malformed(line_no, "record too short"));
    }
    let count = usize::from(bytes[0]);
    if bytes.len() != count + 5 {
        return Err(malformed(
            line_no,
            &format!("byte count {} does not match record length {}", count, bytes.len() - 5),
        ));
    }
    let sum = bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    if sum != 0 {
        return Err(malformed(line_no, "checksum mismatch"));
    }
    Ok(bytes)
}

fn hex_digit(c: u8) -> Option<u8> {
    (c as char).to_digit(16).map(|d| d as u8)
}

fn malformed(line: usize, reason: &str) -> FileError {
    FileError::MalformedRecord {
        line,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::crc16;

    /// Build a record line with a valid checksum.
    fn record(offset: u16, kind: u8, data: &[u8]) -> String {
        let mut bytes = vec![data.len() as u8, (offset >> 8) as u8, offset as u8, kind];
        bytes.extend_from_slice(data);
        let sum = bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
        bytes.push(sum.wrapping_neg());
        let digits: String = bytes.iter().map(|b| format!("{:02X}", b)).collect();
        format!(":{}", digits)
    }

    fn sample() -> String {
        [
            ":020000040001F9".to_string(),
            ":0400000001020304F2".to_string(),
            record(0x0004, 0x00, &[5, 6, 7, 8]),
            record(0x0100, 0x00, &[9, 10]),
            ":00000001FF".to_string(),
        ]
        .join("\r\n")
    }

    #[test]
    fn test_regions_split_on_gap() {
        let hex = parse_hex(&sample()).unwrap();

        assert_eq!(
            hex.regions(),
            &[
                FlashRegion {
                    start_address: 0x0001_0000,
                    length: 8,
                    crc16: crc16(&[1, 2, 3, 4, 5, 6, 7, 8]),
                },
                FlashRegion {
                    start_address: 0x0001_0100,
                    length: 2,
                    crc16: crc16(&[9, 10]),
                },
            ]
        );
    }

    #[test]
    fn test_flat_image_fills_gaps() {
        let hex = parse_hex(&sample()).unwrap();
        let image = hex.image();

        assert_eq!(image.base_address(), 0x0001_0000);
        assert_eq!(image.len(), 0x102);
        assert_eq!(&image.raw_data()[..8], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert!(image.raw_data()[8..0x100].iter().all(|&b| b == 0xFF));
        assert_eq!(&image.raw_data()[0x100..], &[9, 10]);
    }

    #[test]
    fn test_records_kept_in_file_order() {
        let hex = parse_hex(&sample()).unwrap();
        let records = hex.records();

        assert_eq!(records.len(), 5);
        assert_eq!(records[0], vec![0x02, 0x00, 0x00, 0x04, 0x00, 0x01, 0xF9]);
        assert_eq!(records[1], vec![0x04, 0x00, 0x00, 0x00, 1, 2, 3, 4, 0xF2]);
        assert_eq!(records[4], vec![0x00, 0x00, 0x00, 0x01, 0xFF]);
    }

    #[test]
    fn test_regions_follow_file_order() {
        // Higher address first: still two regions, in appearance order.
        let text = [
            record(0x0200, 0x00, &[0xAA, 0xBB]),
            record(0x0000, 0x00, &[0xCC]),
            ":00000001FF".to_string(),
        ]
        .join("\n");
        let hex = parse_hex(&text).unwrap();

        assert_eq!(hex.regions()[0].start_address, 0x200);
        assert_eq!(hex.regions()[1].start_address, 0x000);
        assert_eq!(hex.image().base_address(), 0);
        assert_eq!(hex.image().len(), 0x202);
    }

    #[test]
    fn test_no_empty_leading_region() {
        let text = [record(0x8000, 0x00, &[1]), ":00000001FF".to_string()].join("\n");
        let hex = parse_hex(&text).unwrap();
        assert_eq!(hex.regions().len(), 1);
        assert_eq!(hex.regions()[0].start_address, 0x8000);
    }

    #[test]
    fn test_extended_segment_replaces_linear_base() {
        // Observed behavior: the segment value lands in the linear
        // accumulator, so the earlier 0x0002 linear base is lost.
        let text = [
            record(0, 0x04, &[0x00, 0x02]),
            record(0, 0x02, &[0x10, 0x00]),
            record(0x0010, 0x00, &[0x42]),
            ":00000001FF".to_string(),
        ]
        .join("\n");

        let observed = parse_hex(&text).unwrap();
        assert_eq!(observed.regions()[0].start_address, 0x0001_0010);

        let textbook = HexParser::new()
            .with_segment_addressing(SegmentAddressing::SegmentBase)
            .parse_str(&text)
            .unwrap();
        assert_eq!(textbook.regions()[0].start_address, 0x0003_0010);
    }

    #[test]
    fn test_lines_after_eof_ignored() {
        let text = format!("{}\n:00000001FF\nnot a record", record(0, 0, &[1]));
        assert_eq!(parse_hex(&text).unwrap().records().len(), 2);
    }

    #[test]
    fn test_unknown_record_types_ignored() {
        let text = [
            record(0, 0x00, &[1, 2]),
            record(0, 0x05, &[0, 0, 0x80, 0]),
            record(2, 0x00, &[3]),
            ":00000001FF".to_string(),
        ]
        .join("\n");
        let hex = parse_hex(&text).unwrap();
        assert_eq!(hex.records().len(), 4);
        assert_eq!(hex.regions().len(), 1);
        assert_eq!(hex.regions()[0].length, 3);
    }

    #[test]
    fn test_no_data_records_is_empty() {
        assert!(matches!(parse_hex(":00000001FF\n"), Err(FileError::Empty)));

        let text = [
            record(0, 0x04, &[0x1D, 0x00]),
            record(0x0010, 0x00, &[]),
            ":00000001FF".to_string(),
        ]
        .join("\n");
        assert!(matches!(parse_hex(&text), Err(FileError::Empty)));
    }

    fn assert_malformed(text: &str, expected_line: usize) {
        match parse_hex(text) {
            Err(FileError::MalformedRecord { line, .. }) => assert_eq!(line, expected_line),
            other => panic!("expected malformed record, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_start_code() {
        assert_malformed("0400000001020304F2\n:00000001FF", 1);
    }

    #[test]
    fn test_odd_digit_count() {
        assert_malformed(":0400000001020304F2\n:0000001FF", 2);
    }

    #[test]
    fn test_invalid_digit() {
        assert_malformed(":04000000010203G4F2", 1);
    }

    #[test]
    fn test_bad_checksum() {
        assert_malformed(":0400000001020304F3", 1);
    }

    #[test]
    fn test_count_mismatch() {
        assert_malformed(":0500000001020304F1", 1);
    }

    #[test]
    fn test_missing_eof() {
        assert!(matches!(
            parse_hex(":0400000001020304F2\n"),
            Err(FileError::MissingEof)
        ));
    }

    #[test]
    fn test_blank_lines_skipped() {
        let text = format!("\n{}\n\n:00000001FF\n", record(0, 0, &[7]));
        let hex = parse_hex(&text).unwrap();
        assert_eq!(hex.records().len(), 2);
    }

    #[test]
    fn test_image_span_limit() {
        let text = [
            record(0, 0x00, &[1]),
            record(0, 0x04, &[0x1F, 0xC0]),
            record(0, 0x00, &[2]),
            ":00000001FF".to_string(),
        ]
        .join("\n");
        assert!(matches!(
            parse_hex(&text),
            Err(FileError::ImageTooLarge { .. })
        ));
    }
}
