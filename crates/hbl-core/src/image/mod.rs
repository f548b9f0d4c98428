//! Firmware image handling.
//!
//! Provides loading of raw binaries and Intel HEX files, padding to
//! erase-block boundaries, and block iteration for the UART link.

pub mod hex;

use std::path::Path;

use thiserror::Error;

pub use hex::{FlashRegion, HexImage, HexParser, SegmentAddressing};

/// Value of erased flash, used for all padding.
pub const ERASED_BYTE: u8 = 0xFF;

#[derive(Error, Debug)]
pub enum FileError {
    #[error("Unsupported file type: {0}")]
    UnsupportedExtension(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed HEX record on line {line}: {reason}")]
    MalformedRecord { line: usize, reason: String },
    #[error("HEX file has no end-of-file record")]
    MissingEof,
    #[error("Image spans {span} bytes, limit is {limit}")]
    ImageTooLarge { span: u64, limit: u64 },
    #[error("Image contains no data")]
    Empty,
}

/// Firmware file formats accepted by the tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Hex,
    Bin,
}

impl ImageFormat {
    /// Detect the format from the file extension (case-insensitive).
    pub fn from_path(path: &Path) -> Result<Self, FileError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "hex" => Ok(Self::Hex),
            "bin" => Ok(Self::Bin),
            _ => Err(FileError::UnsupportedExtension(path.display().to_string())),
        }
    }
}

/// Flat firmware image anchored at a flash address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    base_address: u32,
    data: Vec<u8>,
}

impl FirmwareImage {
    pub fn new(base_address: u32, data: Vec<u8>) -> Self {
        Self { base_address, data }
    }

    /// Load a raw binary to be placed at `base_address`.
    pub fn from_bin_file<P: AsRef<Path>>(path: P, base_address: u32) -> Result<Self, FileError> {
        let data = std::fs::read(path)?;
        if data.is_empty() {
            return Err(FileError::Empty);
        }
        Ok(Self::new(base_address, data))
    }

    pub fn base_address(&self) -> u32 {
        self.base_address
    }

    pub fn raw_data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// One past the last byte, as a 64-bit address.
    pub fn end_address(&self) -> u64 {
        u64::from(self.base_address) + self.data.len() as u64
    }

    /// Move the base down to a multiple of `block_size`, filling the gap
    /// with erased bytes.
    pub fn align_base(&mut self, block_size: u32) {
        if block_size == 0 {
            return;
        }
        let lead = (self.base_address % block_size) as usize;
        if lead > 0 {
            let mut data = vec![ERASED_BYTE; lead];
            data.extend_from_slice(&self.data);
            self.data = data;
            self.base_address -= lead as u32;
        }
    }

    /// Image padded with erased bytes to a whole number of blocks.
    pub fn padded(&self, block_size: usize) -> Vec<u8> {
        let mut data = self.data.clone();
        if block_size > 0 {
            let len = data.len().div_ceil(block_size) * block_size;
            data.resize(len, ERASED_BYTE);
        }
        data
    }
}

/// Iterator over fixed-size blocks of a padded image with their addresses.
#[derive(Debug)]
pub struct BlockIterator<'a> {
    data: &'a [u8],
    block_size: usize,
    address: u32,
    offset: usize,
}

impl<'a> BlockIterator<'a> {
    /// `data` should already be padded to a multiple of `block_size`; a short
    /// tail is yielded as-is.
    pub fn new(data: &'a [u8], base_address: u32, block_size: usize) -> Self {
        Self {
            data,
            block_size: block_size.max(1),
            address: base_address,
            offset: 0,
        }
    }

    /// Total number of blocks (including a partial tail).
    pub fn total(&self) -> usize {
        self.data.len().div_ceil(self.block_size)
    }
}

impl<'a> Iterator for BlockIterator<'a> {
    type Item = (u32, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.data.len() {
            return None;
        }
        let end = (self.offset + self.block_size).min(self.data.len());
        let block = &self.data[self.offset..end];
        let address = self.address;
        self.offset = end;
        self.address = self.address.wrapping_add(self.block_size as u32);
        Some((address, block))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_format_detection() {
        assert_eq!(
            ImageFormat::from_path(Path::new("fw/app.HEX")).unwrap(),
            ImageFormat::Hex
        );
        assert_eq!(
            ImageFormat::from_path(Path::new("app.bin")).unwrap(),
            ImageFormat::Bin
        );
        assert!(matches!(
            ImageFormat::from_path(Path::new("app.elf")),
            Err(FileError::UnsupportedExtension(_))
        ));
        assert!(ImageFormat::from_path(Path::new("noext")).is_err());
    }

    #[test]
    fn test_padded_to_blocks() {
        let image = FirmwareImage::new(0x1000, vec![0xAA; 10]);
        let padded = image.padded(8);
        assert_eq!(padded.len(), 16);
        assert_eq!(&padded[..10], &[0xAA; 10]);
        assert_eq!(&padded[10..], &[0xFF; 6]);

        // Already aligned images are untouched.
        assert_eq!(FirmwareImage::new(0, vec![1; 16]).padded(8).len(), 16);
    }

    #[test]
    fn test_align_base() {
        let mut image = FirmwareImage::new(0x1004, vec![0x11, 0x22]);
        image.align_base(0x100);
        assert_eq!(image.base_address(), 0x1000);
        assert_eq!(image.len(), 6);
        assert_eq!(image.raw_data(), &[0xFF, 0xFF, 0xFF, 0xFF, 0x11, 0x22]);
    }

    #[test]
    fn test_block_iterator() {
        let image = FirmwareImage::new(0x2000, vec![0x55; 20]);
        let padded = image.padded(8);
        let iter = BlockIterator::new(&padded, image.base_address(), 8);
        assert_eq!(iter.total(), 3);

        let blocks: Vec<_> = iter.collect();
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].0, 0x2000);
        assert_eq!(blocks[1].0, 0x2008);
        assert_eq!(blocks[2].0, 0x2010);
        assert!(blocks.iter().all(|(_, b)| b.len() == 8));
        assert_eq!(&blocks[2].1[4..], &[0xFF; 4]);
    }

    #[test]
    fn test_from_bin_file() {
        let mut file = tempfile::Builder::new().suffix(".bin").tempfile().unwrap();
        file.write_all(&[1, 2, 3]).unwrap();

        let image = FirmwareImage::from_bin_file(file.path(), 0x402000).unwrap();
        assert_eq!(image.base_address(), 0x402000);
        assert_eq!(image.raw_data(), &[1, 2, 3]);
        assert_eq!(image.end_address(), 0x402003);
    }

    #[test]
    fn test_from_empty_bin_file() {
        let file = tempfile::Builder::new().suffix(".bin").tempfile().unwrap();
        assert!(matches!(
            FirmwareImage::from_bin_file(file.path(), 0),
            Err(FileError::Empty)
        ));
    }
}
