//! HID bootloader session.
//!
//! Every command is one frame; the device answers each with one frame whose
//! first body byte echoes the command. Programming streams the raw Intel HEX
//! records, verification compares per-region CRC-16 values.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument};

use super::context::SessionContext;
use super::state::{SessionState, Step};
use crate::abort::AbortFlag;
use crate::error::{Error, Result};
use crate::events::{LogLevel, UpdateEvent, UpdateObserver};
use crate::image::{FileError, FlashRegion, HexImage, HexParser, ImageFormat};
use crate::protocol::constants::{
    ERASE_TIMEOUT, FRAME_TIMEOUT, HID_REPORT_SIZE, HidCommand, MAX_FRAME_LEN, RESPONSE_TIMEOUT,
};
use crate::protocol::frame::{self, FrameCodec, FramingError};
use crate::transport::{HidTransport, Transport, TransportError};

/// Session with a bootloader speaking the framed HID protocol.
pub struct HidSession {
    ctx: SessionContext,
    codec: FrameCodec,
    /// Raw bytes of the frame being received.
    rx_raw: Vec<u8>,
    hex: Option<HexImage>,
    /// Regions of the image as it was programmed; verify checks these.
    programmed: Option<Vec<FlashRegion>>,
    parser: HexParser,
}

impl HidSession {
    pub fn new(
        transport: Box<dyn Transport>,
        observer: Arc<dyn UpdateObserver>,
        abort: AbortFlag,
    ) -> Self {
        Self {
            ctx: SessionContext::new(transport, observer, abort),
            codec: FrameCodec::new(),
            rx_raw: Vec::with_capacity(MAX_FRAME_LEN),
            hex: None,
            programmed: None,
            parser: HexParser::new(),
        }
    }

    /// Open the first HID device matching `vid:pid`.
    pub fn open(
        vid: u16,
        pid: u16,
        observer: Arc<dyn UpdateObserver>,
        abort: AbortFlag,
    ) -> Result<Self> {
        let transport = HidTransport::open(vid, pid)?;
        Ok(Self::new(Box::new(transport), observer, abort))
    }

    /// Use a non-default HEX parser (segment addressing mode).
    #[must_use]
    pub fn with_parser(mut self, parser: HexParser) -> Self {
        self.parser = parser;
        self
    }

    pub fn state(&self) -> &SessionState {
        self.ctx.state()
    }

    pub fn abort_flag(&self) -> AbortFlag {
        self.ctx.abort_flag().clone()
    }

    /// Enter `Aborted` and fail if an abort was requested.
    pub fn check_abort(&mut self) -> Result<()> {
        let result = self.ctx.check_abort();
        self.ctx.settle(result)
    }

    pub fn connect(&mut self) -> Result<()> {
        self.ctx.connect()
    }

    pub fn disconnect(&mut self) -> Result<()> {
        self.ctx.disconnect()
    }

    /// Load and parse an Intel HEX file. Only allowed before erasing starts.
    pub fn set_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.ctx.state().begin(Step::Load)?;
        let path = path.as_ref();
        if ImageFormat::from_path(path)? != ImageFormat::Hex {
            return Err(FileError::UnsupportedExtension(path.display().to_string()).into());
        }
        let hex = self.parser.parse_file(path)?;
        self.store(hex);
        Ok(())
    }

    /// Parse Intel HEX text directly.
    pub fn set_hex(&mut self, text: &str) -> Result<()> {
        self.ctx.state().begin(Step::Load)?;
        let hex = self.parser.parse_str(text)?;
        self.store(hex);
        Ok(())
    }

    fn store(&mut self, hex: HexImage) {
        self.ctx.log(
            LogLevel::Info,
            format!(
                "Loaded {} records in {} regions",
                hex.records().len(),
                hex.regions().len()
            ),
        );
        self.hex = Some(hex);
        self.programmed = None;
    }

    /// Regions of the loaded image; empty until a file is set.
    pub fn regions(&self) -> &[FlashRegion] {
        self.hex.as_ref().map(HexImage::regions).unwrap_or_default()
    }

    /// Query the bootloader version. Returns 0 if the reply has an
    /// unexpected length.
    #[instrument(skip(self))]
    pub fn read_boot_info(&mut self) -> Result<u16> {
        self.send(HidCommand::ReadBootInfo, &[])?;
        let body = self.receive(FRAME_TIMEOUT)?;
        let version = match body {
            [_, hi, lo] => u16::from_be_bytes([*hi, *lo]),
            _ => 0,
        };
        debug!(version = format!("{:#06X}", version), "Boot info");
        Ok(version)
    }

    #[instrument(skip(self))]
    pub fn erase_flash(&mut self) -> Result<()> {
        self.ctx.begin(Step::Erase)?;
        let result = self.erase();
        self.ctx.settle(result)
    }

    fn erase(&mut self) -> Result<()> {
        self.ctx.log(LogLevel::Info, "Erasing flash...");
        self.send(HidCommand::EraseFlash, &[])?;
        self.expect_echo(HidCommand::EraseFlash, ERASE_TIMEOUT)?;
        self.ctx.log(LogLevel::Info, "Flash erased");
        self.ctx.emit(UpdateEvent::Progress { percent: 50 });
        Ok(())
    }

    /// Send every HEX record, one frame per record.
    #[instrument(skip(self))]
    pub fn program_flash(&mut self) -> Result<()> {
        self.ctx.begin(Step::Program)?;
        let Some(hex) = self.hex.take() else {
            return self.ctx.settle(Err(Error::NoImage));
        };
        self.programmed = Some(hex.regions().to_vec());
        let result = self.program(hex.records());
        self.hex = Some(hex);
        self.ctx.settle(result)
    }

    fn program(&mut self, records: &[Vec<u8>]) -> Result<()> {
        let total = records.len();
        self.ctx
            .log(LogLevel::Info, format!("Programming {total} records..."));
        for (i, record) in records.iter().enumerate() {
            self.ctx.check_abort()?;
            self.send(HidCommand::ProgramFlash, record)?;
            self.expect_echo(HidCommand::ProgramFlash, RESPONSE_TIMEOUT)?;
            self.ctx.progress(i + 1, total);
        }
        info!(records = total, "Programming complete");
        Ok(())
    }

    /// Ask the device for the CRC-16 of `length` bytes at `address`.
    pub fn read_crc(&mut self, address: u32, length: u32) -> Result<u16> {
        let mut payload = [0u8; 8];
        payload[..4].copy_from_slice(&address.to_le_bytes());
        payload[4..].copy_from_slice(&length.to_le_bytes());
        self.send(HidCommand::ReadCrc, &payload)?;

        let echo = HidCommand::ReadCrc.code();
        match self.receive(RESPONSE_TIMEOUT)? {
            [cmd, lo, hi] if *cmd == echo => Ok(u16::from_le_bytes([*lo, *hi])),
            body => Err(Error::protocol(format!(
                "Unexpected ReadCrc response: {body:02X?}"
            ))),
        }
    }

    /// Compare the device CRC of every non-empty region with the image.
    #[instrument(skip(self))]
    pub fn verify(&mut self) -> Result<()> {
        self.ctx.begin(Step::Verify)?;
        let result = self.verify_regions();
        self.ctx.settle(result)
    }

    fn verify_regions(&mut self) -> Result<()> {
        let regions = self.programmed.clone().ok_or(Error::NoImage)?;
        self.ctx.log(LogLevel::Info, "Verifying...");
        let total = regions.len();
        for (i, region) in regions.iter().enumerate() {
            if region.length == 0 {
                continue;
            }
            let actual = self.read_crc(region.start_address, region.length)?;
            if actual != region.crc16 {
                return Err(Error::VerifyMismatch {
                    address: region.start_address,
                    length: region.length,
                    expected: u32::from(region.crc16),
                    actual: Some(u32::from(actual)),
                });
            }
            debug!(
                address = format!("{:#010X}", region.start_address),
                len = region.length,
                "Region verified"
            );
            self.ctx.progress(i + 1, total);
        }
        self.ctx.log(LogLevel::Info, "Verification successful");
        Ok(())
    }

    /// Start the application. The reply is read but not interpreted.
    #[instrument(skip(self))]
    pub fn jump_to_app(&mut self) -> Result<()> {
        self.ctx.begin(Step::Jump)?;
        let result = self.jump();
        let result = self.ctx.settle(result);
        if result.is_ok() {
            self.ctx.goto(SessionState::Finished);
        }
        result
    }

    fn jump(&mut self) -> Result<()> {
        self.send(HidCommand::JumpToApp, &[])?;
        self.ctx
            .transport
            .read(HID_REPORT_SIZE, FRAME_TIMEOUT)?;
        self.ctx.log(LogLevel::Info, "Application started");
        Ok(())
    }

    fn send(&mut self, command: HidCommand, payload: &[u8]) -> Result<()> {
        let frame = self.codec.encode(command.code(), payload);
        self.ctx.transport.write(frame)?;
        Ok(())
    }

    /// Read reports until one complete frame arrived and decode it.
    fn receive(&mut self, timeout: Duration) -> Result<&[u8]> {
        self.rx_raw.clear();
        while !frame::is_complete(&self.rx_raw) {
            if self.rx_raw.len() > MAX_FRAME_LEN {
                return Err(FramingError::MissingEnd.into());
            }
            let chunk = self.ctx.transport.read(HID_REPORT_SIZE, timeout)?;
            if chunk.is_empty() {
                return Err(TransportError::timeout(timeout).into());
            }
            self.rx_raw.extend_from_slice(&chunk);
        }
        Ok(self.codec.decode(&self.rx_raw)?)
    }

    fn expect_echo(&mut self, command: HidCommand, timeout: Duration) -> Result<()> {
        let body = self.receive(timeout)?;
        if body != [command.code()] {
            return Err(Error::protocol(format!(
                "Unexpected {command:?} response: {body:02X?}"
            )));
        }
        Ok(())
    }
}
