//! UART bootloader session.
//!
//! Each packet is a 9-byte header followed by its payload; the device answers
//! with a single status byte. The image is sent in erase-block sized chunks
//! after one unlock covering the whole range, then checked with a CRC-32 over
//! the padded image.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, instrument};

use super::context::SessionContext;
use super::state::{SessionState, Step};
use crate::abort::AbortFlag;
use crate::checksum::crc32;
use crate::config::DeviceFamily;
use crate::error::{Error, Result};
use crate::events::{LogLevel, UpdateObserver};
use crate::image::{BlockIterator, FirmwareImage, HexParser, ImageFormat};
use crate::protocol::constants::{RESPONSE_TIMEOUT, UartCommand, UartResponse};
use crate::protocol::header::TxHeader;
use crate::transport::{SerialSettings, SerialTransport, Transport};

/// Byte sent as the payload of a reset packet.
const RESET_FILLER: u8 = 0x00;

/// Write one header + payload packet, flushing after each part.
fn send_packet<T: Transport + ?Sized>(
    transport: &mut T,
    command: UartCommand,
    payload: &[u8],
) -> Result<()> {
    let header = TxHeader::new(command, payload.len() as u32);
    transport.write(&header.to_bytes())?;
    transport.flush()?;
    transport.write(payload)?;
    transport.flush()?;
    Ok(())
}

/// Range and CRC-32 of the padded image sent by `program_flash`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Programmed {
    address: u32,
    length: u32,
    crc: u32,
}

/// Session with a bootloader speaking the UART packet protocol.
pub struct UartSession {
    ctx: SessionContext,
    family: DeviceFamily,
    image: Option<FirmwareImage>,
    programmed: Option<Programmed>,
    parser: HexParser,
    /// Scratch buffer for data packet payloads.
    packet: Vec<u8>,
}

impl UartSession {
    /// Wrap a transport. Fails if the family's erase block size is unusable.
    pub fn new(
        transport: Box<dyn Transport>,
        family: DeviceFamily,
        observer: Arc<dyn UpdateObserver>,
        abort: AbortFlag,
    ) -> Result<Self> {
        family.validate()?;
        let capacity = 4 + family.erase_block_size as usize;
        Ok(Self {
            ctx: SessionContext::new(transport, observer, abort),
            family,
            image: None,
            programmed: None,
            parser: HexParser::new(),
            packet: Vec::with_capacity(capacity),
        })
    }

    /// Open a serial port (8N1) and wrap it in a session.
    pub fn open(
        settings: &SerialSettings,
        family: DeviceFamily,
        observer: Arc<dyn UpdateObserver>,
        abort: AbortFlag,
    ) -> Result<Self> {
        family.validate()?;
        let transport = SerialTransport::open(settings)?;
        Self::new(Box::new(transport), family, observer, abort)
    }

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

    pub fn family(&self) -> &DeviceFamily {
        &self.family
    }

    pub fn image(&self) -> Option<&FirmwareImage> {
        self.image.as_ref()
    }

    pub fn connect(&mut self) -> Result<()> {
        self.ctx.connect()
    }

    pub fn disconnect(&mut self) -> Result<()> {
        self.ctx.disconnect()
    }

    /// Load a `.bin` (placed at the family's application start) or a `.hex`
    /// file (base rounded down to an erase-block boundary).
    pub fn set_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.ctx.state().begin(Step::Load)?;
        let path = path.as_ref();
        let image = match ImageFormat::from_path(path)? {
            ImageFormat::Bin => FirmwareImage::from_bin_file(path, self.family.app_start_address)?,
            ImageFormat::Hex => self.parser.parse_file(path)?.into_image(),
        };
        self.set_image(image)
    }

    /// Parse Intel HEX text directly.
    pub fn set_hex(&mut self, text: &str) -> Result<()> {
        self.ctx.state().begin(Step::Load)?;
        let image = self.parser.parse_str(text)?.into_image();
        self.set_image(image)
    }

    /// Replace the image. Rejected once erasing has started.
    pub fn set_image(&mut self, mut image: FirmwareImage) -> Result<()> {
        self.ctx.state().begin(Step::Load)?;
        image.align_base(self.family.erase_block_size);
        self.ctx.log(
            LogLevel::Info,
            format!(
                "Loaded {} bytes at {:#010X}",
                image.len(),
                image.base_address()
            ),
        );
        self.image = Some(image);
        self.programmed = None;
        Ok(())
    }

    /// This wire format has no version query.
    pub fn read_boot_info(&mut self) -> Result<u16> {
        Ok(0)
    }

    /// The bootloader erases blocks as it receives them; nothing is sent.
    pub fn erase_flash(&mut self) -> Result<()> {
        self.ctx.begin(Step::Erase)?;
        self.ctx
            .log(LogLevel::Info, "Flash is erased block by block while programming");
        self.ctx.settle(Ok(()))
    }

    #[instrument(skip(self))]
    pub fn program_flash(&mut self) -> Result<()> {
        self.ctx.begin(Step::Program)?;
        let Some(image) = self.image.take() else {
            return self.ctx.settle(Err(Error::NoImage));
        };
        let result = self.program(&image);
        self.image = Some(image);
        self.ctx.settle(result)
    }

    fn program(&mut self, image: &FirmwareImage) -> Result<()> {
        let block_size = self.family.erase_block_size as usize;
        let data = image.padded(block_size);
        let base = image.base_address();
        self.programmed = Some(Programmed {
            address: base,
            length: data.len() as u32,
            crc: crc32(&data),
        });

        self.unlock(base, data.len() as u32)?;

        let blocks = BlockIterator::new(&data, base, block_size);
        let total = blocks.total();
        self.ctx.log(
            LogLevel::Info,
            format!("Programming {} bytes in {total} blocks...", data.len()),
        );
        for (i, (address, block)) in blocks.enumerate() {
            self.ctx.check_abort()?;
            self.packet.clear();
            self.packet.extend_from_slice(&address.to_le_bytes());
            self.packet.extend_from_slice(block);
            send_packet(&mut self.ctx.transport, UartCommand::Data, &self.packet)?;
            self.expect_status(UartCommand::Data, UartResponse::Ok)?;
            debug!(address = format!("{:#010X}", address), "Block written");
            self.ctx.progress(i + 1, total);
        }
        info!(blocks = total, "Programming complete");
        Ok(())
    }

    fn unlock(&mut self, address: u32, length: u32) -> Result<()> {
        let mut payload = [0u8; 8];
        payload[..4].copy_from_slice(&address.to_le_bytes());
        payload[4..].copy_from_slice(&length.to_le_bytes());
        send_packet(&mut self.ctx.transport, UartCommand::Unlock, &payload)?;
        self.expect_status(UartCommand::Unlock, UartResponse::Ok)
    }

    /// Send the CRC-32 of the padded image as programmed; the device
    /// compares it with what it wrote.
    #[instrument(skip(self))]
    pub fn verify(&mut self) -> Result<()> {
        self.ctx.begin(Step::Verify)?;
        let result = self.verify_image();
        self.ctx.settle(result)
    }

    fn verify_image(&mut self) -> Result<()> {
        let Programmed {
            address,
            length,
            crc,
        } = self.programmed.ok_or(Error::NoImage)?;

        self.ctx
            .log(LogLevel::Info, format!("Verifying (CRC32 {crc:#010X})..."));
        send_packet(&mut self.ctx.transport, UartCommand::Verify, &crc.to_le_bytes())?;
        match self.response()? {
            UartResponse::CrcOk => {
                self.ctx.log(LogLevel::Info, "Verification successful");
                Ok(())
            }
            UartResponse::CrcFail => Err(Error::VerifyMismatch {
                address,
                length,
                expected: crc,
                actual: None,
            }),
            other => Err(Error::protocol(format!(
                "Unexpected Verify response: {:#04X}",
                other.code()
            ))),
        }
    }

    /// Reset the device into the application and close the port.
    #[instrument(skip(self))]
    pub fn jump_to_app(&mut self) -> Result<()> {
        self.ctx.begin(Step::Jump)?;
        let result = self.reset();
        let closed = self.ctx.transport.close();
        let result = self.ctx.settle(result.and(closed.map_err(Error::from)));
        if result.is_ok() {
            self.ctx.goto(SessionState::Finished);
        }
        result
    }

    fn reset(&mut self) -> Result<()> {
        send_packet(&mut self.ctx.transport, UartCommand::Reset, &[RESET_FILLER])?;
        let code = self.response()?;
        debug!(code = format!("{:#04X}", code.code()), "Reset acknowledged");
        self.ctx.log(LogLevel::Info, "Device reset into application");
        Ok(())
    }

    fn response(&mut self) -> Result<UartResponse> {
        let bytes = self.ctx.transport.read(1, RESPONSE_TIMEOUT)?;
        let byte = bytes
            .first()
            .copied()
            .ok_or_else(|| Error::protocol("Empty response"))?;
        Ok(UartResponse::from(byte))
    }

    fn expect_status(&mut self, command: UartCommand, expected: UartResponse) -> Result<()> {
        let got = self.response()?;
        if got != expected {
            return Err(Error::protocol(format!(
                "Unexpected {command:?} response: {:#04X}",
                got.code()
            )));
        }
        Ok(())
    }
}
