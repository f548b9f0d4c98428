//! Bootloader sessions.
//!
//! A session owns one open transport and walks the device through
//! connect, erase, program, verify and jump. Two wire formats exist:
//! - `HidSession`: framed commands over 64-byte HID reports
//! - `UartSession`: header + payload packets over a serial port

mod context;
pub mod hid;
pub mod state;
pub mod uart;

use std::path::Path;

pub use hid::HidSession;
pub use state::{SessionState, Step};
pub use uart::UartSession;

use crate::abort::AbortFlag;
use crate::error::Result;

/// Either kind of session, driven through one interface.
pub enum BootloaderSession {
    Hid(HidSession),
    Uart(UartSession),
}

macro_rules! dispatch {
    ($self:ident, $s:ident => $body:expr) => {
        match $self {
            BootloaderSession::Hid($s) => $body,
            BootloaderSession::Uart($s) => $body,
        }
    };
}

impl BootloaderSession {
    pub fn state(&self) -> &SessionState {
        dispatch!(self, s => s.state())
    }

    pub fn abort_flag(&self) -> AbortFlag {
        dispatch!(self, s => s.abort_flag())
    }

    pub fn check_abort(&mut self) -> Result<()> {
        dispatch!(self, s => s.check_abort())
    }

    pub fn connect(&mut self) -> Result<()> {
        dispatch!(self, s => s.connect())
    }

    pub fn disconnect(&mut self) -> Result<()> {
        dispatch!(self, s => s.disconnect())
    }

    pub fn set_file(&mut self, path: &Path) -> Result<()> {
        dispatch!(self, s => s.set_file(path))
    }

    pub fn read_boot_info(&mut self) -> Result<u16> {
        dispatch!(self, s => s.read_boot_info())
    }

    pub fn erase_flash(&mut self) -> Result<()> {
        dispatch!(self, s => s.erase_flash())
    }

    pub fn program_flash(&mut self) -> Result<()> {
        dispatch!(self, s => s.program_flash())
    }

    pub fn verify(&mut self) -> Result<()> {
        dispatch!(self, s => s.verify())
    }

    pub fn jump_to_app(&mut self) -> Result<()> {
        dispatch!(self, s => s.jump_to_app())
    }

    /// Short name of the wire format, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            BootloaderSession::Hid(_) => "HID",
            BootloaderSession::Uart(_) => "UART",
        }
    }
}

impl From<HidSession> for BootloaderSession {
    fn from(session: HidSession) -> Self {
        BootloaderSession::Hid(session)
    }
}

impl From<UartSession> for BootloaderSession {
    fn from(session: UartSession) -> Self {
        BootloaderSession::Uart(session)
    }
}
