//! HBL-Core: host side of the HID and UART flash bootloaders.
//!
//! This crate drives a device's resident bootloader through a complete
//! application update: erase, program, verify, start.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Checksum**: CRC-16 (frames, HID verify) and CRC-32 (UART verify)
//! - **Protocol**: Constants, HID frame codec, UART packet header
//! - **Image**: Intel HEX parsing, flat images, block iteration
//! - **Transport**: Byte transport abstraction (nusb HID, serialport, mock)
//! - **Events**: Observer pattern for UI decoupling
//! - **Session**: Per-link command sequences with state tracking
//! - **Orchestrator**: Step sequencing, worker thread, cooperative abort
//! - **Config**: Device family definitions and tool defaults
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use hbl_core::{AbortFlag, HidSession, TracingObserver, UpdateOrchestrator};
//!
//! let observer = Arc::new(TracingObserver);
//! let mut session = HidSession::open(0x4d63, 0x1234, observer.clone(), AbortFlag::new())?;
//! session.set_file("app.hex")?;
//!
//! let handle = UpdateOrchestrator::new(observer).spawn(session.into());
//! let (_session, success) = handle.join().expect("worker panicked");
//! assert!(success);
//! # Ok::<(), hbl_core::Error>(())
//! ```

pub mod abort;
pub mod checksum;
pub mod config;
pub mod error;
pub mod events;
pub mod image;
pub mod orchestrator;
pub mod protocol;
pub mod session;
pub mod transport;

// Re-exports for convenience
pub use abort::AbortFlag;
pub use checksum::{crc16, crc32};
pub use config::{ConfigError, DeviceFamily, ToolConfig};
pub use error::{Error, Result};
pub use events::{
    ChannelObserver, LogLevel, NullObserver, TracingObserver, UpdateEvent, UpdateObserver,
};
pub use image::{FileError, FirmwareImage, FlashRegion, HexImage, HexParser, SegmentAddressing};
pub use orchestrator::{UpdateHandle, UpdateOrchestrator};
pub use session::{BootloaderSession, HidSession, SessionState, UartSession};
pub use transport::{
    HidTransport, MockTransport, SerialSettings, SerialTransport, Transport, TransportError,
};
