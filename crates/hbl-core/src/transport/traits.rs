//! Byte transport abstraction.
//!
//! Defines the `Transport` trait both bootloader links are driven through,
//! allowing different implementations (HID over nusb, UART over serialport,
//! scripted mock).

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open device: {0}")]
    OpenFailed(String),

    #[error("Endpoint not found: type={ep_type}, direction={direction}")]
    EndpointNotFound { ep_type: String, direction: String },

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Device disconnected")]
    Disconnected,

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),
}

impl TransportError {
    pub(crate) fn timeout(timeout: Duration) -> Self {
        Self::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        }
    }
}

/// Blocking, half-duplex byte transport.
///
/// Opening is left to each implementation's constructor; a session takes
/// exclusive ownership of an already-open transport.
pub trait Transport: Send {
    /// Write raw bytes.
    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError>;

    /// Push buffered bytes to the device.
    fn flush(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Read up to `max_len` bytes, waiting at most `timeout` for the first one.
    ///
    /// Returns `TransportError::Timeout` if nothing arrived.
    fn read(&mut self, max_len: usize, timeout: Duration) -> Result<Vec<u8>, TransportError>;

    /// Check if the device is still connected.
    fn is_connected(&self) -> bool;

    /// Release the underlying handle. Further I/O fails with `Disconnected`.
    fn close(&mut self) -> Result<(), TransportError>;

    /// Human-readable identifier for logs.
    fn describe(&self) -> String;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        (**self).write(data)
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        (**self).flush()
    }

    fn read(&mut self, max_len: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        (**self).read(max_len, timeout)
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn close(&mut self) -> Result<(), TransportError> {
        (**self).close()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}
