//! UART transport using the `serialport` crate.

use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, trace};

use super::traits::{Transport, TransportError};
use crate::protocol::constants::{DEFAULT_BAUD_RATE, RESPONSE_TIMEOUT};

/// Serial link settings. Framing is fixed at 8N1 without flow control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialSettings {
    /// Port name/path (e.g. "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    pub baud_rate: u32,
}

impl SerialSettings {
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
        }
    }
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self::new(String::new(), DEFAULT_BAUD_RATE)
    }
}

/// Native serial port transport.
pub struct SerialTransport {
    port: Option<Box<dyn serialport::SerialPort>>,
    name: String,
    timeout: Duration,
}

impl SerialTransport {
    #[instrument(level = "info", skip(settings), fields(port = %settings.port_name, baud = settings.baud_rate))]
    pub fn open(settings: &SerialSettings) -> Result<Self, TransportError> {
        if settings.port_name.is_empty() {
            return Err(TransportError::DeviceNotFound("no serial port given".into()));
        }
        let port = serialport::new(&settings.port_name, settings.baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(RESPONSE_TIMEOUT)
            .open()?;

        info!("Serial port opened");
        Ok(Self {
            port: Some(port),
            name: settings.port_name.clone(),
            timeout: RESPONSE_TIMEOUT,
        })
    }

    fn port(&mut self) -> Result<&mut Box<dyn serialport::SerialPort>, TransportError> {
        self.port.as_mut().ok_or(TransportError::Disconnected)
    }
}

impl Transport for SerialTransport {
    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        self.port()?
            .write_all(data)
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;
        trace!(len = data.len(), "Serial write");
        Ok(data.len())
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        self.port()?
            .flush()
            .map_err(|e| TransportError::WriteFailed(e.to_string()))
    }

    fn read(&mut self, max_len: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        if timeout != self.timeout {
            self.port()?.set_timeout(timeout)?;
            self.timeout = timeout;
        }
        let mut buf = vec![0u8; max_len];
        let n = match self.port()?.read(&mut buf) {
            Ok(0) => return Err(TransportError::timeout(timeout)),
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::TimedOut => {
                return Err(TransportError::timeout(timeout));
            }
            Err(e) => return Err(TransportError::ReadFailed(e.to_string())),
        };
        buf.truncate(n);
        trace!(len = n, "Serial read");
        Ok(buf)
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    fn close(&mut self) -> Result<(), TransportError> {
        // Dropping the handle closes the port.
        if self.port.take().is_some() {
            debug!(port = %self.name, "Serial port closed");
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("UART {}", self.name)
    }
}
