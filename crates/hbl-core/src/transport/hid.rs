//! nusb-based HID transport.
//!
//! The bootloader enumerates as a vendor HID device with one interrupt IN
//! and one interrupt OUT endpoint carrying 64-byte reports. Frames longer
//! than a report are split across consecutive zero-padded reports.

use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use nusb::transfer::{In, Interrupt, Out};
use nusb::{Interface, MaybeFuture, list_devices};
use tracing::{debug, info, instrument};

use super::traits::{Transport, TransportError};
use crate::protocol::constants::HID_REPORT_SIZE;

/// nusb-based HID transport.
pub struct HidTransport {
    interface: Interface,
    in_endpoint: u8,
    out_endpoint: u8,
    vid: u16,
    pid: u16,
    open: bool,
}

impl HidTransport {
    /// Open the first device matching `vid`/`pid`.
    #[instrument(level = "info", fields(vid = format!("{:04X}", vid), pid = format!("{:04X}", pid)))]
    pub fn open(vid: u16, pid: u16) -> Result<Self, TransportError> {
        let device_info = list_devices()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?
            .find(|d| d.vendor_id() == vid && d.product_id() == pid)
            .ok_or_else(|| TransportError::DeviceNotFound(format!("VID={vid:04X} PID={pid:04X}")))?;

        let device = device_info
            .open()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;

        // The host HID driver usually owns the interface already.
        let interface = device
            .detach_and_claim_interface(0)
            .wait()
            .map_err(|e| TransportError::OpenFailed(format!("claim interface 0: {e}")))?;

        let mut in_endpoint: u8 = 0;
        let mut out_endpoint: u8 = 0;

        for config in device.configurations() {
            for iface in config.interfaces() {
                if iface.interface_number() != 0 {
                    continue;
                }
                for alt in iface.alt_settings() {
                    for ep in alt.endpoints() {
                        if ep.transfer_type() == nusb::descriptors::TransferType::Interrupt {
                            if ep.direction() == nusb::transfer::Direction::In {
                                in_endpoint = ep.address();
                            } else {
                                out_endpoint = ep.address();
                            }
                        }
                    }
                }
            }
        }

        if in_endpoint == 0 {
            return Err(TransportError::EndpointNotFound {
                ep_type: "Interrupt".into(),
                direction: "In".into(),
            });
        }
        if out_endpoint == 0 {
            return Err(TransportError::EndpointNotFound {
                ep_type: "Interrupt".into(),
                direction: "Out".into(),
            });
        }

        info!(
            in_ep = %format!("0x{:02X}", in_endpoint),
            out_ep = %format!("0x{:02X}", out_endpoint),
            "HID device opened"
        );

        Ok(Self {
            interface,
            in_endpoint,
            out_endpoint,
            vid,
            pid,
            open: true,
        })
    }

    pub fn vendor_id(&self) -> u16 {
        self.vid
    }

    pub fn product_id(&self) -> u16 {
        self.pid
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.open {
            Ok(())
        } else {
            Err(TransportError::Disconnected)
        }
    }
}

impl Transport for HidTransport {
    #[instrument(skip(self, data), fields(len = data.len()))]
    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        self.ensure_open()?;
        let ep = self
            .interface
            .endpoint::<Interrupt, Out>(self.out_endpoint)
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;

        let mut writer = ep.writer(HID_REPORT_SIZE);
        for chunk in data.chunks(HID_REPORT_SIZE) {
            let mut report = [0u8; HID_REPORT_SIZE];
            report[..chunk.len()].copy_from_slice(chunk);
            writer
                .write_all(&report)
                .map_err(|e| TransportError::WriteFailed(e.to_string()))?;
        }
        writer
            .flush()
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;

        debug!(bytes_written = data.len(), "Write complete");
        Ok(data.len())
    }

    #[instrument(skip(self), fields(max_len))]
    fn read(&mut self, max_len: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        self.ensure_open()?;
        let ep = self
            .interface
            .endpoint::<Interrupt, In>(self.in_endpoint)
            .map_err(|e| TransportError::ReadFailed(e.to_string()))?;

        let mut reader = ep.reader(HID_REPORT_SIZE);
        reader.set_read_timeout(timeout);
        let mut buf = vec![0u8; max_len.max(HID_REPORT_SIZE)];

        let n = reader.read(&mut buf).map_err(|e| match e.kind() {
            ErrorKind::TimedOut => TransportError::timeout(timeout),
            _ => TransportError::ReadFailed(e.to_string()),
        })?;

        buf.truncate(n.min(max_len));
        debug!(bytes_read = n, "Read complete");
        Ok(buf)
    }

    fn is_connected(&self) -> bool {
        self.open
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if self.open {
            info!(vid = %format!("{:04X}", self.vid), pid = %format!("{:04X}", self.pid), "Closing HID device");
        }
        self.open = false;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("HID {:04X}:{:04X}", self.vid, self.pid)
    }
}
