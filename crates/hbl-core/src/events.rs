//! Event system for UI decoupling.
//!
//! Lets the CLI (or any other front end) follow an update without tight
//! coupling to the session logic. The orchestrator and sessions only ever
//! talk to an `UpdateObserver`.

use std::fmt;
use std::sync::Mutex;
use std::sync::mpsc::Sender;

use crate::session::SessionState;

/// Log level for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Packet direction on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketDirection {
    Tx, // Host -> Device
    Rx, // Device -> Host
}

impl fmt::Display for PacketDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketDirection::Tx => write!(f, "TX"),
            PacketDirection::Rx => write!(f, "RX"),
        }
    }
}

/// Events emitted during an update.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateEvent {
    /// Status text.
    Message { level: LogLevel, text: String },
    /// Progress of the current step, 0-100.
    Progress { percent: u8 },
    /// Session state changed.
    PhaseChanged { from: SessionState, to: SessionState },
    /// Bytes sent or received.
    Packet {
        direction: PacketDirection,
        length: usize,
        data: Vec<u8>,
    },
    /// The update run ended. Emitted exactly once per run.
    Finished { success: bool },
}

impl UpdateEvent {
    pub fn info(text: impl Into<String>) -> Self {
        Self::Message {
            level: LogLevel::Info,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::Message {
            level: LogLevel::Error,
            text: text.into(),
        }
    }
}

/// Observer trait for receiving update events.
///
/// Implement this trait in your UI layer to receive updates. Events are
/// delivered from the worker thread.
pub trait UpdateObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &UpdateEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl UpdateObserver for NullObserver {
    fn on_event(&self, _event: &UpdateEvent) {}
}

/// Observer that forwards events over a channel.
///
/// Send errors (receiver dropped) are ignored; the update keeps running.
pub struct ChannelObserver {
    sender: Mutex<Sender<UpdateEvent>>,
}

impl ChannelObserver {
    pub fn new(sender: Sender<UpdateEvent>) -> Self {
        Self {
            sender: Mutex::new(sender),
        }
    }
}

impl UpdateObserver for ChannelObserver {
    fn on_event(&self, event: &UpdateEvent) {
        if let Ok(sender) = self.sender.lock() {
            let _ = sender.send(event.clone());
        }
    }
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl UpdateObserver for TracingObserver {
    fn on_event(&self, event: &UpdateEvent) {
        match event {
            UpdateEvent::Message { level, text } => match level {
                LogLevel::Trace => tracing::trace!("{}", text),
                LogLevel::Debug => tracing::debug!("{}", text),
                LogLevel::Info => tracing::info!("{}", text),
                LogLevel::Warn => tracing::warn!("{}", text),
                LogLevel::Error => tracing::error!("{}", text),
            },
            UpdateEvent::Progress { percent } => {
                tracing::debug!(progress = %format!("{}%", percent), "Progress");
            }
            UpdateEvent::PhaseChanged { from, to } => {
                tracing::info!(from = %from, to = %to, "Phase changed");
            }
            UpdateEvent::Packet {
                direction, length, ..
            } => {
                tracing::trace!(dir = %direction, len = length, "Packet");
            }
            UpdateEvent::Finished { success } => {
                if *success {
                    tracing::info!("Update finished successfully");
                } else {
                    tracing::error!("Update failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_channel_observer_forwards() {
        let (tx, rx) = mpsc::channel();
        let observer = ChannelObserver::new(tx);

        observer.on_event(&UpdateEvent::Progress { percent: 42 });
        observer.on_event(&UpdateEvent::Finished { success: true });

        assert_eq!(rx.recv().unwrap(), UpdateEvent::Progress { percent: 42 });
        assert_eq!(rx.recv().unwrap(), UpdateEvent::Finished { success: true });
    }

    #[test]
    fn test_observers_usable_as_trait_objects() {
        let observers: Vec<Box<dyn UpdateObserver>> =
            vec![Box::new(NullObserver), Box::new(TracingObserver)];
        for observer in &observers {
            observer.on_event(&UpdateEvent::error("boom"));
            observer.on_event(&UpdateEvent::Finished { success: false });
        }
    }

    #[test]
    fn test_channel_observer_survives_dropped_receiver() {
        let (tx, rx) = mpsc::channel();
        drop(rx);
        ChannelObserver::new(tx).on_event(&UpdateEvent::info("still running"));
    }
}
