//! Resources shared by both session kinds.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use super::state::{SessionState, Step};
use crate::abort::AbortFlag;
use crate::error::{Error, Result};
use crate::events::{LogLevel, PacketDirection, UpdateEvent, UpdateObserver};
use crate::transport::{Transport, TransportError};

/// Bytes of each packet copied into `Packet` events.
const PACKET_PREVIEW_LEN: usize = 32;

/// Transport wrapper that emits packet events.
pub(crate) struct ObservableTransport {
    inner: Box<dyn Transport>,
    observer: Arc<dyn UpdateObserver>,
}

impl ObservableTransport {
    fn packet(&self, direction: PacketDirection, data: &[u8]) {
        self.observer.on_event(&UpdateEvent::Packet {
            direction,
            length: data.len(),
            data: data.iter().take(PACKET_PREVIEW_LEN).copied().collect(),
        });
    }
}

impl Transport for ObservableTransport {
    fn write(&mut self, data: &[u8]) -> std::result::Result<usize, TransportError> {
        let n = self.inner.write(data)?;
        self.packet(PacketDirection::Tx, data);
        Ok(n)
    }

    fn flush(&mut self) -> std::result::Result<(), TransportError> {
        self.inner.flush()
    }

    fn read(
        &mut self,
        max_len: usize,
        timeout: Duration,
    ) -> std::result::Result<Vec<u8>, TransportError> {
        let data = self.inner.read(max_len, timeout)?;
        if !data.is_empty() {
            self.packet(PacketDirection::Rx, &data);
        }
        Ok(data)
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    fn close(&mut self) -> std::result::Result<(), TransportError> {
        self.inner.close()
    }

    fn describe(&self) -> String {
        self.inner.describe()
    }
}

/// Transport, observer, abort flag and state of one session.
pub(crate) struct SessionContext {
    pub(crate) transport: ObservableTransport,
    observer: Arc<dyn UpdateObserver>,
    abort: AbortFlag,
    state: SessionState,
}

impl SessionContext {
    pub(crate) fn new(
        transport: Box<dyn Transport>,
        observer: Arc<dyn UpdateObserver>,
        abort: AbortFlag,
    ) -> Self {
        Self {
            transport: ObservableTransport {
                inner: transport,
                observer: Arc::clone(&observer),
            },
            observer,
            abort,
            state: SessionState::Disconnected,
        }
    }

    pub(crate) fn state(&self) -> &SessionState {
        &self.state
    }

    pub(crate) fn abort_flag(&self) -> &AbortFlag {
        &self.abort
    }

    pub(crate) fn emit(&self, event: UpdateEvent) {
        self.observer.on_event(&event);
    }

    pub(crate) fn log(&self, level: LogLevel, text: impl Into<String>) {
        self.emit(UpdateEvent::Message {
            level,
            text: text.into(),
        });
    }

    pub(crate) fn progress(&self, current: usize, total: usize) {
        let percent = if total == 0 {
            100
        } else {
            (current.min(total) * 100 / total) as u8
        };
        self.emit(UpdateEvent::Progress { percent });
    }

    pub(crate) fn goto(&mut self, to: SessionState) {
        if self.state == to {
            return;
        }
        info!(from = %self.state, to = %to, "State transition");
        let from = std::mem::replace(&mut self.state, to.clone());
        self.emit(UpdateEvent::PhaseChanged { from, to });
    }

    /// Enter the state for `step`, or fail without touching the state.
    pub(crate) fn begin(&mut self, step: Step) -> Result<()> {
        let next = self.state.begin(step)?;
        self.goto(next);
        Ok(())
    }

    /// Record the outcome of a step in the state.
    ///
    /// Rejected steps leave the state as it was.
    pub(crate) fn settle<T>(&mut self, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) | Err(Error::InvalidState { .. }) => {}
            Err(_) if self.state.is_terminal() => {}
            Err(Error::Aborted) => {
                warn!("Session aborted");
                self.goto(SessionState::Aborted);
            }
            Err(e) => self.goto(SessionState::Failed(e.to_string())),
        }
        result
    }

    pub(crate) fn check_abort(&self) -> Result<()> {
        if self.abort.is_requested() {
            Err(Error::Aborted)
        } else {
            Ok(())
        }
    }

    pub(crate) fn connect(&mut self) -> Result<()> {
        if self.state == SessionState::Connected {
            return Ok(());
        }
        let next = self.state.begin(Step::Connect)?;
        if !self.transport.is_connected() {
            return Err(TransportError::Disconnected.into());
        }
        info!(device = %self.transport.describe(), "Connected");
        self.goto(next);
        Ok(())
    }

    /// Close the transport. Terminal states are kept for inspection.
    pub(crate) fn disconnect(&mut self) -> Result<()> {
        let closed = self.transport.close();
        if !self.state.is_terminal() {
            self.goto(SessionState::Disconnected);
        }
        closed.map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ChannelObserver;
    use crate::transport::MockTransport;
    use std::sync::mpsc;

    fn context(mock: &MockTransport) -> (SessionContext, mpsc::Receiver<UpdateEvent>) {
        let (tx, rx) = mpsc::channel();
        let ctx = SessionContext::new(
            Box::new(mock.clone()),
            Arc::new(ChannelObserver::new(tx)),
            AbortFlag::new(),
        );
        (ctx, rx)
    }

    #[test]
    fn test_packets_are_observed() {
        let mock = MockTransport::new();
        mock.queue_response(&[0x50]);
        let (mut ctx, rx) = context(&mock);

        ctx.transport.write(&[0u8; 40]).unwrap();
        ctx.transport.read(1, Duration::from_millis(10)).unwrap();

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            events[0],
            UpdateEvent::Packet {
                direction: PacketDirection::Tx,
                length: 40,
                data: vec![0u8; PACKET_PREVIEW_LEN],
            }
        );
        assert!(matches!(
            events[1],
            UpdateEvent::Packet {
                direction: PacketDirection::Rx,
                length: 1,
                ..
            }
        ));
    }

    #[test]
    fn test_connect_requires_live_transport() {
        let mock = MockTransport::new();
        mock.disconnect();
        let (mut ctx, _rx) = context(&mock);
        assert!(ctx.connect().is_err());
        assert_eq!(ctx.state(), &SessionState::Disconnected);

        mock.reconnect();
        ctx.connect().unwrap();
        assert_eq!(ctx.state(), &SessionState::Connected);
    }

    #[test]
    fn test_settle_moves_to_failed_or_aborted() {
        let mock = MockTransport::new();
        let (mut ctx, rx) = context(&mock);
        ctx.connect().unwrap();
        ctx.begin(Step::Erase).unwrap();

        let out: Result<()> = ctx.settle(Err(Error::protocol("bad echo")));
        assert!(out.is_err());
        assert!(matches!(ctx.state(), SessionState::Failed(_)));

        // Terminal state is kept.
        let _ = ctx.settle::<()>(Err(Error::Aborted));
        assert!(matches!(ctx.state(), SessionState::Failed(_)));

        let phases = rx
            .try_iter()
            .filter(|e| matches!(e, UpdateEvent::PhaseChanged { .. }))
            .count();
        assert_eq!(phases, 3);
    }

    #[test]
    fn test_disconnect_closes_transport() {
        let mock = MockTransport::new();
        let (mut ctx, _rx) = context(&mock);
        ctx.connect().unwrap();
        ctx.disconnect().unwrap();
        assert!(mock.is_closed());
        assert_eq!(ctx.state(), &SessionState::Disconnected);
    }
}
