//! Mock transport for testing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::traits::{Transport, TransportError};

#[derive(Debug, Default)]
struct MockState {
    /// Queued responses returned on read.
    responses: VecDeque<Vec<u8>>,
    /// Captured writes.
    write_log: Vec<Vec<u8>>,
    flushes: usize,
    disconnected: bool,
    closed: bool,
}

/// Scripted transport for unit testing session logic.
///
/// Clones share state, so a test can keep a handle after moving the
/// transport into a session.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        // A panicking test thread must not hide the captured log.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue a response to be returned on a later read.
    pub fn queue_response(&self, bytes: &[u8]) {
        self.lock().responses.push_back(bytes.to_vec());
    }

    /// Number of responses not yet consumed.
    pub fn pending_responses(&self) -> usize {
        self.lock().responses.len()
    }

    /// Get all captured writes.
    pub fn get_writes(&self) -> Vec<Vec<u8>> {
        self.lock().write_log.clone()
    }

    /// All writes concatenated in order.
    pub fn written_bytes(&self) -> Vec<u8> {
        self.lock().write_log.concat()
    }

    /// Clear captured writes.
    pub fn clear_writes(&self) {
        self.lock().write_log.clear();
    }

    pub fn flush_count(&self) -> usize {
        self.lock().flushes
    }

    /// Simulate device disconnect.
    pub fn disconnect(&self) {
        self.lock().disconnected = true;
    }

    /// Simulate device reconnect.
    pub fn reconnect(&self) {
        let mut state = self.lock();
        state.disconnected = false;
        state.closed = false;
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn check_open(state: &MockState) -> Result<(), TransportError> {
        if state.disconnected || state.closed {
            Err(TransportError::Disconnected)
        } else {
            Ok(())
        }
    }
}

impl Transport for MockTransport {
    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let mut state = self.lock();
        Self::check_open(&state)?;
        state.write_log.push(data.to_vec());
        Ok(data.len())
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        let mut state = self.lock();
        Self::check_open(&state)?;
        state.flushes += 1;
        Ok(())
    }

    fn read(&mut self, max_len: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let mut state = self.lock();
        Self::check_open(&state)?;
        let mut response = state
            .responses
            .pop_front()
            .ok_or_else(|| TransportError::timeout(timeout))?;
        if response.len() > max_len {
            let rest = response.split_off(max_len);
            state.responses.push_front(rest);
        }
        Ok(response)
    }

    fn is_connected(&self) -> bool {
        let state = self.lock();
        !state.disconnected && !state.closed
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.lock().closed = true;
        Ok(())
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: Duration = Duration::from_millis(10);

    #[test]
    fn test_mock_response_queue() {
        let mut mock = MockTransport::new();
        mock.queue_response(&[0x50]);
        mock.queue_response(&[0x53]);

        assert_eq!(mock.read(1, T).unwrap(), vec![0x50]);
        assert_eq!(mock.read(1, T).unwrap(), vec![0x53]);

        // Queue is empty now
        assert!(matches!(
            mock.read(1, T),
            Err(TransportError::Timeout { timeout_ms: 10 })
        ));
    }

    #[test]
    fn test_mock_splits_long_responses() {
        let mut mock = MockTransport::new();
        mock.queue_response(&[1, 2, 3]);

        assert_eq!(mock.read(2, T).unwrap(), vec![1, 2]);
        assert_eq!(mock.read(2, T).unwrap(), vec![3]);
    }

    #[test]
    fn test_mock_write_capture() {
        let mut mock = MockTransport::new();
        let handle = mock.clone();
        mock.write(b"Hello").unwrap();
        mock.flush().unwrap();
        mock.write(b"World").unwrap();

        let writes = handle.get_writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0], b"Hello");
        assert_eq!(writes[1], b"World");
        assert_eq!(handle.written_bytes(), b"HelloWorld");
        assert_eq!(handle.flush_count(), 1);
    }

    #[test]
    fn test_mock_disconnect_and_close() {
        let mut mock = MockTransport::new();
        assert!(mock.is_connected());

        mock.disconnect();
        assert!(!mock.is_connected());
        assert!(mock.write(b"test").is_err());

        mock.reconnect();
        mock.close().unwrap();
        assert!(mock.is_closed());
        assert!(matches!(mock.read(1, T), Err(TransportError::Disconnected)));
    }
}
