//! Cooperative abort flag.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared cancellation flag.
///
/// The controller sets it; the worker polls it only between units of work
/// (HEX records, UART blocks, major steps). In-flight I/O is never
/// interrupted.
#[derive(Debug, Clone, Default)]
pub struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request an abort.
    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Re-arm the flag for a new run.
    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
