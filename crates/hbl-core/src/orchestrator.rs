//! Update orchestration.
//!
//! Runs the fixed step sequence against one session, either on the calling
//! thread (`run`) or on a worker thread (`spawn`). The controller aborts a
//! running update through the session's shared `AbortFlag`.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{error, info, instrument};

use crate::abort::AbortFlag;
use crate::error::Result;
use crate::events::{TracingObserver, UpdateEvent, UpdateObserver};
use crate::session::BootloaderSession;

/// Drives erase, program, verify and jump in order.
pub struct UpdateOrchestrator {
    observer: Arc<dyn UpdateObserver>,
}

impl Default for UpdateOrchestrator {
    fn default() -> Self {
        Self::new(Arc::new(TracingObserver))
    }
}

impl UpdateOrchestrator {
    pub fn new(observer: Arc<dyn UpdateObserver>) -> Self {
        Self { observer }
    }

    /// Run the whole update. Emits exactly one `Finished` event.
    #[instrument(skip_all, fields(kind = session.kind()))]
    pub fn run(&self, session: &mut BootloaderSession) -> bool {
        let success = match self.run_steps(session) {
            Ok(()) => {
                info!("Update complete");
                self.observer
                    .on_event(&UpdateEvent::info("Update complete"));
                true
            }
            Err(e) => {
                error!(error = %e, state = %session.state(), "Update failed");
                self.observer
                    .on_event(&UpdateEvent::error(format!("Update failed: {e}")));
                false
            }
        };
        self.observer.on_event(&UpdateEvent::Finished { success });
        success
    }

    fn run_steps(&self, session: &mut BootloaderSession) -> Result<()> {
        self.observer
            .on_event(&UpdateEvent::info(format!("Starting {} update", session.kind())));
        session.connect()?;
        session.erase_flash()?;
        session.check_abort()?;
        session.program_flash()?;
        session.check_abort()?;
        session.verify()?;
        session.jump_to_app()
    }

    /// Run the update on a worker thread.
    pub fn spawn(self, mut session: BootloaderSession) -> UpdateHandle {
        let abort = session.abort_flag();
        let worker = thread::spawn(move || {
            let success = self.run(&mut session);
            (session, success)
        });
        UpdateHandle { abort, worker }
    }
}

/// Handle to an update running on a worker thread.
pub struct UpdateHandle {
    abort: AbortFlag,
    worker: JoinHandle<(BootloaderSession, bool)>,
}

impl UpdateHandle {
    /// Ask the worker to stop at the next safe point.
    pub fn abort(&self) {
        self.abort.request();
    }

    pub fn abort_flag(&self) -> AbortFlag {
        self.abort.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Wait for the worker and take the session back.
    ///
    /// Fails only if the worker thread panicked.
    pub fn join(self) -> thread::Result<(BootloaderSession, bool)> {
        self.worker.join()
    }
}
