//! Session state tracking.
//!
//! Steps run strictly in order. A step may only begin while the session sits
//! in the state its predecessor leaves behind; terminal states reject
//! everything.

use std::fmt;

use crate::error::{Error, Result};

/// Lifecycle state of one bootloader session.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connected,
    Erasing,
    Programming,
    Verifying,
    Jumping,
    Finished,
    Aborted,
    Failed(String),
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "DISCONNECTED"),
            SessionState::Connected => write!(f, "CONNECTED"),
            SessionState::Erasing => write!(f, "ERASING"),
            SessionState::Programming => write!(f, "PROGRAMMING"),
            SessionState::Verifying => write!(f, "VERIFYING"),
            SessionState::Jumping => write!(f, "JUMPING"),
            SessionState::Finished => write!(f, "FINISHED"),
            SessionState::Aborted => write!(f, "ABORTED"),
            SessionState::Failed(reason) => write!(f, "FAILED ({reason})"),
        }
    }
}

impl SessionState {
    /// Finished, aborted and failed sessions accept no further steps.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Finished | SessionState::Aborted | SessionState::Failed(_)
        )
    }

    /// State entered when `step` begins, if it may begin from here.
    pub fn begin(&self, step: Step) -> Result<SessionState> {
        if !step.allowed_from(self) {
            return Err(Error::InvalidState {
                state: self.clone(),
                step,
            });
        }
        Ok(step.enters(self))
    }
}

/// One step of the update sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Replace the firmware image. Only before erasing starts.
    Load,
    Connect,
    Erase,
    Program,
    Verify,
    Jump,
}

impl Step {
    fn allowed_from(self, state: &SessionState) -> bool {
        match self {
            Step::Load => matches!(state, SessionState::Disconnected | SessionState::Connected),
            Step::Connect => *state == SessionState::Disconnected,
            Step::Erase => *state == SessionState::Connected,
            Step::Program => *state == SessionState::Erasing,
            Step::Verify => *state == SessionState::Programming,
            Step::Jump => *state == SessionState::Verifying,
        }
    }

    fn enters(self, from: &SessionState) -> SessionState {
        match self {
            Step::Load => from.clone(),
            Step::Connect => SessionState::Connected,
            Step::Erase => SessionState::Erasing,
            Step::Program => SessionState::Programming,
            Step::Verify => SessionState::Verifying,
            Step::Jump => SessionState::Jumping,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Load => write!(f, "load firmware"),
            Step::Connect => write!(f, "connect"),
            Step::Erase => write!(f, "erase"),
            Step::Program => write!(f, "program"),
            Step::Verify => write!(f, "verify"),
            Step::Jump => write!(f, "jump to application"),
        }
    }
}
