use crate::error::SessionError;
use crate::protocol::BackendStatus;
use serde::Serialize;

/// Phase of the auth session state machine.
///
/// ```text
/// Unknown -> Checking -> Authenticated
///                     -> Unauthenticated -> Refreshing -> Authenticated
///                                                      -> Failed(kind)
/// ```
///
/// `Failed` is not terminal: the next check or refresh leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "phase", content = "kind")]
pub enum SessionPhase {
    Unknown,
    Checking,
    Authenticated,
    Unauthenticated,
    Refreshing,
    Failed(&'static str),
}

impl SessionPhase {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionPhase::Authenticated)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::Unknown => "unknown",
            SessionPhase::Checking => "checking",
            SessionPhase::Authenticated => "authenticated",
            SessionPhase::Unauthenticated => "unauthenticated",
            SessionPhase::Refreshing => "refreshing",
            SessionPhase::Failed(_) => "failed",
        }
    }
}

/// Everything the shell observes about the auth session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    /// Last-known-good backend status, replaced wholesale
    pub status: Option<BackendStatus>,
    pub error: Option<SessionError>,
    /// Sequence number of the operation that produced `status`/`error`
    pub seq: u64,
}

impl SessionSnapshot {
    pub fn is_authenticated(&self) -> bool {
        self.phase.is_authenticated()
    }

    /// User-facing banner text, if any
    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(ToString::to_string)
    }
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            phase: SessionPhase::Unknown,
            status: None,
            error: None,
            seq: 0,
        }
    }
}

/// What a finished operation does to the snapshot
#[derive(Debug, Clone)]
pub(crate) enum Completion {
    /// Replace the status and clear the error
    Status(BackendStatus),
    /// Keep the status, record the error
    Error(SessionError),
}

impl SessionSnapshot {
    /// Apply the completion of operation `seq`.
    ///
    /// Returns false, leaving the snapshot untouched, when a newer operation
    /// has already completed.
    pub(crate) fn complete(&mut self, seq: u64, completion: Completion) -> bool {
        if seq < self.seq {
            return false;
        }
        self.seq = seq;
        match completion {
            Completion::Status(status) => {
                self.phase = if status.is_authenticated() {
                    SessionPhase::Authenticated
                } else {
                    SessionPhase::Unauthenticated
                };
                self.status = Some(status.normalized());
                self.error = None;
            }
            Completion::Error(error) => {
                self.phase = SessionPhase::Failed(error.kind());
                self.error = Some(error);
            }
        }
        true
    }
}
