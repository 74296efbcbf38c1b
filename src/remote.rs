//! Remote-call state machine (C6).
//!
//! Tracks the `actid`/`actarg`-keyed bookkeeping a REXEC-SYN/ASY exchange
//! needs: `sent -> {acked, nak, timed_out, failed} -> completed`.

use crate::task::TaskId;

/// Opaque remote-call identifier (the source's `actid`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RemoteId(pub u64);

/// The remote-call state machine. `Acked` is a quiet bookkeeping
/// transition only -- a bare `REXEC-ACK` means "the peer has the
/// request," not "the call is done," so it never wakes the parent task
/// and is never itself something `take_remote_result` can resolve.
/// `Resulted` is the one a `REXEC-RES` produces, carrying the actual
/// reply payload. `Completed` carries whatever terminal state it arrived
/// from so the history log can record it without losing information.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteState {
    Sent,
    Acked,
    Nak,
    TimedOut,
    Failed,
    Resulted,
    Completed,
}

impl RemoteState {
    /// Only these states admit a transition to `Completed`: a call reaches
    /// `completed` from exactly one of its terminal-intermediate states,
    /// never directly from `sent`, and never from the quiet `acked`
    /// bookkeeping state on its own (that would complete the call before
    /// its actual result has arrived).
    pub fn can_complete(self) -> bool {
        matches!(
            self,
            RemoteState::Nak | RemoteState::TimedOut | RemoteState::Failed | RemoteState::Resulted
        )
    }
}

/// One outstanding remote call, tracked from `sent` until `completed`.
#[derive(Debug, Clone)]
pub struct RemoteTaskRecord {
    pub id: RemoteId,
    /// The task blocked awaiting this call's reply, if any (a bare
    /// fire-and-forget `REXEC-ASY` with no callback has none).
    pub parent_task: Option<TaskId>,
    pub deadline_abs_us: i64,
    pub state: RemoteState,
    pub reply: Option<Vec<u8>>,
}

impl RemoteTaskRecord {
    pub fn new(id: RemoteId, parent_task: Option<TaskId>, deadline_abs_us: i64) -> Self {
        Self {
            id,
            parent_task,
            deadline_abs_us,
            state: RemoteState::Sent,
            reply: None,
        }
    }

    /// `sent -> acked` on a bare `REXEC-ACK`: quiet, no reply payload, and
    /// -- unlike [`Self::transition`] -- deliberately not something the
    /// caller wakes the parent task for, since the call is merely
    /// acknowledged, not finished. Only fires from `sent`; a duplicate ACK
    /// is a no-op.
    pub fn ack(&mut self) -> bool {
        if self.state != RemoteState::Sent {
            return false;
        }
        self.state = RemoteState::Acked;
        true
    }

    /// Applies a terminal-intermediate transition (`nak`/`timed_out`/
    /// `failed`/`resulted`). Allowed from `sent` or the quiet `acked`
    /// state -- `sent | acked -> completed` on `REXEC-RES`, `sent | acked
    /// -> timed_out` on the deadline firing. Returns `false` (a no-op) if
    /// the record is already past either, so a late duplicate reply after
    /// a timeout cannot resurrect or double-complete it.
    pub fn transition(&mut self, next: RemoteState, reply: Option<Vec<u8>>) -> bool {
        if !matches!(self.state, RemoteState::Sent | RemoteState::Acked) {
            return false;
        }
        self.state = next;
        self.reply = reply;
        true
    }

    /// Moves an already-resolved record to `completed`. No-op if called
    /// twice (idempotent completion).
    pub fn complete(&mut self) -> bool {
        if !self.state.can_complete() {
            return false;
        }
        self.state = RemoteState::Completed;
        true
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, RemoteState::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acked_then_resulted_then_completed() {
        let mut r = RemoteTaskRecord::new(RemoteId(1), Some(TaskId(1)), 0);
        assert!(r.ack());
        assert!(r.transition(RemoteState::Resulted, Some(b"ok".to_vec())));
        assert!(r.complete());
        assert!(r.is_terminal());
    }

    #[test]
    fn ack_alone_is_not_completable() {
        // A bare REXEC-ACK must not let the call complete with no reply --
        // only a later REXEC-RES (or a nak/timeout/error) may.
        let mut r = RemoteTaskRecord::new(RemoteId(5), None, 0);
        assert!(r.ack());
        assert!(!r.complete());
        assert_eq!(r.state, RemoteState::Acked);
    }

    #[test]
    fn duplicate_ack_is_a_noop() {
        let mut r = RemoteTaskRecord::new(RemoteId(6), None, 0);
        assert!(r.ack());
        assert!(!r.ack());
    }

    #[test]
    fn cannot_complete_directly_from_sent() {
        let mut r = RemoteTaskRecord::new(RemoteId(2), None, 0);
        assert!(!r.complete());
    }

    #[test]
    fn late_reply_after_timeout_is_a_noop() {
        let mut r = RemoteTaskRecord::new(RemoteId(3), None, 0);
        assert!(r.transition(RemoteState::TimedOut, None));
        // A late REXEC-RES arrives after the timeout already fired.
        assert!(!r.transition(RemoteState::Resulted, Some(b"late".to_vec())));
        assert_eq!(r.state, RemoteState::TimedOut);
    }

    #[test]
    fn completion_is_idempotent() {
        let mut r = RemoteTaskRecord::new(RemoteId(4), None, 0);
        r.transition(RemoteState::Failed, None);
        assert!(r.complete());
        assert!(!r.complete());
    }
}
