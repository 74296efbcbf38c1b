//! Hierarchical timer wheel (C2).
//!
//! Absolute-microsecond timeouts keyed off a monotonic clock. Internally
//! this uses a binary min-heap ordered by absolute fire time rather than
//! literal hierarchical buckets -- it preserves the documented
//! `add`/`get_next`/`delete_by_id` contract (add and expire are O(log n)
//! here rather than near-O(1), a deliberate simplification recorded in
//! DESIGN.md) while being trivial to reason about for cancellation and
//! ordering.
//!
//! Each [`EventKind`] variant carries its own typed payload rather than a
//! raw function pointer plus an opaque argument.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::OnceLock;
use std::time::Instant;

use parking_lot::Mutex;

use crate::remote::RemoteId;
use crate::task::TaskId;

/// Microseconds ahead of the requested time that `rt_schedule`/`sy_schedule`
/// entries fire, so that consumers have lead time to prepare the slot.
pub const EARLY_TIME_FOR_RT_US: i64 = 1000;
pub const EARLY_TIME_FOR_SY_US: i64 = 1000;
/// `install_schedule` fires exactly at the requested time (no bias), per
/// the source (the bias line is present but commented out there).
pub const EARLY_TIME_FOR_SCHEDULE_US: i64 = 0;

/// A schedule-table generation token, opaque to the wheel.
pub type ScheduleToken = u64;

/// The six timer event kinds this wheel tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    InstallSchedule(ScheduleToken),
    RtSchedule(ScheduleToken),
    RtClose(ScheduleToken),
    SySchedule(ScheduleToken),
    BeginSleep(TaskId),
    RexecTimeout(RemoteId),
}

impl EventKind {
    fn early_bias_us(&self) -> i64 {
        match self {
            EventKind::InstallSchedule(_) => EARLY_TIME_FOR_SCHEDULE_US,
            EventKind::RtSchedule(_) => EARLY_TIME_FOR_RT_US,
            EventKind::SySchedule(_) => EARLY_TIME_FOR_SY_US,
            EventKind::RtClose(_) | EventKind::BeginSleep(_) | EventKind::RexecTimeout(_) => 0,
        }
    }

    /// Only `rexec_timeout` entries are cancellable by id.
    fn remote_id(&self) -> Option<RemoteId> {
        match self {
            EventKind::RexecTimeout(id) => Some(*id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TimerEntry {
    pub abs_time_us: i64,
    pub kind: EventKind,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.abs_time_us == other.abs_time_us
    }
}
impl Eq for TimerEntry {}
impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse so `BinaryHeap` (a max-heap) behaves as a min-heap on time.
        other.abs_time_us.cmp(&self.abs_time_us)
    }
}

static MONOTONIC_EPOCH: OnceLock<Instant> = OnceLock::new();

/// Microseconds elapsed on a monotonic clock since this process's first
/// call to `now_us`. Anchored on `Instant` rather than the wall clock so an
/// NTP step or `settimeofday` can never move a deadline backward in time.
pub fn now_us() -> i64 {
    let epoch = MONOTONIC_EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_micros() as i64
}

struct Inner {
    pending: BinaryHeap<TimerEntry>,
    current_time_us: i64,
}

/// The timer wheel handle: one per task board, guarded by its own
/// mutex, independent of every queue's lock.
pub struct TimerWheel {
    inner: Mutex<Inner>,
}

impl Default for TimerWheel {
    fn default() -> Self {
        Self::init()
    }
}

impl TimerWheel {
    pub fn init() -> Self {
        Self {
            inner: Mutex::new(Inner {
                pending: BinaryHeap::new(),
                current_time_us: now_us(),
            }),
        }
    }

    /// Inserts a timeout; applies the fixed early-fire bias for the event
    /// kind.
    pub fn add(&self, kind: EventKind, abs_time_us: i64) {
        let adjusted = abs_time_us - kind.early_bias_us();
        let mut inner = self.inner.lock();
        inner.pending.push(TimerEntry {
            abs_time_us: adjusted,
            kind,
        });
    }

    /// Scans pending entries for one whose kind is `rexec_timeout` and
    /// whose id matches; removes it. Idempotent: cancelling a non-existent
    /// id is a no-op that returns `false`.
    pub fn delete_by_id(&self, id: RemoteId) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.pending.len();
        let remaining: Vec<TimerEntry> = inner
            .pending
            .drain()
            .filter(|e| e.kind.remote_id() != Some(id))
            .collect();
        let removed = remaining.len() != before;
        inner.pending = remaining.into_iter().collect();
        removed
    }

    /// Advances the wheel's notion of "now" to the monotonic clock without
    /// dequeueing anything.
    pub fn update_to_now(&self) {
        let mut inner = self.inner.lock();
        inner.current_time_us = now_us();
    }

    /// Returns the earliest expired entry, if any, after advancing to now.
    /// Callers must call repeatedly until `None`.
    /// A timer with `abs_time < now` fires on the very next call, since
    /// the comparison is against the freshly-updated clock.
    pub fn get_next(&self) -> Option<TimerEntry> {
        let mut inner = self.inner.lock();
        inner.current_time_us = now_us();
        let expired = matches!(inner.pending.peek(), Some(e) if e.abs_time_us <= inner.current_time_us);
        if expired {
            inner.pending.pop()
        } else {
            None
        }
    }

    pub fn pending_count(&self) -> usize {
        self.inner.lock().pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_nonexistent_is_noop() {
        let tw = TimerWheel::init();
        assert!(!tw.delete_by_id(RemoteId(999)));
    }

    #[test]
    fn cancellation_is_idempotent() {
        let tw = TimerWheel::init();
        tw.add(EventKind::RexecTimeout(RemoteId(1)), now_us() + 50_000);
        assert!(tw.delete_by_id(RemoteId(1)));
        assert!(!tw.delete_by_id(RemoteId(1)));
    }

    #[test]
    fn past_deadline_fires_immediately() {
        let tw = TimerWheel::init();
        tw.add(EventKind::RexecTimeout(RemoteId(5)), now_us() - 1_000_000);
        let next = tw.get_next();
        assert!(matches!(next, Some(e) if e.kind.remote_id() == Some(RemoteId(5))));
    }

    #[test]
    fn future_deadline_does_not_fire_yet() {
        let tw = TimerWheel::init();
        tw.add(EventKind::RexecTimeout(RemoteId(7)), now_us() + 60_000_000);
        assert!(tw.get_next().is_none());
    }

    #[test]
    fn rt_schedule_applies_early_bias() {
        let tw = TimerWheel::init();
        let target = now_us() + 2000;
        tw.add(EventKind::RtSchedule(1), target);
        // The entry should fire up to EARLY_TIME_FOR_RT_US before `target`.
        tw.update_to_now();
        assert_eq!(tw.pending_count(), 1);
    }

    #[test]
    fn only_rexec_timeout_is_cancellable() {
        let tw = TimerWheel::init();
        tw.add(EventKind::BeginSleep(TaskId(1)), now_us() + 10_000);
        // No rexec_timeout with id 1 exists, even though a BeginSleep(1) does.
        assert!(!tw.delete_by_id(RemoteId(1)));
        assert_eq!(tw.pending_count(), 1);
    }
}
