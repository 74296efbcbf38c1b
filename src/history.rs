//! Bounded task-event history log (C10).
//!
//! A fixed-capacity ring of recent task lifecycle events behind its own
//! mutex, read back mostly for diagnostics; a bound-and-drop-oldest
//! policy keeps it from growing without limit.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::task::TaskId;

/// A lifecycle event worth recording for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryEvent {
    Enqueued,
    Started,
    Yielded,
    BlockedOnRemote,
    Finished,
    Aborted,
}

#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub task_id: TaskId,
    pub event: HistoryEvent,
    pub timestamp_us: i64,
}

pub const DEFAULT_CAPACITY: usize = 1024;

/// A bounded append-only log, one per task board, guarded by its own
/// mutex so recording an event never contends with queue or wheel locks.
pub struct History {
    capacity: usize,
    entries: Mutex<VecDeque<HistoryEntry>>,
}

impl Default for History {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl History {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Appends an entry, dropping the oldest if at capacity.
    pub fn record(&self, task_id: TaskId, event: HistoryEvent, timestamp_us: i64) {
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(HistoryEntry {
            task_id,
            event,
            timestamp_us,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Snapshot for inspection/testing; does not drain the log.
    pub fn snapshot(&self) -> Vec<HistoryEntry> {
        self.entries.lock().iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_in_order() {
        let h = History::with_capacity(8);
        h.record(TaskId(1), HistoryEvent::Enqueued, 100);
        h.record(TaskId(1), HistoryEvent::Started, 200);
        let snap = h.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].event, HistoryEvent::Enqueued);
        assert_eq!(snap[1].event, HistoryEvent::Started);
    }

    #[test]
    fn drops_oldest_when_full() {
        let h = History::with_capacity(2);
        h.record(TaskId(1), HistoryEvent::Enqueued, 1);
        h.record(TaskId(1), HistoryEvent::Started, 2);
        h.record(TaskId(1), HistoryEvent::Finished, 3);
        let snap = h.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].timestamp_us, 2);
        assert_eq!(snap[1].timestamp_us, 3);
    }
}
