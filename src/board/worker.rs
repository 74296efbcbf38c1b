//! Executor worker loop (C8).
//!
//! One thread per queue (primary plus each secondary), running an
//! acquire/wait/pop/resume/re-enqueue-or-park/dispose loop: each coroutine
//! outcome maps back onto a specific queue or park-table operation.
//!
//! Step list: (1) acquire the queue's mutex, (2) wait on its condvar
//! while empty and not shutting down, (3) on wake, check shutdown, (4)
//! pop the head entry and release the mutex, (5) resume its coroutine,
//! (6) on a plain yield, re-enqueue at the tail, (7) on
//! `BlockedOnRemote`, hand the task to the board's blocked-task table
//! instead of re-enqueueing, (7b) on `WaitingOnSlot`, re-enqueue
//! immediately if the slot is already open, else hand it to the board's
//! slot-waiter table, (8) on completion, decrement the concurrency
//! counter and record history. Cancellation (via `kill`) only ever
//! happens while a worker is parked in step 2.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, trace, warn};

use super::{QueueEntry, TaskBoard};
use crate::coroutine::{CoroutineOutcome, YieldReason};
use crate::history::HistoryEvent;
use crate::timer_wheel::now_us;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorKind {
    Primary,
    Secondary(usize),
}

/// How often the primary worker re-checks the timer wheel while its queue
/// is otherwise idle. The wheel itself has no independent thread; the
/// primary executor is the one opportunistic driver of timer advancement,
/// so it cannot wait unboundedly on its queue condvar or a sleeping task /
/// remote-call deadline would never get checked.
const TIMER_POLL_INTERVAL: Duration = Duration::from_millis(10);

pub fn run_executor(board: Arc<TaskBoard>, kind: ExecutorKind) {
    debug!("executor {kind:?} starting");
    loop {
        let queue = match kind {
            ExecutorKind::Primary => board.primary_queue(),
            ExecutorKind::Secondary(i) => board.secondary_queue(i),
        };

        if kind == ExecutorKind::Primary {
            board.drain_expired_timers();
        }

        let entry = match kind {
            ExecutorKind::Primary => {
                queue.pop_blocking_timeout(TIMER_POLL_INTERVAL, || board.is_shutdown())
            }
            ExecutorKind::Secondary(_) => queue.pop_blocking(|| board.is_shutdown()),
        };
        let Some(entry) = entry else {
            if board.is_shutdown() {
                break;
            }
            continue;
        };

        let QueueEntry::Task(mut task) = entry;
        if !task.started {
            task.started = true;
            board.history().record(task.id, HistoryEvent::Started, now_us());
        }
        task.status = crate::task::TaskStatus::Running;
        trace!("executor {kind:?} resuming task {:?}", task.id);

        match task.coroutine.resume() {
            CoroutineOutcome::Yielded(YieldReason::Yield) => {
                task.status = crate::task::TaskStatus::Ready;
                board.history().record(task.id, HistoryEvent::Yielded, now_us());
                queue.enqueue(QueueEntry::Task(task));
            }
            CoroutineOutcome::Yielded(YieldReason::WaitingOnSlot(token)) => {
                task.status = crate::task::TaskStatus::Ready;
                if board.is_slot_open(token) {
                    queue.enqueue(QueueEntry::Task(task));
                } else {
                    let queue_index = match kind {
                        ExecutorKind::Primary => None,
                        ExecutorKind::Secondary(i) => Some(i),
                    };
                    board.park_on_slot(token, task, queue_index);
                }
            }
            CoroutineOutcome::Yielded(YieldReason::Sleeping(until_us)) => {
                let id = task.id;
                task.status = crate::task::TaskStatus::Ready;
                board.history().record(id, HistoryEvent::Yielded, now_us());
                let queue_index = match kind {
                    ExecutorKind::Primary => None,
                    ExecutorKind::Secondary(i) => Some(i),
                };
                // Re-enqueue is driven by a wheel entry rather than a
                // blocking sleep so the worker stays free to run other
                // tasks ("sleep does not occupy a
                // worker thread").
                board.park_sleeping(task, queue_index, until_us);
            }
            CoroutineOutcome::Yielded(YieldReason::BlockedOnRemote(id)) => {
                task.status = crate::task::TaskStatus::BlockedOnRemote;
                board.history().record(task.id, HistoryEvent::BlockedOnRemote, now_us());
                let queue_index = match kind {
                    ExecutorKind::Primary => None,
                    ExecutorKind::Secondary(i) => Some(i),
                };
                board.park_blocked(id, task, queue_index);
            }
            CoroutineOutcome::Finished(result) => {
                let id = task.id;
                board.history().record(id, HistoryEvent::Finished, now_us());
                if let Err(e) = result {
                    warn!("task {id:?} finished with error: {e}");
                }
                drop(task);
                board.dec_concurrent();
            }
        }
    }
    debug!("executor {kind:?} exiting");
}
