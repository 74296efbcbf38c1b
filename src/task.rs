//! Task handle and argument block (C5).
//!
//! Pairs a [`crate::coroutine::Coroutine`] with a small status enum and a
//! typed argument block, rather than a raw untyped argument buffer.

use crate::coroutine::Coroutine;
use crate::registry::FunctionDescriptor;

/// Opaque task identifier, unique for the lifetime of a task board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

/// Which queue a task is native to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskType {
    /// Runs on the board's single primary queue.
    Primary,
    /// Runs on one of the `k` secondary (executor) queues.
    Secondary(usize),
    /// Spawned to await a remote call's reply on behalf of a blocked task.
    RemoteParent,
}

/// A task's run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Ready,
    Running,
    BlockedOnRemote,
    Finished,
}

/// The argument block handed to a registered function on invocation.
/// Keeps the serialized bytes but carries the decoded arity alongside so
/// a callable does not need to re-parse a wire envelope to validate it.
#[derive(Debug, Clone)]
pub struct TaskArgs {
    pub raw: Vec<u8>,
    pub arity: usize,
}

impl TaskArgs {
    pub fn new(raw: Vec<u8>, arity: usize) -> Self {
        Self { raw, arity }
    }

    pub fn empty() -> Self {
        Self {
            raw: Vec::new(),
            arity: 0,
        }
    }
}

/// A schedulable unit of work: a coroutine plus the bookkeeping the board
/// needs to route it.
pub struct Task {
    pub id: TaskId,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub descriptor: Option<FunctionDescriptor>,
    pub coroutine: Coroutine,
    /// Whether this task's coroutine has been resumed at least once.
    /// `status` itself cycles back to `Ready` after every yield, so it
    /// cannot tell a first resume from a later one; a worker uses this to
    /// record a `HistoryEvent::Started` exactly once per task.
    pub started: bool,
}

impl Task {
    pub fn new(
        id: TaskId,
        task_type: TaskType,
        descriptor: Option<FunctionDescriptor>,
        coroutine: Coroutine,
    ) -> Self {
        Self {
            id,
            task_type,
            status: TaskStatus::Ready,
            descriptor,
            coroutine,
            started: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coroutine::DEFAULT_STACK_SIZE;

    #[test]
    fn new_task_starts_ready() {
        let co = Coroutine::new(DEFAULT_STACK_SIZE, TaskArgs::empty(), |_y| Ok(vec![]));
        let task = Task::new(TaskId(1), TaskType::Primary, None, co);
        assert_eq!(task.status, TaskStatus::Ready);
    }

    #[test]
    fn task_args_empty_has_zero_arity() {
        assert_eq!(TaskArgs::empty().arity, 0);
    }
}
