//! Cooperative task board: a coroutine scheduler, timer wheel,
//! remote-call state machine, and function registry, driven by an
//! MQTT-based bridge. See `DESIGN.md` for the module-by-module grounding
//! ledger.

pub mod board;
pub mod bridge;
pub mod command;
pub mod config;
pub mod coroutine;
pub mod error;
pub mod history;
pub mod mqtt;
pub mod queue;
pub mod registry;
pub mod remote;
pub mod task;
pub mod timer_wheel;

pub use board::TaskBoard;
pub use bridge::Bridge;
pub use config::{Args, Configuration};
pub use error::{Error, ErrorKind, Result};
pub use registry::{Callable, FunctionDescriptor};
pub use remote::{RemoteId, RemoteState};
pub use task::{TaskArgs, TaskId};

/// The argument block the currently-running task was submitted with
/// (`task_get_args`). Must be called from inside a registered function's
/// body while it is running as a task; panics otherwise.
pub fn get_args() -> TaskArgs {
    coroutine::with_current_yielder(|y| y.get_args())
}

/// Cooperatively yields the currently-running task, re-enqueueing it at
/// the tail of its own queue (`task_yield`). Must be
/// called from inside a registered function's body while it is running
/// as a task; panics otherwise.
pub fn yield_now() {
    coroutine::with_current_yielder(|y| y.yield_now());
}

/// Suspends the currently-running task until at least `until_us`
/// (absolute microseconds, see [`timer_wheel::now_us`]), without
/// occupying a worker thread while asleep.
pub fn sleep_until(until_us: i64) {
    coroutine::with_current_yielder(|y| y.sleep_until(until_us));
}

/// Parks the currently-running task awaiting a remote call's reply. The
/// board resumes it once `resolve_remote_call` fires for `id`, or never,
/// if the call is abandoned (e.g. the board is torn down first).
pub fn block_on_remote(id: RemoteId) {
    coroutine::with_current_yielder(|y| y.block_on_remote(id));
}

/// Suspends the currently-running task until schedule token `token`'s
/// real-time/synchronous slot opens (a matching `rt_schedule`/`sy_schedule`
/// timer event), without occupying a worker thread while it waits.
pub fn wait_on_slot(token: timer_wheel::ScheduleToken) {
    coroutine::with_current_yielder(|y| y.wait_on_slot(token));
}
