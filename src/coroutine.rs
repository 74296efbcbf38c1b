//! Stackful, suspendable coroutine (C4).
//!
//! Built on the `context` crate: a protected fixed-size stack plus a
//! `context::Context` switched into and out of on every resume/yield.
//!
//! Yield always returns control to the resuming worker, never to an
//! arbitrary site: every `Yielder` method transfers through exactly one
//! `Context::resume` call and is only reachable from inside the
//! coroutine body.

use std::cell::Cell;

use context::stack::ProtectedFixedSizeStack;
use context::{Context, Transfer};

use crate::remote::RemoteId;
use crate::task::TaskArgs;
use crate::timer_wheel::ScheduleToken;

/// Default coroutine stack size (C4: "default size chosen at creation").
pub const DEFAULT_STACK_SIZE: usize = 256 * 1024;

/// Why a coroutine suspended without finishing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YieldReason {
    /// A plain cooperative yield -- re-enqueue on the same queue.
    Yield,
    /// Blocked on a remote call; the worker must not re-enqueue, the
    /// remote-call reply path does (C8 step 8). Carries the id of the
    /// call being awaited so the board knows which reply wakes it.
    BlockedOnRemote(RemoteId),
    /// Sleeping until at least the given absolute microsecond timestamp.
    Sleeping(i64),
    /// Waiting for a real-time/synchronous schedule slot to open. Carries
    /// the schedule token so the board knows which slot's `rt_schedule`/
    /// `sy_schedule` event wakes it.
    WaitingOnSlot(ScheduleToken),
}

/// The result of resuming a coroutine once.
pub enum CoroutineOutcome {
    Yielded(YieldReason),
    Finished(Result<Vec<u8>, String>),
}

type Body = Box<dyn FnOnce(&Yielder) -> Result<Vec<u8>, String> + Send>;

struct Entry {
    body: Option<Body>,
    args: Option<TaskArgs>,
}

/// Handed to the coroutine body; suspending through it is the only
/// suspension point; yielding is always explicit, never implicit or
/// preemptive. Also carries the task's argument block, installed by the
/// trampoline on entry and retrievable via `get_args` without threading a
/// `&Yielder` down through every call (mirroring `yield_now`'s own
/// thread-local access).
pub struct Yielder {
    ctx: Cell<Option<Context>>,
    args: TaskArgs,
}

impl Yielder {
    fn suspend(&self, reason: YieldReason) {
        let ctx = self
            .ctx
            .take()
            .expect("Yielder used outside of its owning coroutine");
        let outcome = Box::new(CoroutineOutcome::Yielded(reason));
        let data = Box::into_raw(outcome) as usize;
        // The coroutine is inactive for the duration of this transfer --
        // the worker thread's own code runs next -- so the thread-local
        // must not still point at this `Yielder` while suspended.
        CURRENT_YIELDER.with(|c| c.set(std::ptr::null()));
        // Safety: `ctx` is the context captured on entry/last resume of
        // this coroutine; transferring through it hands control back to
        // whichever worker called `Coroutine::resume`.
        let Transfer { context, .. } = unsafe { ctx.resume(data) };
        self.ctx.set(Some(context));
        CURRENT_YIELDER.with(|c| c.set(self as *const Yielder));
    }

    pub fn yield_now(&self) {
        self.suspend(YieldReason::Yield);
    }

    pub fn block_on_remote(&self, id: RemoteId) {
        self.suspend(YieldReason::BlockedOnRemote(id));
    }

    pub fn sleep_until(&self, until_us: i64) {
        self.suspend(YieldReason::Sleeping(until_us));
    }

    pub fn wait_on_slot(&self, token: ScheduleToken) {
        self.suspend(YieldReason::WaitingOnSlot(token));
    }

    /// The argument block this task was submitted with, as installed by
    /// the trampoline on entry.
    pub fn get_args(&self) -> TaskArgs {
        self.args.clone()
    }
}

thread_local! {
    /// The `Yielder` for whichever coroutine is currently executing on
    /// this OS thread, if any. A stackful coroutine shares its OS thread
    /// with the worker that resumed it -- they never run concurrently --
    /// so a thread-local is enough for registered functions to reach
    /// their own suspension point without threading a `&Yielder` through
    /// every call.
    static CURRENT_YIELDER: Cell<*const Yielder> = const { Cell::new(std::ptr::null()) };
}

/// Runs `f` with the currently-executing coroutine's `Yielder`. Panics if
/// called from outside a coroutine body (a registered function invoked
/// directly rather than through `Coroutine::resume`).
pub fn with_current_yielder<R>(f: impl FnOnce(&Yielder) -> R) -> R {
    let ptr = CURRENT_YIELDER.with(|c| c.get());
    assert!(
        !ptr.is_null(),
        "with_current_yielder called outside of a running coroutine"
    );
    // Safety: non-null only while `trampoline` has a live `&yielder` on
    // this same thread's stack, which outlives this call by construction.
    f(unsafe { &*ptr })
}

extern "C" fn trampoline(t: Transfer) -> ! {
    // Safety: `t.data` is the `*mut Entry` passed by `Coroutine::resume`
    // on the very first resume, and only on the very first resume.
    let entry = unsafe { Box::from_raw(t.data as *mut Entry) };
    let body = entry
        .body
        .expect("coroutine entry missing its body on first resume");
    let args = entry
        .args
        .expect("coroutine entry missing its args on first resume");

    let yielder = Yielder {
        ctx: Cell::new(Some(t.context)),
        args,
    };
    CURRENT_YIELDER.with(|c| c.set(&yielder as *const Yielder));
    let result = body(&yielder);
    CURRENT_YIELDER.with(|c| c.set(std::ptr::null()));

    let outcome = Box::new(CoroutineOutcome::Finished(result));
    let data = Box::into_raw(outcome) as usize;
    let ctx = yielder
        .ctx
        .take()
        .expect("context missing when coroutine finished");
    // This resume hands the `Finished` outcome back to the worker. The
    // coroutine never runs again, so the `Context` returned here (which
    // would be used to resume *this* point) is deliberately discarded.
    let Transfer { context, .. } = unsafe { ctx.resume(data) };
    std::mem::forget(context);
    unreachable!("a finished coroutine must never be resumed again");
}

/// A task's coroutine: owns its stack, exposes `resume` to the worker.
pub struct Coroutine {
    _stack: ProtectedFixedSizeStack,
    context: Option<Context>,
    entry: Option<Box<Entry>>,
    finished: bool,
}

impl Coroutine {
    pub fn new(
        stack_size: usize,
        args: TaskArgs,
        body: impl FnOnce(&Yielder) -> Result<Vec<u8>, String> + Send + 'static,
    ) -> Self {
        let stack = ProtectedFixedSizeStack::new(stack_size)
            .expect("failed to allocate protected coroutine stack");
        // Safety: `trampoline` never returns and immediately reconstructs
        // the `Entry` passed as its first resume's data, matching the
        // contract `context::Context::new` requires of its entry fn.
        let context = unsafe { Context::new(&stack, trampoline) };
        let entry = Box::new(Entry {
            body: Some(Box::new(body)),
            args: Some(args),
        });
        Self {
            _stack: stack,
            context: Some(context),
            entry: Some(entry),
            finished: false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Resume the coroutine. Must only be called from a worker thread,
    /// never from inside the coroutine itself.
    pub fn resume(&mut self) -> CoroutineOutcome {
        assert!(!self.finished, "resumed an already-finished coroutine");
        let context = self.context.take().expect("coroutine context missing");
        let data = match self.entry.take() {
            Some(entry) => Box::into_raw(entry) as usize,
            None => 0,
        };
        // Safety: `context` is either the freshly-created entry context
        // (first resume) or the context captured at the last yield point.
        let Transfer { context, data } = unsafe { context.resume(data) };
        self.context = Some(context);

        // Safety: the trampoline and `Yielder::suspend` are the only
        // producers of this pointer, always a boxed `CoroutineOutcome`.
        let outcome = unsafe { *Box::from_raw(data as *mut CoroutineOutcome) };
        if matches!(outcome, CoroutineOutcome::Finished(_)) {
            self.finished = true;
        }
        outcome
    }
}

// Safety: the coroutine and its stack are only ever touched by the single
// worker thread currently resuming it; ownership transfers, it is never
// accessed concurrently.
unsafe impl Send for Coroutine {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_to_completion_without_yielding() {
        let mut co = Coroutine::new(DEFAULT_STACK_SIZE, TaskArgs::empty(), |_y| Ok(b"done".to_vec()));
        match co.resume() {
            CoroutineOutcome::Finished(Ok(v)) => assert_eq!(v, b"done"),
            _ => panic!("expected immediate completion"),
        }
        assert!(co.is_finished());
    }

    #[test]
    fn get_args_returns_what_the_coroutine_was_created_with() {
        let mut co = Coroutine::new(DEFAULT_STACK_SIZE, TaskArgs::new(b"hi".to_vec(), 1), |y| {
            Ok(y.get_args().raw)
        });
        match co.resume() {
            CoroutineOutcome::Finished(Ok(v)) => assert_eq!(v, b"hi"),
            _ => panic!("expected immediate completion"),
        }
    }

    #[test]
    fn yields_three_times_then_returns_result() {
        let mut co = Coroutine::new(DEFAULT_STACK_SIZE, TaskArgs::empty(), |y| {
            for _ in 0..3 {
                y.yield_now();
            }
            Ok(42i32.to_le_bytes().to_vec())
        });

        for _ in 0..3 {
            match co.resume() {
                CoroutineOutcome::Yielded(YieldReason::Yield) => {}
                _ => panic!("expected a plain yield"),
            }
        }
        match co.resume() {
            CoroutineOutcome::Finished(Ok(v)) => {
                assert_eq!(i32::from_le_bytes(v.try_into().unwrap()), 42);
            }
            _ => panic!("expected completion on the 4th resume"),
        }
    }

    #[test]
    fn propagates_error_result() {
        let mut co = Coroutine::new(DEFAULT_STACK_SIZE, TaskArgs::empty(), |_y| Err("boom".to_string()));
        match co.resume() {
            CoroutineOutcome::Finished(Err(e)) => assert_eq!(e, "boom"),
            _ => panic!("expected error completion"),
        }
    }

    #[test]
    #[should_panic(expected = "already-finished")]
    fn resuming_finished_coroutine_panics() {
        let mut co = Coroutine::new(DEFAULT_STACK_SIZE, TaskArgs::empty(), |_y| Ok(vec![]));
        let _ = co.resume();
        let _ = co.resume();
    }
}
