//! End-to-end task board scenarios, exercising the board and bridge
//! together end-to-end: no mocking of the coroutine or queue internals,
//! just the public API.

use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use taskboard::board::TaskBoard;
use taskboard::bridge::{AlwaysTrue, Bridge, FanOutAll, MessagingClient};
use taskboard::command::{Command, CommandKind};
use taskboard::error::Error;
use taskboard::registry::FunctionDescriptor;
use taskboard::remote::RemoteState;
use taskboard::task::TaskArgs;

fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..400 {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

struct RecordingClient {
    published: parking_lot::Mutex<Vec<(String, Vec<u8>)>>,
}

impl RecordingClient {
    fn new() -> Self {
        Self {
            published: parking_lot::Mutex::new(Vec::new()),
        }
    }
}

impl MessagingClient for RecordingClient {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), Error> {
        self.published
            .lock()
            .push((topic.to_string(), payload.to_vec()));
        Ok(())
    }
}

/// A task whose coroutine yields three
/// times and then returns a result is observable, and the board's
/// concurrency counter returns to zero once it finishes.
#[test]
fn local_task_yields_three_times_then_returns_result() {
    let board = TaskBoard::create(1).unwrap();
    let result_seen = Arc::new(AtomicI32::new(0));
    let result_seen2 = result_seen.clone();

    board.register_function(FunctionDescriptor {
        name: "count_to_42".to_string(),
        callable: Arc::new(move |_args: TaskArgs| {
            for _ in 0..3 {
                taskboard::yield_now();
            }
            result_seen2.store(42, Ordering::Release);
            Ok(42i32.to_le_bytes().to_vec())
        }),
        signature: "".to_string(),
        side_effects: false,
    });

    board.start();
    board
        .submit("count_to_42", TaskArgs::empty(), None)
        .unwrap();

    assert!(wait_until(|| board.get_concurrent() == 0));
    assert_eq!(result_seen.load(Ordering::Acquire), 42);

    board.kill();
    board.destroy();
}

/// A remote call acked then resolved with
/// a result completes with the actual reply, and the pending table
/// empties afterward. The intervening ack must not complete the call on
/// its own, or the real result would be lost.
#[test]
fn remote_call_ack_then_result_completes() {
    let board = TaskBoard::create(0).unwrap();
    let id = board.register_remote_call(None, taskboard::timer_wheel::now_us() + 1_000_000);

    assert!(board.ack_remote_call(id));
    assert!(board.take_remote_result(id).is_none(), "ack alone must not complete the call");
    assert!(board.resolve_remote_call(id, RemoteState::Resulted, Some(b"{\"result\":14}".to_vec())));

    let (state, reply) = board.take_remote_result(id).unwrap();
    assert_eq!(state, RemoteState::Resulted);
    assert_eq!(reply, Some(b"{\"result\":14}".to_vec()));
    assert_eq!(board.pending_remote_count(), 0);
}

/// A remote call times out, then a late
/// duplicate result for the same id is silently dropped.
#[test]
fn remote_call_timeout_then_late_result_is_dropped() {
    let board = TaskBoard::create(0).unwrap();
    let id = board.register_remote_call(
        None,
        taskboard::timer_wheel::now_us() - 1_000,
    );

    board.drain_expired_timers();
    let (state, _) = board.take_remote_result(id).unwrap();
    assert_eq!(state, RemoteState::TimedOut);

    // The id is gone from the pending table, so a late REXEC-RES for it
    // has nothing to resolve.
    assert!(!board.resolve_remote_call(id, RemoteState::Acked, Some(b"late".to_vec())));
}

/// A REXEC-ASY with a signature mismatch
/// is rejected with "ARGUMENT ERROR" and never scheduled.
#[test]
fn signature_mismatch_sends_argument_error_and_does_not_schedule() {
    let board = TaskBoard::create(0).unwrap();
    board.register_function(FunctionDescriptor {
        name: "add".to_string(),
        callable: Arc::new(|_args: TaskArgs| Ok(vec![])),
        signature: "i,i".to_string(),
        side_effects: false,
    });

    let client = Arc::new(RecordingClient::new());
    struct Handle(Arc<RecordingClient>);
    impl MessagingClient for Handle {
        fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), Error> {
            self.0.publish(topic, payload)
        }
    }

    let bridge = Bridge::new(
        board.clone(),
        Box::new(Handle(client.clone())),
        Box::new(FanOutAll {
            tiers: vec!["mach".to_string()],
        }),
        Box::new(AlwaysTrue),
    );

    // The board's `submit` enforces arity against the registered
    // signature; a mismatched call never gets past the bridge's own
    // `check_args`, so dispatching a REXEC-ASY whose declared function
    // has a nonzero arity but an empty payload exercises the same path
    // a wire-level signature mismatch would.
    let mut cmd = Command::new(CommandKind::RexecAsy, "add");
    cmd.actid = Some(1);
    cmd.payload = vec![]; // no args, but "add" expects 2
    // `check_args` in this port only validates against the registry
    // entry existing; arity enforcement happens in `TaskBoard::submit`,
    // so the mismatch surfaces there instead of at dispatch time.
    bridge.dispatch(cmd);

    assert_eq!(
        board.get_concurrent(),
        0,
        "a submit that fails arity validation must not schedule a task"
    );
    let published = client.published.lock();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].0, "/mach/func/reply");
}

/// Register, find, then destroy clears
/// the registry.
#[test]
fn registration_then_lookup_then_destroy() {
    use taskboard::registry::FunctionRegistry;

    let registry = FunctionRegistry::new();
    registry.register(FunctionDescriptor {
        name: "ping".to_string(),
        callable: Arc::new(|_args: TaskArgs| Ok(b"pong".to_vec())),
        signature: "v".to_string(),
        side_effects: false,
    });

    assert!(registry.find("ping").is_some());
    assert!(registry.find("pong").is_none());

    registry.destroy();
    assert!(registry.find("ping").is_none());
}

/// Shutdown drains cleanly -- queued
/// tasks and pending remotes are all disposed of exactly once. The board
/// is never started here, so every submitted task is guaranteed to still
/// be sitting in its queue (rather than possibly already run) when
/// `destroy` walks it.
#[test]
fn destroy_drains_queued_tasks_and_pending_remotes() {
    let board = TaskBoard::create(2).unwrap();

    board.register_function(FunctionDescriptor {
        name: "never_runs".to_string(),
        callable: Arc::new(|_args: TaskArgs| Ok(vec![])),
        signature: "".to_string(),
        side_effects: false,
    });

    for _ in 0..10 {
        board.submit("never_runs", TaskArgs::empty(), None).unwrap();
    }
    for _ in 0..3 {
        board.register_remote_call(None, taskboard::timer_wheel::now_us() + 10_000_000);
    }
    assert_eq!(board.pending_remote_count(), 3);
    assert_eq!(board.get_concurrent(), 10);

    board.destroy();

    assert_eq!(board.pending_remote_count(), 0);
}

/// A task-initiated `remote_sync_call` round-trips through the board's
/// outgoing queue and the bridge's reply dispatch, end to end.
#[test]
fn remote_sync_call_round_trips_through_bridge_reply() {
    let board = TaskBoard::create(1).unwrap();
    let got_result = Arc::new(AtomicU64::new(0));
    let got_result2 = got_result.clone();
    let board_for_fn = board.clone();

    board.register_function(FunctionDescriptor {
        name: "caller".to_string(),
        callable: Arc::new(move |_args: TaskArgs| {
            let (state, reply) =
                board_for_fn.remote_sync_call("fog", "remote_double", "i", vec![21], 5_000_000);
            if state == RemoteState::Resulted {
                got_result2.store(1, Ordering::Release);
            }
            Ok(reply.unwrap_or_default())
        }),
        signature: "".to_string(),
        side_effects: false,
    });

    let client = Arc::new(RecordingClient::new());
    struct Handle(Arc<RecordingClient>);
    impl MessagingClient for Handle {
        fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), Error> {
            self.0.publish(topic, payload)
        }
    }
    let bridge = Bridge::new(
        board.clone(),
        Box::new(Handle(client.clone())),
        Box::new(FanOutAll {
            tiers: vec!["fog".to_string()],
        }),
        Box::new(AlwaysTrue),
    );

    board.start();
    board.submit("caller", TaskArgs::empty(), None).unwrap();

    let mut outgoing = None;
    assert!(wait_until(|| {
        outgoing = board.msg_sent_queue().pop_head();
        outgoing.is_some()
    }));
    let outgoing = outgoing.unwrap();
    assert_eq!(outgoing.cmd, CommandKind::RexecSyn);
    assert_eq!(outgoing.level.as_deref(), Some("fog"));

    let mut reply = Command::new(CommandKind::RexecRes, "remote_double");
    reply.actid = outgoing.actid;
    reply.payload = b"42".to_vec();
    bridge.dispatch(reply);

    assert!(wait_until(|| got_result.load(Ordering::Acquire) == 1));

    board.kill();
    board.destroy();
}
