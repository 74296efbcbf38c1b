//! Task board (C7): the shared structure all executor workers and the
//! bridge operate on.
//!
//! Per-queue mutex+condvar pairs become [`crate::queue::Queue`] instances;
//! the registry, timer wheel, and history each keep their own dedicated
//! lock so the hot paths never contend with each other.
//!
//! Shutdown is two non-blocking calls: `kill` flags `shutdown` and wakes
//! every queue's waiter, then returns immediately without waiting for
//! anything; `destroy` joins the now-exiting executor threads and drains
//! every subsystem. Lock ordering on teardown: each queue's own mutex
//! (inside `kill`), then the executor-handle mutexes, then the wheel,
//! then history (inside `destroy`) -- acquired in that order, released in
//! reverse.

mod worker;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::command::{Command, CommandKind};
use crate::coroutine::Coroutine;
use crate::error::{Error, ErrorKind};
use crate::history::{History, HistoryEvent};
use crate::queue::Queue;
use crate::registry::{FunctionDescriptor, FunctionRegistry};
use crate::remote::{RemoteId, RemoteState, RemoteTaskRecord};
use crate::task::{Task, TaskArgs, TaskId, TaskType};
use crate::timer_wheel::{now_us, EventKind, ScheduleToken, TimerWheel};

pub use worker::{run_executor, ExecutorKind};

/// Hard ceiling on concurrently-running tasks (source: `MAX_TASKS`, not
/// present in the retrieved header; chosen to match the source's
/// `int task_count` bookkeeping while giving workers real headroom).
pub const MAX_TASKS: i64 = 4096;
/// Hard ceiling on secondary (executor) queues (source: `MAX_SECONDARIES`).
pub const MAX_SECONDARIES: usize = 64;

/// One entry in a task queue. The source discriminates `task_t` vs
/// `remote_task_t` by `sizeof`; this port uses a real tagged union
/// instead.
pub enum QueueEntry {
    Task(Task),
}

/// One outstanding remote call's bookkeeping plus whatever task is
/// currently parked awaiting it. Keeping both under the one
/// `pending_remote` lock (rather than a separate `blocked_tasks` table) is
/// what makes `park_blocked` and `resolve_remote_call` race-free: there is
/// no window in which one has released the lock the other is about to
/// take.
struct PendingRemote {
    record: RemoteTaskRecord,
    /// The task blocked awaiting this call's reply, alongside the queue it
    /// should return to once woken. `None` until a worker actually parks a
    /// task here, which can happen after the call has already resolved.
    parked: Option<(Task, Option<usize>)>,
}

struct Inner {
    registry: FunctionRegistry,
    wheel: TimerWheel,
    history: History,
    pending_remote: Mutex<HashMap<RemoteId, PendingRemote>>,
    /// Tasks parked on `Sleeping(until)`, keyed by task id, alongside the
    /// queue they should return to on wake (`None` = primary).
    sleeping_tasks: Mutex<HashMap<TaskId, (Task, Option<usize>)>>,
    /// Whether a schedule token's real-time/synchronous slot is currently
    /// open. Absent means closed (never opened, or closed by `rt_close`).
    slot_open: Mutex<HashMap<ScheduleToken, bool>>,
    /// Tasks parked on `WaitingOnSlot(token)`, alongside the queue each
    /// should return to once `token`'s slot opens.
    slot_waiters: Mutex<HashMap<ScheduleToken, Vec<(Task, Option<usize>)>>>,
    next_task_id: AtomicI64,
    next_remote_id: AtomicI64,
    task_count: AtomicI64,
}

/// The task board itself (C7). Shared via `Arc` between the public API,
/// every executor worker thread, and the bridge.
pub struct TaskBoard {
    inner: Inner,
    primary: Queue<QueueEntry>,
    secondary: Vec<Queue<QueueEntry>>,
    msg_sent: Queue<Command>,
    msg_recv: Queue<Command>,
    shutdown: AtomicBool,
    status: AtomicBool,
    primary_handle: Mutex<Option<std::thread::JoinHandle<()>>>,
    secondary_handles: Mutex<Vec<std::thread::JoinHandle<()>>>,
}

impl TaskBoard {
    /// Allocates every queue, mutex, and subsystem but does not start any
    /// executor thread.
    pub fn create(secondary_queues: usize) -> Result<Arc<Self>, Error> {
        if secondary_queues > MAX_SECONDARIES {
            return Err(Error::new(
                ErrorKind::Configuration,
                format!(
                    "requested {secondary_queues} secondary queues, max is {MAX_SECONDARIES}"
                ),
            ));
        }

        let secondary = (0..secondary_queues).map(|_| Queue::new()).collect();

        Ok(Arc::new(Self {
            inner: Inner {
                registry: FunctionRegistry::new(),
                wheel: TimerWheel::init(),
                history: History::default(),
                pending_remote: Mutex::new(HashMap::new()),
                sleeping_tasks: Mutex::new(HashMap::new()),
                slot_open: Mutex::new(HashMap::new()),
                slot_waiters: Mutex::new(HashMap::new()),
                next_task_id: AtomicI64::new(1),
                next_remote_id: AtomicI64::new(1),
                task_count: AtomicI64::new(0),
            },
            primary: Queue::new(),
            secondary,
            msg_sent: Queue::new(),
            msg_recv: Queue::new(),
            shutdown: AtomicBool::new(false),
            status: AtomicBool::new(false),
            primary_handle: Mutex::new(None),
            secondary_handles: Mutex::new(Vec::new()),
        }))
    }

    pub fn secondary_queue_count(&self) -> usize {
        self.secondary.len()
    }

    /// Spawns the primary and every secondary executor thread.
    pub fn start(self: &Arc<Self>) {
        if self.status.swap(true, Ordering::AcqRel) {
            return; // already started
        }
        let board = self.clone();
        let handle = std::thread::spawn(move || run_executor(board, ExecutorKind::Primary));
        *self.primary_handle.lock() = Some(handle);

        let mut handles = Vec::with_capacity(self.secondary.len());
        for i in 0..self.secondary.len() {
            let board = self.clone();
            handles.push(std::thread::spawn(move || {
                run_executor(board, ExecutorKind::Secondary(i))
            }));
        }
        *self.secondary_handles.lock() = handles;
        info!("task board started with {} secondary queues", self.secondary.len());
    }

    /// Flags shutdown and wakes every queue's waiter, then returns
    /// immediately. Does not wait for any executor thread to actually
    /// exit -- that happens in `destroy`, which must be called afterward
    /// (on any thread) to reclaim them.
    pub fn kill(&self) -> bool {
        if !self.status.load(Ordering::Acquire) {
            return false;
        }
        self.shutdown.store(true, Ordering::Release);

        self.primary.signal();
        for q in &self.secondary {
            q.signal();
        }

        debug!("task board kill signaled shutdown");
        true
    }

    /// Joins every executor thread (each exits once it observes
    /// `shutdown`), then drains every queue and subsystem.
    pub fn destroy(self: &Arc<Self>) {
        if let Some(h) = self.primary_handle.lock().take() {
            let _ = h.join();
        }
        for h in self.secondary_handles.lock().drain(..) {
            let _ = h.join();
        }

        self.primary.drain_with(|entry| dispose(entry));
        for q in &self.secondary {
            q.drain_with(|entry| dispose(entry));
        }
        self.msg_sent.drain_with(|_| {});
        self.msg_recv.drain_with(|_| {});

        self.inner.history.record(TaskId(0), HistoryEvent::Aborted, now_us());
        self.inner.registry.destroy();
        self.inner.pending_remote.lock().clear();
        self.inner.sleeping_tasks.lock().clear();
        for (_token, waiters) in self.inner.slot_waiters.lock().drain() {
            for (task, _queue_index) in waiters {
                drop(task);
            }
        }
        self.inner.slot_open.lock().clear();
    }

    // -- concurrency counters --

    pub fn get_concurrent(&self) -> i64 {
        self.inner.task_count.load(Ordering::Acquire)
    }

    pub fn inc_concurrent(&self) {
        self.inner.task_count.fetch_add(1, Ordering::AcqRel);
    }

    pub fn dec_concurrent(&self) {
        let prev = self.inner.task_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(
            prev > 0,
            "task_count went negative: prior value was {prev}"
        );
    }

    /// Returns `true` (and increments) if there is room for one more
    /// concurrent task, `false` otherwise.
    pub fn add_concurrent(&self) -> bool {
        loop {
            let current = self.inner.task_count.load(Ordering::Acquire);
            if current >= MAX_TASKS {
                return false;
            }
            if self
                .inner
                .task_count
                .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return true;
            }
        }
    }

    // -- function registry --

    pub fn register_function(&self, descriptor: FunctionDescriptor) {
        self.inner.registry.register(descriptor);
    }

    pub fn find_function(&self, name: &str) -> Option<FunctionDescriptor> {
        self.inner.registry.find(name)
    }

    // -- task submission --

    fn next_task_id(&self) -> TaskId {
        TaskId(self.inner.next_task_id.fetch_add(1, Ordering::Relaxed) as u64)
    }

    pub fn next_remote_id(&self) -> RemoteId {
        RemoteId(self.inner.next_remote_id.fetch_add(1, Ordering::Relaxed) as u64)
    }

    /// Spawns and enqueues a task running `fn_name` with the given args,
    /// on the primary queue if `queue` is `None`, else on secondary
    /// queue `queue`.
    pub fn submit(
        &self,
        fn_name: &str,
        args: TaskArgs,
        queue: Option<usize>,
    ) -> Result<TaskId, Error> {
        let descriptor = self.find_function(fn_name).ok_or_else(|| {
            Error::new(ErrorKind::Protocol, format!("no such function: {fn_name}"))
        })?;
        if args.arity != descriptor.arity() {
            return Err(Error::new(
                ErrorKind::Protocol,
                format!(
                    "ARGUMENT ERROR: {fn_name} expects {} args, got {}",
                    descriptor.arity(),
                    args.arity
                ),
            ));
        }
        if !self.add_concurrent() {
            return Err(Error::new(
                ErrorKind::ResourceExhausted,
                "task board at MAX_TASKS concurrent tasks",
            ));
        }

        let id = self.next_task_id();
        let callable = descriptor.callable.clone();
        let coroutine = Coroutine::new(crate::coroutine::DEFAULT_STACK_SIZE, args.clone(), move |_y| {
            callable(args)
        });
        let task_type = match queue {
            None => TaskType::Primary,
            Some(i) => TaskType::Secondary(i),
        };
        let task = Task::new(id, task_type, Some(descriptor), coroutine);

        self.inner.history.record(id, HistoryEvent::Enqueued, now_us());
        match queue {
            None => self.primary.enqueue(QueueEntry::Task(task)),
            Some(i) => {
                let q = self.secondary.get(i).ok_or_else(|| {
                    Error::new(ErrorKind::Configuration, format!("no such secondary queue {i}"))
                })?;
                q.enqueue(QueueEntry::Task(task));
            }
        }
        Ok(id)
    }

    // -- remote calls --

    pub fn register_remote_call(
        &self,
        parent_task: Option<TaskId>,
        deadline_abs_us: i64,
    ) -> RemoteId {
        let id = self.next_remote_id();
        let record = RemoteTaskRecord::new(id, parent_task, deadline_abs_us);
        self.inner
            .pending_remote
            .lock()
            .insert(id, PendingRemote { record, parked: None });
        self.inner
            .wheel
            .add(EventKind::RexecTimeout(id), deadline_abs_us);
        id
    }

    /// Applies a bare `REXEC-ACK`: `sent -> acked` only, no reply, no
    /// wake. Acknowledging a call means the peer has it, not that the
    /// call is done, so -- unlike [`Self::resolve_remote_call`] -- this
    /// never touches the timer or the blocked-task table. Returns `false`
    /// if the call was not in `sent` (a duplicate ACK).
    pub fn ack_remote_call(&self, id: RemoteId) -> bool {
        match self.inner.pending_remote.lock().get_mut(&id) {
            Some(pending) => pending.record.ack(),
            None => {
                warn!("ack_remote_call: unknown remote id {id:?}");
                false
            }
        }
    }

    /// Resolves a pending remote call to a terminal-intermediate state,
    /// cancels its timeout (idempotently), and wakes its parent task if
    /// it has one. Returns `false` if the call was already resolved (a
    /// late duplicate).
    pub fn resolve_remote_call(
        &self,
        id: RemoteId,
        next: RemoteState,
        reply: Option<Vec<u8>>,
    ) -> bool {
        let mut table = self.inner.pending_remote.lock();
        let Some(pending) = table.get_mut(&id) else {
            warn!("resolve_remote_call: unknown remote id {id:?}");
            return false;
        };
        if !pending.record.transition(next, reply) {
            return false;
        }
        self.inner.wheel.delete_by_id(id);
        let woken = pending.parked.take();
        drop(table);

        if let Some((task, queue_index)) = woken {
            match queue_index {
                None => self.primary.enqueue(QueueEntry::Task(task)),
                Some(i) => self.secondary[i].enqueue(QueueEntry::Task(task)),
            }
        }
        true
    }

    /// Parks a task that just yielded `BlockedOnRemote(id)`, to be handed
    /// back to `queue_index`'s queue (`None` = primary) once
    /// `resolve_remote_call` fires for `id`. Called only by the executor
    /// worker that resumed it (C8 step 7).
    ///
    /// Checks the call's state under the same `pending_remote` lock
    /// `resolve_remote_call` transitions it under, so there is no window
    /// between "check" and "park" for a racing reply to land in: if the
    /// call already resolved (or its id is gone outright) by the time the
    /// worker reaches this call, the task is handed straight back to its
    /// queue instead of being parked with nothing left to ever wake it.
    pub(crate) fn park_blocked(&self, id: RemoteId, task: Task, queue_index: Option<usize>) {
        {
            let mut table = self.inner.pending_remote.lock();
            if let Some(pending) = table.get_mut(&id) {
                if !pending.record.state.can_complete() && !pending.record.is_terminal() {
                    pending.parked = Some((task, queue_index));
                    return;
                }
            }
        }
        match queue_index {
            None => self.primary.enqueue(QueueEntry::Task(task)),
            Some(i) => self.secondary[i].enqueue(QueueEntry::Task(task)),
        }
    }

    /// Parks a task that just yielded `Sleeping(until_us)`, to be handed
    /// back to `queue_index`'s queue (`None` = primary) once the wheel
    /// fires its `BeginSleep` entry.
    pub(crate) fn park_sleeping(&self, task: Task, queue_index: Option<usize>, until_us: i64) {
        let id = task.id;
        self.inner
            .sleeping_tasks
            .lock()
            .insert(id, (task, queue_index));
        self.inner.wheel.add(EventKind::BeginSleep(id), until_us);
    }

    /// True if schedule token `token`'s real-time/synchronous slot is
    /// currently open. Unopened and closed tokens both read as `false`.
    pub fn is_slot_open(&self, token: ScheduleToken) -> bool {
        self.inner.slot_open.lock().get(&token).copied().unwrap_or(false)
    }

    /// Parks a task that just yielded `WaitingOnSlot(token)`, to be handed
    /// back to `queue_index`'s queue (`None` = primary) once the wheel
    /// fires a matching `rt_schedule`/`sy_schedule` entry. Called only by
    /// the executor worker that resumed it, and only when the slot is not
    /// already open.
    pub(crate) fn park_on_slot(&self, token: ScheduleToken, task: Task, queue_index: Option<usize>) {
        self.inner
            .slot_waiters
            .lock()
            .entry(token)
            .or_default()
            .push((task, queue_index));
    }

    /// Arms a real-time execution slot: opens `token` at `open_at_us`
    /// (`rt_schedule`) and closes it again at `close_at_us` (`rt_close`),
    /// per spec's event table ("open a real-time slot: signal readiness;
    /// arm matching close").
    pub fn schedule_rt_slot(&self, token: ScheduleToken, open_at_us: i64, close_at_us: i64) {
        self.inner.wheel.add(EventKind::RtSchedule(token), open_at_us);
        self.inner.wheel.add(EventKind::RtClose(token), close_at_us);
    }

    /// Arms a synchronous execution slot: opens `token` at `open_at_us`
    /// (`sy_schedule`). Unlike the real-time case, the source's event
    /// kinds have no matching "sy close" -- a synchronous slot, once open,
    /// stays open until some later event closes it by other means.
    pub fn schedule_sy_slot(&self, token: ScheduleToken, open_at_us: i64) {
        self.inner.wheel.add(EventKind::SySchedule(token), open_at_us);
    }

    /// Opens `token`'s slot (`rt_schedule`/`sy_schedule` firing): marks it
    /// open and wakes every task parked awaiting it.
    fn open_slot(&self, token: ScheduleToken) {
        self.inner.slot_open.lock().insert(token, true);
        let waiters = self.inner.slot_waiters.lock().remove(&token).unwrap_or_default();
        for (task, queue_index) in waiters {
            match queue_index {
                None => self.primary.enqueue(QueueEntry::Task(task)),
                Some(i) => self.secondary[i].enqueue(QueueEntry::Task(task)),
            }
        }
    }

    /// Closes `token`'s slot (`rt_close` firing): rejects further
    /// real-time dispatch for it until the next open. Does not wake
    /// anyone -- closing only ever narrows what is allowed to run.
    fn close_slot(&self, token: ScheduleToken) {
        self.inner.slot_open.lock().insert(token, false);
    }

    pub fn complete_remote_call(&self, id: RemoteId) -> bool {
        let mut table = self.inner.pending_remote.lock();
        match table.get_mut(&id) {
            Some(pending) if pending.record.complete() => {
                table.remove(&id);
                true
            }
            _ => false,
        }
    }

    pub fn pending_remote_count(&self) -> usize {
        self.inner.pending_remote.lock().len()
    }

    /// True if `id` is still outstanding in the pending-remote table. Used
    /// by a `REXEC-ASY-CBK` arrival to match its `actarg` against an
    /// earlier `local_async_call` before scheduling anything for it.
    pub fn has_pending_remote(&self, id: RemoteId) -> bool {
        self.inner.pending_remote.lock().contains_key(&id)
    }

    /// Fetches a remote call's terminal-intermediate state and reply
    /// payload and advances it the rest of the way to `completed`,
    /// removing it from the pending table once the terminal transition has
    /// been observed by the parent. Returns `None` if the call is still
    /// `sent` (the waiting task should not have been woken yet) or was
    /// already completed by a racing observer.
    pub fn take_remote_result(&self, id: RemoteId) -> Option<(RemoteState, Option<Vec<u8>>)> {
        let mut table = self.inner.pending_remote.lock();
        let pending = table.get_mut(&id)?;
        if !pending.record.state.can_complete() {
            return None;
        }
        let state = pending.record.state;
        let reply = pending.record.reply.clone();
        pending.record.complete();
        table.remove(&id);
        Some((state, reply))
    }

    /// Public task-board API: issues a `REXEC-SYN`
    /// request and blocks the calling task until a terminal reply arrives
    /// or `timeout_us` elapses. Must be called from inside a running
    /// task's own coroutine body -- it suspends via
    /// [`crate::block_on_remote`], which panics outside one.
    pub fn remote_sync_call(
        &self,
        level: &str,
        name: &str,
        signature: &str,
        serialized_args: Vec<u8>,
        timeout_us: i64,
    ) -> (RemoteState, Option<Vec<u8>>) {
        let id = self.register_remote_call(None, now_us() + timeout_us);
        let mut cmd = Command::new(CommandKind::RexecSyn, name);
        cmd.actid = Some(id.0);
        cmd.opt = signature.to_string();
        cmd.level = Some(level.to_string());
        cmd.payload = serialized_args;
        self.outgoing(cmd);

        crate::block_on_remote(id);

        self.take_remote_result(id)
            .unwrap_or((RemoteState::TimedOut, None))
    }

    /// Public task-board API: fires off a `REXEC-ASY`
    /// request without blocking the calling task. Registers `id` in the
    /// pending-remote table (so a later `REXEC-ASY-CBK` can be matched
    /// against it via `actarg`) without arming a parent task to wake --
    /// the caller does not wait on it -- and cancels itself after
    /// `timeout_us` if no callback ever arrives.
    pub fn local_async_call(
        &self,
        level: &str,
        name: &str,
        arity: usize,
        serialized_args: Vec<u8>,
        timeout_us: i64,
    ) -> RemoteId {
        let id = self.register_remote_call(None, now_us() + timeout_us);
        let mut cmd = Command::new(CommandKind::RexecAsy, name);
        cmd.actid = Some(id.0);
        cmd.actarg = Some(id.0.to_string());
        cmd.opt = arity.to_string();
        cmd.level = Some(level.to_string());
        cmd.payload = serialized_args;
        self.outgoing(cmd);
        id
    }

    /// Removes `id` from the pending-remote table and cancels its timeout
    /// outright, regardless of state. Used once a matched `REXEC-ASY-CBK`
    /// has run to completion: the callback arriving is itself the
    /// terminal event for a fire-and-forget async call, and no parent task
    /// is ever blocked waiting to take its result via
    /// [`Self::take_remote_result`].
    pub fn dispose_pending_remote(&self, id: RemoteId) {
        self.inner.pending_remote.lock().remove(&id);
        self.inner.wheel.delete_by_id(id);
    }

    /// Drains every expired timer entry (called by the primary executor
    /// between queue pops).
    pub fn drain_expired_timers(&self) {
        while let Some(entry) = self.inner.wheel.get_next() {
            match entry.kind {
                EventKind::RexecTimeout(id) => {
                    self.resolve_remote_call(id, RemoteState::TimedOut, None);
                }
                EventKind::BeginSleep(task_id) => {
                    if let Some((task, queue_index)) =
                        self.inner.sleeping_tasks.lock().remove(&task_id)
                    {
                        match queue_index {
                            None => self.primary.enqueue(QueueEntry::Task(task)),
                            Some(i) => self.secondary[i].enqueue(QueueEntry::Task(task)),
                        }
                    }
                }
                EventKind::RtSchedule(token) | EventKind::SySchedule(token) => {
                    self.open_slot(token);
                }
                EventKind::RtClose(token) => {
                    self.close_slot(token);
                }
                EventKind::InstallSchedule(_) => {
                    // Promoting a schedule table (which table becomes
                    // active) has no consumer in this port -- there is no
                    // schedule-table data structure here, only the rt/sy
                    // slot open/close mechanics above, which is all the
                    // task board itself needs. See DESIGN.md C2.
                }
            }
        }
    }

    pub fn history(&self) -> &History {
        &self.inner.history
    }

    pub(crate) fn primary_queue(&self) -> &Queue<QueueEntry> {
        &self.primary
    }

    pub(crate) fn secondary_queue(&self, i: usize) -> &Queue<QueueEntry> {
        &self.secondary[i]
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub fn outgoing(&self, cmd: Command) {
        self.msg_sent.enqueue(cmd);
    }

    pub fn incoming(&self, cmd: Command) {
        self.msg_recv.enqueue(cmd);
    }

    pub fn msg_recv_queue(&self) -> &Queue<Command> {
        &self.msg_recv
    }

    pub fn msg_sent_queue(&self) -> &Queue<Command> {
        &self.msg_sent
    }
}

fn dispose(entry: QueueEntry) {
    match entry {
        QueueEntry::Task(task) => drop(task),
    }
}
