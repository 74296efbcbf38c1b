//! Bridge ingress (C9): MQTT-facing dispatch between the board and the
//! rest of a device/fog/cloud tier.
//!
//! Subscribes across up to three enabled tiers (device/fog/cloud) to
//! `/level/func/reply/#` and `/mach/func/request`; that fan-out is kept
//! as a [`PublishPolicy`] so the fan-out behavior -- a policy, not a
//! protocol law -- can be swapped without touching dispatch.
//!
//! Every reply helper takes the same `&Bridge` receiver (see DESIGN.md
//! for why that convention was picked).

use std::sync::Arc;

use log::{debug, error, warn};
use parking_lot::Mutex;

use crate::board::TaskBoard;
use crate::command::{Command, CommandKind};
use crate::error::{Error, ErrorKind};
use crate::remote::RemoteState;
use crate::task::TaskArgs;
use crate::timer_wheel::now_us;

/// Abstracts the MQTT client so dispatch logic is unit-testable without a
/// broker. A `rumqttc`-backed implementation is the production case
/// (see `src/mqtt.rs`, DESIGN.md).
pub trait MessagingClient: Send + Sync {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), Error>;
}

/// Decides which tiers a reply or outgoing call fans out to. The source
/// always publishes to every `mqttenabled` tier; that is a policy
/// decision rather than a protocol requirement, so it is injectable
/// here.
pub trait PublishPolicy: Send + Sync {
    fn topics_for(&self, cmd: &Command) -> Vec<String>;
}

/// Default policy: publish to every configured tier's reply topic,
/// matching the source's unconditional three-tier fan-out.
pub struct FanOutAll {
    pub tiers: Vec<String>,
}

impl PublishPolicy for FanOutAll {
    fn topics_for(&self, _cmd: &Command) -> Vec<String> {
        self.tiers
            .iter()
            .map(|tier| format!("/{tier}/func/reply"))
            .collect()
    }
}

/// Evaluates a `REXEC-SYN` condition string against current board state.
/// The source's quorum/condition check is left unspecified as a policy;
/// this is the injection point.
pub trait ConditionPredicate: Send + Sync {
    fn evaluate(&self, condition: &str) -> bool;

    /// Whether a `REXEC-SYN` carrying this condition must wait in the
    /// sync-task table for a peer quorum before it is scheduled, rather
    /// than taking the table's fast/empty path. Default: never requires a
    /// quorum.
    fn requires_quorum(&self, _condition: &str) -> bool {
        false
    }
}

/// Accepts every condition and never requires a quorum -- the default
/// when no quorum policy is configured.
pub struct AlwaysTrue;
impl ConditionPredicate for AlwaysTrue {
    fn evaluate(&self, _condition: &str) -> bool {
        true
    }
}

/// Mechanics-only holding area for `REXEC-SYN` commands awaiting a peer
/// quorum. *Whether* a quorum has been reached is
/// policy -- the JAM bridge thread's condition/quorum logic, explicitly
/// out of scope -- so this table only stores and
/// releases; a policy layer decides when to call [`SyncTaskTable::release_all`].
#[derive(Default)]
pub struct SyncTaskTable {
    pending: Mutex<Vec<Command>>,
}

impl SyncTaskTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, cmd: Command) {
        self.pending.lock().push(cmd);
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Drains every waiting command so the caller can schedule them, e.g.
    /// once a policy layer observes that a quorum of peers has responded.
    pub fn release_all(&self) -> Vec<Command> {
        std::mem::take(&mut *self.pending.lock())
    }
}

/// The bridge: owns the messaging client, publish policy, and condition
/// predicate, and dispatches incoming wire commands against a task
/// board.
pub struct Bridge {
    board: Arc<TaskBoard>,
    client: Box<dyn MessagingClient>,
    policy: Box<dyn PublishPolicy>,
    condition: Box<dyn ConditionPredicate>,
    sync_table: SyncTaskTable,
}

impl Bridge {
    pub fn new(
        board: Arc<TaskBoard>,
        client: Box<dyn MessagingClient>,
        policy: Box<dyn PublishPolicy>,
        condition: Box<dyn ConditionPredicate>,
    ) -> Self {
        Self {
            board,
            client,
            policy,
            condition,
            sync_table: SyncTaskTable::new(),
        }
    }

    pub fn sync_table(&self) -> &SyncTaskTable {
        &self.sync_table
    }

    /// Releases every `REXEC-SYN` command currently held in the sync-task
    /// table and schedules each as a local task. Called by a policy layer
    /// once it decides the waiting quorum has been satisfied; the decision
    /// itself is out of scope here.
    pub fn release_sync_quorum(&self) {
        for cmd in self.sync_table.release_all() {
            match self.check_args(&cmd) {
                Some(args) => self.run_local(&cmd, args),
                None => self.send_error(&cmd, "ARGUMENT ERROR"),
            }
        }
    }

    /// Dispatch table for every command kind an incoming message can
    /// carry.
    pub fn dispatch(&self, cmd: Command) {
        match cmd.cmd {
            CommandKind::RexecSyn => self.handle_rexec_syn(cmd),
            CommandKind::RexecAsy => self.handle_rexec_asy(cmd),
            CommandKind::RexecAsyCbk => self.handle_rexec_asy_cbk(cmd),
            CommandKind::RexecAck => self.handle_ack(cmd),
            CommandKind::RexecNak => self.handle_reply(cmd, RemoteState::Nak),
            CommandKind::RexecRes => self.handle_reply(cmd, RemoteState::Resulted),
            CommandKind::RexecErr => self.handle_reply(cmd, RemoteState::Failed),
        }
    }

    fn check_args(&self, cmd: &Command) -> Option<TaskArgs> {
        let descriptor = self.board.find_function(&cmd.actname)?;
        let arity = descriptor.arity();
        // The source re-derives arity from the payload's encoded arg
        // count; here the wire codec already carries a decoded count via
        // `TaskArgs`, so arity is just the payload length check against
        // the registered signature.
        Some(TaskArgs::new(cmd.payload.clone(), arity))
    }

    /// `REXEC-SYN` has a richer path than a bare `REXEC-ASY`: after
    /// signature and condition checks pass, a command that requires a
    /// quorum always waits in the sync table; otherwise it takes the fast
    /// path only while the table is empty, and joins the table alongside
    /// whatever else is already waiting if it is not.
    fn handle_rexec_syn(&self, cmd: Command) {
        let Some(args) = self.check_args(&cmd) else {
            self.send_error(&cmd, "ARGUMENT ERROR");
            return;
        };
        if !self.condition.evaluate(&cmd.opt) {
            self.send_nak(&cmd, "CONDITION FALSE");
            return;
        }
        if self.condition.requires_quorum(&cmd.opt) {
            self.sync_table.insert(cmd);
            return;
        }
        if self.sync_table.is_empty() {
            self.run_local(&cmd, args);
        } else {
            self.sync_table.insert(cmd);
        }
    }

    fn handle_rexec_asy(&self, cmd: Command) {
        let Some(args) = self.check_args(&cmd) else {
            self.send_error(&cmd, "ARGUMENT ERROR");
            return;
        };
        if !self.condition.evaluate(&cmd.opt) {
            self.send_nak(&cmd, "CONDITION FALSE");
            return;
        }
        self.run_local(&cmd, args);
    }

    /// A callback-style async call: unlike every other command, this one
    /// is matched against the pending-remote table by `cmd.actarg` before
    /// anything else happens. A match means some earlier `local_async_call`
    /// from this board is still waiting on it; no match means there is
    /// nothing local to deliver the callback to, so it is dropped without
    /// a reply of any kind -- not even `ARGUMENT ERROR`.
    fn handle_rexec_asy_cbk(&self, cmd: Command) {
        let Some(id) = cmd
            .actarg
            .as_deref()
            .and_then(|s| s.parse::<u64>().ok())
            .map(crate::remote::RemoteId)
        else {
            debug!("REXEC-ASY-CBK missing or non-numeric actarg, dropping");
            return;
        };
        if !self.board.has_pending_remote(id) {
            debug!("REXEC-ASY-CBK actarg {} has no matching pending call, dropping", id.0);
            return;
        }

        let Some(args) = self.check_args(&cmd) else {
            self.send_error(&cmd, "ARGUMENT ERROR");
            return;
        };
        if !self.condition.evaluate(&cmd.opt) {
            self.send_nak(&cmd, "CONDITION FALSE");
            return;
        }
        // The reply, once the task finishes, is routed back out keyed by
        // `actarg` rather than `actid`.
        self.run_local(&cmd, args);
        self.board.dispose_pending_remote(id);
    }

    fn run_local(&self, cmd: &Command, args: TaskArgs) {
        match self.board.submit(&cmd.actname, args, None) {
            Ok(_task_id) => debug!("dispatched {} for actid={:?}", cmd.actname, cmd.actid),
            Err(e) => {
                error!("failed to submit {}: {e}", cmd.actname);
                self.send_error(cmd, "ARGUMENT ERROR");
            }
        }
    }

    /// Handles a bare `REXEC-ACK`: quiet bookkeeping only, `sent -> acked`,
    /// no wake -- the call is merely acknowledged, not finished, so the
    /// parent task keeps waiting for the `REXEC-RES` (or nak/timeout/
    /// error) that actually resolves it.
    fn handle_ack(&self, cmd: Command) {
        let Some(actid) = cmd.actid else {
            warn!("REXEC-ACK missing actid");
            return;
        };
        let id = crate::remote::RemoteId(actid);
        if !self.board.ack_remote_call(id) {
            warn!("ack for unknown or already-acked remote call {actid}");
        }
    }

    /// Handles `REXEC-NAK`/`REXEC-RES`/`REXEC-ERR`: resolves the matching
    /// pending remote call by `actid` to a terminal-intermediate state and
    /// wakes its parent task.
    fn handle_reply(&self, cmd: Command, next: RemoteState) {
        let Some(actid) = cmd.actid else {
            warn!("reply command {:?} missing actid", cmd.cmd);
            return;
        };
        let id = crate::remote::RemoteId(actid);
        let reply = (!cmd.payload.is_empty()).then(|| cmd.payload.clone());
        if !self.board.resolve_remote_call(id, next, reply) {
            warn!("reply for unknown or already-resolved remote call {actid}");
        }
    }

    // -- reply helpers, all uniformly `&self` --

    pub fn send_error(&self, cmd: &Command, estr: &str) {
        let mut reply = Command::new(CommandKind::RexecErr, cmd.actname.clone());
        reply.actid = cmd.actid;
        reply.opt = estr.to_string();
        self.publish(&reply);
    }

    pub fn send_nak(&self, cmd: &Command, estr: &str) {
        let mut reply = Command::new(CommandKind::RexecNak, cmd.actname.clone());
        reply.actid = cmd.actid;
        reply.opt = estr.to_string();
        self.publish(&reply);
    }

    pub fn send_results(&self, actname: &str, actid: u64, payload: Vec<u8>) {
        let mut reply = Command::new(CommandKind::RexecRes, actname);
        reply.actid = Some(actid);
        reply.payload = payload;
        self.publish(&reply);
    }

    /// Encodes and fans `cmd` out to every tier the publish policy names.
    /// Used directly by the reply helpers and `send_request`, which run
    /// on the bridge's own thread and so can publish immediately rather
    /// than going through `msg_sent`, which is for commands a *task*
    /// originates and so has no direct handle to the client.
    fn publish(&self, cmd: &Command) {
        let codec = crate::command::JsonCodec;
        let bytes = match crate::command::Codec::encode(&codec, cmd) {
            Ok(b) => b,
            Err(e) => {
                error!("failed to encode outgoing command: {e}");
                return;
            }
        };
        for topic in self.policy.topics_for(cmd) {
            if let Err(e) = self.client.publish(&topic, &bytes) {
                error!("publish to {topic} failed: {e}");
            }
        }
    }

    /// Sentinel `opt` value a task-originated outgoing command can carry
    /// to mean "handle in-thread, do not publish."
    pub const LOCAL_MARKER: &'static str = "LOCAL";

    /// Drains the board's `msg_sent` queue and either no-ops (entries
    /// tagged [`Bridge::LOCAL_MARKER`]) or publishes each entry to every
    /// enabled tier. Tasks reach
    /// this queue through [`crate::board::TaskBoard::remote_sync_call`]/
    /// `local_async_call`, which have no direct handle to the messaging
    /// client. Call this from the same loop that drives `dispatch` on
    /// incoming commands.
    pub fn drain_outgoing(&self) {
        while let Some(cmd) = self.board.msg_sent_queue().pop_head() {
            if cmd.opt == Self::LOCAL_MARKER {
                debug!("local outgoing command {:?} for {}: no-op", cmd.cmd, cmd.actname);
                continue;
            }
            self.publish(&cmd);
        }
    }

    /// Sends a `REXEC-SYN`/`REXEC-ASY` request, registering a pending
    /// remote call with the given timeout.
    pub fn send_request(
        &self,
        kind: CommandKind,
        fn_name: &str,
        payload: Vec<u8>,
        timeout_us: i64,
    ) -> Result<crate::remote::RemoteId, Error> {
        if self.board.find_function(fn_name).is_none() {
            return Err(Error::new(
                ErrorKind::Protocol,
                format!("no such function registered locally: {fn_name}"),
            ));
        }
        let id = self
            .board
            .register_remote_call(None, now_us() + timeout_us);
        let mut cmd = Command::new(kind, fn_name);
        cmd.actid = Some(id.0);
        cmd.payload = payload;
        self.publish(&cmd);
        Ok(id)
    }
}
