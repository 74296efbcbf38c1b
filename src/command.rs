//! Wire command envelope and codec (C6 external interface).
//!
//! A concrete wire format isn't specified by the external interface
//! contract, but a round-trip property needs a real codec to test
//! against, so this uses `serde`/`serde_json` (see DESIGN.md). Field
//! names (`cmd`/`opt`/`actarg`/`actid`/`actname`/`payload`) match the
//! external interface table so the mapping stays obvious.

use serde::{Deserialize, Serialize};

/// The command verb, one entry per row of the external interface table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommandKind {
    RexecAsy,
    RexecSyn,
    RexecAsyCbk,
    RexecAck,
    RexecNak,
    RexecRes,
    RexecErr,
}

/// A single wire message exchanged between a board and its bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub cmd: CommandKind,
    pub opt: String,
    pub actarg: Option<String>,
    pub actid: Option<u64>,
    pub actname: String,
    pub payload: Vec<u8>,
    /// Messaging tier this command targets (device/fog/cloud), set by
    /// `TaskBoard::remote_sync_call`/`local_async_call`'s `level`
    /// argument. Not present on the source's
    /// `command_t`; a `PublishPolicy` may use it to publish to one tier
    /// instead of the default fan-out-all.
    #[serde(default)]
    pub level: Option<String>,
}

impl Command {
    pub fn new(cmd: CommandKind, actname: impl Into<String>) -> Self {
        Self {
            cmd,
            opt: String::new(),
            actarg: None,
            actid: None,
            actname: actname.into(),
            level: None,
            payload: Vec::new(),
        }
    }
}

/// Abstracts the wire encoding so a transport (the bridge) doesn't need
/// to know which serialization is in use.
pub trait Codec: Send + Sync {
    fn encode(&self, cmd: &Command) -> Result<Vec<u8>, String>;
    fn decode(&self, bytes: &[u8]) -> Result<Command, String>;
}

/// The default codec: JSON, matching `serde_json`'s use elsewhere in the
/// broader example pack for ad hoc message envelopes.
#[derive(Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, cmd: &Command) -> Result<Vec<u8>, String> {
        serde_json::to_vec(cmd).map_err(|e| e.to_string())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Command, String> {
        serde_json::from_slice(bytes).map_err(|e| e.to_string())
    }
}
