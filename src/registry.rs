//! Function registry (C3).
//!
//! Maps a unique name to a callable entry point, its signature string, and
//! a side-effect flag. Registration happens at startup; steady state is
//! read-only, so an `RwLock` over `rustc_hash::FxHashMap` gives
//! effectively wait-free lookups once registration quiesces.

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::task::TaskArgs;

/// A registered function: takes the task's argument block, returns a
/// boxed result or an error message on failure. Side effects, if any, are
/// the registrant's responsibility; `side_effects` only documents intent
/// (used by the bridge's condition-predicate path to decide idempotent
/// retries).
pub type Callable = Arc<dyn Fn(TaskArgs) -> Result<Vec<u8>, String> + Send + Sync>;

#[derive(Clone)]
pub struct FunctionDescriptor {
    pub name: String,
    pub callable: Callable,
    pub signature: String,
    pub side_effects: bool,
}

impl std::fmt::Debug for FunctionDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionDescriptor")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .field("side_effects", &self.side_effects)
            .finish()
    }
}

impl FunctionDescriptor {
    /// Number of comma-separated parameters the signature string encodes,
    /// used by the bridge to validate `REXEC-*` argument counts before
    /// scheduling.
    pub fn arity(&self) -> usize {
        if self.signature.is_empty() {
            0
        } else {
            self.signature.split(',').count()
        }
    }
}

#[derive(Default)]
pub struct FunctionRegistry {
    entries: RwLock<FxHashMap<String, FunctionDescriptor>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Duplicate names overwrite.
    pub fn register(&self, descriptor: FunctionDescriptor) {
        self.entries
            .write()
            .insert(descriptor.name.clone(), descriptor);
    }

    pub fn find(&self, name: &str) -> Option<FunctionDescriptor> {
        self.entries.read().get(name).cloned()
    }

    /// Frees every entry. After this call, `find` returns `None` for any
    /// previously-registered name.
    pub fn destroy(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_fn() -> FunctionDescriptor {
        FunctionDescriptor {
            name: "ping".to_string(),
            callable: Arc::new(|_args| Ok(b"pong".to_vec())),
            signature: "".to_string(),
            side_effects: false,
        }
    }

    #[test]
    fn register_then_find() {
        let reg = FunctionRegistry::new();
        reg.register(noop_fn());
        assert!(reg.find("ping").is_some());
        assert!(reg.find("pong").is_none());
    }

    #[test]
    fn destroy_clears_registry() {
        let reg = FunctionRegistry::new();
        reg.register(noop_fn());
        reg.destroy();
        assert!(reg.find("ping").is_none());
    }

    #[test]
    fn duplicate_names_overwrite() {
        let reg = FunctionRegistry::new();
        reg.register(noop_fn());
        let mut second = noop_fn();
        second.signature = "i,i".to_string();
        reg.register(second);
        assert_eq!(reg.find("ping").unwrap().arity(), 2);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn arity_counts_signature_params() {
        let mut f = noop_fn();
        f.signature = "i,s,f".to_string();
        assert_eq!(f.arity(), 3);
    }
}
