//! Process-wide registry of live subprocesses.
//!
//! Maps the session identifier published in the `Pid` frame to a kill
//! handle. Entries are inserted by the owning session once its supervisor
//! has started and removed by the same session at teardown; the kill
//! endpoint only ever reads.
//!
//! This is the only cross-session mutable state in the daemon. Critical
//! sections are plain map operations under a reader/writer lock.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use rce_core::session::SessionState;
use rce_core::supervisor::KillHandle;
use tracing::debug;

/// Identifier → kill-handle map shared by all sessions.
#[derive(Debug, Default)]
pub struct Registry {
    processes: RwLock<HashMap<String, KillHandle>>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the kill handle for an identifier.
    #[must_use]
    pub fn lookup(&self, id: &str) -> Option<KillHandle> {
        self.processes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Number of registered subprocesses.
    #[must_use]
    pub fn len(&self) -> usize {
        self.processes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&self, id: String, handle: KillHandle) {
        self.processes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, handle);
    }

    fn remove(&self, id: &str) {
        self.processes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }
}

/// A session's registry membership.
///
/// `try_set` is called after every outbound frame; it registers once the
/// session state exposes an identifier and a kill handle, and is a no-op
/// afterwards. `unset` (or dropping the guard) removes the entry.
#[derive(Debug)]
pub struct Registration {
    registry: Arc<Registry>,
    id: Option<String>,
}

impl Registration {
    /// A guard that has not registered anything yet.
    #[must_use]
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry, id: None }
    }

    /// Register the session's subprocess if it has one and is not yet
    /// registered. Idempotent.
    pub fn try_set(&mut self, state: &SessionState) {
        if self.id.is_some() {
            return;
        }
        let (Some(pid), Some(handle)) = (state.pid(), state.kill_handle()) else {
            return;
        };
        self.registry.insert(pid.to_string(), handle);
        debug!(id = %pid, "subprocess registered");
        self.id = Some(pid.to_string());
    }

    /// Remove the registration, if any. Idempotent.
    pub fn unset(&mut self) {
        if let Some(id) = self.id.take() {
            self.registry.remove(&id);
            debug!(id = %id, "subprocess unregistered");
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.unset();
    }
}
