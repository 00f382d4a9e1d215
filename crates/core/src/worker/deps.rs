//! Cross-worker dependency table.
//!
//! A single mutex-guarded map from worker name to a running flag. Workers
//! mark themselves in `on_start`/`on_end`; dependents build their
//! `should_wait` check from [`WorkerDependencyTable::wait_reason`], which
//! reports the first named antecedent that is still running.

use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
pub struct WorkerDependencyTable {
    running: Mutex<HashMap<String, bool>>,
}

impl WorkerDependencyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_running(&self, name: &str, running: bool) {
        let mut map = self.running.lock().unwrap_or_else(|e| e.into_inner());
        map.insert(name.to_string(), running);
    }

    pub fn is_running(&self, name: &str) -> bool {
        let map = self.running.lock().unwrap_or_else(|e| e.into_inner());
        map.get(name).copied().unwrap_or(false)
    }

    /// The wait reason if any of `names` is currently running.
    pub fn wait_reason(&self, names: &[&str]) -> Option<String> {
        let map = self.running.lock().unwrap_or_else(|e| e.into_inner());
        names
            .iter()
            .find(|name| map.get(**name).copied().unwrap_or(false))
            .map(|name| format!("{} is running", name))
    }
}
