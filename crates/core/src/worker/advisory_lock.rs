//! Process-wide advisory locks.
//!
//! Exclusive, non-blocking, keyed by name. Re-entrant acquisition is not
//! allowed: a second `try_acquire` on the same name fails until the first
//! holder releases.

use std::collections::HashSet;
use std::sync::Mutex;

use once_cell::sync::Lazy;

static HELD: Lazy<Mutex<HashSet<String>>> = Lazy::new(|| Mutex::new(HashSet::new()));

pub struct AdvisoryLock {
    name: String,
    held: bool,
}

impl AdvisoryLock {
    pub fn new(scope: &str, name: &str) -> Self {
        Self {
            name: format!("{}:{}", scope, name),
            held: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Try to take the lock. Returns `false` when another holder has it.
    pub fn try_acquire(&mut self) -> bool {
        if self.held {
            return false;
        }
        let mut held = HELD.lock().unwrap_or_else(|e| e.into_inner());
        if held.insert(self.name.clone()) {
            self.held = true;
            true
        } else {
            false
        }
    }

    /// Release the lock. Returns `false` if it was not held.
    pub fn release(&mut self) -> bool {
        if !self.held {
            return false;
        }
        let mut held = HELD.lock().unwrap_or_else(|e| e.into_inner());
        held.remove(&self.name);
        self.held = false;
        true
    }
}

impl Drop for AdvisoryLock {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exclusive_acquire() {
        let mut first = AdvisoryLock::new("test", "exclusive-acquire");
        let mut second = AdvisoryLock::new("test", "exclusive-acquire");

        assert!(first.try_acquire());
        assert!(!second.try_acquire());

        assert!(first.release());
        assert!(second.try_acquire());
        assert!(second.release());
    }

    #[test]
    fn test_no_reentrant_acquire() {
        let mut lock = AdvisoryLock::new("test", "no-reentrant");
        assert!(lock.try_acquire());
        assert!(!lock.try_acquire());
        assert!(lock.release());
        assert!(!lock.release());
    }

    #[test]
    fn test_release_on_drop() {
        {
            let mut lock = AdvisoryLock::new("test", "drop-release");
            assert!(lock.try_acquire());
        }
        let mut lock = AdvisoryLock::new("test", "drop-release");
        assert!(lock.try_acquire());
    }

    #[test]
    fn test_different_names_are_independent() {
        let mut a = AdvisoryLock::new("test", "independent-a");
        let mut b = AdvisoryLock::new("test", "independent-b");
        assert!(a.try_acquire());
        assert!(b.try_acquire());
    }
}
