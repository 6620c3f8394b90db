//! # Process registry: concurrent map of managed processes.
//!
//! Keyed by pid, backed by [`DashMap`] so every operation is an atomic per-key
//! step and no caller ever holds a registry-wide lock.
//!
//! ## Rules
//! - A pid appears at most once (`insert` is insert-if-absent).
//! - An entry leaves exactly once: whoever wins `remove` / `claim_all` /
//!   `remove_exited` for a key owns the teardown; everyone else sees `None`.
//! - Snapshots are copies; they never pin the map.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::process::ProcessRef;

/// Concurrent pid → process map.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    entries: DashMap<u32, ProcessRef>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Inserts `process` unless its pid is already registered.
    ///
    /// Returns false (and leaves the map untouched) on collision.
    pub(crate) fn insert(&self, process: ProcessRef) -> bool {
        match self.entries.entry(process.pid()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(process);
                true
            }
        }
    }

    /// Removes and returns the entry for `pid`.
    pub(crate) fn remove(&self, pid: u32) -> Option<ProcessRef> {
        self.entries.remove(&pid).map(|(_, p)| p)
    }

    pub(crate) fn get(&self, pid: u32) -> Option<ProcessRef> {
        self.entries.get(&pid).map(|r| r.value().clone())
    }

    pub(crate) fn contains(&self, pid: u32) -> bool {
        self.entries.contains_key(&pid)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy of every current entry, sorted by pid.
    pub(crate) fn snapshot(&self) -> Vec<ProcessRef> {
        let mut all: Vec<ProcessRef> = self.entries.iter().map(|r| r.value().clone()).collect();
        all.sort_unstable_by_key(|p| p.pid());
        all
    }

    /// Removes every entry present right now and returns the ones this call won.
    ///
    /// Concurrent callers partition the entries between them; entries inserted
    /// after the key scan stay registered.
    pub(crate) fn claim_all(&self) -> Vec<ProcessRef> {
        let pids: Vec<u32> = self.entries.iter().map(|r| *r.key()).collect();
        pids.into_iter().filter_map(|pid| self.remove(pid)).collect()
    }

    /// Removes the entries whose process has exited and returns them.
    pub(crate) fn remove_exited(&self) -> Vec<ProcessRef> {
        let exited: Vec<u32> = self
            .entries
            .iter()
            .filter(|r| r.value().has_exited())
            .map(|r| *r.key())
            .collect();
        exited
            .into_iter()
            .filter_map(|pid| {
                self.entries
                    .remove_if(&pid, |_, p| p.has_exited())
                    .map(|(_, p)| p)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    use crate::process::{ExitInfo, ManagedProcess, SpawnSpec};

    fn entry(pid: u32) -> ProcessRef {
        let (p, _tx) = ManagedProcess::new(pid, SpawnSpec::new("x"));
        Arc::new(p)
    }

    #[test]
    fn test_insert_if_absent() {
        let reg = Registry::new();
        assert!(reg.insert(entry(10)));
        assert!(!reg.insert(entry(10)));
        assert_eq!(reg.len(), 1);
        assert!(reg.contains(10));
    }

    #[test]
    fn test_remove_is_exactly_once() {
        let reg = Registry::new();
        reg.insert(entry(10));
        assert!(reg.remove(10).is_some());
        assert!(reg.remove(10).is_none());
        assert!(reg.is_empty());
    }

    #[test]
    fn test_claim_all_then_empty() {
        let reg = Registry::new();
        for pid in [3, 1, 2] {
            reg.insert(entry(pid));
        }
        let pids: Vec<u32> = reg.snapshot().iter().map(|p| p.pid()).collect();
        assert_eq!(pids, vec![1, 2, 3]);

        assert_eq!(reg.claim_all().len(), 3);
        assert!(reg.claim_all().is_empty());
        assert!(reg.is_empty());
    }

    #[test]
    fn test_concurrent_claims_partition() {
        let reg = Arc::new(Registry::new());
        for pid in 1..=200 {
            reg.insert(entry(pid));
        }

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let reg = reg.clone();
                std::thread::spawn(move || reg.claim_all().len())
            })
            .collect();
        let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

        assert_eq!(total, 200);
        assert!(reg.is_empty());
    }

    #[test]
    fn test_remove_exited_keeps_running() {
        let reg = Registry::new();
        let (running, _keep) = ManagedProcess::new(1, SpawnSpec::new("x"));
        let (exited, tx) = ManagedProcess::new(2, SpawnSpec::new("x"));
        tx.notify(ExitInfo {
            code: Some(0),
            signal: None,
            at: Instant::now(),
        });
        reg.insert(Arc::new(running));
        reg.insert(Arc::new(exited));

        let removed = reg.remove_exited();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].pid(), 2);
        assert!(reg.contains(1));
        assert!(reg.remove_exited().is_empty());
    }
}
