//! Transient deadlock detector.
//!
//! Invoked only after a wait times out. Unlike the base transaction
//! module's `deadlock.rs` (which maintains its own `wait_for_graph` that
//! callers populate via `add_wait`/`remove_wait`), this detector never
//! caches an edge: it reconstructs the live wait-for graph on the spot by
//! walking each shard's current `owner`/`shared_owners` state and the
//! manager's `waiting_for` registry, exactly as the design calls for
//! ("never acquires more than one shard latch at a time and never
//! blocks"). A partial traversal that can't prove a cycle reports "none"
//! rather than stalling.

use std::collections::HashSet;

use crate::common::LockerId;

use super::manager::LockManager;
use super::record::LockKey;

pub struct DeadlockDetector<'a> {
    manager: &'a LockManager,
}

impl<'a> DeadlockDetector<'a> {
    pub fn new(manager: &'a LockManager) -> Self {
        Self { manager }
    }

    /// Looks for a cycle reaching back to `start`, which is currently
    /// waiting on `waiting_key`. Returns the participating lockers in
    /// traversal order (including `start`) if a cycle exists.
    pub fn find_cycle(&self, start: LockerId, waiting_key: &LockKey) -> Option<Vec<LockerId>> {
        let mut visited = HashSet::new();
        let mut path = Vec::new();
        visited.insert(start);
        self.walk(start, waiting_key, &mut visited, &mut path)
    }

    fn walk(
        &self,
        from: LockerId,
        key: &LockKey,
        visited: &mut HashSet<LockerId>,
        path: &mut Vec<LockerId>,
    ) -> Option<Vec<LockerId>> {
        path.push(from);
        for holder in self.manager.holders_of(key) {
            if holder == from {
                continue;
            }
            if holder == path[0] && path.len() > 1 {
                let mut cycle = path.clone();
                cycle.push(holder);
                return Some(cycle);
            }
            if !visited.insert(holder) {
                continue;
            }
            if let Some(next_key) = self.manager.waiting_target_of(holder) {
                if let Some(cycle) = self.walk(holder, &next_key, visited, path) {
                    return Some(cycle);
                }
            }
        }
        path.pop();
        None
    }
}
