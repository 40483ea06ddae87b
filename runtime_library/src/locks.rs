//! Per-thread state: held monitors and the re-entrancy flag, keyed by thread
//! id.

use std::thread::ThreadId;

use hashbrown::{HashMap, HashSet};
use parking_lot::Mutex;

/// Identities of the monitors a thread holds.
pub type LockSet = HashSet<usize>;

#[derive(Debug, Default)]
struct ThreadState {
    /// Monitor identity -> hold count. Monitors are re-entrant, so a lock
    /// stays held until it has been exited as often as it was entered.
    held: HashMap<usize, usize>,
    in_monitor: bool,
}

impl ThreadState {
    fn is_idle(&self) -> bool {
        self.held.is_empty() && !self.in_monitor
    }
}

#[derive(Debug, Default)]
pub struct ThreadRegistry {
    threads: Mutex<HashMap<ThreadId, ThreadState>>,
}

impl ThreadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `thread` as inside the monitor. Returns `None` if it already is,
    /// i.e. the monitor's own bookkeeping caused the call.
    pub fn enter(&self, thread: ThreadId) -> Option<ReentrancyGuard<'_>> {
        let mut threads = self.threads.lock();
        let state = threads.entry(thread).or_default();
        if state.in_monitor {
            return None;
        }
        state.in_monitor = true;
        Some(ReentrancyGuard {
            registry: self,
            thread,
        })
    }

    pub fn add_lock(&self, thread: ThreadId, lock: usize) {
        let mut threads = self.threads.lock();
        *threads
            .entry(thread)
            .or_default()
            .held
            .entry(lock)
            .or_insert(0) += 1;
    }

    /// Exits one hold of `lock`. Unbalanced exits are ignored.
    pub fn remove_lock(&self, thread: ThreadId, lock: usize) {
        let mut threads = self.threads.lock();
        let Some(state) = threads.get_mut(&thread) else {
            return;
        };
        if let Some(count) = state.held.get_mut(&lock) {
            *count -= 1;
            if *count == 0 {
                state.held.remove(&lock);
            }
        }
        if state.is_idle() {
            threads.remove(&thread);
        }
    }

    /// Snapshot of the monitors `thread` currently holds.
    pub fn lock_set(&self, thread: ThreadId) -> LockSet {
        self.threads
            .lock()
            .get(&thread)
            .map(|state| state.held.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Threads with held locks or an active monitor call.
    pub fn tracked_threads(&self) -> usize {
        self.threads.lock().len()
    }

    fn leave(&self, thread: ThreadId) {
        let mut threads = self.threads.lock();
        if let Some(state) = threads.get_mut(&thread) {
            state.in_monitor = false;
            if state.is_idle() {
                threads.remove(&thread);
            }
        }
    }
}

/// Clears the thread's in-monitor flag when dropped.
#[derive(Debug)]
pub struct ReentrancyGuard<'a> {
    registry: &'a ThreadRegistry,
    thread: ThreadId,
}

impl Drop for ReentrancyGuard<'_> {
    fn drop(&mut self) {
        self.registry.leave(self.thread);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reentrant_monitor_needs_matching_exits() {
        let registry = ThreadRegistry::new();
        let me = std::thread::current().id();
        registry.add_lock(me, 7);
        registry.add_lock(me, 7);
        registry.add_lock(me, 9);
        registry.remove_lock(me, 7);
        assert_eq!(registry.lock_set(me), LockSet::from_iter([7, 9]));
        registry.remove_lock(me, 7);
        registry.remove_lock(me, 9);
        assert!(registry.lock_set(me).is_empty());
        assert_eq!(registry.tracked_threads(), 0);
    }

    #[test]
    fn unbalanced_exit_is_ignored() {
        let registry = ThreadRegistry::new();
        let me = std::thread::current().id();
        registry.remove_lock(me, 1);
        registry.add_lock(me, 2);
        registry.remove_lock(me, 1);
        assert_eq!(registry.lock_set(me), LockSet::from_iter([2]));
    }

    #[test]
    fn nested_enter_is_refused_until_guard_drops() {
        let registry = ThreadRegistry::new();
        let me = std::thread::current().id();
        let guard = registry.enter(me);
        assert!(guard.is_some());
        assert!(registry.enter(me).is_none());

        let other = std::thread::spawn(|| std::thread::current().id()).join().unwrap();
        assert!(registry.enter(other).is_some());

        drop(guard);
        assert!(registry.enter(me).is_some());
        assert_eq!(registry.tracked_threads(), 0);
    }
}
