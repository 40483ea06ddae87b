//! Last-writer bookkeeping per memory location.
//!
//! A location starts in the single-writer map. The first write that differs
//! from the recorded one in owner or lock set moves the location to the
//! conflict map, where every distinct writer is kept together with a
//! "common locks" set. A location is never in both maps at once.

use std::thread::ThreadId;

use hashbrown::HashMap;
use log::debug;

use crate::config::LockNarrowing;
use crate::locks::LockSet;
use crate::object::{object_identity, ObjectRef, WeakOwner};

/// Identity of a logical memory cell: owner identity plus field descriptor
/// (empty for array elements).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LocationKey {
    pub owner: usize,
    pub descriptor: String,
}

impl LocationKey {
    pub fn new(owner: usize, descriptor: &str) -> Self {
        Self {
            owner,
            descriptor: descriptor.to_owned(),
        }
    }
}

/// One recorded write. The lock set is a private snapshot and never changes
/// after creation.
#[derive(Debug, Clone)]
pub struct LastAccess {
    owner: WeakOwner,
    thread: ThreadId,
    locks: LockSet,
}

impl LastAccess {
    pub fn new(owner: &ObjectRef, thread: ThreadId, locks: LockSet) -> Self {
        Self {
            owner: WeakOwner::new(owner),
            thread,
            locks,
        }
    }
}

#[derive(Debug, Default)]
struct ConflictEntry {
    accesses: Vec<LastAccess>,
    common_locks: LockSet,
}

impl ConflictEntry {
    /// Appends `access`, replacing an earlier one by the same thread with the
    /// same locks. Keeps the list bounded by the distinct writer patterns.
    fn record(&mut self, access: LastAccess) {
        self.accesses
            .retain(|prior| !(prior.thread == access.thread && prior.locks == access.locks));
        self.accesses.push(access);
    }
}

/// What `TrackingTable::observe` did with a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// The recorded writer's owner was gone: dead entries were purged and the
    /// write was not recorded.
    Swept { removed: usize },
    /// Same owner and same locks as the single recorded writer; nothing
    /// changed. Carries the recorded thread when it is not the current one
    /// and neither write held a lock.
    Repeated { previous_thread: Option<ThreadId> },
    /// The write was recorded. `conflicts` lists threads of earlier writes to
    /// the same object under locks disjoint from the current ones.
    Recorded { conflicts: Vec<ThreadId> },
}

#[derive(Debug)]
pub struct TrackingTable {
    single: HashMap<LocationKey, LastAccess>,
    conflicts: HashMap<LocationKey, ConflictEntry>,
    narrowing: LockNarrowing,
    sweep_interval: usize,
    writes_since_sweep: usize,
}

impl TrackingTable {
    pub fn new(narrowing: LockNarrowing, sweep_interval: usize) -> Self {
        Self {
            single: HashMap::new(),
            conflicts: HashMap::new(),
            narrowing,
            sweep_interval,
            writes_since_sweep: 0,
        }
    }

    pub fn observe(&mut self, key: LocationKey, owner: &ObjectRef, thread: ThreadId, locks: &LockSet) -> Observation {
        self.writes_since_sweep += 1;
        if self.sweep_interval > 0 && self.writes_since_sweep >= self.sweep_interval {
            let removed = self.sweep();
            if removed > 0 {
                debug!("periodic sweep removed {} dead entries", removed);
            }
        }

        let identity = object_identity(owner);
        let mut graduated = false;
        if let Some(last) = self.single.get(&key) {
            if !last.owner.is_alive() {
                let removed = self.sweep();
                debug!("owner of {:?} is gone, swept {} dead entries", key, removed);
                return Observation::Swept { removed };
            }
            if last.owner.is_same(identity) && last.locks == *locks {
                let unguarded = last.thread != thread && locks.is_empty();
                let previous_thread = unguarded.then_some(last.thread);
                return Observation::Repeated { previous_thread };
            }
            if let Some(last) = self.single.remove(&key) {
                let entry = self.conflicts.entry(key.clone()).or_default();
                if entry.accesses.is_empty() {
                    entry.common_locks = locks.clone();
                } else {
                    entry.common_locks.retain(|lock| locks.contains(lock));
                }
                entry.accesses.push(last);
                graduated = true;
                debug!("{:?} now has more than one writer pattern", key);
            }
        }

        let current = LastAccess::new(owner, thread, locks.clone());
        let Some(entry) = self.conflicts.get_mut(&key) else {
            self.single.insert(key, current);
            return Observation::Recorded { conflicts: Vec::new() };
        };

        if self.narrowing == LockNarrowing::OnEveryWrite && !graduated {
            entry.common_locks.retain(|lock| locks.contains(lock));
        }
        let mut conflicts = Vec::new();
        if locks.is_disjoint(&entry.common_locks) {
            for prior in &entry.accesses {
                if prior.owner.is_same(identity) && prior.thread != thread && prior.locks.is_disjoint(locks) {
                    conflicts.push(prior.thread);
                }
            }
        }
        entry.record(current);
        Observation::Recorded { conflicts }
    }

    /// Drops every access whose owner is gone, and every location left
    /// without accesses. Returns the number of accesses removed.
    pub fn sweep(&mut self) -> usize {
        self.writes_since_sweep = 0;
        let mut removed = 0;
        self.single.retain(|_, last| {
            let alive = last.owner.is_alive();
            if !alive {
                removed += 1;
            }
            alive
        });
        self.conflicts.retain(|_, entry| {
            let before = entry.accesses.len();
            entry.accesses.retain(|access| access.owner.is_alive());
            removed += before - entry.accesses.len();
            !entry.accesses.is_empty()
        });
        removed
    }

    pub fn clear(&mut self) {
        self.single.clear();
        self.conflicts.clear();
        self.writes_since_sweep = 0;
    }

    pub fn single_keys(&self) -> usize {
        self.single.len()
    }

    pub fn conflict_keys(&self) -> usize {
        self.conflicts.len()
    }

    pub fn contains(&self, key: &LocationKey) -> bool {
        self.single.contains_key(key) || self.conflicts.contains_key(key)
    }

    pub fn is_conflicted(&self, key: &LocationKey) -> bool {
        self.conflicts.contains_key(key)
    }

    pub fn common_locks(&self, key: &LocationKey) -> Option<&LockSet> {
        self.conflicts.get(key).map(|entry| &entry.common_locks)
    }

    pub fn recorded_accesses(&self, key: &LocationKey) -> usize {
        match self.conflicts.get(key) {
            Some(entry) => entry.accesses.len(),
            None => usize::from(self.single.contains_key(key)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    fn other_thread() -> ThreadId {
        thread::spawn(|| thread::current().id()).join().unwrap()
    }

    fn locks(ids: &[usize]) -> LockSet {
        ids.iter().copied().collect()
    }

    fn setup() -> (TrackingTable, ObjectRef, LocationKey) {
        let owner: ObjectRef = Arc::new(0u64);
        let key = LocationKey::new(object_identity(&owner), "a.B.c");
        (TrackingTable::new(LockNarrowing::OnGraduation, 0), owner, key)
    }

    #[test]
    fn single_writer_never_conflicts() {
        let (mut table, owner, key) = setup();
        let me = thread::current().id();
        let patterns: [&[usize]; 4] = [&[], &[1], &[1, 2], &[]];
        for held in patterns {
            let observation = table.observe(key.clone(), &owner, me, &locks(held));
            match observation {
                Observation::Recorded { conflicts } => assert!(conflicts.is_empty()),
                Observation::Repeated { previous_thread } => assert_eq!(previous_thread, None),
                Observation::Swept { .. } => panic!("nothing is dead"),
            }
        }
        assert!(table.is_conflicted(&key));
        assert_eq!(table.single_keys(), 0);
        // [] twice collapses into one entry
        assert_eq!(table.recorded_accesses(&key), 3);
    }

    #[test]
    fn same_locks_from_another_thread_is_a_repeat() {
        let (mut table, owner, key) = setup();
        let me = thread::current().id();
        let other = other_thread();
        table.observe(key.clone(), &owner, other, &locks(&[3]));
        assert_eq!(
            table.observe(key.clone(), &owner, me, &locks(&[3])),
            Observation::Repeated { previous_thread: None }
        );
        assert_eq!(table.single_keys(), 1);

        let (mut bare, owner, key) = setup();
        bare.observe(key.clone(), &owner, other, &locks(&[]));
        assert_eq!(
            bare.observe(key.clone(), &owner, me, &locks(&[])),
            Observation::Repeated {
                previous_thread: Some(other)
            }
        );
    }

    #[test]
    fn graduation_sets_common_locks_from_current_write() {
        let (mut table, owner, key) = setup();
        let me = thread::current().id();
        let other = other_thread();
        table.observe(key.clone(), &owner, other, &locks(&[1, 2]));
        let observation = table.observe(key.clone(), &owner, me, &locks(&[2, 3]));
        // current locks are not disjoint from themselves
        assert_eq!(observation, Observation::Recorded { conflicts: vec![] });
        assert_eq!(table.common_locks(&key), Some(&locks(&[2, 3])));
        assert_eq!(table.conflict_keys(), 1);
        assert_eq!(table.single_keys(), 0);
    }

    #[test]
    fn unguarded_conflict_is_found() {
        let (mut table, owner, key) = setup();
        let me = thread::current().id();
        let other = other_thread();
        table.observe(key.clone(), &owner, other, &locks(&[1]));
        let observation = table.observe(key.clone(), &owner, me, &locks(&[]));
        assert_eq!(observation, Observation::Recorded { conflicts: vec![other] });
    }

    #[test]
    fn narrowing_on_every_write_shrinks_common_locks() {
        let owner: ObjectRef = Arc::new(0u64);
        let key = LocationKey::new(object_identity(&owner), "a.B.c");
        let mut table = TrackingTable::new(LockNarrowing::OnEveryWrite, 0);
        let me = thread::current().id();
        let other = other_thread();
        table.observe(key.clone(), &owner, other, &locks(&[1]));
        table.observe(key.clone(), &owner, me, &locks(&[1, 2]));
        assert_eq!(table.common_locks(&key), Some(&locks(&[1, 2])));
        table.observe(key.clone(), &owner, other, &locks(&[2, 5]));
        assert_eq!(table.common_locks(&key), Some(&locks(&[2])));

        let mut literal = TrackingTable::new(LockNarrowing::OnGraduation, 0);
        literal.observe(key.clone(), &owner, other, &locks(&[1]));
        literal.observe(key.clone(), &owner, me, &locks(&[1, 2]));
        literal.observe(key.clone(), &owner, other, &locks(&[2, 5]));
        assert_eq!(literal.common_locks(&key), Some(&locks(&[1, 2])));
    }

    #[test]
    fn dead_owner_triggers_sweep() {
        let (mut table, owner, key) = setup();
        let me = thread::current().id();
        let survivor: ObjectRef = Arc::new(1u64);
        let survivor_key = LocationKey::new(object_identity(&survivor), "a.B.c");
        table.observe(key.clone(), &owner, me, &locks(&[]));
        table.observe(survivor_key.clone(), &survivor, me, &locks(&[]));
        drop(owner);

        let replacement: ObjectRef = Arc::new(2u64);
        // same key reached through a stale identity
        assert_eq!(
            table.observe(key.clone(), &replacement, me, &locks(&[])),
            Observation::Swept { removed: 1 }
        );
        assert!(!table.contains(&key));
        assert!(table.contains(&survivor_key));
    }

    #[test]
    fn periodic_sweep_purges_unrelated_dead_entries() {
        let mut table = TrackingTable::new(LockNarrowing::OnGraduation, 2);
        let me = thread::current().id();
        let doomed: ObjectRef = Arc::new(0u8);
        let doomed_key = LocationKey::new(object_identity(&doomed), "x.Y.z");
        table.observe(doomed_key.clone(), &doomed, me, &locks(&[]));
        drop(doomed);
        assert!(table.contains(&doomed_key));

        let live: ObjectRef = Arc::new(1u8);
        let live_key = LocationKey::new(object_identity(&live), "x.Y.z");
        table.observe(live_key.clone(), &live, me, &locks(&[]));
        assert!(!table.contains(&doomed_key));
        assert!(table.contains(&live_key));
    }
}
