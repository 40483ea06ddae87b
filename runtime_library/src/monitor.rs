//! The detector service: owns the tracking table, the report log and the
//! per-thread registry, and serializes table transitions behind one lock.

use std::sync::Arc;

use hashbrown::HashMap;
use log::trace;
use parking_lot::Mutex;

use crate::config::MonitorConfig;
use crate::locks::{LockSet, ThreadRegistry};
use crate::object::{object_identity, ObjectRef};
use crate::reporter::{BacktraceStackSource, ReportLog, Reporter, StackSource};
use crate::tracker::{LocationKey, Observation, TrackingTable};
use crate::utils::{self, ThreadInfo};

thread_local! {
    static THREAD: ThreadInfo = utils::current_thread_info();
}

struct MonitorState {
    table: TrackingTable,
    log: ReportLog,
    /// Synthetic owners for static fields, one per descriptor.
    statics: HashMap<String, ObjectRef>,
}

pub struct Monitor {
    config: MonitorConfig,
    reporter: Reporter,
    threads: ThreadRegistry,
    state: Mutex<MonitorState>,
}

impl Monitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self::with_stack_source(config, Box::new(BacktraceStackSource))
    }

    pub fn with_stack_source(config: MonitorConfig, source: Box<dyn StackSource>) -> Self {
        let table = TrackingTable::new(config.lock_narrowing(), config.sweep_interval());
        Self {
            reporter: Reporter::new(config.clone(), source),
            config,
            threads: ThreadRegistry::new(),
            state: Mutex::new(MonitorState {
                table,
                log: ReportLog::default(),
                statics: HashMap::new(),
            }),
        }
    }

    /// A write of `descriptor` on `owner` (`None` for a static field) at
    /// source `position`. Ignored once the calling thread is tearing down its
    /// thread-locals.
    pub fn record_write(&self, owner: Option<&ObjectRef>, descriptor: &str, position: &str) {
        let Ok(thread) = THREAD.try_with(ThreadInfo::clone) else {
            return;
        };
        let Some(_guard) = self.threads.enter(thread.id) else {
            return;
        };
        let locks = self.threads.lock_set(thread.id);

        let mut state = self.state.lock();
        let state = &mut *state;
        if state.log.is_reported(position) {
            return;
        }
        if thread.name.is(self.config.main_thread_name()) {
            return;
        }
        trace!("write {} at {} from {}", descriptor, position, thread.name);

        let owner = match owner {
            Some(owner) => Arc::clone(owner),
            None => Arc::clone(
                state
                    .statics
                    .entry_ref(descriptor)
                    .or_insert_with(|| Arc::new(descriptor.to_owned()) as ObjectRef),
            ),
        };
        let key = LocationKey::new(object_identity(&owner), descriptor);
        let report = match state.table.observe(key, &owner, thread.id, &locks) {
            Observation::Recorded { conflicts } => !conflicts.is_empty(),
            Observation::Repeated { previous_thread } => previous_thread.is_some(),
            Observation::Swept { .. } => false,
        };
        if report {
            self.reporter
                .maybe_report(&mut state.log, descriptor, position, &thread);
        }
    }

    pub fn add_lock(&self, lock: &ObjectRef) {
        if let Ok(thread) = THREAD.try_with(|thread| thread.id) {
            self.threads.add_lock(thread, object_identity(lock));
        }
    }

    pub fn remove_lock(&self, lock: &ObjectRef) {
        if let Ok(thread) = THREAD.try_with(|thread| thread.id) {
            self.threads.remove_lock(thread, object_identity(lock));
        }
    }

    /// Warnings emitted so far, oldest first.
    pub fn warnings(&self) -> Vec<String> {
        self.state.lock().log.warnings().to_vec()
    }

    /// Forgets every tracked location, common-locks set, reported position and
    /// warning. Held locks and static owners survive.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.table.clear();
        state.log.clear();
    }

    pub fn tracked_single_keys(&self) -> usize {
        self.state.lock().table.single_keys()
    }

    pub fn tracked_conflict_keys(&self) -> usize {
        self.state.lock().table.conflict_keys()
    }

    /// Whether any entry exists for `descriptor` on the object with
    /// `identity`, alive or not.
    pub fn holds_location(&self, identity: usize, descriptor: &str) -> bool {
        self.state
            .lock()
            .table
            .contains(&LocationKey::new(identity, descriptor))
    }

    pub fn holds_key(&self, owner: &ObjectRef, descriptor: &str) -> bool {
        self.holds_location(object_identity(owner), descriptor)
    }

    /// Whether the static field `descriptor` has been tracked.
    pub fn holds_static(&self, descriptor: &str) -> bool {
        let state = self.state.lock();
        match state.statics.get(descriptor) {
            Some(owner) => state
                .table
                .contains(&LocationKey::new(object_identity(owner), descriptor)),
            None => false,
        }
    }

    /// Locks the calling thread holds; empty during thread-local teardown.
    pub fn current_lock_set(&self) -> LockSet {
        match THREAD.try_with(|thread| thread.id) {
            Ok(thread) => self.threads.lock_set(thread),
            Err(_) => LockSet::default(),
        }
    }

    /// Purges entries whose owner is gone. Returns how many were removed.
    pub fn sweep_dead_entries(&self) -> usize {
        self.state.lock().table.sweep()
    }
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new(MonitorConfig::default())
    }
}
