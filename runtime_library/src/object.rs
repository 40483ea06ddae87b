//! Handles to the managed objects the monitor is told about.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};

/// A managed object as seen by the hooks.
pub type ObjectRef = Arc<dyn Any + Send + Sync>;

/// Address identity of an object. Two live objects never share it, and the
/// address of a dead one is not reused while any `WeakOwner` still points at
/// its allocation.
pub fn object_identity(object: &ObjectRef) -> usize {
    Arc::as_ptr(object) as *const () as usize
}

/// Observes an object without keeping it alive. Never upgraded, so the monitor
/// cannot extend an object's lifetime even briefly.
#[derive(Clone)]
pub struct WeakOwner {
    handle: Weak<dyn Any + Send + Sync>,
    identity: usize,
}

impl WeakOwner {
    pub fn new(object: &ObjectRef) -> Self {
        Self {
            handle: Arc::downgrade(object),
            identity: object_identity(object),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.handle.strong_count() > 0
    }

    pub fn identity(&self) -> usize {
        self.identity
    }

    /// Whether this still refers to the live object with `identity`.
    pub fn is_same(&self, identity: usize) -> bool {
        self.is_alive() && self.identity == identity
    }
}

impl fmt::Debug for WeakOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakOwner")
            .field("identity", &format_args!("{:#x}", self.identity))
            .field("alive", &self.is_alive())
            .finish()
    }
}
