//! Process-wide entry points called by rewritten code. Every hook is a no-op
//! until a `Monitor` has been installed.

use once_cell::sync::OnceCell;

use crate::monitor::Monitor;
use crate::object::ObjectRef;

static MONITOR: OnceCell<Monitor> = OnceCell::new();

/// Installs the process monitor. Hands `monitor` back if one is already
/// installed.
pub fn install(monitor: Monitor) -> Result<(), Monitor> {
    MONITOR.set(monitor)
}

pub fn monitor() -> Option<&'static Monitor> {
    MONITOR.get()
}

#[inline]
pub fn record_write(owner: Option<&ObjectRef>, descriptor: &str, position: &str) {
    if let Some(monitor) = MONITOR.get() {
        monitor.record_write(owner, descriptor, position);
    }
}

#[inline]
pub fn add_lock(lock: &ObjectRef) {
    if let Some(monitor) = MONITOR.get() {
        monitor.add_lock(lock);
    }
}

#[inline]
pub fn remove_lock(lock: &ObjectRef) {
    if let Some(monitor) = MONITOR.get() {
        monitor.remove_lock(lock);
    }
}

pub fn warnings() -> Vec<String> {
    MONITOR.get().map(Monitor::warnings).unwrap_or_default()
}

pub fn reset() {
    if let Some(monitor) = MONITOR.get() {
        monitor.reset();
    }
}
