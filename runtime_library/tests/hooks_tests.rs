use std::sync::Arc;
use std::thread;

use umad_runtime::{hooks, Monitor, MonitorConfig, ObjectRef};

fn write_from(name: &str, owner: &ObjectRef) {
    let owner = Arc::clone(owner);
    thread::Builder::new()
        .name(name.to_owned())
        .spawn(move || hooks::record_write(Some(&owner), "com.acme.Flag.set", "Flag.java:3"))
        .unwrap()
        .join()
        .unwrap();
}

#[test]
fn hooks_are_inert_until_installed() {
    let flag: ObjectRef = Arc::new(false);
    let lock: ObjectRef = Arc::new(());
    hooks::add_lock(&lock);
    write_from("early-1", &flag);
    write_from("early-2", &flag);
    hooks::remove_lock(&lock);
    hooks::reset();
    assert!(hooks::monitor().is_none());
    assert!(hooks::warnings().is_empty());

    assert!(hooks::install(Monitor::new(MonitorConfig::default())).is_ok());
    assert!(hooks::install(Monitor::default()).is_err());

    write_from("worker-1", &flag);
    write_from("worker-2", &flag);
    let warnings = hooks::warnings();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("com.acme.Flag.set"));

    hooks::reset();
    assert!(hooks::warnings().is_empty());
    assert_eq!(hooks::monitor().map(Monitor::tracked_single_keys), Some(0));
}
