pub const RECORD_WRITE_DESCRIPTOR: &str = "(Ljava/lang/Object;Ljava/lang/String;Ljava/lang/String;)V";
pub const LOCK_DESCRIPTOR: &str = "(Ljava/lang/Object;)V";

/// The static methods injected code calls into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookTarget {
    /// Internal name of the class declaring the hooks.
    pub class: String,
    pub record_write: String,
    pub add_lock: String,
    pub remove_lock: String,
}

impl Default for HookTarget {
    fn default() -> Self {
        Self {
            class: "umad/runtime/AccessMonitor".to_owned(),
            record_write: "recordWrite".to_owned(),
            add_lock: "addLock".to_owned(),
            remove_lock: "removeLock".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewriterConfig {
    pub hooks: HookTarget,
    /// Leave `<clinit>` alone. Static initializers run once under the class
    /// initialization lock, so their writes rarely matter.
    pub skip_static_initializers: bool,
}
