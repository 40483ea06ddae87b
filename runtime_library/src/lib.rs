//! Runtime half of the write-race detector: the hooks that rewritten code
//! calls, the last-writer tracking table and the warning reporter.

/// `println!` that drops write errors instead of panicking, since it runs
/// inside hooks called from arbitrary program threads.
macro_rules! umad_println {
    ($($arg:tt)*) => {{
        use std::io::Write as _;
        let _ = writeln!(std::io::stdout().lock(), $($arg)*);
    }};
}

pub mod config;
pub mod hooks;
pub mod locks;
pub mod monitor;
pub mod object;
pub mod reporter;
pub mod tracker;
pub mod utils;

pub use config::{ConfigError, LockNarrowing, MonitorConfig};
pub use locks::LockSet;
pub use monitor::Monitor;
pub use object::{object_identity, ObjectRef, WeakOwner};
pub use reporter::{BacktraceStackSource, StackSource};

/// Installs `env_logger` unless a logger is already set.
pub fn init_logging() {
    let _ = env_logger::try_init();
}
