//! Build-time half of the race detector: rewrites compiled JVM methods so every
//! field store, array store and monitor operation first calls into the
//! runtime access monitor.

pub mod bytecode;
pub mod classfile;
pub mod config;
pub mod error;
pub mod rewriter;

pub use classfile::{CodeAttribute, CompiledUnit, ConstantPool, MethodBody};
pub use config::{HookTarget, RewriterConfig};
pub use error::{InstrumentError, Result};
pub use rewriter::{MethodOutcome, RewriteReport, Rewriter, SkipReason};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Installs a hierarchical tracing subscriber filtered by `UMAD_LOG`
/// (e.g. `UMAD_LOG=umad_instrumenter=debug`). Does nothing if a global
/// subscriber is already set.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_env("UMAD_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let layer = tracing_tree::HierarchicalLayer::default()
        .with_writer(std::io::stderr)
        .with_indent_lines(true)
        .with_targets(true)
        .with_indent_amount(2);
    let _ = Registry::default().with(filter).with(layer).try_init();
}
