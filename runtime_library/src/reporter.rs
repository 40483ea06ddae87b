use hashbrown::HashSet;
use log::trace;

use crate::config::MonitorConfig;
use crate::utils::{self, ThreadInfo};

/// First frame of a captured stack that belongs to the monitored program
/// rather than to the reporter and monitor.
pub const REAL_STACK_START_INDEX: usize = 3;
/// Frames printed per warning.
pub const STACK_TRACE_LENGTH: usize = 10;

/// Call stack of the current thread, innermost frame first.
pub trait StackSource: Send + Sync {
    fn capture(&self) -> Vec<String>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BacktraceStackSource;

impl StackSource for BacktraceStackSource {
    fn capture(&self) -> Vec<String> {
        utils::current_stack_frames(1)
    }
}

/// Positions reported so far and the warnings produced for them.
#[derive(Debug, Default)]
pub struct ReportLog {
    reported: HashSet<String>,
    warnings: Vec<String>,
}

impl ReportLog {
    pub fn is_reported(&self, position: &str) -> bool {
        self.reported.contains(position)
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn warnings_written(&self) -> usize {
        self.warnings.len()
    }

    pub fn clear(&mut self) {
        self.reported.clear();
        self.warnings.clear();
    }
}

pub struct Reporter {
    config: MonitorConfig,
    source: Box<dyn StackSource>,
}

impl Reporter {
    pub fn new(config: MonitorConfig, source: Box<dyn StackSource>) -> Self {
        Self { config, source }
    }

    /// Logs a warning for `position` unless it was reported before or no
    /// frame of the current stack matches the caller filter. Returns whether a
    /// warning was added.
    pub fn maybe_report(&self, log: &mut ReportLog, descriptor: &str, position: &str, thread: &ThreadInfo) -> bool {
        let frames = self.source.capture();
        if !self.config.matches_stack(&frames) {
            trace!("conflict at {} filtered out by caller pattern", position);
            return false;
        }
        if !log.reported.insert(position.to_owned()) {
            return false;
        }
        let warning = format_warning(descriptor, position, thread, &frames);
        if self.config.print_warnings() {
            umad_println!("{}", warning);
        }
        log.warnings.push(warning);
        true
    }
}

pub fn format_warning(descriptor: &str, position: &str, thread: &ThreadInfo, frames: &[String]) -> String {
    let mut warning = format!(
        "[WARN] Object {} accessed from multiple threads in {}:\n{} stack trace:\n",
        descriptor, position, thread.name
    );
    let end = frames.len().min(REAL_STACK_START_INDEX + STACK_TRACE_LENGTH);
    for frame in frames.get(REAL_STACK_START_INDEX..end).unwrap_or_default() {
        warning.push_str("    ");
        warning.push_str(frame);
        warning.push('\n');
    }
    warning
}
