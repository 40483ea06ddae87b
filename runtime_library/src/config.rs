use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

lazy_static! {
    static ref ENV_IF_CALLED_FROM: Option<String> = std::env::var("UMAD_IF_CALLED_FROM").ok();
    static ref ENV_PRINT_WARNINGS: Option<bool> = std::env::var("UMAD_PRINT_WARNINGS")
        .ok()
        .map(|value| matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"));
    static ref ENV_MAIN_THREAD: Option<String> = std::env::var("UMAD_MAIN_THREAD").ok();
}

pub const DEFAULT_CALLER_PATTERN: &str = ".*";
pub const DEFAULT_MAIN_THREAD_NAME: &str = "main";
pub const DEFAULT_SWEEP_INTERVAL: usize = 4096;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid caller filter `{pattern}`: {source}")]
    InvalidFilter {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// How the common-locks set of a conflicted location evolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockNarrowing {
    /// Set once, from the lock set of the write that made the location
    /// conflicted.
    #[default]
    OnGraduation,
    /// Also intersected with the lock set of every later write, so only locks
    /// held at every observation survive.
    OnEveryWrite,
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pattern: String,
    /// `None` when the pattern accepts every frame.
    if_called_from: Option<Regex>,
    print_warnings: bool,
    main_thread_name: String,
    lock_narrowing: LockNarrowing,
    sweep_interval: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            pattern: DEFAULT_CALLER_PATTERN.to_owned(),
            if_called_from: None,
            print_warnings: false,
            main_thread_name: DEFAULT_MAIN_THREAD_NAME.to_owned(),
            lock_narrowing: LockNarrowing::default(),
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

impl MonitorConfig {
    /// Reports only conflicts whose stack has a frame fully matching `pattern`.
    pub fn new(pattern: &str) -> Result<Self, ConfigError> {
        let if_called_from = if pattern == DEFAULT_CALLER_PATTERN {
            None
        } else {
            let anchored = format!("^(?:{pattern})$");
            let regex = Regex::new(&anchored).map_err(|source| ConfigError::InvalidFilter {
                pattern: pattern.to_owned(),
                source,
            })?;
            Some(regex)
        };
        Ok(Self {
            pattern: pattern.to_owned(),
            if_called_from,
            ..Self::default()
        })
    }

    /// Reads `UMAD_IF_CALLED_FROM`, `UMAD_PRINT_WARNINGS` and
    /// `UMAD_MAIN_THREAD`; unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let pattern = ENV_IF_CALLED_FROM.as_deref().unwrap_or(DEFAULT_CALLER_PATTERN);
        let mut config = Self::new(pattern)?;
        if let Some(print) = *ENV_PRINT_WARNINGS {
            config.print_warnings = print;
        }
        if let Some(name) = ENV_MAIN_THREAD.as_ref() {
            config.main_thread_name = name.clone();
        }
        Ok(config)
    }

    pub fn with_print_warnings(mut self, print_warnings: bool) -> Self {
        self.print_warnings = print_warnings;
        self
    }

    pub fn with_main_thread_name(mut self, name: impl Into<String>) -> Self {
        self.main_thread_name = name.into();
        self
    }

    pub fn with_lock_narrowing(mut self, narrowing: LockNarrowing) -> Self {
        self.lock_narrowing = narrowing;
        self
    }

    /// Sweep dead owners every `interval` tracked writes; 0 disables the
    /// periodic sweep.
    pub fn with_sweep_interval(mut self, interval: usize) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn caller_pattern(&self) -> &str {
        &self.pattern
    }

    pub fn matches_caller(&self, frame: &str) -> bool {
        match &self.if_called_from {
            Some(regex) => regex.is_match(frame),
            None => true,
        }
    }

    /// Whether some frame of `frames` passes the filter. The default pattern
    /// accepts even an empty stack.
    pub fn matches_stack(&self, frames: &[String]) -> bool {
        match &self.if_called_from {
            Some(regex) => frames.iter().any(|frame| regex.is_match(frame)),
            None => true,
        }
    }

    pub fn print_warnings(&self) -> bool {
        self.print_warnings
    }

    pub fn main_thread_name(&self) -> &str {
        &self.main_thread_name
    }

    pub fn lock_narrowing(&self) -> LockNarrowing {
        self.lock_narrowing
    }

    pub fn sweep_interval(&self) -> usize {
        self.sweep_interval
    }
}
