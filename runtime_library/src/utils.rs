use std::thread::{self, ThreadId};

#[derive(Debug, Clone)]
pub struct ThreadInfo {
    pub id: ThreadId,
    pub name: ThreadName,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadName(Option<String>);

impl ThreadName {
    pub fn is(&self, name: &str) -> bool {
        self.0.as_deref() == Some(name)
    }
}

impl std::fmt::Display for ThreadName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        match &self.0 {
            Some(name) => write!(f, "{}", name),
            None => write!(f, "<unnamed>"),
        }
    }
}

pub fn current_thread_info() -> ThreadInfo {
    let c = thread::current();
    let name = c.name().map(str::to_owned);
    ThreadInfo {
        id: c.id(),
        name: ThreadName(name),
    }
}

/// Frames of the calling thread, innermost first, rendered as
/// `symbol (file:line)`. `skip_cnt` frames above this function are dropped.
pub fn current_stack_frames(skip_cnt: usize) -> Vec<String> {
    let bt = backtrace::Backtrace::new();
    bt.frames()
        .iter()
        .skip(skip_cnt + 1)
        .map(|frame| match frame.symbols().first() {
            Some(symbol) => {
                let name = symbol
                    .name()
                    .map(|name| name.to_string())
                    .unwrap_or_else(|| format!("{:?}", frame.ip()));
                match (symbol.filename(), symbol.lineno()) {
                    (Some(file), Some(line)) => format!("{} ({}:{})", name, file.display(), line),
                    _ => name,
                }
            }
            None => format!("{:?}", frame.ip()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unnamed_threads_have_a_placeholder() {
        let name = thread::spawn(|| current_thread_info().name).join().unwrap();
        assert_eq!(name.to_string(), "<unnamed>");
        assert!(!name.is("main"));
    }

    #[test]
    fn stack_frames_are_captured() {
        assert!(!current_stack_frames(0).is_empty());
    }
}
