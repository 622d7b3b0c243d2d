use std::fmt;
use tracing::{debug, info, warn};

/// How loudly a message should be reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Debug,
    Info,
    Important,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Debug => f.write_str("debug"),
            Severity::Info => f.write_str("info"),
            Severity::Important => f.write_str("important"),
        }
    }
}

/// Sink for command output and protocol diagnostics
pub trait Logger: Send + Sync {
    fn log(&self, severity: Severity, message: &str, tag: &str);
}

/// Default logger that forwards to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, severity: Severity, message: &str, tag: &str) {
        let message = message.trim_end();
        match severity {
            Severity::Important => warn!(tag, "{}", message),
            Severity::Info => info!(tag, "{}", message),
            Severity::Debug => debug!(tag, "{}", message),
        }
    }
}
