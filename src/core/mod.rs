//! Configuration, options and error types shared by the runtime
//!
//! This module handles:
//! - Process-wide defaults loaded from TOML
//! - Resolving per-call options against those defaults
//! - The shared escalation credential
//! - The logging seam used for command output

pub mod config;
pub mod credentials;
pub mod error;
pub mod logging;
pub mod options;


pub use config::{Config, EscalationConfig, TransportConfig};
pub use credentials::{CredentialSource, Credentials, EnvCredential, StaticCredential};
pub use error::{Error, Result};
pub use logging::{Logger, Severity, TracingLogger};
pub use options::{resolve, CallOptions, OptionSet, RunOptions, Via};
