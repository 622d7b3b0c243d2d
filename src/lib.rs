//! # remote-invoke
//!
//! Run one shell command on many hosts at once, with optional `sudo`
//! escalation.
//!
//! A [`Client`] resolves per-call options against process-wide defaults,
//! opens one channel per target session through a [`Transport`], and streams
//! every chunk of output to a single handler. When a command runs through
//! [`Client::sudo`], password prompts are answered from a shared
//! [`Credentials`] value; a rejected password is reported once, by the first
//! host that saw it, and the credential is re-obtained before the next
//! prompt.
//!
//! ```rust,no_run
//! use remote_invoke::{CallOptions, Client, EnvCredential, ProcessTransport, RemoteHost};
//!
//! # #[tokio::main]
//! # async fn main() -> remote_invoke::Result<()> {
//! let client = Client::builder(ProcessTransport::default())
//!     .credential_source(EnvCredential::new("DEPLOY_PASSWORD"))
//!     .default_env("LANG", "C")
//!     .build()?;
//!
//! let hosts = vec![RemoteHost::new("app1"), RemoteHost::new("app2")];
//! client
//!     .run("uptime", CallOptions::new(), &hosts, None)
//!     .await?
//!     .into_result()?;
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod runtime;

pub use crate::core::{
    resolve, CallOptions, Config, CredentialSource, Credentials, EnvCredential,
    EscalationConfig, Error, Logger, OptionSet, Result, RunOptions, Severity, StaticCredential,
    TracingLogger, TransportConfig, Via,
};
pub use crate::runtime::{
    build_escalated_command, Channel, Client, ClientBuilder, CommandBuilder, CompletionResult,
    Dispatcher, EscalationHandler, EscalationState, ExitStatus, FailureReason, HostId,
    OutputCallback, OutputHandler, ProcessChannel, ProcessTransport, RemoteHost, Session,
    SessionOutcome, StreamKind, StreamRouter, Transport,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
