//! Command dispatch across sessions
//!
//! This module handles:
//! - Fanning a command out to every target session concurrently
//! - Routing each chunk of output to a handler
//! - Answering `sudo` prompts and retrying on rejected passwords
//! - The transport seam and a child-process transport

pub mod client;
pub mod dispatcher;
pub mod escalation;
pub mod handler;
pub mod process;
pub mod router;
pub mod transport;

pub use client::{Client, ClientBuilder, CommandBuilder};
pub use dispatcher::{CompletionResult, Dispatcher, FailureReason, SessionOutcome};
pub use escalation::{build_escalated_command, EscalationHandler, EscalationState};
pub use handler::{OutputCallback, OutputHandler};
pub use process::{ProcessChannel, ProcessTransport, RemoteHost};
pub use router::StreamRouter;
pub use transport::{Channel, ExitStatus, HostId, Session, StreamKind, Transport};
