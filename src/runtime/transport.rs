//! Interfaces to the transport that owns sessions and channels
//!
//! The dispatcher never touches the network itself. A [`Transport`] opens one
//! [`Channel`] per [`Session`], runs a command on it and feeds every chunk of
//! output to the [`OutputHandler`] it was given.

use crate::core::error::Result;
use crate::core::options::OptionSet;
use crate::runtime::handler::OutputHandler;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier of a remote host
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HostId(String);

impl HostId {
    pub fn new(host: impl Into<String>) -> Self {
        Self(host.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for HostId {
    fn from(host: &str) -> Self {
        Self::new(host)
    }
}

impl From<String> for HostId {
    fn from(host: String) -> Self {
        Self(host)
    }
}

/// Which output stream a chunk arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Out,
    Err,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Out => f.write_str("out"),
            StreamKind::Err => f.write_str("err"),
        }
    }
}

/// How a remote command finished
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    Exited(i32),
    /// Killed by a signal or torn down before reporting a status
    Aborted(Option<String>),
}

impl ExitStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, ExitStatus::Exited(0))
    }
}

/// An established connection to one host
pub trait Session: Send + Sync {
    fn host(&self) -> &HostId;
}

/// One command execution context over a session
pub trait Channel: Send + Sync {
    fn host(&self) -> &HostId;

    /// Write to the remote process's standard input
    fn send_data(&self, data: &[u8]) -> Result<()>;

    /// Tear the channel down; pending output is dropped
    fn close(&self);
}

#[async_trait]
pub trait Transport: Send + Sync {
    type Session: Session;
    type Channel: Channel;

    async fn open_channel(&self, session: &Self::Session) -> Result<Self::Channel>;

    /// Run `command` on `channel`, calling `handler` for every chunk of
    /// output, and resolve once the remote process has finished.
    async fn submit(
        &self,
        channel: &Self::Channel,
        command: &str,
        options: &OptionSet,
        handler: &OutputHandler,
    ) -> Result<ExitStatus>;
}
