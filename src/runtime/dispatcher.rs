//! Concurrent dispatch of one command to many sessions
//!
//! The dispatcher opens one channel per target session, submits the command
//! on all of them at once and waits until every channel has finished. A
//! failing host never stops the others; its reason is kept in the
//! [`CompletionResult`] so callers can tell "all succeeded" apart from "some
//! failed" and see which hosts failed and why.

use crate::core::error::{Error, Result};
use crate::core::options::OptionSet;
use crate::runtime::handler::OutputHandler;
use crate::runtime::transport::{Channel, ExitStatus, HostId, Session, Transport};
use futures::future::join_all;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Why a session did not succeed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FailureReason {
    NonZeroExit { code: i32 },
    Aborted { detail: Option<String> },
    Transport { message: String },
    TimedOut { secs: u64 },
    AuthenticationExhausted { attempts: u32 },
    Cancelled,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::NonZeroExit { code } => write!(f, "exited with status {}", code),
            FailureReason::Aborted { detail: Some(detail) } => write!(f, "aborted ({})", detail),
            FailureReason::Aborted { detail: None } => f.write_str("aborted"),
            FailureReason::Transport { message } => write!(f, "transport failure: {}", message),
            FailureReason::TimedOut { secs } => write!(f, "timed out after {}s", secs),
            FailureReason::AuthenticationExhausted { attempts } => {
                write!(f, "password rejected {} time(s)", attempts)
            }
            FailureReason::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// How the command went on one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionOutcome {
    pub host: HostId,
    /// Exit status, when the remote process reported one
    pub status: Option<ExitStatus>,
    pub failure: Option<FailureReason>,
}

impl SessionOutcome {
    fn finished(host: HostId, status: ExitStatus) -> Self {
        let failure = match &status {
            ExitStatus::Exited(0) => None,
            ExitStatus::Exited(code) => Some(FailureReason::NonZeroExit { code: *code }),
            ExitStatus::Aborted(detail) => Some(FailureReason::Aborted {
                detail: detail.clone(),
            }),
        };
        Self {
            host,
            status: Some(status),
            failure,
        }
    }

    fn failed(host: HostId, reason: FailureReason) -> Self {
        Self {
            host,
            status: None,
            failure: Some(reason),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

/// Aggregate result of one invocation, one outcome per target in target order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionResult {
    pub command: String,
    pub outcomes: Vec<SessionOutcome>,
}

impl CompletionResult {
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(SessionOutcome::is_success)
    }

    pub fn failed_hosts(&self) -> Vec<&HostId> {
        self.outcomes
            .iter()
            .filter(|outcome| !outcome.is_success())
            .map(|outcome| &outcome.host)
            .collect()
    }

    pub fn outcome(&self, host: &HostId) -> Option<&SessionOutcome> {
        self.outcomes.iter().find(|outcome| &outcome.host == host)
    }

    /// Turn a partial failure into [`Error::CommandFailed`]
    pub fn into_result(self) -> Result<Self> {
        if self.is_success() {
            return Ok(self);
        }
        Err(Error::CommandFailed {
            hosts: self
                .failed_hosts()
                .into_iter()
                .map(|host| host.to_string())
                .collect(),
            command: self.command,
        })
    }

    /// Replace the failure reason recorded for `host`
    pub(crate) fn mark_failed(&mut self, host: &HostId, reason: FailureReason) {
        if let Some(outcome) = self.outcomes.iter_mut().find(|o| &o.host == host) {
            outcome.failure = Some(reason);
        }
    }
}

/// Runs a command on every target session of an invocation
pub struct Dispatcher<T: Transport> {
    transport: Arc<T>,
}

impl<T: Transport> Dispatcher<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self { transport }
    }

    /// Run `command` on all `targets` concurrently and wait for every channel
    ///
    /// Returns [`Error::Cancelled`] when `cancel` fires while a channel is
    /// still open, after closing every such channel.
    pub async fn run(
        &self,
        command: &str,
        options: &OptionSet,
        targets: &[T::Session],
        handler: &OutputHandler,
        cancel: &CancellationToken,
        timeout: Option<Duration>,
    ) -> Result<CompletionResult> {
        if targets.is_empty() {
            return Err(Error::NoTargets);
        }

        debug!(hosts = targets.len(), "executing {:?}", command.trim());

        let runs = targets
            .iter()
            .map(|session| self.run_on(session, command, options, handler, cancel, timeout));
        let outcomes = join_all(runs).await;

        if outcomes
            .iter()
            .any(|o| o.failure == Some(FailureReason::Cancelled))
        {
            debug!("invocation cancelled");
            return Err(Error::Cancelled);
        }

        let result = CompletionResult {
            command: command.to_string(),
            outcomes,
        };

        for outcome in result.outcomes.iter().filter(|o| !o.is_success()) {
            if let Some(reason) = &outcome.failure {
                warn!(host = %outcome.host, "command failed: {}", reason);
            }
        }

        Ok(result)
    }

    async fn run_on(
        &self,
        session: &T::Session,
        command: &str,
        options: &OptionSet,
        handler: &OutputHandler,
        cancel: &CancellationToken,
        timeout: Option<Duration>,
    ) -> SessionOutcome {
        let host = session.host().clone();

        let channel = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return SessionOutcome::failed(host, FailureReason::Cancelled);
            }
            opened = self.transport.open_channel(session) => match opened {
                Ok(channel) => channel,
                Err(e) => {
                    return SessionOutcome::failed(
                        host,
                        FailureReason::Transport { message: e.to_string() },
                    );
                }
            },
        };

        let submitted = self.transport.submit(&channel, command, options, handler);
        let finished = async {
            match timeout {
                Some(limit) => tokio::time::timeout(limit, submitted)
                    .await
                    .map_err(|_| limit),
                None => Ok(submitted.await),
            }
        };

        // a channel that has already finished keeps its outcome
        let outcome = tokio::select! {
            biased;
            finished = finished => finished,
            _ = cancel.cancelled() => {
                channel.close();
                return SessionOutcome::failed(host, FailureReason::Cancelled);
            }
        };

        match outcome {
            Ok(Ok(status)) => {
                debug!(host = %host, ?status, "channel finished");
                SessionOutcome::finished(host, status)
            }
            Ok(Err(e)) => SessionOutcome::failed(
                host,
                FailureReason::Transport {
                    message: e.to_string(),
                },
            ),
            Err(limit) => {
                channel.close();
                SessionOutcome::failed(
                    host,
                    FailureReason::TimedOut {
                        secs: limit.as_secs(),
                    },
                )
            }
        }
    }
}

impl<T: Transport> fmt::Debug for Dispatcher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher").finish_non_exhaustive()
    }
}
