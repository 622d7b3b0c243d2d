//! `sudo`-style privilege escalation
//!
//! The escalated command is prefixed with the escalation executable and a
//! custom prompt. While it runs, [`EscalationHandler`] watches the output of
//! every channel in the invocation:
//!
//! - a line starting with the prompt is answered with the shared password;
//! - a line containing `"try again"` means the password was rejected. The
//!   first host to report this becomes the *prompting host*; its failure is
//!   logged and the cached password is invalidated so the next prompt
//!   obtains a fresh one. The same failure from any other host is dropped,
//!   since every host sharing the password would otherwise report it.
//!   A prompt in the same chunk as a failure is answered after the failure
//!   has been handled;
//! - everything else goes to the wrapped fallback handler.
//!
//! The state lives in an [`EscalationState`] created per invocation and
//! discarded with it.

use crate::core::config::EscalationConfig;
use crate::core::credentials::Credentials;
use crate::core::logging::{Logger, Severity};
use crate::runtime::handler::OutputHandler;
use crate::runtime::router::stream_tag;
use crate::runtime::transport::{Channel, HostId, StreamKind};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Substring the escalation tool prints after rejecting a password
pub const AUTH_FAILURE_PATTERN: &str = "try again";

/// Prefix `command` with the escalation executable, prompt and target user
pub fn build_escalated_command(
    command: &str,
    config: &EscalationConfig,
    as_user: Option<&str>,
) -> String {
    let mut parts = vec![
        config.executable.clone(),
        format!("-p '{}'", config.prompt),
    ];
    if let Some(user) = as_user {
        parts.push(format!("-u {}", user));
    }
    parts.push(command.to_string());
    parts.join(" ")
}

#[derive(Debug, Default)]
struct ProtocolState {
    prompting_host: Option<HostId>,
    /// Hosts whose current prompt has already been answered
    answered: HashSet<HostId>,
    failures: u32,
    exhausted: Option<HostId>,
}

/// Escalation state shared by all channels of one invocation
#[derive(Debug, Default)]
pub struct EscalationState {
    inner: Mutex<ProtocolState>,
}

impl EscalationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// The host whose authentication failures are being reported, if any
    pub fn prompting_host(&self) -> Option<HostId> {
        self.inner.lock().prompting_host.clone()
    }

    /// Rejected passwords reported by the prompting host
    pub fn failures(&self) -> u32 {
        self.inner.lock().failures
    }

    /// The host that ran out of password attempts, if any
    pub fn exhausted_host(&self) -> Option<HostId> {
        self.inner.lock().exhausted.clone()
    }
}

/// Output handler that answers escalation prompts
pub struct EscalationHandler {
    prompt: String,
    max_attempts: Option<u32>,
    state: Arc<EscalationState>,
    credentials: Arc<Credentials>,
    logger: Arc<dyn Logger>,
    fallback: Box<OutputHandler>,
}

impl EscalationHandler {
    /// Wrap `fallback`, which receives every chunk this handler does not consume
    pub fn wrap(
        fallback: OutputHandler,
        config: &EscalationConfig,
        state: Arc<EscalationState>,
        credentials: Arc<Credentials>,
        logger: Arc<dyn Logger>,
    ) -> Self {
        Self {
            prompt: config.prompt.clone(),
            max_attempts: config.max_password_attempts,
            state,
            credentials,
            logger,
            fallback: Box::new(fallback),
        }
    }

    pub fn state(&self) -> &Arc<EscalationState> {
        &self.state
    }

    pub fn handle(&self, channel: &dyn Channel, stream: StreamKind, chunk: &str) {
        let failed = chunk.contains(AUTH_FAILURE_PATTERN);
        let prompted = self.is_prompt(chunk);

        // sudo often writes the rejection and the next prompt in one read
        if failed {
            self.authentication_failed(channel, stream, chunk);
        }
        if prompted {
            self.answer_prompt(channel, stream);
        }
        if !failed && !prompted {
            self.state.inner.lock().answered.remove(channel.host());
            self.fallback.handle(channel, stream, chunk);
        }
    }

    fn is_prompt(&self, chunk: &str) -> bool {
        chunk.lines().any(|line| line.starts_with(&self.prompt))
    }

    fn answer_prompt(&self, channel: &dyn Channel, stream: StreamKind) {
        let host = channel.host();
        {
            let mut state = self.state.inner.lock();
            if state.exhausted.as_ref() == Some(host) {
                return;
            }
            if !state.answered.insert(host.clone()) {
                return;
            }
        }

        // the state lock is released here; obtaining may wait on the operator
        match self.credentials.get() {
            Ok(secret) => {
                if let Err(e) = channel.send_data(format!("{}\n", secret).as_bytes()) {
                    self.logger.log(
                        Severity::Important,
                        &format!("failed to send password: {}", e),
                        &stream_tag(stream, channel),
                    );
                }
            }
            Err(e) => {
                self.logger.log(
                    Severity::Important,
                    &format!("could not obtain password: {}", e),
                    &stream_tag(stream, channel),
                );
                channel.close();
            }
        }
    }

    fn authentication_failed(&self, channel: &dyn Channel, stream: StreamKind, chunk: &str) {
        let host = channel.host();
        let (failures, give_up) = {
            let mut state = self.state.inner.lock();
            state.answered.remove(host);

            // TODO: chunks from other hosts that merely contain the failure
            // pattern are swallowed too; decide whether they should reach the
            // fallback handler instead.
            if matches!(&state.prompting_host, Some(prompter) if prompter != host) {
                return;
            }

            state.prompting_host = Some(host.clone());
            state.failures += 1;
            let failures = state.failures;
            let give_up = self.max_attempts.is_some_and(|max| failures >= max);
            if give_up {
                state.exhausted = Some(host.clone());
            }
            (failures, give_up)
        };

        let tag = stream_tag(stream, channel);
        self.logger.log(Severity::Important, chunk, &tag);
        self.credentials.invalidate();

        if give_up {
            self.logger.log(
                Severity::Important,
                &format!("giving up after {} rejected password(s)", failures),
                &tag,
            );
            channel.close();
        }
    }
}

impl fmt::Debug for EscalationHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EscalationHandler")
            .field("prompt", &self.prompt)
            .field("max_attempts", &self.max_attempts)
            .field("state", &self.state)
            .field("fallback", &self.fallback)
            .finish_non_exhaustive()
    }
}
