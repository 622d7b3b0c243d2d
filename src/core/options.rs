//! Per-invocation option resolution
//!
//! Every call to `run` or `sudo` starts from the process-wide defaults held in
//! [`Config`] and overlays whatever the caller passed. The result is an
//! [`OptionSet`] that is computed once and then only read.

use crate::core::config::Config;
use crate::core::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A bag of run options, used both for `default_run_options` and per call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOptions {
    /// Environment for the remote command
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<BTreeMap<String, String>>,

    /// Shell used to wrap the command
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,

    /// Request a pseudo-terminal from the transport
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pty: Option<bool>,

    /// Transport-specific options passed through untouched
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl RunOptions {
    /// Overlay `other` on top of `self`; keys set in `other` win.
    ///
    /// `env` is a single key at this level, so an `env` in `other` replaces
    /// the one in `self` wholesale. Per-variable merging happens later
    /// against `default_environment`.
    pub fn overlay(&self, other: &RunOptions) -> RunOptions {
        let mut extra = self.extra.clone();
        extra.extend(other.extra.iter().map(|(k, v)| (k.clone(), v.clone())));

        RunOptions {
            env: other.env.clone().or_else(|| self.env.clone()),
            shell: other.shell.clone().or_else(|| self.shell.clone()),
            pty: other.pty.or(self.pty),
            extra,
        }
    }
}

/// How a command should be invoked
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Via {
    #[default]
    Run,
    Sudo,
}

impl fmt::Display for Via {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Via::Run => f.write_str("run"),
            Via::Sudo => f.write_str("sudo"),
        }
    }
}

impl FromStr for Via {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "run" => Ok(Via::Run),
            "sudo" => Ok(Via::Sudo),
            other => Err(Error::invalid_input(format!(
                "unknown invocation method '{}', expected 'run' or 'sudo'",
                other
            ))),
        }
    }
}

/// Everything a caller may pass for a single call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallOptions {
    pub run: RunOptions,
    /// Target user for escalation (`sudo -u`)
    pub as_user: Option<String>,
    /// Invocation method used by `invoke_command`
    pub via: Option<Via>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a single environment variable for this call
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.run
            .env
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Replace the call environment with `vars`
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.run.env = Some(
            vars.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    pub fn shell(mut self, shell: impl Into<String>) -> Self {
        self.run.shell = Some(shell.into());
        self
    }

    pub fn pty(mut self, pty: bool) -> Self {
        self.run.pty = Some(pty);
        self
    }

    /// Set a transport-specific option
    pub fn option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.run.extra.insert(key.into(), value.into());
        self
    }

    pub fn as_user(mut self, user: impl Into<String>) -> Self {
        self.as_user = Some(user.into());
        self
    }

    pub fn via(mut self, via: Via) -> Self {
        self.via = Some(via);
        self
    }
}

/// Options resolved for one invocation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OptionSet {
    /// Merged environment; `None` when it would be empty
    pub env: Option<BTreeMap<String, String>>,
    pub shell: Option<String>,
    pub pty: bool,
    pub extra: BTreeMap<String, String>,
}

/// Merge the process-wide defaults in `config` with per-call options.
pub fn resolve(call: &RunOptions, config: &Config) -> OptionSet {
    let options = config.default_run_options.overlay(call);

    let mut env = config.default_environment.clone();
    if let Some(overrides) = &options.env {
        env.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    let shell = options.shell.or_else(|| config.default_shell.clone());

    OptionSet {
        env: if env.is_empty() { None } else { Some(env) },
        shell,
        pty: options.pty.unwrap_or(false),
        extra: options.extra,
    }
}
