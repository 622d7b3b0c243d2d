use crate::core::error::{Error, Result};
use crate::core::options::RunOptions;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Process-wide settings consulted on every invocation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Shell used when neither the call nor the run options name one
    pub default_shell: Option<String>,

    /// Per-channel timeout in seconds
    pub command_timeout_secs: Option<u64>,

    /// Environment applied to every command; per-call variables win
    #[serde(default)]
    pub default_environment: BTreeMap<String, String>,

    /// Run options applied to every command; per-call options win
    #[serde(default)]
    pub default_run_options: RunOptions,

    /// Privilege escalation settings
    #[serde(default)]
    pub escalation: EscalationConfig,

    /// Remote-shell program used by the process transport
    #[serde(default)]
    pub transport: TransportConfig,
}

/// Settings for `sudo`-style escalation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationConfig {
    /// Path of the escalation executable on the remote host
    #[serde(default = "default_executable")]
    pub executable: String,

    /// Prompt text passed with `-p` and matched in the output stream
    #[serde(default = "default_prompt")]
    pub prompt: String,

    /// Give up on a host after this many rejected passwords
    pub max_password_attempts: Option<u32>,
}

/// Settings for the child-process transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_program")]
    pub program: String,

    /// Arguments placed before the host name
    #[serde(default = "default_program_args")]
    pub args: Vec<String>,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            executable: default_executable(),
            prompt: default_prompt(),
            max_password_attempts: None,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_program_args(),
        }
    }
}

impl Config {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file, with fallback to defaults
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::configuration(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check the settings that would otherwise produce a broken command line
    pub fn validate(&self) -> Result<()> {
        if self.escalation.executable.trim().is_empty() {
            return Err(Error::configuration("escalation executable must not be empty"));
        }
        if self.escalation.prompt.is_empty() {
            return Err(Error::configuration("escalation prompt must not be empty"));
        }
        // the prompt is embedded in single quotes on the remote command line
        if self.escalation.prompt.contains('\'') {
            return Err(Error::configuration(
                "escalation prompt must not contain a single quote",
            ));
        }
        if self.escalation.max_password_attempts == Some(0) {
            return Err(Error::configuration(
                "max_password_attempts must be at least 1",
            ));
        }
        if self.transport.program.trim().is_empty() {
            return Err(Error::configuration("transport program must not be empty"));
        }
        Ok(())
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_secs.map(Duration::from_secs)
    }
}

// Helper functions for default values
fn default_executable() -> String {
    "sudo".to_string()
}

fn default_prompt() -> String {
    "sudo password: ".to_string()
}

fn default_program() -> String {
    "ssh".to_string()
}

fn default_program_args() -> Vec<String> {
    vec!["-T".to_string()]
}
