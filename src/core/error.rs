use thiserror::Error;

/// Error type for command dispatch and privilege escalation
#[derive(Error, Debug)]
pub enum Error {
    #[error("No target sessions supplied")]
    NoTargets,

    #[error("Invocation cancelled")]
    Cancelled,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Credential error: {0}")]
    Credential(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Channel to {0} is closed")]
    ChannelClosed(String),

    #[error("Command {command:?} failed on {}", .hosts.join(", "))]
    CommandFailed { command: String, hosts: Vec<String> },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Create an invalid input error
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a credential error
    pub fn credential<S: Into<String>>(msg: S) -> Self {
        Self::Credential(msg.into())
    }

    /// Create a transport error
    pub fn transport<S: Into<String>>(msg: S) -> Self {
        Self::Transport(msg.into())
    }

    /// Get user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            Self::NoTargets => {
                "No hosts to run on. Pass at least one host with --host.".to_string()
            }
            Self::CommandFailed { command, hosts } => {
                format!(
                    "Command {:?} failed on {} host(s): {}. Check the output above for details.",
                    command,
                    hosts.len(),
                    hosts.join(", ")
                )
            }
            Self::Credential(msg) => {
                format!(
                    "Could not obtain the escalation password: {}. Set REMOTE_INVOKE_PASSWORD or run from a terminal.",
                    msg
                )
            }
            _ => self.to_string(),
        }
    }
}

/// Convenient result type for this crate
pub type Result<T> = std::result::Result<T, Error>;
