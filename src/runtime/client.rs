use crate::core::{
    resolve, CallOptions, Config, CredentialSource, Credentials, Error, Logger, Result,
    RunOptions, TracingLogger, Via,
};
use crate::runtime::dispatcher::{CompletionResult, Dispatcher, FailureReason};
use crate::runtime::escalation::{build_escalated_command, EscalationHandler, EscalationState};
use crate::runtime::handler::{OutputCallback, OutputHandler};
use crate::runtime::router::StreamRouter;
use crate::runtime::transport::{Channel, StreamKind, Transport};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Runs commands on a set of sessions, optionally through `sudo`
///
/// The `Client` owns the process-wide state an invocation needs: the
/// defaults in [`Config`], the shared escalation [`Credentials`] and the
/// [`Logger`] that command output is routed to.
///
/// # Examples
///
/// ```rust,no_run
/// # use remote_invoke::{CallOptions, Client, ProcessTransport, RemoteHost, StaticCredential};
/// # #[tokio::main]
/// # async fn main() -> remote_invoke::Result<()> {
/// let client = Client::builder(ProcessTransport::default())
///     .credential_source(StaticCredential::new("s3cret"))
///     .build()?;
///
/// let hosts = vec![RemoteHost::new("web1"), RemoteHost::new("web2")];
/// let result = client
///     .sudo("systemctl restart nginx", CallOptions::new(), &hosts, None)
///     .await?;
///
/// for host in result.failed_hosts() {
///     eprintln!("failed on {}", host);
/// }
/// # Ok(())
/// # }
/// ```
pub struct Client<T: Transport> {
    transport: Arc<T>,
    config: Arc<Config>,
    credentials: Arc<Credentials>,
    logger: Arc<dyn Logger>,
}

impl<T: Transport> Clone for Client<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            config: Arc::clone(&self.config),
            credentials: Arc::clone(&self.credentials),
            logger: Arc::clone(&self.logger),
        }
    }
}

impl<T: Transport> fmt::Debug for Client<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> Client<T> {
    /// Create a new client builder for fluent configuration
    pub fn builder(transport: T) -> ClientBuilder<T> {
        ClientBuilder::new(transport)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The credential shared by every escalated invocation of this client
    pub fn credentials(&self) -> &Arc<Credentials> {
        &self.credentials
    }

    /// Start a fluent command invocation
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// # use remote_invoke::{Client, ProcessTransport, RemoteHost, Via};
    /// # #[tokio::main]
    /// # async fn main() -> remote_invoke::Result<()> {
    /// # let client = Client::builder(ProcessTransport::default()).build()?;
    /// let hosts = vec![RemoteHost::new("app1")];
    /// let result = client
    ///     .command("bundle exec rake db:migrate")
    ///     .on(&hosts)
    ///     .env("RAILS_ENV", "production")
    ///     .as_user("deploy")
    ///     .via(Via::Sudo)
    ///     .execute()
    ///     .await?;
    /// assert!(result.is_success());
    /// # Ok(())
    /// # }
    /// ```
    pub fn command(&self, command: impl Into<String>) -> CommandBuilder<'_, T> {
        CommandBuilder::new(self, command.into())
    }

    /// Run `command` on every target
    ///
    /// Without a `callback`, output is routed to the logger: stdout as
    /// info, stderr as important.
    pub async fn run(
        &self,
        command: &str,
        options: CallOptions,
        targets: &[T::Session],
        callback: Option<OutputCallback>,
    ) -> Result<CompletionResult> {
        let fallback = self.fallback_handler(callback);
        self.run_with(command, options, targets, fallback, &CancellationToken::new())
            .await
    }

    /// Like [`run`](Self::run), but through the escalation executable
    ///
    /// Prompts are answered with the client's credential. `as_user` selects
    /// the target user. A pty is requested unless the call or the default
    /// run options say otherwise.
    pub async fn sudo(
        &self,
        command: &str,
        options: CallOptions,
        targets: &[T::Session],
        callback: Option<OutputCallback>,
    ) -> Result<CompletionResult> {
        let fallback = self.fallback_handler(callback);
        self.sudo_with(command, options, targets, fallback, &CancellationToken::new())
            .await
    }

    /// Run or sudo depending on `options.via` (default: run)
    pub async fn invoke_command(
        &self,
        command: &str,
        options: CallOptions,
        targets: &[T::Session],
        callback: Option<OutputCallback>,
    ) -> Result<CompletionResult> {
        let fallback = self.fallback_handler(callback);
        self.invoke_with(command, options, targets, fallback, &CancellationToken::new())
            .await
    }

    fn fallback_handler(&self, callback: Option<OutputCallback>) -> OutputHandler {
        match callback {
            Some(callback) => OutputHandler::Custom(callback),
            None => OutputHandler::Router(StreamRouter::new(Arc::clone(&self.logger))),
        }
    }

    async fn invoke_with(
        &self,
        command: &str,
        options: CallOptions,
        targets: &[T::Session],
        fallback: OutputHandler,
        cancel: &CancellationToken,
    ) -> Result<CompletionResult> {
        match options.via.unwrap_or_default() {
            Via::Run => self.run_with(command, options, targets, fallback, cancel).await,
            Via::Sudo => self.sudo_with(command, options, targets, fallback, cancel).await,
        }
    }

    async fn run_with(
        &self,
        command: &str,
        options: CallOptions,
        targets: &[T::Session],
        handler: OutputHandler,
        cancel: &CancellationToken,
    ) -> Result<CompletionResult> {
        if let Some(user) = &options.as_user {
            debug!(user = %user, "target user only applies to sudo, ignoring");
        }
        self.dispatch(command, &options.run, targets, handler, cancel)
            .await
    }

    async fn sudo_with(
        &self,
        command: &str,
        options: CallOptions,
        targets: &[T::Session],
        fallback: OutputHandler,
        cancel: &CancellationToken,
    ) -> Result<CompletionResult> {
        let escalation = &self.config.escalation;
        let command = build_escalated_command(command, escalation, options.as_user.as_deref());

        // lives exactly as long as this invocation
        let state = Arc::new(EscalationState::new());
        let handler = OutputHandler::Escalation(EscalationHandler::wrap(
            fallback,
            escalation,
            Arc::clone(&state),
            Arc::clone(&self.credentials),
            Arc::clone(&self.logger),
        ));

        // a remote sudo reads the password from a terminal
        let mut run = options.run;
        if run.pty.is_none() && self.config.default_run_options.pty.is_none() {
            run.pty = Some(true);
        }

        let mut result = self
            .dispatch(&command, &run, targets, handler, cancel)
            .await?;

        if let Some(host) = state.exhausted_host() {
            result.mark_failed(
                &host,
                FailureReason::AuthenticationExhausted {
                    attempts: state.failures(),
                },
            );
        }
        Ok(result)
    }

    async fn dispatch(
        &self,
        command: &str,
        run: &RunOptions,
        targets: &[T::Session],
        handler: OutputHandler,
        cancel: &CancellationToken,
    ) -> Result<CompletionResult> {
        let options = resolve(run, &self.config);
        Dispatcher::new(Arc::clone(&self.transport))
            .run(
                command,
                &options,
                targets,
                &handler,
                cancel,
                self.config.command_timeout(),
            )
            .await
    }
}

/// Builder for creating `Client` instances with fluent configuration
pub struct ClientBuilder<T: Transport> {
    transport: T,
    config: Config,
    credentials: Option<Credentials>,
    logger: Arc<dyn Logger>,
}

impl<T: Transport> ClientBuilder<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            config: Config::default(),
            credentials: None,
            logger: Arc::new(TracingLogger),
        }
    }

    /// Set the configuration directly
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Where the escalation password comes from
    pub fn credential_source(mut self, source: impl CredentialSource + 'static) -> Self {
        self.credentials = Some(Credentials::new(source));
        self
    }

    /// Where command output and escalation diagnostics are logged
    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    /// Add a variable to the default environment
    pub fn default_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config
            .default_environment
            .insert(key.into(), value.into());
        self
    }

    pub fn default_run_options(mut self, options: RunOptions) -> Self {
        self.config.default_run_options = options;
        self
    }

    pub fn default_shell(mut self, shell: impl Into<String>) -> Self {
        self.config.default_shell = Some(shell.into());
        self
    }

    /// Path of the escalation executable on the remote hosts
    pub fn escalation_executable(mut self, path: impl Into<String>) -> Self {
        self.config.escalation.executable = path.into();
        self
    }

    pub fn escalation_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.escalation.prompt = prompt.into();
        self
    }

    pub fn max_password_attempts(mut self, attempts: u32) -> Self {
        self.config.escalation.max_password_attempts = Some(attempts);
        self
    }

    /// Per-channel timeout in seconds
    pub fn timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.config.command_timeout_secs = Some(timeout_secs);
        self
    }

    /// Build the final client instance
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid
    pub fn build(self) -> Result<Client<T>> {
        self.config.validate()?;

        let credentials = self.credentials.unwrap_or_else(|| {
            Credentials::new(|| -> Result<String> {
                Err(Error::credential("no credential source configured"))
            })
        });

        Ok(Client {
            transport: Arc::new(self.transport),
            config: Arc::new(self.config),
            credentials: Arc::new(credentials),
            logger: self.logger,
        })
    }
}

/// Builder for configuring and executing one command invocation
pub struct CommandBuilder<'a, T: Transport> {
    client: &'a Client<T>,
    command: String,
    targets: Option<&'a [T::Session]>,
    options: CallOptions,
    callback: Option<OutputCallback>,
    cancel: Option<CancellationToken>,
}

impl<'a, T: Transport> CommandBuilder<'a, T> {
    fn new(client: &'a Client<T>, command: String) -> Self {
        Self {
            client,
            command,
            targets: None,
            options: CallOptions::default(),
            callback: None,
            cancel: None,
        }
    }

    /// Sessions to run on
    pub fn on(mut self, targets: &'a [T::Session]) -> Self {
        self.targets = Some(targets);
        self
    }

    /// Replace all call options at once
    pub fn options(mut self, options: CallOptions) -> Self {
        self.options = options;
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options = self.options.env(key, value);
        self
    }

    pub fn shell(mut self, shell: impl Into<String>) -> Self {
        self.options = self.options.shell(shell);
        self
    }

    pub fn pty(mut self, pty: bool) -> Self {
        self.options = self.options.pty(pty);
        self
    }

    pub fn as_user(mut self, user: impl Into<String>) -> Self {
        self.options = self.options.as_user(user);
        self
    }

    pub fn via(mut self, via: Via) -> Self {
        self.options = self.options.via(via);
        self
    }

    /// Shorthand for `via(Via::Sudo)`
    pub fn sudo(self) -> Self {
        self.via(Via::Sudo)
    }

    /// Receive output instead of having it logged
    pub fn on_output<F>(mut self, callback: F) -> Self
    where
        F: Fn(&dyn Channel, StreamKind, &str) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
        self
    }

    /// Abort the invocation when `token` is cancelled
    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub async fn execute(self) -> Result<CompletionResult> {
        let targets = self.targets.ok_or(Error::NoTargets)?;
        let fallback = self.client.fallback_handler(self.callback);
        let cancel = self.cancel.unwrap_or_else(CancellationToken::new);
        self.client
            .invoke_with(&self.command, self.options, targets, fallback, &cancel)
            .await
    }
}
