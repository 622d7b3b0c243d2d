use anyhow::{Context, Result};
use clap::Parser;
use remote_invoke::{CallOptions, Client, Config, ProcessTransport, RemoteHost, Via};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const PASSWORD_VAR: &str = "REMOTE_INVOKE_PASSWORD";

/// Run a shell command on many hosts at once
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Host to run on (repeatable)
    #[arg(short = 'H', long = "host", value_name = "HOST", required = true)]
    hosts: Vec<String>,

    /// Run the command through sudo
    #[arg(long)]
    sudo: bool,

    /// Target user for sudo
    #[arg(long = "as", value_name = "USER")]
    as_user: Option<String>,

    /// Environment variable for the command (repeatable)
    #[arg(short, long = "env", value_name = "KEY=VALUE", value_parser = parse_env_var)]
    env: Vec<(String, String)>,

    /// Shell used to wrap the command
    #[arg(long)]
    shell: Option<String>,

    /// Request a pseudo-terminal on the remote side (implied by --sudo, which
    /// needs one for the password prompt)
    #[arg(long)]
    pty: bool,

    /// Per-host timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run locally through `sh -c`, treating hosts as labels
    #[arg(long)]
    local: bool,

    /// Print the per-host result as JSON
    #[arg(long)]
    json: bool,

    /// Command to run
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

fn parse_env_var(raw: &str) -> std::result::Result<(String, String), String> {
    raw.split_once('=')
        .filter(|(key, _)| !key.is_empty())
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", raw))
}

/// Password from the environment, else asked for on the terminal
fn obtain_password() -> remote_invoke::Result<String> {
    if let Ok(password) = std::env::var(PASSWORD_VAR) {
        return Ok(password);
    }

    eprint!("Password: ");
    io::stderr().flush()?;
    let mut line = String::new();
    let read = io::stdin().lock().read_line(&mut line)?;
    if read == 0 {
        return Err(remote_invoke::Error::credential("stdin closed"));
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

async fn execute(cli: Cli) -> Result<bool> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(timeout) = cli.timeout {
        config.command_timeout_secs = Some(timeout);
    }

    let mut options = CallOptions::new();
    for (key, value) in cli.env {
        options = options.env(key, value);
    }
    if let Some(shell) = cli.shell {
        options = options.shell(shell);
    }
    if cli.pty {
        options = options.pty(true);
    }
    if let Some(user) = cli.as_user {
        options = options.as_user(user);
    }
    if cli.sudo {
        options = options.via(Via::Sudo);
    }

    let transport = if cli.local {
        ProcessTransport::local()
    } else {
        ProcessTransport::ssh(&config.transport)
    };
    let client = Client::builder(transport)
        .config(config)
        .credential_source(obtain_password)
        .build()?;

    let hosts: Vec<RemoteHost> = cli.hosts.into_iter().map(RemoteHost::new).collect();
    let command = cli.command.join(" ");

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let result = client
        .command(command)
        .on(&hosts)
        .options(options)
        .cancel_on(cancel)
        .execute()
        .await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    }

    for outcome in result.outcomes.iter().filter(|o| !o.is_success()) {
        if let Some(reason) = &outcome.failure {
            eprintln!("{}: {}", outcome.host, reason);
        }
    }

    Ok(result.is_success())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with environment-based filtering
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match execute(cli).await {
        Ok(true) => {
            info!("Command completed successfully");
            Ok(())
        }
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("Command execution failed: {:?}", e);

            match e.downcast_ref::<remote_invoke::Error>() {
                Some(err) => eprintln!("Error: {}", err.user_message()),
                None => eprintln!("Error: {:#}", e),
            }

            std::process::exit(1);
        }
    }
}
