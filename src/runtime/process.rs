//! Transport that runs each channel as a child process
//!
//! With the default [`TransportConfig`] every channel is `ssh -T <host> --
//! <command>`, relying on the user's ssh setup (agent, `ControlMaster`) for
//! the connection itself. [`ProcessTransport::local`] runs commands through
//! `sh -c` on this machine instead; the host names are then only labels.

use crate::core::config::TransportConfig;
use crate::core::error::{Error, Result};
use crate::core::options::OptionSet;
use crate::runtime::handler::OutputHandler;
use crate::runtime::transport::{Channel, ExitStatus, HostId, Session, StreamKind, Transport};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::process::Stdio;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const READ_BUFFER_SIZE: usize = 8192;

/// A host reachable through the configured remote-shell program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteHost {
    host: HostId,
}

impl RemoteHost {
    pub fn new(host: impl Into<HostId>) -> Self {
        Self { host: host.into() }
    }
}

impl Session for RemoteHost {
    fn host(&self) -> &HostId {
        &self.host
    }
}

/// Channel backed by a child process
pub struct ProcessChannel {
    host: HostId,
    input_tx: mpsc::UnboundedSender<Vec<u8>>,
    input_rx: Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>,
    closed: CancellationToken,
}

impl Channel for ProcessChannel {
    fn host(&self) -> &HostId {
        &self.host
    }

    fn send_data(&self, data: &[u8]) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(Error::ChannelClosed(self.host.to_string()));
        }
        self.input_tx
            .send(data.to_vec())
            .map_err(|_| Error::ChannelClosed(self.host.to_string()))
    }

    fn close(&self) {
        self.closed.cancel();
    }
}

#[derive(Debug, Clone)]
pub struct ProcessTransport {
    program: String,
    args: Vec<String>,
    /// Whether the host name is passed to the program
    remote: bool,
}

impl ProcessTransport {
    pub fn ssh(config: &TransportConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            remote: true,
        }
    }

    pub fn local() -> Self {
        Self {
            program: "sh".to_string(),
            args: vec!["-c".to_string()],
            remote: false,
        }
    }

    fn command_for(&self, host: &HostId, command: &str, options: &OptionSet) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if self.remote {
            if options.pty {
                cmd.arg("-tt");
            }
            for (key, value) in &options.extra {
                cmd.arg("-o").arg(format!("{}={}", key, value));
            }
            cmd.arg(host.as_str()).arg("--");
        }
        cmd.arg(render_command(command, options));
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

impl Default for ProcessTransport {
    fn default() -> Self {
        Self::ssh(&TransportConfig::default())
    }
}

#[async_trait]
impl Transport for ProcessTransport {
    type Session = RemoteHost;
    type Channel = ProcessChannel;

    async fn open_channel(&self, session: &RemoteHost) -> Result<ProcessChannel> {
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        Ok(ProcessChannel {
            host: session.host.clone(),
            input_tx,
            input_rx: Mutex::new(Some(input_rx)),
            closed: CancellationToken::new(),
        })
    }

    async fn submit(
        &self,
        channel: &ProcessChannel,
        command: &str,
        options: &OptionSet,
        handler: &OutputHandler,
    ) -> Result<ExitStatus> {
        let mut input_rx = channel
            .input_rx
            .lock()
            .take()
            .ok_or_else(|| Error::ChannelClosed(channel.host.to_string()))?;

        let mut child = self.command_for(&channel.host, command, options).spawn()?;
        debug!(host = %channel.host, pid = ?child.id(), "spawned {}", self.program);

        let mut stdin = child.stdin.take();
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::transport("child stdout was not captured"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::transport("child stderr was not captured"))?;

        let mut out_buf = vec![0u8; READ_BUFFER_SIZE];
        let mut err_buf = vec![0u8; READ_BUFFER_SIZE];
        let mut out_text = Utf8Decoder::default();
        let mut err_text = Utf8Decoder::default();
        let mut out_open = true;
        let mut err_open = true;

        while out_open || err_open {
            tokio::select! {
                _ = channel.closed.cancelled() => {
                    let _ = child.kill().await;
                    return Ok(ExitStatus::Aborted(Some("channel closed".to_string())));
                }
                read = stdout.read(&mut out_buf), if out_open => {
                    let text = match read? {
                        0 => {
                            out_open = false;
                            out_text.finish()
                        }
                        n => out_text.decode(&out_buf[..n]),
                    };
                    if !text.is_empty() {
                        handler.handle(channel, StreamKind::Out, &text);
                    }
                }
                read = stderr.read(&mut err_buf), if err_open => {
                    let text = match read? {
                        0 => {
                            err_open = false;
                            err_text.finish()
                        }
                        n => err_text.decode(&err_buf[..n]),
                    };
                    if !text.is_empty() {
                        handler.handle(channel, StreamKind::Err, &text);
                    }
                }
                Some(data) = input_rx.recv() => {
                    if let Some(writer) = stdin.as_mut() {
                        writer.write_all(&data).await?;
                        writer.flush().await?;
                    }
                }
            }
        }

        drop(stdin);
        let status = tokio::select! {
            _ = channel.closed.cancelled() => {
                let _ = child.kill().await;
                return Ok(ExitStatus::Aborted(Some("channel closed".to_string())));
            }
            status = child.wait() => status?,
        };

        Ok(match status.code() {
            Some(code) => ExitStatus::Exited(code),
            None => ExitStatus::Aborted(Some("terminated by signal".to_string())),
        })
    }
}

/// Decodes a byte stream as UTF-8 across read boundaries
///
/// A character split between two reads is held back until its remaining
/// bytes arrive. Invalid sequences become U+FFFD.
#[derive(Debug, Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut text = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(valid) => {
                    text.push_str(valid);
                    self.pending.clear();
                    return text;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    text.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        // incomplete trailing character
                        None => {
                            self.pending.drain(..valid);
                            return text;
                        }
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                    }
                }
            }
        }
    }

    /// Flush whatever is held back once the stream has ended
    fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}

/// Render the remote command line: environment, then shell wrapping
pub fn render_command(command: &str, options: &OptionSet) -> String {
    let mut parts = Vec::new();

    if let Some(env) = &options.env {
        parts.push("env".to_string());
        for (key, value) in env {
            parts.push(format!("{}={}", key, shell_quote(value)));
        }
    }

    match &options.shell {
        Some(shell) => {
            parts.push(shell.clone());
            parts.push("-c".to_string());
            parts.push(shell_quote(command));
        }
        None => parts.push(command.to_string()),
    }

    parts.join(" ")
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}
