//! Scripted in-memory transport for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use remote_invoke::{
    Channel, ExitStatus, HostId, Logger, OptionSet, OutputHandler, Result, Session, Severity,
    StreamKind, Transport,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// What a fake host does once its channel runs a command
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Emit these chunks in order, then exit; `None` waits until closed.
    /// The last chunk and the exit happen in the same poll.
    Script {
        chunks: Vec<(StreamKind, String)>,
        exit: Option<i32>,
    },
    /// Behave like sudo: prompt, check the line sent back, retry
    Sudo {
        prompt: String,
        password: String,
        tries: u32,
        /// Write the rejection and the next prompt as one chunk
        combined: bool,
    },
}

impl Behavior {
    pub fn exits(code: i32) -> Self {
        Behavior::Script {
            chunks: Vec::new(),
            exit: Some(code),
        }
    }

    pub fn prints(chunks: &[(StreamKind, &str)], exit: i32) -> Self {
        Behavior::Script {
            chunks: chunks.iter().map(|(s, c)| (*s, c.to_string())).collect(),
            exit: Some(exit),
        }
    }

    pub fn hangs() -> Self {
        Behavior::Script {
            chunks: Vec::new(),
            exit: None,
        }
    }

    pub fn sudo(password: &str) -> Self {
        Behavior::Sudo {
            prompt: "sudo password: ".to_string(),
            password: password.to_string(),
            tries: 3,
            combined: false,
        }
    }

    /// Like [`Behavior::sudo`], but a rejection arrives with the next prompt
    pub fn sudo_combined(password: &str) -> Self {
        Behavior::Sudo {
            prompt: "sudo password: ".to_string(),
            password: password.to_string(),
            tries: 3,
            combined: true,
        }
    }
}

pub struct FakeSession {
    host: HostId,
}

impl FakeSession {
    pub fn new(host: &str) -> Self {
        Self {
            host: HostId::new(host),
        }
    }
}

impl Session for FakeSession {
    fn host(&self) -> &HostId {
        &self.host
    }
}

/// What happened on one host's channel
#[derive(Debug, Default)]
pub struct ChannelRecord {
    pub commands: Vec<String>,
    pub options: Vec<OptionSet>,
    pub sent: Vec<String>,
    pub closed: bool,
}

pub struct FakeChannel {
    host: HostId,
    record: Arc<Mutex<ChannelRecord>>,
    closed: CancellationToken,
}

impl Channel for FakeChannel {
    fn host(&self) -> &HostId {
        &self.host
    }

    fn send_data(&self, data: &[u8]) -> Result<()> {
        self.record
            .lock()
            .sent
            .push(String::from_utf8_lossy(data).into_owned());
        Ok(())
    }

    fn close(&self) {
        self.record.lock().closed = true;
        self.closed.cancel();
    }
}

#[derive(Default)]
pub struct ScriptedTransport {
    behaviors: HashMap<HostId, Behavior>,
    unreachable: HashSet<HostId>,
    records: Mutex<HashMap<HostId, Arc<Mutex<ChannelRecord>>>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(mut self, host: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(HostId::new(host), behavior);
        self
    }

    pub fn unreachable(mut self, host: &str) -> Self {
        self.unreachable.insert(HostId::new(host));
        self
    }

    pub fn record(&self, host: &str) -> Arc<Mutex<ChannelRecord>> {
        Arc::clone(
            self.records
                .lock()
                .entry(HostId::new(host))
                .or_default(),
        )
    }
}

async fn wait_for_input(record: &Mutex<ChannelRecord>, seen: usize) -> Option<String> {
    // bounded so a missing answer fails the test instead of hanging it
    for _ in 0..1000 {
        if let Some(line) = record.lock().sent.get(seen).cloned() {
            return Some(line);
        }
        tokio::task::yield_now().await;
    }
    None
}

#[async_trait]
impl Transport for ScriptedTransport {
    type Session = FakeSession;
    type Channel = FakeChannel;

    async fn open_channel(&self, session: &FakeSession) -> Result<FakeChannel> {
        if self.unreachable.contains(&session.host) {
            return Err(remote_invoke::Error::transport(format!(
                "connection refused by {}",
                session.host
            )));
        }
        Ok(FakeChannel {
            host: session.host.clone(),
            record: self.record(session.host.as_str()),
            closed: CancellationToken::new(),
        })
    }

    async fn submit(
        &self,
        channel: &FakeChannel,
        command: &str,
        options: &OptionSet,
        handler: &OutputHandler,
    ) -> Result<ExitStatus> {
        {
            let mut record = channel.record.lock();
            record.commands.push(command.to_string());
            record.options.push(options.clone());
        }

        let behavior = self
            .behaviors
            .get(&channel.host)
            .cloned()
            .unwrap_or_else(|| Behavior::exits(0));

        match behavior {
            Behavior::Script { chunks, exit } => {
                for (i, (stream, chunk)) in chunks.into_iter().enumerate() {
                    if i > 0 {
                        tokio::task::yield_now().await;
                    }
                    if channel.closed.is_cancelled() {
                        return Ok(ExitStatus::Aborted(Some("closed".to_string())));
                    }
                    handler.handle(channel, stream, &chunk);
                }
                match exit {
                    Some(code) => Ok(ExitStatus::Exited(code)),
                    None => {
                        channel.closed.cancelled().await;
                        Ok(ExitStatus::Aborted(Some("closed".to_string())))
                    }
                }
            }
            Behavior::Sudo {
                prompt,
                password,
                tries,
                combined,
            } => {
                let mut seen = channel.record.lock().sent.len();
                let mut pending = prompt.clone();
                for attempt in 1..=tries {
                    handler.handle(channel, StreamKind::Err, &pending);
                    tokio::task::yield_now().await;
                    if channel.closed.is_cancelled() {
                        return Ok(ExitStatus::Aborted(Some("closed".to_string())));
                    }

                    let line = match wait_for_input(&channel.record, seen).await {
                        Some(line) => line,
                        None => return Ok(ExitStatus::Aborted(Some("no password".to_string()))),
                    };
                    seen += 1;

                    if line.trim_end() == password {
                        handler.handle(channel, StreamKind::Out, "ok\n");
                        return Ok(ExitStatus::Exited(0));
                    }
                    if attempt < tries {
                        if combined {
                            pending = format!("Sorry, try again.\n{}", prompt);
                            continue;
                        }
                        handler.handle(channel, StreamKind::Err, "Sorry, try again.\n");
                        tokio::task::yield_now().await;
                        if channel.closed.is_cancelled() {
                            return Ok(ExitStatus::Aborted(Some("closed".to_string())));
                        }
                    }
                }
                handler.handle(
                    channel,
                    StreamKind::Err,
                    &format!("sudo: {} incorrect password attempts\n", tries),
                );
                Ok(ExitStatus::Exited(1))
            }
        }
    }
}

/// Logger that keeps every line for inspection
#[derive(Default)]
pub struct RecordingLogger {
    lines: Mutex<Vec<(Severity, String, String)>>,
}

impl RecordingLogger {
    pub fn lines(&self) -> Vec<(Severity, String, String)> {
        self.lines.lock().clone()
    }

    pub fn matching(&self, needle: &str) -> Vec<(Severity, String, String)> {
        self.lines()
            .into_iter()
            .filter(|(_, message, _)| message.contains(needle))
            .collect()
    }
}

impl Logger for RecordingLogger {
    fn log(&self, severity: Severity, message: &str, tag: &str) {
        self.lines
            .lock()
            .push((severity, message.to_string(), tag.to_string()));
    }
}

pub fn sessions(hosts: &[&str]) -> Vec<FakeSession> {
    hosts.iter().map(|host| FakeSession::new(host)).collect()
}
