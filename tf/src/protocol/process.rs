//! Expect-style sessions over a spawned client program

use std::io::Write as _;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{Credentials, ProtocolError, Session};
use crate::config::ProtocolConfig;

const READ_CHUNK: usize = 4096;
const EXIT_GRACE: Duration = Duration::from_secs(2);

/// Compiled prompt patterns shared by all process-backed sessions
#[derive(Debug)]
pub struct PromptPatterns {
    pub prompt: Regex,
    pub login: Regex,
    pub password: Regex,
}

impl PromptPatterns {
    pub fn from_config(config: &ProtocolConfig) -> Result<Self, ProtocolError> {
        Ok(Self {
            prompt: compile("prompt", &config.prompt)?,
            login: compile("login-prompt", &config.login_prompt)?,
            password: compile("password-prompt", &config.password_prompt)?,
        })
    }
}

fn compile(name: &str, pattern: &str) -> Result<Regex, ProtocolError> {
    Regex::new(pattern).map_err(|source| ProtocolError::InvalidPattern {
        name: name.to_string(),
        source,
    })
}

/// A session driving a child process through its stdin/stdout
///
/// Output from stdout and stderr is collected by reader tasks and consumed
/// by [`ProcessSession::expect`], which matches the configured patterns
/// against everything received since the last match.
pub struct ProcessSession {
    host: String,
    child: Child,
    stdin: Option<ChildStdin>,
    output: mpsc::UnboundedReceiver<String>,
    buffer: String,
    patterns: Arc<PromptPatterns>,
    timeout: Duration,
    echo: bool,
}

impl ProcessSession {
    pub fn spawn(
        mut command: Command,
        host: &str,
        patterns: Arc<PromptPatterns>,
        timeout: Duration,
        echo: bool,
    ) -> Result<Self, ProtocolError> {
        let program = command.as_std().get_program().to_string_lossy().into_owned();
        debug!(%program, %host, echo, "ProcessSession::spawn: called");

        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = command
            .spawn()
            .map_err(|source| ProtocolError::Spawn { program, source })?;

        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            spawn_reader(stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_reader(stderr, tx);
        }
        let stdin = child.stdin.take();

        Ok(Self {
            host: host.to_string(),
            child,
            stdin,
            output: rx,
            buffer: String::new(),
            patterns,
            timeout,
            echo,
        })
    }

    pub async fn write_raw(&mut self, data: &str) -> Result<(), ProtocolError> {
        let stdin = self.stdin.as_mut().ok_or(ProtocolError::NotConnected)?;
        stdin.write_all(data.as_bytes()).await?;
        stdin.flush().await?;
        Ok(())
    }

    pub async fn write_line(&mut self, line: &str) -> Result<(), ProtocolError> {
        self.write_raw(&format!("{}\n", line)).await
    }

    /// Wait until one of `patterns` matches the unread output
    ///
    /// Returns the index of the matching pattern and the consumed text.
    pub async fn expect(&mut self, patterns: &[&Regex], waiting_for: &str) -> Result<(usize, String), ProtocolError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            for (index, pattern) in patterns.iter().enumerate() {
                if let Some(found) = pattern.find(&self.buffer) {
                    let consumed: String = self.buffer.drain(..found.end()).collect();
                    return Ok((index, consumed));
                }
            }

            match tokio::time::timeout_at(deadline, self.output.recv()).await {
                Ok(Some(chunk)) => {
                    if self.echo {
                        let mut stdout = std::io::stdout().lock();
                        let _ = stdout.write_all(chunk.as_bytes());
                        let _ = stdout.flush();
                    }
                    self.buffer.push_str(&chunk);
                }
                Ok(None) => {
                    return Err(ProtocolError::ConnectionClosed {
                        host: self.host.clone(),
                    });
                }
                Err(_) => {
                    return Err(ProtocolError::Timeout {
                        host: self.host.clone(),
                        waiting_for: waiting_for.to_string(),
                        timeout_ms: self.timeout.as_millis() as u64,
                    });
                }
            }
        }
    }

    pub async fn wait_for_prompt(&mut self) -> Result<String, ProtocolError> {
        let patterns = self.patterns.clone();
        let (_, text) = self.expect(&[&patterns.prompt], "prompt").await?;
        Ok(text)
    }

    /// Answer login and password prompts until the command prompt shows
    ///
    /// Without `wait`, returns as soon as the password has been sent.
    pub async fn login(&mut self, username: Option<&str>, password: Option<&str>, wait: bool) -> Result<(), ProtocolError> {
        debug!(host = %self.host, ?username, wait, "ProcessSession::login: called");
        let patterns = self.patterns.clone();
        let mut username_sent = false;
        let mut password_sent = false;

        loop {
            let (which, _) = self
                .expect(&[&patterns.login, &patterns.password, &patterns.prompt], "login")
                .await?;
            match which {
                0 => {
                    if username_sent {
                        return Err(self.auth_failed("login prompt repeated"));
                    }
                    let username = username.ok_or_else(|| self.missing("username"))?;
                    self.write_line(username).await?;
                    username_sent = true;
                }
                1 => {
                    if password_sent {
                        return Err(self.auth_failed("password rejected"));
                    }
                    let password = password.ok_or_else(|| self.missing("password"))?;
                    self.write_line(password).await?;
                    password_sent = true;
                    if !wait {
                        return Ok(());
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    /// Close stdin and reap the child, killing it if it lingers
    pub async fn shutdown(&mut self) -> Result<(), ProtocolError> {
        debug!(host = %self.host, "ProcessSession::shutdown: called");
        drop(self.stdin.take());
        match tokio::time::timeout(EXIT_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => {
                debug!(host = %self.host, %status, "ProcessSession::shutdown: child exited");
                Ok(())
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => {
                warn!(host = %self.host, "ProcessSession::shutdown: child did not exit, killing");
                self.child.kill().await?;
                Ok(())
            }
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn auth_failed(&self, reason: &str) -> ProtocolError {
        ProtocolError::AuthenticationFailed {
            host: self.host.clone(),
            reason: reason.to_string(),
        }
    }

    fn missing(&self, what: &str) -> ProtocolError {
        ProtocolError::MissingCredentials {
            host: self.host.clone(),
            what: what.to_string(),
        }
    }
}

#[async_trait]
impl Session for ProcessSession {
    async fn authenticate(&mut self, credentials: &Credentials, wait: bool) -> Result<(), ProtocolError> {
        match credentials {
            Credentials::Password { username, password } => {
                self.login(username.as_deref(), password.as_deref(), wait).await
            }
            Credentials::KeyFile { .. } => Err(self.auth_failed("key files require ssh")),
        }
    }

    async fn send(&mut self, data: &str) -> Result<(), ProtocolError> {
        self.write_line(data).await
    }

    async fn execute(&mut self, command: &str) -> Result<String, ProtocolError> {
        debug!(host = %self.host, %command, "ProcessSession::execute: called");
        self.write_line(command).await?;
        self.wait_for_prompt().await
    }

    async fn close(&mut self) -> Result<(), ProtocolError> {
        self.shutdown().await
    }
}

fn spawn_reader<R>(mut reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; READ_CHUNK];
        let mut pending = Vec::new();
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    pending.extend_from_slice(&buf[..n]);
                    let chunk = decode_available(&mut pending);
                    if !chunk.is_empty() && tx.send(chunk).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    debug!(error = %e, "spawn_reader: read failed");
                    break;
                }
            }
        }
        if !pending.is_empty() {
            let _ = tx.send(String::from_utf8_lossy(&pending).into_owned());
        }
    });
}

/// Decode as much of `pending` as possible
///
/// An incomplete character at the end stays in `pending` for the next read;
/// invalid bytes become U+FFFD.
fn decode_available(pending: &mut Vec<u8>) -> String {
    let mut out = String::new();
    loop {
        match std::str::from_utf8(pending) {
            Ok(text) => {
                out.push_str(text);
                pending.clear();
                return out;
            }
            Err(e) => {
                let valid = e.valid_up_to();
                out.push_str(&String::from_utf8_lossy(&pending[..valid]));
                match e.error_len() {
                    Some(len) => {
                        out.push(char::REPLACEMENT_CHARACTER);
                        pending.drain(..valid + len);
                    }
                    None => {
                        pending.drain(..valid);
                        return out;
                    }
                }
            }
        }
    }
}
