//! Per-host transcript and error logs

use std::fmt::Display;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Local;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::protocol::{Credentials, ProtocolError, Session};

/// Where one host's logs go
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostLog {
    path: PathBuf,
    error_path: PathBuf,
    overwrite: bool,
}

impl HostLog {
    /// `<logdir>/<hostname>.log` and `<logdir>/<hostname>.log.error`
    pub fn new(logdir: &Path, hostname: &str, overwrite: bool) -> Self {
        let path = logdir.join(format!("{}.log", hostname));
        let error_path = logdir.join(format!("{}.log.error", hostname));
        Self {
            path,
            error_path,
            overwrite,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn error_path(&self) -> &Path {
        &self.error_path
    }

    async fn open(&self, path: &Path) -> std::io::Result<File> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut options = OpenOptions::new();
        options.create(true);
        if self.overwrite {
            options.write(true).truncate(true);
        } else {
            options.append(true);
        }
        options.open(path).await
    }

    pub async fn open_transcript(&self) -> std::io::Result<File> {
        debug!(path = %self.path.display(), overwrite = self.overwrite, "HostLog::open_transcript: called");
        self.open(&self.path).await
    }

    pub async fn write_error(&self, error: &(dyn Display + Sync)) -> std::io::Result<()> {
        debug!(path = %self.error_path.display(), "HostLog::write_error: called");
        let mut file = self.open(&self.error_path).await?;
        let line = format!("[{}] {}\n", Local::now().format("%Y-%m-%d %H:%M:%S"), error);
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }
}

/// Session decorator that copies traffic into a transcript file
pub struct LoggedSession {
    inner: Box<dyn Session>,
    transcript: File,
}

impl LoggedSession {
    pub fn new(inner: Box<dyn Session>, transcript: File) -> Self {
        Self { inner, transcript }
    }

    async fn record(&mut self, text: &str) {
        if let Err(e) = self.transcript.write_all(text.as_bytes()).await {
            warn!(error = %e, "LoggedSession::record: transcript write failed");
        }
    }
}

#[async_trait]
impl Session for LoggedSession {
    async fn authenticate(&mut self, credentials: &Credentials, wait: bool) -> Result<(), ProtocolError> {
        let user = credentials.username().unwrap_or("<default>").to_string();
        self.record(&format!("# authenticating as {}\n", user)).await;
        self.inner.authenticate(credentials, wait).await
    }

    async fn send(&mut self, data: &str) -> Result<(), ProtocolError> {
        self.record(&format!("{}\n", data)).await;
        self.inner.send(data).await
    }

    async fn execute(&mut self, command: &str) -> Result<String, ProtocolError> {
        let output = self.inner.execute(command).await?;
        self.record(&format!("{}\n{}", command, output)).await;
        Ok(output)
    }

    async fn close(&mut self) -> Result<(), ProtocolError> {
        let result = self.inner.close().await;
        if let Err(e) = self.transcript.flush().await {
            warn!(error = %e, "LoggedSession::close: transcript flush failed");
        }
        result
    }
}
