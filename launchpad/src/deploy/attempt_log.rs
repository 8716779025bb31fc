//! Per-attempt deployment log files
//!
//! One append-only file per attempt, grouped by target:
//! `logs/deployments/<target>/<attempt-id>.log`.

use chrono::{SecondsFormat, Utc};
use tracing::warn;

use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// Origin of a captured output line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    fn tag(&self) -> &'static str {
        match self {
            Stream::Stdout => "stdout",
            Stream::Stderr => "stderr",
        }
    }
}

/// Log of a single deployment attempt
#[derive(Debug, Clone)]
pub struct AttemptLog {
    file: File,
}

impl AttemptLog {
    pub fn new(logs_dir: &Dir, target: &str, attempt_id: &str) -> Self {
        Self {
            file: logs_dir.subdir(target).file(&format!("{}.log", attempt_id)),
        }
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    pub async fn info(&self, message: &str) {
        self.write("INFO", message).await;
    }

    pub async fn warn(&self, message: &str) {
        self.write("WARN", message).await;
    }

    pub async fn error(&self, message: &str) {
        self.write("ERROR", message).await;
    }

    /// Captured command output, tagged with its stream
    pub async fn output(&self, stream: Stream, line: &str) {
        self.write(stream.tag(), line).await;
    }

    // A broken log file must not fail the deployment itself
    async fn write(&self, level: &str, message: &str) {
        let line = format!(
            "[{}] [{}] {}",
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            level,
            message
        );
        if let Err(e) = self.file.append_line(&line).await {
            warn!("Unable to write deployment log {}: {}", self.file.path().display(), e);
        }
    }
}
