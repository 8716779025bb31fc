//! File operations

use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::errors::LaunchpadError;

/// A file wrapper with path
#[derive(Debug, Clone)]
pub struct File {
    path: PathBuf,
}

impl File {
    /// Create a new file reference
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the file exists
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path).await.is_ok()
    }

    /// Read file contents as string
    pub async fn read_string(&self) -> Result<String, LaunchpadError> {
        let mut file = fs::File::open(&self.path).await?;
        let mut contents = String::new();
        file.read_to_string(&mut contents).await?;
        Ok(contents)
    }

    /// Read file as JSON
    pub async fn read_json<T: DeserializeOwned>(&self) -> Result<T, LaunchpadError> {
        let contents = self.read_string().await?;
        let value = serde_json::from_str(&contents)?;
        Ok(value)
    }

    /// Read file as JSON, falling back to the default value when it does not exist yet
    pub async fn read_json_or_default<T: DeserializeOwned + Default>(&self) -> Result<T, LaunchpadError> {
        if !self.exists().await {
            return Ok(T::default());
        }
        self.read_json().await
    }

    /// Write JSON to file, atomically replacing the previous contents
    pub async fn write_json<T: Serialize>(&self, value: &T) -> Result<(), LaunchpadError> {
        let contents = serde_json::to_string_pretty(value)?;
        self.write_atomic(contents.as_bytes()).await
    }

    /// Append a single line, creating the file and its parent directory on first use
    pub async fn append_line(&self, line: &str) -> Result<(), LaunchpadError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        // One write per line so concurrent appenders never interleave mid-line
        file.write_all(format!("{}\n", line).as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Add the executable bits (0o755) on Unix.
    ///
    /// A no-op on non-Unix platforms.
    pub async fn set_executable(&self) -> Result<(), LaunchpadError> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let meta = fs::metadata(&self.path).await?;
            let mut perms = meta.permissions();
            perms.set_mode(perms.mode() | 0o755);
            fs::set_permissions(&self.path, perms).await?;
        }
        Ok(())
    }

    /// Atomic write using a temporary file in the same directory
    pub async fn write_atomic(&self, contents: &[u8]) -> Result<(), LaunchpadError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let temp_path = self.path.with_extension("tmp");

        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }
}
