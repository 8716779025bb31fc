//! Directory operations

use std::path::{Path, PathBuf};

use tokio::fs;

use crate::errors::LaunchpadError;
use crate::filesys::file::File;

/// A directory wrapper with path
#[derive(Debug, Clone)]
pub struct Dir {
    path: PathBuf,
}

impl Dir {
    /// Create a new directory reference
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the directory path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the directory exists
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    /// Create the directory (and parents)
    pub async fn create(&self) -> Result<(), LaunchpadError> {
        fs::create_dir_all(&self.path).await?;
        Ok(())
    }

    /// List files whose extension is one of `extensions`, sorted by path.
    ///
    /// A missing directory yields an empty list.
    pub async fn list_files_with_ext(&self, extensions: &[&str]) -> Result<Vec<PathBuf>, LaunchpadError> {
        if !self.exists().await {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        let mut entries = fs::read_dir(&self.path).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let matches = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| extensions.contains(&e))
                .unwrap_or(false);
            if matches && entry.file_type().await?.is_file() {
                files.push(path);
            }
        }

        files.sort();
        Ok(files)
    }

    /// Get a file within this directory
    pub fn file(&self, name: &str) -> File {
        File::new(self.path.join(name))
    }

    /// Get a subdirectory
    pub fn subdir(&self, name: &str) -> Dir {
        Dir::new(self.path.join(name))
    }
}
