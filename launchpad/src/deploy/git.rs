//! Source control collaborator, backed by the git CLI

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::errors::LaunchpadError;
use crate::utils::home_dir;

/// Working-copy operations used by the deployment engine
#[async_trait]
pub trait SourceControl: Send + Sync {
    /// Clone `repo` at `branch` into `path` unless it already is a checkout.
    /// Returns `true` when a clone happened.
    async fn ensure_checked_out(
        &self,
        repo: &str,
        path: &Path,
        branch: &str,
        ssh_key: Option<&Path>,
    ) -> Result<bool, LaunchpadError>;

    /// Fetch `branch` and hard-reset the working copy to `origin/<branch>`
    async fn synchronize(&self, path: &Path, branch: &str, ssh_key: Option<&Path>) -> Result<(), LaunchpadError>;

    /// Full hash of HEAD
    async fn current_commit(&self, path: &Path) -> Result<String, LaunchpadError>;

    /// Abbreviated hash of HEAD
    async fn short_commit(&self, path: &Path) -> Result<String, LaunchpadError>;
}

/// Whether `path` holds a git working copy
pub fn is_checkout(path: &Path) -> bool {
    path.join(".git").exists()
}

/// Non-interactive git CLI
#[derive(Debug, Clone, Default)]
pub struct GitCli {
    /// Key used when a descriptor does not name one
    default_key: Option<PathBuf>,
}

impl GitCli {
    pub fn new(default_key: Option<PathBuf>) -> Self {
        Self { default_key }
    }

    fn resolve_key(&self, ssh_key: Option<&Path>) -> Option<PathBuf> {
        if let Some(key) = ssh_key.or(self.default_key.as_deref()) {
            return Some(key.to_path_buf());
        }
        home_dir()
            .map(|home| home.join(".ssh").join("id_rsa"))
            .filter(|key| key.exists())
    }

    fn command(&self, cwd: Option<&Path>, ssh_key: Option<&Path>) -> Command {
        let mut cmd = Command::new("git");
        cmd.env("GIT_TERMINAL_PROMPT", "0");
        if let Some(key) = self.resolve_key(ssh_key) {
            cmd.env("GIT_SSH_COMMAND", ssh_command(&key));
        }
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }
        cmd.kill_on_drop(true);
        cmd
    }

    async fn run(&self, mut cmd: Command, what: &str) -> Result<String, LaunchpadError> {
        let output = cmd
            .output()
            .await
            .map_err(|e| LaunchpadError::GitError(format!("Failed to run git {}: {}", what, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(LaunchpadError::GitError(format!("git {} failed: {}", what, stderr.trim())));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// `GIT_SSH_COMMAND` for a private key, never prompting
pub fn ssh_command(key: &Path) -> String {
    format!(
        "ssh -i {} -o StrictHostKeyChecking=no -o UserKnownHostsFile=/dev/null -o BatchMode=yes",
        key.display()
    )
}

#[async_trait]
impl SourceControl for GitCli {
    async fn ensure_checked_out(
        &self,
        repo: &str,
        path: &Path,
        branch: &str,
        ssh_key: Option<&Path>,
    ) -> Result<bool, LaunchpadError> {
        if is_checkout(path) {
            debug!("{} is already a checkout", path.display());
            return Ok(false);
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        info!("Cloning {} (branch: {}) into {}", repo, branch, path.display());
        let mut cmd = self.command(None, ssh_key);
        cmd.arg("clone").arg("-b").arg(branch).arg(repo).arg(path);
        self.run(cmd, "clone").await?;
        Ok(true)
    }

    async fn synchronize(&self, path: &Path, branch: &str, ssh_key: Option<&Path>) -> Result<(), LaunchpadError> {
        let mut fetch = self.command(Some(path), ssh_key);
        fetch.args(["fetch", "origin", branch]);
        self.run(fetch, "fetch").await?;

        let mut reset = self.command(Some(path), ssh_key);
        reset.args(["reset", "--hard", &format!("origin/{}", branch)]);
        self.run(reset, "reset").await?;
        Ok(())
    }

    async fn current_commit(&self, path: &Path) -> Result<String, LaunchpadError> {
        let mut cmd = self.command(Some(path), None);
        cmd.args(["rev-parse", "HEAD"]);
        self.run(cmd, "rev-parse").await
    }

    async fn short_commit(&self, path: &Path) -> Result<String, LaunchpadError> {
        let mut cmd = self.command(Some(path), None);
        cmd.args(["rev-parse", "--short", "HEAD"]);
        self.run(cmd, "rev-parse").await
    }
}
