//! Process supervisor collaborator, backed by the pm2 CLI

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info};

use crate::errors::LaunchpadError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Online,
    Stopped,
    Errored,
    Launching,
    #[serde(other)]
    Unknown,
}

/// One supervised process as reported by the supervisor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub name: String,
    pub status: ProcessStatus,
    /// Bytes
    pub memory: u64,
    /// Percent
    pub cpu: f64,
    /// Milliseconds since the epoch
    pub uptime_start: Option<i64>,
    pub restart_count: u32,
}

/// Options for a fresh registration
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    pub cwd: PathBuf,
    pub instances: u32,
    /// e.g. `512M`
    pub max_memory: Option<String>,
    pub env: BTreeMap<String, String>,
}

/// Named long-running processes
#[async_trait]
pub trait ProcessSupervisor: Send + Sync {
    async fn list(&self) -> Result<Vec<ProcessInfo>, LaunchpadError>;

    async fn start(&self, name: &str, command: &str, options: &StartOptions) -> Result<(), LaunchpadError>;

    /// No-op when `name` is not registered
    async fn stop(&self, name: &str) -> Result<(), LaunchpadError>;

    /// No-op when `name` is not registered
    async fn delete(&self, name: &str) -> Result<(), LaunchpadError>;

    async fn restart(&self, name: &str) -> Result<(), LaunchpadError>;

    /// Save the process table so it survives a reboot
    async fn persist(&self) -> Result<(), LaunchpadError>;

    async fn is_registered(&self, name: &str) -> Result<bool, LaunchpadError> {
        Ok(self.list().await?.iter().any(|p| p.name == name))
    }
}

/// pm2 CLI supervisor
#[derive(Debug, Clone)]
pub struct Pm2 {
    binary: String,
}

impl Default for Pm2 {
    fn default() -> Self {
        Self {
            binary: "pm2".to_string(),
        }
    }
}

impl Pm2 {
    pub fn new(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }

    async fn run(&self, cmd: &mut Command, what: &str) -> Result<String, LaunchpadError> {
        let output = cmd
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| LaunchpadError::SupervisorError(format!("Failed to run {} {}: {}", self.binary, what, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(LaunchpadError::SupervisorError(format!(
                "{} {} failed: {}",
                self.binary,
                what,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl ProcessSupervisor for Pm2 {
    async fn list(&self) -> Result<Vec<ProcessInfo>, LaunchpadError> {
        let stdout = self.run(Command::new(&self.binary).arg("jlist"), "jlist").await?;
        parse_jlist(&stdout)
    }

    async fn start(&self, name: &str, command: &str, options: &StartOptions) -> Result<(), LaunchpadError> {
        info!("Starting process {}: {}", name, command);

        let mut cmd = Command::new(&self.binary);
        cmd.arg("start")
            .arg(command)
            .arg("--name")
            .arg(name)
            .arg("--cwd")
            .arg(&options.cwd)
            .envs(&options.env);
        if options.instances > 1 {
            cmd.arg("-i").arg(options.instances.to_string());
        }
        if let Some(memory) = &options.max_memory {
            cmd.arg("--max-memory-restart").arg(memory);
        }

        self.run(&mut cmd, "start").await?;
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<(), LaunchpadError> {
        if !self.is_registered(name).await? {
            debug!("Process {} is not registered, nothing to stop", name);
            return Ok(());
        }
        self.run(Command::new(&self.binary).args(["stop", name]), "stop").await?;
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), LaunchpadError> {
        if !self.is_registered(name).await? {
            debug!("Process {} is not registered, nothing to delete", name);
            return Ok(());
        }
        self.run(Command::new(&self.binary).args(["delete", name]), "delete").await?;
        Ok(())
    }

    async fn restart(&self, name: &str) -> Result<(), LaunchpadError> {
        info!("Restarting process {}", name);
        self.run(Command::new(&self.binary).args(["restart", name, "--update-env"]), "restart")
            .await?;
        Ok(())
    }

    async fn persist(&self) -> Result<(), LaunchpadError> {
        self.run(Command::new(&self.binary).arg("save"), "save").await?;
        Ok(())
    }
}

#[derive(Deserialize)]
struct JlistEntry {
    name: String,
    #[serde(default)]
    monit: JlistMonit,
    #[serde(default)]
    pm2_env: JlistEnv,
}

#[derive(Default, Deserialize)]
struct JlistMonit {
    #[serde(default)]
    memory: u64,
    #[serde(default)]
    cpu: f64,
}

#[derive(Deserialize)]
struct JlistEnv {
    #[serde(default = "unknown_status")]
    status: ProcessStatus,
    #[serde(default)]
    pm_uptime: Option<i64>,
    #[serde(default)]
    restart_time: u32,
}

impl Default for JlistEnv {
    fn default() -> Self {
        Self {
            status: unknown_status(),
            pm_uptime: None,
            restart_time: 0,
        }
    }
}

fn unknown_status() -> ProcessStatus {
    ProcessStatus::Unknown
}

/// Parse `pm2 jlist` output
pub fn parse_jlist(raw: &str) -> Result<Vec<ProcessInfo>, LaunchpadError> {
    // pm2 may print update notices before the JSON array
    let json = match raw.find('[') {
        Some(start) => &raw[start..],
        None => return Ok(Vec::new()),
    };
    let entries: Vec<JlistEntry> = serde_json::from_str(json)
        .map_err(|e| LaunchpadError::SupervisorError(format!("Unreadable process list: {}", e)))?;

    Ok(entries
        .into_iter()
        .map(|entry| ProcessInfo {
            name: entry.name,
            status: entry.pm2_env.status,
            memory: entry.monit.memory,
            cpu: entry.monit.cpu,
            uptime_start: entry.pm2_env.pm_uptime,
            restart_count: entry.pm2_env.restart_time,
        })
        .collect())
}
