//! Shared fixtures: a temporary storage layout plus in-memory source control
//! and process supervisor.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use launchpad::app::state::AppState;
use launchpad::config::loader::ConfigStore;
use launchpad::deploy::git::SourceControl;
use launchpad::deploy::supervisor::{ProcessInfo, ProcessStatus, ProcessSupervisor, StartOptions};
use launchpad::errors::LaunchpadError;
use launchpad::storage::layout::StorageLayout;

pub const COMMIT: &str = "abc1234";

/// Creates the checkout directory with a `.git` marker instead of cloning
#[derive(Default)]
pub struct FakeSource {
    pub synced: Mutex<Vec<(PathBuf, String)>>,
    /// Held inside `synchronize` to stretch an attempt
    pub delay: Option<Duration>,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl FakeSource {
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn synced(&self) -> Vec<(PathBuf, String)> {
        self.synced.lock().unwrap().clone()
    }

    /// Most synchronizations observed in flight at once
    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceControl for FakeSource {
    async fn ensure_checked_out(
        &self,
        _repo: &str,
        path: &Path,
        _branch: &str,
        _ssh_key: Option<&Path>,
    ) -> Result<bool, LaunchpadError> {
        if path.join(".git").exists() {
            return Ok(false);
        }
        tokio::fs::create_dir_all(path.join(".git")).await?;
        Ok(true)
    }

    async fn synchronize(&self, path: &Path, branch: &str, _ssh_key: Option<&Path>) -> Result<(), LaunchpadError> {
        self.synced
            .lock()
            .unwrap()
            .push((path.to_path_buf(), branch.to_string()));

        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(running, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.running.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    async fn current_commit(&self, _path: &Path) -> Result<String, LaunchpadError> {
        Ok(format!("{}5678deadbeef", COMMIT))
    }

    async fn short_commit(&self, _path: &Path) -> Result<String, LaunchpadError> {
        Ok(COMMIT.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Start {
        name: String,
        command: String,
        cwd: PathBuf,
        env: BTreeMap<String, String>,
    },
    Stop(String),
    Delete(String),
    Restart(String),
    Persist,
}

/// Records every call and keeps a process table in memory
#[derive(Default)]
pub struct FakeSupervisor {
    calls: Mutex<Vec<Call>>,
    online: Mutex<Vec<String>>,
}

impl FakeSupervisor {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn starts(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Start { .. }))
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ProcessSupervisor for FakeSupervisor {
    async fn list(&self) -> Result<Vec<ProcessInfo>, LaunchpadError> {
        Ok(self
            .online
            .lock()
            .unwrap()
            .iter()
            .map(|name| ProcessInfo {
                name: name.clone(),
                status: ProcessStatus::Online,
                memory: 0,
                cpu: 0.0,
                uptime_start: None,
                restart_count: 0,
            })
            .collect())
    }

    async fn start(&self, name: &str, command: &str, options: &StartOptions) -> Result<(), LaunchpadError> {
        self.record(Call::Start {
            name: name.to_string(),
            command: command.to_string(),
            cwd: options.cwd.clone(),
            env: options.env.clone(),
        });
        self.online.lock().unwrap().push(name.to_string());
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<(), LaunchpadError> {
        self.record(Call::Stop(name.to_string()));
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), LaunchpadError> {
        self.record(Call::Delete(name.to_string()));
        self.online.lock().unwrap().retain(|n| n != name);
        Ok(())
    }

    async fn restart(&self, name: &str) -> Result<(), LaunchpadError> {
        self.record(Call::Restart(name.to_string()));
        Ok(())
    }

    async fn persist(&self) -> Result<(), LaunchpadError> {
        self.record(Call::Persist);
        Ok(())
    }
}

/// A launchpad home in a temporary directory
pub struct Harness {
    pub dir: TempDir,
    pub layout: StorageLayout,
    pub source: Arc<FakeSource>,
    pub supervisor: Arc<FakeSupervisor>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_source(FakeSource::default())
    }

    pub fn with_source(source: FakeSource) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(dir.path().join("home"));
        Self {
            dir,
            layout,
            source: Arc::new(source),
            supervisor: Arc::new(FakeSupervisor::default()),
        }
    }

    /// Where descriptors should put their working copies
    pub fn srv(&self, name: &str) -> PathBuf {
        self.dir.path().join("srv").join(name)
    }

    pub fn write_global(&self, yaml: &str) {
        let file = self.layout.global_config_file();
        std::fs::create_dir_all(file.path().parent().unwrap()).unwrap();
        std::fs::write(file.path(), yaml).unwrap();
    }

    pub fn write_app(&self, name: &str, yaml: &str) {
        let dir = self.layout.apps_config_dir();
        std::fs::create_dir_all(dir.path()).unwrap();
        std::fs::write(dir.path().join(format!("{}.yaml", name)), yaml).unwrap();
    }

    pub fn write_engine(&self, name: &str, yaml: &str) {
        let dir = self.layout.engines_config_dir();
        std::fs::create_dir_all(dir.path()).unwrap();
        std::fs::write(dir.path().join(format!("{}.yaml", name)), yaml).unwrap();
    }

    /// Descriptor of a supervised application with health checks disabled
    pub fn app_yaml(&self, name: &str, build: &str) -> String {
        format!(
            r#"
name: {name}
repo: git@github.com:org/{name}.git
branch: main
path: {path}
build:
  command: "{build}"
  timeout: 30
start:
  command: node server.js
health_check:
  enabled: false
"#,
            name = name,
            path = self.srv(name).display(),
            build = build,
        )
    }

    pub async fn state(&self) -> AppState {
        let global = ConfigStore::new(self.layout.clone()).load_global().await.unwrap();
        AppState::with_collaborators(
            &self.layout,
            global,
            self.source.clone(),
            self.supervisor.clone(),
        )
        .await
        .unwrap()
    }
}
