//! Trigger dispatch
//!
//! Manual triggers deploy synchronously. Push and HTTP deploy triggers are
//! accepted immediately and deployed in the background, one attempt at a
//! time per target.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use hook_models::models::PushEvent;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::global::DeploymentPolicy;
use crate::config::loader::{ConfigSnapshot, ConfigStore};
use crate::deploy::executor::{DeployResult, Deployer};
use crate::deploy::target::DeployPlan;
use crate::dispatch::queue::KeyedSlots;
use crate::dispatch::resolver::{resolve_name, resolve_repository};
use crate::errors::LaunchpadError;

/// What a push event led to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// Deployments enqueued for these target ids
    Accepted(Vec<String>),
    /// No descriptor uses the pushed repository
    NoMatch,
    /// Descriptors exist, none of them tracks the pushed branch
    BranchMismatch(String),
    /// The ref is not a branch (tags and the like)
    NotABranch(String),
}

/// Routes triggers to the deployment executor
#[derive(Clone)]
pub struct Dispatcher {
    config: ConfigStore,
    deployer: Arc<Deployer>,
    slots: Arc<KeyedSlots>,
    /// Engines and their repo-less modules share one working copy
    checkouts: Arc<KeyedSlots>,
    tasks: Arc<Mutex<JoinSet<DeployResult>>>,
}

impl Dispatcher {
    pub fn new(config: ConfigStore, deployer: Arc<Deployer>) -> Self {
        Self {
            config,
            deployer,
            slots: Arc::new(KeyedSlots::new()),
            checkouts: Arc::new(KeyedSlots::new()),
            tasks: Arc::new(Mutex::new(JoinSet::new())),
        }
    }

    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    pub fn deployer(&self) -> &Deployer {
        &self.deployer
    }

    /// Whether a deployment of `target_id` is running or queued
    pub fn is_busy(&self, target_id: &str) -> bool {
        self.slots.is_busy(target_id)
    }

    /// Deploy `name` and wait for the outcome. Applications win over engines,
    /// engines over modules.
    pub async fn deploy(&self, name: &str) -> Result<DeployResult, LaunchpadError> {
        let snapshot = self.snapshot().await?;
        let resolved = resolve_name(&snapshot, name).ok_or_else(|| LaunchpadError::TargetNotFound(name.to_string()))?;

        let target_id = resolved.target_id();
        info!("Manual deployment of {}", target_id);
        Ok(self
            .run(target_id, resolved.plan(), snapshot.global.deployment.clone())
            .await)
    }

    /// Enqueue a deployment of application `name`, returning its target id
    pub async fn enqueue_app(&self, name: &str) -> Result<String, LaunchpadError> {
        let snapshot = self.snapshot().await?;
        let app = snapshot
            .find_app(name)
            .ok_or_else(|| LaunchpadError::TargetNotFound(name.to_string()))?;

        let plan = DeployPlan::for_app(app);
        let target_id = plan.target_id.clone();
        self.spawn(target_id.clone(), plan, snapshot.global.deployment.clone());
        Ok(target_id)
    }

    /// Enqueue every descriptor tracking the pushed repository and branch
    pub async fn enqueue_push(&self, event: &PushEvent) -> Result<PushOutcome, LaunchpadError> {
        let Some(branch) = event.branch() else {
            return Ok(PushOutcome::NotABranch(event.git_ref.clone()));
        };

        let snapshot = self.snapshot().await?;
        let matches = resolve_repository(&snapshot, &event.repository.full_name, &event.repository.name);
        if matches.is_empty() {
            debug!("No descriptor uses {}", event.repository.full_name);
            return Ok(PushOutcome::NoMatch);
        }

        let mut accepted = Vec::new();
        for resolved in matches.iter().filter(|r| r.branch() == branch) {
            let target_id = resolved.target_id();
            info!("Push to {} on {} triggers {}", event.repository.full_name, branch, target_id);
            self.spawn(target_id.clone(), resolved.plan(), snapshot.global.deployment.clone());
            accepted.push(target_id);
        }

        if accepted.is_empty() {
            return Ok(PushOutcome::BranchMismatch(branch.to_string()));
        }
        Ok(PushOutcome::Accepted(accepted))
    }

    /// Wait up to `timeout` for background deployments to finish
    pub async fn drain(&self, timeout: Duration) -> Result<(), LaunchpadError> {
        let mut tasks = {
            let mut guard = self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::take(&mut *guard)
        };
        if tasks.is_empty() {
            return Ok(());
        }

        info!("Waiting for {} deployment(s) to finish", tasks.len());
        let waited = tokio::time::timeout(timeout, async {
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    warn!("Deployment task ended abnormally: {}", e);
                }
            }
        })
        .await;

        match waited {
            Ok(()) => Ok(()),
            Err(_) => {
                tasks.abort_all();
                Err(LaunchpadError::ShutdownError(format!(
                    "deployments still running after {}s",
                    timeout.as_secs()
                )))
            }
        }
    }

    async fn snapshot(&self) -> Result<ConfigSnapshot, LaunchpadError> {
        let snapshot = self.config.snapshot().await?;
        for failure in &snapshot.failures {
            debug!("Descriptor skipped: {}", failure);
        }
        Ok(snapshot)
    }

    async fn run(&self, target_id: String, plan: DeployPlan, policy: DeploymentPolicy) -> DeployResult {
        if self.slots.is_busy(&target_id) {
            info!("Deployment of {} queued behind the running one", target_id);
        }
        // Always target first, then checkout
        let checkout = plan.checkout.display().to_string();
        self.slots
            .run_exclusive(
                &target_id,
                self.checkouts
                    .run_exclusive(&checkout, self.deployer.deploy(&plan, &policy)),
            )
            .await
    }

    fn spawn(&self, target_id: String, plan: DeployPlan, policy: DeploymentPolicy) {
        let dispatcher = self.clone();
        let mut tasks = self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // Reap finished attempts so the set does not grow without bound
        while let Some(joined) = tasks.try_join_next() {
            if let Err(e) = joined {
                warn!("Deployment task ended abnormally: {}", e);
            }
        }
        tasks.spawn(async move { dispatcher.run(target_id, plan, policy).await });
    }
}
