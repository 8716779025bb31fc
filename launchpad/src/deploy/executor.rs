//! Deployment executor
//!
//! Drives one attempt through acquire, synchronize, quiesce, build, activate
//! and record. Failures never escape: every attempt ends in exactly one
//! history record and a [`DeployResult`].

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::app::AppConfig;
use crate::config::engine::{EngineConfig, ModuleConfig};
use crate::config::global::DeploymentPolicy;
use crate::deploy::attempt_log::AttemptLog;
use crate::deploy::command::{run_logged, CommandSpec};
use crate::deploy::fsm::{DeploymentEvent, DeploymentFsm, Phase};
use crate::deploy::git::SourceControl;
use crate::deploy::health::{HealthProber, HealthRecord, HealthStatus, HealthStore};
use crate::deploy::history::{DeploymentRecord, DeploymentStatus, HistoryStore};
use crate::deploy::supervisor::{ProcessSupervisor, StartOptions};
use crate::deploy::target::{Activation, DeployPlan, PortSource, TargetKind};
use crate::errors::LaunchpadError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::ports::allocator::PortAllocator;
use crate::utils::deployment_id;

/// Outcome of one deployment attempt
#[derive(Debug, Clone, Serialize)]
pub struct DeployResult {
    pub success: bool,
    pub target: String,
    pub deployment_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// State documents and log directory the executor writes to
pub struct DeployStores {
    pub ports: Arc<PortAllocator>,
    pub history: Arc<HistoryStore>,
    pub health: Arc<HealthStore>,
    pub logs_dir: Dir,
}

/// What an attempt learned before it finished or failed
#[derive(Debug, Default)]
struct Progress {
    commit: Option<String>,
    port: Option<u16>,
    supervised: bool,
}

/// Deployment executor
pub struct Deployer {
    source: Arc<dyn SourceControl>,
    supervisor: Arc<dyn ProcessSupervisor>,
    stores: DeployStores,
    prober: HealthProber,
}

impl Deployer {
    pub fn new(
        source: Arc<dyn SourceControl>,
        supervisor: Arc<dyn ProcessSupervisor>,
        stores: DeployStores,
    ) -> Result<Self, LaunchpadError> {
        Ok(Self {
            source,
            supervisor,
            stores,
            prober: HealthProber::new()?,
        })
    }

    pub fn history(&self) -> &HistoryStore {
        &self.stores.history
    }

    pub fn ports(&self) -> &PortAllocator {
        &self.stores.ports
    }

    pub fn supervisor(&self) -> &dyn ProcessSupervisor {
        self.supervisor.as_ref()
    }

    pub async fn deploy_app(&self, app: &AppConfig, policy: &DeploymentPolicy) -> DeployResult {
        self.deploy(&DeployPlan::for_app(app), policy).await
    }

    pub async fn deploy_engine(&self, engine: &EngineConfig, policy: &DeploymentPolicy) -> DeployResult {
        self.deploy(&DeployPlan::for_engine(engine), policy).await
    }

    pub async fn deploy_module(
        &self,
        engine: &EngineConfig,
        module: &ModuleConfig,
        policy: &DeploymentPolicy,
    ) -> DeployResult {
        self.deploy(&DeployPlan::for_module(engine, module), policy).await
    }

    /// Run one attempt. Callers serialize attempts per target.
    pub async fn deploy(&self, plan: &DeployPlan, policy: &DeploymentPolicy) -> DeployResult {
        let started_at = Utc::now();
        let clock = Instant::now();
        let id = deployment_id(started_at);
        let log = AttemptLog::new(&self.stores.logs_dir, &plan.target_id, &id);
        let mut fsm = DeploymentFsm::new();
        let mut progress = Progress::default();

        info!("Deploying {} {} ({})", plan.kind, plan.target_id, id);
        log.info(&format!(
            "Deploying {} {} from {} (branch {})",
            plan.kind, plan.target_id, plan.repo, plan.branch
        ))
        .await;
        if plan.kind == TargetKind::Engine {
            let message = format!(
                "Deploying engine {} restarts every module sharing its process",
                plan.target_id
            );
            warn!("{}", message);
            log.warn(&message).await;
        }

        let outcome = self.run_phases(plan, policy, &log, &mut fsm, &mut progress, &id).await;
        let duration_ms = clock.elapsed().as_millis() as u64;

        let error = match outcome {
            Ok(()) => None,
            Err(e) => {
                let (phase, message) = match e {
                    LaunchpadError::PhaseFailure { phase, message } => (phase, message),
                    other => (Phase::Record, other.to_string()),
                };
                let error = format!("{} phase failed: {}", phase, message);
                error!("Deployment of {} failed: {}", plan.target_id, error);
                log.error(&error).await;
                if policy.rollback_on_failure {
                    let message = "rollback_on_failure is set, but rollback is not performed";
                    warn!("{} ({})", message, plan.target_id);
                    log.warn(message).await;
                }
                advance(&mut fsm, DeploymentEvent::Failed { phase, error: message });
                Some(error)
            }
        };

        let record = DeploymentRecord {
            id: id.clone(),
            commit: progress.commit.clone(),
            timestamp: started_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            status: if error.is_none() {
                DeploymentStatus::Success
            } else {
                DeploymentStatus::Failed
            },
            duration_ms,
            error: error.clone(),
        };

        let error = match self.stores.history.append(&plan.target_id, record).await {
            Ok(()) => {
                advance(&mut fsm, DeploymentEvent::Recorded);
                error
            }
            Err(e) => {
                let message = format!("{} phase failed: {}", Phase::Record, e);
                error!("Unable to record deployment of {}: {}", plan.target_id, e);
                log.error(&message).await;
                Some(error.unwrap_or(message))
            }
        };

        let success = error.is_none();
        if success {
            info!("Deployed {} in {}ms", plan.target_id, duration_ms);
            log.info(&format!("Deployment succeeded in {}ms", duration_ms)).await;
        }

        DeployResult {
            success,
            target: plan.target_id.clone(),
            deployment_id: id,
            commit: progress.commit,
            duration_ms,
            port: progress.port,
            error,
        }
    }

    async fn run_phases(
        &self,
        plan: &DeployPlan,
        policy: &DeploymentPolicy,
        log: &AttemptLog,
        fsm: &mut DeploymentFsm,
        progress: &mut Progress,
        attempt_id: &str,
    ) -> Result<(), LaunchpadError> {
        let ssh_key = plan.ssh_key.as_deref();

        // Acquire
        log.info(&format!("[{}] {}", Phase::Acquire, plan.checkout.display())).await;
        let cloned = self
            .source
            .ensure_checked_out(&plan.repo, &plan.checkout, &plan.branch, ssh_key)
            .await
            .map_err(|e| e.in_phase(Phase::Acquire))?;
        log.info(if cloned { "Cloned working copy" } else { "Working copy present" }).await;

        // Synchronize
        log.info(&format!("[{}] origin/{}", Phase::Synchronize, plan.branch)).await;
        self.source
            .synchronize(&plan.checkout, &plan.branch, ssh_key)
            .await
            .map_err(|e| e.in_phase(Phase::Synchronize))?;
        let commit = self
            .source
            .short_commit(&plan.checkout)
            .await
            .map_err(|e| e.in_phase(Phase::Synchronize))?;
        log.info(&format!("At commit {}", commit)).await;
        progress.commit = Some(commit);
        step(fsm, DeploymentEvent::SourceSynced, Phase::Synchronize)?;

        // Quiesce
        if let Some(process) = plan.quiesce_process() {
            log.info(&format!("[{}] stopping {}", Phase::Quiesce, process)).await;
            self.supervisor
                .stop(process)
                .await
                .map_err(|e| e.in_phase(Phase::Quiesce))?;
        }

        // Build
        match &plan.build.command {
            Some(command) => {
                log.info(&format!("[{}] {}", Phase::Build, command)).await;
                let spec = CommandSpec::shell(command, &plan.workdir)
                    .envs(&plan.env)
                    .timeout(plan.build.timeout);
                run_logged(&spec, log).await.map_err(|e| e.in_phase(Phase::Build))?;
            }
            None => log.info(&format!("[{}] no build command, skipping", Phase::Build)).await,
        }
        step(fsm, DeploymentEvent::Built, Phase::Build)?;

        // Activate
        self.activate(plan, log, progress)
            .await
            .map_err(|e| e.in_phase(Phase::Activate))?;
        step(fsm, DeploymentEvent::ProcessTransitioned, Phase::Activate)?;

        if progress.supervised {
            if let Some(port) = progress.port {
                self.record_health(plan, policy, log, port, attempt_id).await;
            }
        }

        Ok(())
    }

    async fn activate(
        &self,
        plan: &DeployPlan,
        log: &AttemptLog,
        progress: &mut Progress,
    ) -> Result<(), LaunchpadError> {
        if let Some((engine, ports)) = &plan.engine_ports {
            self.stores.ports.register_engine(engine, ports).await?;
        }

        match &plan.activation {
            Activation::Script { script, port } => {
                let script_file = File::new(plan.workdir.join(script));
                if !script_file.exists().await {
                    return Err(LaunchpadError::CommandError(format!(
                        "deploy script {} not found",
                        script_file.path().display()
                    )));
                }
                log.info(&format!("[{}] running {}", Phase::Activate, script)).await;
                script_file.set_executable().await?;

                let env = with_port(&plan.env, *port);
                let spec = CommandSpec::new(path_arg(script_file.path()), &plan.workdir)
                    .envs(&env)
                    .timeout(plan.build.timeout);
                run_logged(&spec, log).await?;
                progress.port = *port;
            }
            Activation::Supervised {
                process,
                command,
                port,
                resources,
            } => {
                let command = command.as_deref().ok_or_else(|| {
                    LaunchpadError::ConfigError(format!("no start command for {}", plan.target_id))
                })?;

                let port = match port {
                    PortSource::Fixed(port) => Some(*port),
                    PortSource::Allocate { name, range } => Some(self.stores.ports.allocate(name, range).await?),
                    PortSource::None => None,
                };
                if let Some(port) = port {
                    log.info(&format!("Using port {}", port)).await;
                }

                log.info(&format!("[{}] restarting {}: {}", Phase::Activate, process, command)).await;
                self.supervisor.delete(process).await?;
                let options = StartOptions {
                    cwd: plan.workdir.clone(),
                    instances: resources.instances,
                    max_memory: Some(resources.memory.clone()),
                    env: with_port(&plan.env, port),
                };
                self.supervisor.start(process, command, &options).await?;
                self.supervisor.persist().await?;

                progress.port = port;
                progress.supervised = true;
            }
            Activation::RestartProcess { process } => {
                log.info(&format!("[{}] restarting {}", Phase::Activate, process)).await;
                self.supervisor.restart(process).await?;
            }
        }
        Ok(())
    }

    /// Probe the activated process; the outcome never fails the attempt
    async fn record_health(
        &self,
        plan: &DeployPlan,
        policy: &DeploymentPolicy,
        log: &AttemptLog,
        port: u16,
        attempt_id: &str,
    ) {
        if !plan.health_check.enabled {
            debug!("Health check disabled for {}", plan.target_id);
            return;
        }

        let url = HealthProber::url(port, &plan.health_check.path);
        log.info(&format!("Health check {}", url)).await;
        let outcome = self
            .prober
            .probe(&url, &plan.health_check, policy.health_check_retries)
            .await;

        match outcome.status {
            HealthStatus::Healthy => {
                log.info(&format!("Healthy after {} attempt(s)", outcome.attempts)).await;
            }
            HealthStatus::Unhealthy => {
                let message = format!(
                    "Unhealthy after {} attempt(s): {}",
                    outcome.attempts,
                    outcome.error.as_deref().unwrap_or("no response")
                );
                warn!("{} {}", plan.target_id, message);
                log.warn(&message).await;
            }
        }

        let record = HealthRecord {
            status: outcome.status,
            url,
            attempts: outcome.attempts,
            checked_at: Utc::now(),
            deployment_id: attempt_id.to_string(),
            error: outcome.error,
        };
        if let Err(e) = self.stores.health.record(&plan.target_id, record).await {
            warn!("Unable to record health of {}: {}", plan.target_id, e);
        }
    }
}

fn step(fsm: &mut DeploymentFsm, event: DeploymentEvent, phase: Phase) -> Result<(), LaunchpadError> {
    fsm.process(event)
        .map_err(|e| LaunchpadError::Internal(e).in_phase(phase))
}

fn advance(fsm: &mut DeploymentFsm, event: DeploymentEvent) {
    if let Err(e) = fsm.process(event) {
        debug!("{}", e);
    }
}

fn with_port(env: &BTreeMap<String, String>, port: Option<u16>) -> BTreeMap<String, String> {
    let mut env = env.clone();
    if let Some(port) = port {
        env.insert("PORT".to_string(), port.to_string());
    }
    env
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
