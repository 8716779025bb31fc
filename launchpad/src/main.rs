//! Launchpad - Entry Point
//!
//! Deploys applications and game engines described by YAML descriptors on a
//! single host, on demand or when a push webhook arrives.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;

use launchpad::app::options::{AppOptions, ServerOverrides, StorageOptions};
use launchpad::app::run::run;
use launchpad::app::state::AppState;
use launchpad::config::global::STANDARD_RANGE;
use launchpad::config::loader::ConfigStore;
use launchpad::deploy::executor::DeployResult;
use launchpad::deploy::history::DeploymentStatus;
use launchpad::deploy::supervisor::ProcessStatus;
use launchpad::dispatch::resolver::resolve_name;
use launchpad::logs::{init_logging, LogLevel, LogOptions};
use launchpad::storage::layout::StorageLayout;
use launchpad::utils::version_info;

use tracing::{error, info};

#[derive(Parser)]
#[command(name = "launchpad")]
#[command(about = "Push-to-deploy orchestrator for single-host servers", long_about = None)]
#[command(version)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalArgs {
    /// Base directory holding config/, state/ and logs/
    #[arg(long, env = "LAUNCHPAD_HOME", global = true, value_name = "DIR")]
    home: Option<PathBuf>,

    /// trace, debug, info, warn or error (defaults to info for `serve`, warn otherwise)
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    log_level: Option<LogLevel>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the webhook daemon
    Serve {
        /// Override webhook.host
        #[arg(long)]
        host: Option<String>,

        /// Override webhook.port
        #[arg(long)]
        port: Option<u16>,
    },

    /// Deploy an application, engine or module and wait for the outcome
    Deploy {
        /// Application, engine, `engine:module` or module name
        #[arg(value_name = "TARGET")]
        target: String,
    },

    /// Show recent deployments of a target
    History {
        #[arg(value_name = "TARGET")]
        target: String,

        /// Print the raw JSON history
        #[arg(long)]
        json: bool,
    },

    /// Manage port allocations
    Port {
        #[command(subcommand)]
        command: PortCommands,
    },

    /// Parse every descriptor and report problems
    Validate,

    /// List supervised processes
    Status,

    /// Print version information
    Version,
}

#[derive(Subcommand)]
enum PortCommands {
    /// Allocate (or return the existing) port for a name
    Allocate {
        name: String,

        /// Named range from the global config
        #[arg(long, default_value = STANDARD_RANGE)]
        range: String,
    },

    /// Drop a sticky allocation
    Release { name: String },

    /// Keep a port out of every range
    Reserve { port: u16 },

    /// Print the allocation state
    List,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let layout = match &cli.global.home {
        Some(home) => StorageLayout::new(home),
        None => StorageLayout::default(),
    };

    let is_daemon = matches!(cli.command, Commands::Serve { .. });
    let log_options = LogOptions {
        log_level: cli
            .global
            .log_level
            .unwrap_or(if is_daemon { LogLevel::Info } else { LogLevel::Warn }),
        log_dir: is_daemon.then(|| layout.logs_dir().path().to_path_buf()),
        json_format: cli.global.json_logs,
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    match execute(cli.command, layout).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("{} {:#}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

async fn execute(command: Commands, layout: StorageLayout) -> anyhow::Result<ExitCode> {
    match command {
        Commands::Serve { host, port } => {
            let options = AppOptions {
                storage: StorageOptions { layout },
                server: ServerOverrides { host, port },
                ..Default::default()
            };
            info!("Running launchpad {}", version_info().version);
            run(options, await_shutdown_signal()).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Deploy { target } => {
            let state = AppState::init(&layout).await?;
            let result = state.dispatcher.deploy(&target).await?;
            print_result(&result);
            Ok(if result.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::History { target, json } => history(&layout, &target, json).await,
        Commands::Port { command } => port(&layout, command).await,
        Commands::Validate => validate(&layout).await,
        Commands::Status => status(&layout).await,
        Commands::Version => {
            let version = version_info();
            println!("{}", serde_json::to_string_pretty(&version)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn print_result(result: &DeployResult) {
    if result.success {
        println!("{} {} deployed", "✓".green().bold(), result.target.bold());
    } else {
        println!("{} {} failed", "✗".red().bold(), result.target.bold());
    }
    println!("  deployment  {}", result.deployment_id);
    if let Some(commit) = &result.commit {
        println!("  commit      {}", commit);
    }
    if let Some(port) = result.port {
        println!("  port        {}", port);
    }
    println!("  duration    {}ms", result.duration_ms);
    if let Some(error) = &result.error {
        println!("  error       {}", error.red());
    }
}

async fn history(layout: &StorageLayout, target: &str, json: bool) -> anyhow::Result<ExitCode> {
    let state = AppState::init(layout).await?;

    // Accept descriptor names as well as raw target ids
    let snapshot = state.dispatcher.config().snapshot().await?;
    let target_id = resolve_name(&snapshot, target)
        .map(|resolved| resolved.target_id())
        .unwrap_or_else(|| target.to_string());

    let history = state.dispatcher.deployer().history().history(&target_id).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&history)?);
        return Ok(ExitCode::SUCCESS);
    }
    if history.history.is_empty() {
        println!("No deployments recorded for {}", target_id);
        return Ok(ExitCode::SUCCESS);
    }

    println!("{}", target_id.bold());
    for record in &history.history {
        let status = match record.status {
            DeploymentStatus::Success => "success".green(),
            DeploymentStatus::Failed => "failed".red(),
            DeploymentStatus::InProgress => "in progress".yellow(),
        };
        let current = if history.current.as_deref() == Some(record.id.as_str()) {
            "*"
        } else {
            " "
        };
        println!(
            "{} {}  {:<11}  {:<9}  {:>7}ms  {}",
            current,
            record.id,
            status,
            record.commit.as_deref().unwrap_or("-"),
            record.duration_ms,
            record.error.as_deref().unwrap_or("")
        );
    }
    Ok(ExitCode::SUCCESS)
}

async fn port(layout: &StorageLayout, command: PortCommands) -> anyhow::Result<ExitCode> {
    let state = AppState::init(layout).await?;
    let ports = state.dispatcher.deployer().ports();

    match command {
        PortCommands::Allocate { name, range } => {
            let port = ports.allocate(&name, &range).await?;
            println!("{}", port);
        }
        PortCommands::Release { name } => match ports.release(&name).await? {
            Some(port) => println!("Released port {} from {}", port, name),
            None => bail!("no port is allocated to {}", name),
        },
        PortCommands::Reserve { port } => {
            ports.reserve(port).await?;
            println!("Reserved port {}", port);
        }
        PortCommands::List => {
            let snapshot = ports.state().await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn validate(layout: &StorageLayout) -> anyhow::Result<ExitCode> {
    let snapshot = ConfigStore::new(layout.clone())
        .snapshot()
        .await
        .context("unable to load the global config")?;

    for app in &snapshot.apps {
        println!("{} application {}", "✓".green(), app.name);
    }
    for engine in &snapshot.engines {
        println!(
            "{} engine {} ({} module(s))",
            "✓".green(),
            engine.name,
            engine.modules.len()
        );
    }
    for failure in &snapshot.failures {
        println!("{} {}", "✗".red(), failure);
    }

    Ok(if snapshot.failures.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn status(layout: &StorageLayout) -> anyhow::Result<ExitCode> {
    let state = AppState::init(layout).await?;
    let processes = state.dispatcher.deployer().supervisor().list().await?;

    if processes.is_empty() {
        println!("No supervised processes");
        return Ok(ExitCode::SUCCESS);
    }
    for process in processes {
        let status = match process.status {
            ProcessStatus::Online => "online".green(),
            ProcessStatus::Launching => "launching".yellow(),
            ProcessStatus::Stopped => "stopped".yellow(),
            ProcessStatus::Errored => "errored".red(),
            ProcessStatus::Unknown => "unknown".dimmed(),
        };
        println!(
            "{:<24} {:<10} {:>6.1}% {:>8.1}MB  restarts {}",
            process.name,
            status,
            process.cpu,
            process.memory as f64 / 1024.0 / 1024.0,
            process.restart_count
        );
    }
    Ok(ExitCode::SUCCESS)
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) = match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
            _ => {
                error!("Unable to install signal handlers, falling back to Ctrl+C");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
        info!("Ctrl+C received, shutting down...");
    }
}
