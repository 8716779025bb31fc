//! Shell command execution with output captured into the attempt log

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::deploy::attempt_log::{AttemptLog, Stream};
use crate::errors::LaunchpadError;

// Readers may outlive the child when it leaves background processes holding the pipes
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_secs(5);

/// A command to run inside a working copy
#[derive(Debug, Clone)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
    cwd: PathBuf,
    env: BTreeMap<String, String>,
    timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, cwd: impl AsRef<Path>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.as_ref().to_path_buf(),
            env: BTreeMap::new(),
            timeout: None,
        }
    }

    /// `bash -c <script>`
    pub fn shell(script: &str, cwd: impl AsRef<Path>) -> Self {
        Self::new("bash", cwd).arg("-c").arg(script)
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Variables layered over the ambient environment
    pub fn envs(mut self, env: &BTreeMap<String, String>) -> Self {
        self.env
            .extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn display(&self) -> String {
        if self.program == "bash" && self.args.len() == 2 && self.args[0] == "-c" {
            return self.args[1].clone();
        }
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Run `spec`, streaming stdout/stderr into `log`.
///
/// Fails on spawn errors, non-zero exit, and when the timeout elapses. On
/// timeout the whole process group is killed, so nothing the command forked
/// keeps touching the working copy.
pub async fn run_logged(spec: &CommandSpec, log: &AttemptLog) -> Result<(), LaunchpadError> {
    debug!("Running `{}` in {}", spec.display(), spec.cwd.display());

    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .current_dir(&spec.cwd)
        .envs(&spec.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    {
        command.process_group(0);
    }

    let mut child = command
        .spawn()
        .map_err(|e| LaunchpadError::CommandError(format!("Failed to run `{}`: {}", spec.display(), e)))?;

    let mut readers: Vec<JoinHandle<()>> = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        readers.push(tokio::spawn(pipe_lines(stdout, Stream::Stdout, log.clone())));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(tokio::spawn(pipe_lines(stderr, Stream::Stderr, log.clone())));
    }

    let waited = match spec.timeout {
        Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
            Ok(status) => status,
            Err(_) => {
                kill_process_group(&mut child, spec).await;
                for reader in &readers {
                    reader.abort();
                }
                return Err(LaunchpadError::CommandError(format!(
                    "`{}` timed out after {:?}",
                    spec.display(),
                    limit
                )));
            }
        },
        None => child.wait().await,
    };

    for reader in readers {
        let abort = reader.abort_handle();
        if tokio::time::timeout(OUTPUT_DRAIN_GRACE, reader).await.is_err() {
            abort.abort();
        }
    }

    let status = waited
        .map_err(|e| LaunchpadError::CommandError(format!("Failed to wait for `{}`: {}", spec.display(), e)))?;
    if !status.success() {
        return Err(LaunchpadError::CommandError(match status.code() {
            Some(code) => format!("`{}` exited with status {}", spec.display(), code),
            None => format!("`{}` was terminated by a signal", spec.display()),
        }));
    }
    Ok(())
}

/// SIGKILL the group led by `child`, then reap the child itself
async fn kill_process_group(child: &mut Child, spec: &CommandSpec) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            warn!("Unable to kill process group {} of `{}`: {}", pid, spec.display(), e);
        }
    }

    if let Err(e) = child.kill().await {
        warn!("Unable to kill `{}`: {}", spec.display(), e);
    }
}

async fn pipe_lines<R>(reader: R, stream: Stream, log: AttemptLog)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => log.output(stream, &line).await,
            Ok(None) => break,
            Err(e) => {
                debug!("Stopped reading command output: {}", e);
                break;
            }
        }
    }
}
