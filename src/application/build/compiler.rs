use std::{
    io::{self, ErrorKind},
    path::PathBuf,
    process::Stdio,
    time::{Duration, Instant},
};

#[cfg(unix)]
use nix::{
    sys::signal::{Signal, killpg},
    unistd::Pid,
};

use thiserror::Error;
use tokio::{
    fs,
    process::{Child, Command},
};
use tracing::{info, warn};

use super::workspace::{BuildWorkspace, SOURCE_FILE};

#[derive(Debug, Error)]
pub enum CompilerError {
    #[error("compiler `{program}` unavailable: {source}")]
    NotFound {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to run compiler `{program}`: {source}")]
    Io {
        program: String,
        #[source]
        source: io::Error,
    },
}

/// How the compiler process ended.
#[derive(Debug)]
pub enum CompilerOutcome {
    Exited {
        success: bool,
        exit_code: Option<i32>,
        log: String,
    },
    TimedOut {
        elapsed: Duration,
    },
}

/// External compiler invocation: `<program> <args...> main.tex` inside the workspace.
#[derive(Debug, Clone)]
pub struct CompilerCommand {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl CompilerCommand {
    pub fn new(program: PathBuf, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program,
            args,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run the compiler to completion or until the timeout elapses.
    ///
    /// stdout and stderr share one file so the log keeps the order the
    /// compiler wrote it in. A timed-out child is killed and reaped.
    pub async fn run(&self, workspace: &BuildWorkspace) -> Result<CompilerOutcome, CompilerError> {
        let log_path = workspace.output_log_path();
        let stdout = fs::File::create(&log_path)
            .await
            .map_err(|err| self.io_error(err))?;
        let stderr = stdout.try_clone().await.map_err(|err| self.io_error(err))?;

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(SOURCE_FILE)
            .current_dir(workspace.path())
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout.into_std().await))
            .stderr(Stdio::from(stderr.into_std().await))
            .kill_on_drop(true);
        isolate_process_group(&mut command);

        let started_at = Instant::now();
        let mut child = command.spawn().map_err(|err| {
            warn!(
                target = "texforge::compiler",
                program = %self.program.display(),
                error = %err,
                "failed to spawn compiler"
            );
            if err.kind() == ErrorKind::NotFound {
                CompilerError::NotFound {
                    program: self.program.display().to_string(),
                    source: err,
                }
            } else {
                self.io_error(err)
            }
        })?;

        let status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(status) => status.map_err(|err| self.io_error(err))?,
            Err(_) => {
                terminate(&mut child).await;
                let elapsed = started_at.elapsed();
                info!(
                    target = "texforge::compiler",
                    elapsed_ms = elapsed.as_millis() as u64,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "compiler timed out"
                );
                return Ok(CompilerOutcome::TimedOut { elapsed });
            }
        };

        let log = match fs::read(&log_path).await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(err) => return Err(self.io_error(err)),
        };

        info!(
            target = "texforge::compiler",
            exit_code = status.code().map(i64::from).unwrap_or(-1),
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            log_bytes = log.len(),
            "compiler exited"
        );

        Ok(CompilerOutcome::Exited {
            success: status.success(),
            exit_code: status.code(),
            log,
        })
    }

    fn io_error(&self, source: io::Error) -> CompilerError {
        CompilerError::Io {
            program: self.program.display().to_string(),
            source,
        }
    }
}

/// Run the compiler in its own process group so a timeout can take down
/// everything it forked.
#[cfg(unix)]
fn isolate_process_group(command: &mut Command) {
    command.process_group(0);
}

#[cfg(not(unix))]
fn isolate_process_group(_command: &mut Command) {}

#[cfg(unix)]
fn kill_process_group(child: &Child) {
    let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    if let Err(err) = killpg(Pid::from_raw(pid), Signal::SIGKILL) {
        warn!(
            target = "texforge::compiler",
            pid,
            error = %err,
            "failed to kill compiler process group"
        );
    }
}

#[cfg(not(unix))]
fn kill_process_group(_child: &Child) {}

/// Kill the compiler's process group, then the child itself, and reap it.
async fn terminate(child: &mut Child) {
    kill_process_group(child);
    if let Err(err) = child.kill().await {
        warn!(
            target = "texforge::compiler",
            error = %err,
            "failed to kill timed-out compiler"
        );
    }
}
