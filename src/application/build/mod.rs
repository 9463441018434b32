//! Build orchestration: one isolated, disposable compile attempt per request.
//!
//! An attempt moves through `started → writing → compiling → {succeeded,
//! compile_failed, timed_out}`, then `publishing → {published,
//! publish_failed}` for successful builds, and always ends in `cleaned`.
//! Each transition is logged at debug level with the build id.

mod compiler;
mod workspace;

pub use compiler::{CompilerCommand, CompilerError, CompilerOutcome};
pub use workspace::BuildWorkspace;

use std::{
    io::{self, ErrorKind},
    path::PathBuf,
    time::Instant,
};

use bytes::Bytes;
use metrics::{counter, histogram};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::{
    domain::build::{BuildId, BuildResult, CompileRequest, LogicalId},
    infra::telemetry::{METRIC_COMPILE_MS, METRIC_COMPILE_TOTAL},
};

use super::publish::ArtifactPublisher;

const TARGET: &str = "texforge::build";

/// Infrastructure failures that prevent an attempt from reaching a verdict.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("build workspace error: {0}")]
    Workspace(#[source] io::Error),
    #[error(transparent)]
    Compiler(#[from] CompilerError),
}

#[derive(Clone)]
pub struct BuildOrchestrator {
    compiler: CompilerCommand,
    build_root: PathBuf,
    publisher: ArtifactPublisher,
    local_output_dir: Option<PathBuf>,
}

impl BuildOrchestrator {
    pub fn new(compiler: CompilerCommand, build_root: PathBuf, publisher: ArtifactPublisher) -> Self {
        Self {
            compiler,
            build_root,
            publisher,
            local_output_dir: None,
        }
    }

    /// Also copy every published artifact to `dir/<object_key>`.
    pub fn with_local_output(mut self, dir: Option<PathBuf>) -> Self {
        self.local_output_dir = dir;
        self
    }

    pub async fn compile(&self, request: CompileRequest) -> Result<BuildResult, BuildError> {
        let started_at = Instant::now();
        let build_id = BuildId::generate();
        debug!(target = TARGET, build_id = %build_id, state = "started");

        let result = self.attempt(build_id, &request).await;

        let elapsed_ms = started_at.elapsed().as_millis() as u64;
        histogram!(METRIC_COMPILE_MS).record(elapsed_ms as f64);
        match &result {
            Ok(outcome) => {
                counter!(METRIC_COMPILE_TOTAL, "outcome" => outcome.outcome()).increment(1);
                info!(
                    target = TARGET,
                    build_id = %build_id,
                    logical_id = %request.logical_id,
                    source_bytes = request.source.len(),
                    result = outcome.outcome(),
                    elapsed_ms,
                    "compile attempt finished"
                );
            }
            Err(err) => {
                counter!(METRIC_COMPILE_TOTAL, "outcome" => "error").increment(1);
                warn!(
                    target = TARGET,
                    build_id = %build_id,
                    logical_id = %request.logical_id,
                    elapsed_ms,
                    error = %err,
                    "compile attempt aborted"
                );
            }
        }

        result
    }

    async fn attempt(
        &self,
        build_id: BuildId,
        request: &CompileRequest,
    ) -> Result<BuildResult, BuildError> {
        let mut workspace = BuildWorkspace::create(&self.build_root, build_id)
            .await
            .map_err(BuildError::Workspace)?;

        let result = self.run_in(&workspace, build_id, request).await;

        if let Err(err) = workspace.cleanup().await {
            warn!(
                target = TARGET,
                build_id = %build_id,
                path = %workspace.path().display(),
                error = %err,
                "failed to remove build workspace"
            );
        }
        debug!(target = TARGET, build_id = %build_id, state = "cleaned");

        result
    }

    async fn run_in(
        &self,
        workspace: &BuildWorkspace,
        build_id: BuildId,
        request: &CompileRequest,
    ) -> Result<BuildResult, BuildError> {
        debug!(target = TARGET, build_id = %build_id, state = "writing");
        workspace
            .write_source(&request.source)
            .await
            .map_err(BuildError::Workspace)?;

        debug!(target = TARGET, build_id = %build_id, state = "compiling");
        let log = match self.compiler.run(workspace).await? {
            CompilerOutcome::TimedOut { elapsed } => {
                debug!(target = TARGET, build_id = %build_id, state = "timed_out");
                return Ok(BuildResult::TimeoutFailure {
                    limit: self.compiler.timeout(),
                    elapsed,
                });
            }
            CompilerOutcome::Exited {
                success: false,
                log,
                ..
            } => {
                debug!(target = TARGET, build_id = %build_id, state = "compile_failed");
                return Ok(BuildResult::CompileFailure { log });
            }
            CompilerOutcome::Exited { log, .. } => log,
        };

        let artifact = match fs::read(workspace.artifact_path()).await {
            Ok(bytes) => Bytes::from(bytes),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(
                    target = TARGET,
                    build_id = %build_id,
                    state = "compile_failed",
                    "compiler exited cleanly without producing an artifact"
                );
                return Ok(BuildResult::CompileFailure { log });
            }
            Err(err) => return Err(BuildError::Workspace(err)),
        };
        debug!(target = TARGET, build_id = %build_id, state = "succeeded");

        debug!(target = TARGET, build_id = %build_id, state = "publishing");
        let result = match self
            .publisher
            .publish(&request.logical_id, build_id, artifact)
            .await
        {
            Ok(published) => {
                debug!(target = TARGET, build_id = %build_id, state = "published");
                BuildResult::Success {
                    build_id,
                    object_key: published.object_key,
                    signed_url: published.signed_url,
                    overwritten: published.overwritten,
                }
            }
            Err(err) => {
                debug!(target = TARGET, build_id = %build_id, state = "publish_failed");
                BuildResult::PublishFailure {
                    log: format!("Upload to storage failed: {err}"),
                    compile_log: log,
                }
            }
        };

        self.keep_local_copy(workspace, &request.logical_id).await;

        Ok(result)
    }

    async fn keep_local_copy(&self, workspace: &BuildWorkspace, logical_id: &LogicalId) {
        let Some(dir) = self.local_output_dir.as_ref() else {
            return;
        };
        let destination = dir.join(logical_id.object_key());
        let copied = async {
            fs::create_dir_all(dir).await?;
            fs::copy(workspace.artifact_path(), &destination).await
        }
        .await;
        if let Err(err) = copied {
            warn!(
                target = TARGET,
                destination = %destination.display(),
                error = %err,
                "failed to keep local artifact copy"
            );
        }
    }
}
