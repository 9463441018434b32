//! Request-level entry point: admission followed by a detached build.

use thiserror::Error;
use tokio::task::JoinError;

use crate::domain::build::{BuildResult, CompileRequest};

use super::{
    admission::{AdmissionError, AdmissionGuard},
    build::{BuildError, BuildOrchestrator},
};

#[derive(Debug, Error)]
pub enum CompileError {
    #[error(transparent)]
    Admission(#[from] AdmissionError),
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error("compile task aborted: {0}")]
    Aborted(#[from] JoinError),
}

#[derive(Clone)]
pub struct CompileService {
    admission: AdmissionGuard,
    orchestrator: BuildOrchestrator,
}

impl CompileService {
    pub fn new(admission: AdmissionGuard, orchestrator: BuildOrchestrator) -> Self {
        Self {
            admission,
            orchestrator,
        }
    }

    pub fn admission(&self) -> &AdmissionGuard {
        &self.admission
    }

    /// Admit `request` and run it to completion.
    ///
    /// The build runs on its own task holding the slot, so dropping the
    /// returned future (a disconnected client) neither aborts the compiler
    /// nor skips workspace cleanup.
    pub async fn submit(&self, request: CompileRequest) -> Result<BuildResult, CompileError> {
        let permit = self.admission.admit(&request.source).await?;
        let orchestrator = self.orchestrator.clone();

        let handle = tokio::spawn(async move {
            let _permit = permit;
            orchestrator.compile(request).await
        });

        Ok(handle.await??)
    }
}
