//! Per-attempt build directory.

use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};

use tempfile::{Builder, TempDir};
use tokio::{fs, task};

use crate::domain::build::BuildId;

pub(crate) const SOURCE_FILE: &str = "main.tex";
pub(crate) const ARTIFACT_FILE: &str = "main.pdf";
/// Merged stdout/stderr of the compiler. Distinct from `main.log`, which pdflatex writes itself.
pub(crate) const OUTPUT_LOG_FILE: &str = "texforge-output.log";

/// Exclusively owned directory `<root>/<build_id>`.
///
/// Removed by [`BuildWorkspace::cleanup`]; a workspace dropped without it is
/// removed by its [`TempDir`].
#[derive(Debug)]
pub struct BuildWorkspace {
    path: PathBuf,
    dir: Option<TempDir>,
}

impl BuildWorkspace {
    /// Create the directory. Fails with `AlreadyExists` if it is already there.
    pub async fn create(root: &Path, build_id: BuildId) -> io::Result<Self> {
        fs::create_dir_all(root).await?;
        let root = root.to_path_buf();
        let name = build_id.to_string();
        let dir = task::spawn_blocking(move || {
            Builder::new()
                .prefix(&name)
                .rand_bytes(0)
                .tempdir_in(&root)
        })
        .await
        .map_err(io::Error::other)??;

        Ok(Self {
            path: dir.path().to_path_buf(),
            dir: Some(dir),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn source_path(&self) -> PathBuf {
        self.path.join(SOURCE_FILE)
    }

    pub fn artifact_path(&self) -> PathBuf {
        self.path.join(ARTIFACT_FILE)
    }

    pub fn output_log_path(&self) -> PathBuf {
        self.path.join(OUTPUT_LOG_FILE)
    }

    pub async fn write_source(&self, source: &[u8]) -> io::Result<()> {
        fs::write(self.source_path(), source).await
    }

    /// Remove the directory tree. Removing an already-absent workspace succeeds.
    pub async fn cleanup(&mut self) -> io::Result<()> {
        let Some(dir) = self.dir.take() else {
            return Ok(());
        };
        match task::spawn_blocking(move || dir.close())
            .await
            .map_err(io::Error::other)?
        {
            Err(err) if err.kind() != ErrorKind::NotFound => Err(err),
            _ => Ok(()),
        }
    }
}
