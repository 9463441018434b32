//! Identifiers, requests and outcomes of a single compile attempt.
//!
//! Two identities are in play. A [`LogicalId`] names a document slot chosen by
//! the caller; its artifact is replaced on every successful compile. A
//! [`BuildId`] is minted per attempt and is the handle used to fetch the
//! artifact back. Storage keys are derived here so publisher and retriever
//! agree on the naming scheme.

use std::{fmt, str::FromStr, time::Duration};

use bytes::Bytes;
use uuid::Uuid;

use super::error::DomainError;

const MAX_LOGICAL_ID_LEN: usize = 128;
const ARTIFACT_EXTENSION: &str = "pdf";
const BUILD_INDEX_PREFIX: &str = "builds/";

/// Caller-assigned document slot name.
///
/// Restricted to `[A-Za-z0-9._-]`, at most 128 characters and not starting
/// with `.`, so the derived object key is also a safe relative file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogicalId(String);

impl LogicalId {
    pub fn parse(value: &str) -> Result<Self, DomainError> {
        if value.is_empty() {
            return Err(DomainError::validation("logical_id must not be empty"));
        }
        if value.len() > MAX_LOGICAL_ID_LEN {
            return Err(DomainError::validation(format!(
                "logical_id must be at most {MAX_LOGICAL_ID_LEN} characters"
            )));
        }
        if value.starts_with('.') {
            return Err(DomainError::validation(
                "logical_id must not start with `.`",
            ));
        }
        if let Some(invalid) = value
            .chars()
            .find(|ch| !(ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.')))
        {
            return Err(DomainError::validation(format!(
                "logical_id contains unsupported character `{invalid}`"
            )));
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Storage key of the artifact for this slot. Stable across compiles.
    pub fn object_key(&self) -> String {
        format!("{}.{ARTIFACT_EXTENSION}", self.0)
    }
}

impl fmt::Display for LogicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for LogicalId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Per-attempt identifier, independent of the logical id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BuildId(Uuid);

impl BuildId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Key of the small index object pointing this build at its artifact.
    pub fn index_key(&self) -> String {
        format!("{BUILD_INDEX_PREFIX}{}", self.0)
    }

    /// File name presented to clients downloading this build.
    pub fn download_name(&self) -> String {
        format!("{}.{ARTIFACT_EXTENSION}", self.0)
    }
}

impl From<Uuid> for BuildId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl fmt::Display for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for BuildId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|err| DomainError::validation(format!("invalid build id `{s}`: {err}")))
    }
}

/// A validated compile submission.
#[derive(Debug, Clone)]
pub struct CompileRequest {
    pub logical_id: LogicalId,
    pub source: Bytes,
}

impl CompileRequest {
    pub fn new(logical_id: LogicalId, source: impl Into<Bytes>) -> Self {
        Self {
            logical_id,
            source: source.into(),
        }
    }
}

/// Terminal outcome of one compile attempt.
#[derive(Debug, Clone)]
pub enum BuildResult {
    Success {
        build_id: BuildId,
        object_key: String,
        signed_url: String,
        overwritten: bool,
    },
    /// The compiler rejected the source; `log` is its complete merged output.
    CompileFailure { log: String },
    /// The compiler was killed after running for `limit`.
    TimeoutFailure { limit: Duration, elapsed: Duration },
    /// The artifact was built but could not be stored or signed.
    PublishFailure { log: String, compile_log: String },
}

impl BuildResult {
    /// Label used in logs and metrics.
    pub fn outcome(&self) -> &'static str {
        match self {
            BuildResult::Success { .. } => "success",
            BuildResult::CompileFailure { .. } => "compile_failure",
            BuildResult::TimeoutFailure { .. } => "timeout",
            BuildResult::PublishFailure { .. } => "publish_failure",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, BuildResult::Success { .. })
    }
}
