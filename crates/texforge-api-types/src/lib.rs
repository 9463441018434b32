//! Wire types shared by the texforge server and its clients.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Body of `POST /compile`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileRequest {
    /// Caller-chosen slot name; later compiles with the same id replace the artifact.
    pub logical_id: String,
    /// LaTeX document source.
    pub latex: String,
}

/// Successful `POST /compile` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileResponse {
    pub status: CompileStatus,
    pub build_id: Uuid,
    /// Relative path that streams the artifact through the service.
    pub pdf_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signed_url: Option<String>,
    pub overwritten: bool,
}

impl CompileResponse {
    pub fn success(build_id: Uuid, signed_url: Option<String>, overwritten: bool) -> Self {
        Self {
            status: CompileStatus::Success,
            build_id,
            pdf_url: pdf_path(build_id),
            signed_url,
            overwritten,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompileStatus {
    Success,
}

/// Path under which a build's artifact is served.
pub fn pdf_path(build_id: Uuid) -> String {
    format!("/pdf/{build_id}")
}

/// Error envelope returned by every failing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorBody {
    pub error: ApiErrorMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorMessage {
    pub code: String,
    pub message: String,
    /// Raw diagnostic text (compiler log or storage error), never summarised.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

pub mod codes {
    pub const SOURCE_TOO_LARGE: &str = "source_too_large";
    pub const INVALID_INPUT: &str = "invalid_input";
    pub const COMPILE_FAILED: &str = "compile_failed";
    pub const COMPILE_TIMEOUT: &str = "compile_timeout";
    pub const PUBLISH_FAILED: &str = "publish_failed";
    pub const NOT_FOUND: &str = "not_found";
    pub const STORAGE_ERROR: &str = "storage_error";
    pub const BUILD_ERROR: &str = "build_error";
}
