use std::time::Duration;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use texforge_api_types::{ApiErrorBody, ApiErrorMessage, codes};

use crate::{
    application::{
        admission::AdmissionError,
        build::BuildError,
        compile::CompileError,
        error::ErrorReport,
        retrieve::RetrieveError,
    },
    domain::error::DomainError,
};

/// JSON error response in the shared `{"error": {...}}` envelope.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    detail: Option<String>,
    /// Extra diagnostics for the log only.
    context: Option<String>,
}

impl ApiError {
    pub fn new(
        status: StatusCode,
        code: &'static str,
        message: impl Into<String>,
        detail: Option<String>,
    ) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            detail,
            context: None,
        }
    }

    pub fn invalid_input(message: impl Into<String>, detail: Option<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, codes::INVALID_INPUT, message, detail)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, codes::NOT_FOUND, message, None)
    }

    fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn compile_failed(log: String) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            codes::COMPILE_FAILED,
            "LaTeX compilation failed",
            Some(log),
        )
    }

    pub fn compile_timeout(limit: Duration) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            codes::COMPILE_TIMEOUT,
            format!("LaTeX compilation timed out after {}s", limit.as_secs_f64()),
            None,
        )
    }

    pub fn publish_failed(log: String, compile_log: &str) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            codes::PUBLISH_FAILED,
            "Compiled PDF could not be published",
            Some(log),
        )
        .with_context(format!("compile log: {} bytes", compile_log.len()))
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation { message } => Self::invalid_input(message, None),
        }
    }
}

impl From<CompileError> for ApiError {
    fn from(err: CompileError) -> Self {
        match err {
            CompileError::Admission(err @ AdmissionError::TooLarge { .. }) => Self::new(
                StatusCode::PAYLOAD_TOO_LARGE,
                codes::SOURCE_TOO_LARGE,
                err.to_string(),
                None,
            ),
            CompileError::Admission(AdmissionError::Closed) => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                codes::BUILD_ERROR,
                "Compile service is shutting down",
                None,
            ),
            CompileError::Build(err) => {
                let message = match &err {
                    BuildError::Workspace(_) => "Build workspace could not be prepared",
                    BuildError::Compiler(_) => "LaTeX compiler could not be started",
                };
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    codes::BUILD_ERROR,
                    message,
                    Some(err.to_string()),
                )
            }
            CompileError::Aborted(err) => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                codes::BUILD_ERROR,
                "Compile task aborted",
                Some(err.to_string()),
            ),
        }
    }
}

impl From<RetrieveError> for ApiError {
    fn from(err: RetrieveError) -> Self {
        match err {
            RetrieveError::NotFound => Self::not_found("PDF not found"),
            RetrieveError::Storage(err) => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                codes::STORAGE_ERROR,
                "Storage error",
                Some(err.to_string()),
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // Compiler logs can be large; only server-side failures log their detail.
        let mut diagnostic = match (&self.detail, self.status.is_server_error()) {
            (Some(detail), true) => format!("{}: {}", self.code, detail),
            _ => format!("{}: {}", self.code, self.message),
        };
        if let Some(context) = &self.context {
            diagnostic.push_str(&format!(" ({context})"));
        }
        let body = ApiErrorBody {
            error: ApiErrorMessage {
                code: self.code.to_string(),
                message: self.message,
                detail: self.detail,
            },
        };
        let mut response = (self.status, Json(body)).into_response();
        ErrorReport::from_message("infra::http::api", self.status, diagnostic)
            .attach(&mut response);
        response
    }
}
