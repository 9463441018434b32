use axum::{
    Json,
    body::Body,
    extract::{Path, State, rejection::JsonRejection},
    http::{HeaderValue, StatusCode, header},
    response::Response,
};
use texforge_api_types::{CompileRequest as CompileRequestBody, CompileResponse, codes};

use crate::{
    application::{artifacts::PDF_CONTENT_TYPE, compile::CompileError},
    domain::build::{BuildId, BuildResult, CompileRequest, LogicalId},
};

use super::{AppState, error::ApiError};

pub async fn compile(
    State(state): State<AppState>,
    payload: Result<Json<CompileRequestBody>, JsonRejection>,
) -> Result<Json<CompileResponse>, ApiError> {
    let Json(body) = payload.map_err(rejection_to_api)?;

    state
        .compile
        .admission()
        .check_size(body.latex.as_bytes())
        .map_err(CompileError::from)?;
    let logical_id = LogicalId::parse(&body.logical_id)?;

    let request = CompileRequest::new(logical_id, body.latex);
    match state.compile.submit(request).await? {
        BuildResult::Success {
            build_id,
            signed_url,
            overwritten,
            ..
        } => Ok(Json(CompileResponse::success(
            build_id.as_uuid(),
            Some(signed_url),
            overwritten,
        ))),
        BuildResult::CompileFailure { log } => Err(ApiError::compile_failed(log)),
        BuildResult::TimeoutFailure { limit, .. } => Err(ApiError::compile_timeout(limit)),
        BuildResult::PublishFailure { log, compile_log } => {
            Err(ApiError::publish_failed(log, &compile_log))
        }
    }
}

pub async fn get_pdf(
    State(state): State<AppState>,
    Path(build_id): Path<String>,
) -> Result<Response, ApiError> {
    let build_id: BuildId = build_id
        .parse()
        .map_err(|_| ApiError::not_found("PDF not found"))?;

    let stream = state.retriever.retrieve(build_id).await?;

    let mut response = Response::new(Body::from_stream(stream));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(PDF_CONTENT_TYPE),
    );
    if let Ok(value) =
        HeaderValue::from_str(&format!("inline; filename={}", build_id.download_name()))
    {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    Ok(response)
}

pub async fn health() -> &'static str {
    "ok"
}

fn rejection_to_api(rejection: JsonRejection) -> ApiError {
    if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return ApiError::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            codes::SOURCE_TOO_LARGE,
            "Request body too large",
            Some(rejection.body_text()),
        );
    }
    ApiError::invalid_input("Invalid request body", Some(rejection.body_text()))
}
