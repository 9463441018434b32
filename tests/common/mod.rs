#![allow(dead_code)]

use std::{
    fs,
    num::{NonZeroU32, NonZeroU64},
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use axum::{
    Router,
    body::Body,
    http::{Method, Request, Response, StatusCode, header},
};
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use texforge::{
    application::{
        admission::AdmissionGuard,
        artifacts::ArtifactStore,
        build::{BuildOrchestrator, CompilerCommand},
        compile::CompileService,
        publish::ArtifactPublisher,
        retrieve::ArtifactRetriever,
    },
    infra::{
        http::{AppState, build_router},
        storage::MemoryObjectStore,
    },
};
use tower::ServiceExt;

/// Emits a pdfTeX-like banner and writes `main.pdf` holding a header plus the source.
pub const PDF_COMPILER: &str = "#!/bin/sh\n\
echo \"This is pdfTeX, Version 3.141592653\"\n\
{ printf '%%PDF-1.4\\n'; cat main.tex; } > main.pdf\n\
echo \"Output written on main.pdf (1 page).\"\n";

/// Fails the way pdflatex does on an unbalanced environment.
pub const FAILING_COMPILER: &str = "#!/bin/sh\n\
echo \"This is pdfTeX, Version 3.141592653\"\n\
printf '%s\\n' '! LaTeX Error: \\begin{document} ended by \\end{itemize}.'\n\
printf '%s\\n' 'l.4 \\end{itemize}' >&2\n\
exit 1\n";

/// Never finishes on its own.
pub const HANGING_COMPILER: &str = "#!/bin/sh\nexec sleep 60\n";

pub struct Harness {
    pub dir: TempDir,
    pub memory: Arc<MemoryObjectStore>,
    pub service: Arc<CompileService>,
    pub router: Router,
}

pub struct HarnessConfig {
    pub script: String,
    pub timeout: Duration,
    pub max_concurrent: u32,
    pub max_source_bytes: u64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            script: PDF_COMPILER.to_string(),
            timeout: Duration::from_secs(10),
            max_concurrent: 4,
            max_source_bytes: 64 * 1024,
        }
    }
}

impl Harness {
    pub fn new(config: HarnessConfig) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let program = write_script(dir.path(), "fake-pdflatex", &config.script);
        let memory = Arc::new(MemoryObjectStore::new("latex-builds"));
        let store = Arc::new(ArtifactStore::new(
            memory.clone(),
            Duration::from_secs(3600),
        ));

        let orchestrator = BuildOrchestrator::new(
            CompilerCommand::new(
                program,
                vec!["-interaction=nonstopmode".into(), "-halt-on-error".into()],
                config.timeout,
            ),
            dir.path().join("builds"),
            ArtifactPublisher::new(store.clone()),
        );
        let admission = AdmissionGuard::new(
            NonZeroU64::new(config.max_source_bytes).expect("non-zero size"),
            NonZeroU32::new(config.max_concurrent).expect("non-zero concurrency"),
        );
        let service = Arc::new(CompileService::new(admission, orchestrator));
        let router = build_router(AppState {
            compile: service.clone(),
            retriever: Arc::new(ArtifactRetriever::new(store)),
        });

        Self {
            dir,
            memory,
            service,
            router,
        }
    }

    pub fn with_script(script: &str) -> Self {
        Self::new(HarnessConfig {
            script: script.to_string(),
            ..HarnessConfig::default()
        })
    }

    pub fn build_root(&self) -> PathBuf {
        self.dir.path().join("builds")
    }

    /// Workspaces currently present under the build root.
    pub fn workspaces(&self) -> Vec<PathBuf> {
        match fs::read_dir(self.build_root()) {
            Ok(entries) => entries.filter_map(Result::ok).map(|e| e.path()).collect(),
            Err(_) => Vec::new(),
        }
    }

    pub async fn compile(&self, logical_id: &str, latex: &str) -> (StatusCode, Value) {
        let body = serde_json::json!({ "logical_id": logical_id, "latex": latex });
        self.post_json(body.to_string()).await
    }

    pub async fn post_json(&self, body: String) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/compile")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .expect("request should build");
        let response = self.send(request).await;
        let status = response.status();
        let bytes = read_body(response).await;
        let json = serde_json::from_slice(&bytes).expect("json body");
        (status, json)
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        let request = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Body::empty())
            .expect("request should build");
        self.send(request).await
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router should respond")
    }
}

pub async fn read_body(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .expect("body should collect")
        .to_bytes()
        .to_vec()
}

pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).expect("write script");
    let mut perms = fs::metadata(&path).expect("metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).expect("set perms");
    path
}

pub const MINIMAL_DOCUMENT: &str =
    "\\documentclass{article}\n\\begin{document}\nHello, world.\n\\end{document}\n";
