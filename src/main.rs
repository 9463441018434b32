use std::{process, sync::Arc};

use texforge::{
    application::{
        admission::AdmissionGuard,
        artifacts::ArtifactStore,
        build::{BuildOrchestrator, CompilerCommand},
        compile::CompileService,
        error::AppError,
        publish::ArtifactPublisher,
        retrieve::ArtifactRetriever,
    },
    config,
    domain::build::{BuildResult, CompileRequest, LogicalId},
    infra::{
        error::InfraError,
        http::{self, AppState},
        storage::S3ObjectStore,
        telemetry,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) =
        config::load_with_cli().map_err(|err| AppError::from(InfraError::from(err)))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Compile(args) => run_compile(settings, args).await,
    }
}

struct ApplicationContext {
    compile: Arc<CompileService>,
    retriever: Arc<ArtifactRetriever>,
}

async fn build_application_context(
    settings: &config::Settings,
) -> Result<ApplicationContext, AppError> {
    let compile_settings = &settings.compile;
    tokio::fs::create_dir_all(&compile_settings.build_root)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    let backend = S3ObjectStore::new(&settings.storage)
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    let store = Arc::new(ArtifactStore::new(
        Arc::new(backend),
        settings.storage.url_ttl,
    ));

    let compiler = CompilerCommand::new(
        compile_settings.program.clone(),
        compile_settings.args.clone(),
        compile_settings.timeout,
    );
    let local_output = compile_settings
        .keep_local_output
        .then(|| compile_settings.output_dir.clone());
    let orchestrator = BuildOrchestrator::new(
        compiler,
        compile_settings.build_root.clone(),
        ArtifactPublisher::new(store.clone()),
    )
    .with_local_output(local_output);

    let admission = AdmissionGuard::new(
        compile_settings.max_source_bytes,
        compile_settings.max_concurrent,
    );

    Ok(ApplicationContext {
        compile: Arc::new(CompileService::new(admission, orchestrator)),
        retriever: Arc::new(ArtifactRetriever::new(store)),
    })
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let app = build_application_context(&settings).await?;
    let router = http::build_router(AppState {
        compile: app.compile,
        retriever: app.retriever,
    });

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "texforge::serve",
        addr = %settings.server.addr,
        bucket = %settings.storage.bucket,
        compiler = %settings.compile.program.display(),
        max_concurrent = settings.compile.max_concurrent.get(),
        "listening"
    );

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!(target = "texforge::serve", "shutdown signal received");
}

async fn run_compile(
    settings: config::Settings,
    args: config::CompileArgs,
) -> Result<(), AppError> {
    let logical_id = LogicalId::parse(&args.logical_id)?;
    let source = tokio::fs::read(&args.file)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    let app = build_application_context(&settings).await?;
    let result = app
        .compile
        .submit(CompileRequest::new(logical_id, source))
        .await
        .map_err(|err| AppError::unexpected(err.to_string()))?;

    let report = outcome_json(&result);
    let rendered = serde_json::to_string_pretty(&report)
        .map_err(|err| AppError::unexpected(format!("failed to render outcome: {err}")))?;
    println!("{rendered}");

    if result.is_success() {
        Ok(())
    } else {
        Err(AppError::unexpected(format!(
            "compile finished with outcome `{}`",
            result.outcome()
        )))
    }
}

fn outcome_json(result: &BuildResult) -> serde_json::Value {
    match result {
        BuildResult::Success {
            build_id,
            object_key,
            signed_url,
            overwritten,
        } => serde_json::json!({
            "outcome": result.outcome(),
            "build_id": build_id.to_string(),
            "object_key": object_key,
            "signed_url": signed_url,
            "overwritten": overwritten,
        }),
        BuildResult::CompileFailure { log } => serde_json::json!({
            "outcome": result.outcome(),
            "log": log,
        }),
        BuildResult::TimeoutFailure { limit, elapsed } => serde_json::json!({
            "outcome": result.outcome(),
            "limit_ms": limit.as_millis() as u64,
            "elapsed_ms": elapsed.as_millis() as u64,
        }),
        BuildResult::PublishFailure { log, compile_log } => serde_json::json!({
            "outcome": result.outcome(),
            "log": log,
            "compile_log": compile_log,
        }),
    }
}
