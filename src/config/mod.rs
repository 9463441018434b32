//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    net::SocketAddr,
    num::{NonZeroU32, NonZeroU64},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "texforge";
const ENV_PREFIX: &str = "TEXFORGE";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8000;
const DEFAULT_STORAGE_ENDPOINT: &str = "http://127.0.0.1:9100";
const DEFAULT_STORAGE_ACCESS_KEY: &str = "minio";
const DEFAULT_STORAGE_SECRET_KEY: &str = "minio123";
const DEFAULT_STORAGE_BUCKET: &str = "latex-builds";
const DEFAULT_URL_TTL_SECS: u64 = 3600;
/// Longest validity S3 accepts for a presigned URL (one week).
const MAX_URL_TTL_SECS: u64 = 7 * 24 * 60 * 60;
const DEFAULT_COMPILER_PROGRAM: &str = "pdflatex";
const DEFAULT_COMPILER_ARGS: [&str; 2] = ["-interaction=nonstopmode", "-halt-on-error"];
const DEFAULT_BUILD_DIR_NAME: &str = "latex_builds";
const DEFAULT_OUTPUT_DIR: &str = "output";
const DEFAULT_COMPILE_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_CONCURRENT_COMPILES: u32 = 4;
const DEFAULT_MAX_SOURCE_BYTES: u64 = 1_000_000;

/// Command-line arguments for the texforge binary.
#[derive(Debug, Parser)]
#[command(name = "texforge", version, about = "LaTeX to PDF compile service")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "TEXFORGE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP service.
    Serve(Box<ServeArgs>),
    /// Compile and publish a single local file, then print the outcome as JSON.
    Compile(CompileArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub storage: StorageOverrides,

    #[command(flatten)]
    pub compile: CompileOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct StorageOverrides {
    /// Override the S3-compatible endpoint (`host:port` or a full URL).
    #[arg(long = "storage-endpoint", value_name = "URL")]
    pub endpoint: Option<String>,

    /// Override the destination bucket.
    #[arg(long = "storage-bucket", value_name = "NAME")]
    pub bucket: Option<String>,

    /// Override the storage region.
    #[arg(long = "storage-region", value_name = "REGION")]
    pub region: Option<String>,

    /// Force TLS for endpoints given without a scheme.
    #[arg(
        long = "storage-secure",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub secure: Option<bool>,

    /// Override the lifetime of signed artifact URLs.
    #[arg(long = "storage-url-ttl-seconds", value_name = "SECONDS")]
    pub url_ttl_seconds: Option<u64>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct CompileOverrides {
    /// Override the compiler executable.
    #[arg(long = "compile-program", value_name = "PATH")]
    pub program: Option<PathBuf>,

    /// Override the directory holding per-build workspaces.
    #[arg(long = "compile-build-root", value_name = "PATH")]
    pub build_root: Option<PathBuf>,

    /// Override the compiler wall-clock timeout.
    #[arg(long = "compile-timeout-seconds", value_name = "SECONDS")]
    pub timeout_seconds: Option<u64>,

    /// Override the number of compiles allowed to run at once.
    #[arg(long = "compile-max-concurrent", value_name = "COUNT")]
    pub max_concurrent: Option<u32>,

    /// Override the maximum accepted source size in bytes.
    #[arg(long = "compile-max-source-bytes", value_name = "BYTES")]
    pub max_source_bytes: Option<u64>,

    /// Keep a local copy of each published PDF.
    #[arg(
        long = "compile-keep-local-output",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub keep_local_output: Option<bool>,

    /// Override the directory receiving local PDF copies.
    #[arg(long = "compile-output-dir", value_name = "PATH")]
    pub output_dir: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct CompileArgs {
    #[command(flatten)]
    pub storage: StorageOverrides,

    #[command(flatten)]
    pub compile: CompileOverrides,

    /// Logical document id the artifact is published under.
    #[arg(long = "logical-id", value_name = "ID")]
    pub logical_id: String,

    /// LaTeX source file to compile.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: PathBuf,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub storage: StorageSettings,
    pub compile: CompileSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Clone)]
pub struct StorageSettings {
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    pub region: Option<String>,
    pub secure: bool,
    pub url_ttl: Duration,
}

impl std::fmt::Debug for StorageSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageSettings")
            .field("endpoint", &self.endpoint)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("secure", &self.secure)
            .field("url_ttl", &self.url_ttl)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct CompileSettings {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub build_root: PathBuf,
    pub timeout: Duration,
    pub max_concurrent: NonZeroU32,
    pub max_source_bytes: NonZeroU64,
    pub keep_local_output: bool,
    pub output_dir: PathBuf,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("compile.args"),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Compile(args)) => {
            raw.apply_storage_overrides(&args.storage);
            raw.apply_compile_overrides(&args.compile);
        }
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    storage: RawStorageSettings,
    compile: RawCompileSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }

        self.apply_storage_overrides(&overrides.storage);
        self.apply_compile_overrides(&overrides.compile);
    }

    fn apply_storage_overrides(&mut self, overrides: &StorageOverrides) {
        if let Some(endpoint) = overrides.endpoint.as_ref() {
            self.storage.endpoint = Some(endpoint.clone());
        }
        if let Some(bucket) = overrides.bucket.as_ref() {
            self.storage.bucket = Some(bucket.clone());
        }
        if let Some(region) = overrides.region.as_ref() {
            self.storage.region = Some(region.clone());
        }
        if let Some(secure) = overrides.secure {
            self.storage.secure = Some(secure);
        }
        if let Some(ttl) = overrides.url_ttl_seconds {
            self.storage.url_ttl_seconds = Some(ttl);
        }
    }

    fn apply_compile_overrides(&mut self, overrides: &CompileOverrides) {
        if let Some(program) = overrides.program.as_ref() {
            self.compile.program = Some(program.clone());
        }
        if let Some(root) = overrides.build_root.as_ref() {
            self.compile.build_root = Some(root.clone());
        }
        if let Some(seconds) = overrides.timeout_seconds {
            self.compile.timeout_seconds = Some(seconds);
        }
        if let Some(max) = overrides.max_concurrent {
            self.compile.max_concurrent = Some(max);
        }
        if let Some(limit) = overrides.max_source_bytes {
            self.compile.max_source_bytes = Some(limit);
        }
        if let Some(keep) = overrides.keep_local_output {
            self.compile.keep_local_output = Some(keep);
        }
        if let Some(dir) = overrides.output_dir.as_ref() {
            self.compile.output_dir = Some(dir.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            storage,
            compile,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let storage = build_storage_settings(storage)?;
        let compile = build_compile_settings(compile)?;

        Ok(Self {
            server,
            logging,
            storage,
            compile,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    Ok(ServerSettings { addr })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_storage_settings(storage: RawStorageSettings) -> Result<StorageSettings, LoadError> {
    let endpoint = non_empty(storage.endpoint).unwrap_or_else(|| DEFAULT_STORAGE_ENDPOINT.into());
    let bucket = non_empty(storage.bucket).unwrap_or_else(|| DEFAULT_STORAGE_BUCKET.into());
    let access_key =
        non_empty(storage.access_key).unwrap_or_else(|| DEFAULT_STORAGE_ACCESS_KEY.into());
    let secret_key =
        non_empty(storage.secret_key).unwrap_or_else(|| DEFAULT_STORAGE_SECRET_KEY.into());
    let region = non_empty(storage.region);

    let ttl_seconds = storage.url_ttl_seconds.unwrap_or(DEFAULT_URL_TTL_SECS);
    if ttl_seconds == 0 {
        return Err(LoadError::invalid(
            "storage.url_ttl_seconds",
            "must be greater than zero",
        ));
    }
    if ttl_seconds > MAX_URL_TTL_SECS {
        return Err(LoadError::invalid(
            "storage.url_ttl_seconds",
            format!("must be at most {MAX_URL_TTL_SECS} seconds (one week)"),
        ));
    }

    Ok(StorageSettings {
        endpoint,
        access_key,
        secret_key,
        bucket,
        region,
        secure: storage.secure.unwrap_or(false),
        url_ttl: Duration::from_secs(ttl_seconds),
    })
}

fn build_compile_settings(compile: RawCompileSettings) -> Result<CompileSettings, LoadError> {
    let program = compile
        .program
        .unwrap_or_else(|| PathBuf::from(DEFAULT_COMPILER_PROGRAM));
    if program.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "compile.program",
            "path must not be empty",
        ));
    }

    let args = compile
        .args
        .unwrap_or_else(|| DEFAULT_COMPILER_ARGS.iter().map(|arg| arg.to_string()).collect());

    let build_root = compile
        .build_root
        .unwrap_or_else(|| std::env::temp_dir().join(DEFAULT_BUILD_DIR_NAME));
    if build_root.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "compile.build_root",
            "path must not be empty",
        ));
    }

    let timeout_seconds = compile
        .timeout_seconds
        .unwrap_or(DEFAULT_COMPILE_TIMEOUT_SECS);
    if timeout_seconds == 0 {
        return Err(LoadError::invalid(
            "compile.timeout_seconds",
            "must be greater than zero",
        ));
    }

    let max_concurrent = non_zero_u32(
        compile
            .max_concurrent
            .unwrap_or(DEFAULT_MAX_CONCURRENT_COMPILES)
            .into(),
        "compile.max_concurrent",
    )?;

    let max_source_bytes_value = compile
        .max_source_bytes
        .unwrap_or(DEFAULT_MAX_SOURCE_BYTES);
    let max_source_bytes = NonZeroU64::new(max_source_bytes_value).ok_or_else(|| {
        LoadError::invalid("compile.max_source_bytes", "must be greater than zero")
    })?;
    usize::try_from(max_source_bytes_value).map_err(|_| {
        LoadError::invalid(
            "compile.max_source_bytes",
            "value exceeds supported range for usize",
        )
    })?;

    let output_dir = compile
        .output_dir
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR));

    Ok(CompileSettings {
        program,
        args,
        build_root,
        timeout: Duration::from_secs(timeout_seconds),
        max_concurrent,
        max_source_bytes,
        keep_local_output: compile.keep_local_output.unwrap_or(false),
        output_dir,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStorageSettings {
    endpoint: Option<String>,
    access_key: Option<String>,
    secret_key: Option<String>,
    bucket: Option<String>,
    region: Option<String>,
    secure: Option<bool>,
    url_ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCompileSettings {
    program: Option<PathBuf>,
    args: Option<Vec<String>>,
    build_root: Option<PathBuf>,
    timeout_seconds: Option<u64>,
    max_concurrent: Option<u32>,
    max_source_bytes: Option<u64>,
    keep_local_output: Option<bool>,
    output_dir: Option<PathBuf>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

        assert_eq!(settings.server.addr.port(), DEFAULT_PORT);
        assert_eq!(settings.storage.bucket, "latex-builds");
        assert_eq!(settings.storage.url_ttl, Duration::from_secs(3600));
        assert!(!settings.storage.secure);
        assert!(settings.storage.region.is_none());
        assert_eq!(settings.compile.program, PathBuf::from("pdflatex"));
        assert_eq!(
            settings.compile.args,
            vec!["-interaction=nonstopmode", "-halt-on-error"]
        );
        assert_eq!(settings.compile.timeout, Duration::from_secs(30));
        assert_eq!(settings.compile.max_concurrent.get(), 4);
        assert_eq!(settings.compile.max_source_bytes.get(), 1_000_000);
        assert!(!settings.compile.keep_local_output);
        assert!(settings.compile.build_root.ends_with("latex_builds"));
    }

    #[test]
    fn cli_overrides_take_highest_precedence() {
        let mut raw = RawSettings::default();
        raw.server.port = Some(4000);
        raw.compile.timeout_seconds = Some(10);

        let overrides = ServeOverrides {
            server_port: Some(4321),
            log_level: Some("debug".to_string()),
            compile: CompileOverrides {
                timeout_seconds: Some(5),
                max_concurrent: Some(2),
                ..Default::default()
            },
            ..Default::default()
        };

        raw.apply_serve_overrides(&overrides);
        let settings = Settings::from_raw(raw).expect("valid settings");

        assert_eq!(settings.server.addr.port(), 4321);
        assert_eq!(settings.logging.level, LevelFilter::DEBUG);
        assert_eq!(settings.compile.timeout, Duration::from_secs(5));
        assert_eq!(settings.compile.max_concurrent.get(), 2);
    }

    #[test]
    fn zero_limits_are_rejected() {
        let mut raw = RawSettings::default();
        raw.compile.max_concurrent = Some(0);
        let err = Settings::from_raw(raw).expect_err("zero concurrency");
        assert!(matches!(
            err,
            LoadError::Invalid {
                key: "compile.max_concurrent",
                ..
            }
        ));

        let mut raw = RawSettings::default();
        raw.compile.max_source_bytes = Some(0);
        assert!(Settings::from_raw(raw).is_err());

        let mut raw = RawSettings::default();
        raw.storage.url_ttl_seconds = Some(0);
        assert!(Settings::from_raw(raw).is_err());
    }

    #[test]
    fn url_ttl_is_capped_at_one_week() {
        let mut raw = RawSettings::default();
        raw.storage.url_ttl_seconds = Some(MAX_URL_TTL_SECS);
        let settings = Settings::from_raw(raw).expect("one week is accepted");
        assert_eq!(settings.storage.url_ttl, Duration::from_secs(604_800));

        let mut raw = RawSettings::default();
        raw.storage.url_ttl_seconds = Some(700_000);
        let err = Settings::from_raw(raw).expect_err("over one week");
        assert!(matches!(
            err,
            LoadError::Invalid {
                key: "storage.url_ttl_seconds",
                ..
            }
        ));
    }

    #[test]
    fn blank_region_is_treated_as_unset() {
        let mut raw = RawSettings::default();
        raw.storage.region = Some("   ".to_string());
        let settings = Settings::from_raw(raw).expect("valid settings");
        assert!(settings.storage.region.is_none());
    }

    #[test]
    fn debug_output_redacts_secret_key() {
        let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");
        let rendered = format!("{:?}", settings.storage);
        assert!(!rendered.contains(DEFAULT_STORAGE_SECRET_KEY));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn default_to_serve_command() {
        let args = CliArgs::parse_from(["texforge"]);
        let command = args
            .command
            .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
        assert!(matches!(command, Command::Serve(_)));
    }

    #[test]
    fn parse_compile_arguments() {
        let args = CliArgs::parse_from([
            "texforge",
            "compile",
            "--logical-id",
            "report-q3",
            "--compile-timeout-seconds",
            "12",
            "--storage-bucket",
            "scratch",
            "/tmp/report.tex",
        ]);

        match args.command.expect("compile command") {
            Command::Compile(compile) => {
                assert_eq!(compile.logical_id, "report-q3");
                assert_eq!(compile.compile.timeout_seconds, Some(12));
                assert_eq!(compile.storage.bucket.as_deref(), Some("scratch"));
                assert_eq!(compile.file, std::path::Path::new("/tmp/report.tex"));
            }
            _ => panic!("wrong command parsed"),
        }
    }

    #[test]
    fn parse_serve_overrides() {
        let args = CliArgs::parse_from([
            "texforge",
            "serve",
            "--server-host",
            "0.0.0.0",
            "--storage-secure",
            "true",
            "--compile-keep-local-output",
            "yes",
        ]);

        match args.command.expect("serve command") {
            Command::Serve(serve) => {
                assert_eq!(serve.overrides.server_host.as_deref(), Some("0.0.0.0"));
                assert_eq!(serve.overrides.storage.secure, Some(true));
                assert_eq!(serve.overrides.compile.keep_local_output, Some(true));
            }
            _ => panic!("wrong command parsed"),
        }
    }
}
