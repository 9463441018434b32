use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

pub const METRIC_COMPILE_TOTAL: &str = "texforge_compile_total";
pub const METRIC_COMPILE_MS: &str = "texforge_compile_ms";
pub const METRIC_COMPILE_IN_FLIGHT: &str = "texforge_compile_in_flight";
pub const METRIC_ADMISSION_REJECTED_TOTAL: &str = "texforge_admission_rejected_total";

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_COMPILE_TOTAL,
            Unit::Count,
            "Total number of finished compile attempts, labelled by outcome."
        );
        describe_counter!(
            METRIC_ADMISSION_REJECTED_TOTAL,
            Unit::Count,
            "Total number of compile requests rejected for oversized sources."
        );
        describe_histogram!(
            METRIC_COMPILE_MS,
            Unit::Milliseconds,
            "Wall-clock duration of compile attempts in milliseconds."
        );
        describe_gauge!(
            METRIC_COMPILE_IN_FLIGHT,
            Unit::Count,
            "Number of compiles currently holding an admission permit."
        );
    });
}
