#![cfg(unix)]

mod common;

use std::collections::HashSet;

use axum::http::StatusCode;
use common::{FAILING_COMPILER, Harness, HarnessConfig, MINIMAL_DOCUMENT, PDF_COMPILER};
use metrics_util::debugging::{DebugValue, DebuggingRecorder};
use texforge::infra::telemetry;

#[tokio::test]
async fn compile_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");
    telemetry::describe_metrics();

    let ok = Harness::with_script(PDF_COMPILER);
    let (status, _) = ok.compile("metrics-ok", MINIMAL_DOCUMENT).await;
    assert_eq!(status, StatusCode::OK);

    let failing = Harness::with_script(FAILING_COMPILER);
    let (status, _) = failing.compile("metrics-fail", MINIMAL_DOCUMENT).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let small = Harness::new(HarnessConfig {
        max_source_bytes: 4,
        ..HarnessConfig::default()
    });
    let (status, _) = small.compile("metrics-large", MINIMAL_DOCUMENT).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);

    let snapshot = snapshotter.snapshot().into_vec();

    let names: HashSet<String> = snapshot
        .iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();
    for metric in [
        "texforge_compile_total",
        "texforge_compile_ms",
        "texforge_compile_in_flight",
        "texforge_admission_rejected_total",
    ] {
        assert!(names.contains(metric), "missing metric: {metric}");
    }

    let outcomes: HashSet<String> = snapshot
        .iter()
        .filter(|(composite_key, _, _, _)| composite_key.key().name() == "texforge_compile_total")
        .flat_map(|(composite_key, _, _, _)| {
            composite_key
                .key()
                .labels()
                .filter(|label| label.key() == "outcome")
                .map(|label| label.value().to_string())
                .collect::<Vec<_>>()
        })
        .collect();
    assert!(outcomes.contains("success"), "outcomes: {outcomes:?}");
    assert!(outcomes.contains("compile_failure"), "outcomes: {outcomes:?}");

    let in_flight = snapshot
        .iter()
        .find(|(composite_key, _, _, _)| composite_key.key().name() == "texforge_compile_in_flight")
        .map(|(_, _, _, value)| value.clone());
    match in_flight {
        Some(DebugValue::Gauge(value)) => assert_eq!(value.into_inner(), 0.0),
        other => panic!("unexpected in-flight gauge: {other:?}"),
    }
}
