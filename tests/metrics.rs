#![cfg(feature = "metrics")]
//! Tests for `tablestream` metrics helpers.
//!
//! These tests verify that counters and gauges update as expected using
//! `metrics_util::debugging::DebuggingRecorder`.
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use rstest::rstest;
use tablestream::{
    MessageKind,
    metrics::{self as stream_metrics, Stage},
};

fn debugging_recorder_setup() -> (Snapshotter, DebuggingRecorder) {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    (snapshotter, recorder)
}

fn counter_with_label(snapshotter: &Snapshotter, name: &str, label: (&str, &str)) -> u64 {
    snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .find_map(|(k, _, _, v)| {
            let key = k.key();
            let labelled = key
                .labels()
                .any(|l| l.key() == label.0 && l.value() == label.1);
            match v {
                DebugValue::Counter(c) if key.name() == name && labelled => Some(c),
                _ => None,
            }
        })
        .unwrap_or(0)
}

#[rstest]
#[case(MessageKind::Init, "init")]
#[case(MessageKind::Incoming, "incoming")]
#[case(MessageKind::KeepAlive, "keep_alive")]
fn message_counter_is_labelled_by_kind(#[case] kind: MessageKind, #[case] label: &str) {
    let (snapshotter, recorder) = debugging_recorder_setup();
    metrics::with_local_recorder(&recorder, || {
        stream_metrics::inc_messages(kind);
        stream_metrics::inc_messages(kind);
    });

    assert_eq!(
        counter_with_label(&snapshotter, stream_metrics::MESSAGES_RECEIVED, ("kind", label)),
        2
    );
}

#[test]
fn error_counter_is_labelled_by_stage() {
    let (snapshotter, recorder) = debugging_recorder_setup();
    metrics::with_local_recorder(&recorder, || stream_metrics::inc_errors(Stage::Resolve));

    assert_eq!(
        counter_with_label(&snapshotter, stream_metrics::ERRORS_TOTAL, ("stage", "resolve")),
        1
    );
}

#[test]
fn connection_gauge_tracks_open_connections() {
    let (snapshotter, recorder) = debugging_recorder_setup();
    metrics::with_local_recorder(&recorder, || {
        stream_metrics::inc_connections();
        stream_metrics::inc_connections();
        stream_metrics::dec_connections();
    });

    let metrics = snapshotter.snapshot().into_vec();
    let found = metrics.iter().any(|(k, _, _, v)| {
        k.key().name() == stream_metrics::CONNECTIONS_ACTIVE
            && matches!(v, DebugValue::Gauge(g) if (g.into_inner() - 1.0).abs() < f64::EPSILON)
    });
    assert!(found, "connection gauge not recorded");
}
