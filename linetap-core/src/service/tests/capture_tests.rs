use crate::conf::{CaptureSettings, ConfigUpdate};
use crate::service::{Capture, RotateResult};
use crate::writer::CompressMode;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::runtime::Handle;

fn capture_in(dir: &Path) -> Arc<Capture> {
    let mut settings = CaptureSettings::default();
    settings.policy.out_dir = dir.to_path_buf();
    settings.policy.prefix = "svc".to_string();
    Arc::new(Capture::with_echo_sink(
        &settings,
        Handle::current(),
        Box::new(io::sink()),
    ))
}

fn rotated_files(dir: &Path) -> Vec<String> {
    let mut names = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|n| n != "svc.current.log")
        .collect::<Vec<_>>();
    names.sort();
    names
}

#[tokio::test]
async fn updated_lists_only_changed_fields() {
    // Arrange
    let dir = TempDir::new().unwrap();
    let capture = capture_in(dir.path());
    capture.writer().open().unwrap();
    let update = ConfigUpdate::from_json(&json!({
        "compress": "none",
        "retain": 3,
        "ring_size": 25,
        "echo": "on",
    }))
    .unwrap();

    // Act
    let outcome = capture.apply_config(&update);

    // Assert
    assert_eq!(
        serde_json::Value::Object(outcome.updated),
        json!({ "retain": 3, "echo": true })
    );
    assert!(outcome.rotation.is_none());
    assert!(!capture.writer().rotation_pending());
}

#[tokio::test]
async fn file_affecting_change_is_deferred_to_the_next_line() {
    // Arrange
    let dir = TempDir::new().unwrap();
    let capture = capture_in(dir.path());
    capture.writer().open().unwrap();
    let update = ConfigUpdate::from_json(&json!({ "compress": "inline" })).unwrap();

    // Act
    let outcome = capture.apply_config(&update);

    // Assert
    assert_eq!(
        serde_json::Value::Object(outcome.updated),
        json!({ "compress": "inline" })
    );
    assert!(capture.writer().rotation_pending());
    assert_eq!(capture.writer().policy().compress, CompressMode::Inline);
    assert!(
        capture
            .writer()
            .current_path()
            .unwrap()
            .ends_with("svc.current.log")
    );
}

#[tokio::test]
async fn rotate_now_runs_after_the_new_policy_is_in_place() {
    // Arrange
    let dir = TempDir::new().unwrap();
    let capture = capture_in(dir.path());
    capture.writer().write(&"before\n".into()).unwrap();
    let update = ConfigUpdate::from_json(&json!({ "prefix": "next", "rotate_now": true })).unwrap();

    // Act
    let outcome = capture.apply_config(&update);

    // Assert
    let report = outcome.rotation.expect("rotation requested").unwrap();
    let previous = report.previous_file.unwrap();
    let previous_name = previous.file_name().unwrap().to_string_lossy().into_owned();
    assert!(previous_name.starts_with("svc-"), "{previous_name}");
    assert!(report.current_file.ends_with("next.current.log"));
    assert!(!capture.writer().rotation_pending());
}

#[tokio::test]
async fn ring_resize_and_idle_threshold_show_in_the_view() {
    // Arrange
    let dir = TempDir::new().unwrap();
    let capture = capture_in(dir.path());
    let update =
        ConfigUpdate::from_json(&json!({ "ring_size": 5, "idle_alert_secs": 30 })).unwrap();

    // Act
    let outcome = capture.apply_config(&update);
    let view = capture.config_view();

    // Assert
    assert_eq!(outcome.updated.len(), 2);
    assert_eq!(view.ring_size, 5);
    assert_eq!(view.idle_alert_secs, 30.0);
    assert_eq!(capture.hub().ring_size(), 5);
    assert_eq!(
        capture.metrics().snapshot().config.get("ring_size").map(String::as_str),
        Some("5")
    );
    capture.idle().stop();
}

#[tokio::test]
async fn soft_rotate_waits_for_a_line_and_hard_rotate_does_not() {
    // Arrange
    let dir = TempDir::new().unwrap();
    let capture = capture_in(dir.path());
    capture.writer().write(&"one\n".into()).unwrap();

    // Act
    let soft = capture.rotate(true).unwrap();

    // Assert
    assert!(matches!(soft, RotateResult::Scheduled { current_file: Some(_) }));
    assert!(rotated_files(dir.path()).is_empty());

    capture.writer().write(&"two\n".into()).unwrap();
    assert_eq!(rotated_files(dir.path()).len(), 1);

    capture.writer().write(&"three\n".into()).unwrap();
    let hard = capture.rotate(false).unwrap();
    assert!(matches!(hard, RotateResult::Rotated(_)));
    assert_eq!(rotated_files(dir.path()).len(), 2);
}

#[tokio::test]
async fn view_reports_the_live_file_and_source() {
    // Arrange
    let dir = TempDir::new().unwrap();
    let capture = capture_in(dir.path());
    capture.writer().write(&"hello\n".into()).unwrap();

    // Act
    let view = capture.config_view();

    // Assert
    assert_eq!(view.prefix, "svc");
    assert_eq!(view.compress, "none");
    assert_eq!(view.bytes_written, 6);
    assert!(view.current_file.ends_with("svc.current.log"));
    assert_eq!(view.source, "stdin");
}

#[tokio::test(flavor = "multi_thread")]
async fn idle_marker_lands_in_the_active_file() {
    // Arrange
    let dir = TempDir::new().unwrap();
    let capture = capture_in(dir.path());
    capture.writer().write(&"last words\n".into()).unwrap();

    // Act
    capture.arm_idle(Duration::from_millis(50));
    tokio::time::sleep(Duration::from_millis(400)).await;
    capture.idle().stop();

    // Assert
    let content = fs::read_to_string(dir.path().join("svc.current.log")).unwrap();
    assert_eq!(content, "last words\n[IDLE for 0s]\n");
    assert_eq!(capture.metrics().snapshot().idle_alerts_total, 1);
}
