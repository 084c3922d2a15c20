use crate::hub::StreamHub;
use crate::line::LogLine;
use crate::metrics::Metrics;
use crate::writer::{
    CompressMode, PolicyDelta, PolicyField, RotatingWriter, RotationPolicy, WriterError,
    is_rotated_name,
};
use flate2::read::MultiGzDecoder;
use pretty_assertions::assert_eq;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const PREFIX: &str = "cap";

struct Harness {
    writer: RotatingWriter,
    metrics: Arc<Metrics>,
    hub: Arc<StreamHub>,
}

fn harness(dir: &Path, tweak: impl FnOnce(&mut RotationPolicy)) -> Harness {
    let mut policy = RotationPolicy {
        out_dir: dir.to_path_buf(),
        prefix: PREFIX.to_string(),
        retain: 1000,
        ..RotationPolicy::default()
    };
    tweak(&mut policy);

    let metrics = Arc::new(Metrics::new());
    let hub = Arc::new(StreamHub::new(25));
    let writer = RotatingWriter::with_echo_sink(
        policy,
        metrics.clone(),
        hub.clone(),
        Box::new(io::sink()),
    );
    Harness {
        writer,
        metrics,
        hub,
    }
}

/// `len` bytes, newline included.
fn line_of(len: usize, fill: char) -> LogLine {
    let mut s: String = std::iter::repeat_n(fill, len - 1).collect();
    s.push('\n');
    LogLine::from(s)
}

fn rotated_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| is_rotated_name(p.file_name().unwrap().to_str().unwrap(), PREFIX))
        .collect();
    files.sort();
    files
}

fn read_any(path: &Path) -> Vec<u8> {
    let raw = fs::read(path).unwrap();
    if path.extension().is_some_and(|e| e == "gz") {
        let mut out = Vec::new();
        MultiGzDecoder::new(raw.as_slice())
            .read_to_end(&mut out)
            .unwrap();
        out
    } else {
        raw
    }
}

#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn size_trigger_rotates_after_the_line_that_crosses_it() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path(), |p| p.max_bytes = 100);

    let rotated_at: Vec<bool> = (0..5)
        .map(|_| {
            h.writer
                .write(&line_of(30, 'a'))
                .unwrap()
                .rotation
                .is_some()
        })
        .collect();
    assert_eq!(rotated_at, vec![false, false, false, true, false]);

    let rotated = rotated_files(dir.path());
    assert_eq!(rotated.len(), 1);
    assert_eq!(fs::metadata(&rotated[0]).unwrap().len(), 120);
    assert_eq!(h.writer.bytes_written(), 30);

    let snap = h.metrics.snapshot();
    assert_eq!(snap.files_rotated_total, 1);
    assert_eq!(snap.lines_total, 5);
    assert_eq!(snap.bytes_total, 150);
    assert_eq!(snap.current_file_bytes, 30);
}

#[test]
fn rotated_and_active_files_concatenate_to_the_input() {
    for mode in [CompressMode::None, CompressMode::Inline, CompressMode::After] {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path(), |p| {
            p.max_bytes = 64;
            p.compress = mode;
        });

        let mut expected = Vec::new();
        for i in 0..50 {
            let line = LogLine::from(format!("{mode} line number {i}\n"));
            expected.extend_from_slice(line.as_bytes());
            h.writer.write(&line).unwrap();
        }
        h.writer.close();
        assert!(h.writer.join_finalizers(Duration::from_secs(10)));

        let files = rotated_files(dir.path());
        assert!(files.len() > 1, "{mode}: expected several files");
        if mode != CompressMode::None {
            assert!(
                files.iter().all(|f| f.extension().is_some_and(|e| e == "gz")),
                "{mode}: {files:?}"
            );
        }

        let actual: Vec<u8> = files.iter().flat_map(|f| read_any(f)).collect();
        assert_eq!(
            String::from_utf8(actual).unwrap(),
            String::from_utf8(expected).unwrap(),
            "{mode}"
        );
    }
}

#[test]
fn inline_active_file_is_decodable_before_close() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path(), |p| p.compress = CompressMode::Inline);

    h.writer.write(&LogLine::from("first\n")).unwrap();
    h.writer.write(&LogLine::from("second\n")).unwrap();

    let current = h.writer.current_path().unwrap();
    assert!(current.ends_with("cap.current.log.gz"));

    // Sync-flushed but unfinished, so there is no trailer yet.
    let raw = fs::read(&current).unwrap();
    let mut decoder = flate2::write::GzDecoder::new(Vec::new());
    decoder.write_all(&raw).unwrap();
    decoder.flush().unwrap();
    assert_eq!(String::from_utf8_lossy(decoder.get_ref()), "first\nsecond\n");
}

#[test]
fn retention_keeps_only_the_newest_files() {
    for mode in [CompressMode::None, CompressMode::Inline, CompressMode::After] {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path(), |p| {
            p.max_bytes = 1;
            p.retain = 2;
            p.compress = mode;
        });

        // Act
        for i in 0..5 {
            h.writer.write(&LogLine::from(format!("{i}\n"))).unwrap();
        }
        h.writer.close();
        assert!(h.writer.join_finalizers(Duration::from_secs(10)));

        // Assert
        let survivors: Vec<String> = rotated_files(dir.path())
            .iter()
            .map(|f| String::from_utf8(read_any(f)).unwrap())
            .collect();
        assert_eq!(survivors, vec!["3\n".to_string(), "4\n".to_string()], "{mode}");
    }
}

#[test]
fn background_compression_keeps_the_newest_rotations() {
    for round in 0..10 {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path(), |p| {
            p.max_bytes = 1;
            p.retain = 3;
            p.compress = CompressMode::After;
        });

        // Act
        for i in 0..40 {
            h.writer.write(&LogLine::from(format!("{i:04}\n"))).unwrap();
        }
        h.writer.close();
        assert!(h.writer.join_finalizers(Duration::from_secs(10)));

        // Assert
        let files = rotated_files(dir.path());
        assert!(
            files.iter().all(|f| f.extension().is_some_and(|e| e == "gz")),
            "round {round}: {files:?}"
        );
        let survivors: Vec<String> = files
            .iter()
            .map(|f| String::from_utf8(read_any(f)).unwrap())
            .collect();
        assert_eq!(survivors, vec!["0037\n", "0038\n", "0039\n"], "round {round}");

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .filter(|n| n.to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty(), "round {round}: {leftovers:?}");
    }
}

#[test]
fn retention_follows_the_prefix_a_file_was_written_with() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path(), |p| {
        p.max_bytes = 1;
        p.retain = 1;
    });
    h.writer.write(&LogLine::from("a\n")).unwrap();
    assert_eq!(rotated_files(dir.path()).len(), 1);

    let delta = PolicyDelta {
        prefix: Some("renamed".to_string()),
        ..PolicyDelta::default()
    };
    h.writer.apply_policy(&delta);

    // Act
    let outcome = h.writer.write(&LogLine::from("b\n")).unwrap();

    // Assert
    assert!(outcome.rotation.unwrap().current_file.ends_with("renamed.current.log"));
    let survivors: Vec<Vec<u8>> = rotated_files(dir.path()).iter().map(|f| read_any(f)).collect();
    assert_eq!(survivors, vec![b"b\n".to_vec()]);
}

#[test]
fn soft_request_rotates_after_the_next_line() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path(), |_| {});

    h.writer.write(&LogLine::from("before\n")).unwrap();
    h.writer.request_rotation();
    h.writer.request_rotation();
    assert!(h.writer.rotation_pending());

    let outcome = h.writer.write(&LogLine::from("trigger\n")).unwrap();
    let report = outcome.rotation.expect("soft request honored");
    assert!(!h.writer.rotation_pending());

    let previous = report.previous_file.unwrap();
    assert_eq!(read_any(&previous), b"before\ntrigger\n");
    assert_eq!(h.writer.bytes_written(), 0);

    // Two requests coalesced into one rotation.
    let next = h.writer.write(&LogLine::from("after\n")).unwrap();
    assert!(next.rotation.is_none());
    assert_eq!(h.metrics.snapshot().files_rotated_total, 1);
}

#[test]
fn hard_rotation_happens_before_the_next_line() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path(), |_| {});

    h.writer.write(&LogLine::from("one\n")).unwrap();
    h.writer.request_rotation();
    let report = h.writer.rotate().unwrap();
    assert!(!h.writer.rotation_pending());

    assert_eq!(read_any(&report.previous_file.unwrap()), b"one\n");
    assert!(report.current_file.ends_with("cap.current.log"));

    h.writer.write(&LogLine::from("two\n")).unwrap();
    assert_eq!(fs::read(&report.current_file).unwrap(), b"two\n");
}

#[test]
fn interval_trigger_is_measured_from_open() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path(), |p| p.interval = Duration::from_millis(50));

    assert!(h.writer.write(&LogLine::from("a\n")).unwrap().rotation.is_none());
    std::thread::sleep(Duration::from_millis(80));
    assert!(h.writer.write(&LogLine::from("b\n")).unwrap().rotation.is_some());
}

#[test]
fn file_affecting_policy_change_waits_for_a_line_boundary() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path(), |_| {});
    h.writer.write(&LogLine::from("old\n")).unwrap();

    let delta = PolicyDelta {
        prefix: Some("fresh".to_string()),
        retain: Some(1000),
        ..PolicyDelta::default()
    };
    assert_eq!(h.writer.apply_policy(&delta), vec![PolicyField::Prefix]);
    assert!(h.writer.rotation_pending());
    assert!(h.writer.current_path().unwrap().ends_with("cap.current.log"));

    let outcome = h.writer.write(&LogLine::from("still old\n")).unwrap();
    let report = outcome.rotation.unwrap();
    assert_eq!(read_any(&report.previous_file.unwrap()), b"old\nstill old\n");
    assert!(report.current_file.ends_with("fresh.current.log"));
    assert_eq!(h.writer.policy().prefix, "fresh");

    // Re-applying the same values changes nothing.
    assert!(h.writer.apply_policy(&delta).is_empty());
    assert!(!h.writer.rotation_pending());
}

#[test]
fn non_file_policy_change_applies_without_rotation() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path(), |_| {});

    let changed = h.writer.apply_policy(&PolicyDelta {
        max_bytes: Some(10),
        echo: Some(false),
        ..PolicyDelta::default()
    });
    assert_eq!(changed, vec![PolicyField::MaxBytes]);
    assert!(!h.writer.rotation_pending());
    assert_eq!(
        h.metrics.snapshot().config.get("max_bytes").map(String::as_str),
        Some("10")
    );
}

#[test]
fn closed_writer_rejects_writes_and_does_not_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path(), |_| {});

    h.writer.write(&LogLine::from("last\n")).unwrap();
    let finalized = h.writer.close().unwrap();
    assert_eq!(read_any(&finalized), b"last\n");

    assert!(matches!(
        h.writer.write(&LogLine::from("late\n")),
        Err(WriterError::Closed)
    ));
    assert!(matches!(h.writer.rotate(), Err(WriterError::Closed)));
    assert!(!dir.path().join("cap.current.log").exists());
    assert!(h.writer.close().is_none());
}

#[test]
fn closing_an_untouched_file_removes_it() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path(), |_| {});

    let current = h.writer.open().unwrap();
    assert!(current.exists());
    assert!(h.writer.close().is_none());

    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    assert!(h.metrics.snapshot().current_file_path.is_empty());
}

#[test]
fn rotated_names_stay_unique_within_one_second() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path(), |p| p.max_bytes = 1);

    for i in 0..20 {
        h.writer.write(&LogLine::from(format!("{i}\n"))).unwrap();
    }
    assert_eq!(rotated_files(dir.path()).len(), 20);
}

#[test]
fn timestamp_prefix_reaches_file_echo_and_hub() {
    let dir = tempfile::tempdir().unwrap();
    let echo = SharedBuf::default();
    let metrics = Arc::new(Metrics::new());
    let hub = Arc::new(StreamHub::new(25));
    let writer = RotatingWriter::with_echo_sink(
        RotationPolicy {
            out_dir: dir.path().to_path_buf(),
            prefix: PREFIX.to_string(),
            echo: true,
            timestamp: true,
            ..RotationPolicy::default()
        },
        metrics,
        hub.clone(),
        Box::new(echo.clone()),
    );

    let outcome = writer.write(&LogLine::from("hello\n")).unwrap();

    let on_disk = fs::read(writer.current_path().unwrap()).unwrap();
    assert_eq!(outcome.bytes, on_disk.len());
    let text = String::from_utf8(on_disk.clone()).unwrap();
    assert!(text.ends_with(" hello\n"), "{text}");
    assert!(text[..4].bytes().all(|b| b.is_ascii_digit()), "{text}");

    assert_eq!(*echo.0.lock().unwrap(), on_disk);
    assert_eq!(hub.snapshot(), vec![LogLine::from(on_disk)]);
}

#[test]
fn write_failures_are_counted_and_cleared_on_recovery() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    fs::write(&blocker, b"").unwrap();

    let h = harness(&blocker.join("sub"), |_| {});
    assert!(matches!(
        h.writer.write(&LogLine::from("lost\n")),
        Err(WriterError::Open { .. })
    ));
    let snap = h.metrics.snapshot();
    assert_eq!(snap.write_errors_total, 1);
    assert!(snap.writer_failing);

    h.writer.apply_policy(&PolicyDelta {
        out_dir: Some(dir.path().join("good")),
        ..PolicyDelta::default()
    });
    h.writer.write(&LogLine::from("kept\n")).unwrap();

    let snap = h.metrics.snapshot();
    assert_eq!(snap.write_errors_total, 1);
    assert!(!snap.writer_failing);
    assert_eq!(snap.lines_total, 1);
}

#[test]
fn published_lines_reach_subscribers() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path(), |_| {});
    let (mut sub, backlog) = h.hub.subscribe();
    assert!(backlog.is_empty());

    h.writer.write(&LogLine::from("x\n")).unwrap();
    assert_eq!(sub.try_recv(), Some(LogLine::from("x\n")));
}
