use crate::writer::{Finalizers, gzip_in_place, prune_retention};
use flate2::read::GzDecoder;
use std::fs;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

#[test]
fn gzip_replaces_the_plaintext() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app-20240101-000000-000000.log");
    fs::write(&path, b"a\nb\n").unwrap();

    let gz = gzip_in_place(&path).unwrap();
    assert!(!path.exists());
    assert_eq!(gz, dir.path().join("app-20240101-000000-000000.log.gz"));

    let mut out = String::new();
    GzDecoder::new(fs::File::open(&gz).unwrap())
        .read_to_string(&mut out)
        .unwrap();
    assert_eq!(out, "a\nb\n");
}

#[test]
fn failed_gzip_keeps_the_plaintext_and_no_partial() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("gone.log");

    assert!(gzip_in_place(&missing).is_err());
    assert!(!dir.path().join("gone.log.gz").exists());
    assert!(!dir.path().join("gone.log.gz.tmp").exists());
}

#[test]
fn gzip_leaves_no_temporary_behind() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app-20240101-000000-000000.log");
    fs::write(&path, b"x\n").unwrap();

    gzip_in_place(&path).unwrap();

    let names = file_names(dir.path());
    assert_eq!(names, vec!["app-20240101-000000-000000.log.gz"]);
}

#[test]
fn prune_orders_by_name_not_modification_time() {
    // Arrange: the oldest rotation is touched last.
    let dir = tempfile::tempdir().unwrap();
    for name in [
        "app-20240101-000002-000003.log.gz",
        "app-20240101-000001-000002.log.gz",
        "app-20240101-000000-000001.log.gz",
    ] {
        fs::write(dir.path().join(name), b"x").unwrap();
        std::thread::sleep(Duration::from_millis(20));
    }

    // Act
    let deleted = prune_retention(dir.path(), "app", 2);

    // Assert
    assert_eq!(deleted, 1);
    assert_eq!(
        file_names(dir.path()),
        vec![
            "app-20240101-000001-000002.log.gz",
            "app-20240101-000002-000003.log.gz"
        ]
    );
}

#[test]
fn plaintext_and_archive_of_one_rotation_count_once() {
    // Arrange: the newest rotation is mid-compression.
    let dir = tempfile::tempdir().unwrap();
    for name in [
        "app-20240101-000000-000001.log.gz",
        "app-20240101-000000-000002.log",
        "app-20240101-000000-000002.log.gz",
        "app-20240101-000000-000002.log.gz.tmp",
    ] {
        fs::write(dir.path().join(name), b"x").unwrap();
    }

    // Act
    let deleted = prune_retention(dir.path(), "app", 2);

    // Assert
    assert_eq!(deleted, 0);
    assert_eq!(file_names(dir.path()).len(), 4);
}

fn file_names(dir: &std::path::Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    names.sort();
    names
}

#[test]
fn prune_ignores_foreign_names() {
    let dir = tempfile::tempdir().unwrap();
    for name in [
        "app-20240101-000000-000001.log",
        "app-20240101-000001-000002.log.gz",
        "other-20240101-000000-000001.log",
        "app.current.log",
        "app-notes.log",
    ] {
        fs::write(dir.path().join(name), b"x").unwrap();
    }

    assert_eq!(prune_retention(dir.path(), "app", 0), 2);

    let mut left: Vec<String> = fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    left.sort();
    assert_eq!(
        left,
        vec!["app-notes.log", "app.current.log", "other-20240101-000000-000001.log"]
    );
}

#[test]
fn prune_on_missing_dir_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    assert_eq!(prune_retention(&dir.path().join("nope"), "app", 0), 0);
}

#[test]
fn join_is_bounded_by_the_timeout() {
    let finalizers = Arc::new(Finalizers::new());
    finalizers.spawn(|| std::thread::sleep(Duration::from_millis(300)));

    assert_eq!(finalizers.pending(), 1);
    assert!(!finalizers.join(Duration::from_millis(10)));
    assert!(finalizers.join(Duration::from_secs(5)));
    assert_eq!(finalizers.pending(), 0);
}

#[test]
fn panicking_work_still_completes() {
    let finalizers = Arc::new(Finalizers::new());
    finalizers.spawn(|| panic!("boom"));
    assert!(finalizers.join(Duration::from_secs(5)));
}
