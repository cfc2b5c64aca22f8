//! Tests for incremental log reads.

use std::io::Write;

use trade_monitor::watcher::{ReadError, Watcher};

fn append(path: &std::path::Path, bytes: &[u8]) {
    let mut f = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .expect("open log for append");
    f.write_all(bytes).expect("append to log");
}

#[test]
fn reads_whole_file_from_zero() {
    let dir = tempfile::tempdir().expect("tempdir");
    let log = dir.path().join("backend.log");
    append(&log, b"line one\nline two\n");

    let window = Watcher::new(log).read_from(0).expect("read");
    assert_eq!(window.text, "line one\nline two\n");
    assert_eq!(window.start, 0);
    assert_eq!(window.end, 18);
    assert!(!window.truncated);
}

#[test]
fn no_growth_yields_empty_window() {
    let dir = tempfile::tempdir().expect("tempdir");
    let log = dir.path().join("backend.log");
    append(&log, b"hello\n");
    let watcher = Watcher::new(log);

    let first = watcher.read_from(0).expect("first read");
    let second = watcher.read_from(first.end).expect("second read");
    let third = watcher.read_from(second.end).expect("third read");

    assert!(second.is_empty());
    assert_eq!(second.end, first.end);
    assert_eq!(third, second);
}

#[test]
fn cursor_advances_by_appended_bytes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let log = dir.path().join("backend.log");
    append(&log, b"first\n");
    let watcher = Watcher::new(log.clone());
    let first = watcher.read_from(0).expect("first read");

    append(&log, b"second batch\n");
    let next = watcher.read_from(first.end).expect("next read");

    assert_eq!(next.text, "second batch\n");
    assert_eq!(next.len_bytes(), 13);
    assert_eq!(next.end, first.end + 13);
}

#[test]
fn missing_file_is_open_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let watcher = Watcher::new(dir.path().join("absent.log"));

    let err = watcher.read_from(0).expect_err("missing file");
    assert!(matches!(err, ReadError::Open { .. }));
}

#[test]
fn invalid_utf8_is_replaced() {
    let dir = tempfile::tempdir().expect("tempdir");
    let log = dir.path().join("backend.log");
    append(&log, b"ok \xff\xfe done\n");

    let window = Watcher::new(log).read_from(0).expect("read");
    assert!(window.text.contains('\u{fffd}'));
    assert!(window.text.ends_with("done\n"));
    // The cursor counts raw bytes, not decoded characters.
    assert_eq!(window.end, 11);
}

#[test]
fn shrunk_file_is_reread_from_start() {
    let dir = tempfile::tempdir().expect("tempdir");
    let log = dir.path().join("backend.log");
    append(&log, b"a long first generation of the log\n");
    let watcher = Watcher::new(log.clone());
    let first = watcher.read_from(0).expect("first read");

    std::fs::write(&log, b"rotated\n").expect("truncate log");
    let window = watcher.read_from(first.end).expect("read after rotation");

    assert!(window.truncated);
    assert_eq!(window.start, 0);
    assert_eq!(window.text, "rotated\n");
    assert_eq!(window.end, 8);
}
