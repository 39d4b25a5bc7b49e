//! End-to-end checkpoint and restore through the snapctx binary
//!
//! Each test runs the binary in fresh processes, so saving and restoring
//! really happen in different address spaces.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::time::{Duration, Instant};

fn snapctx(args: &[&str], stdin: &str) -> Output {
    let mut child = Command::new(env!("CARGO_BIN_EXE_snapctx"))
        .args(args)
        .env_remove("RUST_LOG")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to spawn snapctx");

    // usage errors exit before reading input
    let _ = child.stdin.take().unwrap().write_all(stdin.as_bytes());
    child.wait_with_output().unwrap()
}

fn stdout_lines(out: &Output) -> Vec<String> {
    String::from_utf8_lossy(&out.stdout)
        .lines()
        .map(str::to_owned)
        .collect()
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap()
}

fn counter_lines(out: &Output) -> Vec<String> {
    stdout_lines(out)
        .into_iter()
        .filter(|l| l.starts_with("Counter: "))
        .collect()
}

fn save_counter(file: &Path) -> Output {
    snapctx(&["3", path_str(file), "--interval-ms", "0", "--until", "6"], "")
}

#[test]
fn test_counter_saves_at_target_and_exits() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("counter.img");

    let out = save_counter(&file);
    assert_eq!(out.status.code(), Some(0), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(counter_lines(&out), ["Counter: 0", "Counter: 1", "Counter: 2"]);
    assert!(stdout_lines(&out).iter().any(|l| l.starts_with("State saved.")));
    assert!(file.exists());
}

#[test]
fn test_restore_continues_where_the_counter_stopped() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("counter.img");
    assert_eq!(save_counter(&file).status.code(), Some(0));
    let image = fs::read(&file).unwrap();

    let out = snapctx(&["-r", path_str(&file)], "");
    assert_eq!(out.status.code(), Some(0), "stderr: {}", String::from_utf8_lossy(&out.stderr));

    let lines = stdout_lines(&out);
    assert_eq!(lines[0], "State restored successfully!");
    assert_eq!(lines[1], "History: [0, 1, 2]");
    assert_eq!(counter_lines(&out), ["Counter: 3", "Counter: 4", "Counter: 5"]);

    // the restored run must not write the snapshot again
    assert_eq!(fs::read(&file).unwrap(), image);
}

#[test]
fn test_restored_counter_resumes_without_waiting() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("counter.img");

    let out = snapctx(&["3", path_str(&file), "--interval-ms", "1500", "--until", "4"], "");
    assert_eq!(out.status.code(), Some(0), "stderr: {}", String::from_utf8_lossy(&out.stderr));

    let started = Instant::now();
    let out = snapctx(&["-r", path_str(&file)], "");
    let elapsed = started.elapsed();

    assert_eq!(out.status.code(), Some(0), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(counter_lines(&out), ["Counter: 3"]);
    assert!(elapsed < Duration::from_millis(1500), "restore took {:?}", elapsed);
}

#[test]
fn test_restore_rejects_truncated_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("counter.img");
    assert_eq!(save_counter(&file).status.code(), Some(0));

    let len = fs::metadata(&file).unwrap().len();
    fs::OpenOptions::new()
        .write(true)
        .open(&file)
        .unwrap()
        .set_len(len - 1)
        .unwrap();

    let out = snapctx(&["-r", path_str(&file)], "");
    assert_eq!(out.status.code(), Some(1));
    assert!(counter_lines(&out).is_empty());
}

#[test]
fn test_restore_rejects_different_base() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("counter.img");
    assert_eq!(save_counter(&file).status.code(), Some(0));

    let out = snapctx(&["-r", path_str(&file), "--base", "0x50000000"], "");
    assert_eq!(out.status.code(), Some(1));
    assert!(counter_lines(&out).is_empty());
}

#[test]
fn test_restore_missing_snapshot_fails() {
    let dir = tempfile::tempdir().unwrap();
    let out = snapctx(&["-r", path_str(&dir.path().join("absent.img"))], "");
    assert_eq!(out.status.code(), Some(1));
}

#[test]
fn test_task_failure_exits_with_one() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("counter.img");

    // a 16K heap cannot hold the history up to the target
    let out = snapctx(
        &["100000", path_str(&file), "--heap-size", "16K", "--interval-ms", "0"],
        "",
    );
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("Managed task failed"));
    assert!(!file.exists());
}

#[test]
fn test_oversized_region_exits_with_one() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("counter.img");

    for flag in ["--heap-size", "--stack-size"] {
        let out = snapctx(&["3", path_str(&file), flag, "0xfffffffffffff000"], "");
        assert_eq!(out.status.code(), Some(1), "{} overflow", flag);
    }
    assert!(!file.exists());
}

#[test]
fn test_usage_errors_exit_with_one() {
    assert_eq!(snapctx(&[], "").status.code(), Some(1));
    assert_eq!(snapctx(&["3"], "").status.code(), Some(1));
    assert_eq!(snapctx(&["0", "x.img"], "").status.code(), Some(1));
    assert_eq!(snapctx(&["3", "x.img", "-r", "y.img"], "").status.code(), Some(1));
    assert_eq!(snapctx(&["--help"], "").status.code(), Some(0));
}

#[test]
fn test_interactive_state_survives_restore() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("repl.img");

    let out = snapctx(
        &["-i", path_str(&file)],
        "set greeting hello world\nset n 42\n:save\n",
    );
    assert_eq!(out.status.code(), Some(0), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(stdout_lines(&out), ["ok", "ok", "State saved."]);

    let out = snapctx(&["-r", path_str(&file)], "get greeting\nlist\n");
    assert_eq!(out.status.code(), Some(0), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(
        stdout_lines(&out),
        ["State restored.", "hello world", "greeting = hello world", "n = 42"]
    );
}

#[test]
fn test_interactive_restore_rolls_back_in_session() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("repl.img");

    let out = snapctx(
        &["-i", path_str(&file)],
        "set a 1\n:save\nset a 2\nget a\n:restore\nget a\n",
    );
    assert_eq!(out.status.code(), Some(0), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(
        stdout_lines(&out),
        ["ok", "State saved.", "ok", "2", "State restored.", "1"]
    );
}

#[test]
fn test_interactive_reports_guest_errors() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("repl.img");

    let out = snapctx(&["-i", path_str(&file)], "get nothing\nbogus\n");
    assert_eq!(out.status.code(), Some(0));
    let lines = stdout_lines(&out);
    assert_eq!(lines.len(), 2);
    assert!(lines.iter().all(|l| l.starts_with("error: ")));
    assert!(!file.exists());
}
