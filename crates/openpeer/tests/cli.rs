#![cfg(all(unix, feature = "cli"))]

use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/openpeer-cli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn wait_for_socket(path: &Path, timeout: Duration) {
    let start = Instant::now();
    while !path.exists() {
        if start.elapsed() >= timeout {
            panic!("server did not bind {}", path.display());
        }
        thread::sleep(Duration::from_millis(25));
    }
}

fn serve(path: &Path, extra: &[&str], stdout: Stdio) -> Child {
    let child = Command::new(env!("CARGO_BIN_EXE_openpeer"))
        .args(["--log-level", "error", "--format", "raw", "serve"])
        .arg(path)
        .args(extra)
        .stdout(stdout)
        .stderr(Stdio::null())
        .spawn()
        .expect("serve should start");
    wait_for_socket(path, Duration::from_secs(3));
    child
}

fn openpeer(args: &[&str], path: &Path, rest: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_openpeer"))
        .args(["--log-level", "error"])
        .args(args)
        .arg(path)
        .args(rest)
        .output()
        .expect("openpeer should run")
}

fn stop(mut child: Child, dir: &Path) {
    let _ = child.kill();
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn sign_prints_known_signature() {
    let output = Command::new(env!("CARGO_BIN_EXE_openpeer"))
        .args(["--format", "raw", "sign", "2024-02-26T02:33:33.140Z"])
        .output()
        .expect("sign should run");

    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "Uz6rFTPdRkHH");
}

#[test]
fn call_add_against_server() {
    let dir = unique_temp_dir("call");
    let sock = dir.join("peer.sock");
    let child = serve(&sock, &[], Stdio::null());

    let output = openpeer(&["--format", "raw", "call"], &sock, &["add", "2", "3"]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "5");

    let output = openpeer(&["--format", "json", "call"], &sock, &["concat", "a", "b"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("\"result\":\"ab\""));

    stop(child, &dir);
}

#[test]
fn call_missing_operation_exits_70() {
    let dir = unique_temp_dir("missing-op");
    let sock = dir.join("peer.sock");
    let child = serve(&sock, &[], Stdio::null());

    let output = openpeer(&["call"], &sock, &["nope"]);
    assert_eq!(output.status.code(), Some(70));
    assert!(String::from_utf8_lossy(&output.stderr).contains("not registered"));

    stop(child, &dir);
}

#[test]
fn call_missing_socket_exits_1() {
    let dir = unique_temp_dir("no-server");
    let output = openpeer(&["call"], &dir.join("absent.sock"), &["add"]);
    assert_eq!(output.status.code(), Some(1));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn push_is_printed_by_server() {
    let dir = unique_temp_dir("push");
    let sock = dir.join("peer.sock");
    let mut child = serve(&sock, &["--types", "tick"], Stdio::piped());

    let output = openpeer(&["push"], &sock, &["--json", r#"{"n":7}"#, "--type", "tick"]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let stdout = child.stdout.take().expect("stdout is piped");
    let mut line = String::new();
    BufReader::new(stdout)
        .read_line(&mut line)
        .expect("server output should be readable");
    assert_eq!(line.trim(), r#"{"n":7}"#);

    stop(child, &dir);
}

#[test]
fn push_rejects_invalid_json() {
    let dir = unique_temp_dir("push-invalid");
    let output = openpeer(&["push"], &dir.join("absent.sock"), &["--json", "{oops"]);
    assert_eq!(output.status.code(), Some(64));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn ping_reports_each_round_trip() {
    let dir = unique_temp_dir("ping");
    let sock = dir.join("peer.sock");
    let child = serve(&sock, &[], Stdio::null());

    let output = openpeer(&["--format", "raw", "ping"], &sock, &["--count", "3"]);
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).lines().count(), 3);

    stop(child, &dir);
}

#[test]
fn version_prints_package_version() {
    let output = Command::new(env!("CARGO_BIN_EXE_openpeer"))
        .args(["version", "--extended"])
        .output()
        .expect("version should run");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")));
    assert!(stdout.contains("protocol_version: v1.0"));
}
