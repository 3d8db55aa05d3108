#![cfg(all(unix, feature = "cli"))]

use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;

use protopipe::{PipeConfig, PipeEndpoint};

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/ppcli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn pipe_in(dir: &std::path::Path, file: &str) -> String {
    dir.join(file)
        .to_str()
        .expect("temp path should be utf-8")
        .to_string()
}

#[test]
fn send_delivers_joined_words_to_recv() {
    let dir = unique_temp_dir("recv");
    let pipe = pipe_in(&dir, "ctl");

    let mut receiver = Command::new(env!("CARGO_BIN_EXE_protopipe"))
        .args(["--log-level", "error", "--format", "raw", "recv", &pipe, "--count", "1"])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("recv command should start");

    let status = Command::new(env!("CARGO_BIN_EXE_protopipe"))
        .args(["--log-level", "error", "--format", "raw", "send", &pipe])
        .args(["hello", "pipe", "world", "--timeout", "5s"])
        .status()
        .expect("send should run");
    assert!(status.success());

    let mut stdout = String::new();
    receiver
        .stdout
        .take()
        .expect("stdout should be piped")
        .read_to_string(&mut stdout)
        .expect("recv output should be readable");
    let recv_status = receiver.wait().expect("recv should exit");

    assert!(recv_status.success());
    assert_eq!(stdout, "hello pipe world");
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn send_without_listener_fails() {
    let dir = unique_temp_dir("nolistener");
    let output = Command::new(env!("CARGO_BIN_EXE_protopipe"))
        .args(["send", &pipe_in(&dir, "missing"), "hello"])
        .output()
        .expect("send should run");

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("connect failed"));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn send_timeout_returns_124() {
    let dir = unique_temp_dir("timeout");
    let output = Command::new(env!("CARGO_BIN_EXE_protopipe"))
        .args(["send", &pipe_in(&dir, "missing"), "hello", "--timeout", "300ms"])
        .output()
        .expect("send should run");

    assert_eq!(output.status.code(), Some(124));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn echo_returns_what_it_receives() {
    let dir = unique_temp_dir("echo");
    let pipe = pipe_in(&dir, "echo");

    let mut child = Command::new(env!("CARGO_BIN_EXE_protopipe"))
        .args(["--log-level", "error", "echo", &pipe])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("echo command should start");

    let client = PipeEndpoint::create_with_config(
        PipeConfig::default().with_connect_timeout(Duration::from_secs(5)),
    )
    .expect("endpoint should allocate");
    client.connect(&pipe).expect("client should reach echo server");
    client.write(b"ping").expect("write should succeed");

    let mut buf = [0u8; 4];
    let mut filled = 0;
    while filled < buf.len() {
        let n = client.read(&mut buf[filled..]).expect("read should succeed");
        assert!(n > 0, "echo server closed early");
        filled += n;
    }
    assert_eq!(&buf, b"ping");
    client.close();

    let _ = child.kill();
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn doctor_passes_on_clean_env() {
    let output = Command::new(env!("CARGO_BIN_EXE_protopipe"))
        .args(["--format", "json", "doctor"])
        .output()
        .expect("doctor should run");

    assert!(output.status.success());
    let report: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("doctor should emit json");
    assert_eq!(report["overall"], "pass");
}

#[test]
fn version_reports_package_version() {
    let output = Command::new(env!("CARGO_BIN_EXE_protopipe"))
        .arg("version")
        .output()
        .expect("version should run");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(
        stdout.trim(),
        format!("protopipe {}", env!("CARGO_PKG_VERSION"))
    );
}
