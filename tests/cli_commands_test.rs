//! Tests for CLI subcommands that run without hardware.

use std::path::Path;
use std::process::{Command, Output};

fn barlight(config_dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_barlight"))
        .args(args)
        .env("BARLIGHT_CONFIG_DIR", config_dir)
        .env_remove("BARLIGHT_DRIVER")
        .env_remove("BARLIGHT_WIDTH")
        .env_remove("BARLIGHT_HEIGHT")
        .env_remove("BARLIGHT_FRAMERATE")
        .env("RUST_LOG", "warn")
        .output()
        .expect("Failed to execute barlight")
}

#[test]
fn test_check_config_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let output = barlight(dir.path(), &["check-config"]);

    assert!(output.status.success(), "{output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Configuration OK"), "stdout: {stdout}");
    assert!(stdout.contains("\"datagram\""), "stdout: {stdout}");
}

#[test]
fn test_check_config_reads_config_dir() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("config.json"),
        r#"{ "framerate": 12, "driver": { "kind": "socket", "ip": "10.0.0.2", "port": 81 } }"#,
    )
    .unwrap();

    let output = barlight(dir.path(), &["check-config"]);
    assert!(output.status.success(), "{output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"framerate\": 12"), "stdout: {stdout}");
    assert!(stdout.contains("\"socket\""), "stdout: {stdout}");
}

#[test]
fn test_check_config_rejects_invalid() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("config.json"), r#"{ "framerate": 0 }"#).unwrap();

    let output = barlight(dir.path(), &["check-config"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("framerate"), "stderr: {stderr}");
}

#[test]
fn test_explicit_config_must_exist() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.json");
    let output = barlight(
        dir.path(),
        &["check-config", "--config", missing.to_str().unwrap()],
    );
    assert!(!output.status.success());
}

#[test]
fn test_try_animation_reports_frames() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("glow.lua");
    std::fs::write(
        &script,
        "return function(frame, t) frame:set_pixel(0, 0, { g = 200 }) end",
    )
    .unwrap();

    let output = barlight(
        dir.path(),
        &["try-animation", script.to_str().unwrap(), "--frames", "4"],
    );
    assert!(output.status.success(), "{output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("4 frame(s), 0 black"), "stdout: {stdout}");
    assert!(stdout.contains("1 lit pixel(s)"), "stdout: {stdout}");
}

#[test]
fn test_try_animation_rejects_non_function() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("bad.lua");
    std::fs::write(&script, "return 42").unwrap();

    let output = barlight(dir.path(), &["try-animation", script.to_str().unwrap()]);
    assert!(!output.status.success());
}
