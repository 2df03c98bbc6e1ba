//! Argument contract of the `streamwatch` probe binary.

use assert_cmd::Command;

fn probe() -> Command {
    Command::cargo_bin("streamwatch").expect("streamwatch binary")
}

#[test]
fn version_flag_succeeds() {
    let output = probe().arg("--version").output().expect("run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("streamwatch "), "{stdout}");
}

#[test]
fn stream_uri_and_desc_are_required() {
    let output = probe().output().expect("run");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--stream-uri"), "{stderr}");
}

#[test]
fn help_lists_threshold_flags() {
    let output = probe().arg("--help").output().expect("run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for flag in [
        "--pushover",
        "--audio-only",
        "--black-threshold",
        "--black-duration",
        "--freeze-threshold",
        "--freeze-duration",
        "--silence-threshold",
        "--silence-duration",
        "--frame-grab-interval",
    ] {
        assert!(stdout.contains(flag), "missing {flag}");
    }
}

#[test]
fn invalid_config_file_fails_before_monitoring() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = dir.path().join("streamwatch.toml");
    std::fs::write(&config, "[probe]\npoll_interval_ms = 0\n").expect("write config");

    let output = probe()
        .args(["--stream-uri", "udp://x", "--stream-desc", "Test", "--config"])
        .arg(&config)
        .output()
        .expect("run");
    assert!(!output.status.success());
}
