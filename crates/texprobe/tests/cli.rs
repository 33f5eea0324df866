use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

fn texprobe(config_dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_texprobe"))
        .env("TEXPROBE_CONFIG_DIR", config_dir)
        .env_remove("TEXPROBE_CONFIG")
        .env("RUST_LOG", "warn")
        .args(args)
        .output()
        .expect("failed to run texprobe")
}

#[test]
fn recording_run_exports_png() {
    let root = TempDir::new().unwrap();
    let export = root.path().join("frame.png");
    let export_arg = export.to_str().unwrap();

    let output = texprobe(
        root.path(),
        &[
            "--backend",
            "recording",
            "--source",
            "generated",
            "--size",
            "32x24",
            "--frames",
            "2",
            "--export",
            export_arg,
        ],
    );
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let bytes = fs::read(&export).unwrap();
    assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("frames drawn     : 2"));
}

#[test]
fn json_report_counts_producer_frames() {
    let root = TempDir::new().unwrap();
    let output = texprobe(
        root.path(),
        &[
            "--backend",
            "recording",
            "--size",
            "16x16",
            "--frames",
            "3",
            "--json",
        ],
    );
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["backend"], "recording");
    assert_eq!(report["source"], "producer");
    assert_eq!(report["sampler"], "external");
    assert_eq!(report["frames_drawn"], 3);
    assert_eq!(report["surfaces_created"], 1);
}

#[test]
fn config_file_is_read_from_config_dir() {
    let root = TempDir::new().unwrap();
    fs::write(
        root.path().join("texprobe.toml"),
        "version = 1\n\n[surface]\nwidth = 8\nheight = 8\n\n[renderer]\nsource = \"generated\"\nframes = 1\n",
    )
    .unwrap();

    let output = texprobe(root.path(), &["--json"]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["source"], "generated");
    assert_eq!(report["width"], 8);
    assert_eq!(report["frames_drawn"], 1);
}

#[test]
fn invalid_config_exits_non_zero() {
    let root = TempDir::new().unwrap();
    let config = root.path().join("broken.toml");
    fs::write(&config, "version = 1\n[producer]\nwidth = 642\n").unwrap();

    let output = texprobe(root.path(), &["--config", config.to_str().unwrap()]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("multiple of 4"), "stderr: {stderr}");
}

#[test]
fn config_where_uses_env_override() {
    let root = TempDir::new().unwrap();
    let output = texprobe(root.path(), &["config", "where"]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(&root.path().display().to_string()));
    assert!(stdout.contains("missing, using defaults"));
}
