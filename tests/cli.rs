//! Binary-level checks for the CLI surface.

use assert_cmd::Command;
use predicates::prelude::*;

fn vidsmith() -> Command {
    let mut cmd = Command::cargo_bin("vidsmith").unwrap();
    // Keep test invocations away from any user-level config file.
    let config_dir = tempfile::tempdir().unwrap().into_path();
    cmd.env("XDG_CONFIG_HOME", &config_dir);
    cmd.env("HOME", &config_dir);
    cmd
}

#[test]
fn help_lists_every_stage_subcommand() {
    vidsmith()
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("run")
                .and(predicate::str::contains("download"))
                .and(predicate::str::contains("transcribe"))
                .and(predicate::str::contains("summarize"))
                .and(predicate::str::contains("blog"))
                .and(predicate::str::contains("podcast")),
        );
}

#[test]
fn run_rejects_malformed_source() {
    vidsmith()
        .args(["--quiet", "run", "not-a-url"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Rejected"));
}

#[test]
fn summarize_fails_on_missing_input() {
    vidsmith()
        .args(["--quiet", "summarize", "/definitely/not/here.txt"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn summarize_writes_bounded_summary() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("transcript.txt");
    fs_err::write(
        &input,
        "First sentence here. Second sentence follows. Third one closes it out.",
    )
    .unwrap();
    let output = dir.path().join("summary.txt");

    vidsmith()
        .args([
            "--quiet",
            "summarize",
            input.to_str().unwrap(),
            "--output",
            output.to_str().unwrap(),
            "--max-length",
            "6",
        ])
        .assert()
        .success();

    let summary = fs_err::read_to_string(&output).unwrap();
    assert!(summary.split_whitespace().count() <= 6);
    assert!(!summary.is_empty());
}

#[test]
fn blog_template_starts_with_title() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("summary.txt");
    fs_err::write(&input, "A concise summary of the video.").unwrap();
    let output = dir.path().join("post.md");

    vidsmith()
        .args([
            "--quiet",
            "blog",
            input.to_str().unwrap(),
            "--output",
            output.to_str().unwrap(),
            "--title",
            "Pipelines in Practice",
            "--video-url",
            "https://video.example/abc123",
        ])
        .assert()
        .success();

    let post = fs_err::read_to_string(&output).unwrap();
    assert!(post.starts_with("# Pipelines in Practice"));
    assert!(post.contains("https://video.example/abc123"));
}
