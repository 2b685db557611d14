//! Startup behaviour of the gateway binary.

use std::process::{Command, Output};

const GATEWAY: &str = env!("CARGO_BIN_EXE_vk_gateway");

fn run(args: &[&str], env: &[(&str, &str)]) -> Output {
    Command::new(GATEWAY)
        .args(args)
        .env_clear()
        .envs(env.iter().copied())
        .output()
        .unwrap()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn test_help_lists_environment() {
    let output = run(&["--help"], &[]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("PAM_BACKEND"));
    assert!(stdout.contains("PAM_API_KEY"));
}

#[test]
fn test_missing_pam_url_fails() {
    let output = run(&[], &[("PAM_API_KEY", "secret")]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("PAM_URL"));
}

#[test]
fn test_unknown_backend_fails() {
    let output = run(
        &["--backend", "nope"],
        &[("PAM_URL", "http://127.0.0.1:9"), ("PAM_API_KEY", "secret")],
    );
    assert!(!output.status.success());
    assert!(stderr(&output).contains("no PAM backend registered under 'nope'"));
}

#[test]
fn test_plugin_backend_requires_path() {
    let output = run(
        &[],
        &[
            ("PAM_BACKEND", "plugin"),
            ("PAM_URL", "http://127.0.0.1:9"),
            ("PAM_API_KEY", "secret"),
        ],
    );
    assert!(!output.status.success());
    assert!(stderr(&output).contains("PLUGIN_PATH"));
}

#[test]
fn test_invalid_call_timeout_fails() {
    let output = run(
        &[],
        &[
            ("PAM_URL", "http://127.0.0.1:9"),
            ("PAM_API_KEY", "secret"),
            ("PAM_CALL_TIMEOUT_MS", "soon"),
        ],
    );
    assert!(!output.status.success());
    assert!(stderr(&output).contains("PAM_CALL_TIMEOUT_MS"));
}
