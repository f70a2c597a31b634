//! CLI Integration Tests
//!
//! Runs the built `hostjs` binary against scratch projects and checks its
//! stdout, stderr and exit status.

use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

// ============================================================================
// Test Helpers
// ============================================================================

fn hostjs(args: &[&str], working_dir: &Path) -> Output {
    Command::new(env!("CARGO_BIN_EXE_hostjs"))
        .args(args)
        .current_dir(working_dir)
        .env_remove("HOSTJS_CACHE_DIR")
        .env_remove("HOSTJS_TSC")
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to launch hostjs")
}

fn project(files: &[(&str, &str)]) -> TempDir {
    let dir = TempDir::new().unwrap();
    for (name, source) in files {
        std::fs::write(dir.path().join(name), source).unwrap();
    }
    dir
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

// ============================================================================
// run
// ============================================================================

#[test]
fn test_run_prints_json_result() {
    let dir = project(&[
        ("lib.js", "module.exports = (a, b) => a + b;"),
        ("main.js", "const add = require('./lib'); ({ sum: add(40, 2) })"),
    ]);
    let output = hostjs(&["run", "main.js"], dir.path());
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(stdout(&output), "{\"sum\":42}");
    assert!(dir.path().join(".hostjs-cache/dependencies-cache").is_dir());
}

#[test]
fn test_run_with_context_and_explicit_dirs() {
    let dir = project(&[(
        "main.mjs",
        "import ctx from 'sdk/core/context';\nexport default [ctx.get('tenant'), ctx.get('retries')];",
    )]);
    let caches = TempDir::new().unwrap();
    let elsewhere = TempDir::new().unwrap();
    let working_dir = dir.path().display().to_string();
    let caches_dir = caches.path().display().to_string();

    let output = hostjs(
        &[
            "run", "main.mjs", "-w", &working_dir, "-c", &caches_dir, "--context", "tenant=acme",
            "--context", "retries=3",
        ],
        elsewhere.path(),
    );
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(stdout(&output), "[\"acme\",3]");
    assert!(caches.path().join("host-modules").is_dir());
}

#[test]
fn test_unresolvable_specifier_fails_with_its_name() {
    let dir = project(&[("main.js", "require('definitely-not-installed')")]);
    let output = hostjs(&["run", "main.js"], dir.path());
    assert!(!output.status.success());
    assert!(stdout(&output).is_empty());
    assert!(String::from_utf8_lossy(&output.stderr).contains("definitely-not-installed"));
}

#[test]
fn test_guest_console_goes_to_stderr() {
    let dir = project(&[("main.js", "console.warn('careful'); 1")]);
    let output = hostjs(&["run", "main.js"], dir.path());
    assert!(output.status.success());
    assert_eq!(stdout(&output), "1");
    assert!(String::from_utf8_lossy(&output.stderr).contains("careful"));
}

// ============================================================================
// check and cache-key
// ============================================================================

#[test]
fn test_check_accepts_valid_and_rejects_broken_scripts() {
    let dir = project(&[("ok.js", "globalThis.x = 1;"), ("broken.js", "let = ;")]);
    assert!(hostjs(&["check", "ok.js"], dir.path()).status.success());
    assert!(!hostjs(&["check", "broken.js"], dir.path()).status.success());
}

#[test]
fn test_check_with_caches_dir_leaves_project_clean() {
    let dir = project(&[("ok.js", "globalThis.x = 1;")]);
    let caches = TempDir::new().unwrap();
    let caches_dir = caches.path().display().to_string();

    let output = hostjs(&["check", "ok.js", "-c", &caches_dir], dir.path());
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert!(!dir.path().join(".hostjs-cache").exists());
    assert!(caches.path().join("dependencies-cache").is_dir());
}

#[test]
fn test_cache_key_round_trip() {
    let dir = TempDir::new().unwrap();
    let encoded = hostjs(&["cache-key", "https://example.test/lib.js"], dir.path());
    assert!(encoded.status.success());
    assert_eq!(stdout(&encoded), "aHR0cHM6Ly9leGFtcGxlLnRlc3QvbGliLmpz");

    let decoded = hostjs(&["cache-key", "--decode", &stdout(&encoded)], dir.path());
    assert_eq!(stdout(&decoded), "https://example.test/lib.js");

    assert!(!hostjs(&["cache-key", "--decode", "!!"], dir.path()).status.success());
}

#[test]
fn test_missing_subcommand_fails() {
    let dir = TempDir::new().unwrap();
    assert!(!hostjs(&[], dir.path()).status.success());
}
