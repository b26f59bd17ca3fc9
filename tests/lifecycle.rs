//! Black-box integration tests that drive the compiled `sysimaged` binary
//! against a throwaway images root, the way an init system would.
//!
//! Golden-install scenarios (cold boot, reinstall) are covered by the
//! component-level tests in `src/golden.rs` and `src/selector.rs`, since
//! exercising them here would require `--read-only=false`, which makes the
//! outer loop bind-mount real overlay paths -- not something a test process
//! should do. These tests stick to `--read-only --once`, which skips the
//! mount/daemonize prelude and `check_and_install`, and exercises the
//! Supervisor Runner against a pre-seeded `current/` directly.

use std::fs;
use std::path::Path;
use std::process::Command;

fn sysimaged() -> Command {
    Command::new(env!("CARGO_BIN_EXE_sysimaged"))
}

fn seed_current(images_root: &Path, status: &str, supervisor_body: &str) {
    let current = images_root.join("current");
    fs::create_dir_all(current.join("bin")).unwrap();
    fs::write(current.join("index"), "0").unwrap();
    fs::write(current.join("status"), status).unwrap();
    let bin = current.join("bin/supervisor");
    fs::write(&bin, format!("#!/bin/sh\n{supervisor_body}\n")).unwrap();
    let mut perms = fs::metadata(&bin).unwrap().permissions();
    std::os::unix::fs::PermissionsExt::set_mode(&mut perms, 0o755);
    fs::set_permissions(&bin, perms).unwrap();
}

fn run_once(images_root: &Path) -> std::process::ExitStatus {
    sysimaged()
        .arg("--read-only")
        .arg("--once")
        .arg("--images-root")
        .arg(images_root)
        .status()
        .expect("spawning sysimaged")
}

/// Scenario 2 (spec: reboot with healthy good system): a `good` current
/// image whose Supervisor exits 0 makes the bootstrapper exit success, and
/// leaves status untouched (no try charge on `good`).
#[test]
fn healthy_good_system_exits_cleanly_without_charging_a_try() {
    let td = tempfile::tempdir().unwrap();
    let images_root = td.path().join("systems");
    seed_current(&images_root, "good", "exit 0");

    let status = run_once(&images_root);
    assert!(status.success());
    assert_eq!(
        fs::read_to_string(images_root.join("current/status")).unwrap(),
        "good"
    );
}

/// Scenario 5 (spec: restart request does not consume a try): a Supervisor
/// exiting with the restart-cookie code (3) leaves `tried n` unchanged and
/// the bootstrapper returns success in `--once` mode (one iteration run).
#[test]
fn restart_cookie_preserves_try_count() {
    let td = tempfile::tempdir().unwrap();
    let images_root = td.path().join("systems");
    seed_current(&images_root, "tried 2", "exit 3");

    let status = run_once(&images_root);
    assert!(status.success());
    assert_eq!(
        fs::read_to_string(images_root.join("current/status")).unwrap(),
        "tried 2"
    );
}

/// A plain restart exit code (2) does charge a try.
#[test]
fn restart_exit_code_charges_a_try() {
    let td = tempfile::tempdir().unwrap();
    let images_root = td.path().join("systems");
    seed_current(&images_root, "tried 1", "exit 2");

    let status = run_once(&images_root);
    assert!(status.success());
    assert_eq!(
        fs::read_to_string(images_root.join("current/status")).unwrap(),
        "tried 2"
    );
}

/// A `bad` current image is a fatal invariant violation (spec §3.4):
/// the bootstrapper must refuse to launch it.
#[test]
fn bad_current_image_is_refused() {
    let td = tempfile::tempdir().unwrap();
    let images_root = td.path().join("systems");
    seed_current(&images_root, "bad", "exit 0");

    let status = run_once(&images_root);
    assert!(!status.success());
}
