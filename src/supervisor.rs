//! Supervisor Runner (spec §4.5): launches the current image's Supervisor
//! binary, waits on it, and translates its exit code into one of: continue
//! (shutdown), restart, reboot.

use std::os::unix::process::ExitStatusExt;
use std::process::{Command, Stdio};

use anyhow::{Context, Result};
use fn_error_context::context;
use log::{error, info, warn};

use crate::config::Config;
use crate::fsutil;
use crate::paths::ImagePath;
use crate::status::{self, Status};

const EXIT_SUCCESS: i32 = 0;
const EXIT_FAILURE: i32 = 1;
const EXIT_RESTART: i32 = 2;
const EXIT_RESTART_COOKIE: i32 = 3;

/// What the outer loop should do after one Supervisor run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Shutdown,
    Restart,
    Reboot,
}

/// Run the current image's Supervisor once, charging a try if applicable.
///
/// `last_exit_code` is threaded explicitly by the caller rather than kept as
/// module-level state (spec §9 Design Notes); it starts at a value that does
/// not equal `RESTART_COOKIE`, so the very first launch of a fresh image is
/// always charged a try.
pub fn launch(config: &Config, last_exit_code: i32) -> Result<(Outcome, i32)> {
    let current = ImagePath::new(config, crate::paths::ImageName::Current);
    let status = status::read_status(&current).context("reading current image status")?;

    let tries = match status {
        Status::Good => None,
        Status::Tryable(n) => Some(n),
        Status::Bad => {
            anyhow::bail!("invariant violation: current image's status is Bad");
        }
    };

    if let Some(n) = tries {
        if n == 0 || last_exit_code != EXIT_RESTART_COOKIE {
            status::write_status_tried(&current, n + 1)
                .context("charging try before launching Supervisor")?;
        }
    }

    let supervisor = current.supervisor_binary();
    info!("Launching Supervisor at {:?}", supervisor);
    let mut child = Command::new(&supervisor)
        .arg("--no-daemonize")
        .stdin(Stdio::null())
        .spawn()
        .with_context(|| format!("spawning Supervisor {supervisor:?}"))?;

    let status = child.wait().context("waiting on Supervisor")?;

    let code = status.code().unwrap_or_else(|| {
        let signal = status.signal().unwrap_or(-1);
        warn!("Supervisor was killed by signal {}", signal);
        EXIT_FAILURE
    });

    let outcome = classify_exit(config, code)?;
    Ok((outcome, code))
}

fn classify_exit(config: &Config, code: i32) -> Result<Outcome> {
    match code {
        EXIT_SUCCESS => {
            info!("Supervisor exited 0; shutting down");
            Ok(Outcome::Shutdown)
        }
        EXIT_RESTART => {
            info!("Supervisor exited {}; restarting", EXIT_RESTART);
            Ok(Outcome::Restart)
        }
        EXIT_RESTART_COOKIE => {
            info!("Supervisor requested a restart without charging a try");
            Ok(Outcome::Restart)
        }
        EXIT_FAILURE => {
            error!("Supervisor failed; rebooting host");
            reboot_host(config)?;
            Ok(Outcome::Reboot)
        }
        other => {
            error!("Supervisor exited with unexpected code {}; restarting", other);
            Ok(Outcome::Restart)
        }
    }
}

/// Flush disks, then reboot. Failure to reboot itself is fatal (spec §7).
#[context("rebooting host after Supervisor failure")]
fn reboot_host(_config: &Config) -> Result<()> {
    fsutil::sync_disks();
    nix::sys::reboot::reboot(nix::sys::reboot::RebootMode::RB_AUTOBOOT)
        .context("reboot() syscall failed")?;
    unreachable!("reboot() does not return on success");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::ImageName;
    use std::fs;

    fn test_config(root: &std::path::Path) -> Config {
        Config {
            images_root: root.to_path_buf(),
            apps_root: root.join("apps"),
            staging_root: root.join("staging"),
            golden_marker: root.join("golden_marker"),
            legacy_root: root.join("legacy"),
            read_only: false,
            once: true,
        }
    }

    fn seed_current_with_script(config: &Config, status_value: &str, script: &str) -> ImagePath {
        let current = ImagePath::new(config, ImageName::Current);
        fs::create_dir_all(current.as_path().join("bin")).unwrap();
        fs::write(current.index_file(), "0").unwrap();
        status::write_status(&current, status_value).unwrap();
        let bin = current.supervisor_binary();
        fs::write(&bin, script).unwrap();
        let mut perms = fs::metadata(&bin).unwrap().permissions();
        std::os::unix::fs::PermissionsExt::set_mode(&mut perms, 0o755);
        fs::set_permissions(&bin, perms).unwrap();
        current
    }

    #[test]
    fn exit_zero_charges_try_and_shuts_down() {
        let td = tempfile::tempdir().unwrap();
        let config = test_config(td.path());
        let current = seed_current_with_script(&config, "tried 0", "#!/bin/sh\nexit 0\n");

        let (outcome, code) = launch(&config, -1).unwrap();
        assert_eq!(outcome, Outcome::Shutdown);
        assert_eq!(code, 0);
        assert_eq!(status::read_status(&current).unwrap(), Status::Tryable(1));
    }

    #[test]
    fn restart_cookie_does_not_charge_a_try() {
        let td = tempfile::tempdir().unwrap();
        let config = test_config(td.path());
        let current = seed_current_with_script(&config, "tried 2", "#!/bin/sh\nexit 3\n");

        let (outcome, code) = launch(&config, EXIT_RESTART_COOKIE).unwrap();
        assert_eq!(outcome, Outcome::Restart);
        assert_eq!(code, EXIT_RESTART_COOKIE);
        assert_eq!(status::read_status(&current).unwrap(), Status::Tryable(2));
    }

    #[test]
    fn exit_two_restarts_and_charges_try() {
        let td = tempfile::tempdir().unwrap();
        let config = test_config(td.path());
        let current = seed_current_with_script(&config, "tried 1", "#!/bin/sh\nexit 2\n");

        let (outcome, _code) = launch(&config, -1).unwrap();
        assert_eq!(outcome, Outcome::Restart);
        assert_eq!(status::read_status(&current).unwrap(), Status::Tryable(2));
    }

    #[test]
    fn good_status_never_charges_a_try() {
        let td = tempfile::tempdir().unwrap();
        let config = test_config(td.path());
        let current = seed_current_with_script(&config, "good", "#!/bin/sh\nexit 0\n");

        launch(&config, -1).unwrap();
        assert_eq!(status::read_status(&current).unwrap(), Status::Good);
    }

    #[test]
    fn bad_current_status_is_invariant_violation() {
        let td = tempfile::tempdir().unwrap();
        let config = test_config(td.path());
        seed_current_with_script(&config, "bad", "#!/bin/sh\nexit 0\n");

        assert!(launch(&config, -1).is_err());
    }
}
