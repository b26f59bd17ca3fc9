/*!
System-image bootstrapper and Supervisor watchdog.

Selects, promotes, and (if necessary) rolls back one of several on-disk
system images, then launches and monitors that image's Supervisor process,
restarting or rebooting as its exit code directs.
!*/

#![deny(unused_must_use)]
// The style lints are more annoying than useful
#![allow(clippy::style)]

mod cli;
mod config;
mod daemon;
mod failpoints;
mod fsutil;
mod golden;
mod installer;
mod inventory;
mod mounts;
mod paths;
mod selector;
mod status;
mod supervisor;

pub use cli::Cli;
pub use config::Config;

use anyhow::{Context, Result};
use log::info;

use installer::{FilesystemInstaller, SmackLabelProvider};
use supervisor::Outcome;

/// Run the outer `CheckAndInstall -> Launch -> (loop)` control flow
/// (spec §2, §6) until the Supervisor reports shutdown, or (with
/// `config.once`) after exactly one iteration.
pub fn run(config: Config) -> Result<()> {
    let _scenario = fail::FailScenario::setup();

    if !config.read_only {
        mounts::mount_overlays(&config).context("mounting startup overlays")?;
    }
    if !config.once {
        daemon::daemonize().context("daemonizing")?;
    }

    let installer = FilesystemInstaller::new(&config);
    let labels = SmackLabelProvider::new(&config);

    // Initialized to a value distinct from RESTART_COOKIE, so the first
    // launch of a fresh image is always charged a try (spec §4.5).
    let mut last_exit_code = -1;

    loop {
        if !config.read_only {
            selector::check_and_install(&config, &installer, &labels)?;
        }

        let (outcome, code) = supervisor::launch(&config, last_exit_code)
            .context("running Supervisor")?;
        last_exit_code = code;

        match outcome {
            Outcome::Shutdown => {
                info!("Supervisor reported success; exiting");
                return Ok(());
            }
            Outcome::Reboot => {
                // reboot_host() does not return to its caller when the
                // reboot() syscall itself succeeds; reaching this arm means
                // some test or failpoint context short-circuited it.
                return Ok(());
            }
            Outcome::Restart => {}
        }

        if config.once {
            return Ok(());
        }
    }
}
