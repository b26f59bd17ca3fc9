//! Command-line interface (spec §10.3).

use std::path::PathBuf;

use clap::Parser;
use log::LevelFilter;

use crate::config::Config;

#[derive(Debug, Parser)]
#[clap(name = "sysimaged", about = "System-image bootstrapper and Supervisor watchdog", version)]
pub struct Cli {
    /// Verbosity level (higher is more verbose).
    #[clap(short = 'v', action = clap::ArgAction::Count)]
    verbosity: u8,

    /// Root directory holding numbered system image directories.
    #[clap(long, value_parser, default_value = "/legato/systems")]
    images_root: PathBuf,

    /// Root directory holding content-addressed application payloads.
    #[clap(long, value_parser, default_value = "/legato/apps")]
    apps_root: PathBuf,

    /// Root of the published golden staging tree.
    #[clap(long, value_parser, default_value = "/mnt/legato")]
    staging_root: PathBuf,

    /// File recording the version of the last-installed golden image.
    #[clap(long, value_parser, default_value = "/legato/mntLegatoVersion")]
    golden_marker: PathBuf,

    /// Root directory holding pre-framework legacy per-app state.
    #[clap(long, value_parser, default_value = "/mnt/flash/opt/legato")]
    legacy_root: PathBuf,

    /// Run without mutating the images root; auto-detected from
    /// `<staging-root>/systems/current/read-only` when not passed explicitly.
    #[clap(long)]
    read_only: bool,

    /// Run a single check-and-install + launch cycle and return, instead of
    /// looping forever. Used by the test harness and by operators who let an
    /// external supervisor (e.g. systemd's `Restart=`) drive the loop.
    #[clap(long)]
    once: bool,
}

impl Cli {
    pub fn loglevel(&self) -> LevelFilter {
        match self.verbosity {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }

    pub fn into_config(self) -> Config {
        let read_only = self.read_only
            || self
                .staging_root
                .join("systems/current/read-only")
                .exists();
        Config {
            images_root: self.images_root,
            apps_root: self.apps_root,
            staging_root: self.staging_root,
            golden_marker: self.golden_marker,
            legacy_root: self.legacy_root,
            read_only,
            once: self.once,
        }
    }
}
