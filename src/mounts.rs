//! Startup overlay mounts and dynamic-linker cache rebuild (spec §10.6).
//!
//! Mount-table inspection reads `/proc/self/mountinfo` rather than
//! `/etc/mtab`/`getmntent`: on modern Linux `/etc/mtab` is itself a symlink
//! to `/proc/self/mounts`, and mountinfo exposes the same mount-point column
//! in a stable, whitespace-delimited format.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result};
use fn_error_context::context;
use log::{info, warn};

use crate::config::Config;
use crate::fsutil::CommandRunExt;

/// Bind-mount the writable overlays this framework expects at fixed
/// locations, unless they are already mounted. Failure is fatal.
#[context("mounting startup overlays")]
pub fn mount_overlays(config: &Config) -> Result<()> {
    mount_overlay(&config.legacy_root.join("legato"), Path::new("/legato"))?;
    mount_overlay(&config.legacy_root.join("home"), Path::new("/home"))?;

    if let Err(e) = ensure_home_root(Path::new("/home")) {
        warn!("failed to create /home/root: {:#}", e);
    }
    Ok(())
}

fn mount_overlay(src: &Path, dst: &Path) -> Result<()> {
    if is_mounted(dst)? {
        info!("{:?} is already mounted", dst);
        return Ok(());
    }
    fs::create_dir_all(src).with_context(|| format!("creating mount source {src:?}"))?;
    fs::create_dir_all(dst).with_context(|| format!("creating mount point {dst:?}"))?;

    Command::new("mount")
        .arg("--bind")
        .arg(src)
        .arg(dst)
        .run()
        .with_context(|| format!("bind-mounting {src:?} onto {dst:?}"))
}

fn ensure_home_root(home: &Path) -> Result<()> {
    if home.metadata().map(|m| !m.permissions().readonly()).unwrap_or(false) {
        fs::create_dir_all(home.join("root"))?;
    }
    Ok(())
}

/// Check whether `target` already appears as a mount point, by scanning
/// `/proc/self/mountinfo`'s mount-point column (field 5, 0-indexed 4).
pub fn is_mounted(target: &Path) -> Result<bool> {
    let contents = match fs::read_to_string("/proc/self/mountinfo") {
        Ok(c) => c,
        Err(e) => {
            warn!("unable to read /proc/self/mountinfo: {}", e);
            return Ok(false);
        }
    };
    Ok(contents
        .lines()
        .filter_map(|line| line.split_whitespace().nth(4))
        .any(|mp| Path::new(mp) == target))
}

/// Regenerate the dynamic linker cache by invoking `ldconfig`. Mirrors the
/// original's destructive `ld.so.conf` overwrite (spec §9 open question):
/// the conf file is replaced wholesale rather than merged, matching the
/// original's behavior for bit-compatibility.
#[context("rebuilding ld.so cache")]
pub fn rebuild_ld_so_cache(config: &Config) -> Result<()> {
    let current = crate::paths::ImagePath::new(config, crate::paths::ImageName::Current);
    let conf_path = PathBuf::from("/etc/ld.so.conf");
    let contents = format!(
        "{}\n{}\n",
        current.as_path().join("lib").display(),
        current.as_path().join("lib64").display(),
    );
    fs::write(&conf_path, contents).with_context(|| format!("writing {conf_path:?}"))?;

    Command::new("ldconfig")
        .run()
        .context("running ldconfig")
}
