//! Golden Installer (spec §4.3): migrate from the published staging tree
//! into a newly numbered image, only when the staging tree is new or no
//! usable image exists.

use std::fs;

use anyhow::{Context, Result};
use fn_error_context::context;
use log::{info, warn};

use crate::config::Config;
use crate::fsutil;
use crate::installer::{AppInstaller, LabelProvider};
use crate::paths::{self, ImageName, ImagePath};
use crate::status;
use crate::try_fail_point;

const STAGING_BIN_SUBPATHS: &[&str] = &["bin", "lib", "modules"];
const STAGING_CONFIG_FILES: &[&str] = &["apps.cfg", "users.cfg", "modules.cfg"];

/// Should the golden staging tree be installed as a new image?
///
/// - No usable image exists at all (`newest_index` is `None`) -> always install.
/// - Otherwise compare the last-installed-golden marker against the staging
///   tree's own `version` file.
#[context("checking whether to install the golden system")]
pub fn should_install_golden(config: &Config, newest_index: Option<u32>) -> Result<bool> {
    if newest_index.is_none() {
        info!("No usable image is installed yet; golden install required");
        return Ok(true);
    }

    let golden_version = match fs::read_to_string(config.staging_system_dir().join("version")) {
        Ok(v) if !v.trim().is_empty() => v,
        Ok(_) | Err(_) => {
            warn!("Staging tree's version file is missing or empty; ignoring it");
            return Ok(false);
        }
    };

    let installed_version = fs::read_to_string(&config.golden_marker).unwrap_or_default();

    if installed_version.trim() != golden_version.trim() {
        info!("Staging tree has a new version; golden install required");
        Ok(true)
    } else {
        info!("Staging tree version unchanged since last install");
        Ok(false)
    }
}

/// Materialize the golden staging tree as a new, current image.
///
/// Returns the new image's index. Per spec §3.6 / §5, the only durable
/// ordering guarantee is that the golden-marker write (step 10) is last;
/// every step before it is safely re-runnable from scratch after a crash,
/// because the new index is always chosen above the old `newest_index`.
pub fn install_golden(
    config: &Config,
    newest_index: Option<u32>,
    current_index: Option<u32>,
    installer: &dyn AppInstaller,
    labels: &dyn LabelProvider,
) -> Result<u32> {
    let new_index = newest_index.map(|i| i + 1).unwrap_or(0);
    info!("Installing golden system as image {}", new_index);

    try_fail_point!("golden::before_clear_destination");
    let new_image = ImagePath::new(config, ImageName::Index(new_index));
    fsutil::remove_recursive(new_image.as_path())
        .context("clearing destination slot for golden install")?;

    try_fail_point!("golden::before_demote_current");
    if current_index.is_some() {
        let current = ImagePath::new(config, ImageName::Current);
        fsutil::try_lazy_umount(current.as_path());
        let demoted = ImagePath::new(config, ImageName::Index(current_index.unwrap()));
        fsutil::rename(current.as_path(), demoted.as_path())?;
    }

    try_fail_point!("golden::before_build_unpack");
    build_unpack_from_golden(config, new_index)?;

    try_fail_point!("golden::before_import_config");
    if let Some(newest) = newest_index {
        import_config_tree(config, ImageName::Index(newest), None)?;
    }

    try_fail_point!("golden::before_install_apps");
    install_golden_apps(config, newest_index, installer, labels)?;

    try_fail_point!("golden::before_promote");
    fsutil::rename(paths::images_unpack_dir(config), ImagePath::new(config, ImageName::Current))?;

    try_fail_point!("golden::before_prune");
    delete_all_but_current(config)?;

    request_ld_so_config(config)?;

    try_fail_point!("golden::before_sync");
    fsutil::sync_disks();

    // DO THIS LAST: marks the golden install as durably complete.
    try_fail_point!("golden::before_marker_write");
    mark_golden_install_complete(config)?;

    Ok(new_index)
}

#[context("building unpack image from golden staging")]
fn build_unpack_from_golden(config: &Config, new_index: u32) -> Result<()> {
    let unpack = paths::images_unpack_dir(config);
    fsutil::make_dir_all(&unpack)?;
    fsutil::make_dir_all(unpack.join("config"))?;
    fsutil::make_dir_all(unpack.join("apps"))?;
    fsutil::make_dir_all(unpack.join("appsWriteable"))?;

    let staging_system = config.staging_system_dir();
    for name in STAGING_BIN_SUBPATHS {
        symlink_replacing(staging_system.join(name), unpack.join(name))?;
    }
    for name in STAGING_CONFIG_FILES {
        symlink_replacing(
            staging_system.join("config").join(name),
            unpack.join("config").join(name),
        )?;
    }

    fsutil::copy_file(staging_system.join("version"), unpack.join("version"))
        .context("copying staging version file")?;
    fsutil::copy_file(
        staging_system.join("info.properties"),
        unpack.join("info.properties"),
    )
    .context("copying staging info.properties file")?;

    fs::write(unpack.join("index"), new_index.to_string())?;
    // The golden tree is authoritative by construction -- no try-count applies.
    fs::write(unpack.join("status"), "good")?;

    Ok(())
}

fn symlink_replacing(target: std::path::PathBuf, link: std::path::PathBuf) -> Result<()> {
    if link.symlink_metadata().is_ok() {
        fs::remove_file(&link)?;
    }
    std::os::unix::fs::symlink(&target, &link)
        .with_context(|| format!("symlinking {link:?} -> {target:?}"))
}

/// Copy a previous image's `config/` tree into either the unpack image
/// (`dest_image = None`) or a specific numbered image.
#[context("copying config tree from image {:?}", source_image)]
fn import_config_tree(
    config: &Config,
    source_image: ImageName,
    dest_image: Option<ImageName>,
) -> Result<()> {
    let src = ImagePath::new(config, source_image).config_dir();
    let dst = match dest_image {
        Some(name) => ImagePath::new(config, name).config_dir(),
        None => paths::images_unpack_dir(config).join("config"),
    };
    fsutil::copy_recursive(src, dst)
}

/// Install every app published under `staging/system/apps/` into both the
/// content-addressed apps root and the unpack image.
fn install_golden_apps(
    config: &Config,
    newest_index: Option<u32>,
    installer: &dyn AppInstaller,
    labels: &dyn LabelProvider,
) -> Result<()> {
    fsutil::make_dir_all(&config.apps_root)?;

    let staging_apps_manifest = config.staging_system_dir().join("apps");
    let entries = match fs::read_dir(&staging_apps_manifest) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(e).with_context(|| format!("reading {staging_apps_manifest:?}"));
        }
    };

    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name.starts_with('.') {
            continue;
        }
        set_up_app(config, name, newest_index, installer, labels)?;
    }
    Ok(())
}

fn set_up_app(
    config: &Config,
    app_name: &str,
    newest_index: Option<u32>,
    installer: &dyn AppInstaller,
    labels: &dyn LabelProvider,
) -> Result<()> {
    let manifest_link = config.staging_system_dir().join("apps").join(app_name);
    let hash = installer
        .get_app_hash_from_symlink(&manifest_link)
        .with_context(|| format!("resolving hash for app '{app_name}'"))?;

    let installed_app_path = config.apps_root.join(&hash);
    let unpack_link = paths::images_unpack_dir(config).join("apps").join(app_name);
    if let Err(e) = std::os::unix::fs::symlink(&installed_app_path, &unpack_link) {
        warn!(
            "Failed to symlink {:?} -> {:?}: {}",
            unpack_link, installed_app_path, e
        );
    }

    if !installed_app_path.is_dir() {
        let staging_app_path = config.staging_apps_dir().join(&hash);
        if let Err(e) = std::os::unix::fs::symlink(&staging_app_path, &installed_app_path) {
            warn!(
                "Failed to symlink {:?} -> {:?}: {}",
                installed_app_path, staging_app_path, e
            );
        }
    }

    match newest_index {
        Some(idx) => {
            installer.install_app_writeable_files(&hash, app_name, ImageName::Index(idx))?;
        }
        None => {
            let _label = labels.get_app_label(app_name);
            let target_dir = paths::images_unpack_dir(config)
                .join("appsWriteable")
                .join(app_name);
            installer.import_legacy_writeable_files(&target_dir, &hash, app_name)?;
        }
    }

    Ok(())
}

/// Delete every non-`current` image directory, plus the legacy-firmware
/// tree if present.
#[context("deleting all images but current")]
pub fn delete_all_but_current(config: &Config) -> Result<()> {
    if config.legacy_root.is_dir() {
        fsutil::remove_recursive(&config.legacy_root)?;
    }

    let entries = match fs::read_dir(&config.images_root) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e).with_context(|| format!("reading {:?}", config.images_root)),
    };

    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name.starts_with('.') || name == "current" {
            continue;
        }
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let path = entry.path();
        fsutil::try_lazy_umount(&path);
        fsutil::remove_recursive(&path)?;
    }
    Ok(())
}

/// Write the marker file that defers the next ldconfig cache rebuild to
/// just before the current image's Supervisor is launched (spec §4.4 step 5).
pub fn request_ld_so_config(config: &Config) -> Result<()> {
    fs::write(paths::ldconfig_marker(config), "need_ldconfig")
        .context("writing ldconfig-needed marker")
}

#[context("recording golden install as complete")]
fn mark_golden_install_complete(config: &Config) -> Result<()> {
    fsutil::copy_file(config.staging_system_dir().join("version"), &config.golden_marker)
}
