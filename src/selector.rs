//! Selector (spec §4.4): the startup decision that chooses which image
//! becomes `current` before the Supervisor is launched.
//!
//! This is the one place all four other leaf components (status store,
//! inventory, golden installer, app installer) are wired together.

use anyhow::{Context, Result};
use fn_error_context::context;
use log::{info, warn};

use crate::config::Config;
use crate::fsutil;
use crate::golden;
use crate::installer::{AppInstaller, LabelProvider};
use crate::inventory;
use crate::paths::{self, ImageName, ImagePath};
use crate::status::{self, Status};

/// Run the full startup selection procedure (spec §4.4 steps 1-5):
///
/// 1. Delete both unpack scratch directories, cleaning up after any prior
///    aborted run.
/// 2. Find the newest usable numbered image.
/// 3. Decide whether the golden staging tree needs installing, and install
///    it if so -- this produces a new newest image.
/// 4. If `current` doesn't already point at the newest usable image,
///    promote it there.
/// 5. Rebuild the ldconfig cache if a promotion (this boot or a previous
///    one) left the marker behind.
/// 6. Return the path to the now-current Supervisor binary.
#[context("selecting system to run")]
pub fn check_and_install(
    config: &Config,
    installer: &dyn AppInstaller,
    labels: &dyn LabelProvider,
) -> Result<ImagePath> {
    fsutil::remove_recursive(paths::images_unpack_dir(config))?;
    fsutil::remove_recursive(paths::apps_unpack_dir(config))?;

    let mut newest = inventory::newest_usable_index(config)?;
    let current = inventory::current_index(config);

    if golden::should_install_golden(config, newest)? {
        info!("Installing golden system");
        let new_index = golden::install_golden(config, newest, current, installer, labels)?;
        newest = Some(new_index);
        return Ok(ImagePath::new(config, ImageName::Current));
    }

    let newest = newest.context("no usable image and golden install was not required")?;

    if current != Some(newest) {
        promote(config, newest)?;
    }

    rebuild_ldconfig_cache_if_needed(config)?;

    Ok(ImagePath::new(config, ImageName::Current))
}

/// Promote numbered image `index` to `current` (spec §3.3, invariant I-2/I-3).
///
/// The old `current`, if any, is demoted back to its numbered directory and
/// then handled according to the status it had while it was current: `Bad`
/// is deleted outright, `Tryable` has its `config/` tree carried forward
/// into the new winner before being deleted, and `Good` has its `config/`
/// tree carried forward but is kept around as a rollback target.
#[context("promoting image {index} to current")]
fn promote(config: &Config, index: u32) -> Result<()> {
    info!("Promoting image {} to current", index);
    let current = ImagePath::new(config, ImageName::Current);
    let target = ImagePath::new(config, ImageName::Index(index));

    if current.as_path().exists() {
        fsutil::try_lazy_umount(current.as_path());
        let old_status = status::read_status(&current)?;

        match status::read_index(&current) {
            Some(old_index) => {
                let demoted = ImagePath::new(config, ImageName::Index(old_index));
                fsutil::rename(current.as_path(), demoted.as_path())?;

                match old_status {
                    Status::Bad => {
                        fsutil::remove_recursive(demoted.as_path())?;
                    }
                    Status::Tryable(_) => {
                        fsutil::copy_recursive(demoted.config_dir(), target.config_dir())?;
                        fsutil::remove_recursive(demoted.as_path())?;
                    }
                    Status::Good => {
                        fsutil::copy_recursive(demoted.config_dir(), target.config_dir())?;
                    }
                }
            }
            None => {
                warn!("current image {:?} has no readable index; deleting it", current.as_path());
                fsutil::remove_recursive(current.as_path())?;
            }
        }
    }

    fsutil::rename(target.as_path(), current.as_path())?;
    golden::request_ld_so_config(config)?;
    Ok(())
}

/// Rebuild the dynamic linker cache if a promotion left the marker file
/// behind, then delete the marker. Done here, right before launch, rather
/// than at promotion time, because `current`'s final mount layout (spec
/// §10.6) isn't settled until just before the Supervisor runs.
#[context("rebuilding ldconfig cache")]
fn rebuild_ldconfig_cache_if_needed(config: &Config) -> Result<()> {
    let marker = crate::paths::ldconfig_marker(config);
    if !marker.exists() {
        return Ok(());
    }
    info!("Rebuilding dynamic linker cache");
    crate::mounts::rebuild_ld_so_cache(config)?;
    std::fs::remove_file(&marker).with_context(|| format!("removing {marker:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::installer::{FilesystemInstaller, SmackLabelProvider};
    use std::fs;

    fn test_config(root: &std::path::Path) -> Config {
        Config {
            images_root: root.join("systems"),
            apps_root: root.join("apps"),
            staging_root: root.join("staging"),
            golden_marker: root.join("golden_marker"),
            legacy_root: root.join("legacy"),
            read_only: false,
            once: true,
        }
    }

    fn seed_staging(config: &Config, version: &str) {
        let sys = config.staging_system_dir();
        fs::create_dir_all(sys.join("config")).unwrap();
        fs::create_dir_all(sys.join("bin")).unwrap();
        fs::create_dir_all(sys.join("lib")).unwrap();
        fs::create_dir_all(sys.join("modules")).unwrap();
        fs::write(sys.join("config/apps.cfg"), "").unwrap();
        fs::write(sys.join("config/users.cfg"), "").unwrap();
        fs::write(sys.join("config/modules.cfg"), "").unwrap();
        fs::write(sys.join("version"), version).unwrap();
        fs::write(sys.join("info.properties"), "key=value\n").unwrap();
    }

    #[test]
    fn cold_boot_goes_straight_to_golden_install() {
        let td = tempfile::tempdir().unwrap();
        let config = test_config(td.path());
        fsutil::make_dir_all(&config.images_root).unwrap();
        seed_staging(&config, "1.0");

        let installer = FilesystemInstaller::new(&config);
        let labels = SmackLabelProvider::new(&config);
        let current = check_and_install(&config, &installer, &labels).unwrap();

        assert_eq!(status::read_index(&current), Some(0));
    }

    #[test]
    fn promotes_newest_numbered_image_when_no_golden_install_needed() {
        let td = tempfile::tempdir().unwrap();
        let config = test_config(td.path());
        fsutil::make_dir_all(&config.images_root).unwrap();
        seed_staging(&config, "1.0");

        // Already-installed golden marker makes should_install_golden false.
        fs::write(&config.golden_marker, "1.0").unwrap();

        let image = ImagePath::new(&config, ImageName::Index(0));
        fs::create_dir_all(image.as_path()).unwrap();
        fs::write(image.index_file(), "0").unwrap();
        status::write_status(&image, "good").unwrap();

        let installer = FilesystemInstaller::new(&config);
        let labels = SmackLabelProvider::new(&config);
        let current = check_and_install(&config, &installer, &labels).unwrap();

        assert_eq!(status::read_index(&current), Some(0));
        assert_eq!(status::read_status(&current).unwrap(), Status::Good);
    }

    fn seed_numbered(config: &Config, index: u32, status_value: &str) -> ImagePath {
        let image = ImagePath::new(config, ImageName::Index(index));
        fs::create_dir_all(image.as_path()).unwrap();
        fs::write(image.index_file(), index.to_string()).unwrap();
        status::write_status(&image, status_value).unwrap();
        image
    }

    #[test]
    fn promote_deletes_bad_old_current() {
        let td = tempfile::tempdir().unwrap();
        let config = test_config(td.path());
        fsutil::make_dir_all(&config.images_root).unwrap();

        let old = ImagePath::new(&config, ImageName::Current);
        fs::create_dir_all(old.config_dir()).unwrap();
        fs::write(old.index_file(), "2").unwrap();
        status::write_status(&old, "bad").unwrap();
        seed_numbered(&config, 5, "good");

        promote(&config, 5).unwrap();

        let current = ImagePath::new(&config, ImageName::Current);
        assert_eq!(status::read_index(&current), Some(5));
        assert!(!ImagePath::new(&config, ImageName::Index(2)).as_path().exists());
    }

    #[test]
    fn promote_carries_config_forward_and_deletes_tryable_old_current() {
        let td = tempfile::tempdir().unwrap();
        let config = test_config(td.path());
        fsutil::make_dir_all(&config.images_root).unwrap();

        let old = ImagePath::new(&config, ImageName::Current);
        fs::create_dir_all(old.config_dir()).unwrap();
        fs::write(old.config_dir().join("apps.cfg"), "carried").unwrap();
        fs::write(old.index_file(), "2").unwrap();
        status::write_status(&old, "tried 1").unwrap();
        seed_numbered(&config, 5, "good");

        promote(&config, 5).unwrap();

        let current = ImagePath::new(&config, ImageName::Current);
        assert_eq!(status::read_index(&current), Some(5));
        assert_eq!(
            fs::read_to_string(current.config_dir().join("apps.cfg")).unwrap(),
            "carried"
        );
        assert!(!ImagePath::new(&config, ImageName::Index(2)).as_path().exists());
    }

    #[test]
    fn promote_carries_config_forward_and_keeps_good_old_current_for_rollback() {
        let td = tempfile::tempdir().unwrap();
        let config = test_config(td.path());
        fsutil::make_dir_all(&config.images_root).unwrap();

        let old = ImagePath::new(&config, ImageName::Current);
        fs::create_dir_all(old.config_dir()).unwrap();
        fs::write(old.config_dir().join("apps.cfg"), "carried").unwrap();
        fs::write(old.index_file(), "2").unwrap();
        status::write_status(&old, "good").unwrap();
        seed_numbered(&config, 5, "good");

        promote(&config, 5).unwrap();

        let current = ImagePath::new(&config, ImageName::Current);
        assert_eq!(status::read_index(&current), Some(5));
        assert_eq!(
            fs::read_to_string(current.config_dir().join("apps.cfg")).unwrap(),
            "carried"
        );
        let demoted = ImagePath::new(&config, ImageName::Index(2));
        assert!(demoted.as_path().exists());
        assert_eq!(status::read_status(&demoted).unwrap(), Status::Good);
    }
}
