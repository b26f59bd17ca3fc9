//! Per-application installation collaborator (spec §6, §10.4).
//!
//! Hash resolution and access-control labeling *internals* are out of
//! scope for the lifecycle core (spec §1 Non-goals); what the core actually
//! depends on is the small interface below. [`FilesystemInstaller`] is a
//! concrete, runnable implementation grounded in the original program's
//! `installer_*`/`smack_*` helper functions, so the crate works end-to-end
//! rather than stopping at a trait definition.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use fn_error_context::context;
use log::warn;

use crate::config::Config;
use crate::fsutil;
use crate::paths::{ImageName, ImagePath};

/// The interface the lifecycle core calls into for application-level
/// installation work it does not itself implement.
pub trait AppInstaller {
    /// Resolve an installed application's content hash from the symlink at
    /// `path` (e.g. `<staging>/system/apps/<name>`).
    fn get_app_hash_from_symlink(&self, path: &Path) -> Result<String>;

    /// Copy `app_name`'s writeable files forward from `from_image` into the
    /// unpack area, keyed by content hash.
    fn install_app_writeable_files(
        &self,
        hash: &str,
        app_name: &str,
        from_image: ImageName,
    ) -> Result<()>;

    /// Copy `app_name`'s writeable files forward into `target_dir` (always an
    /// `appsWriteable/<app_name>` directory under the image currently being
    /// built -- the unpack area, never `current` directly, since `current`
    /// doesn't exist yet or is about to be replaced wholesale by it).
    fn update_app_writeable_files(&self, target_dir: &Path, hash: &str, app_name: &str) -> Result<()>;

    /// Best-effort import of writeable files from a pre-framework legacy
    /// install into `target_dir`, used only when there is no previous
    /// numbered image to copy from (i.e. this app has never been set up
    /// under this framework).
    fn import_legacy_writeable_files(&self, target_dir: &Path, hash: &str, app_name: &str) -> Result<()>;
}

/// SMACK (or equivalent MAC) label lookup collaborator (spec §6).
pub trait LabelProvider {
    /// Best-effort; returns an empty string when no label can be determined
    /// (e.g. SMACK is not supported on this kernel), matching the original
    /// program's graceful-degradation contract.
    fn get_app_label(&self, app_name: &str) -> String;
}

/// Reference implementation grounded in the original C helpers
/// `installer_GetAppHashFromSymlink`, `installer_InstallAppWriteableFiles`,
/// `installer_UpdateAppWriteableFiles`, and `GetAppWriteableFilesFromOptLegato`.
pub struct FilesystemInstaller<'a> {
    config: &'a Config,
}

impl<'a> FilesystemInstaller<'a> {
    pub fn new(config: &'a Config) -> Self {
        FilesystemInstaller { config }
    }

    fn writeable_dir(&self, image: ImageName, app_name: &str) -> std::path::PathBuf {
        ImagePath::new(self.config, image)
            .apps_writeable_dir()
            .join(app_name)
    }
}

impl AppInstaller for FilesystemInstaller<'_> {
    #[context("resolving app hash from symlink {:?}", path)]
    fn get_app_hash_from_symlink(&self, path: &Path) -> Result<String> {
        let target = fs::read_link(path)
            .with_context(|| format!("reading symlink target of {path:?}"))?;
        let hash = target
            .file_name()
            .with_context(|| format!("symlink target {target:?} has no final component"))?
            .to_str()
            .with_context(|| format!("symlink target {target:?} is not valid UTF-8"))?
            .to_string();
        Ok(hash)
    }

    fn install_app_writeable_files(
        &self,
        _hash: &str,
        app_name: &str,
        from_image: ImageName,
    ) -> Result<()> {
        let src = self.writeable_dir(from_image, app_name);
        let dst = crate::paths::images_unpack_dir(self.config)
            .join("appsWriteable")
            .join(app_name);
        if let Err(e) = fsutil::copy_recursive(&src, &dst) {
            warn!(
                "Failed to bring forward writeable files for app '{}' from {:?}: {:#}",
                app_name, src, e
            );
        }
        Ok(())
    }

    fn update_app_writeable_files(&self, target_dir: &Path, _hash: &str, _app_name: &str) -> Result<()> {
        // Nothing upstream to merge from here; this hook exists so a real
        // deployment can layer per-app version-aware merging on top without
        // touching the lifecycle core.
        fsutil::make_dir_all(target_dir)?;
        Ok(())
    }

    fn import_legacy_writeable_files(&self, target_dir: &Path, hash: &str, app_name: &str) -> Result<()> {
        // NOTE: preserved verbatim from the original implementation, which
        // builds this path from the literal string "appName" rather than the
        // actual app name (see spec §9 open question). Every app therefore
        // probes the *same* legacy path. This is almost certainly a bug in
        // the original, but the contract here is to reproduce behavior, not
        // silently fix it.
        const LEGACY_APP_PATH_COMPONENT: &str = "appName";
        let legacy_app_dir = self.config.legacy_root.join(LEGACY_APP_PATH_COMPONENT);
        if !legacy_app_dir.is_dir() {
            return Ok(());
        }
        fsutil::copy_recursive(&legacy_app_dir, target_dir)
            .with_context(|| format!("importing legacy writeable files for '{app_name}'"))?;
        self.update_app_writeable_files(target_dir, hash, app_name)
    }
}

/// Reference implementation of [`LabelProvider`] that reads the SMACK label
/// via the `security.SMACK64` extended attribute.
pub struct SmackLabelProvider<'a> {
    config: &'a Config,
}

impl<'a> SmackLabelProvider<'a> {
    pub fn new(config: &'a Config) -> Self {
        SmackLabelProvider { config }
    }
}

impl LabelProvider for SmackLabelProvider<'_> {
    fn get_app_label(&self, app_name: &str) -> String {
        let path = ImagePath::new(self.config, ImageName::Current)
            .apps_dir()
            .join(app_name);
        let mut buf = vec![0u8; 256];
        match rustix::fs::getxattr(&path, "security.SMACK64", &mut buf) {
            Ok(n) => String::from_utf8_lossy(&buf[..n]).trim_end_matches('\0').to_string(),
            Err(_) => String::new(),
        }
    }
}
