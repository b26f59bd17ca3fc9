//! Strongly-typed image names and paths.
//!
//! The original program built every path with `snprintf` into a stack buffer.
//! `ImageName` and `ImagePath` exist so that invariants I-2 and I-3 (at most
//! one `current`, promotion is a single rename) are structural: there is no
//! way to construct an `ImagePath` that isn't rooted at the configured images
//! directory, and `ImageName` can only ever be `Current` or a non-negative
//! index.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::Config;

/// The literal directory name reserved for scratch work during promotion.
pub const UNPACK_DIR_NAME: &str = "unpack";
/// The literal directory name of the active image.
pub const CURRENT_DIR_NAME: &str = "current";

/// Either the active image, or one of the numbered (inactive) images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ImageName {
    Current,
    Index(u32),
}

impl ImageName {
    /// The on-disk directory name for this image.
    pub fn dir_name(self) -> String {
        match self {
            ImageName::Current => CURRENT_DIR_NAME.to_string(),
            ImageName::Index(i) => i.to_string(),
        }
    }
}

impl fmt::Display for ImageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dir_name())
    }
}

/// A fully-qualified path to an image directory, always rooted at
/// `config.images_root`.
#[derive(Debug, Clone)]
pub struct ImagePath {
    pub name: ImageName,
    path: PathBuf,
}

impl ImagePath {
    pub fn new(config: &Config, name: ImageName) -> Self {
        let path = config.images_root.join(name.dir_name());
        ImagePath { name, path }
    }

    pub fn as_path(&self) -> &Path {
        &self.path
    }

    pub fn index_file(&self) -> PathBuf {
        self.path.join("index")
    }

    pub fn status_file(&self) -> PathBuf {
        self.path.join("status")
    }

    pub fn version_file(&self) -> PathBuf {
        self.path.join("version")
    }

    pub fn info_properties_file(&self) -> PathBuf {
        self.path.join("info.properties")
    }

    pub fn config_dir(&self) -> PathBuf {
        self.path.join("config")
    }

    pub fn apps_dir(&self) -> PathBuf {
        self.path.join("apps")
    }

    pub fn apps_writeable_dir(&self) -> PathBuf {
        self.path.join("appsWriteable")
    }

    pub fn supervisor_binary(&self) -> PathBuf {
        self.path.join("bin").join("supervisor")
    }
}

impl AsRef<Path> for ImagePath {
    fn as_ref(&self) -> &Path {
        &self.path
    }
}

/// Path to the images-root-relative scratch directory used while building a
/// new image (either the golden install, or none currently -- see
/// `config.apps_unpack_dir` for the sibling apps scratch dir).
pub fn images_unpack_dir(config: &Config) -> PathBuf {
    config.images_root.join(UNPACK_DIR_NAME)
}

pub fn apps_unpack_dir(config: &Config) -> PathBuf {
    config.apps_root.join(UNPACK_DIR_NAME)
}

pub fn ldconfig_marker(config: &Config) -> PathBuf {
    config.images_root.join("needs_ldconfig")
}
