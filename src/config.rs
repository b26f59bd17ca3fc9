//! Validated runtime configuration.
//!
//! This is the entire configuration surface: CLI flags plus fixed defaults.
//! No config file format is introduced (the original program didn't have one
//! either). A `Config` is built once at startup and then passed by reference;
//! nothing here is global mutable state.

use std::path::PathBuf;

use anyhow::{Context, Result};

/// Maximum number of un-`good` boot attempts before an image is demoted to `bad`.
pub const MAX_TRIES: u32 = 4;

#[derive(Debug, Clone)]
pub struct Config {
    pub images_root: PathBuf,
    pub apps_root: PathBuf,
    pub staging_root: PathBuf,
    pub golden_marker: PathBuf,
    pub legacy_root: PathBuf,
    pub read_only: bool,
    pub once: bool,
}

impl Config {
    #[fn_error_context::context("validating configuration")]
    pub fn validate(self) -> Result<Self> {
        if !self.read_only {
            let parent = self
                .images_root
                .parent()
                .with_context(|| format!("{:?} has no parent directory", self.images_root))?;
            if !parent.exists() {
                anyhow::bail!(
                    "images-root parent {:?} does not exist; refusing to start",
                    parent
                );
            }
        }
        Ok(self)
    }

    /// Path to the golden staging tree's published system directory.
    pub fn staging_system_dir(&self) -> PathBuf {
        self.staging_root.join("system")
    }

    pub fn staging_apps_dir(&self) -> PathBuf {
        self.staging_root.join("apps")
    }
}
