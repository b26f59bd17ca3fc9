//! Image Inventory (spec §4.2): enumerates numbered image directories and
//! answers "what is the newest usable image?".

use std::fs;

use anyhow::{Context, Result};
use log::{info, warn};

use crate::config::Config;
use crate::paths::{ImageName, ImagePath, CURRENT_DIR_NAME, UNPACK_DIR_NAME};
use crate::status::{self, Status};

/// Scan the images root for the highest-indexed directory whose status is
/// `Good` or `Tryable`. Returns `None` if no such directory exists.
///
/// Entries named `unpack` or `current`, and anything starting with `.`, are
/// excluded from this search -- `current` is handled separately by
/// [`current_index`] since it has no index of its own to compare against a
/// numbered sibling.
pub fn newest_usable_index(config: &Config) -> Result<Option<u32>> {
    let mut highest: Option<u32> = None;

    let entries = match fs::read_dir(&config.images_root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("Images root {:?} does not exist yet", config.images_root);
            return Ok(None);
        }
        Err(e) => return Err(e).with_context(|| format!("reading {:?}", config.images_root)),
    };

    for entry in entries {
        let entry = entry.with_context(|| format!("reading entry in {:?}", config.images_root))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            warn!("Skipping non-UTF-8 directory entry {:?}", name);
            continue;
        };
        if name.starts_with('.') || name == UNPACK_DIR_NAME || name == CURRENT_DIR_NAME {
            continue;
        }
        if !is_dir(&entry)? {
            continue;
        }

        // The directory name should equal its own `index` file's contents
        // (invariant I-1), but we trust the index file, not the name, same
        // as the original implementation.
        let image = ImagePath::new(config, ImageName::Index(name.parse().unwrap_or(u32::MAX)));
        let Some(index) = status::read_index(&image) else {
            warn!("Image '{}' has no readable index; skipping", name);
            continue;
        };

        match status::read_status(&image)? {
            Status::Bad => {
                warn!("Image '{}' is bad; skipping", name);
            }
            Status::Good | Status::Tryable(_) => {
                info!("Image '{}' (index {}) is usable", name, index);
                if highest.map(|h| index > h).unwrap_or(true) {
                    highest = Some(index);
                }
            }
        }
    }

    Ok(highest)
}

/// Read `current`'s index, or `None` if there is no current image.
pub fn current_index(config: &Config) -> Option<u32> {
    let current = ImagePath::new(config, ImageName::Current);
    status::read_index(&current)
}

fn is_dir(entry: &fs::DirEntry) -> Result<bool> {
    let file_type = entry.file_type()?;
    if file_type.is_dir() {
        return Ok(true);
    }
    if file_type.is_symlink() {
        // Fall back to an explicit stat, mirroring the original's handling
        // of `DT_UNKNOWN` readdir entries: trust the target, not the
        // directory-entry type hint, when it's ambiguous.
        return Ok(fs::metadata(entry.path())
            .map(|m| m.is_dir())
            .unwrap_or(false));
    }
    Ok(false)
}
