//! Status Store (spec §4.1): persistence of per-image liveness state and
//! index numbers.
//!
//! Reads never modify the filesystem; writes are truncate-rewrite, never
//! append.

use std::fs;
use std::io::ErrorKind;

use anyhow::{Context, Result};
use fn_error_context::context;
use log::{error, warn};

use crate::config::MAX_TRIES;
use crate::paths::ImagePath;

/// The classification of an image's `status` file, per spec §3 / §4.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Declared reliable; never auto-reverted.
    Good,
    /// Failed; must be deselected and deleted.
    Bad,
    /// Has been attempted `n` times (`n` in `[0, MAX_TRIES)`), not yet good or bad.
    Tryable(u32),
}

impl Status {
    pub fn is_usable(self) -> bool {
        !matches!(self, Status::Bad)
    }
}

/// Read and classify the status of `image`. Absence of the status file is
/// not an error -- it means a brand-new image, `Tryable(0)`.
#[context("reading status of image {:?}", image.as_path())]
pub fn read_status(image: &ImagePath) -> Result<Status> {
    let raw = match fs::read_to_string(image.status_file()) {
        Ok(s) => s,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Ok(Status::Tryable(0));
        }
        Err(e) => return Err(e).context("reading status file"),
    };
    Ok(classify(raw.trim_end_matches(['\n', '\0'])))
}

fn classify(raw: &str) -> Status {
    if raw.starts_with("good") {
        return Status::Good;
    }
    if raw.starts_with("bad") {
        return Status::Bad;
    }
    if let Some(rest) = raw.strip_prefix("tried ") {
        return match rest.trim().parse::<i64>() {
            Ok(k) if k <= 0 => {
                error!("Tried count '{}' is malformed (non-positive)", rest);
                Status::Bad
            }
            Ok(k) if (k as u32) < MAX_TRIES => Status::Tryable(k as u32),
            Ok(_) => Status::Bad,
            Err(_) => {
                error!("Tried count '{}' is malformed", rest);
                Status::Bad
            }
        };
    }
    warn!("Unrecognized status contents '{}'; treating as bad", raw);
    Status::Bad
}

/// Truncate-rewrite the status file for `image`.
///
/// Callers writing the *current* image's status must treat failure here as
/// fatal (spec §7): the try-count invariant is safety-critical, and we must
/// not run a Supervisor attempt without having charged the try to disk.
/// Callers writing a non-current image's status should log and continue.
pub fn write_status(image: &ImagePath, value: &str) -> Result<()> {
    fs::write(image.status_file(), value)
        .with_context(|| format!("writing status file for {:?}", image.as_path()))
}

pub fn write_status_tried(image: &ImagePath, n: u32) -> Result<()> {
    write_status(image, &format!("tried {n}"))
}

/// Read the `index` file for `image`. Returns `None` on any failure --
/// missing file, unreadable, or malformed integer -- mirroring the `-1`
/// sentinel used throughout the original C implementation.
pub fn read_index(image: &ImagePath) -> Option<u32> {
    let raw = match fs::read_to_string(image.index_file()) {
        Ok(s) => s,
        Err(e) => {
            if e.kind() != ErrorKind::NotFound {
                warn!("Unable to read index file for {:?}: {}", image.as_path(), e);
            }
            return None;
        }
    };
    match raw.trim().parse::<u32>() {
        Ok(i) => Some(i),
        Err(_) => {
            error!("Invalid image index {:?} in {:?}", raw.trim(), image.index_file());
            None
        }
    }
}

pub fn write_index(image: &ImagePath, index: u32) -> Result<()> {
    fs::write(image.index_file(), index.to_string())
        .with_context(|| format!("writing index file for {:?}", image.as_path()))
}
