//! Small filesystem collaborators used throughout the lifecycle core:
//! recursive delete, recursive copy, lazy unmount, and the rename-with-
//! fallback idiom the original program uses for promotion/demotion.
//!
//! None of this is safety-critical *design* -- it's plumbing -- but getting
//! the "don't follow symlinks, don't cross mount points" contract right
//! matters, since image directories routinely contain symlinks into the
//! staging area and may have sandboxed-app bind mounts underneath them.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result};
use fn_error_context::context;
use log::warn;
use walkdir::WalkDir;

pub(crate) trait CommandRunExt {
    fn run(&mut self) -> Result<()>;
}

impl CommandRunExt for Command {
    fn run(&mut self) -> Result<()> {
        let r = self.status()?;
        if !r.success() {
            anyhow::bail!("Child [{:?}] exited: {}", self, r);
        }
        Ok(())
    }
}

/// Recursively remove a directory, without following symlinks and without
/// crossing into a different mounted filesystem. It is not an error for
/// `path` not to exist.
#[context("recursively deleting {:?}", path.as_ref())]
pub fn remove_recursive(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(());
    }
    // Delete children depth-first, then the directory itself; never cross a
    // mount point and never follow a symlink into another tree.
    for entry in WalkDir::new(path)
        .same_file_system(true)
        .contents_first(true)
        .follow_links(false)
    {
        let entry = entry.context("walking directory tree")?;
        let p = entry.path();
        let file_type = entry.file_type();
        if file_type.is_dir() {
            if p == path {
                continue;
            }
            fs::remove_dir(p).with_context(|| format!("removing directory {p:?}"))?;
        } else {
            fs::remove_file(p).with_context(|| format!("removing {p:?}"))?;
        }
    }
    fs::remove_dir(path).with_context(|| format!("removing directory {path:?}"))
}

/// Copy `src` to `dst`, truncating any existing file at `dst`.
#[context("copying {:?} to {:?}", src.as_ref(), dst.as_ref())]
pub fn copy_file(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> Result<()> {
    fs::copy(src.as_ref(), dst.as_ref())?;
    Ok(())
}

/// Recursively copy a directory tree, preserving symlinks as symlinks
/// (never following them into their targets).
#[context("recursively copying {:?} to {:?}", src.as_ref(), dst.as_ref())]
pub fn copy_recursive(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> Result<()> {
    let src = src.as_ref();
    let dst = dst.as_ref();
    if !src.exists() {
        return Ok(());
    }
    fs::create_dir_all(dst)?;
    for entry in WalkDir::new(src)
        .same_file_system(true)
        .follow_links(false)
        .min_depth(1)
    {
        let entry = entry.context("walking directory tree")?;
        let rel = entry.path().strip_prefix(src).expect("entry under src");
        let target = dst.join(rel);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            let link_target = fs::read_link(entry.path())?;
            if target.exists() || target.symlink_metadata().is_ok() {
                let _ = fs::remove_file(&target);
            }
            std::os::unix::fs::symlink(&link_target, &target)
                .with_context(|| format!("symlinking {target:?} -> {link_target:?}"))?;
        } else {
            fs::copy(entry.path(), &target)
                .with_context(|| format!("copying {:?} to {target:?}", entry.path()))?;
        }
    }
    Ok(())
}

/// Create a directory (and its parents). It is not an error if it already
/// exists.
#[context("creating directory {:?}", path.as_ref())]
pub fn make_dir_all(path: impl AsRef<Path>) -> Result<()> {
    match fs::create_dir_all(path.as_ref()) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Rename `from` to `to`. If `to` already exists (e.g. a stale directory
/// left over from a previous aborted run), delete it first and retry --
/// matching the original program's `Rename()` helper.
#[context("renaming {:?} to {:?}", from.as_ref(), to.as_ref())]
pub fn rename(from: impl AsRef<Path>, to: impl AsRef<Path>) -> Result<()> {
    let from = from.as_ref();
    let to = to.as_ref();
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) => {
            let errno = e.raw_os_error();
            // ENOTEMPTY / EISDIR: destination exists and is a non-empty directory.
            if errno == Some(nix::errno::Errno::ENOTEMPTY as i32)
                || errno == Some(nix::errno::Errno::EISDIR as i32)
            {
                warn!("Destination {:?} exists; deleting it", to);
                remove_recursive(to)?;
                fs::rename(from, to)
                    .with_context(|| format!("renaming {from:?} to {to:?} (after clearing dest)"))
            } else {
                Err(e).with_context(|| format!("renaming {from:?} to {to:?}"))
            }
        }
    }
}

/// Best-effort lazy unmount of `path`. Failures (including "not mounted")
/// are tolerated and merely logged: image directories are not always
/// mounted, and we have no reliable way to tell in advance.
pub fn try_lazy_umount(path: impl AsRef<Path>) {
    let path = path.as_ref();
    let status = Command::new("umount").arg("-l").arg(path).status();
    match status {
        Ok(s) if s.success() => {}
        Ok(s) => warn!("umount -l {:?} exited with {}", path, s),
        Err(e) => warn!("failed to run umount -l {:?}: {}", path, e),
    }
}

/// Flush filesystem buffers to disk. Corresponds to the `sync()` syscall
/// calls the original program makes before the `current`-rename and before
/// the golden-install marker write (spec §5).
pub fn sync_disks() {
    nix::unistd::sync();
}
