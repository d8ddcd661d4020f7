//! Subvolume create, snapshot, identity and recursive delete.

use std::ffi::OsStr;
use std::io;
use std::os::fd::AsFd;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use strata_common::{StrataError, StrataResult};
use walkdir::WalkDir;

use super::ioctl::{self, BTRFS_FIRST_FREE_OBJECTID, VolArgs, VolArgsV2};
use super::quota;
use crate::namespace;

/// Create an empty subvolume `name` inside `parent_dir`.
///
/// # Errors
///
/// Returns [`StrataError::Backend`] if the kernel refuses, or
/// [`StrataError::InvalidArgument`] if `name` does not fit the request.
pub fn create(parent_dir: &Path, name: &str) -> StrataResult<()> {
    let mut args = VolArgs::named(name)?;
    let dir = ioctl::open_dir(parent_dir)?;
    ioctl::SUBVOL_CREATE.call_at(dir.as_fd(), parent_dir, &mut args)?;

    tracing::debug!(parent = %parent_dir.display(), name, "Created subvolume");
    Ok(())
}

/// Snapshot the subvolume at `source` as a writable subvolume `name` inside `dest_dir`.
///
/// # Errors
///
/// Returns [`StrataError::Backend`] if either directory cannot be opened or
/// the kernel refuses the snapshot.
pub fn snapshot(source: &Path, dest_dir: &Path, name: &str) -> StrataResult<()> {
    let src = ioctl::open_dir(source)?;
    let dest = ioctl::open_dir(dest_dir)?;

    let mut args = VolArgsV2::snapshot(src.as_fd(), name)?;
    ioctl::SNAP_CREATE_V2.call_at(dest.as_fd(), dest_dir, &mut args)?;

    tracing::debug!(
        source = %source.display(),
        dest = %dest_dir.display(),
        name,
        "Created snapshot"
    );
    Ok(())
}

/// Whether `path` is the root of a subvolume.
///
/// Every subvolume root carries the same reserved inode number; ordinary
/// directories never do. Only directories are considered, so a file that
/// happens to have that inode number on another filesystem is not mistaken
/// for a subvolume.
///
/// # Errors
///
/// Returns an I/O error if `path` cannot be stat'ed.
pub fn is_subvolume(path: &Path) -> StrataResult<bool> {
    let meta = std::fs::symlink_metadata(path)?;
    Ok(meta.is_dir() && meta.ino() == BTRFS_FIRST_FREE_OBJECTID)
}

/// Delete subvolume `name` inside `dir`, together with every subvolume nested inside it.
///
/// Nested subvolumes are destroyed first, deepest first. When quota is
/// enabled each subvolume's quota group is destroyed on a best-effort basis
/// before the subvolume itself.
///
/// # Errors
///
/// Returns an error if the tree cannot be walked or any destroy fails.
/// Inside a user namespace, an `EPERM` destroy becomes
/// [`StrataError::PermissionDenied`].
pub fn delete(dir: &Path, name: &str, quota_enabled: bool) -> StrataResult<()> {
    let root = dir.join(name);

    // Post-order over the subvolume tree: a node is destroyed only after
    // everything discovered beneath it.
    let mut pending = vec![Teardown::Discover(root)];
    while let Some(step) = pending.pop() {
        match step {
            Teardown::Discover(path) => {
                let children = nested_subvolumes(&path)?;
                pending.push(Teardown::Destroy(path));
                pending.extend(children.into_iter().map(Teardown::Discover));
            }
            Teardown::Destroy(path) => destroy(&path, quota_enabled)?,
        }
    }

    Ok(())
}

enum Teardown {
    Discover(PathBuf),
    Destroy(PathBuf),
}

/// Subvolumes directly nested below `root`, without descending into them.
///
/// Entries that vanish during the walk are skipped; `root` vanishing is an error.
fn nested_subvolumes(root: &Path) -> StrataResult<Vec<PathBuf>> {
    let mut found = Vec::new();
    let mut walk = WalkDir::new(root).min_depth(1).into_iter();

    while let Some(entry) = walk.next() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if vanished(&e, root) => continue,
            Err(e) => {
                return Err(StrataError::Io(io::Error::other(format!(
                    "error walking subvolumes of {}: {e}",
                    root.display()
                ))));
            }
        };

        if !entry.file_type().is_dir() {
            continue;
        }

        match is_subvolume(entry.path()) {
            Ok(true) => {
                found.push(entry.into_path());
                walk.skip_current_dir();
            }
            Ok(false) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                tracing::error!(path = %entry.path().display(), error = %e, "Failed to test for a subvolume");
                return Err(e);
            }
        }
    }

    Ok(found)
}

fn vanished(err: &walkdir::Error, root: &Path) -> bool {
    err.io_error().is_some_and(|e| e.kind() == io::ErrorKind::NotFound)
        && err.path().is_some_and(|p| p != root)
}

/// Destroy one subvolume that has no nested subvolumes left.
fn destroy(path: &Path, quota_enabled: bool) -> StrataResult<()> {
    let (parent, name) = split_parent(path)?;
    let mut args = VolArgs::named(name)?;

    if quota_enabled {
        drop_qgroup(parent, path);
    }

    let dir = ioctl::open_dir(parent)?;
    ioctl::SNAP_DESTROY
        .call_at(dir.as_fd(), parent, &mut args)
        .map_err(|e| {
            tracing::error!(path = %path.display(), error = %e, "Failed to destroy subvolume");
            if e.raw_os_error() == Some(libc::EPERM) && namespace::running_in_user_ns() {
                StrataError::PermissionDenied {
                    path: path.to_path_buf(),
                    source: Box::new(e),
                }
            } else {
                e
            }
        })?;

    tracing::debug!(path = %path.display(), "Destroyed subvolume");
    Ok(())
}

/// Best-effort removal of a subvolume's quota group. A leftover group is
/// harmless; a subvolume that cannot be removed is not.
fn drop_qgroup(parent: &Path, path: &Path) {
    match quota::lookup_qgroup(path) {
        Ok(qgroupid) => {
            if let Err(e) = quota::destroy_qgroup(parent, qgroupid) {
                tracing::error!(
                    path = %path.display(),
                    qgroup = qgroupid,
                    error = %e,
                    "Failed to delete btrfs qgroup"
                );
            }
        }
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "Failed to lookup btrfs qgroup");
        }
    }
}

fn split_parent(path: &Path) -> StrataResult<(&Path, &OsStr)> {
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => Ok((parent, name)),
        _ => Err(StrataError::invalid(format!(
            "{} does not name a subvolume",
            path.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn plain_directory_is_not_a_subvolume() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().join("plain");
        fs::create_dir(&dir).unwrap();
        assert!(!is_subvolume(&dir).unwrap());
    }

    #[test]
    fn missing_path_propagates_error() {
        let temp = tempfile::tempdir().unwrap();
        let err = is_subvolume(&temp.path().join("missing")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn plain_tree_has_no_nested_subvolumes() {
        let temp = tempfile::tempdir().unwrap();
        fs::create_dir_all(temp.path().join("a/b/c")).unwrap();
        fs::write(temp.path().join("a/file"), "x").unwrap();
        assert!(nested_subvolumes(temp.path()).unwrap().is_empty());
    }

    #[test]
    fn missing_walk_root_is_an_error() {
        let temp = tempfile::tempdir().unwrap();
        assert!(nested_subvolumes(&temp.path().join("gone")).is_err());
    }

    #[test]
    fn vanished_entry_is_tolerated_below_the_root() {
        let temp = tempfile::tempdir().unwrap();
        let gone = temp.path().join("gone");
        let err = WalkDir::new(&gone).into_iter().next().unwrap().unwrap_err();

        assert!(vanished(&err, temp.path()));
        assert!(!vanished(&err, &gone));
    }

    #[test]
    fn create_rejects_overlong_name_before_any_request() {
        let temp = tempfile::tempdir().unwrap();
        let err = create(temp.path(), &"x".repeat(5000)).unwrap_err();
        assert!(matches!(err, StrataError::InvalidArgument { .. }));
    }

    #[test]
    fn split_parent_requires_a_name() {
        assert!(split_parent(Path::new("/")).is_err());
        let (parent, name) = split_parent(Path::new("/h/subvolumes/abc")).unwrap();
        assert_eq!(parent, Path::new("/h/subvolumes"));
        assert_eq!(name, "abc");
    }
}
