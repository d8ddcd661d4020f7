//! Directory creation with ownership.

use std::fs;
use std::os::unix::fs::{DirBuilderExt, MetadataExt, PermissionsExt, chown};
use std::path::Path;

use strata_common::StrataResult;

/// Create `path` and any missing parents with `mode`, then hand the leaf to `uid:gid`.
///
/// Existing directories keep their contents; the leaf's mode and owner are
/// reset either way.
///
/// # Errors
///
/// Returns an I/O error if a directory cannot be created or changed.
pub fn mkdir_all_and_chown(path: &Path, mode: u32, uid: u32, gid: u32) -> StrataResult<()> {
    fs::DirBuilder::new().recursive(true).mode(mode).create(path)?;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;

    let meta = fs::metadata(path)?;
    if (meta.uid(), meta.gid()) != (uid, gid) {
        chown(path, Some(uid), Some(gid))?;
    }

    tracing::trace!(path = %path.display(), mode = format_args!("{mode:o}"), uid, gid, "Prepared directory");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_nested_with_mode() {
        let temp = tempfile::tempdir().unwrap();
        let target = temp.path().join("a/b/c");
        let uid = rustix::process::geteuid().as_raw();
        let gid = rustix::process::getegid().as_raw();

        mkdir_all_and_chown(&target, 0o710, uid, gid).unwrap();

        let meta = fs::metadata(&target).unwrap();
        assert!(meta.is_dir());
        assert_eq!(meta.mode() & 0o777, 0o710);
        assert_eq!(meta.uid(), uid);
    }

    #[test]
    fn existing_directory_is_updated() {
        let temp = tempfile::tempdir().unwrap();
        let target = temp.path().join("home");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("keep"), "x").unwrap();
        let uid = rustix::process::geteuid().as_raw();
        let gid = rustix::process::getegid().as_raw();

        mkdir_all_and_chown(&target, 0o700, uid, gid).unwrap();

        assert_eq!(fs::metadata(&target).unwrap().mode() & 0o777, 0o700);
        assert!(target.join("keep").exists());
    }
}
