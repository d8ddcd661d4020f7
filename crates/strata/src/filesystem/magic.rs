//! Filesystem type detection.

use std::path::Path;

use strata_common::{StrataError, StrataResult};

/// `BTRFS_SUPER_MAGIC` from `<linux/magic.h>`.
pub const BTRFS_SUPER_MAGIC: u32 = 0x9123_683E;

/// The `statfs(2)` magic number of the filesystem holding `path`.
///
/// # Errors
///
/// Returns an I/O error if `path` cannot be queried.
pub fn fs_magic(path: &Path) -> StrataResult<u32> {
    let stat = rustix::fs::statfs(path)
        .map_err(|errno| StrataError::backend("statfs", path, errno.raw_os_error()))?;

    // f_type is signed on some targets; the magic is the low 32 bits.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let magic = stat.f_type as u32;
    Ok(magic)
}

/// Whether `path` lives on btrfs.
///
/// # Errors
///
/// Returns an I/O error if `path` cannot be queried.
pub fn is_btrfs(path: &Path) -> StrataResult<bool> {
    Ok(fs_magic(path)? == BTRFS_SUPER_MAGIC)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proc_is_not_btrfs() {
        // procfs has a fixed magic.
        assert_eq!(fs_magic(Path::new("/proc")).unwrap(), 0x9fa0);
        assert!(!is_btrfs(Path::new("/proc")).unwrap());
    }

    #[test]
    fn missing_path_is_an_error() {
        let err = fs_magic(Path::new("/nonexistent/strata/path")).unwrap_err();
        assert!(err.is_not_found());
    }
}
