//! Mount operations.

use std::fs;
use std::path::{Path, PathBuf};

use rustix::io::Errno;
use rustix::mount::{MountPropagationFlags, UnmountFlags, mount_bind, mount_change};
use strata_common::{StrataError, StrataResult};

/// Whether `path` is a mount point of this mount namespace.
///
/// # Errors
///
/// Returns an I/O error if the mount table cannot be read.
pub fn is_mountpoint(path: &Path) -> StrataResult<bool> {
    let mountinfo = fs::read_to_string("/proc/self/mountinfo")?;
    let target = path.canonicalize()?;
    Ok(mount_points(&mountinfo).any(|mp| mp == target))
}

/// Mount points listed in a `mountinfo` table (field 5, octal escapes decoded).
fn mount_points(mountinfo: &str) -> impl Iterator<Item = PathBuf> + '_ {
    mountinfo
        .lines()
        .filter_map(|line| line.split(' ').nth(4))
        .map(|field| PathBuf::from(unescape_octal(field)))
}

fn unescape_octal(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            let decoded = bytes
                .get(i + 1..i + 4)
                .and_then(|code| std::str::from_utf8(code).ok())
                .and_then(|code| u8::from_str_radix(code, 8).ok());
            if let Some(value) = decoded {
                out.push(value);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Turn `path` into a private mount point.
///
/// A directory that is not yet a mount point is bind-mounted onto itself
/// first. Mount events then no longer propagate between the engine's
/// namespace and the layers below `path`.
///
/// # Errors
///
/// Returns an I/O error if the bind mount or propagation change fails.
#[cfg(target_os = "linux")]
pub fn make_private_mount(path: &Path) -> StrataResult<()> {
    if !is_mountpoint(path)? {
        tracing::debug!(path = %path.display(), "Bind mounting onto itself");
        mount_bind(path, path)
            .map_err(|errno| StrataError::backend("bind mount", path, errno.raw_os_error()))?;
    }

    tracing::debug!(path = %path.display(), "Making mount private");
    mount_change(path, MountPropagationFlags::PRIVATE)
        .map_err(|errno| StrataError::backend("make private", path, errno.raw_os_error()))?;

    Ok(())
}

/// Mount propagation is Linux-only; elsewhere this always fails.
///
/// # Errors
///
/// Always returns [`StrataError::Unsupported`].
#[cfg(not(target_os = "linux"))]
pub fn make_private_mount(_path: &Path) -> StrataResult<()> {
    Err(StrataError::Unsupported {
        reason: "mount propagation".to_string(),
    })
}

/// Lazily unmount `path`. A path that is not mounted is left alone.
///
/// # Errors
///
/// Returns an I/O error if the unmount fails for another reason.
pub fn unmount(path: &Path) -> StrataResult<()> {
    tracing::debug!(path = %path.display(), "Unmounting");

    match rustix::mount::unmount(path, UnmountFlags::DETACH) {
        Ok(()) | Err(Errno::INVAL) => Ok(()),
        Err(errno) => Err(StrataError::backend("unmount", path, errno.raw_os_error())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MOUNTINFO: &str = "\
22 1 0:21 / / rw,relatime shared:1 - btrfs /dev/sda2 rw,subvol=/@
36 22 0:21 /var/lib/strata/btrfs /var/lib/strata/btrfs rw,relatime - btrfs /dev/sda2 rw
37 22 0:33 / /mnt/with\\040space rw - tmpfs tmpfs rw
";

    #[test]
    fn parses_mount_points() {
        let points: Vec<PathBuf> = mount_points(MOUNTINFO).collect();
        assert_eq!(
            points,
            vec![
                PathBuf::from("/"),
                PathBuf::from("/var/lib/strata/btrfs"),
                PathBuf::from("/mnt/with space"),
            ]
        );
    }

    #[test]
    fn unescapes_octal() {
        assert_eq!(unescape_octal("a\\040b"), "a b");
        assert_eq!(unescape_octal("tab\\011"), "tab\t");
        assert_eq!(unescape_octal("plain"), "plain");
        assert_eq!(unescape_octal("trailing\\"), "trailing\\");
    }

    proptest::proptest! {
        #[test]
        fn unescaped_text_passes_through(field in "[^\\\\ ]{0,64}") {
            proptest::prop_assert_eq!(unescape_octal(&field), field);
        }
    }

    #[test]
    fn root_is_a_mountpoint() {
        assert!(is_mountpoint(Path::new("/")).unwrap());
    }

    #[test]
    fn plain_directory_is_not_a_mountpoint() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().join("plain");
        fs::create_dir(&dir).unwrap();
        assert!(!is_mountpoint(&dir).unwrap());
    }
}
