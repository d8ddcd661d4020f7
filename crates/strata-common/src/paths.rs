//! On-disk layout of a storage backend.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;

use crate::id::LayerId;

/// Default root directory for Strata data.
pub static STRATA_ROOT: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("STRATA_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/var/lib/strata"))
});

/// Root directory used when running without privileges.
///
/// Falls back to `/tmp/strata` when the user has no data directory.
#[must_use]
pub fn rootless_root() -> PathBuf {
    dirs::data_dir().map_or_else(|| PathBuf::from("/tmp/strata"), |dir| dir.join("strata"))
}

/// Layout of a backend's home directory.
///
/// ```text
/// <home>/
///   subvolumes/<id>   one subvolume per layer
///   quotas/<id>       decimal byte ceiling last requested for the layer
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverPaths {
    home: PathBuf,
}

impl DriverPaths {
    /// Layout rooted directly at `home`.
    #[must_use]
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    /// Layout for the backend called `driver` under a data root.
    #[must_use]
    pub fn for_driver(root: impl AsRef<Path>, driver: &str) -> Self {
        Self::new(root.as_ref().join(driver))
    }

    /// The backend's home directory.
    #[must_use]
    pub fn home(&self) -> &Path {
        &self.home
    }

    /// Directory holding every layer's subvolume.
    #[must_use]
    pub fn subvolumes(&self) -> PathBuf {
        self.home.join("subvolumes")
    }

    /// Subvolume directory of a layer.
    #[must_use]
    pub fn subvolume(&self, id: &LayerId) -> PathBuf {
        self.subvolumes().join(id.as_str())
    }

    /// Directory holding quota records.
    #[must_use]
    pub fn quotas(&self) -> PathBuf {
        self.home.join("quotas")
    }

    /// Quota record of a layer.
    #[must_use]
    pub fn quota(&self, id: &LayerId) -> PathBuf {
        self.quotas().join(id.as_str())
    }
}

impl Default for DriverPaths {
    fn default() -> Self {
        Self::for_driver(STRATA_ROOT.as_path(), "btrfs")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> LayerId {
        LayerId::new(s).unwrap()
    }

    #[test]
    fn layout_under_home() {
        let paths = DriverPaths::new("/var/lib/strata/btrfs");
        assert_eq!(
            paths.subvolume(&id("abc123")),
            PathBuf::from("/var/lib/strata/btrfs/subvolumes/abc123")
        );
        assert_eq!(
            paths.quota(&id("abc123")),
            PathBuf::from("/var/lib/strata/btrfs/quotas/abc123")
        );
    }

    #[test]
    fn driver_under_root() {
        let paths = DriverPaths::for_driver("/tmp/strata-test", "btrfs");
        assert_eq!(paths.home(), Path::new("/tmp/strata-test/btrfs"));
        assert_eq!(
            paths.subvolumes(),
            PathBuf::from("/tmp/strata-test/btrfs/subvolumes")
        );
    }

    #[test]
    fn rootless_root_is_absolute() {
        assert!(rootless_root().is_absolute());
    }
}
