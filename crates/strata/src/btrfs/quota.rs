//! Btrfs quota groups.
//!
//! Each subvolume has an implicit level-0 quota group whose id equals the
//! subvolume's tree id. Limits are set on that group; the driver never
//! creates groups of its own and never stores group ids.

use std::fmt;
use std::os::fd::AsFd;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use strata_common::{StrataError, StrataResult};

use super::ioctl::{
    self, BTRFS_FIRST_FREE_OBJECTID, BTRFS_QGROUP_LIMIT_KEY, BTRFS_QGROUP_STATUS_KEY,
    BTRFS_QUOTA_CTL_ENABLE, BTRFS_QUOTA_TREE_OBJECTID, InoLookupArgs, QgroupCreateArgs,
    QgroupLimit, QgroupLimitArgs, QuotaCtlArgs, QuotaRescanArgs, SearchArgs, SearchKey,
};

/// What the driver knows about quota on its filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaState {
    /// Not probed yet.
    Unknown,
    /// Probed, quota is off.
    Disabled,
    /// Quota is on, either probed or enabled by the driver.
    Enabled,
}

impl fmt::Display for QuotaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unknown => "unknown",
            Self::Disabled => "disabled",
            Self::Enabled => "enabled",
        })
    }
}

/// Lazily probed, cached quota state of one filesystem.
///
/// The first caller that needs the state performs the probe while holding
/// the lock; concurrent callers wait for it and then read the settled value.
/// The state never returns to [`QuotaState::Unknown`] and never leaves
/// [`QuotaState::Enabled`].
#[derive(Debug)]
pub struct QuotaStatus {
    home: PathBuf,
    state: Mutex<QuotaState>,
}

impl QuotaStatus {
    /// Track the quota state of the filesystem holding `home`.
    #[must_use]
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
            state: Mutex::new(QuotaState::Unknown),
        }
    }

    /// The cached state, without probing.
    #[must_use]
    pub fn state(&self) -> QuotaState {
        *self.state.lock()
    }

    /// Probe the filesystem once, then report whether quota is enabled.
    ///
    /// Probe failures mean "disabled" and are not errors.
    pub fn refresh(&self) -> bool {
        let mut state = self.state.lock();
        self.settle(&mut state);
        *state == QuotaState::Enabled
    }

    fn settle(&self, state: &mut QuotaState) {
        if *state != QuotaState::Unknown {
            return;
        }
        *state = match probe_status(&self.home) {
            Ok(()) => {
                tracing::debug!(home = %self.home.display(), "btrfs quota is enabled");
                QuotaState::Enabled
            }
            Err(e) => {
                tracing::debug!(home = %self.home.display(), error = %e, "btrfs quota is not enabled");
                QuotaState::Disabled
            }
        };
    }

    /// Enable quota on the filesystem unless it already is.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Backend`] if the kernel refuses to enable quota.
    pub fn enable(&self) -> StrataResult<()> {
        let mut state = self.state.lock();
        self.settle(&mut state);
        if *state == QuotaState::Enabled {
            return Ok(());
        }

        let dir = ioctl::open_dir(&self.home)?;
        let mut args = QuotaCtlArgs {
            cmd: BTRFS_QUOTA_CTL_ENABLE,
            status: 0,
        };
        ioctl::QUOTA_CTL.call_at(dir.as_fd(), &self.home, &mut args)?;

        *state = QuotaState::Enabled;
        tracing::info!(home = %self.home.display(), "Enabled btrfs quota");
        Ok(())
    }

    /// Recompute quota accounting after structural changes.
    ///
    /// Does nothing when quota is not enabled.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Backend`] if the rescan fails.
    pub fn rescan(&self) -> StrataResult<()> {
        if !self.refresh() {
            return Ok(());
        }
        rescan_wait(&self.home)
    }
}

/// Check whether quota is enabled by searching the quota tree for its status item.
///
/// # Errors
///
/// Returns an error if the search fails (quota tree absent) or finds no status item.
pub fn probe_status(path: &Path) -> StrataResult<()> {
    let dir = ioctl::open_dir(path)?;
    let mut args = SearchArgs::new(SearchKey::items_of_type(
        BTRFS_QUOTA_TREE_OBJECTID,
        BTRFS_QGROUP_STATUS_KEY,
    ));
    ioctl::TREE_SEARCH.call_at(dir.as_fd(), path, &mut args)?;

    match args.items().next() {
        Some((header, _)) if header.item_type == BTRFS_QGROUP_STATUS_KEY => Ok(()),
        Some((header, _)) => Err(StrataError::invalid(format!(
            "invalid qgroup search header type for {}: {}",
            path.display(),
            header.item_type
        ))),
        None => Err(StrataError::NotFound {
            what: format!("qgroup status item for {}", path.display()),
        }),
    }
}

/// Cap the referenced bytes of the subvolume at `path`.
///
/// Quota must already be enabled.
///
/// # Errors
///
/// Returns [`StrataError::Backend`] if the limit cannot be set.
pub fn limit_qgroup(path: &Path, max_bytes: u64) -> StrataResult<()> {
    let dir = ioctl::open_dir(path)?;
    let mut args = QgroupLimitArgs::max_referenced(max_bytes);
    ioctl::QGROUP_LIMIT.call_at(dir.as_fd(), path, &mut args)?;

    tracing::debug!(path = %path.display(), size = max_bytes, "Set qgroup limit");
    Ok(())
}

/// Quota group id of the subvolume at `path`.
///
/// # Errors
///
/// Returns [`StrataError::Backend`] if the lookup fails, or
/// [`StrataError::NotFound`] if the kernel reports group 0.
pub fn lookup_qgroup(path: &Path) -> StrataResult<u64> {
    let dir = ioctl::open_dir(path)?;
    let mut args = InoLookupArgs::object(BTRFS_FIRST_FREE_OBJECTID);
    ioctl::INO_LOOKUP.call_at(dir.as_fd(), path, &mut args)?;

    if args.treeid == 0 {
        return Err(StrataError::NotFound {
            what: format!("qgroup for {}", path.display()),
        });
    }
    Ok(args.treeid)
}

/// Destroy a quota group through any directory on the filesystem.
///
/// # Errors
///
/// Returns [`StrataError::Backend`] if the kernel refuses.
pub fn destroy_qgroup(dir_path: &Path, qgroupid: u64) -> StrataResult<()> {
    let dir = ioctl::open_dir(dir_path)?;
    let mut args = QgroupCreateArgs {
        create: 0,
        qgroupid,
    };
    ioctl::QGROUP_CREATE.call_at(dir.as_fd(), dir_path, &mut args)?;

    tracing::debug!(qgroup = qgroupid, "Destroyed qgroup");
    Ok(())
}

/// The limit item of the subvolume's quota group, if one was ever set.
///
/// # Errors
///
/// Returns an error if the group cannot be looked up or the quota tree
/// cannot be searched.
pub fn qgroup_limit(path: &Path) -> StrataResult<Option<QgroupLimit>> {
    let qgroupid = lookup_qgroup(path)?;
    let dir = ioctl::open_dir(path)?;

    let mut key = SearchKey::items_of_type(BTRFS_QUOTA_TREE_OBJECTID, BTRFS_QGROUP_LIMIT_KEY);
    key.max_objectid = 0;
    key.min_offset = qgroupid;
    key.max_offset = qgroupid;
    key.nr_items = 1;

    let mut args = SearchArgs::new(key);
    ioctl::TREE_SEARCH.call_at(dir.as_fd(), path, &mut args)?;

    Ok(args
        .items()
        .find(|(header, _)| header.item_type == BTRFS_QGROUP_LIMIT_KEY && header.offset == qgroupid)
        .and_then(|(_, item)| QgroupLimit::from_item(item)))
}

/// Rescan quota accounting and wait for it to finish.
///
/// # Errors
///
/// Returns [`StrataError::Backend`] if the rescan fails.
pub fn rescan_wait(path: &Path) -> StrataResult<()> {
    let dir = ioctl::open_dir(path)?;
    let mut args = QuotaRescanArgs::default();
    ioctl::QUOTA_RESCAN_WAIT.call_at(dir.as_fd(), path, &mut args)?;

    tracing::debug!(path = %path.display(), "Quota rescan finished");
    Ok(())
}
