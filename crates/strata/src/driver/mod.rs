//! The btrfs layer store.
//!
//! Every layer is a subvolume under `<home>/subvolumes`; a child layer is a
//! writable snapshot of its parent. A per-layer size becomes a limit on the
//! subvolume's quota group and is recorded under `<home>/quotas` so it can
//! be re-applied on [`GraphDriver::get`].

mod config;
mod options;

pub use config::DriverConfig;
pub use options::{DriverOptions, LayerOptions};

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::{OpenOptionsExt, chown};
use std::path::{Path, PathBuf};

use strata_common::{ByteSize, CreateOpts, DriverPaths, GraphDriver, LayerId, StrataError, StrataResult};
use tracing::span::EnteredSpan;

use crate::btrfs::ioctl::BTRFS_QGROUP_LIMIT_MAX_RFER;
use crate::btrfs::{QuotaState, QuotaStatus, quota, subvolume};
use crate::filesystem::{self, BTRFS_SUPER_MAGIC};
use crate::namespace::IdentityMapping;
use crate::security;

/// Name the backend is selected by.
pub const DRIVER_NAME: &str = "btrfs";

/// A btrfs-backed [`GraphDriver`].
#[derive(Debug)]
pub struct Driver {
    paths: DriverPaths,
    id_mapping: IdentityMapping,
    options: DriverOptions,
    quota: QuotaStatus,
}

impl Driver {
    /// Set up the driver in `home`.
    ///
    /// `home` must be on btrfs, or, if it does not exist yet, its parent.
    /// It is created owned by the real uid and the mapped root group, and turned into a
    /// private mount.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Unsupported`] when the filesystem is not
    /// btrfs, [`StrataError::InvalidArgument`] for bad options, and
    /// backend or I/O errors from preparing `home`.
    pub fn init<S: AsRef<str>>(
        home: impl Into<PathBuf>,
        options: &[S],
        id_mapping: IdentityMapping,
    ) -> StrataResult<Self> {
        let home = home.into();
        let _span = tracing::info_span!("init", storage_driver = DRIVER_NAME, home = %home.display())
            .entered();

        let probe = match fs::metadata(&home) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => home.parent().unwrap_or(&home),
            _ => &home,
        };
        let magic = filesystem::fs_magic(probe)?;
        if magic != BTRFS_SUPER_MAGIC {
            tracing::debug!(path = %probe.display(), magic = format_args!("{magic:#x}"), "Not a btrfs filesystem");
            return Err(StrataError::Unsupported {
                reason: format!("{} is not on a btrfs filesystem", probe.display()),
            });
        }

        let options = DriverOptions::parse(options)?;

        let (_, gid) = id_mapping.root_pair()?;
        filesystem::mkdir_all_and_chown(&home, 0o710, uid(), gid)?;
        filesystem::make_private_mount(&home)?;

        let driver = Self {
            quota: QuotaStatus::new(&home),
            paths: DriverPaths::new(home),
            id_mapping,
            options,
        };

        if driver.options.wants_quota() {
            driver.quota.enable()?;
        }

        tracing::info!(min_space = ?driver.options.min_space, "Initialized btrfs driver");
        Ok(driver)
    }

    /// Set up the driver described by `config`.
    ///
    /// # Errors
    ///
    /// See [`Driver::init`].
    pub fn from_config(config: &DriverConfig) -> StrataResult<Self> {
        Self::init(config.home(), &config.options, config.id_mapping.clone())
    }

    /// On-disk layout.
    #[must_use]
    pub const fn paths(&self) -> &DriverPaths {
        &self.paths
    }

    /// Parsed construction options.
    #[must_use]
    pub const fn options(&self) -> &DriverOptions {
        &self.options
    }

    /// Cached quota state.
    #[must_use]
    pub fn quota_state(&self) -> QuotaState {
        self.quota.state()
    }

    /// The size recorded for a layer at creation, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::InvalidArgument`] for a bad id or a record
    /// that is not a decimal byte count, or an I/O error if it cannot be read.
    pub fn recorded_quota(&self, id: &str) -> StrataResult<Option<ByteSize>> {
        let id = LayerId::new(id)?;
        let record = self.paths.quota(&id);

        let content = match fs::read_to_string(&record) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        content
            .trim()
            .parse::<u64>()
            .map(|bytes| Some(ByteSize::bytes(bytes)))
            .map_err(|_| StrataError::invalid(format!("corrupt quota record {}", record.display())))
    }

    /// The referenced-bytes limit currently set on a layer's quota group.
    ///
    /// `None` when the group has no such limit.
    ///
    /// # Errors
    ///
    /// Returns an error if quota is off or the group cannot be queried.
    pub fn quota_limit(&self, id: &str) -> StrataResult<Option<ByteSize>> {
        let id = LayerId::new(id)?;
        let limit = quota::qgroup_limit(&self.paths.subvolume(&id))?;

        Ok(limit
            .filter(|limit| limit.flags & BTRFS_QGROUP_LIMIT_MAX_RFER != 0)
            .map(|limit| ByteSize::bytes(limit.max_rfer)))
    }

    fn span(operation: &'static str, id: &LayerId) -> EnteredSpan {
        tracing::info_span!("graphdriver", storage_driver = DRIVER_NAME, operation, layer = %id.short())
            .entered()
    }

    fn apply_limit(&self, dir: &Path, size: ByteSize) -> StrataResult<()> {
        self.quota.enable()?;
        quota::limit_qgroup(dir, size.as_u64())
    }

    fn write_quota_record(&self, id: &LayerId, size: ByteSize) -> StrataResult<()> {
        filesystem::mkdir_all_and_chown(&self.paths.quotas(), 0o700, uid(), egid())?;

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o644)
            .open(self.paths.quota(id))?;
        file.write_all(size.as_u64().to_string().as_bytes())?;
        Ok(())
    }

    /// Quota, ownership and label of a freshly created subvolume.
    fn prepare_layer(
        &self,
        id: &LayerId,
        layer: &LayerOptions,
        (uid, gid): (u32, u32),
        mount_label: Option<&str>,
    ) -> StrataResult<()> {
        let dir = self.paths.subvolume(id);
        if let Some(size) = layer.size {
            self.apply_limit(&dir, size)?;
            self.write_quota_record(id, size)?;
        }

        if (uid, gid) != (0, 0) {
            chown(&dir, Some(uid), Some(gid))?;
        }

        security::relabel(&dir, mount_label)
    }

    /// Undo a half-prepared Create so the id can be reused.
    fn discard_layer(&self, id: &LayerId) {
        tracing::warn!("Layer setup failed, discarding its subvolume");

        match fs::remove_file(self.paths.quota(id)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(error = %e, "Failed to remove quota record"),
        }

        let quota_enabled = self.quota.refresh();
        if let Err(e) = subvolume::delete(&self.paths.subvolumes(), id.as_str(), quota_enabled) {
            tracing::error!(error = %e, "Failed to discard subvolume");
        }
    }

    fn snapshot_parent(&self, parent: &str, id: &LayerId) -> StrataResult<()> {
        let parent = LayerId::new(parent)?;
        let parent_dir = self.paths.subvolume(&parent);

        let meta = fs::metadata(&parent_dir).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                StrataError::NotFound {
                    what: format!("parent layer {parent}"),
                }
            } else {
                e.into()
            }
        })?;
        if !meta.is_dir() {
            return Err(StrataError::invalid(format!(
                "{}: not a directory",
                parent_dir.display()
            )));
        }

        subvolume::snapshot(&parent_dir, &self.paths.subvolumes(), id.as_str())
    }
}

impl GraphDriver for Driver {
    fn name(&self) -> &'static str {
        DRIVER_NAME
    }

    fn status(&self) -> Vec<(String, String)> {
        self.quota.refresh();

        let mut status = vec![
            ("Btrfs".to_string(), String::new()),
            ("Quota".to_string(), self.quota.state().to_string()),
        ];
        if let Some(min_space) = self.options.min_space {
            status.push(("Min Space".to_string(), min_space.to_string()));
        }
        status
    }

    fn metadata(&self, id: &str) -> StrataResult<BTreeMap<String, String>> {
        LayerId::new(id)?;
        Ok(BTreeMap::new())
    }

    fn cleanup(&self) -> StrataResult<()> {
        filesystem::unmount(self.paths.home())
    }

    fn create(&self, id: &str, parent: Option<&str>, opts: &CreateOpts) -> StrataResult<()> {
        let id = LayerId::new(id)?;
        let _span = Self::span("create", &id);

        let layer = LayerOptions::parse(&opts.storage_opt)?;
        layer.validate(&self.options)?;

        let (uid, gid) = self.id_mapping.root_pair()?;
        let subvolumes = self.paths.subvolumes();
        filesystem::mkdir_all_and_chown(&subvolumes, 0o710, self::uid(), gid)?;

        match parent.filter(|p| !p.is_empty()) {
            None => subvolume::create(&subvolumes, id.as_str())?,
            Some(parent) => self.snapshot_parent(parent, &id)?,
        }

        if let Err(e) = self.prepare_layer(&id, &layer, (uid, gid), opts.mount_label.as_deref()) {
            self.discard_layer(&id);
            return Err(e);
        }

        tracing::info!(parent = parent.unwrap_or_default(), size = ?layer.size, "Created layer");
        Ok(())
    }

    fn remove(&self, id: &str) -> StrataResult<()> {
        let id = LayerId::new(id)?;
        let _span = Self::span("remove", &id);

        match fs::remove_file(self.paths.quota(&id)) {
            Ok(()) => tracing::debug!("Removed quota record"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let dir = self.paths.subvolume(&id);
        match fs::symlink_metadata(&dir) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!("Layer already removed");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        let quota_enabled = self.quota.refresh();
        if let Err(e) = subvolume::delete(&self.paths.subvolumes(), id.as_str(), quota_enabled) {
            if quota_enabled {
                return Err(e);
            }
            // Newer kernels let unprivileged owners rmdir a subvolume.
            tracing::warn!(error = %e, "Subvolume destroy failed, removing directory tree instead");
        }

        match fs::remove_dir_all(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        if let Err(e) = self.quota.rescan() {
            tracing::warn!(error = %e, "Quota rescan after remove failed");
        }

        tracing::info!("Removed layer");
        Ok(())
    }

    fn get(&self, id: &str, _mount_label: Option<&str>) -> StrataResult<PathBuf> {
        let id = LayerId::new(id)?;
        let _span = Self::span("get", &id);

        let dir = self.paths.subvolume(&id);
        if !fs::metadata(&dir)?.is_dir() {
            return Err(StrataError::invalid(format!("{}: not a directory", dir.display())));
        }

        // Tooling outside the driver can reset a group's limit; put it back.
        let recorded = self.recorded_quota(id.as_str()).ok().flatten();
        if let Some(size) = recorded.filter(|size| size.as_u64() >= self.options.floor()) {
            self.apply_limit(&dir, size)?;
            tracing::debug!(%size, "Re-applied quota limit");
        }

        Ok(dir)
    }

    fn put(&self, _id: &str) -> StrataResult<()> {
        Ok(())
    }

    fn exists(&self, id: &str) -> bool {
        LayerId::new(id).is_ok_and(|id| fs::metadata(self.paths.subvolume(&id)).is_ok())
    }
}

/// Real uid, which owns the driver's directories even under setuid.
fn uid() -> u32 {
    rustix::process::getuid().as_raw()
}

fn egid() -> u32 {
    rustix::process::getegid().as_raw()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A scratch directory that is certainly not btrfs.
    fn non_btrfs_dir() -> Option<tempfile::TempDir> {
        let dir = tempfile::tempdir().unwrap();
        if filesystem::is_btrfs(dir.path()).unwrap_or(true) {
            return None;
        }
        Some(dir)
    }

    #[test]
    fn init_off_btrfs_is_unsupported() {
        let Some(temp) = non_btrfs_dir() else { return };
        let home = temp.path().join("btrfs");

        let err = Driver::init::<&str>(&home, &[], IdentityMapping::default()).unwrap_err();
        assert!(matches!(err, StrataError::Unsupported { .. }));
        assert!(!home.exists());
    }

    #[test]
    fn init_probes_existing_home() {
        let Some(temp) = non_btrfs_dir() else { return };

        let err = Driver::init(temp.path(), &["min_space=1G"], IdentityMapping::default())
            .unwrap_err();
        assert!(matches!(err, StrataError::Unsupported { .. }));
    }

    /// A driver over a plain directory, skipping the filesystem checks of `init`.
    fn scratch_driver(home: &Path, min_space: Option<ByteSize>) -> Driver {
        let mapping = IdentityMapping::new(
            vec![crate::namespace::IdMap::new(0, uid(), 1)],
            vec![crate::namespace::IdMap::new(0, egid(), 1)],
        );
        Driver {
            paths: DriverPaths::new(home),
            id_mapping: mapping,
            options: DriverOptions { min_space },
            quota: QuotaStatus::new(home),
        }
    }

    #[test]
    fn status_reports_floor() {
        let temp = tempfile::tempdir().unwrap();
        let driver = scratch_driver(temp.path(), Some(ByteSize::gibibytes(1)));

        let status = driver.status();
        assert_eq!(status[0], ("Btrfs".to_string(), String::new()));
        assert_eq!(status[1].0, "Quota");
        assert_eq!(status[2], ("Min Space".to_string(), "1GiB".to_string()));
        assert_eq!(driver.name(), "btrfs");
    }

    #[test]
    fn unknown_layer_option_fails_before_any_change() {
        let temp = tempfile::tempdir().unwrap();
        let driver = scratch_driver(temp.path(), None);
        let opts = CreateOpts::default().with_storage_opt("inodes", "10");

        let err = driver.create("layer", None, &opts).unwrap_err();
        assert!(matches!(err, StrataError::InvalidArgument { .. }));
        assert!(!driver.paths().subvolumes().exists());
    }

    #[test]
    fn size_below_floor_leaves_no_record() {
        let temp = tempfile::tempdir().unwrap();
        let driver = scratch_driver(temp.path(), Some(ByteSize::gibibytes(1)));
        let opts = CreateOpts::default().with_storage_opt("size", "512M");

        let err = driver.create("layer", None, &opts).unwrap_err();
        assert!(matches!(err, StrataError::InvalidArgument { .. }));
        assert!(!driver.paths().quotas().exists());
    }

    #[test]
    fn snapshot_of_missing_parent_is_not_found() {
        let temp = tempfile::tempdir().unwrap();
        let driver = scratch_driver(temp.path(), None);

        let err = driver
            .create("child", Some("ghost"), &CreateOpts::default())
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(!driver.exists("child"));
    }

    #[test]
    fn invalid_ids_are_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let driver = scratch_driver(temp.path(), None);

        assert!(driver.create("../escape", None, &CreateOpts::default()).is_err());
        assert!(driver.remove("a/b").is_err());
        assert!(!driver.exists(".."));
        assert!(driver.metadata("").is_err());
    }

    #[test]
    fn remove_of_gone_subvolume_cleans_record() {
        let temp = tempfile::tempdir().unwrap();
        let driver = scratch_driver(temp.path(), None);
        let id = LayerId::new("gone").unwrap();
        driver.write_quota_record(&id, ByteSize::gibibytes(2)).unwrap();
        assert_eq!(
            driver.recorded_quota("gone").unwrap(),
            Some(ByteSize::gibibytes(2))
        );

        driver.remove("gone").unwrap();
        assert!(!driver.paths().quota(&id).exists());
        assert_eq!(driver.recorded_quota("gone").unwrap(), None);

        driver.remove("gone").unwrap();
    }

    #[test]
    fn quota_record_is_decimal() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::tempdir().unwrap();
        let driver = scratch_driver(temp.path(), None);
        let id = LayerId::new("sized").unwrap();
        driver.write_quota_record(&id, ByteSize::mebibytes(1)).unwrap();

        let record = driver.paths().quota(&id);
        assert_eq!(fs::read_to_string(&record).unwrap(), "1048576");
        let quotas = fs::metadata(driver.paths().quotas()).unwrap();
        assert_eq!(quotas.permissions().mode() & 0o777, 0o700);
    }

    #[test]
    fn corrupt_record_is_reported_but_ignored_by_get() {
        let temp = tempfile::tempdir().unwrap();
        let driver = scratch_driver(temp.path(), None);
        let id = LayerId::new("plain").unwrap();
        fs::create_dir_all(driver.paths().subvolume(&id)).unwrap();
        fs::create_dir_all(driver.paths().quotas()).unwrap();
        fs::write(driver.paths().quota(&id), "lots").unwrap();

        assert!(driver.recorded_quota("plain").is_err());
        assert_eq!(driver.get("plain", None).unwrap(), driver.paths().subvolume(&id));
        driver.put("plain").unwrap();
    }

    #[test]
    fn get_of_missing_layer_fails() {
        let temp = tempfile::tempdir().unwrap();
        let driver = scratch_driver(temp.path(), None);

        assert!(driver.get("missing", None).unwrap_err().is_not_found());
    }

    #[test]
    fn init_with_missing_parent_fails() {
        let Some(temp) = non_btrfs_dir() else { return };
        let home = temp.path().join("a/b/btrfs");

        let err = Driver::init::<&str>(&home, &[], IdentityMapping::default()).unwrap_err();
        assert!(err.is_not_found());
    }
}
