//! The contract between a storage backend and the layer-diffing framework above it.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::StrataResult;

/// Per-layer creation options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOpts {
    /// Security label applied to the new layer directory.
    pub mount_label: Option<String>,
    /// Backend-specific options, e.g. `size`.
    pub storage_opt: BTreeMap<String, String>,
}

impl CreateOpts {
    /// Set the security label.
    #[must_use]
    pub fn with_mount_label(mut self, label: impl Into<String>) -> Self {
        self.mount_label = Some(label.into());
        self
    }

    /// Add a backend-specific option.
    #[must_use]
    pub fn with_storage_opt(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.storage_opt.insert(key.into(), value.into());
        self
    }
}

/// A copy-on-write layer store.
///
/// Layer IDs are opaque strings chosen by the caller. Operations on
/// different IDs may run concurrently.
pub trait GraphDriver: Send + Sync {
    /// Backend name.
    fn name(&self) -> &'static str;

    /// Diagnostic key/value pairs.
    fn status(&self) -> Vec<(String, String)>;

    /// Backend-specific metadata for a layer.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata cannot be read.
    fn metadata(&self, id: &str) -> StrataResult<BTreeMap<String, String>>;

    /// Release backend-wide resources on shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error if the resources cannot be released.
    fn cleanup(&self) -> StrataResult<()>;

    /// Create a layer, as a snapshot of `parent` when given.
    ///
    /// # Errors
    ///
    /// Returns an error if the layer cannot be created.
    fn create(&self, id: &str, parent: Option<&str>, opts: &CreateOpts) -> StrataResult<()>;

    /// Create a writable layer for a container's root filesystem.
    ///
    /// # Errors
    ///
    /// Returns an error if the layer cannot be created.
    fn create_read_write(
        &self,
        id: &str,
        parent: Option<&str>,
        opts: &CreateOpts,
    ) -> StrataResult<()> {
        self.create(id, parent, opts)
    }

    /// Remove a layer and everything nested inside it.
    ///
    /// # Errors
    ///
    /// Returns an error if the layer cannot be removed.
    fn remove(&self, id: &str) -> StrataResult<()>;

    /// Resolve the directory holding a layer's contents.
    ///
    /// # Errors
    ///
    /// Returns an error if the layer does not exist.
    fn get(&self, id: &str, mount_label: Option<&str>) -> StrataResult<PathBuf>;

    /// Release whatever [`GraphDriver::get`] acquired.
    ///
    /// # Errors
    ///
    /// Returns an error if the release fails.
    fn put(&self, id: &str) -> StrataResult<()>;

    /// Whether a layer exists.
    fn exists(&self, id: &str) -> bool;
}
