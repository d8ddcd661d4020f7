//! Driver configuration.

use std::path::PathBuf;

use strata_common::paths::{STRATA_ROOT, rootless_root};

use super::DRIVER_NAME;
use crate::namespace::IdentityMapping;

/// Everything needed to construct a [`super::Driver`].
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Data root; the driver lives in `<root>/btrfs`.
    pub root: PathBuf,
    /// `key=value` construction options.
    pub options: Vec<String>,
    /// Remapping of the container root, empty when not remapped.
    pub id_mapping: IdentityMapping,
    /// Whether the engine runs without privileges.
    pub rootless: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            root: STRATA_ROOT.clone(),
            options: Vec::new(),
            id_mapping: IdentityMapping::default(),
            rootless: false,
        }
    }
}

impl DriverConfig {
    /// Configuration for an unprivileged engine, rooted in the user's data directory.
    #[must_use]
    pub fn rootless() -> Self {
        Self {
            root: rootless_root(),
            rootless: true,
            ..Self::default()
        }
    }

    /// Set the data root.
    #[must_use]
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    /// Add a construction option.
    #[must_use]
    pub fn with_option(mut self, option: impl Into<String>) -> Self {
        self.options.push(option.into());
        self
    }

    /// Set the identity mapping.
    #[must_use]
    pub fn with_id_mapping(mut self, id_mapping: IdentityMapping) -> Self {
        self.id_mapping = id_mapping;
        self
    }

    /// The driver's home directory.
    #[must_use]
    pub fn home(&self) -> PathBuf {
        self.root.join(DRIVER_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::IdMap;

    #[test]
    fn default_config() {
        let config = DriverConfig::default();
        assert!(!config.rootless);
        assert!(config.options.is_empty());
        assert!(config.id_mapping.is_empty());
        assert!(config.home().ends_with("btrfs"));
    }

    #[test]
    fn rootless_config() {
        let config = DriverConfig::rootless();
        assert!(config.rootless);
        assert_eq!(config.home(), rootless_root().join("btrfs"));
    }

    #[test]
    fn builder_pattern() {
        let mapping = IdentityMapping::new(
            vec![IdMap::new(0, 100_000, 65536)],
            vec![IdMap::new(0, 100_000, 65536)],
        );
        let config = DriverConfig::default()
            .with_root("/custom/root")
            .with_option("btrfs.min_space=1G")
            .with_id_mapping(mapping.clone());

        assert_eq!(config.home(), PathBuf::from("/custom/root/btrfs"));
        assert_eq!(config.options, vec!["btrfs.min_space=1G".to_string()]);
        assert_eq!(config.id_mapping, mapping);
    }
}
