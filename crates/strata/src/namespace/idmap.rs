//! UID/GID remapping tables.

use std::fmt;
use std::fs;
use std::path::Path;

use strata_common::{StrataError, StrataResult};

/// UID/GID mapping entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdMap {
    /// Container ID (start).
    pub container_id: u32,
    /// Host ID (start).
    pub host_id: u32,
    /// Range size.
    pub size: u32,
}

impl IdMap {
    /// Create a new ID mapping.
    #[must_use]
    pub const fn new(container_id: u32, host_id: u32, size: u32) -> Self {
        Self {
            container_id,
            host_id,
            size,
        }
    }

    /// Translate a container ID into this range, if it falls inside it.
    fn to_host(&self, id: u32) -> Option<u32> {
        let offset = id.checked_sub(self.container_id)?;
        if offset < self.size {
            self.host_id.checked_add(offset)
        } else {
            None
        }
    }
}

impl fmt::Display for IdMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.container_id, self.host_id, self.size)
    }
}

/// The remapping used when the engine runs with a remapped root.
///
/// An empty mapping means IDs are not remapped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityMapping {
    /// UID mappings.
    pub uid_maps: Vec<IdMap>,
    /// GID mappings.
    pub gid_maps: Vec<IdMap>,
}

impl IdentityMapping {
    /// Create a mapping from explicit tables.
    #[must_use]
    pub fn new(uid_maps: Vec<IdMap>, gid_maps: Vec<IdMap>) -> Self {
        Self { uid_maps, gid_maps }
    }

    /// Whether no remapping is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.uid_maps.is_empty() && self.gid_maps.is_empty()
    }

    /// Host UID and GID of the container's root user.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::InvalidArgument`] if a non-empty table does not
    /// map ID 0.
    pub fn root_pair(&self) -> StrataResult<(u32, u32)> {
        let uid = Self::to_host(0, &self.uid_maps, "uid")?;
        let gid = Self::to_host(0, &self.gid_maps, "gid")?;
        Ok((uid, gid))
    }

    fn to_host(id: u32, maps: &[IdMap], kind: &str) -> StrataResult<u32> {
        if maps.is_empty() {
            return Ok(id);
        }
        maps.iter()
            .find_map(|map| map.to_host(id))
            .ok_or_else(|| StrataError::invalid(format!("container {kind} {id} is not mapped")))
    }

    /// Build the mapping for a remap user from `/etc/subuid` and `/etc/subgid`.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::InvalidArgument`] if either file has no range
    /// for the user.
    pub fn from_subordinate_ranges(user: &str) -> StrataResult<Self> {
        Self::from_subid_files(user, Path::new("/etc/subuid"), Path::new("/etc/subgid"))
    }

    /// Build the mapping for `user` from explicit subordinate ID files.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::InvalidArgument`] if either file has no range
    /// for the user.
    pub fn from_subid_files(user: &str, subuid: &Path, subgid: &Path) -> StrataResult<Self> {
        let uid_maps = Self::read_subid(subuid, user)?;
        let gid_maps = Self::read_subid(subgid, user)?;

        if uid_maps.is_empty() || gid_maps.is_empty() {
            return Err(StrataError::invalid(format!(
                "no subordinate ID ranges found for user {user}"
            )));
        }

        Ok(Self { uid_maps, gid_maps })
    }

    /// Read every subordinate range of `user`, laid out contiguously from container ID 0.
    fn read_subid(path: &Path, user: &str) -> StrataResult<Vec<IdMap>> {
        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut maps = Vec::new();
        let mut next_container_id: u32 = 0;

        for line in content.lines() {
            let parts: Vec<&str> = line.trim().split(':').collect();
            if parts.len() < 3 || parts[0] != user {
                continue;
            }
            if let (Ok(start), Ok(count)) = (parts[1].parse::<u32>(), parts[2].parse::<u32>()) {
                maps.push(IdMap::new(next_container_id, start, count));
                next_container_id = next_container_id.saturating_add(count);
            }
        }

        Ok(maps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_map_format() {
        let map = IdMap::new(0, 1000, 1);
        assert_eq!(map.to_string(), "0 1000 1");
    }

    #[test]
    fn empty_mapping_is_identity() {
        let mapping = IdentityMapping::default();
        assert!(mapping.is_empty());
        assert_eq!(mapping.root_pair().unwrap(), (0, 0));
    }

    #[test]
    fn remapped_root_pair() {
        let mapping = IdentityMapping::new(
            vec![IdMap::new(0, 100_000, 65536)],
            vec![IdMap::new(0, 200_000, 65536)],
        );
        assert_eq!(mapping.root_pair().unwrap(), (100_000, 200_000));
    }

    #[test]
    fn unmapped_root_is_rejected() {
        let mapping = IdentityMapping::new(vec![IdMap::new(1, 100_000, 10)], Vec::new());
        assert!(mapping.root_pair().is_err());
    }

    #[test]
    fn reads_subordinate_ranges() {
        let dir = tempfile::tempdir().unwrap();
        let subuid = dir.path().join("subuid");
        let subgid = dir.path().join("subgid");
        fs::write(&subuid, "other:1000:10\nstrata:100000:65536\nstrata:300000:10\n").unwrap();
        fs::write(&subgid, "strata:200000:65536\n").unwrap();

        let mapping = IdentityMapping::from_subid_files("strata", &subuid, &subgid).unwrap();
        assert_eq!(
            mapping.uid_maps,
            vec![IdMap::new(0, 100_000, 65536), IdMap::new(65536, 300_000, 10)]
        );
        assert_eq!(mapping.gid_maps, vec![IdMap::new(0, 200_000, 65536)]);
        assert_eq!(mapping.root_pair().unwrap(), (100_000, 200_000));
    }

    #[test]
    fn missing_user_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let subuid = dir.path().join("subuid");
        fs::write(&subuid, "other:1000:10\n").unwrap();

        let err = IdentityMapping::from_subid_files("strata", &subuid, &dir.path().join("absent"))
            .unwrap_err();
        assert!(matches!(err, StrataError::InvalidArgument { .. }));
    }
}
