//! Layer ID validation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{StrataError, StrataResult};

/// A validated layer ID.
///
/// Layer IDs are opaque to the backend, but each one becomes a single path
/// component under the backend's home directory, so an ID must:
/// - Be 1-255 bytes long
/// - Not contain `/` or NUL
/// - Not be `.` or `..`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LayerId(String);

impl LayerId {
    /// Maximum length of a layer ID in bytes (one path component).
    pub const MAX_LENGTH: usize = 255;

    /// Create a new layer ID, validating the format.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::InvalidArgument`] if the ID cannot be used as a
    /// single path component.
    pub fn new(id: impl Into<String>) -> StrataResult<Self> {
        let id = id.into();
        Self::validate(&id)?;
        Ok(Self(id))
    }

    /// Get the layer ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(id: &str) -> StrataResult<()> {
        if id.is_empty() || id.len() > Self::MAX_LENGTH {
            return Err(StrataError::invalid(format!(
                "layer ID must be 1-{} bytes, got {}",
                Self::MAX_LENGTH,
                id.len()
            )));
        }

        if id == "." || id == ".." || id.contains(['/', '\0']) {
            return Err(StrataError::invalid(format!("invalid layer ID: {id:?}")));
        }

        Ok(())
    }

    /// Returns a short version of the ID (first 12 characters).
    #[must_use]
    pub fn short(&self) -> &str {
        self.0
            .char_indices()
            .nth(12)
            .map_or(self.0.as_str(), |(idx, _)| &self.0[..idx])
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for LayerId {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for LayerId {
    type Error = StrataError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<LayerId> for String {
    fn from(id: LayerId) -> Self {
        id.0
    }
}

impl AsRef<str> for LayerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_layer_ids() {
        assert!(LayerId::new("abc123").is_ok());
        assert!(LayerId::new("f1e2d3c4b5a6-init").is_ok());
        assert!(LayerId::new("my_layer.v2").is_ok());
        assert!(LayerId::new("a".repeat(255)).is_ok());
    }

    #[test]
    fn invalid_layer_ids() {
        assert!(LayerId::new("").is_err());
        assert!(LayerId::new(".").is_err());
        assert!(LayerId::new("..").is_err());
        assert!(LayerId::new("a/b").is_err());
        assert!(LayerId::new("nul\0byte").is_err());
        assert!(LayerId::new("a".repeat(256)).is_err());
    }

    #[test]
    fn short_id() {
        let id = LayerId::new("0123456789abcdef").unwrap();
        assert_eq!(id.short(), "0123456789ab");
        let id = LayerId::new("abc").unwrap();
        assert_eq!(id.short(), "abc");
    }

    #[test]
    fn serde_rejects_invalid() {
        let id: LayerId = serde_json::from_str("\"layer-1\"").unwrap();
        assert_eq!(id.as_str(), "layer-1");
        assert!(serde_json::from_str::<LayerId>("\"../escape\"").is_err());
    }
}
