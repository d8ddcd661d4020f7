//! Driver-wide and per-layer options.

use std::collections::BTreeMap;

use strata_common::options::{parse_key_value, strip_driver_prefix};
use strata_common::{ByteSize, StrataError, StrataResult};

use super::DRIVER_NAME;

/// Options fixed when the driver is constructed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverOptions {
    /// Smallest per-layer quota a caller may request. Setting it turns quota on.
    pub min_space: Option<ByteSize>,
}

impl DriverOptions {
    /// Parse `key=value` construction options.
    ///
    /// Keys are case-insensitive and may carry the `btrfs.` prefix.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::InvalidArgument`] for a malformed option,
    /// an unknown key or an unparsable size.
    pub fn parse<S: AsRef<str>>(options: &[S]) -> StrataResult<Self> {
        let mut parsed = Self::default();

        for option in options {
            let (key, value) = parse_key_value(option.as_ref())?;
            match strip_driver_prefix(&key, DRIVER_NAME) {
                "min_space" => parsed.min_space = Some(ByteSize::parse(&value)?),
                _ => return Err(StrataError::invalid(format!("unknown option {key}"))),
            }
        }

        Ok(parsed)
    }

    /// Whether quota must be enabled as soon as the driver starts.
    #[must_use]
    pub const fn wants_quota(&self) -> bool {
        self.min_space.is_some()
    }

    /// The floor in bytes; zero when unset.
    #[must_use]
    pub fn floor(&self) -> u64 {
        self.min_space.map_or(0, ByteSize::as_u64)
    }
}

/// Options for a single layer, from `CreateOpts::storage_opt`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LayerOptions {
    /// Quota ceiling on the layer's referenced bytes.
    pub size: Option<ByteSize>,
}

impl LayerOptions {
    /// Parse per-layer options. Only `size` is understood.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::InvalidArgument`] for an unknown key or an
    /// unparsable size.
    pub fn parse(storage_opt: &BTreeMap<String, String>) -> StrataResult<Self> {
        let mut parsed = Self::default();

        for (key, value) in storage_opt {
            match key.to_ascii_lowercase().as_str() {
                "size" => parsed.size = Some(ByteSize::parse(value)?),
                other => return Err(StrataError::invalid(format!("unknown option {other}"))),
            }
        }

        Ok(parsed)
    }

    /// Check the requested size against the driver's floor.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::InvalidArgument`] if the size is zero or below
    /// a configured floor.
    pub fn validate(&self, driver: &DriverOptions) -> StrataResult<()> {
        let Some(size) = self.size else {
            return Ok(());
        };

        if size.is_zero() {
            return Err(StrataError::invalid(format!("btrfs: invalid storage size: {size}")));
        }
        match driver.min_space {
            Some(min_space) if !min_space.is_zero() && size < min_space => Err(StrataError::invalid(
                format!("btrfs: storage size cannot be less than {min_space}"),
            )),
            _ => Ok(()),
        }
    }
}
