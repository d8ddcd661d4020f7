//! Human-readable byte sizes.
//!
//! Sizes follow the RAM-style grammar used by container storage options:
//! - "1024", "1024b" -> 1024 bytes
//! - "512k", "512KiB" -> 512 * 1024 bytes
//! - "10G", "10gb", "10 GiB" -> 10 * 1024^3 bytes
//! - "1.5g" -> 1.5 * 1024^3 bytes (truncated to whole bytes)
//!
//! Every unit is a power of 1024, regardless of the `i` marker.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{StrataError, StrataResult};

const KIB: u64 = 1024;
const MIB: u64 = KIB * 1024;
const GIB: u64 = MIB * 1024;
const TIB: u64 = GIB * 1024;
const PIB: u64 = TIB * 1024;

/// A byte count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ByteSize(u64);

impl ByteSize {
    /// Zero bytes.
    pub const ZERO: Self = Self(0);

    /// Create a size from a raw byte count.
    #[must_use]
    pub const fn bytes(bytes: u64) -> Self {
        Self(bytes)
    }

    /// Create a size from gibibytes.
    #[must_use]
    pub const fn gibibytes(gib: u64) -> Self {
        Self(gib * GIB)
    }

    /// Create a size from mebibytes.
    #[must_use]
    pub const fn mebibytes(mib: u64) -> Self {
        Self(mib * MIB)
    }

    /// The raw byte count.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Whether this is zero bytes.
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Parse a human-readable size.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::InvalidArgument`] for empty, negative,
    /// malformed or overflowing values.
    pub fn parse(s: &str) -> StrataResult<Self> {
        let invalid = || StrataError::invalid(format!("invalid size: '{s}'"));
        let trimmed = s.trim();

        let split = trimmed
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(trimmed.len());
        let (number, unit) = trimmed.split_at(split);

        if number.is_empty() || number.starts_with('.') || number.ends_with('.') {
            return Err(invalid());
        }
        let unit = unit.strip_prefix(' ').unwrap_or(unit).to_ascii_lowercase();
        let mut rest = unit.as_str();
        let multiplier = match rest.chars().next() {
            Some('k') => KIB,
            Some('m') => MIB,
            Some('g') => GIB,
            Some('t') => TIB,
            Some('p') => PIB,
            _ => 1,
        };
        if multiplier != 1 {
            rest = &rest[1..];
        }
        let rest = rest.strip_prefix('i').unwrap_or(rest);
        let rest = rest.strip_prefix('b').unwrap_or(rest);
        if !rest.is_empty() {
            return Err(invalid());
        }

        // Whole numbers are multiplied exactly; fractions truncate.
        let bytes = if number.contains('.') {
            let value: f64 = number.parse().map_err(|_| invalid())?;
            #[allow(clippy::cast_precision_loss)]
            let (total, ceiling) = (value * multiplier as f64, u64::MAX as f64);
            if !total.is_finite() || total >= ceiling {
                return Err(invalid());
            }
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let truncated = total as u64;
            truncated
        } else {
            number
                .parse::<u64>()
                .ok()
                .and_then(|n| n.checked_mul(multiplier))
                .ok_or_else(invalid)?
        };

        Ok(Self(bytes))
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const UNITS: [(u64, &str); 5] = [
            (PIB, "PiB"),
            (TIB, "TiB"),
            (GIB, "GiB"),
            (MIB, "MiB"),
            (KIB, "KiB"),
        ];

        for (scale, suffix) in UNITS {
            if self.0 >= scale {
                if self.0 % scale == 0 {
                    return write!(f, "{}{suffix}", self.0 / scale);
                }
                #[allow(clippy::cast_precision_loss)]
                let value = self.0 as f64 / scale as f64;
                return write!(f, "{value:.3}{suffix}");
            }
        }
        write!(f, "{}B", self.0)
    }
}

impl FromStr for ByteSize {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<u64> for ByteSize {
    fn from(bytes: u64) -> Self {
        Self(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_plain_bytes() {
        assert_eq!(ByteSize::parse("1024").unwrap().as_u64(), 1024);
        assert_eq!(ByteSize::parse("1024b").unwrap().as_u64(), 1024);
        assert_eq!(ByteSize::parse("0").unwrap(), ByteSize::ZERO);
    }

    #[test]
    fn parse_binary_units() {
        assert_eq!(ByteSize::parse("10G").unwrap().as_u64(), 10 * 1024 * 1024 * 1024);
        assert_eq!(ByteSize::parse("10g").unwrap().as_u64(), 10 * GIB);
        assert_eq!(ByteSize::parse("10GB").unwrap().as_u64(), 10 * GIB);
        assert_eq!(ByteSize::parse("10GiB").unwrap().as_u64(), 10 * GIB);
        assert_eq!(ByteSize::parse("512k").unwrap().as_u64(), 512 * 1024);
        assert_eq!(ByteSize::parse("1M").unwrap().as_u64(), MIB);
        assert_eq!(ByteSize::parse("2t").unwrap().as_u64(), 2 * TIB);
        assert_eq!(ByteSize::parse("1P").unwrap().as_u64(), PIB);
        assert_eq!(ByteSize::parse("10 g").unwrap().as_u64(), 10 * GIB);
    }

    #[test]
    fn parse_fractions_truncate() {
        assert_eq!(ByteSize::parse("1.5g").unwrap().as_u64(), GIB + GIB / 2);
        assert_eq!(ByteSize::parse("0.5k").unwrap().as_u64(), 512);
    }

    #[test]
    fn parse_rejects_garbage() {
        for bad in ["", "g", "-1g", "10x", "10gg", "1..5g", ".5g", "5.g", "ten", "10 gibibytes"] {
            assert!(ByteSize::parse(bad).is_err(), "{bad} should be rejected");
        }
        assert!(ByteSize::parse("99999999999p").is_err());
    }

    #[test]
    fn display_sizes() {
        assert_eq!(ByteSize::gibibytes(10).to_string(), "10GiB");
        assert_eq!(ByteSize::mebibytes(512).to_string(), "512MiB");
        assert_eq!(ByteSize::bytes(1024).to_string(), "1KiB");
        assert_eq!(ByteSize::bytes(500).to_string(), "500B");
        assert_eq!(ByteSize::bytes(GIB + GIB / 2).to_string(), "1.500GiB");
    }

    proptest::proptest! {
        #[test]
        fn gigabyte_suffix_is_binary(n in 0u64..1_000_000) {
            proptest::prop_assert_eq!(ByteSize::parse(&format!("{n}G")).unwrap().as_u64(), n * GIB);
            proptest::prop_assert_eq!(ByteSize::parse(&format!("{n}gb")).unwrap().as_u64(), n * GIB);
        }

        #[test]
        fn plain_numbers_are_bytes(n in proptest::num::u64::ANY) {
            proptest::prop_assert_eq!(ByteSize::parse(&n.to_string()).map(ByteSize::as_u64).ok(), Some(n));
        }
    }
}
