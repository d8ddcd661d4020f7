//! Storage option parsing shared by all backends.
//!
//! Options arrive as `key=value` strings, either from the engine's
//! configuration (`--storage-opt btrfs.min_space=10G`) or per layer.

use crate::error::{StrataError, StrataResult};

/// Split a `key=value` option.
///
/// Both halves are trimmed and the key is lower-cased. Only the first `=`
/// separates, so values may contain `=`.
///
/// # Errors
///
/// Returns [`StrataError::InvalidArgument`] if there is no `=`.
pub fn parse_key_value(option: &str) -> StrataResult<(String, String)> {
    let (key, value) = option
        .split_once('=')
        .ok_or_else(|| StrataError::invalid(format!("unable to parse key/value option: {option}")))?;

    Ok((key.trim().to_ascii_lowercase(), value.trim().to_string()))
}

/// Strip a backend prefix (`btrfs.`) from an option key, if present.
#[must_use]
pub fn strip_driver_prefix<'a>(key: &'a str, driver: &str) -> &'a str {
    key.strip_prefix(driver)
        .and_then(|rest| rest.strip_prefix('.'))
        .unwrap_or(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_first_equals() {
        assert_eq!(
            parse_key_value(" Size = 10G ").unwrap(),
            ("size".to_string(), "10G".to_string())
        );
        assert_eq!(
            parse_key_value("label=a=b").unwrap(),
            ("label".to_string(), "a=b".to_string())
        );
    }

    #[test]
    fn rejects_missing_separator() {
        let err = parse_key_value("min_space").unwrap_err();
        assert!(matches!(err, StrataError::InvalidArgument { .. }));
    }

    #[test]
    fn strips_driver_prefix() {
        assert_eq!(strip_driver_prefix("btrfs.min_space", "btrfs"), "min_space");
        assert_eq!(strip_driver_prefix("min_space", "btrfs"), "min_space");
        assert_eq!(strip_driver_prefix("btrfsmin_space", "btrfs"), "btrfsmin_space");
        assert_eq!(strip_driver_prefix("overlay.size", "btrfs"), "overlay.size");
    }
}
