//! User namespace support.
//!
//! Layers created by a daemon running with a remapped root must be owned by
//! the remapped root, and some kernel operations are refused to
//! unprivileged callers inside a user namespace.

mod idmap;

pub use idmap::{IdMap, IdentityMapping};

use once_cell::sync::Lazy;

static IN_USER_NS: Lazy<bool> = Lazy::new(|| {
    std::fs::read_to_string("/proc/self/uid_map")
        .map(|map| !is_initial_uid_map(&map))
        .unwrap_or(false)
});

/// Whether this process runs inside a non-initial user namespace.
///
/// The answer is computed once and cached.
#[must_use]
pub fn running_in_user_ns() -> bool {
    *IN_USER_NS
}

/// The initial namespace maps the full 32-bit range onto itself.
fn is_initial_uid_map(map: &str) -> bool {
    let fields: Vec<&str> = map.split_whitespace().collect();
    fields == ["0", "0", "4294967295"]
}

/// Check if running as root.
#[must_use]
pub fn is_root() -> bool {
    rustix::process::geteuid().is_root()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_namespace_map() {
        assert!(is_initial_uid_map("         0          0 4294967295\n"));
        assert!(!is_initial_uid_map("         0       1000          1\n"));
        assert!(!is_initial_uid_map(
            "         0       1000          1\n         1     100000      65536\n"
        ));
        assert!(!is_initial_uid_map(""));
    }

    #[test]
    fn user_ns_probe_is_stable() {
        assert_eq!(running_in_user_ns(), running_in_user_ns());
    }
}
