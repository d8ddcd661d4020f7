//! SELinux file labels.

use std::fmt;
use std::path::Path;
use std::process::Command;
use std::str::FromStr;

use strata_common::{StrataError, StrataResult};

/// An SELinux context as passed in `--mount-label`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountLabel {
    /// User component.
    pub user: String,
    /// Role component.
    pub role: String,
    /// Type component.
    pub type_: String,
    /// MLS/MCS level, which may itself contain `:`.
    pub level: Option<String>,
}

impl MountLabel {
    /// Parse a context string (`user:role:type[:level]`).
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::InvalidArgument`] if a component is missing or empty.
    pub fn parse(context: &str) -> StrataResult<Self> {
        let mut parts = context.splitn(4, ':');
        let mut next = || {
            parts
                .next()
                .filter(|part| !part.is_empty())
                .map(String::from)
                .ok_or_else(|| StrataError::invalid(format!("invalid SELinux context: {context}")))
        };

        let user = next()?;
        let role = next()?;
        let type_ = next()?;
        let level = next().ok();

        Ok(Self {
            user,
            role,
            type_,
            level,
        })
    }
}

impl fmt::Display for MountLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.user, self.role, self.type_)?;
        if let Some(level) = &self.level {
            write!(f, ":{level}")?;
        }
        Ok(())
    }
}

impl FromStr for MountLabel {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Check if SELinux is enabled.
#[cfg(target_os = "linux")]
#[must_use]
pub fn is_enabled() -> bool {
    Path::new("/sys/fs/selinux/enforce").exists()
}

/// SELinux is Linux-only.
#[cfg(not(target_os = "linux"))]
#[must_use]
pub fn is_enabled() -> bool {
    false
}

/// Label `path` and everything below it with `label`.
///
/// No label, an empty label, or a host without SELinux is a no-op.
///
/// # Errors
///
/// Returns [`StrataError::InvalidArgument`] for a malformed label, or an
/// I/O error if `chcon` cannot be run or fails.
pub fn relabel(path: &Path, label: Option<&str>) -> StrataResult<()> {
    let Some(label) = label.filter(|l| !l.is_empty()) else {
        return Ok(());
    };
    let label = MountLabel::parse(label)?;

    if !is_enabled() {
        tracing::debug!(path = %path.display(), %label, "SELinux not enabled, skipping relabel");
        return Ok(());
    }

    let output = Command::new("chcon")
        .arg("-R")
        .arg(label.to_string())
        .arg(path)
        .output()?;

    if !output.status.success() {
        return Err(StrataError::Io(std::io::Error::other(format!(
            "chcon {label} {} failed: {}",
            path.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        ))));
    }

    tracing::debug!(path = %path.display(), %label, "Relabeled");
    Ok(())
}
