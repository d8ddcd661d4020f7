//! Common error types for Strata storage backends.

use std::io;
use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using [`StrataError`].
pub type StrataResult<T> = Result<T, StrataError>;

/// Errors surfaced by storage backends.
#[derive(Error, Diagnostic, Debug)]
pub enum StrataError {
    /// The backend cannot run on this host or filesystem.
    ///
    /// Backend selection treats this as "try the next driver", not as a failure.
    #[error("Driver not supported: {reason}")]
    #[diagnostic(
        code(strata::unsupported),
        help("The storage root must live on a btrfs filesystem")
    )]
    Unsupported {
        /// Why the backend is not applicable.
        reason: String,
    },

    /// Malformed or out-of-range option, size or layer ID.
    #[error("Invalid argument: {message}")]
    #[diagnostic(code(strata::invalid_argument))]
    InvalidArgument {
        /// Description of the rejected value.
        message: String,
    },

    /// A kernel control operation returned a non-zero error code.
    #[error("{operation} failed for {}: {source}", path.display())]
    #[diagnostic(code(strata::backend))]
    Backend {
        /// The control operation that failed.
        operation: &'static str,
        /// The path the operation was issued against.
        path: PathBuf,
        /// The OS error translated from the returned error code.
        #[source]
        source: io::Error,
    },

    /// Subvolume destroy was refused while running unprivileged in a user namespace.
    #[error(
        "failed to delete subvolume {} without root (hint: remount btrfs with the \
         \"user_subvol_rm_allowed\" option, or update the kernel to >= 4.18, or change \
         the storage driver to \"fuse-overlayfs\"): {source}",
        path.display()
    )]
    #[diagnostic(
        code(strata::permission_denied),
        help("mount -o remount,user_subvol_rm_allowed <mountpoint>")
    )]
    PermissionDenied {
        /// The subvolume that could not be destroyed.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: Box<StrataError>,
    },

    /// A layer, quota record or quota group does not exist.
    #[error("Not found: {what}")]
    #[diagnostic(code(strata::not_found))]
    NotFound {
        /// What was looked up.
        what: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(strata::io))]
    Io(#[from] io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    #[diagnostic(code(strata::serialization))]
    Serialization(String),
}

impl StrataError {
    /// Build an [`StrataError::InvalidArgument`] from anything printable.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Wrap the raw error code of a failed control operation.
    pub fn backend(operation: &'static str, path: impl Into<PathBuf>, errno: i32) -> Self {
        Self::Backend {
            operation,
            path: path.into(),
            source: io::Error::from_raw_os_error(errno),
        }
    }

    /// The OS error code carried by this error, if any.
    #[must_use]
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::Backend { source, .. } | Self::Io(source) => source.raw_os_error(),
            Self::PermissionDenied { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }

    /// Whether this error means the target does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Backend { source, .. } | Self::Io(source) => {
                source.kind() == io::ErrorKind::NotFound
            }
            _ => false,
        }
    }
}

impl From<serde_json::Error> for StrataError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
