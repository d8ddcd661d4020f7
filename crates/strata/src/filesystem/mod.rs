//! Filesystem operations around the driver's home directory.
//!
//! This module handles:
//! - Filesystem type detection
//! - Mount point detection and private self-bind mounts
//! - Directory creation with ownership

mod directory;
mod magic;
mod mounts;

pub use directory::mkdir_all_and_chown;
pub use magic::{BTRFS_SUPER_MAGIC, fs_magic, is_btrfs};
pub use mounts::{is_mountpoint, make_private_mount, unmount};
