//! Btrfs kernel interface.
//!
//! Everything here talks to the filesystem through ioctls on directory
//! handles; nothing shells out to `btrfs-progs`.

pub mod ioctl;
pub mod quota;
pub mod subvolume;

pub use quota::{QuotaState, QuotaStatus};
pub use subvolume::is_subvolume;
