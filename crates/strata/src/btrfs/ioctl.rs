//! Btrfs control requests.
//!
//! Every request is a fixed-layout `#[repr(C)]` structure matching
//! `<linux/btrfs.h>`, issued with `ioctl(2)` against an open directory.
//! Opcodes are derived from the structure sizes at compile time, so a layout
//! mistake changes the opcode and the kernel rejects the call with `ENOTTY`
//! instead of reading past the buffer.
//!
//! Names are bounded by fixed buffers. Constructors reject names that do not
//! fit rather than truncating them, so a long name can never turn into a
//! request against a different subvolume.

use std::ffi::OsStr;
use std::io;
use std::marker::PhantomData;
use std::mem::size_of;
use std::os::fd::{AsRawFd, BorrowedFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use rustix::fs::{Mode, OFlags};
use strata_common::{StrataError, StrataResult};

/// `BTRFS_IOCTL_MAGIC`.
pub const BTRFS_IOCTL_MAGIC: u8 = 0x94;
/// Longest name accepted by `btrfs_ioctl_vol_args`, excluding the NUL.
pub const BTRFS_PATH_NAME_MAX: usize = 4087;
/// Longest name accepted by `btrfs_ioctl_vol_args_v2`, excluding the NUL.
pub const BTRFS_SUBVOL_NAME_MAX: usize = 4039;
/// Size of the path buffer in `btrfs_ioctl_ino_lookup_args`.
pub const BTRFS_INO_LOOKUP_PATH_MAX: usize = 4080;
/// Inode number of every subvolume's root directory.
pub const BTRFS_FIRST_FREE_OBJECTID: u64 = 256;
/// Tree holding quota group items.
pub const BTRFS_QUOTA_TREE_OBJECTID: u64 = 8;
/// Key type of the quota status item.
pub const BTRFS_QGROUP_STATUS_KEY: u32 = 240;
/// Key type of a quota group limit item.
pub const BTRFS_QGROUP_LIMIT_KEY: u32 = 244;
/// Limit flag: `max_rfer` is set.
pub const BTRFS_QGROUP_LIMIT_MAX_RFER: u64 = 1 << 0;
/// `btrfs_ioctl_quota_ctl_args.cmd` to enable quota.
pub const BTRFS_QUOTA_CTL_ENABLE: u64 = 1;

const SEARCH_KEY_SIZE: usize = size_of::<SearchKey>();
/// Result buffer size of `btrfs_ioctl_search_args`.
pub const BTRFS_SEARCH_ARGS_BUFSIZE: usize = 4096 - SEARCH_KEY_SIZE;

#[cfg(any(
    target_arch = "powerpc",
    target_arch = "powerpc64",
    target_arch = "mips",
    target_arch = "mips64",
    target_arch = "sparc",
    target_arch = "sparc64"
))]
mod dir {
    pub const NONE: u32 = 1;
    pub const READ: u32 = 2;
    pub const WRITE: u32 = 4;
    pub const SIZE_BITS: u32 = 13;
}

#[cfg(not(any(
    target_arch = "powerpc",
    target_arch = "powerpc64",
    target_arch = "mips",
    target_arch = "mips64",
    target_arch = "sparc",
    target_arch = "sparc64"
)))]
mod dir {
    pub const NONE: u32 = 0;
    pub const READ: u32 = 2;
    pub const WRITE: u32 = 1;
    pub const SIZE_BITS: u32 = 14;
}

#[allow(clippy::cast_possible_truncation)]
const fn ioc(direction: u32, nr: u8, size: usize) -> u32 {
    assert!(size < (1 << dir::SIZE_BITS), "request too large for an ioctl opcode");
    (direction << (16 + dir::SIZE_BITS))
        | ((size as u32) << 16)
        | ((BTRFS_IOCTL_MAGIC as u32) << 8)
        | nr as u32
}

/// A btrfs control operation taking a `T` argument.
#[derive(Debug)]
pub struct Command<T> {
    opcode: u32,
    name: &'static str,
    _arg: PhantomData<fn(&mut T)>,
}

impl<T> Command<T> {
    const fn new(direction: u32, nr: u8, size: usize, name: &'static str) -> Self {
        Self {
            opcode: ioc(direction, nr, size),
            name,
            _arg: PhantomData,
        }
    }

    const fn none(nr: u8, name: &'static str) -> Self {
        Self::new(dir::NONE, nr, 0, name)
    }

    const fn write(nr: u8, name: &'static str) -> Self {
        Self::new(dir::WRITE, nr, size_of::<T>(), name)
    }

    const fn read(nr: u8, name: &'static str) -> Self {
        Self::new(dir::READ, nr, size_of::<T>(), name)
    }

    const fn read_write(nr: u8, name: &'static str) -> Self {
        Self::new(dir::READ | dir::WRITE, nr, size_of::<T>(), name)
    }

    /// The numeric request code.
    #[must_use]
    pub const fn opcode(&self) -> u32 {
        self.opcode
    }

    /// The kernel's name for this request.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Issue the request against an open directory.
    ///
    /// # Errors
    ///
    /// Returns the OS error reported by the kernel.
    pub fn call(&self, dir: BorrowedFd<'_>, arg: &mut T) -> io::Result<()> {
        tracing::trace!(request = self.name, opcode = format_args!("{:#x}", self.opcode), "ioctl");

        // SAFETY: `arg` is an exclusively borrowed `#[repr(C)]` value whose
        // size is encoded in `opcode`, so the kernel reads and writes only
        // within it. The descriptor stays open for the duration of the call.
        #[allow(unsafe_code)]
        let ret = unsafe { libc::ioctl(dir.as_raw_fd(), self.opcode as _, std::ptr::from_mut(arg)) };
        if ret < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    /// Issue the request, wrapping failure as [`StrataError::Backend`].
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Backend`] naming this request and `path`.
    pub fn call_at(&self, dir: BorrowedFd<'_>, path: &Path, arg: &mut T) -> StrataResult<()> {
        self.call(dir, arg).map_err(|source| StrataError::Backend {
            operation: self.name,
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Create an empty subvolume named in the argument inside the directory.
pub const SUBVOL_CREATE: Command<VolArgs> = Command::write(14, "BTRFS_IOC_SUBVOL_CREATE");
/// Destroy the subvolume or snapshot named in the argument.
pub const SNAP_DESTROY: Command<VolArgs> = Command::write(15, "BTRFS_IOC_SNAP_DESTROY");
/// Snapshot the subvolume open at `fd` into the directory.
pub const SNAP_CREATE_V2: Command<VolArgsV2> = Command::write(23, "BTRFS_IOC_SNAP_CREATE_V2");
/// Search a btrfs tree.
pub const TREE_SEARCH: Command<SearchArgs> = Command::read_write(17, "BTRFS_IOC_TREE_SEARCH");
/// Resolve an object id to its owning tree.
pub const INO_LOOKUP: Command<InoLookupArgs> = Command::read_write(18, "BTRFS_IOC_INO_LOOKUP");
/// Enable or disable quota.
pub const QUOTA_CTL: Command<QuotaCtlArgs> = Command::read_write(40, "BTRFS_IOC_QUOTA_CTL");
/// Create (`create = 1`) or destroy (`create = 0`) a quota group.
pub const QGROUP_CREATE: Command<QgroupCreateArgs> = Command::write(42, "BTRFS_IOC_QGROUP_CREATE");
/// Set the limits of a quota group. The kernel declares this one as a read.
pub const QGROUP_LIMIT: Command<QgroupLimitArgs> = Command::read(43, "BTRFS_IOC_QGROUP_LIMIT");
/// Wait for a quota rescan to finish.
pub const QUOTA_RESCAN_WAIT: Command<QuotaRescanArgs> = Command::none(46, "BTRFS_IOC_QUOTA_RESCAN_WAIT");

fn copy_name<const N: usize>(buf: &mut [u8; N], name: &OsStr) -> StrataResult<()> {
    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes.contains(&0) {
        return Err(StrataError::invalid(format!("invalid subvolume name: {name:?}")));
    }
    // The last byte stays NUL.
    if bytes.len() >= N {
        return Err(StrataError::invalid(format!(
            "subvolume name is {} bytes, the limit is {}",
            bytes.len(),
            N - 1
        )));
    }
    buf[..bytes.len()].copy_from_slice(bytes);
    Ok(())
}

/// `struct btrfs_ioctl_vol_args`.
#[repr(C)]
#[derive(Debug)]
pub struct VolArgs {
    /// Unused by create and destroy.
    pub fd: i64,
    /// NUL-terminated subvolume name.
    pub name: [u8; BTRFS_PATH_NAME_MAX + 1],
}

impl VolArgs {
    /// Arguments naming a subvolume.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::InvalidArgument`] if the name is empty,
    /// contains NUL, or exceeds [`BTRFS_PATH_NAME_MAX`] bytes.
    pub fn named(name: impl AsRef<OsStr>) -> StrataResult<Self> {
        let mut args = Self {
            fd: 0,
            name: [0; BTRFS_PATH_NAME_MAX + 1],
        };
        copy_name(&mut args.name, name.as_ref())?;
        Ok(args)
    }
}

/// `struct btrfs_ioctl_vol_args_v2`.
#[repr(C)]
#[derive(Debug)]
pub struct VolArgsV2 {
    /// Source subvolume for snapshots.
    pub fd: i64,
    /// Transaction id, filled in by async snapshots.
    pub transid: u64,
    /// `BTRFS_SUBVOL_*` flags.
    pub flags: u64,
    /// Size and qgroup-inherit union, unused here.
    pub unused: [u64; 4],
    /// NUL-terminated snapshot name.
    pub name: [u8; BTRFS_SUBVOL_NAME_MAX + 1],
}

impl VolArgsV2 {
    /// Arguments snapshotting the subvolume open at `source` as `name`.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::InvalidArgument`] if the name is empty,
    /// contains NUL, or exceeds [`BTRFS_SUBVOL_NAME_MAX`] bytes.
    pub fn snapshot(source: BorrowedFd<'_>, name: impl AsRef<OsStr>) -> StrataResult<Self> {
        let mut args = Self {
            fd: i64::from(source.as_raw_fd()),
            transid: 0,
            flags: 0,
            unused: [0; 4],
            name: [0; BTRFS_SUBVOL_NAME_MAX + 1],
        };
        copy_name(&mut args.name, name.as_ref())?;
        Ok(args)
    }
}

/// `struct btrfs_ioctl_ino_lookup_args`.
#[repr(C)]
#[derive(Debug)]
pub struct InoLookupArgs {
    /// Tree to search; zero means the tree of the open directory. Filled in on return.
    pub treeid: u64,
    /// Object to resolve.
    pub objectid: u64,
    /// Path of the object inside its tree, filled in on return.
    pub name: [u8; BTRFS_INO_LOOKUP_PATH_MAX],
}

impl InoLookupArgs {
    /// Look up the tree owning `objectid` in the directory's own subvolume.
    #[must_use]
    pub const fn object(objectid: u64) -> Self {
        Self {
            treeid: 0,
            objectid,
            name: [0; BTRFS_INO_LOOKUP_PATH_MAX],
        }
    }
}

/// `struct btrfs_ioctl_search_key`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchKey {
    /// Tree to search.
    pub tree_id: u64,
    /// Lowest object id.
    pub min_objectid: u64,
    /// Highest object id.
    pub max_objectid: u64,
    /// Lowest key offset.
    pub min_offset: u64,
    /// Highest key offset.
    pub max_offset: u64,
    /// Lowest transaction id.
    pub min_transid: u64,
    /// Highest transaction id.
    pub max_transid: u64,
    /// Lowest key type.
    pub min_type: u32,
    /// Highest key type.
    pub max_type: u32,
    /// Items wanted; on return, items found.
    pub nr_items: u32,
    /// Padding.
    pub unused: u32,
    /// Reserved.
    pub unused1: u64,
    /// Reserved.
    pub unused2: u64,
    /// Reserved.
    pub unused3: u64,
    /// Reserved.
    pub unused4: u64,
}

impl SearchKey {
    /// Every item of one key type in a tree.
    #[must_use]
    pub const fn items_of_type(tree_id: u64, item_type: u32) -> Self {
        Self {
            tree_id,
            min_objectid: 0,
            max_objectid: u64::MAX,
            min_offset: 0,
            max_offset: u64::MAX,
            min_transid: 0,
            max_transid: u64::MAX,
            min_type: item_type,
            max_type: item_type,
            nr_items: 4096,
            unused: 0,
            unused1: 0,
            unused2: 0,
            unused3: 0,
            unused4: 0,
        }
    }
}

/// `struct btrfs_ioctl_search_args`.
#[repr(C)]
#[derive(Debug)]
pub struct SearchArgs {
    /// What to search for; updated by the kernel.
    pub key: SearchKey,
    /// Header/item pairs written by the kernel.
    pub buf: [u8; BTRFS_SEARCH_ARGS_BUFSIZE],
}

impl SearchArgs {
    /// A search for `key` with an empty result buffer.
    #[must_use]
    pub const fn new(key: SearchKey) -> Self {
        Self {
            key,
            buf: [0; BTRFS_SEARCH_ARGS_BUFSIZE],
        }
    }

    /// Iterate the items returned by the kernel.
    pub fn items(&self) -> impl Iterator<Item = (SearchHeader, &[u8])> + '_ {
        let mut offset = 0;
        let mut remaining = self.key.nr_items;
        std::iter::from_fn(move || {
            if remaining == 0 {
                return None;
            }
            let header = SearchHeader::parse(self.buf.get(offset..)?)?;
            let start = offset + SearchHeader::SIZE;
            let end = start.checked_add(header.len as usize)?;
            let data = self.buf.get(start..end)?;
            offset = end;
            remaining -= 1;
            Some((header, data))
        })
    }
}

/// `struct btrfs_ioctl_search_header`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchHeader {
    /// Transaction that last changed the item.
    pub transid: u64,
    /// Key object id.
    pub objectid: u64,
    /// Key offset.
    pub offset: u64,
    /// Key type.
    pub item_type: u32,
    /// Length of the item following the header.
    pub len: u32,
}

impl SearchHeader {
    /// Encoded size.
    pub const SIZE: usize = 32;

    /// Decode a header from the start of `buf`, in native byte order.
    #[must_use]
    pub fn parse(buf: &[u8]) -> Option<Self> {
        let buf = buf.get(..Self::SIZE)?;
        let u64_at = |at: usize| buf[at..at + 8].try_into().ok().map(u64::from_ne_bytes);
        let u32_at = |at: usize| buf[at..at + 4].try_into().ok().map(u32::from_ne_bytes);
        Some(Self {
            transid: u64_at(0)?,
            objectid: u64_at(8)?,
            offset: u64_at(16)?,
            item_type: u32_at(24)?,
            len: u32_at(28)?,
        })
    }
}

/// `struct btrfs_ioctl_quota_ctl_args`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct QuotaCtlArgs {
    /// `BTRFS_QUOTA_CTL_*` command.
    pub cmd: u64,
    /// Unused.
    pub status: u64,
}

/// `struct btrfs_ioctl_qgroup_create_args`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct QgroupCreateArgs {
    /// Non-zero creates, zero destroys.
    pub create: u64,
    /// Quota group id.
    pub qgroupid: u64,
}

/// `struct btrfs_qgroup_limit`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QgroupLimit {
    /// `BTRFS_QGROUP_LIMIT_*` flags naming the fields that are set.
    pub flags: u64,
    /// Ceiling on referenced bytes.
    pub max_rfer: u64,
    /// Ceiling on exclusive bytes.
    pub max_excl: u64,
    /// Reserved referenced bytes.
    pub rsv_rfer: u64,
    /// Reserved exclusive bytes.
    pub rsv_excl: u64,
}

impl QgroupLimit {
    /// Encoded size of `struct btrfs_qgroup_limit_item` on disk.
    pub const ITEM_SIZE: usize = 40;

    /// Decode an on-disk limit item (little endian).
    #[must_use]
    pub fn from_item(item: &[u8]) -> Option<Self> {
        let item = item.get(..Self::ITEM_SIZE)?;
        let le = |at: usize| item[at..at + 8].try_into().ok().map(u64::from_le_bytes);
        Some(Self {
            flags: le(0)?,
            max_rfer: le(8)?,
            max_excl: le(16)?,
            rsv_rfer: le(24)?,
            rsv_excl: le(32)?,
        })
    }
}

/// `struct btrfs_ioctl_qgroup_limit_args`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct QgroupLimitArgs {
    /// Quota group; zero selects the group of the open subvolume.
    pub qgroupid: u64,
    /// Limits to apply.
    pub lim: QgroupLimit,
}

impl QgroupLimitArgs {
    /// Limit the referenced bytes of the open subvolume's own group.
    #[must_use]
    pub const fn max_referenced(bytes: u64) -> Self {
        Self {
            qgroupid: 0,
            lim: QgroupLimit {
                flags: BTRFS_QGROUP_LIMIT_MAX_RFER,
                max_rfer: bytes,
                max_excl: 0,
                rsv_rfer: 0,
                rsv_excl: 0,
            },
        }
    }
}

/// `struct btrfs_ioctl_quota_rescan_args`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct QuotaRescanArgs {
    /// Unused.
    pub flags: u64,
    /// Last object processed.
    pub progress: u64,
    /// Reserved.
    pub reserved: [u64; 6],
}

/// Open a directory to issue control requests against.
///
/// # Errors
///
/// Returns [`StrataError::Backend`] if the directory cannot be opened.
pub fn open_dir(path: &Path) -> StrataResult<OwnedFd> {
    rustix::fs::open(
        path,
        OFlags::RDONLY | OFlags::DIRECTORY | OFlags::CLOEXEC,
        Mode::empty(),
    )
    .map_err(|errno| StrataError::backend("open directory", path, errno.raw_os_error()))
}
