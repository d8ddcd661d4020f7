//! # Strata btrfs backend
//!
//! Layer storage for a container engine on top of btrfs subvolumes.
//!
//! ## Features
//!
//! - **Copy-on-write layers**: every layer is a subvolume, children are snapshots
//! - **Per-layer quotas**: a `size` option becomes a quota group limit
//! - **Self-healing limits**: recorded sizes are re-applied on every `get`
//! - **Nested subvolumes**: removal tears down subvolumes created inside a layer
//! - **User namespaces**: layers are owned by the remapped root
//!
//! ## Usage
//!
//! ```no_run
//! use strata::Driver;
//! use strata::namespace::IdentityMapping;
//! use strata_common::{CreateOpts, GraphDriver};
//!
//! # fn example() -> strata_common::StrataResult<()> {
//! let driver = Driver::init(
//!     "/var/lib/strata/btrfs",
//!     &["btrfs.min_space=1G"],
//!     IdentityMapping::default(),
//! )?;
//!
//! driver.create("base", None, &CreateOpts::default())?;
//! let opts = CreateOpts::default().with_storage_opt("size", "10G");
//! driver.create_read_write("container", Some("base"), &opts)?;
//!
//! let rootfs = driver.get("container", None)?;
//! println!("{}", rootfs.display());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod btrfs;
pub mod cli;
pub mod driver;
pub mod filesystem;
pub mod namespace;
pub mod security;

pub use driver::{Driver, DriverConfig};
