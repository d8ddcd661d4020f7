//! # strata-common
//!
//! Shared utilities and types for the Strata layer storage backends.
//!
//! This crate provides the pieces every backend agrees on:
//! - Layer ID validation
//! - On-disk layout under a backend's home directory
//! - Human-readable byte size parsing
//! - Storage option parsing
//! - The [`GraphDriver`] contract consumed by the diff layer
//! - Common error types

#![warn(missing_docs)]

pub mod driver;
pub mod error;
pub mod id;
pub mod options;
pub mod paths;
pub mod size;

pub use driver::{CreateOpts, GraphDriver};
pub use error::{StrataError, StrataResult};
pub use id::LayerId;
pub use paths::DriverPaths;
pub use size::ByteSize;
