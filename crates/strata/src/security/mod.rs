//! Security labelling of layer directories.

mod label;

pub use label::{MountLabel, is_enabled, relabel};
