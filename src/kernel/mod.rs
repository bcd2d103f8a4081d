//! Thin wrappers around Linux kernel primitives: rlimits, namespaces, signals
//! and /proc process accounting.

pub mod namespace;
pub mod process_tree;
pub mod resource;
pub mod signal;
