//! Language-agnostic process core.
//!
//! Core owns the process model, limits and evidence collection. Toolchain
//! specific argv construction lives in judge adapters.

pub mod supervisor;
pub mod types;
