//! Execution control
//!
//! Combines workspaces, toolchain adapters and the process core into the
//! compile-and-run sandbox.

pub mod sandbox;
