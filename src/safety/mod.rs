//! Safety and cleanup
//!
//! Run-scoped workspaces removed on every exit path.

pub mod workspace;
