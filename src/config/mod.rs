//! Configuration and shared types
//!
//! Limits, results, the error taxonomy, file loading and startup validation.

pub mod loader;
pub mod types;
pub mod validator;
