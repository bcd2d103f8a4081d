//! Toolchain adapters.
//!
//! Core runtime stays language-agnostic. Adapters define the compile/run
//! argument vectors; only C++ is provided.

pub mod adapter;
pub mod languages;
