//! Result classification and evaluation
//!
//! Statuses are derived as pure functions over process evidence; verdicts
//! compare captured output against expected cases.

pub mod classifier;
pub mod evaluator;
