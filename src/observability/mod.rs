//! Observability
//!
//! Structured audit events for sandbox and tutoring decisions.

pub mod audit;
