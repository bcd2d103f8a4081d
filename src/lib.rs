//! tutorbox: sandboxed C++ judging with a Socratic tutoring loop
//!
//! A learner submits C++ source for a catalog problem. The source is compiled
//! and run under bounded resources, the output is classified against the
//! problem's cases, and a tutor conversation turns the result into one hint
//! at a time without revealing the reference solution.
//!
//! # Architecture
//!
//! ## Execution ([`exec`], [`core`], [`kernel`], [`judge`], [`safety`], [`utils`])
//! - [`exec::sandbox`]: compile-and-run contract and the sandbox implementation
//! - [`core::supervisor`]: child launch, watchdog and evidence collection
//! - [`kernel::resource`]: rlimit plan applied before exec
//! - [`kernel::namespace`]: user+network namespace isolation
//! - [`kernel::signal`]: shutdown signals, cancellation, process-group kill
//! - [`kernel::process_tree`]: session accounting and the post-run sweep of
//!   processes that escaped or outlived their run
//! - [`judge::languages::cpp`]: g++ compile and run commands
//! - [`safety::workspace`]: single-use run directories
//! - [`utils::output`]: bounded stdout/stderr capture
//! - [`utils::env_hygiene`]: fixed child environment
//!
//! ## Evaluation ([`verdict`])
//! - [`verdict::classifier`]: raw evidence to execution status
//! - [`verdict::evaluator`]: results against expected cases
//!
//! ## Tutoring ([`tutor`])
//! - [`tutor::session`]: per-learner conversation state
//! - [`tutor::reasoning`]: chat-completions collaborator
//! - [`tutor::redaction`]: reference-solution leak guard
//!
//! ## Surfaces
//! - [`orchestrator`]: authentication, validation and sequencing
//! - [`server`]: JSON-lines service loop
//! - [`cli`]: command-line entry point
//!
//! ## Collaborators
//! - [`catalog`]: problem records
//! - [`identity`]: caller token lookup
//! - [`observability::audit`]: structured audit events
//! - [`config`]: configuration, shared types and startup validation

// Collaborators
pub mod catalog;
pub mod identity;

// Configuration & shared types
pub mod config;

// Kernel primitives
pub mod kernel;

// Process core
pub mod core;

// Toolchain adapters
pub mod judge;

// Execution control
pub mod exec;

// Evaluation
pub mod verdict;

// Tutoring
pub mod tutor;

// Request handling
pub mod orchestrator;
pub mod server;

// Safety & cleanup
pub mod safety;

// Observability
pub mod observability;

// Utilities
pub mod utils;

// CLI entrypoint wiring for the tutorbox binary
pub mod cli;

// Re-export commonly used types for convenience
pub use config::types::*;
