//! Socratic tutoring
//!
//! Sessions keep the per-learner conversation, render it for the reasoning
//! service and screen replies against the problem's reference solution.

pub mod context;
pub mod reasoning;
pub mod redaction;
pub mod session;

pub use context::{ChatMessage, ChatRole, HintContext};
pub use reasoning::{OpenAiReasoningClient, ReasoningService};
pub use redaction::LeakGuard;
pub use session::{Exchange, Role, SessionRegistry, TutoringSession};
