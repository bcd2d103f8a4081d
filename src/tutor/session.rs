//! Per-learner tutoring sessions and their registry.

use crate::catalog::Problem;
use crate::config::types::{ExecutionResult, ReasoningError, Result, TutorboxError};
use crate::identity::LearnerId;
use crate::observability::audit::events;
use crate::tutor::context::HintContext;
use crate::tutor::reasoning::ReasoningService;
use crate::tutor::redaction::LeakGuard;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Learner,
    Tutor,
}

/// One turn of the conversation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange {
    pub role: Role,
    pub text: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Exchange {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Checks that a history is a sequence of Learner/Tutor pairs.
pub fn validate_history(history: &[Exchange]) -> Result<()> {
    if history.len() % 2 != 0 {
        return Err(TutorboxError::InvalidRequest(
            "conversation_history must hold complete learner/tutor pairs".to_string(),
        ));
    }
    for pair in history.chunks(2) {
        if pair[0].role != Role::Learner || pair[1].role != Role::Tutor {
            return Err(TutorboxError::InvalidRequest(
                "conversation_history must alternate learner then tutor".to_string(),
            ));
        }
    }
    Ok(())
}

#[derive(Debug)]
pub struct TutoringSession {
    learner: LearnerId,
    problem: Arc<Problem>,
    history: Vec<Exchange>,
    guard: LeakGuard,
}

impl TutoringSession {
    pub fn new(learner: LearnerId, problem: Arc<Problem>, guard: LeakGuard) -> Self {
        Self {
            learner,
            problem,
            history: Vec::new(),
            guard,
        }
    }

    pub fn learner(&self) -> &LearnerId {
        &self.learner
    }

    pub fn problem(&self) -> &Problem {
        &self.problem
    }

    pub fn history(&self) -> &[Exchange] {
        &self.history
    }

    /// Seeds an empty session with a client-held history.
    /// Returns false when the session already has history of its own.
    pub fn seed(&mut self, history: Vec<Exchange>) -> Result<bool> {
        if !self.history.is_empty() {
            return Ok(false);
        }
        validate_history(&history)?;
        self.history = history;
        Ok(true)
    }

    /// Asks the reasoning service for the next Socratic hint on `source`.
    ///
    /// History grows by exactly one Learner/Tutor pair on success and is left
    /// untouched on any failure.
    pub fn respond(
        &mut self,
        source: &str,
        result: &ExecutionResult,
        prior_output: Option<&str>,
        service: &dyn ReasoningService,
    ) -> Result<String> {
        let context = HintContext {
            problem: &self.problem,
            source,
            result,
            prior_output,
            history: &self.history,
        };

        let reply = service
            .complete(&context.to_messages())
            .map_err(|err| self.unavailable(err))?;

        let screened = self
            .guard
            .screen(&reply, &self.problem.reference_solution)
            .map_err(|err| self.unavailable(err))?;

        if screened.redacted_spans > 0 {
            events::hint_redacted(
                self.learner.as_str(),
                &self.problem.id,
                screened.redacted_spans,
            );
        }

        self.history
            .push(Exchange::new(Role::Learner, submission_summary(source, result)));
        self.history
            .push(Exchange::new(Role::Tutor, screened.text.clone()));

        log::debug!(
            "Hint delivered to {} on {} ({} exchanges)",
            self.learner,
            self.problem.id,
            self.history.len()
        );
        Ok(screened.text)
    }

    fn unavailable(&self, err: ReasoningError) -> TutorboxError {
        events::hint_rejected(self.learner.as_str(), &self.problem.id, &err.to_string());
        TutorboxError::HintUnavailable(err)
    }
}

fn submission_summary(source: &str, result: &ExecutionResult) -> String {
    format!(
        "I submitted this code (result: {}):\n```cpp\n{}\n```",
        result.status,
        source.trim_end()
    )
}

pub type SharedSession = Arc<Mutex<TutoringSession>>;

/// Live sessions keyed by learner. One session per learner at a time.
///
/// The map records each session's problem id so lookups never wait on a
/// session lock, which is held for the length of a reasoning call.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<LearnerId, (String, SharedSession)>>,
    guard: LeakGuard,
}

impl SessionRegistry {
    pub fn new(redaction_threshold: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            guard: LeakGuard::new(redaction_threshold),
        }
    }

    /// Returns the learner's session for `problem`, replacing any session
    /// they hold on a different problem.
    pub fn open(&self, learner: &LearnerId, problem: Arc<Problem>) -> SharedSession {
        let mut sessions = lock(&self.sessions);
        if let Some((problem_id, existing)) = sessions.get(learner) {
            if *problem_id == problem.id {
                return Arc::clone(existing);
            }
            log::debug!("Learner {} switched to problem {}", learner, problem.id);
        }

        let problem_id = problem.id.clone();
        let session = Arc::new(Mutex::new(TutoringSession::new(
            learner.clone(),
            problem,
            self.guard,
        )));
        sessions.insert(learner.clone(), (problem_id, Arc::clone(&session)));
        session
    }

    pub fn get(&self, learner: &LearnerId) -> Option<SharedSession> {
        lock(&self.sessions)
            .get(learner)
            .map(|(_, session)| Arc::clone(session))
    }

    /// Drops the learner's session. Returns whether one existed.
    pub fn close(&self, learner: &LearnerId) -> bool {
        lock(&self.sessions).remove(learner).is_some()
    }

    pub fn len(&self) -> usize {
        lock(&self.sessions).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Session state stays consistent across a panicking holder: history is only
/// pushed after every fallible step.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
