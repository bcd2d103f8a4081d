//! Request orchestration
//!
//! Authenticates the caller, validates the submission, then drives the
//! sandbox, the evaluator and (for hints) the learner's tutoring session.
//! Every outcome leaves here as a [`Response`].

pub mod types;

use crate::catalog::{Problem, ProblemCatalog};
use crate::config::loader::TutorConfig;
use crate::config::types::{ErrorKind, ExecutionResult, Result, TutorboxError, Verdict};
use crate::exec::sandbox::{CodeExecutor, ExecutionRequest};
use crate::identity::{IdentityProvider, LearnerId};
use crate::kernel::signal::{wait_until, CancelToken};
use crate::observability::audit::events;
use crate::tutor::reasoning::ReasoningService;
use crate::tutor::session::{lock, SessionRegistry, TutoringSession};
use crate::verdict::evaluator::{evaluate, Evaluation};
use std::sync::Arc;
use std::time::Duration;

pub use types::{
    CaseSummary, ErrorBody, HintRequest, Operation, Request, Response, ResponseStatus, Submission,
};

pub struct Orchestrator {
    executor: Arc<dyn CodeExecutor>,
    catalog: Arc<dyn ProblemCatalog>,
    identity: Arc<dyn IdentityProvider>,
    reasoning: Arc<dyn ReasoningService>,
    sessions: SessionRegistry,
    hint_retry_backoff: Duration,
}

impl Orchestrator {
    pub fn new(
        executor: Arc<dyn CodeExecutor>,
        catalog: Arc<dyn ProblemCatalog>,
        identity: Arc<dyn IdentityProvider>,
        reasoning: Arc<dyn ReasoningService>,
        tutor: &TutorConfig,
    ) -> Self {
        Self {
            executor,
            catalog,
            identity,
            reasoning,
            sessions: SessionRegistry::new(tutor.redaction_threshold),
            hint_retry_backoff: Duration::from_millis(tutor.hint_retry_backoff_ms),
        }
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn handle(&self, request: Request, cancel: &CancelToken) -> Response {
        match &request.operation {
            Operation::Run(submission) => self.handle_run(&request.id, submission, cancel),
            Operation::Test(submission) => self.handle_test(&request.id, submission, cancel),
            Operation::Hint(hint) => self.handle_hint(&request.id, hint, cancel),
            Operation::Close { token } => self.handle_close(&request.id, token),
        }
    }

    /// Compile and run once against the first case's input, if any.
    pub fn handle_run(&self, id: &str, submission: &Submission, cancel: &CancelToken) -> Response {
        self.run(id, submission, cancel)
            .unwrap_or_else(|err| self.failure(id, "run", &err))
    }

    /// Compile once and run every case.
    pub fn handle_test(&self, id: &str, submission: &Submission, cancel: &CancelToken) -> Response {
        self.test(id, submission, cancel)
            .unwrap_or_else(|err| self.failure(id, "test", &err))
    }

    /// Run, then ask the learner's session for the next hint.
    pub fn handle_hint(&self, id: &str, request: &HintRequest, cancel: &CancelToken) -> Response {
        self.hint(id, request, cancel)
            .unwrap_or_else(|err| self.failure(id, "hint", &err))
    }

    pub fn handle_close(&self, id: &str, token: &str) -> Response {
        match self.authenticate(id, token) {
            Ok(learner) => {
                let closed = self.sessions.close(&learner);
                log::debug!("Close for {}: session existed = {}", learner, closed);
                let mut response = Response::ok(id);
                response.output = Some(if closed { "session closed" } else { "no open session" }.to_string());
                response
            }
            Err(err) => self.failure(id, "close", &err),
        }
    }

    fn authenticate(&self, id: &str, token: &str) -> Result<LearnerId> {
        self.identity.resolve(token).ok_or_else(|| {
            events::auth_failure(id);
            TutorboxError::Unauthorized
        })
    }

    /// Checks shared by every submission, in order: caller, problem, source.
    fn admit(&self, id: &str, submission: &Submission) -> Result<(LearnerId, Arc<Problem>)> {
        let learner = self.authenticate(id, &submission.token)?;

        let problem = self
            .catalog
            .get(&submission.problem_id)
            .ok_or_else(|| TutorboxError::UnknownProblem(submission.problem_id.clone()))?;

        if submission.source_code.trim().is_empty() {
            return Err(TutorboxError::InvalidRequest(
                "source_code is empty".to_string(),
            ));
        }

        let limit = self.executor.max_source_bytes();
        if submission.source_code.len() > limit {
            events::source_rejected(submission.source_code.len(), limit);
            return Err(TutorboxError::SourceTooLarge {
                size: submission.source_code.len(),
                limit,
            });
        }

        Ok((learner, problem))
    }

    fn execute_once(
        &self,
        problem: &Problem,
        source: &str,
        cancel: &CancelToken,
    ) -> Result<ExecutionResult> {
        let mut request = ExecutionRequest::new(source);
        if let Some(case) = problem.first_case() {
            request = request.with_stdin(case.input.clone());
        }
        self.executor.execute(&request, cancel)
    }

    fn run(&self, id: &str, submission: &Submission, cancel: &CancelToken) -> Result<Response> {
        let (learner, problem) = self.admit(id, submission)?;
        log::info!("run {} for {} on {}", id, learner, problem.id);

        let result = self.execute_once(&problem, &submission.source_code, cancel)?;
        let evaluation = evaluate(std::slice::from_ref(&result), None)?;
        Ok(execution_response(id, &result, &evaluation))
    }

    fn test(&self, id: &str, submission: &Submission, cancel: &CancelToken) -> Result<Response> {
        let (learner, problem) = self.admit(id, submission)?;
        if problem.cases.is_empty() {
            return Err(TutorboxError::InvalidRequest(format!(
                "problem {} has no test cases",
                problem.id
            )));
        }
        log::info!(
            "test {} for {} on {} ({} cases)",
            id,
            learner,
            problem.id,
            problem.cases.len()
        );

        let inputs: Vec<String> = problem.cases.iter().map(|c| c.input.clone()).collect();
        let results = self
            .executor
            .execute_batch(&submission.source_code, &inputs, None, cancel)?
            .into_results();
        let evaluation = evaluate(&results, Some(&problem.cases))?;

        let mut response = Response::ok(id);
        response.verdict = Some(evaluation.verdict);
        response.duration_ms = Some(results.iter().map(|r| r.duration_ms).sum());
        response.cases = Some(evaluation.cases.iter().map(CaseSummary::from).collect());

        if evaluation.cases.is_empty() {
            // compile failure: nothing ran
            let compile = results.first();
            response.output = Some(String::new());
            response.stderr = compile.map(|r| r.stderr.clone());
        } else {
            response.output = Some(case_summary_text(&evaluation));
            response.stderr = Some(
                evaluation
                    .first_failure
                    .and_then(|i| results.get(i))
                    .map(|r| r.stderr.clone())
                    .unwrap_or_default(),
            );
        }
        Ok(response)
    }

    fn hint(&self, id: &str, request: &HintRequest, cancel: &CancelToken) -> Result<Response> {
        let submission = &request.submission;
        let (learner, problem) = self.admit(id, submission)?;
        log::info!("hint {} for {} on {}", id, learner, problem.id);

        let result = self.execute_once(&problem, &submission.source_code, cancel)?;
        let evaluation = evaluate(std::slice::from_ref(&result), None)?;

        let shared = self.sessions.open(&learner, problem);
        let mut session = lock(&shared);
        if let Some(history) = &request.conversation_history {
            if session.seed(history.clone())? {
                log::debug!("Seeded session for {} with {} exchanges", learner, history.len());
            }
        }

        let mut response = execution_response(id, &result, &evaluation);
        match self.respond_with_retry(
            &mut session,
            &submission.source_code,
            &result,
            request.prior_output.as_deref(),
            cancel,
        ) {
            Ok(hint) => {
                response.hint = Some(hint);
            }
            Err(err) => {
                response = self.failure(id, "hint", &err);
            }
        }
        response.history = Some(session.history().to_vec());
        Ok(response)
    }

    fn respond_with_retry(
        &self,
        session: &mut TutoringSession,
        source: &str,
        result: &ExecutionResult,
        prior_output: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<String> {
        if cancel.is_cancelled() {
            return Err(TutorboxError::Cancelled);
        }
        match session.respond(source, result, prior_output, self.reasoning.as_ref()) {
            Err(TutorboxError::HintUnavailable(cause)) => {
                log::warn!(
                    "Hint attempt failed ({}); retrying in {} ms",
                    cause,
                    self.hint_retry_backoff.as_millis()
                );
                if wait_until(self.hint_retry_backoff, || cancel.is_cancelled()) {
                    return Err(TutorboxError::Cancelled);
                }
                session.respond(source, result, prior_output, self.reasoning.as_ref())
            }
            other => other,
        }
    }

    fn failure(&self, id: &str, op: &str, err: &TutorboxError) -> Response {
        match err.kind() {
            ErrorKind::InternalFault => log::error!("{} {} failed: {}", op, id, err),
            ErrorKind::HintUnavailable => log::warn!("{} {} failed: {}", op, id, err),
            kind => log::info!("{} {} rejected ({:?}): {}", op, id, kind, err),
        }
        Response::error(id, err)
    }
}

fn execution_response(id: &str, result: &ExecutionResult, evaluation: &Evaluation) -> Response {
    let mut response = Response::ok(id);
    response.verdict = Some(evaluation.verdict);
    response.output = Some(result.stdout.clone());
    response.stderr = Some(result.stderr.clone());
    response.duration_ms = Some(result.duration_ms);
    response
}

/// One line per case, e.g. `case 2: fail (expected "6", got "0")`.
fn case_summary_text(evaluation: &Evaluation) -> String {
    evaluation
        .cases
        .iter()
        .map(|case| {
            if case.passed {
                format!("case {}: pass", case.index + 1)
            } else if case.verdict == Verdict::Fail {
                format!(
                    "case {}: fail (expected {:?}, got {:?})",
                    case.index + 1,
                    case.expected.trim_end(),
                    case.actual.trim_end()
                )
            } else {
                format!("case {}: {}", case.index + 1, case.verdict)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{StaticCatalog, TestCase};
    use crate::config::types::{ExecutionLimits, ReasoningError};
    use crate::exec::sandbox::BatchOutcome;
    use crate::identity::StaticTokenProvider;
    use crate::tutor::context::ChatMessage;
    use std::collections::BTreeMap;

    /// Echoes the first stdin line doubled, or fails to compile on "syntax".
    struct ScriptedExecutor;

    impl ScriptedExecutor {
        fn outcome(source: &str, stdin: &str) -> ExecutionResult {
            if source.contains("syntax") {
                return ExecutionResult::compile_error("main.cpp:1:1: error: expected ';'".into(), 1);
            }
            let n: u64 = stdin.trim().parse().unwrap_or(0);
            ExecutionResult {
                stdout: format!("{}\n", n * 2),
                duration_ms: 2,
                ..Default::default()
            }
        }
    }

    impl CodeExecutor for ScriptedExecutor {
        fn execute(&self, request: &ExecutionRequest, _cancel: &CancelToken) -> Result<ExecutionResult> {
            Ok(Self::outcome(&request.source, request.stdin.as_deref().unwrap_or("")))
        }

        fn execute_batch(
            &self,
            source: &str,
            inputs: &[String],
            _limits: Option<&ExecutionLimits>,
            _cancel: &CancelToken,
        ) -> Result<BatchOutcome> {
            if source.contains("syntax") {
                return Ok(BatchOutcome::CompileFailed(Self::outcome(source, "")));
            }
            Ok(BatchOutcome::Compiled(
                inputs.iter().map(|i| Self::outcome(source, i)).collect(),
            ))
        }

        fn max_source_bytes(&self) -> usize {
            128
        }
    }

    struct Canned(std::result::Result<String, ReasoningError>);

    impl ReasoningService for Canned {
        fn complete(&self, _m: &[ChatMessage]) -> std::result::Result<String, ReasoningError> {
            self.0.clone()
        }
    }

    fn orchestrator(reply: std::result::Result<String, ReasoningError>) -> Orchestrator {
        let catalog = StaticCatalog::from_problems(vec![Problem {
            id: "double".into(),
            title: "Double".into(),
            prompt: "Print 2n".into(),
            difficulty: "easy".into(),
            reference_solution: "int main(){long long n;std::cin>>n;std::cout<<2*n<<std::endl;}".into(),
            cases: vec![
                TestCase { input: "3".into(), expected_output: "6".into() },
                TestCase { input: "5".into(), expected_output: "11".into() },
            ],
        }])
        .unwrap();
        let mut callers = BTreeMap::new();
        callers.insert("tok".to_string(), "ada".to_string());

        Orchestrator::new(
            Arc::new(ScriptedExecutor),
            Arc::new(catalog),
            Arc::new(StaticTokenProvider::new(&callers)),
            Arc::new(Canned(reply)),
            &TutorConfig {
                redaction_threshold: 40,
                hint_retry_backoff_ms: 1,
            },
        )
    }

    fn submission(source: &str) -> Submission {
        Submission {
            token: "tok".into(),
            problem_id: "double".into(),
            source_code: source.into(),
        }
    }

    #[test]
    fn test_run_uses_first_case_input() {
        let orch = orchestrator(Ok("hint".into()));
        let response = orch.handle_run("1", &submission("int main(){}"), &CancelToken::new());
        assert!(response.is_ok());
        assert_eq!(response.verdict, Some(Verdict::Pass));
        assert_eq!(response.output.as_deref(), Some("6\n"));
    }

    #[test]
    fn test_admission_order() {
        let orch = orchestrator(Ok("hint".into()));
        let cancel = CancelToken::new();

        let mut bad_token = submission("int main(){}");
        bad_token.token = "nope".into();
        bad_token.problem_id = "missing".into();
        let r = orch.handle_run("1", &bad_token, &cancel);
        assert_eq!(r.error_kind(), Some(ErrorKind::Unauthorized));
        assert_eq!(r.status_code, 401);

        let mut unknown = submission("");
        unknown.problem_id = "missing".into();
        assert_eq!(
            orch.handle_run("2", &unknown, &cancel).error_kind(),
            Some(ErrorKind::UnknownProblem)
        );

        assert_eq!(
            orch.handle_run("3", &submission("  \n"), &cancel).error_kind(),
            Some(ErrorKind::InvalidRequest)
        );

        let r = orch.handle_run("4", &submission(&"x".repeat(129)), &cancel);
        assert_eq!(r.error_kind(), Some(ErrorKind::SourceTooLarge));
        assert_eq!(r.status_code, 413);
    }

    #[test]
    fn test_test_reports_first_failing_case() {
        let orch = orchestrator(Ok("hint".into()));
        let response = orch.handle_test("1", &submission("int main(){}"), &CancelToken::new());

        assert_eq!(response.verdict, Some(Verdict::Fail));
        let cases = response.cases.unwrap();
        assert_eq!(cases.len(), 2);
        assert!(cases[0].passed);
        assert!(!cases[1].passed);
        let output = response.output.unwrap();
        assert!(output.contains("case 1: pass"));
        assert!(output.contains("case 2: fail"));
    }

    #[test]
    fn test_test_with_compile_error() {
        let orch = orchestrator(Ok("hint".into()));
        let response = orch.handle_test("1", &submission("syntax"), &CancelToken::new());
        assert!(response.is_ok());
        assert_eq!(response.verdict, Some(Verdict::CompileError));
        assert!(response.stderr.unwrap().contains("expected ';'"));
        assert_eq!(response.output.as_deref(), Some(""));
    }

    #[test]
    fn test_hint_failure_keeps_history() {
        let orch = orchestrator(Err(ReasoningError::Timeout(10)));
        let request = HintRequest {
            submission: submission("int main(){}"),
            ..Default::default()
        };
        let response = orch.handle_hint("1", &request, &CancelToken::new());
        assert_eq!(response.error_kind(), Some(ErrorKind::HintUnavailable));
        assert_eq!(response.status_code, 503);
        assert_eq!(response.history, Some(Vec::new()));
    }

    #[test]
    fn test_close_drops_session() {
        let orch = orchestrator(Ok("What does your loop print for n = 3?".into()));
        let request = HintRequest {
            submission: submission("int main(){}"),
            ..Default::default()
        };
        let response = orch.handle_hint("1", &request, &CancelToken::new());
        assert_eq!(response.history.map(|h| h.len()), Some(2));
        assert_eq!(orch.sessions().len(), 1);

        let closed = orch.handle_close("2", "tok");
        assert_eq!(closed.output.as_deref(), Some("session closed"));
        assert!(orch.sessions().is_empty());

        assert_eq!(
            orch.handle_close("3", "bad").error_kind(),
            Some(ErrorKind::Unauthorized)
        );
    }

    #[test]
    fn test_cancelled_hint_is_reported() {
        let orch = orchestrator(Ok("hint".into()));
        let cancel = CancelToken::new();
        cancel.cancel();
        let request = HintRequest {
            submission: submission("int main(){}"),
            ..Default::default()
        };
        let response = orch.handle_hint("1", &request, &cancel);
        assert_eq!(response.error_kind(), Some(ErrorKind::Cancelled));
        assert_eq!(response.status_code, 499);
        assert_eq!(response.history, Some(Vec::new()));
    }
}
