/// Result evaluation against expected behaviour
use crate::catalog::TestCase;
use crate::config::types::{ExecutionResult, ExecutionStatus, Result, TutorboxError, Verdict};
use serde::{Deserialize, Serialize};

/// Outcome of one test case
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CaseReport {
    pub index: usize,
    pub verdict: Verdict,
    pub passed: bool,
    pub input: String,
    pub expected: String,
    pub actual: String,
    pub status: ExecutionStatus,
    pub duration_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub verdict: Verdict,
    /// Empty for run requests and for compile failures
    pub cases: Vec<CaseReport>,
    pub first_failure: Option<usize>,
}

impl Evaluation {
    pub fn first_failing_case(&self) -> Option<&CaseReport> {
        self.first_failure.and_then(|i| self.cases.get(i))
    }
}

/// Trailing whitespace removed from every line, trailing blank lines removed.
/// Leading spaces and interior blank lines are kept.
pub fn normalize_output(text: &str) -> String {
    let normalized = text
        .replace("\r\n", "\n")
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n");
    normalized.trim_end_matches('\n').to_string()
}

pub fn outputs_match(actual: &str, expected: &str) -> bool {
    normalize_output(actual) == normalize_output(expected)
}

/// Classify `results` against `expected`.
///
/// Run requests pass `None` and a single result. Test requests pass the
/// problem's cases and either one result per case or the single compile
/// failure that stopped the batch.
pub fn evaluate(results: &[ExecutionResult], expected: Option<&[TestCase]>) -> Result<Evaluation> {
    let Some(cases) = expected else {
        let result = results.first().ok_or_else(|| {
            TutorboxError::Process("evaluation requested without a result".to_string())
        })?;
        return Ok(Evaluation {
            verdict: Verdict::from_status(result.status),
            cases: Vec::new(),
            first_failure: None,
        });
    };

    if cases.is_empty() {
        return Err(TutorboxError::InvalidRequest(
            "problem has no test cases to evaluate against".to_string(),
        ));
    }

    if let [only] = results {
        if only.status == ExecutionStatus::CompileError {
            return Ok(Evaluation {
                verdict: Verdict::CompileError,
                cases: Vec::new(),
                first_failure: None,
            });
        }
    }

    if results.len() != cases.len() {
        return Err(TutorboxError::Process(format!(
            "{} result(s) for {} case(s)",
            results.len(),
            cases.len()
        )));
    }

    let reports: Vec<CaseReport> = cases
        .iter()
        .zip(results)
        .enumerate()
        .map(|(index, (case, result))| {
            let verdict = match result.status {
                ExecutionStatus::Success if outputs_match(&result.stdout, &case.expected_output) => {
                    Verdict::Pass
                }
                ExecutionStatus::Success => Verdict::Fail,
                status => Verdict::from_status(status),
            };
            CaseReport {
                index,
                verdict,
                passed: verdict.is_pass(),
                input: case.input.clone(),
                expected: case.expected_output.clone(),
                actual: result.stdout.clone(),
                status: result.status,
                duration_ms: result.duration_ms,
            }
        })
        .collect();

    let first_failure = reports.iter().position(|r| !r.passed);
    let verdict = first_failure
        .map(|i| reports[i].verdict)
        .unwrap_or(Verdict::Pass);

    Ok(Evaluation {
        verdict,
        cases: reports,
        first_failure,
    })
}
