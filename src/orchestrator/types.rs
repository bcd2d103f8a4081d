//! Request and response envelopes for the service loop and CLI.

use crate::config::types::{ErrorKind, TutorboxError, Verdict};
use crate::tutor::session::Exchange;
use crate::verdict::evaluator::CaseReport;
use serde::{Deserialize, Serialize};

/// Fields shared by run, test and hint requests
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Submission {
    #[serde(default)]
    pub token: String,
    pub problem_id: String,
    pub source_code: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct HintRequest {
    #[serde(flatten)]
    pub submission: Submission,
    #[serde(default)]
    pub prior_output: Option<String>,
    #[serde(default)]
    pub conversation_history: Option<Vec<Exchange>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Operation {
    Run(Submission),
    Test(Submission),
    Hint(HintRequest),
    Close {
        #[serde(default)]
        token: String,
    },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Run(_) => "run",
            Operation::Test(_) => "test",
            Operation::Hint(_) => "hint",
            Operation::Close { .. } => "close",
        }
    }
}

/// One line of input on the service loop
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub id: String,
    #[serde(flatten)]
    pub operation: Operation,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Ok,
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub detail: String,
}

/// Per-case summary returned to the caller
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CaseSummary {
    pub index: usize,
    pub verdict: Verdict,
    pub passed: bool,
    pub actual: String,
    pub expected: String,
}

impl From<&CaseReport> for CaseSummary {
    fn from(report: &CaseReport) -> Self {
        Self {
            index: report.index,
            verdict: report.verdict,
            passed: report.passed,
            actual: report.actual.clone(),
            expected: report.expected.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    pub status: ResponseStatus,
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verdict: Option<Verdict>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cases: Option<Vec<CaseSummary>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<Exchange>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    pub fn ok(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: ResponseStatus::Ok,
            status_code: 200,
            verdict: None,
            output: None,
            stderr: None,
            duration_ms: None,
            cases: None,
            hint: None,
            history: None,
            error: None,
        }
    }

    pub fn error(id: impl Into<String>, err: &TutorboxError) -> Self {
        let kind = err.kind();
        Self {
            status: ResponseStatus::Error,
            status_code: kind.status_code(),
            error: Some(ErrorBody {
                kind,
                detail: err.public_detail(),
            }),
            ..Self::ok(id)
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ResponseStatus::Ok
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}
