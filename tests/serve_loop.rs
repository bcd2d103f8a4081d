//! JSON-lines service loop over in-memory streams.

use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::io::{Cursor, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tutorbox::catalog::{Problem, StaticCatalog, TestCase};
use tutorbox::config::loader::{ServiceConfig, TutorConfig};
use tutorbox::config::types::{
    ExecutionLimits, ExecutionResult, ReasoningError, Result, TutorboxError,
};
use tutorbox::exec::sandbox::{BatchOutcome, CodeExecutor, ExecutionRequest};
use tutorbox::identity::StaticTokenProvider;
use tutorbox::kernel::signal::{wait_until, CancelToken};
use tutorbox::orchestrator::Orchestrator;
use tutorbox::server::serve;
use tutorbox::tutor::context::ChatMessage;
use tutorbox::tutor::reasoning::ReasoningService;

/// Prints `0` after `delay`, giving up early when cancelled.
struct StubExecutor {
    delay: Duration,
}

impl StubExecutor {
    fn run(&self, cancel: &CancelToken) -> Result<ExecutionResult> {
        if wait_until(self.delay, || cancel.is_cancelled()) {
            return Err(TutorboxError::Cancelled);
        }
        Ok(ExecutionResult {
            stdout: "0\n".into(),
            ..Default::default()
        })
    }
}

impl CodeExecutor for StubExecutor {
    fn execute(&self, _request: &ExecutionRequest, cancel: &CancelToken) -> Result<ExecutionResult> {
        self.run(cancel)
    }

    fn execute_batch(
        &self,
        _source: &str,
        inputs: &[String],
        _limits: Option<&ExecutionLimits>,
        cancel: &CancelToken,
    ) -> Result<BatchOutcome> {
        let mut results = Vec::new();
        for _ in inputs {
            results.push(self.run(cancel)?);
        }
        Ok(BatchOutcome::Compiled(results))
    }

    fn max_source_bytes(&self) -> usize {
        4096
    }
}

struct FixedReply;

impl ReasoningService for FixedReply {
    fn complete(&self, _messages: &[ChatMessage]) -> std::result::Result<String, ReasoningError> {
        Ok("What should 3! print?".into())
    }
}

#[derive(Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl SharedBuffer {
    fn responses(&self) -> HashMap<String, Value> {
        let bytes = self.0.lock().unwrap().clone();
        String::from_utf8(bytes)
            .unwrap()
            .lines()
            .map(|line| {
                let value: Value = serde_json::from_str(line).unwrap();
                (value["id"].as_str().unwrap_or_default().to_string(), value)
            })
            .collect()
    }
}

fn orchestrator(delay: Duration) -> Arc<Orchestrator> {
    let catalog = StaticCatalog::from_problems(vec![Problem {
        id: "factorial".into(),
        title: "Factorial".into(),
        prompt: "Read n and print n!".into(),
        difficulty: "easy".into(),
        reference_solution: "int main(){long long n,r=1;std::cin>>n;while(n>1)r*=n--;std::cout<<r;}".into(),
        cases: vec![TestCase {
            input: "3".into(),
            expected_output: "6".into(),
        }],
    }])
    .unwrap();
    let mut callers = BTreeMap::new();
    callers.insert("tok-ada".to_string(), "ada".to_string());

    Arc::new(Orchestrator::new(
        Arc::new(StubExecutor { delay }),
        Arc::new(catalog),
        Arc::new(StaticTokenProvider::new(&callers)),
        Arc::new(FixedReply),
        &TutorConfig::default(),
    ))
}

fn config(cancel_on_eof: bool) -> ServiceConfig {
    ServiceConfig {
        max_parallel: 2,
        queue_depth: 4,
        cancel_on_eof,
    }
}

#[test]
fn test_every_line_gets_a_correlated_response() {
    let input = [
        r#"{"id":"r1","op":"run","token":"tok-ada","problem_id":"factorial","source_code":"int main(){}"}"#,
        "not json",
        r#"{"id":"t1","op":"test","token":"tok-ada","problem_id":"factorial","source_code":"int main(){}"}"#,
        r#"{"id":"x1","op":"explode","token":"tok-ada"}"#,
        "",
        r#"{"id":"h1","op":"hint","token":"tok-ada","problem_id":"factorial","source_code":"int main(){}","prior_output":"1"}"#,
        r#"{"id":"u1","op":"run","token":"nope","problem_id":"factorial","source_code":"int main(){}"}"#,
    ]
    .join("\n");
    let output = SharedBuffer::default();

    let summary = serve(
        orchestrator(Duration::ZERO),
        Cursor::new(input),
        output.clone(),
        &config(false),
    )
    .unwrap();

    assert_eq!(summary.received, 6);
    assert_eq!(summary.malformed, 2);
    assert_eq!(summary.answered, 6);

    let responses = output.responses();
    assert_eq!(responses["r1"]["status"], "ok");
    assert_eq!(responses["r1"]["verdict"], "pass");
    assert_eq!(responses["r1"]["output"], "0\n");

    assert_eq!(responses["t1"]["verdict"], "fail");
    assert_eq!(responses["t1"]["cases"][0]["passed"], false);

    assert_eq!(responses["x1"]["status_code"], 400);
    assert_eq!(responses["x1"]["error"]["kind"], "InvalidRequest");
    assert_eq!(responses[""]["error"]["kind"], "InvalidRequest");

    assert_eq!(responses["h1"]["hint"], "What should 3! print?");
    assert_eq!(responses["h1"]["history"].as_array().map(Vec::len), Some(2));
    assert!(!responses["h1"].to_string().contains("while(n>1)"));

    assert_eq!(responses["u1"]["status_code"], 401);
}

#[test]
fn test_end_of_input_cancels_in_flight_requests() {
    let input = r#"{"id":"slow","op":"run","token":"tok-ada","problem_id":"factorial","source_code":"int main(){}"}"#;
    let output = SharedBuffer::default();

    let summary = serve(
        orchestrator(Duration::from_secs(10)),
        Cursor::new(format!("{}\n", input)),
        output.clone(),
        &config(true),
    )
    .unwrap();

    assert!(summary.cancelled_on_exit);
    let responses = output.responses();
    assert_eq!(responses["slow"]["status_code"], 499);
    assert_eq!(responses["slow"]["error"]["kind"], "Cancelled");
}
