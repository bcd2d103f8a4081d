//! Line-delimited JSON service loop (`tutorbox serve`).
//!
//! Each input line is one [`Request`]; each output line is one [`Response`]
//! correlated by `id`. Responses are written in completion order.

use crate::config::loader::ServiceConfig;
use crate::config::types::{Result, TutorboxError};
use crate::kernel::signal::{received_signal, should_continue, CancelToken};
use crate::orchestrator::{Orchestrator, Request, Response};
use crate::tutor::session::lock;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use serde::Serialize;
use std::collections::HashMap;
use std::io::{BufRead, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Counters reported when the loop exits
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ServeSummary {
    pub received: u64,
    pub malformed: u64,
    pub answered: u64,
    pub cancelled_on_exit: bool,
}

struct Job {
    seq: u64,
    request: Request,
    cancel: CancelToken,
}

/// Cancel tokens of requests that have not been answered yet
#[derive(Default)]
struct InFlight {
    tokens: Mutex<HashMap<u64, CancelToken>>,
}

impl InFlight {
    fn register(&self, seq: u64) -> CancelToken {
        let token = CancelToken::new();
        lock(&self.tokens).insert(seq, token.clone());
        token
    }

    fn finish(&self, seq: u64) {
        lock(&self.tokens).remove(&seq);
    }

    fn cancel_all(&self) -> usize {
        let tokens = lock(&self.tokens);
        for token in tokens.values() {
            token.cancel();
        }
        tokens.len()
    }
}

/// Serialized writes of one JSON line per response
struct ResponseSink<W: Write> {
    writer: Mutex<W>,
    broken: AtomicBool,
    answered: AtomicU64,
}

impl<W: Write> ResponseSink<W> {
    fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
            broken: AtomicBool::new(false),
            answered: AtomicU64::new(0),
        }
    }

    fn send(&self, response: &Response) {
        if self.broken.load(Ordering::SeqCst) {
            return;
        }
        let line = match serde_json::to_string(response) {
            Ok(line) => line,
            Err(e) => {
                log::error!("Failed to encode response {}: {}", response.id, e);
                return;
            }
        };
        let mut writer = lock(&self.writer);
        let written = writeln!(writer, "{}", line).and_then(|_| writer.flush());
        match written {
            Ok(()) => {
                self.answered.fetch_add(1, Ordering::SeqCst);
            }
            Err(e) => {
                log::warn!("Output closed ({}); treating caller as disconnected", e);
                self.broken.store(true, Ordering::SeqCst);
            }
        }
    }

    fn is_broken(&self) -> bool {
        self.broken.load(Ordering::SeqCst)
    }
}

/// Runs the service loop until end of input, a shutdown signal or a closed
/// output stream. Requests are handled by `max_parallel` workers fed through
/// a queue of `queue_depth` entries.
pub fn serve<R, W>(
    orchestrator: Arc<Orchestrator>,
    input: R,
    output: W,
    config: &ServiceConfig,
) -> Result<ServeSummary>
where
    R: BufRead + Send + 'static,
    W: Write + Send + 'static,
{
    if config.max_parallel == 0 || config.queue_depth == 0 {
        return Err(TutorboxError::Config(
            "service.max_parallel and service.queue_depth must be positive".to_string(),
        ));
    }

    let sink = Arc::new(ResponseSink::new(output));
    let in_flight = Arc::new(InFlight::default());
    let (job_tx, job_rx) = bounded::<Job>(config.queue_depth);
    let lines = spawn_reader(input, config.queue_depth)?;

    let mut workers = Vec::with_capacity(config.max_parallel);
    for index in 0..config.max_parallel {
        let jobs = job_rx.clone();
        let orchestrator = Arc::clone(&orchestrator);
        let sink = Arc::clone(&sink);
        let in_flight = Arc::clone(&in_flight);
        let handle = thread::Builder::new()
            .name(format!("tutorbox-worker-{}", index))
            .spawn(move || worker_loop(jobs, &orchestrator, &sink, &in_flight))
            .map_err(|e| TutorboxError::Process(format!("cannot spawn worker: {}", e)))?;
        workers.push(handle);
    }
    drop(job_rx);

    log::info!(
        "Serving requests with {} workers (queue depth {})",
        config.max_parallel,
        config.queue_depth
    );

    let mut summary = ServeSummary::default();
    let mut seq = 0u64;
    loop {
        if !should_continue() {
            match received_signal() {
                Some(signal) => log::info!("Received {}; cancelling in-flight requests", signal),
                None => log::info!("Shutdown requested; cancelling in-flight requests"),
            }
            summary.cancelled_on_exit = in_flight.cancel_all() > 0;
            break;
        }
        if sink.is_broken() {
            in_flight.cancel_all();
            summary.cancelled_on_exit = true;
            break;
        }

        let line = match lines.recv_timeout(POLL_INTERVAL) {
            Ok(Ok(line)) => line,
            Ok(Err(e)) => {
                log::warn!("Input read failed: {}", e);
                summary.cancelled_on_exit = in_flight.cancel_all() > 0;
                break;
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                log::debug!("End of input");
                if config.cancel_on_eof {
                    summary.cancelled_on_exit = in_flight.cancel_all() > 0;
                }
                break;
            }
        };

        if line.trim().is_empty() {
            continue;
        }
        summary.received += 1;

        let request = match serde_json::from_str::<Request>(&line) {
            Ok(request) => request,
            Err(e) => {
                summary.malformed += 1;
                let err = TutorboxError::InvalidRequest(format!("malformed request: {}", e));
                sink.send(&Response::error(request_id_of(&line), &err));
                continue;
            }
        };

        seq += 1;
        let cancel = in_flight.register(seq);
        if job_tx.send(Job { seq, request, cancel }).is_err() {
            in_flight.finish(seq);
            log::error!("All workers exited; stopping service loop");
            break;
        }
    }

    drop(job_tx);
    for worker in workers {
        if worker.join().is_err() {
            log::error!("A worker thread panicked");
        }
    }

    summary.answered = sink.answered.load(Ordering::SeqCst);
    log::info!(
        "Service loop finished: {} received, {} malformed, {} answered",
        summary.received,
        summary.malformed,
        summary.answered
    );
    Ok(summary)
}

/// Reads lines on a detached thread so a blocked read never delays shutdown.
fn spawn_reader<R>(input: R, depth: usize) -> Result<Receiver<std::io::Result<String>>>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = bounded(depth);
    thread::Builder::new()
        .name("tutorbox-reader".to_string())
        .spawn(move || {
            for line in input.lines() {
                let failed = line.is_err();
                if tx.send(line).is_err() || failed {
                    break;
                }
            }
        })
        .map_err(|e| TutorboxError::Process(format!("cannot spawn reader: {}", e)))?;
    Ok(rx)
}

fn worker_loop<W: Write>(
    jobs: Receiver<Job>,
    orchestrator: &Orchestrator,
    sink: &ResponseSink<W>,
    in_flight: &InFlight,
) {
    for job in jobs.iter() {
        let id = job.request.id.clone();
        let response = if job.cancel.is_cancelled() {
            Response::error(id, &TutorboxError::Cancelled)
        } else {
            orchestrator.handle(job.request, &job.cancel)
        };
        in_flight.finish(job.seq);
        sink.send(&response);
    }
}

/// Best-effort `id` from a line that failed to parse as a request.
fn request_id_of(line: &str) -> String {
    serde_json::from_str::<serde_json::Value>(line)
        .ok()
        .and_then(|v| match v.get("id") {
            Some(serde_json::Value::String(id)) => Some(id.clone()),
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            _ => None,
        })
        .unwrap_or_default()
}
