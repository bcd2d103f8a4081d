/// Bounded output capture
///
/// One reader thread per stream. Readers store at most `limit` bytes and keep
/// draining past it so the child never blocks on a full pipe.
use crate::config::types::OutputIntegrity;
use crossbeam_channel::{bounded, Receiver};
use std::io::Read;
use std::thread;
use std::time::{Duration, Instant};

/// Appended to stored text whenever a stream exceeded its cap.
pub const TRUNCATION_MARKER: &str = "\n[output truncated]";

/// Bytes captured from one stream
#[derive(Debug, Clone, Default)]
pub struct StreamCapture {
    pub data: Vec<u8>,
    /// Total bytes the child wrote, including the discarded tail
    pub total_bytes: u64,
    pub integrity: OutputIntegrity,
}

impl StreamCapture {
    /// Lossy UTF-8 text, with the marker when the stream was cut.
    pub fn into_text(self) -> String {
        let mut text = String::from_utf8_lossy(&self.data).into_owned();
        if self.integrity == OutputIntegrity::TruncatedByJudgeLimit {
            text.push_str(TRUNCATION_MARKER);
        }
        text
    }
}

/// Output collection result
#[derive(Debug, Clone, Default)]
pub struct CapturedOutput {
    pub stdout: StreamCapture,
    pub stderr: StreamCapture,
}

impl CapturedOutput {
    /// Worst integrity across both streams
    pub fn combined_integrity(&self) -> OutputIntegrity {
        let both = [self.stdout.integrity, self.stderr.integrity];
        if both.contains(&OutputIntegrity::ReadError) {
            OutputIntegrity::ReadError
        } else if both.contains(&OutputIntegrity::TruncatedByJudgeLimit) {
            OutputIntegrity::TruncatedByJudgeLimit
        } else {
            OutputIntegrity::Complete
        }
    }
}

/// Collectors in flight for one child
pub struct OutputCollector {
    stdout: Option<Receiver<StreamCapture>>,
    stderr: Option<Receiver<StreamCapture>>,
}

impl OutputCollector {
    /// Start draining both streams. `None` streams yield empty captures.
    pub fn spawn<O, E>(stdout: Option<O>, stderr: Option<E>, limit: usize) -> Self
    where
        O: Read + Send + 'static,
        E: Read + Send + 'static,
    {
        Self {
            stdout: stdout.map(|s| spawn_reader("stdout", s, limit)),
            stderr: stderr.map(|s| spawn_reader("stderr", s, limit)),
        }
    }

    /// Wait for both readers to hit EOF.
    ///
    /// A stream still open at the deadline (a descendant kept the pipe) is
    /// reported as `ReadError` with nothing captured.
    pub fn finish(self, timeout: Duration) -> CapturedOutput {
        let deadline = Instant::now() + timeout;
        CapturedOutput {
            stdout: receive(self.stdout, deadline, "stdout"),
            stderr: receive(self.stderr, deadline, "stderr"),
        }
    }
}

fn spawn_reader<R: Read + Send + 'static>(
    name: &'static str,
    stream: R,
    limit: usize,
) -> Receiver<StreamCapture> {
    let (tx, rx) = bounded(1);
    let spawned = thread::Builder::new()
        .name(format!("capture-{}", name))
        .spawn(move || {
            let _ = tx.send(drain(stream, limit));
        });
    if let Err(e) = spawned {
        log::error!("Failed to start {} reader: {}", name, e);
    }
    rx
}

fn receive(
    rx: Option<Receiver<StreamCapture>>,
    deadline: Instant,
    name: &str,
) -> StreamCapture {
    let Some(rx) = rx else {
        return StreamCapture::default();
    };
    match rx.recv_deadline(deadline) {
        Ok(capture) => capture,
        Err(_) => {
            log::warn!("{} reader did not finish before the collection deadline", name);
            StreamCapture {
                integrity: OutputIntegrity::ReadError,
                ..StreamCapture::default()
            }
        }
    }
}

/// Read to EOF, keeping at most `limit` bytes.
pub fn drain<R: Read>(mut stream: R, limit: usize) -> StreamCapture {
    let mut capture = StreamCapture::default();
    let mut chunk = [0u8; 8192];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                capture.total_bytes += n as u64;
                let room = limit.saturating_sub(capture.data.len());
                if n > room {
                    capture.data.extend_from_slice(&chunk[..room]);
                    capture.integrity = OutputIntegrity::TruncatedByJudgeLimit;
                } else {
                    capture.data.extend_from_slice(&chunk[..n]);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                log::debug!("stream read failed: {}", e);
                if capture.integrity == OutputIntegrity::Complete {
                    capture.integrity = OutputIntegrity::ReadError;
                }
                break;
            }
        }
    }

    capture
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_drain_under_limit() {
        let capture = drain(Cursor::new(b"hello\n".to_vec()), 64);
        assert_eq!(capture.integrity, OutputIntegrity::Complete);
        assert_eq!(capture.into_text(), "hello\n");
    }

    #[test]
    fn test_drain_keeps_reading_past_limit() {
        let payload = vec![b'x'; 100_000];
        let capture = drain(Cursor::new(payload), 10);
        assert_eq!(capture.data.len(), 10);
        assert_eq!(capture.total_bytes, 100_000);
        assert_eq!(capture.integrity, OutputIntegrity::TruncatedByJudgeLimit);
        assert_eq!(capture.into_text(), format!("xxxxxxxxxx{}", TRUNCATION_MARKER));
    }

    #[test]
    fn test_collector_without_streams() {
        let collector =
            OutputCollector::spawn::<Cursor<Vec<u8>>, Cursor<Vec<u8>>>(None, None, 16);
        let output = collector.finish(Duration::from_millis(100));
        assert!(output.stdout.data.is_empty());
        assert_eq!(output.combined_integrity(), OutputIntegrity::Complete);
    }

    #[test]
    fn test_collector_reports_worst_integrity() {
        let collector = OutputCollector::spawn(
            Some(Cursor::new(b"ok".to_vec())),
            Some(Cursor::new(vec![b'e'; 64])),
            8,
        );
        let output = collector.finish(Duration::from_secs(1));
        assert_eq!(output.stdout.integrity, OutputIntegrity::Complete);
        assert_eq!(
            output.combined_integrity(),
            OutputIntegrity::TruncatedByJudgeLimit
        );
    }
}
