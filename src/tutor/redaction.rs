//! Reference-solution leak guard for tutor replies.

use crate::config::types::ReasoningError;
use std::collections::HashSet;

pub const REDACTION_MARKER: &str = "[redacted]";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Screened {
    pub text: String,
    pub redacted_spans: usize,
}

/// Rejects or redacts any contiguous run of more than `threshold` characters
/// that also appears in the reference solution.
#[derive(Clone, Copy, Debug)]
pub struct LeakGuard {
    threshold: usize,
}

impl LeakGuard {
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold: threshold.max(1),
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn screen(&self, reply: &str, reference: &str) -> Result<Screened, ReasoningError> {
        let windows = self.reference_windows(reference);
        let spans = self.leaked_spans(reply, &windows);

        if spans.is_empty() {
            return non_empty(reply.trim().to_string(), 0);
        }

        let mut text = String::with_capacity(reply.len());
        let mut cursor = 0;
        for &(start, end) in &spans {
            text.push_str(&reply[cursor..start]);
            text.push_str(REDACTION_MARKER);
            cursor = end;
        }
        text.push_str(&reply[cursor..]);

        if !self.leaked_spans(&text, &windows).is_empty() {
            return Err(ReasoningError::SolutionLeak);
        }
        non_empty(text.trim().to_string(), spans.len())
    }

    /// Every (threshold + 1)-character window of the reference.
    fn reference_windows<'r>(&self, reference: &'r str) -> HashSet<&'r str> {
        let width = self.threshold + 1;
        let bounds = char_bounds(reference);
        if bounds.len() <= width {
            // a reference shorter than the window can never be exceeded
            return HashSet::new();
        }
        (0..bounds.len() - width)
            .map(|i| &reference[bounds[i]..bounds[i + width]])
            .collect()
    }

    /// Merged byte ranges of `text` covered by a leaked window.
    fn leaked_spans(&self, text: &str, windows: &HashSet<&str>) -> Vec<(usize, usize)> {
        let width = self.threshold + 1;
        let bounds = char_bounds(text);
        let mut spans: Vec<(usize, usize)> = Vec::new();
        if windows.is_empty() || bounds.len() <= width {
            return spans;
        }

        for i in 0..bounds.len() - width {
            let (start, end) = (bounds[i], bounds[i + width]);
            if !windows.contains(&text[start..end]) {
                continue;
            }
            match spans.last_mut() {
                Some(last) if start <= last.1 => last.1 = last.1.max(end),
                _ => spans.push((start, end)),
            }
        }
        spans
    }
}

/// Byte offset of every char boundary, including the end.
fn char_bounds(text: &str) -> Vec<usize> {
    text.char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect()
}

fn non_empty(text: String, redacted_spans: usize) -> Result<Screened, ReasoningError> {
    let substance = text.replace(REDACTION_MARKER, "");
    if substance.trim().is_empty() {
        return Err(if redacted_spans > 0 {
            ReasoningError::SolutionLeak
        } else {
            ReasoningError::EmptyReply
        });
    }
    Ok(Screened {
        text,
        redacted_spans,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const REFERENCE: &str = "long long factorial(int n) { long long r = 1; for (int i = 2; i <= n; ++i) r *= i; return r; }";

    #[test]
    fn test_clean_reply_passes_through() {
        let guard = LeakGuard::new(40);
        let screened = guard
            .screen("  What happens to your loop when n is 0?  ", REFERENCE)
            .unwrap();
        assert_eq!(screened.text, "What happens to your loop when n is 0?");
        assert_eq!(screened.redacted_spans, 0);
    }

    #[test]
    fn test_short_overlap_is_allowed() {
        let guard = LeakGuard::new(40);
        // 40 chars exactly is at the threshold, not over it
        let quote = &REFERENCE[..40];
        let reply = format!("Compare with `{}` in your code.", quote);
        assert_eq!(guard.screen(&reply, REFERENCE).unwrap().redacted_spans, 0);
    }

    #[test]
    fn test_long_overlap_is_redacted() {
        let guard = LeakGuard::new(40);
        let quote = &REFERENCE[10..70];
        let reply = format!("Try this: {} and see what happens?", quote);
        let screened = guard.screen(&reply, REFERENCE).unwrap();
        assert_eq!(screened.redacted_spans, 1);
        assert!(screened.text.contains(REDACTION_MARKER));
        assert!(!screened.text.contains(quote));
        for window in REFERENCE.as_bytes().windows(41) {
            let window = std::str::from_utf8(window).unwrap();
            assert!(!screened.text.contains(window));
        }
    }

    #[test]
    fn test_reply_that_is_only_the_solution_is_rejected() {
        let guard = LeakGuard::new(40);
        assert_eq!(
            guard.screen(REFERENCE, REFERENCE),
            Err(ReasoningError::SolutionLeak)
        );
    }

    #[test]
    fn test_empty_reply_is_rejected() {
        let guard = LeakGuard::new(40);
        assert_eq!(guard.screen("   ", REFERENCE), Err(ReasoningError::EmptyReply));
    }

    #[test]
    fn test_multibyte_text_is_safe() {
        let guard = LeakGuard::new(4);
        let reference = "ééééééé — λx. x";
        let screened = guard.screen("hint: ééééééé?", reference).unwrap();
        assert_eq!(screened.text, "hint: [redacted]?");
    }
}
