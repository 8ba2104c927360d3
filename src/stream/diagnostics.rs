//! Bounded log of producer diagnostic output.

use parking_lot::Mutex;
use std::collections::VecDeque;

/// Lines that show up on every corrupt frame and carry no information.
const BENIGN_PATTERNS: &[&str] = &["Corrupt JPEG data"];

/// Fixed-capacity ring of diagnostic lines; the oldest line is evicted first.
#[derive(Debug)]
pub struct DiagnosticLog {
    lines: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl DiagnosticLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Records one line, evicting the oldest entry when full.
    pub fn push(&self, line: impl Into<String>) {
        let mut lines = self.lines.lock();
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line.into());
    }

    /// Records one line of raw producer output.
    ///
    /// Blank lines and known-benign decoder chatter are dropped.
    pub fn push_producer_line(&self, raw: &str) -> bool {
        let line = raw.trim_end();
        if line.is_empty() || BENIGN_PATTERNS.iter().any(|p| line.contains(p)) {
            return false;
        }
        self.push(line);
        true
    }

    /// Returns up to `n` of the most recent lines, oldest first.
    pub fn tail(&self, n: usize) -> Vec<String> {
        let lines = self.lines.lock();
        let skip = lines.len().saturating_sub(n);
        lines.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.lock().is_empty()
    }
}
