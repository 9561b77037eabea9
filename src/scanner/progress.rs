use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;

use serde::Serialize;
use tracing::trace;

use crate::report::{BadBlockKind, ErrorCounts};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanOperation {
    Read,
    Write,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressUpdate {
    pub operation: ScanOperation,
    pub pattern_index: usize,
    pub pattern_total: usize,
    pub percent: f64,
    pub current_block: u64,
    pub read_errors: u64,
    pub write_errors: u64,
    pub corruption_errors: u64,
}

pub trait EventSink: Send + Sync {
    fn progress(&self, update: ProgressUpdate);

    fn bad_block(&self, _block: u64, _kind: BadBlockKind) {}

    fn error(&self, _message: String) {}
}

/// Cooperative cancellation flag shared between the scan and its observers.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_flag(flag: Arc<AtomicBool>) -> Self {
        Self(flag)
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Scan position and counters, written by the scan thread and sampled by the monitor.
#[derive(Debug, Default)]
pub struct StatusBoard {
    operation: AtomicU8,
    pattern_index: AtomicU64,
    pattern_total: AtomicU64,
    two_phase: AtomicBool,
    first_block: AtomicU64,
    last_block: AtomicU64,
    current_block: AtomicU64,
    read_errors: AtomicU64,
    write_errors: AtomicU64,
    corruption_errors: AtomicU64,
}

const OP_READ: u8 = 0;
const OP_WRITE: u8 = 1;

impl StatusBoard {
    pub(super) fn set_range(&self, first_block: u64, last_block: u64) {
        self.first_block.store(first_block, Ordering::Relaxed);
        self.last_block.store(last_block, Ordering::Relaxed);
        self.current_block.store(first_block, Ordering::Relaxed);
    }

    pub(super) fn set_pass(
        &self,
        operation: ScanOperation,
        pattern_index: usize,
        pattern_total: usize,
        two_phase: bool,
    ) {
        let op = match operation {
            ScanOperation::Read => OP_READ,
            ScanOperation::Write => OP_WRITE,
        };
        self.operation.store(op, Ordering::Relaxed);
        self.pattern_index.store(pattern_index as u64, Ordering::Relaxed);
        self.pattern_total.store(pattern_total as u64, Ordering::Relaxed);
        self.two_phase.store(two_phase, Ordering::Relaxed);
    }

    pub(super) fn set_position(&self, block: u64) {
        self.current_block.store(block, Ordering::Relaxed);
    }

    pub(super) fn set_counts(&self, counts: &ErrorCounts) {
        self.read_errors.store(counts.read_errors, Ordering::Relaxed);
        self.write_errors.store(counts.write_errors, Ordering::Relaxed);
        self.corruption_errors
            .store(counts.corruption_errors, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProgressUpdate {
        let operation = if self.operation.load(Ordering::Relaxed) == OP_WRITE {
            ScanOperation::Write
        } else {
            ScanOperation::Read
        };
        let first = self.first_block.load(Ordering::Relaxed);
        let last = self.last_block.load(Ordering::Relaxed);
        let current = self.current_block.load(Ordering::Relaxed);
        let pattern_index = self.pattern_index.load(Ordering::Relaxed).max(1) as usize;
        let pattern_total = self.pattern_total.load(Ordering::Relaxed).max(1) as usize;

        let mut pass = percent_of(current.saturating_sub(first), last.saturating_sub(first));
        if self.two_phase.load(Ordering::Relaxed) {
            pass = pass / 2.0 + if operation == ScanOperation::Read { 50.0 } else { 0.0 };
        }
        let percent = ((pattern_index - 1) as f64 * 100.0 + pass) / pattern_total as f64;

        ProgressUpdate {
            operation,
            pattern_index,
            pattern_total,
            percent,
            current_block: current,
            read_errors: self.read_errors.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
            corruption_errors: self.corruption_errors.load(Ordering::Relaxed),
        }
    }
}

pub(super) fn percent_of(done: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else if done >= total {
        100.0
    } else {
        (done as f64 / total as f64) * 100.0
    }
}

pub(super) fn emit_progress(sink: Option<&dyn EventSink>, update: ProgressUpdate) {
    if let Some(sink) = sink {
        sink.progress(update);
    }
}

pub(super) fn emit_error(sink: Option<&dyn EventSink>, message: String) {
    if let Some(sink) = sink {
        sink.error(message);
    }
}

/// Samples `board` every `interval` until `stop` is signalled or dropped.
pub(super) fn monitor(
    board: &StatusBoard,
    sink: &dyn EventSink,
    interval: Duration,
    stop: Receiver<()>,
) {
    loop {
        match stop.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {
                let update = board.snapshot();
                trace!(percent = update.percent, block = update.current_block, "progress tick");
                sink.progress(update);
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{CancelToken, ScanOperation, StatusBoard, percent_of};

    #[test]
    fn test_percent_of() {
        assert_eq!(percent_of(0, 0), 0.0);
        assert_eq!(percent_of(50, 100), 50.0);
        assert_eq!(percent_of(150, 100), 100.0);
    }

    #[test]
    fn test_two_phase_percent() {
        let board = StatusBoard::default();
        board.set_range(0, 100);
        board.set_pass(ScanOperation::Write, 1, 2, true);
        board.set_position(50);
        assert_eq!(board.snapshot().percent, 12.5);

        board.set_pass(ScanOperation::Read, 2, 2, true);
        board.set_position(100);
        assert_eq!(board.snapshot().percent, 100.0);
    }

    #[test]
    fn test_single_phase_percent() {
        let board = StatusBoard::default();
        board.set_range(100, 200);
        board.set_pass(ScanOperation::Read, 1, 1, false);
        board.set_position(125);
        let update = board.snapshot();
        assert_eq!(update.percent, 25.0);
        assert_eq!(update.current_block, 125);
    }

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let observer = token.clone();
        assert!(!observer.is_cancelled());
        token.cancel();
        assert!(observer.is_cancelled());
    }
}
