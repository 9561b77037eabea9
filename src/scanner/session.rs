use std::sync::Arc;

use tracing::{info, warn};

use crate::error::Result;
use crate::registry::{AddOutcome, BlockRegistry, RegistryCursor};
use crate::report::{BadBlockKind, ErrorCounts, ScanOutcome, ScanReport};

use super::progress::{CancelToken, EventSink, ScanOperation, StatusBoard, emit_error};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    Recorded,
    AlreadyKnown,
    /// The abort threshold was already reached; the block was not recorded.
    OverThreshold,
}

/// Mutable state of one scan: the bad block registry, error counters,
/// cancellation and the position published to progress observers.
pub struct ScanSession<'a> {
    registry: BlockRegistry,
    cursor: Option<RegistryCursor>,
    next_bad: Option<u64>,
    counts: ErrorCounts,
    bad_blocks: u64,
    threshold: u64,
    cancel: CancelToken,
    board: Arc<StatusBoard>,
    sink: Option<&'a dyn EventSink>,
    outcome: ScanOutcome,
}

impl<'a> ScanSession<'a> {
    pub fn new(threshold: u64, cancel: CancelToken) -> Result<Self> {
        Ok(Self {
            registry: BlockRegistry::create(0)?,
            cursor: None,
            next_bad: None,
            counts: ErrorCounts::default(),
            bad_blocks: 0,
            threshold,
            cancel,
            board: Arc::new(StatusBoard::default()),
            sink: None,
            outcome: ScanOutcome::Completed,
        })
    }

    pub fn with_known_bad(mut self, known: &[u64]) -> Result<Self> {
        for &block in known {
            self.registry.add(block)?;
        }
        Ok(self)
    }

    pub fn with_sink(mut self, sink: Option<&'a dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn board(&self) -> Arc<StatusBoard> {
        Arc::clone(&self.board)
    }

    pub fn registry(&self) -> &BlockRegistry {
        &self.registry
    }

    pub fn counts(&self) -> ErrorCounts {
        self.counts
    }

    pub fn bad_block_count(&self) -> u64 {
        self.bad_blocks
    }

    pub fn outcome(&self) -> ScanOutcome {
        self.outcome
    }

    pub(super) fn set_range(&self, first_block: u64, last_block: u64) {
        self.board.set_range(first_block, last_block);
    }

    pub(super) fn begin_pass(
        &self,
        operation: ScanOperation,
        pattern_index: usize,
        pattern_total: usize,
        two_phase: bool,
    ) {
        self.board
            .set_pass(operation, pattern_index, pattern_total, two_phase);
    }

    pub(super) fn set_position(&self, block: u64) {
        self.board.set_position(block);
    }

    /// Starts walking the known bad blocks from `first_block` onwards.
    pub(super) fn begin_known_bad(&mut self, first_block: u64) {
        let mut cursor = self.registry.iterate();
        let mut next = self.registry.next(&mut cursor);
        while next.is_some_and(|block| block < first_block) {
            next = self.registry.next(&mut cursor);
        }
        self.cursor = Some(cursor);
        self.next_bad = next;
    }

    pub(super) fn end_known_bad(&mut self) {
        self.cursor = None;
        self.next_bad = None;
    }

    /// First known bad block at or after `position`, stepping the cursor past
    /// blocks the scan has already moved beyond.
    pub(super) fn known_bad_from(&mut self, position: u64) -> Option<u64> {
        let cursor = self.cursor.as_mut()?;
        while let Some(block) = self.next_bad {
            if block >= position {
                return Some(block);
            }
            self.next_bad = self.registry.next(cursor);
        }
        None
    }

    /// Records a newly discovered bad block. Blocks already in the registry
    /// are ignored and do not touch the counters.
    pub fn report(&mut self, block: u64, kind: BadBlockKind) -> Result<ReportOutcome> {
        if self.registry.contains(block) {
            return Ok(ReportOutcome::AlreadyKnown);
        }
        if self.threshold_reached() {
            self.latch_threshold();
            return Ok(ReportOutcome::OverThreshold);
        }
        if self.registry.add(block)? == AddOutcome::AlreadyPresent {
            return Ok(ReportOutcome::AlreadyKnown);
        }
        if let Some(cursor) = self.cursor.as_mut() {
            cursor.resync(block);
        }
        self.counts.record(kind);
        self.bad_blocks += 1;
        self.board.set_counts(&self.counts);
        warn!(block, ?kind, "bad block");
        if let Some(sink) = self.sink {
            sink.bad_block(block, kind);
        }
        if self.threshold_reached() {
            self.latch_threshold();
        }
        Ok(ReportOutcome::Recorded)
    }

    pub(super) fn notify_error(&self, message: String) {
        emit_error(self.sink, message);
    }

    pub fn threshold_reached(&self) -> bool {
        self.threshold != 0 && self.bad_blocks >= self.threshold
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Polled at batch boundaries. Latches the reason the scan stopped.
    pub(super) fn should_stop(&mut self) -> bool {
        if self.outcome != ScanOutcome::Completed {
            return true;
        }
        if self.cancel.is_cancelled() {
            info!(block = self.board.snapshot().current_block, "Interrupting scan");
            self.outcome = ScanOutcome::Cancelled;
            return true;
        }
        if self.threshold_reached() {
            self.latch_threshold();
            return true;
        }
        false
    }

    /// The scan is no longer complete once the threshold is hit, even if the
    /// strategy runs to the end of the range afterwards.
    fn latch_threshold(&mut self) {
        if self.outcome == ScanOutcome::Completed {
            warn!(threshold = self.threshold, "Too many bad blocks, aborting test");
            self.outcome = ScanOutcome::ThresholdReached;
        }
    }

    pub fn finish(&self, tested_blocks: u64) -> ScanReport {
        ScanReport::new(self.bad_blocks, self.counts, tested_blocks, self.outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::{ReportOutcome, ScanSession};
    use crate::report::{BadBlockKind, ScanOutcome};
    use crate::scanner::progress::CancelToken;

    #[test]
    fn test_report_deduplicates() {
        let mut session = ScanSession::new(0, CancelToken::new()).unwrap();
        assert_eq!(session.report(42, BadBlockKind::Read).unwrap(), ReportOutcome::Recorded);
        assert_eq!(
            session.report(42, BadBlockKind::Corruption).unwrap(),
            ReportOutcome::AlreadyKnown
        );
        let counts = session.counts();
        assert_eq!(counts.read_errors, 1);
        assert_eq!(counts.corruption_errors, 0);
        assert_eq!(session.bad_block_count(), 1);
    }

    #[test]
    fn test_known_bad_blocks_are_not_counted() {
        let mut session = ScanSession::new(0, CancelToken::new())
            .unwrap()
            .with_known_bad(&[5])
            .unwrap();
        assert_eq!(session.report(5, BadBlockKind::Read).unwrap(), ReportOutcome::AlreadyKnown);
        assert_eq!(session.bad_block_count(), 0);
    }

    #[test]
    fn test_threshold_caps_recorded_blocks() {
        let mut session = ScanSession::new(2, CancelToken::new()).unwrap();
        session.report(1, BadBlockKind::Write).unwrap();
        session.report(2, BadBlockKind::Write).unwrap();
        assert_eq!(session.report(3, BadBlockKind::Write).unwrap(), ReportOutcome::OverThreshold);
        assert_eq!(session.bad_block_count(), 2);
        assert!(session.should_stop());
        assert_eq!(session.outcome(), ScanOutcome::ThresholdReached);
    }

    #[test]
    fn test_threshold_outcome_latched_without_polling() {
        let mut session = ScanSession::new(1, CancelToken::new()).unwrap();
        session.report(9, BadBlockKind::Corruption).unwrap();
        assert_eq!(session.outcome(), ScanOutcome::ThresholdReached);
        assert_eq!(session.finish(16).outcome, ScanOutcome::ThresholdReached);
    }

    #[test]
    fn test_cancel_latches_outcome() {
        let cancel = CancelToken::new();
        let mut session = ScanSession::new(0, cancel.clone()).unwrap();
        assert!(!session.should_stop());
        cancel.cancel();
        assert!(session.should_stop());
        assert_eq!(session.outcome(), ScanOutcome::Cancelled);
    }

    #[test]
    fn test_known_bad_walk_survives_inserts() {
        let mut session = ScanSession::new(0, CancelToken::new())
            .unwrap()
            .with_known_bad(&[3, 10, 20])
            .unwrap();
        session.begin_known_bad(5);
        assert_eq!(session.known_bad_from(5), Some(10));

        session.report(7, BadBlockKind::Read).unwrap();
        session.report(1, BadBlockKind::Read).unwrap();
        assert_eq!(session.known_bad_from(8), Some(10));
        assert_eq!(session.known_bad_from(11), Some(20));
        assert_eq!(session.known_bad_from(21), None);
    }
}
