use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BadBlockKind {
    Read,
    Write,
    Corruption,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ErrorCounts {
    pub read_errors: u64,
    pub write_errors: u64,
    pub corruption_errors: u64,
}

impl ErrorCounts {
    pub fn record(&mut self, kind: BadBlockKind) {
        match kind {
            BadBlockKind::Read => self.read_errors += 1,
            BadBlockKind::Write => self.write_errors += 1,
            BadBlockKind::Corruption => self.corruption_errors += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.read_errors + self.write_errors + self.corruption_errors
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanOutcome {
    Completed,
    Cancelled,
    ThresholdReached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub bad_block_count: u64,
    pub read_errors: u64,
    pub write_errors: u64,
    pub corruption_errors: u64,
    pub tested_blocks: u64,
    pub outcome: ScanOutcome,
}

impl ScanReport {
    pub fn new(bad_block_count: u64, counts: ErrorCounts, tested_blocks: u64, outcome: ScanOutcome) -> Self {
        Self {
            bad_block_count,
            read_errors: counts.read_errors,
            write_errors: counts.write_errors,
            corruption_errors: counts.corruption_errors,
            tested_blocks,
            outcome,
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.outcome != ScanOutcome::Completed
    }

    pub fn conclusion(&self) -> String {
        let plural = if self.bad_block_count == 1 { "" } else { "s" };
        let base = match self.outcome {
            ScanOutcome::Completed => "Check completed",
            ScanOutcome::Cancelled => "Check cancelled",
            ScanOutcome::ThresholdReached => "Check aborted: too many bad blocks",
        };
        format!(
            "{base}, {} bad block{plural} found. ({}/{}/{} errors)",
            self.bad_block_count, self.read_errors, self.write_errors, self.corruption_errors
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{BadBlockKind, ErrorCounts, ScanOutcome, ScanReport};

    #[test]
    fn test_counts_by_kind() {
        let mut counts = ErrorCounts::default();
        counts.record(BadBlockKind::Read);
        counts.record(BadBlockKind::Read);
        counts.record(BadBlockKind::Corruption);
        assert_eq!(counts.read_errors, 2);
        assert_eq!(counts.write_errors, 0);
        assert_eq!(counts.corruption_errors, 1);
        assert_eq!(counts.total(), 3);
    }

    #[test]
    fn test_conclusion_text() {
        let mut counts = ErrorCounts::default();
        counts.record(BadBlockKind::Write);
        let report = ScanReport::new(1, counts, 100, ScanOutcome::Completed);
        assert_eq!(report.conclusion(), "Check completed, 1 bad block found. (0/1/0 errors)");
        assert!(!report.is_aborted());

        let report = ScanReport::new(0, ErrorCounts::default(), 100, ScanOutcome::Cancelled);
        assert!(report.is_aborted());
        assert!(report.conclusion().starts_with("Check cancelled, 0 bad blocks"));
    }
}
