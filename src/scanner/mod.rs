mod batch;
mod device;
mod direct_io;
mod memory;
mod non_destructive;
mod progress;
mod read_only;
mod read_write;
mod session;

use std::fmt;
use std::sync::mpsc;
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tracing::{info, info_span};

use crate::config::ScanConfig;
use crate::error::{Result, ScanError};
use crate::report::ScanReport;

pub use device::{BlockDevice, FileDevice};
pub use memory::MemoryDevice;
pub use non_destructive::SavedBlockRecord;
pub use progress::{CancelToken, EventSink, ProgressUpdate, ScanOperation, StatusBoard};
pub use session::{ReportOutcome, ScanSession};

use progress::{emit_progress, monitor};

const BUFFER_ALIGNMENT: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TestType {
    ReadOnly,
    ReadWrite,
    NonDestructive,
}

impl fmt::Display for TestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TestType::ReadOnly => "read-only",
            TestType::ReadWrite => "read-write",
            TestType::NonDestructive => "non-destructive",
        };
        f.write_str(name)
    }
}

/// Half-open block range `[first_block, last_block)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanRange {
    pub first_block: u64,
    pub last_block: u64,
}

impl ScanRange {
    pub fn new(first_block: u64, last_block: u64) -> Self {
        Self {
            first_block,
            last_block,
        }
    }

    pub fn whole(total_blocks: u64) -> Self {
        Self::new(0, total_blocks)
    }

    pub fn len(&self) -> u64 {
        self.last_block.saturating_sub(self.first_block)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct BadBlockScanner {
    test_type: TestType,
    config: ScanConfig,
}

impl BadBlockScanner {
    pub fn new(test_type: TestType) -> Self {
        Self::with_config(test_type, ScanConfig::default())
    }

    pub fn with_config(test_type: TestType, config: ScanConfig) -> Self {
        Self { test_type, config }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn run(
        &self,
        device: &mut dyn BlockDevice,
        range: ScanRange,
        cancel: CancelToken,
        sink: Option<&dyn EventSink>,
    ) -> Result<ScanReport> {
        self.config.validate()?;
        if range.first_block > range.last_block {
            return Err(ScanError::InvalidConfig(format!(
                "first block {} is past last block {}",
                range.first_block, range.last_block
            )));
        }

        let seed = self.config.random_seed.unwrap_or_else(time_seed);
        let mut session = ScanSession::new(self.config.abort_threshold, cancel)?
            .with_known_bad(&self.config.known_bad_blocks)?
            .with_sink(sink);
        session.set_range(range.first_block, range.last_block);
        let board = session.board();

        let span = info_span!("scan", test = %self.test_type, blocks = range.len());
        let _guard = span.enter();
        info!(
            block_size = self.config.block_size,
            blocks_at_once = self.config.blocks_at_once,
            threshold = self.config.abort_threshold,
            known_bad = session.registry().len(),
            "Bad block scan start"
        );

        let result = thread::scope(|scope| {
            let (stop_tx, stop_rx) = mpsc::channel::<()>();
            if let Some(sink) = sink {
                let board = &*board;
                let interval = self.config.progress_interval;
                scope.spawn(move || monitor(board, sink, interval, stop_rx));
            }
            let result = self.dispatch(device, &mut session, range, seed);
            drop(stop_tx);
            result
        });

        emit_progress(sink, board.snapshot());
        result?;

        let report = session.finish(range.len());
        info!(
            outcome = ?report.outcome,
            bad_blocks = report.bad_block_count,
            "{}",
            report.conclusion()
        );
        Ok(report)
    }

    fn dispatch(
        &self,
        device: &mut dyn BlockDevice,
        session: &mut ScanSession<'_>,
        range: ScanRange,
        seed: u64,
    ) -> Result<()> {
        let block_size = self.config.block_size;
        let blocks_at_once = self.config.blocks_at_once;
        match self.test_type {
            TestType::ReadOnly => read_only::test_ro(device, session, range, block_size, blocks_at_once),
            TestType::ReadWrite => read_write::test_rw(
                device,
                session,
                range,
                block_size,
                blocks_at_once,
                &self.config.read_write_patterns,
                seed,
            ),
            TestType::NonDestructive => non_destructive::test_nd(
                device,
                session,
                range,
                block_size,
                blocks_at_once,
                &self.config.non_destructive_patterns,
                seed,
            ),
        }
    }
}

/// Scans `[0, total_blocks)` with the default configuration.
pub fn scan(
    device: &mut dyn BlockDevice,
    total_blocks: u64,
    block_size: usize,
    test_type: TestType,
) -> Result<ScanReport> {
    let config = ScanConfig {
        block_size,
        ..ScanConfig::default()
    };
    BadBlockScanner::with_config(test_type, config).run(
        device,
        ScanRange::whole(total_blocks),
        CancelToken::new(),
        None,
    )
}

fn time_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos() as u64)
        .unwrap_or(0)
}
