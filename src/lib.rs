mod app;
mod config;
mod error;
mod pattern;
mod registry;
mod report;
mod scanner;

pub use crate::app::{load_block_list, run_cli};
pub use crate::config::ScanConfig;
pub use crate::error::{Result, ScanError};
pub use crate::pattern::{FillPattern, PatternFiller, RANDOM_PATTERN};
pub use crate::registry::{AddOutcome, BlockRegistry, RegistryCursor};
pub use crate::report::{BadBlockKind, ErrorCounts, ScanOutcome, ScanReport};
pub use crate::scanner::{
    BadBlockScanner, BlockDevice, CancelToken, EventSink, FileDevice, MemoryDevice,
    ProgressUpdate, ReportOutcome, SavedBlockRecord, ScanOperation, ScanRange, ScanSession,
    StatusBoard, TestType, scan,
};
