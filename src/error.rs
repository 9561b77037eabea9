use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("failed to allocate {bytes} bytes for scan buffers")]
    Allocation { bytes: usize },
    #[error("invalid scan configuration: {0}")]
    InvalidConfig(String),
    #[error("invalid block number {value:?} on line {line} of block list")]
    InvalidBlockList { line: usize, value: String },
    #[error("device I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, ScanError>;
