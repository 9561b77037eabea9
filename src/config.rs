use std::time::Duration;

use crate::error::{Result, ScanError};
use crate::pattern::FillPattern;

pub const DEFAULT_BLOCK_SIZE: usize = 512;
pub const DEFAULT_BLOCKS_AT_ONCE: usize = 64;
pub const DEFAULT_ABORT_THRESHOLD: u64 = 32;

#[derive(Clone, Debug)]
pub struct ScanConfig {
    pub block_size: usize,
    pub blocks_at_once: usize,
    /// Distinct bad blocks at which the scan gives up. Zero disables the limit.
    pub abort_threshold: u64,
    pub read_write_patterns: Vec<FillPattern>,
    pub non_destructive_patterns: Vec<FillPattern>,
    pub random_seed: Option<u64>,
    pub progress_interval: Duration,
    pub known_bad_blocks: Vec<u64>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            blocks_at_once: DEFAULT_BLOCKS_AT_ONCE,
            abort_threshold: DEFAULT_ABORT_THRESHOLD,
            read_write_patterns: vec![
                FillPattern::Fixed(0xaa),
                FillPattern::Fixed(0x55),
                FillPattern::Fixed(0xff),
                FillPattern::Fixed(0x00),
                FillPattern::Random,
            ],
            non_destructive_patterns: vec![FillPattern::Random],
            random_seed: None,
            progress_interval: Duration::from_secs(1),
            known_bad_blocks: Vec::new(),
        }
    }
}

impl ScanConfig {
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(ScanError::InvalidConfig(
                "block size must be greater than zero".to_string(),
            ));
        }
        if self.blocks_at_once == 0 {
            return Err(ScanError::InvalidConfig(
                "blocks at once must be greater than zero".to_string(),
            ));
        }
        if self.block_size.checked_mul(self.blocks_at_once).is_none() {
            return Err(ScanError::InvalidConfig(format!(
                "batch of {} blocks of {} bytes overflows",
                self.blocks_at_once, self.block_size
            )));
        }
        if self.read_write_patterns.is_empty() || self.non_destructive_patterns.is_empty() {
            return Err(ScanError::InvalidConfig(
                "at least one fill pattern is required".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::ScanConfig;

    #[test]
    fn test_default_is_valid() {
        assert!(ScanConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_sizes() {
        let config = ScanConfig {
            block_size: 0,
            ..ScanConfig::default()
        };
        assert!(config.validate().is_err());

        let config = ScanConfig {
            blocks_at_once: 0,
            ..ScanConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_empty_patterns() {
        let config = ScanConfig {
            read_write_patterns: Vec::new(),
            ..ScanConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
