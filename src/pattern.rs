use std::fmt;
use std::num::Wrapping;

use serde::Serialize;

/// Raw pattern value reserved for pseudo-random fill.
pub const RANDOM_PATTERN: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FillPattern {
    Fixed(u32),
    Random,
}

impl FillPattern {
    pub fn from_raw(value: u32) -> Self {
        if value == RANDOM_PATTERN {
            FillPattern::Random
        } else {
            FillPattern::Fixed(value)
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("random") {
            return Some(FillPattern::Random);
        }
        let parsed = match value
            .strip_prefix("0x")
            .or_else(|| value.strip_prefix("0X"))
        {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => value.parse().ok()?,
        };
        Some(Self::from_raw(parsed))
    }

    /// Bytes of a fixed pattern, most significant non-zero byte first.
    fn fixed_bytes(value: u32) -> Vec<u8> {
        let bytes = value.to_be_bytes();
        let skip = bytes.iter().take_while(|&&byte| byte == 0).count().min(3);
        bytes[skip..].to_vec()
    }
}

impl fmt::Display for FillPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FillPattern::Fixed(value) => write!(f, "0x{value:02X}"),
            FillPattern::Random => write!(f, "random"),
        }
    }
}

/// Seed for the random content of one block.
fn block_seed(scan_seed: u64, address: u64) -> u64 {
    let mut z = Wrapping(scan_seed ^ address);
    z += Wrapping(0x9E3779B97F4A7C15);
    z = (z ^ (z >> 30)) * Wrapping(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)) * Wrapping(0x94D049BB133111EB);
    (z ^ (z >> 31)).0
}

struct SplitMix64 {
    state: u64,
}

impl SplitMix64 {
    fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9E3779B97F4A7C15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
        z ^ (z >> 31)
    }

    fn fill(&mut self, block: &mut [u8]) {
        for chunk in block.chunks_mut(8) {
            let word = self.next_u64().to_le_bytes();
            chunk.copy_from_slice(&word[..chunk.len()]);
        }
    }
}

/// A pattern bound to a scan seed. Block contents depend only on the block
/// number, so any run of blocks can be regenerated for comparison.
#[derive(Debug, Clone, Copy)]
pub struct PatternFiller {
    pattern: FillPattern,
    seed: u64,
}

impl PatternFiller {
    pub fn new(pattern: FillPattern, seed: u64) -> Self {
        Self { pattern, seed }
    }

    pub fn pattern(&self) -> FillPattern {
        self.pattern
    }

    pub fn fill(&self, first_block: u64, block_size: usize, buffer: &mut [u8]) {
        match self.pattern {
            FillPattern::Fixed(value) => {
                let bytes = FillPattern::fixed_bytes(value);
                for block in buffer.chunks_mut(block_size) {
                    for (byte, source) in block.iter_mut().zip(bytes.iter().cycle()) {
                        *byte = *source;
                    }
                }
            }
            FillPattern::Random => {
                for (index, block) in buffer.chunks_mut(block_size).enumerate() {
                    let address = first_block + index as u64;
                    let mut rng = SplitMix64 {
                        state: block_seed(self.seed, address),
                    };
                    rng.fill(block);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{FillPattern, PatternFiller, RANDOM_PATTERN};

    #[test]
    fn test_batch_split_does_not_change_content() {
        let filler = PatternFiller::new(FillPattern::Random, 42);
        let mut whole = vec![0u8; 6 * 512];
        filler.fill(100, 512, &mut whole);

        let mut split = vec![0u8; 6 * 512];
        let (head, tail) = split.split_at_mut(2 * 512);
        filler.fill(100, 512, head);
        filler.fill(102, 512, tail);
        assert_eq!(whole, split);
    }

    #[test]
    fn test_block_variance() {
        let filler = PatternFiller::new(FillPattern::Random, 42);
        let mut block1 = vec![0u8; 512];
        let mut block2 = vec![0u8; 512];
        filler.fill(100, 512, &mut block1);
        filler.fill(200, 512, &mut block2);
        assert_ne!(block1, block2);
    }

    #[test]
    fn test_random_content_is_per_block() {
        let filler = PatternFiller::new(FillPattern::Random, 7);
        let mut run = vec![0u8; 4 * 512];
        filler.fill(10, 512, &mut run);
        let mut single = vec![0u8; 512];
        filler.fill(12, 512, &mut single);
        assert_eq!(&run[2 * 512..3 * 512], single.as_slice());
    }

    #[test]
    fn test_scan_seed_changes_content() {
        let mut first = vec![0u8; 512];
        let mut second = vec![0u8; 512];
        PatternFiller::new(FillPattern::Random, 1).fill(7, 512, &mut first);
        PatternFiller::new(FillPattern::Random, 2).fill(7, 512, &mut second);
        assert_ne!(first, second);
    }

    #[test]
    fn test_random_fill_handles_odd_block_size() {
        let filler = PatternFiller::new(FillPattern::Random, 9);
        let mut run = vec![0u8; 3 * 13];
        filler.fill(0, 13, &mut run);
        let mut last = vec![0u8; 13];
        filler.fill(2, 13, &mut last);
        assert_eq!(&run[26..], last.as_slice());
        assert!(run.iter().any(|&byte| byte != 0));
    }

    #[test]
    fn test_fixed_patterns() {
        let mut buffer = vec![0u8; 8];
        PatternFiller::new(FillPattern::Fixed(0xaa), 0).fill(0, 4, &mut buffer);
        assert!(buffer.iter().all(|&byte| byte == 0xaa));

        PatternFiller::new(FillPattern::Fixed(0), 0).fill(0, 4, &mut buffer);
        assert!(buffer.iter().all(|&byte| byte == 0));

        PatternFiller::new(FillPattern::Fixed(0x1234), 0).fill(0, 3, &mut buffer);
        assert_eq!(buffer, [0x12, 0x34, 0x12, 0x12, 0x34, 0x12, 0x12, 0x34]);
    }

    #[test]
    fn test_parse() {
        assert_eq!(FillPattern::parse("random"), Some(FillPattern::Random));
        assert_eq!(FillPattern::parse("0xAA"), Some(FillPattern::Fixed(0xaa)));
        assert_eq!(FillPattern::parse("85"), Some(FillPattern::Fixed(0x55)));
        assert_eq!(FillPattern::parse("0xffffffff"), Some(FillPattern::Random));
        assert_eq!(FillPattern::parse("zz"), None);
        assert_eq!(FillPattern::from_raw(RANDOM_PATTERN), FillPattern::Random);
    }
}
