//! Sorted, duplicate-free list of bad block numbers.
//!
//! Strategies walk the registry with a [`RegistryCursor`] to skip blocks that
//! are already known bad, and keep inserting into it while they do so. The
//! cursor tracks how many entries sit at or below the last value it handed
//! out, so an insert behind it only needs a single [`RegistryCursor::resync`]
//! step to keep the remaining iteration unchanged.

use crate::error::{Result, ScanError};

const DEFAULT_CAPACITY: usize = 10;
const GROWTH_STEP: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Inserted,
    AlreadyPresent,
}

#[derive(Debug, Default)]
pub struct BlockRegistry {
    blocks: Vec<u64>,
}

/// Forward-only position in a [`BlockRegistry`].
#[derive(Debug, Clone, Default)]
pub struct RegistryCursor {
    index: usize,
    last: Option<u64>,
}

impl RegistryCursor {
    pub fn last(&self) -> Option<u64> {
        self.last
    }

    /// Must be called after `inserted` was added to the registry being walked.
    pub fn resync(&mut self, inserted: u64) {
        if self.last.is_some_and(|last| inserted < last) {
            self.index += 1;
        }
    }
}

impl BlockRegistry {
    pub fn create(initial_capacity: usize) -> Result<Self> {
        let capacity = if initial_capacity == 0 {
            DEFAULT_CAPACITY
        } else {
            initial_capacity
        };
        let mut blocks = Vec::new();
        blocks.try_reserve_exact(capacity).map_err(|_| ScanError::Allocation {
            bytes: capacity * size_of::<u64>(),
        })?;
        Ok(Self { blocks })
    }

    pub fn with_known(known: &[u64]) -> Result<Self> {
        let mut registry = Self::create(known.len())?;
        for &block in known {
            registry.add(block)?;
        }
        Ok(registry)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn as_slice(&self) -> &[u64] {
        &self.blocks
    }

    pub fn add(&mut self, block: u64) -> Result<AddOutcome> {
        if self.blocks.len() == self.blocks.capacity() {
            self.blocks
                .try_reserve_exact(GROWTH_STEP)
                .map_err(|_| ScanError::Allocation {
                    bytes: (self.blocks.len() + GROWTH_STEP) * size_of::<u64>(),
                })?;
        }

        match self.blocks.last() {
            None => {
                self.blocks.push(block);
                return Ok(AddOutcome::Inserted);
            }
            Some(&last) if last == block => return Ok(AddOutcome::AlreadyPresent),
            Some(&last) if last < block => {
                self.blocks.push(block);
                return Ok(AddOutcome::Inserted);
            }
            Some(_) => {}
        }

        match self.blocks.binary_search(&block) {
            Ok(_) => Ok(AddOutcome::AlreadyPresent),
            Err(at) => {
                self.blocks.insert(at, block);
                Ok(AddOutcome::Inserted)
            }
        }
    }

    pub fn contains(&self, block: u64) -> bool {
        self.find(block).is_some()
    }

    fn find(&self, block: u64) -> Option<usize> {
        let list = &self.blocks;
        if list.is_empty() {
            return None;
        }
        let mut low = 0;
        let mut high = list.len() - 1;
        if list[low] == block {
            return Some(low);
        }
        if list[high] == block {
            return Some(high);
        }
        while low < high {
            let mid = low + (high - low) / 2;
            if mid == low || mid == high {
                break;
            }
            if list[mid] == block {
                return Some(mid);
            }
            if block < list[mid] {
                high = mid;
            } else {
                low = mid;
            }
        }
        None
    }

    pub fn iterate(&self) -> RegistryCursor {
        RegistryCursor::default()
    }

    pub fn next(&self, cursor: &mut RegistryCursor) -> Option<u64> {
        let block = *self.blocks.get(cursor.index)?;
        cursor.index += 1;
        cursor.last = Some(block);
        Some(block)
    }
}

#[cfg(test)]
mod tests {
    use super::{AddOutcome, BlockRegistry};

    #[test]
    fn test_add_keeps_order_and_uniqueness() {
        let mut registry = BlockRegistry::create(0).unwrap();
        for block in [50, 10, 70, 10, 30, 70, 0, 50, 1000, 999, 30] {
            registry.add(block).unwrap();
        }
        assert_eq!(registry.as_slice(), &[0, 10, 30, 50, 70, 999, 1000]);
    }

    #[test]
    fn test_add_reports_duplicates() {
        let mut registry = BlockRegistry::create(4).unwrap();
        assert_eq!(registry.add(7).unwrap(), AddOutcome::Inserted);
        assert_eq!(registry.add(7).unwrap(), AddOutcome::AlreadyPresent);
        assert_eq!(registry.add(3).unwrap(), AddOutcome::Inserted);
        assert_eq!(registry.add(3).unwrap(), AddOutcome::AlreadyPresent);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_growth_past_initial_capacity() {
        let mut registry = BlockRegistry::create(1).unwrap();
        for block in (0..500u64).rev() {
            registry.add(block * 3).unwrap();
        }
        assert_eq!(registry.len(), 500);
        assert!(registry.as_slice().windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn test_contains_boundaries() {
        let empty = BlockRegistry::create(0).unwrap();
        assert!(!empty.contains(0));

        let registry = BlockRegistry::with_known(&[2, 4, 8, 16, 32]).unwrap();
        for block in [2, 4, 8, 16, 32] {
            assert!(registry.contains(block), "missing {block}");
        }
        for block in [0, 1, 3, 5, 15, 17, 31, 33, u64::MAX] {
            assert!(!registry.contains(block), "false positive {block}");
        }

        let single = BlockRegistry::with_known(&[9]).unwrap();
        assert!(single.contains(9));
        assert!(!single.contains(8));
        assert!(!single.contains(10));
    }

    #[test]
    fn test_cursor_walks_in_order() {
        let registry = BlockRegistry::with_known(&[5, 1, 3]).unwrap();
        let mut cursor = registry.iterate();
        assert_eq!(registry.next(&mut cursor), Some(1));
        assert_eq!(registry.next(&mut cursor), Some(3));
        assert_eq!(registry.next(&mut cursor), Some(5));
        assert_eq!(registry.next(&mut cursor), None);
        assert_eq!(cursor.last(), Some(5));
    }

    #[test]
    fn test_cursor_resync_after_insert_behind() {
        let mut registry = BlockRegistry::with_known(&[10, 20, 30]).unwrap();
        let mut cursor = registry.iterate();
        assert_eq!(registry.next(&mut cursor), Some(10));
        assert_eq!(registry.next(&mut cursor), Some(20));

        registry.add(15).unwrap();
        cursor.resync(15);
        registry.add(5).unwrap();
        cursor.resync(5);
        registry.add(25).unwrap();
        cursor.resync(25);

        assert_eq!(registry.next(&mut cursor), Some(25));
        assert_eq!(registry.next(&mut cursor), Some(30));
        assert_eq!(registry.next(&mut cursor), None);
    }

    #[test]
    fn test_cursor_unstarted_yields_everything() {
        let mut registry = BlockRegistry::with_known(&[10]).unwrap();
        let mut cursor = registry.iterate();
        registry.add(4).unwrap();
        cursor.resync(4);
        assert_eq!(registry.next(&mut cursor), Some(4));
        assert_eq!(registry.next(&mut cursor), Some(10));
    }
}
