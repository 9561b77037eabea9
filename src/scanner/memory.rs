use std::collections::BTreeSet;
use std::io::{self, ErrorKind};

use super::device::BlockDevice;

/// In-memory device with injectable failures, for dry runs and tests.
///
/// Transfers stop at the first faulty block, so a batch covering one returns
/// the count of healthy blocks in front of it.
#[derive(Debug, Clone)]
pub struct MemoryDevice {
    data: Vec<u8>,
    block_size: usize,
    unreadable: BTreeSet<u64>,
    unwritable: BTreeSet<u64>,
    /// Blocks that accept writes but keep their old content.
    stuck: BTreeSet<u64>,
    reads: u64,
    writes: u64,
}

impl MemoryDevice {
    pub fn new(total_blocks: u64, block_size: usize) -> Self {
        Self::from_bytes(vec![0u8; total_blocks as usize * block_size], block_size)
    }

    pub fn from_bytes(data: Vec<u8>, block_size: usize) -> Self {
        Self {
            data,
            block_size,
            unreadable: BTreeSet::new(),
            unwritable: BTreeSet::new(),
            stuck: BTreeSet::new(),
            reads: 0,
            writes: 0,
        }
    }

    pub fn fail_reads(mut self, blocks: impl IntoIterator<Item = u64>) -> Self {
        self.unreadable.extend(blocks);
        self
    }

    pub fn fail_writes(mut self, blocks: impl IntoIterator<Item = u64>) -> Self {
        self.unwritable.extend(blocks);
        self
    }

    pub fn ignore_writes(mut self, blocks: impl IntoIterator<Item = u64>) -> Self {
        self.stuck.extend(blocks);
        self
    }

    pub fn total_blocks(&self) -> u64 {
        (self.data.len() / self.block_size) as u64
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn block(&self, block: u64) -> &[u8] {
        let start = block as usize * self.block_size;
        &self.data[start..start + self.block_size]
    }

    pub fn read_calls(&self) -> u64 {
        self.reads
    }

    pub fn write_calls(&self) -> u64 {
        self.writes
    }

    fn check_geometry(&self, block_size: usize) -> io::Result<()> {
        if block_size != self.block_size {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                "Block size does not match device geometry.",
            ));
        }
        Ok(())
    }

    fn healthy_prefix(&self, faulty: &BTreeSet<u64>, first_block: u64, count: usize) -> usize {
        let end = (first_block + count as u64).min(self.total_blocks());
        if first_block >= end {
            return 0;
        }
        let stop = faulty.range(first_block..end).next().copied().unwrap_or(end);
        (stop - first_block) as usize
    }
}

impl BlockDevice for MemoryDevice {
    fn read_blocks(
        &mut self,
        block_size: usize,
        first_block: u64,
        count: usize,
        buf: &mut [u8],
    ) -> io::Result<usize> {
        self.check_geometry(block_size)?;
        self.reads += 1;
        let got = self.healthy_prefix(&self.unreadable, first_block, count);
        if got == 0 && count > 0 {
            return Err(io::Error::other(format!("unreadable block {first_block}")));
        }
        let start = first_block as usize * block_size;
        let len = got * block_size;
        buf[..len].copy_from_slice(&self.data[start..start + len]);
        Ok(got)
    }

    fn write_blocks(
        &mut self,
        block_size: usize,
        first_block: u64,
        count: usize,
        buf: &[u8],
    ) -> io::Result<usize> {
        self.check_geometry(block_size)?;
        self.writes += 1;
        let got = self.healthy_prefix(&self.unwritable, first_block, count);
        for index in 0..got {
            let block = first_block + index as u64;
            if self.stuck.contains(&block) {
                continue;
            }
            let start = block as usize * block_size;
            let source = &buf[index * block_size..(index + 1) * block_size];
            self.data[start..start + block_size].copy_from_slice(source);
        }
        Ok(got)
    }
}
