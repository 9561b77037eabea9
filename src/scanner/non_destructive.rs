//! Save, test and restore.
//!
//! Runs of original content are read into the save buffer and recorded as
//! [`SavedBlockRecord`]s *before* test data overwrites them. Once the buffer
//! fills up (or the range ends) every recorded run is read back, compared with
//! the test data and rewritten from the save buffer. The records live in a
//! [`Workspace`] whose `Drop` writes any still pending runs back, so early
//! returns, errors and panics cannot leave test data behind.

use tracing::{error, info, warn};

use crate::error::Result;
use crate::pattern::{FillPattern, PatternFiller};
use crate::report::BadBlockKind;

use super::batch::{BatchSizer, clamp_batch, do_read, do_write};
use super::device::BlockDevice;
use super::direct_io::AlignedBuffer;
use super::progress::ScanOperation;
use super::session::ScanSession;
use super::{BUFFER_ALIGNMENT, ScanRange};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SavedBlockRecord {
    pub start: u64,
    pub count: usize,
}

struct Workspace<'d> {
    device: &'d mut dyn BlockDevice,
    block_size: usize,
    save: AlignedBuffer,
    test: AlignedBuffer,
    read: AlignedBuffer,
    records: Vec<SavedBlockRecord>,
    used: usize,
}

impl<'d> Workspace<'d> {
    fn new(device: &'d mut dyn BlockDevice, block_size: usize, blocks_at_once: usize) -> Result<Self> {
        let bytes = blocks_at_once * block_size;
        Ok(Self {
            device,
            block_size,
            save: AlignedBuffer::new(bytes, BUFFER_ALIGNMENT)?,
            test: AlignedBuffer::new(bytes, BUFFER_ALIGNMENT)?,
            read: AlignedBuffer::new(bytes, BUFFER_ALIGNMENT)?,
            records: Vec::with_capacity(blocks_at_once),
            used: 0,
        })
    }

    fn used(&self) -> usize {
        self.used
    }

    fn has_pending(&self) -> bool {
        !self.records.is_empty()
    }

    /// Reads up to `tryout` blocks of original content into the next free
    /// part of the save buffer.
    fn save_run(&mut self, position: u64, tryout: usize) -> usize {
        let offset = self.used * self.block_size;
        let target = &mut self.save.as_mut_slice()[offset..];
        do_read(&mut *self.device, target, tryout, self.block_size, position)
    }

    /// Records the run saved by the last `save_run`, then overwrites it with
    /// test data. Returns how many blocks took the test data. After a short
    /// write only the written blocks and the failed one stay recorded; the
    /// rest of the run was never touched and is left for a later batch.
    fn overwrite_run(
        &mut self,
        session: &mut ScanSession<'_>,
        filler: &PatternFiller,
        position: u64,
        got: usize,
    ) -> Result<usize> {
        self.records.push(SavedBlockRecord {
            start: position,
            count: got,
        });
        let offset = self.used * self.block_size;
        self.used += got;

        let test = &mut self.test.as_mut_slice()[offset..offset + got * self.block_size];
        filler.fill(position, self.block_size, test);
        let written = do_write(&mut *self.device, test, got, self.block_size, position);
        if written < got {
            let block = position + written as u64;
            warn!(block, "Error during test data write");
            session.report(block, BadBlockKind::Write)?;
            let kept = written + 1;
            if let Some(record) = self.records.last_mut() {
                record.count = kept;
            }
            self.used -= got - kept;
        }
        Ok(written)
    }

    /// Reads back every saved run, reports mismatches and unreadable blocks,
    /// and writes the original content back regardless of the result.
    fn verify_and_restore(&mut self, session: &mut ScanSession<'_>) -> Result<()> {
        let block_size = self.block_size;
        let mut offset = 0;

        for index in 0..self.records.len() {
            let record = self.records[index];
            let mut block = record.start;
            let mut remaining = record.count;

            while remaining > 0 {
                let bytes = offset * block_size;
                let target = &mut self.read.as_mut_slice()[bytes..];
                let got = do_read(&mut *self.device, target, remaining, block_size, block);

                let expected = &self.test.as_slice()[bytes..bytes + got * block_size];
                let actual = &self.read.as_slice()[bytes..bytes + got * block_size];
                for (i, (want, have)) in expected
                    .chunks(block_size)
                    .zip(actual.chunks(block_size))
                    .enumerate()
                {
                    if want != have {
                        session.report(block + i as u64, BadBlockKind::Corruption)?;
                    }
                }

                let mut done = got;
                if got < remaining {
                    session.report(block + got as u64, BadBlockKind::Read)?;
                    done += 1;
                }

                let original = &self.save.as_slice()[bytes..bytes + done * block_size];
                let restored = do_write(&mut *self.device, original, done, block_size, block);
                if restored != done {
                    let failed = block + restored as u64;
                    error!(block = failed, "Unable to restore original content");
                    session.notify_error(format!(
                        "Unable to restore original content of block {failed}"
                    ));
                }

                block += done as u64;
                offset += done;
                remaining -= done;
            }
        }

        self.records.clear();
        self.used = 0;
        Ok(())
    }

    /// Writes the saved content of every pending run back without verifying.
    fn restore_pending(&mut self) {
        if self.records.is_empty() {
            return;
        }
        info!(runs = self.records.len(), "Restoring original content of pending blocks");
        let block_size = self.block_size;
        let mut offset = 0;
        for record in &self.records {
            let bytes = offset * block_size;
            let original = &self.save.as_slice()[bytes..bytes + record.count * block_size];
            let restored = do_write(&mut *self.device, original, record.count, block_size, record.start);
            if restored != record.count {
                error!(
                    block = record.start + restored as u64,
                    "Unable to restore original content"
                );
            }
            offset += record.count;
        }
        self.records.clear();
        self.used = 0;
    }
}

impl Drop for Workspace<'_> {
    fn drop(&mut self) {
        if self.has_pending() {
            warn!("Scan interrupted with test data on disk, cleaning up");
            self.restore_pending();
        }
    }
}

pub(super) fn test_nd(
    device: &mut dyn BlockDevice,
    session: &mut ScanSession<'_>,
    range: ScanRange,
    block_size: usize,
    blocks_at_once: usize,
    patterns: &[FillPattern],
    seed: u64,
) -> Result<()> {
    let mut workspace = Workspace::new(device, block_size, blocks_at_once)?;

    info!(
        first_block = range.first_block,
        last_block = range.last_block.saturating_sub(1),
        "Checking for bad blocks in non-destructive read-write mode"
    );
    let mut stopped = false;
    for (index, &pattern) in patterns.iter().enumerate() {
        if session.should_stop() {
            stopped = true;
            break;
        }
        let filler = PatternFiller::new(pattern, seed);
        info!(%pattern, pass = index + 1, of = patterns.len(), "Testing with pattern");
        session.begin_pass(ScanOperation::Write, index + 1, patterns.len(), false);
        session.begin_known_bad(range.first_block);

        let finished = nd_pass(&mut workspace, session, range, blocks_at_once, &filler)?;
        session.end_known_bad();
        if !finished {
            stopped = true;
            break;
        }
    }

    if stopped {
        workspace.restore_pending();
    }
    Ok(())
}

/// One pattern over the whole range. Returns false when stopped early, with
/// any unverified runs still pending in `workspace`.
fn nd_pass(
    workspace: &mut Workspace<'_>,
    session: &mut ScanSession<'_>,
    range: ScanRange,
    blocks_at_once: usize,
    filler: &PatternFiller,
) -> Result<bool> {
    let mut sizer = BatchSizer::new(blocks_at_once);
    let mut position = range.first_block;

    while position < range.last_block {
        session.set_position(position);
        if session.should_stop() {
            return Ok(false);
        }

        let known_bad = session.known_bad_from(position);
        if known_bad == Some(position) {
            position += 1;
        } else {
            let tryout = clamp_batch(
                sizer.current() - workspace.used(),
                position,
                known_bad,
                range.last_block,
            );
            let got = workspace.save_run(position, tryout);
            if got == 0 {
                sizer.mark_recovery(position);
                if sizer.current() != 1 {
                    sizer.shrink(position);
                    if workspace.has_pending() {
                        workspace.verify_and_restore(session)?;
                    }
                    continue;
                }
                // The first block of the run must be bad.
                session.report(position, BadBlockKind::Read)?;
                position += 1;
            } else {
                let written = workspace.overwrite_run(session, filler, position, got)?;
                if written < got {
                    // Blocks behind the failed one are saved and tested again.
                    sizer.shrink(position);
                    position += written as u64 + 1;
                    workspace.verify_and_restore(session)?;
                    continue;
                }
                position += got as u64;
                if got != tryout {
                    sizer.mark_recovery(position - got as u64);
                    continue;
                }
            }
        }

        if workspace.used() < sizer.current() && position < range.last_block {
            continue;
        }
        sizer.reached(position);
        workspace.verify_and_restore(session)?;
    }

    if workspace.has_pending() {
        workspace.verify_and_restore(session)?;
    }
    session.set_position(position);
    Ok(true)
}
