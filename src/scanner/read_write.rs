use tracing::info;

use crate::error::Result;
use crate::pattern::{FillPattern, PatternFiller};
use crate::report::BadBlockKind;

use super::batch::{BatchSizer, clamp_batch, do_read, do_write};
use super::device::BlockDevice;
use super::direct_io::AlignedBuffer;
use super::progress::ScanOperation;
use super::session::ScanSession;
use super::{BUFFER_ALIGNMENT, ScanRange};

/// Destructive test: every pattern is written over the whole range, then read
/// back and compared. Original content is lost.
pub(super) fn test_rw(
    device: &mut dyn BlockDevice,
    session: &mut ScanSession<'_>,
    range: ScanRange,
    block_size: usize,
    blocks_at_once: usize,
    patterns: &[FillPattern],
    seed: u64,
) -> Result<()> {
    let batch_bytes = blocks_at_once * block_size;
    let mut pattern_buf = AlignedBuffer::new(batch_bytes, BUFFER_ALIGNMENT)?;
    let mut read_buf = AlignedBuffer::new(batch_bytes, BUFFER_ALIGNMENT)?;

    info!(
        first_block = range.first_block,
        last_block = range.last_block.saturating_sub(1),
        "Checking for bad blocks in read-write mode"
    );

    for (index, &pattern) in patterns.iter().enumerate() {
        if session.should_stop() {
            break;
        }
        let filler = PatternFiller::new(pattern, seed);
        info!(%pattern, pass = index + 1, of = patterns.len(), "Testing with pattern");

        session.begin_pass(ScanOperation::Write, index + 1, patterns.len(), true);
        if !write_pass(device, session, range, block_size, blocks_at_once, &filler, &mut pattern_buf)? {
            break;
        }

        session.begin_pass(ScanOperation::Read, index + 1, patterns.len(), true);
        let finished = compare_pass(
            device,
            session,
            range,
            block_size,
            blocks_at_once,
            &filler,
            &mut pattern_buf,
            &mut read_buf,
        )?;
        if !finished {
            break;
        }
    }

    Ok(())
}

/// Returns false when the pass stopped early.
fn write_pass(
    device: &mut dyn BlockDevice,
    session: &mut ScanSession<'_>,
    range: ScanRange,
    block_size: usize,
    blocks_at_once: usize,
    filler: &PatternFiller,
    pattern_buf: &mut AlignedBuffer,
) -> Result<bool> {
    info!("Writing");
    let mut sizer = BatchSizer::new(blocks_at_once);
    let mut position = range.first_block;
    session.set_position(position);

    while position < range.last_block {
        if session.should_stop() {
            return Ok(false);
        }
        let tryout = clamp_batch(sizer.current(), position, None, range.last_block);
        let buffer = &mut pattern_buf.as_mut_slice()[..tryout * block_size];
        filler.fill(position, block_size, buffer);

        let got = do_write(device, buffer, tryout, block_size, position);
        if got == 0 && tryout == 1 {
            session.report(position, BadBlockKind::Write)?;
            position += 1;
        }
        position += got as u64;
        session.set_position(position);

        if got != tryout {
            sizer.shrink(position - got as u64);
            continue;
        }
        sizer.reached(position);
    }
    Ok(true)
}

#[allow(clippy::too_many_arguments)]
fn compare_pass(
    device: &mut dyn BlockDevice,
    session: &mut ScanSession<'_>,
    range: ScanRange,
    block_size: usize,
    blocks_at_once: usize,
    filler: &PatternFiller,
    pattern_buf: &mut AlignedBuffer,
    read_buf: &mut AlignedBuffer,
) -> Result<bool> {
    info!("Reading and comparing");
    let mut sizer = BatchSizer::new(blocks_at_once);
    let mut position = range.first_block;
    session.set_position(position);

    while position < range.last_block {
        if session.should_stop() {
            return Ok(false);
        }
        let start = position;
        let tryout = clamp_batch(sizer.current(), start, None, range.last_block);
        let got = do_read(device, read_buf.as_mut_slice(), tryout, block_size, start);

        if got > 0 {
            let expected = &mut pattern_buf.as_mut_slice()[..got * block_size];
            filler.fill(start, block_size, expected);
            let actual = &read_buf.as_slice()[..got * block_size];
            for (index, (want, have)) in expected
                .chunks(block_size)
                .zip(actual.chunks(block_size))
                .enumerate()
            {
                if want != have {
                    session.report(start + index as u64, BadBlockKind::Corruption)?;
                }
            }
        }

        if got == 0 && tryout == 1 {
            session.report(position, BadBlockKind::Read)?;
            position += 1;
        }
        position += got as u64;
        session.set_position(position);

        if got != tryout {
            sizer.shrink(position - got as u64);
            continue;
        }
        sizer.reached(position);
    }
    Ok(true)
}
