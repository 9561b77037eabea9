use tracing::info;

use crate::error::Result;
use crate::report::BadBlockKind;

use super::batch::{BatchSizer, clamp_batch, do_read};
use super::device::BlockDevice;
use super::direct_io::AlignedBuffer;
use super::progress::ScanOperation;
use super::session::ScanSession;
use super::{BUFFER_ALIGNMENT, ScanRange};

pub(super) fn test_ro(
    device: &mut dyn BlockDevice,
    session: &mut ScanSession<'_>,
    range: ScanRange,
    block_size: usize,
    blocks_at_once: usize,
) -> Result<()> {
    let mut buffer = AlignedBuffer::new(blocks_at_once * block_size, BUFFER_ALIGNMENT)?;
    let mut sizer = BatchSizer::new(blocks_at_once);
    let mut position = range.first_block;

    info!(
        first_block = range.first_block,
        last_block = range.last_block.saturating_sub(1),
        "Checking for bad blocks (read-only test)"
    );
    session.begin_known_bad(range.first_block);
    session.begin_pass(ScanOperation::Read, 1, 1, false);

    while position < range.last_block {
        if session.should_stop() {
            break;
        }

        let known_bad = session.known_bad_from(position);
        if known_bad == Some(position) {
            position += 1;
            session.set_position(position);
            continue;
        }

        let tryout = clamp_batch(sizer.current(), position, known_bad, range.last_block);
        let got = do_read(device, buffer.as_mut_slice(), tryout, block_size, position);
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

    session.end_known_bad();
    Ok(())
}
