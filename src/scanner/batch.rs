use tracing::{debug, warn};

use super::device::BlockDevice;

/// Batch size that drops to single blocks after a short transfer and grows
/// back once the scan moves past the recovery point.
#[derive(Debug, Clone)]
pub(super) struct BatchSizer {
    full: usize,
    current: usize,
    recover_at: Option<u64>,
}

impl BatchSizer {
    pub(super) fn new(full: usize) -> Self {
        Self {
            full,
            current: full,
            recover_at: None,
        }
    }

    pub(super) fn current(&self) -> usize {
        self.current
    }

    /// Call after a batch transferred fewer blocks than requested. `resume`
    /// is the position the failed batch started from, plus any block skipped.
    pub(super) fn shrink(&mut self, resume: u64) {
        self.current = 1;
        self.mark_recovery(resume);
    }

    /// Sets the recovery point without shrinking the batch yet.
    pub(super) fn mark_recovery(&mut self, resume: u64) {
        if self.recover_at.is_none() {
            let recover_at = resume + self.full as u64;
            debug!(recover_at, "recovery point set");
            self.recover_at = Some(recover_at);
        }
    }

    pub(super) fn reached(&mut self, position: u64) {
        if self.recover_at.is_some_and(|block| position >= block) {
            debug!(position, batch = self.full, "batch size restored");
            self.current = self.full;
            self.recover_at = None;
        }
    }
}

/// Clamps a batch so it stops right before `known_bad` and at `last_block`.
pub(super) fn clamp_batch(tryout: usize, position: u64, known_bad: Option<u64>, last_block: u64) -> usize {
    let mut end = position.saturating_add(tryout as u64).min(last_block);
    if let Some(bad) = known_bad {
        if bad >= position {
            end = end.min(bad);
        }
    }
    (end - position) as usize
}

pub(super) fn do_read(
    device: &mut dyn BlockDevice,
    buffer: &mut [u8],
    tryout: usize,
    block_size: usize,
    first_block: u64,
) -> usize {
    match device.read_blocks(block_size, first_block, tryout, buffer) {
        Ok(got) if got > tryout => {
            warn!(got, tryout, first_block, "device reported more blocks than requested");
            tryout
        }
        Ok(got) => got,
        Err(e) => {
            debug!(first_block, tryout, error = %e, "read failed");
            0
        }
    }
}

pub(super) fn do_write(
    device: &mut dyn BlockDevice,
    buffer: &[u8],
    tryout: usize,
    block_size: usize,
    first_block: u64,
) -> usize {
    match device.write_blocks(block_size, first_block, tryout, buffer) {
        Ok(got) if got > tryout => {
            warn!(got, tryout, first_block, "device reported more blocks than requested");
            tryout
        }
        Ok(got) => got,
        Err(e) => {
            debug!(first_block, tryout, error = %e, "write failed");
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{BatchSizer, clamp_batch};

    #[test]
    fn test_shrink_and_recover() {
        let mut sizer = BatchSizer::new(8);
        assert_eq!(sizer.current(), 8);
        sizer.shrink(100);
        assert_eq!(sizer.current(), 1);
        sizer.shrink(101);
        sizer.reached(107);
        assert_eq!(sizer.current(), 1);
        sizer.reached(108);
        assert_eq!(sizer.current(), 8);
    }

    #[test]
    fn test_mark_recovery_keeps_batch() {
        let mut sizer = BatchSizer::new(4);
        sizer.mark_recovery(10);
        assert_eq!(sizer.current(), 4);
        sizer.shrink(12);
        assert_eq!(sizer.current(), 1);
        sizer.reached(14);
        assert_eq!(sizer.current(), 4);
    }

    #[test]
    fn test_recovery_when_position_jumps_past() {
        let mut sizer = BatchSizer::new(4);
        sizer.shrink(0);
        sizer.reached(9);
        assert_eq!(sizer.current(), 4);
    }

    #[test]
    fn test_clamp_batch() {
        assert_eq!(clamp_batch(8, 0, None, 100), 8);
        assert_eq!(clamp_batch(8, 96, None, 100), 4);
        assert_eq!(clamp_batch(8, 10, Some(13), 100), 3);
        assert_eq!(clamp_batch(8, 10, Some(50), 100), 8);
        assert_eq!(clamp_batch(8, 10, Some(2), 100), 8);
    }
}
