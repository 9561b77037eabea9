use std::alloc::{Layout, alloc_zeroed, dealloc};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::ptr::NonNull;

use crate::error::{Result, ScanError};

#[cfg(windows)]
const FILE_FLAG_NO_BUFFERING: u32 = 0x20000000;
#[cfg(windows)]
const FILE_FLAG_WRITE_THROUGH: u32 = 0x80000000;

pub(crate) fn align_up(value: usize, alignment: usize) -> usize {
    if alignment == 0 {
        return value;
    }
    value.div_ceil(alignment) * alignment
}

pub(crate) fn open_device(path: &Path, writable: bool, direct: bool) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.read(true).write(writable);
    if direct {
        #[cfg(windows)]
        {
            use std::os::windows::fs::OpenOptionsExt;
            let flags = if writable {
                FILE_FLAG_NO_BUFFERING | FILE_FLAG_WRITE_THROUGH
            } else {
                FILE_FLAG_NO_BUFFERING
            };
            options.custom_flags(flags);
        }
        #[cfg(target_os = "linux")]
        {
            use std::os::unix::fs::OpenOptionsExt;
            let flags = if writable {
                libc::O_DIRECT | libc::O_DSYNC
            } else {
                libc::O_DIRECT
            };
            options.custom_flags(flags);
        }
    }
    options.open(path)
}

/// Zeroed, page-aligned heap buffer for raw block transfers.
pub(crate) struct AlignedBuffer {
    ptr: NonNull<u8>,
    len: usize,
    alignment: usize,
}

impl AlignedBuffer {
    pub(crate) fn new(len: usize, alignment: usize) -> Result<Self> {
        let size = align_up(len.max(1), alignment);
        let layout = Layout::from_size_align(size, alignment).map_err(|_| {
            ScanError::InvalidConfig(format!("invalid buffer alignment {alignment}"))
        })?;
        // SAFETY: layout has a non-zero size.
        let ptr = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr).ok_or(ScanError::Allocation { bytes: size })?;
        Ok(Self {
            ptr,
            len,
            alignment,
        })
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr owns at least `len` initialised bytes for the buffer's lifetime.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, and `&mut self` guarantees exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        let size = align_up(self.len.max(1), self.alignment);
        let Ok(layout) = Layout::from_size_align(size, self.alignment) else {
            return;
        };
        // SAFETY: allocated in `new` with this exact layout.
        unsafe {
            dealloc(self.ptr.as_ptr(), layout);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AlignedBuffer, align_up};

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 4096), 0);
        assert_eq!(align_up(1, 4096), 4096);
        assert_eq!(align_up(4096, 4096), 4096);
        assert_eq!(align_up(4097, 4096), 8192);
        assert_eq!(align_up(7, 0), 7);
    }

    #[test]
    fn test_buffer_is_aligned_and_zeroed() {
        let mut buffer = AlignedBuffer::new(3 * 512, 4096).unwrap();
        assert_eq!(buffer.as_slice().len(), 1536);
        assert_eq!(buffer.as_slice().as_ptr() as usize % 4096, 0);
        assert!(buffer.as_slice().iter().all(|&byte| byte == 0));
        buffer.as_mut_slice()[1535] = 9;
        assert_eq!(buffer.as_slice()[1535], 9);
    }
}
