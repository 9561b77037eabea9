use std::fs::File;
use std::io::{self, ErrorKind, Seek, SeekFrom};
use std::path::Path;

use tracing::debug;

use super::direct_io::open_device;

/// Raw block access used by the scan strategies.
///
/// Both calls transfer up to `count` blocks starting at `first_block` and
/// return how many leading blocks actually made it. A short count means the
/// block right after the transferred prefix failed. An `Err` is treated by the
/// scanner exactly like a zero-block transfer.
pub trait BlockDevice {
    fn read_blocks(
        &mut self,
        block_size: usize,
        first_block: u64,
        count: usize,
        buf: &mut [u8],
    ) -> io::Result<usize>;

    fn write_blocks(
        &mut self,
        block_size: usize,
        first_block: u64,
        count: usize,
        buf: &[u8],
    ) -> io::Result<usize>;
}

/// A block device node or disk image accessed through positioned I/O.
pub struct FileDevice {
    file: File,
    size_bytes: u64,
}

impl FileDevice {
    pub fn open(path: &Path, writable: bool, direct: bool) -> io::Result<Self> {
        let mut file = open_device(path, writable, direct)?;
        // Block device nodes report a zero metadata length; seeking to the end works for both.
        let size_bytes = file.seek(SeekFrom::End(0))?;
        file.seek(SeekFrom::Start(0))?;
        debug!(path = %path.display(), size_bytes, writable, direct, "device opened");
        Ok(Self { file, size_bytes })
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn total_blocks(&self, block_size: usize) -> u64 {
        if block_size == 0 {
            return 0;
        }
        self.size_bytes / block_size as u64
    }

    pub fn sync(&self) -> io::Result<()> {
        self.file.sync_all()
    }
}

#[cfg(unix)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buf, offset)
}

#[cfg(unix)]
fn write_at(file: &File, buf: &[u8], offset: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.write_at(buf, offset)
}

#[cfg(windows)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buf, offset)
}

#[cfg(windows)]
fn write_at(file: &File, buf: &[u8], offset: u64) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_write(buf, offset)
}

fn byte_range(block_size: usize, first_block: u64, count: usize) -> io::Result<(u64, usize)> {
    let offset = first_block
        .checked_mul(block_size as u64)
        .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, "Block offset overflows."))?;
    let len = count
        .checked_mul(block_size)
        .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, "Transfer length overflows."))?;
    Ok((offset, len))
}

impl BlockDevice for FileDevice {
    fn read_blocks(
        &mut self,
        block_size: usize,
        first_block: u64,
        count: usize,
        buf: &mut [u8],
    ) -> io::Result<usize> {
        let (offset, len) = byte_range(block_size, first_block, count)?;
        let target = &mut buf[..len];
        let mut done = 0;
        while done < len {
            match read_at(&self.file, &mut target[done..], offset + done as u64) {
                Ok(0) => break,
                Ok(count) => done += count,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if done < block_size => return Err(e),
                Err(_) => break,
            }
        }
        Ok(done / block_size)
    }

    fn write_blocks(
        &mut self,
        block_size: usize,
        first_block: u64,
        count: usize,
        buf: &[u8],
    ) -> io::Result<usize> {
        let (offset, len) = byte_range(block_size, first_block, count)?;
        let source = &buf[..len];
        let mut done = 0;
        while done < len {
            match write_at(&self.file, &source[done..], offset + done as u64) {
                Ok(0) => break,
                Ok(count) => done += count,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if done < block_size => return Err(e),
                Err(_) => break,
            }
        }
        Ok(done / block_size)
    }
}
