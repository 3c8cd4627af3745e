//! # Aligned Block Writer
//!
//! Append-only writer producing sector-aligned, padded write batches over a
//! file opened for direct I/O. Direct I/O (`O_DIRECT` on Linux) bypasses the
//! operating system's page cache, which suits a storage engine that manages
//! its own caching, but it imposes strict requirements:
//!
//! 1. The staging buffer's starting address must be aligned to the device's
//!    logical block size.
//! 2. Every write must be a multiple of that block size.
//! 3. File offsets must stay on block boundaries.
//!
//! `AlignedBlockWriter` satisfies all three while exposing a plain
//! `std::io::Write` interface. Data is staged into an aligned buffer of
//! `alignment * batch_blocks` bytes; full batches are submitted unpadded, and
//! `flush`/`close` pad the trailing partial batch with zero bytes up to the
//! next alignment boundary. Padding is benign for consumers because logical
//! lengths travel in higher-level framing (see `storage::index_file`).
//!
//! ## Portability
//!
//! Where the filesystem rejects `O_DIRECT` (tmpfs, some network mounts, any
//! non-Linux target), the writer falls back to buffered writes and syncs file
//! data at every flush boundary. The alignment contract is kept either way:
//! every submitted write is a multiple of the detected block size.
//!
//! ## Failure
//!
//! The writer never retries. After any I/O error the instance is poisoned;
//! every subsequent call fails until it is dropped.

use std::alloc::{alloc_zeroed, dealloc, handle_alloc_error, Layout};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::ops::{Deref, DerefMut};
use std::path::Path;

use crate::config::{DEFAULT_BATCH_BLOCKS, FALLBACK_ALIGNMENT};

pub struct AlignedBlockWriter {
    file: File,
    buf: AlignedBuffer,
    pos: usize,
    alignment: usize,
    batch_blocks: usize,
    batch_size: usize,
    written_blocks: u64,
    direct: bool,
    poisoned: bool,
}

impl AlignedBlockWriter {
    /// Opens `path` with `CREATE | WRITE` and the platform's direct-I/O flag,
    /// batching one filesystem block per write.
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        Self::with_batch_blocks(path, DEFAULT_BATCH_BLOCKS)
    }

    /// Opens `path` batching `batch_blocks` filesystem blocks per write.
    pub fn with_batch_blocks<P: AsRef<Path>>(path: P, batch_blocks: usize) -> io::Result<Self> {
        let mut options = OpenOptions::new();
        options.write(true).create(true);
        Self::with_options(path, batch_blocks, options)
    }

    /// Opens `path` with caller-supplied options; the platform's direct-I/O
    /// flag is added on top when available.
    pub fn with_options<P: AsRef<Path>>(
        path: P,
        batch_blocks: usize,
        options: OpenOptions,
    ) -> io::Result<Self> {
        if batch_blocks == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "batch_blocks must be >= 1",
            ));
        }
        let path = path.as_ref();
        let alignment = fs_block_size(path);
        let (file, direct) = open_direct(path, options)?;
        let batch_size = alignment * batch_blocks;
        Ok(Self {
            file,
            // Twice the batch: room for a trailing partial block plus the
            // padding appended at flush time.
            buf: AlignedBuffer::new(batch_size * 2, buffer_align(batch_size, alignment)),
            pos: 0,
            alignment,
            batch_blocks,
            batch_size,
            written_blocks: 0,
            direct: direct && alignment.is_power_of_two(),
            poisoned: false,
        })
    }

    pub fn alignment(&self) -> usize {
        self.alignment
    }

    pub fn batch_blocks(&self) -> usize {
        self.batch_blocks
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Number of alignment-sized blocks submitted to the file so far.
    pub fn written_blocks(&self) -> u64 {
        self.written_blocks
    }

    /// Whether the file was actually opened with a direct-I/O flag, or the
    /// writer fell back to buffered writes with explicit data syncs.
    pub fn is_direct(&self) -> bool {
        self.direct
    }

    pub fn write_u8(&mut self, value: u8) -> io::Result<()> {
        self.check_poisoned()?;
        self.buf[self.pos] = value;
        self.pos += 1;
        if self.pos == self.batch_size {
            self.emit_full_batch()?;
        }
        Ok(())
    }

    /// Flushes pending bytes padded to the next alignment boundary, syncs and
    /// releases the file.
    pub fn close(mut self) -> io::Result<()> {
        self.flush_padded()?;
        self.file.sync_all()
    }

    fn check_poisoned(&self) -> io::Result<()> {
        if self.poisoned {
            return Err(io::Error::other("aligned writer poisoned by previous error"));
        }
        Ok(())
    }

    // Submits a completely full staging buffer. No padding is needed: the
    // buffer holds exactly batch_size bytes.
    fn emit_full_batch(&mut self) -> io::Result<()> {
        debug_assert_eq!(self.pos, self.batch_size);
        self.submit(self.batch_size)?;
        self.written_blocks += self.batch_blocks as u64;
        self.pos = 0;
        Ok(())
    }

    fn flush_padded(&mut self) -> io::Result<()> {
        self.check_poisoned()?;
        if self.pos == 0 {
            return Ok(());
        }
        let aligned = self.pos.div_ceil(self.alignment) * self.alignment;
        self.buf[self.pos..aligned].fill(0);
        self.submit(aligned)?;
        self.written_blocks += (aligned / self.alignment) as u64;
        self.pos = 0;
        if !self.direct {
            self.file.sync_data()?;
        }
        Ok(())
    }

    fn submit(&mut self, len: usize) -> io::Result<()> {
        if let Err(e) = self.file.write_all(&self.buf[..len]) {
            self.poisoned = true;
            return Err(e);
        }
        Ok(())
    }
}

impl Write for AlignedBlockWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.check_poisoned()?;
        let mut rest = data;
        while !rest.is_empty() {
            let space = self.batch_size - self.pos;
            let take = space.min(rest.len());
            self.buf[self.pos..self.pos + take].copy_from_slice(&rest[..take]);
            self.pos += take;
            rest = &rest[take..];
            if self.pos == self.batch_size {
                self.emit_full_batch()?;
            }
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_padded()
    }
}

fn buffer_align(batch_size: usize, alignment: usize) -> usize {
    // O_DIRECT only needs the buffer start aligned to the logical block
    // size; aligning to the whole batch is possible only when it is a power
    // of two.
    if batch_size.is_power_of_two() {
        batch_size
    } else if alignment.is_power_of_two() {
        alignment
    } else {
        FALLBACK_ALIGNMENT
    }
}

#[cfg(unix)]
fn fs_block_size(path: &Path) -> usize {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    // The file may not exist yet; the containing directory is on the same
    // filesystem.
    let probe = if path.exists() {
        path.to_path_buf()
    } else {
        match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => Path::new(".").to_path_buf(),
        }
    };
    let Ok(cpath) = CString::new(probe.as_os_str().as_bytes()) else {
        return FALLBACK_ALIGNMENT;
    };
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(cpath.as_ptr(), &mut stat) };
    let bsize = stat.f_bsize as usize;
    if rc == 0 && bsize > 0 && bsize.is_power_of_two() {
        bsize
    } else {
        FALLBACK_ALIGNMENT
    }
}

#[cfg(not(unix))]
fn fs_block_size(_path: &Path) -> usize {
    FALLBACK_ALIGNMENT
}

#[cfg(target_os = "linux")]
fn open_direct(path: &Path, options: OpenOptions) -> io::Result<(File, bool)> {
    use std::os::unix::fs::OpenOptionsExt;

    let mut direct_options = options.clone();
    direct_options.custom_flags(libc::O_DIRECT);
    match direct_options.open(path) {
        Ok(file) => Ok((file, true)),
        Err(_) => {
            // tmpfs and some network filesystems reject O_DIRECT; fall back
            // to buffered writes with explicit syncs at flush boundaries.
            tracing::debug!(path = %path.display(), "O_DIRECT unavailable, using buffered writes");
            let file = options.open(path)?;
            Ok((file, false))
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn open_direct(path: &Path, options: OpenOptions) -> io::Result<(File, bool)> {
    let file = options.open(path)?;
    Ok((file, false))
}

unsafe impl Send for AlignedBuffer {}

struct AlignedBuffer {
    data: *mut u8,
    capacity: usize,
    layout: Layout,
}

impl AlignedBuffer {
    fn new(capacity: usize, align: usize) -> Self {
        let layout = Layout::from_size_align(capacity, align)
            .expect("aligned buffer layout: capacity overflows or align is not a power of two");
        let data = unsafe { alloc_zeroed(layout) };
        if data.is_null() {
            handle_alloc_error(layout);
        }
        Self {
            data,
            capacity,
            layout,
        }
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        unsafe { dealloc(self.data, self.layout) }
    }
}

impl Deref for AlignedBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.data, self.capacity) }
    }
}

impl DerefMut for AlignedBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.data, self.capacity) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::tempdir;

    #[test]
    fn aligned_buffer_allocation() {
        let buffer = AlignedBuffer::new(8192, 4096);
        assert_eq!(buffer.capacity, 8192);
        assert_eq!(buffer.data as usize % 4096, 0);
    }

    #[test]
    fn small_write_is_padded_to_one_block() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("padded.bin");
        let mut writer = AlignedBlockWriter::create(&path).unwrap();
        let alignment = writer.alignment();

        writer.write_all(&[0xAB; 10]).unwrap();
        writer.close().unwrap();

        let data = std::fs::read(&path).unwrap();
        assert_eq!(data.len(), alignment);
        assert!(data[..10].iter().all(|&b| b == 0xAB));
        assert!(data[10..].iter().all(|&b| b == 0));
    }

    #[test]
    fn written_blocks_counts_trailing_flush() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("count.bin");
        let mut writer = AlignedBlockWriter::create(&path).unwrap();

        writer.write_all(&[0xFF; 10]).unwrap();
        writer.flush().unwrap();
        assert_eq!(writer.written_blocks(), 1);
        writer.close().unwrap();
    }

    #[test]
    fn exact_batch_emits_without_flush() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("batch.bin");
        let mut writer = AlignedBlockWriter::with_batch_blocks(&path, 2).unwrap();
        let batch = writer.batch_size();

        writer.write_all(&vec![0xCD; batch]).unwrap();
        assert_eq!(writer.written_blocks(), writer.batch_blocks() as u64);

        let len = std::fs::metadata(&path).unwrap().len();
        assert_eq!(len, batch as u64);
        writer.close().unwrap();
    }

    #[test]
    fn write_larger_than_batch_preserves_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("large.bin");
        let mut writer = AlignedBlockWriter::create(&path).unwrap();
        let alignment = writer.alignment();

        let payload: Vec<u8> = (0..alignment * 2 + 777).map(|i| (i % 251) as u8).collect();
        writer.write_all(&payload).unwrap();
        writer.close().unwrap();

        let mut data = Vec::new();
        File::open(&path).unwrap().read_to_end(&mut data).unwrap();
        assert_eq!(data.len() % alignment, 0);
        assert_eq!(&data[..payload.len()], &payload[..]);
        assert!(data[payload.len()..].iter().all(|&b| b == 0));
    }

    #[test]
    fn byte_at_a_time_matches_bulk_write() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bytes.bin");
        let mut writer = AlignedBlockWriter::create(&path).unwrap();

        for i in 0..1000u32 {
            writer.write_u8((i % 256) as u8).unwrap();
        }
        writer.close().unwrap();

        let data = std::fs::read(&path).unwrap();
        for i in 0..1000usize {
            assert_eq!(data[i], (i % 256) as u8);
        }
    }

    #[test]
    fn total_file_size_is_multiple_of_alignment() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("multiple.bin");
        let mut writer = AlignedBlockWriter::create(&path).unwrap();
        let alignment = writer.alignment();

        writer.write_all(&[1; 100]).unwrap();
        writer.flush().unwrap();
        writer.write_all(&[2; 5000]).unwrap();
        writer.close().unwrap();

        let len = std::fs::metadata(&path).unwrap().len();
        assert_eq!(len % alignment as u64, 0);
    }

    #[test]
    fn flush_on_empty_buffer_is_a_no_op() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("noop.bin");
        let mut writer = AlignedBlockWriter::create(&path).unwrap();
        writer.flush().unwrap();
        assert_eq!(writer.written_blocks(), 0);
        writer.close().unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
    }

    #[test]
    fn zero_batch_blocks_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("zero.bin");
        assert!(AlignedBlockWriter::with_batch_blocks(&path, 0).is_err());
    }
}
