//! Mapped-file coordination primitive (§4.6).
//!
//! Not part of the lock manager's public contract — this module exists so
//! the crate's own tests and benches have a realistic caller exercising the
//! [`crate::latch::Latch`] primitives under file-backed memory mapping. It
//! owns no page format: callers see raw byte ranges.
//!
//! Files are mapped in fixed chunks rather than as one contiguous region so
//! that growth never requires moving already-mapped memory (and therefore
//! never invalidates pointers handed out from an earlier chunk).

use std::fs::File;
use std::io;
use std::time::{Duration, Instant};

use memmap2::MmapMut;
use parking_lot::Mutex;
use tracing::debug;

use crate::latch::Latch;

/// Size of every mapped chunk but the last.
pub const CHUNK_SIZE: u64 = 1 << 30;

/// Throttle window: concurrent `sync` calls started within this long of an
/// in-flight sync wait for it rather than issuing a redundant `flush`.
const SYNC_STALL: Duration = Duration::from_millis(50);

/// A file mapped as a growable array of fixed-size chunks.
///
/// Three latches guard disjoint concerns:
/// - `remap_latch` is held exclusively for the whole duration of a
///   structural change (grow or shrink) — only one remap runs at a time.
/// - `access_lock` is held in shared mode by ordinary reads/writes and
///   exclusively by a remap, so in-flight accessors finish observing the
///   old `mappings` array before it is replaced.
/// - `sync_latch` throttles concurrent `sync` calls past the stall window.
pub struct MappedFile {
    file: File,
    remap_latch: Latch,
    access_lock: Latch,
    sync_latch: Latch,
    sync_started_at: Mutex<Option<Instant>>,
    mappings: Mutex<Vec<MmapMut>>,
    last_mapping_size: Mutex<u64>,
}

impl MappedFile {
    /// Opens `file` and maps its current length (which must already be a
    /// whole number of chunks except possibly the last).
    pub fn open(file: File) -> io::Result<Self> {
        let len = file.metadata()?.len();
        let mapped = Self {
            file,
            remap_latch: Latch::new(),
            access_lock: Latch::new(),
            sync_latch: Latch::new(),
            sync_started_at: Mutex::new(None),
            mappings: Mutex::new(Vec::new()),
            last_mapping_size: Mutex::new(0),
        };
        mapped.remap_to(len)?;
        Ok(mapped)
    }

    pub fn len(&self) -> u64 {
        let _shared = self.access_lock.acquire_shared();
        let mappings = self.mappings.lock();
        if mappings.is_empty() {
            return 0;
        }
        (mappings.len() as u64 - 1) * CHUNK_SIZE + *self.last_mapping_size.lock()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Grows the backing file and mapping array to at least `new_len`
    /// bytes. A no-op if the file is already at least that long.
    pub fn grow_to(&self, new_len: u64) -> io::Result<()> {
        let _remap = self.remap_latch.acquire_exclusive();
        if new_len <= self.len() {
            return Ok(());
        }
        self.file.set_len(new_len)?;
        self.remap_to(new_len)
    }

    /// Shrinks the backing file to `new_len` bytes. Per OS safety
    /// requirements, every mapping covering the truncated region is
    /// unmapped before `set_len` runs.
    pub fn shrink_to(&self, new_len: u64) -> io::Result<()> {
        let _remap = self.remap_latch.acquire_exclusive();
        if new_len >= self.len() {
            return Ok(());
        }
        {
            let _exclusive = self.access_lock.acquire_exclusive();
            self.mappings.lock().clear();
        }
        self.file.set_len(new_len)?;
        self.remap_to(new_len)
    }

    /// Rebuilds the mapping array for a file of `total_len` bytes. Must be
    /// called with `remap_latch` held.
    fn remap_to(&self, total_len: u64) -> io::Result<()> {
        let _exclusive = self.access_lock.acquire_exclusive();
        let chunk_count = if total_len == 0 {
            0
        } else {
            total_len.div_ceil(CHUNK_SIZE)
        };
        let mut mappings = Vec::with_capacity(chunk_count as usize);
        for i in 0..chunk_count {
            let offset = i * CHUNK_SIZE;
            let size = (total_len - offset).min(CHUNK_SIZE) as usize;
            let mmap = unsafe {
                memmap2::MmapOptions::new()
                    .offset(offset)
                    .len(size)
                    .map_mut(&self.file)?
            };
            mappings.push(mmap);
        }
        let last_size = mappings.last().map(|m| m.len() as u64).unwrap_or(0);
        *self.last_mapping_size.lock() = last_size;
        *self.mappings.lock() = mappings;
        debug!(chunk_count, total_len, "remapped file");
        Ok(())
    }

    /// Copies `buf.len()` bytes starting at `offset` into `buf`. May span a
    /// chunk boundary.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let _shared = self.access_lock.acquire_shared();
        let mappings = self.mappings.lock();
        self.for_each_chunk(&mappings, offset, buf.len(), |chunk, chunk_off, len, dst_off| {
            buf[dst_off..dst_off + len].copy_from_slice(&chunk[chunk_off..chunk_off + len]);
            Ok(())
        })
    }

    /// Copies `data` into the file starting at `offset`. May span a chunk
    /// boundary. Does not itself guarantee durability — call [`Self::sync`].
    pub fn write_at(&self, offset: u64, data: &[u8]) -> io::Result<()> {
        let _shared = self.access_lock.acquire_shared();
        let mut mappings = self.mappings.lock();
        self.for_each_chunk_mut(&mut mappings, offset, data.len(), |chunk, chunk_off, len, src_off| {
            chunk[chunk_off..chunk_off + len].copy_from_slice(&data[src_off..src_off + len]);
            Ok(())
        })
    }

    fn for_each_chunk(
        &self,
        mappings: &[MmapMut],
        offset: u64,
        total_len: usize,
        mut f: impl FnMut(&MmapMut, usize, usize, usize) -> io::Result<()>,
    ) -> io::Result<()> {
        let mut remaining = total_len;
        let mut pos = offset;
        let mut dst_off = 0usize;
        while remaining > 0 {
            let chunk_idx = (pos / CHUNK_SIZE) as usize;
            let chunk = mappings.get(chunk_idx).ok_or_else(|| {
                io::Error::new(io::ErrorKind::UnexpectedEof, "read past mapped length")
            })?;
            let chunk_off = (pos % CHUNK_SIZE) as usize;
            let len = remaining.min(chunk.len() - chunk_off);
            f(chunk, chunk_off, len, dst_off)?;
            pos += len as u64;
            dst_off += len;
            remaining -= len;
        }
        Ok(())
    }

    fn for_each_chunk_mut(
        &self,
        mappings: &mut [MmapMut],
        offset: u64,
        total_len: usize,
        mut f: impl FnMut(&mut MmapMut, usize, usize, usize) -> io::Result<()>,
    ) -> io::Result<()> {
        let mut remaining = total_len;
        let mut pos = offset;
        let mut src_off = 0usize;
        while remaining > 0 {
            let chunk_idx = (pos / CHUNK_SIZE) as usize;
            let chunk = mappings.get_mut(chunk_idx).ok_or_else(|| {
                io::Error::new(io::ErrorKind::UnexpectedEof, "write past mapped length")
            })?;
            let chunk_off = (pos % CHUNK_SIZE) as usize;
            let len = remaining.min(chunk.len() - chunk_off);
            f(chunk, chunk_off, len, src_off)?;
            pos += len as u64;
            src_off += len;
            remaining -= len;
        }
        Ok(())
    }

    /// Flushes every mapping to disk. Throttled: a caller arriving within
    /// [`SYNC_STALL`] of an in-flight sync's start simply waits for it
    /// rather than issuing its own redundant `msync`.
    pub fn sync(&self) -> io::Result<()> {
        let now = Instant::now();
        let stalling = self
            .sync_started_at
            .lock()
            .is_some_and(|started| now.saturating_duration_since(started) < SYNC_STALL);
        if stalling {
            let _wait = self.sync_latch.acquire_shared();
            return Ok(());
        }
        let _exclusive = self.sync_latch.acquire_exclusive();
        *self.sync_started_at.lock() = Some(now);
        let _shared = self.access_lock.acquire_shared();
        for chunk in self.mappings.lock().iter() {
            chunk.flush()?;
        }
        *self.sync_started_at.lock() = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempfile;

    #[test]
    fn grow_then_write_then_read_round_trips() {
        let file = tempfile().unwrap();
        let mapped = MappedFile::open(file).unwrap();
        mapped.grow_to(4096).unwrap();
        mapped.write_at(10, b"hello").unwrap();
        let mut buf = [0u8; 5];
        mapped.read_at(10, &mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn shrink_unmaps_before_truncating() {
        let file = tempfile().unwrap();
        let mapped = MappedFile::open(file).unwrap();
        mapped.grow_to(8192).unwrap();
        assert_eq!(mapped.len(), 8192);
        mapped.shrink_to(4096).unwrap();
        assert_eq!(mapped.len(), 4096);
    }

    #[test]
    fn sync_on_empty_file_is_a_no_op() {
        let file = tempfile().unwrap();
        let mapped = MappedFile::open(file).unwrap();
        mapped.sync().unwrap();
    }
}
