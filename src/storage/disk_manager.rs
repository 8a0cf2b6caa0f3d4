//! L1: a flat, append-only file addressed by `page_id`.
//!
//! Layout: page `i` occupies bytes `[i * PAGE_SIZE, (i + 1) * PAGE_SIZE)`. There is
//! no file header and no checksum; growth only ever appends zeroed regions, doubling
//! the tracked capacity until the requested page count fits (mirrors
//! `DiskManager::IncreaseDiskSpace` in the course-project origin this generalises).

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result};
use parking_lot::Mutex;

use crate::config::{DEFAULT_DB_IO_SIZE, PAGE_SIZE};
use crate::storage::page::PageId;

/// Persistent byte store indexed by page id. Every public method is infallible at
/// the API boundary in the sense that I/O failures are fatal: per SPEC_FULL.md §7,
/// there is no partial-write recovery, so we `expect`/abort rather than bubble up an
/// error a caller could meaningfully retry.
#[derive(Debug)]
pub struct DiskManager {
    file: Mutex<File>,
    path: PathBuf,
    page_capacity: AtomicUsize,
    num_reads: AtomicUsize,
    num_writes: AtomicUsize,
    num_deletes: AtomicUsize,
    num_flushes: AtomicUsize,
}

impl DiskManager {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("failed to create database directory");
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .expect("failed to open database file");

        let manager = Self {
            file: Mutex::new(file),
            path,
            page_capacity: AtomicUsize::new(0),
            num_reads: AtomicUsize::new(0),
            num_writes: AtomicUsize::new(0),
            num_deletes: AtomicUsize::new(0),
            num_flushes: AtomicUsize::new(0),
        };
        manager.increase_disk_space(DEFAULT_DB_IO_SIZE);
        manager
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Ensures the file can hold at least `n_pages` pages, doubling the tracked
    /// capacity until it does. Idempotent: shrinking is never attempted.
    pub fn increase_disk_space(&self, n_pages: usize) {
        let mut capacity = self.page_capacity.load(Ordering::Acquire);
        if capacity >= n_pages {
            return;
        }
        let mut new_capacity = capacity.max(1);
        while new_capacity < n_pages {
            new_capacity *= 2;
        }
        let mut file = self.file.lock();
        file.set_len((new_capacity * PAGE_SIZE) as u64)
            .expect("failed to extend database file");
        capacity = new_capacity;
        self.page_capacity.store(capacity, Ordering::Release);
        log::debug!(
            "disk manager grew {:?} to {} pages",
            self.path,
            new_capacity
        );
    }

    /// Fills `out` (exactly `PAGE_SIZE` bytes) with the contents of `page_id`. A
    /// page beyond the written region (but inside the grown capacity) reads back as
    /// zeros, matching a freshly extended file.
    pub fn read_page(&self, page_id: PageId, out: &mut [u8]) {
        assert_eq!(out.len(), PAGE_SIZE);
        let offset = page_id as u64 * PAGE_SIZE as u64;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))
            .expect("failed to seek database file");
        match file.read_exact(out) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                out.fill(0);
            }
            Err(e) => panic!("fatal I/O error reading page {page_id}: {e}"),
        }
        self.num_reads.fetch_add(1, Ordering::Relaxed);
        log::trace!("read page {page_id}");
    }

    /// Writes `buf` (exactly `PAGE_SIZE` bytes) to `page_id` and flushes to stable
    /// storage before returning.
    pub fn write_page(&self, page_id: PageId, buf: &[u8]) {
        assert_eq!(buf.len(), PAGE_SIZE);
        self.increase_disk_space(page_id as usize + 1);
        let offset = page_id as u64 * PAGE_SIZE as u64;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))
            .expect("failed to seek database file");
        file.write_all(buf)
            .expect("fatal I/O error writing page");
        file.flush().expect("fatal I/O error flushing page");
        self.num_writes.fetch_add(1, Ordering::Relaxed);
        self.num_flushes.fetch_add(1, Ordering::Relaxed);
        log::trace!("wrote page {page_id}");
    }

    /// Space reclamation is optional (SPEC_FULL.md §4.1): this only bumps the
    /// delete counter used by tests and logging.
    pub fn delete_page(&self, page_id: PageId) {
        self.num_deletes.fetch_add(1, Ordering::Relaxed);
        log::debug!("deleted page {page_id}");
    }

    pub fn num_reads(&self) -> usize {
        self.num_reads.load(Ordering::Relaxed)
    }

    pub fn num_writes(&self) -> usize {
        self.num_writes.load(Ordering::Relaxed)
    }

    pub fn num_deletes(&self) -> usize {
        self.num_deletes.load(Ordering::Relaxed)
    }

    pub fn num_flushes(&self) -> usize {
        self.num_flushes.load(Ordering::Relaxed)
    }
}

/// Helper for tests that want a throwaway database file.
#[cfg(test)]
pub fn test_path() -> PathBuf {
    use uuid::Uuid;
    std::env::temp_dir().join(format!("ticketdb-test-{}.db", Uuid::new_v4()))
}

pub fn open_anyhow<P: AsRef<Path>>(path: P) -> Result<DiskManager> {
    let path = path.as_ref();
    Ok(DiskManager::new(path))
        .with_context(|| format!("failed to open disk manager at {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let path = test_path();
        let dm = DiskManager::new(&path);

        let mut buf = [7u8; PAGE_SIZE];
        buf[0] = 1;
        buf[PAGE_SIZE - 1] = 2;
        dm.write_page(3, &buf);

        let mut out = [0u8; PAGE_SIZE];
        dm.read_page(3, &mut out);
        assert_eq!(out, buf);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn unwritten_region_reads_as_zero() {
        let path = test_path();
        let dm = DiskManager::new(&path);
        dm.increase_disk_space(20);

        let mut out = [0xAAu8; PAGE_SIZE];
        dm.read_page(10, &mut out);
        assert_eq!(out, [0u8; PAGE_SIZE]);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn increase_disk_space_doubles_and_is_idempotent() {
        let path = test_path();
        let dm = DiskManager::new(&path);
        dm.increase_disk_space(17);
        let cap_after_first = dm.page_capacity.load(Ordering::Acquire);
        assert!(cap_after_first >= 17);
        dm.increase_disk_space(17);
        assert_eq!(dm.page_capacity.load(Ordering::Acquire), cap_after_first);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn counters_track_operations() {
        let path = test_path();
        let dm = DiskManager::new(&path);
        let buf = [0u8; PAGE_SIZE];
        dm.write_page(0, &buf);
        dm.write_page(1, &buf);
        let mut out = [0u8; PAGE_SIZE];
        dm.read_page(0, &mut out);
        dm.delete_page(1);

        assert_eq!(dm.num_writes(), 2);
        assert_eq!(dm.num_reads(), 1);
        assert_eq!(dm.num_deletes(), 1);

        std::fs::remove_file(&path).ok();
    }
}
