use std::fs;
use std::fs::File;
#[cfg(unix)]
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};

use cdb::codec;
use cdb::errors::CDBError;
use cdb::io::{BufferedWriter, MmapMode};
use cdb::reader::Reader;
use cdb::{Result, MAIN_TABLE_SIZE, MAIN_TABLE_SIZE_BYTES, RECORD_PREFIX_SIZE, SLOT_SIZE};

const CHUNK_SIZE: usize = 1024;

/// An ordered `(hash, record_offset)` journal, one entry per `add` call,
/// stored as a chain of fixed-size chunks so a long build doesn't pay for
/// one ever-reallocating buffer.
struct SlotJournal {
    chunks: Vec<Vec<(u32, u32)>>,
}

impl SlotJournal {
    fn new() -> SlotJournal {
        SlotJournal { chunks: vec![Vec::with_capacity(CHUNK_SIZE)] }
    }

    fn len(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum()
    }

    fn push(&mut self, hash: u32, record_offset: u32) {
        if self.chunks.last().map(Vec::len) == Some(CHUNK_SIZE) {
            self.chunks.push(Vec::with_capacity(CHUNK_SIZE));
        }
        self.chunks.last_mut().unwrap().push((hash, record_offset));
    }

    /// Walks every entry newest-first. Load-bearing for duplicate
    /// ordering: filling `starts[]` backward while walking this way
    /// reproduces insertion order within each bucket.
    fn iter_newest_to_oldest<'a>(&'a self) -> impl Iterator<Item = &'a (u32, u32)> {
        self.chunks.iter().rev().flat_map(|chunk| chunk.iter().rev())
    }
}

/// Stages key/value pairs for a constant database and emits the final
/// file on `commit`. Not safe for concurrent `add` from multiple threads.
pub struct Builder {
    writer: BufferedWriter,
    bucket_counts: [u32; MAIN_TABLE_SIZE],
    journal: SlotJournal,
    size: u64,
    owns_file: bool,
    path: Option<PathBuf>,
    committed: bool,
    poisoned: bool,
    closed: bool,
}

impl Builder {
    /// `owns_file` and `path` control cleanup: a builder that owns its
    /// file unlinks `path` if it is dropped (or `close`d) without
    /// `commit`ing.
    pub fn create(mut file: File, owns_file: bool, path: Option<PathBuf>) -> Result<Builder> {
        use std::io::{Seek, SeekFrom};

        file.seek(SeekFrom::Start(0)).map_err(CDBError::from)?;
        file.set_len(0).map_err(CDBError::from)?;

        let mut writer = BufferedWriter::new(file);
        writer.write(&[0u8; MAIN_TABLE_SIZE_BYTES])?;
        writer.flush()?;

        Ok(Builder {
            writer,
            bucket_counts: [0u32; MAIN_TABLE_SIZE],
            journal: SlotJournal::new(),
            size: MAIN_TABLE_SIZE_BYTES as u64,
            owns_file,
            path,
            committed: false,
            poisoned: false,
            closed: false,
        })
    }

    pub fn create_path<P: AsRef<Path>>(path: P) -> Result<Builder> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).map_err(CDBError::from)?;
        Builder::create(file, true, Some(path))
    }

    #[inline]
    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(CDBError::ClosedHandle.into());
        }
        if self.poisoned {
            return Err(CDBError::PoisonedBuilder.into());
        }
        Ok(())
    }

    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_open()?;
        match self.add_inner(key, value) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.poisoned = true;
                Err(e)
            }
        }
    }

    fn add_inner(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let record_bytes = RECORD_PREFIX_SIZE as u64 + key.len() as u64 + value.len() as u64;
        let reserved = self.size + record_bytes + 16;
        if reserved > u32::max_value() as u64 {
            return Err(CDBError::overflow(format!(
                "adding a {}-byte record would grow the file past the 2^32-1 byte limit",
                record_bytes
            ))
            .into());
        }

        let record_offset = self.writer.position();

        self.writer.write(&codec::pack_u32(key.len() as u32))?;
        self.writer.write(&codec::pack_u32(value.len() as u32))?;
        self.writer.write(key)?;
        self.writer.write(value)?;

        let hash = codec::hash(key);
        self.journal.push(hash, record_offset as u32);
        self.bucket_counts[(hash & 0xFF) as usize] += 1;
        self.size += record_bytes;

        Ok(())
    }

    pub fn commit(&mut self) -> Result<Reader> {
        self.check_open()?;
        debug!("committing builder, {} records staged", self.journal.len());
        match self.do_commit() {
            Ok(file) => {
                self.committed = true;
                info!("commit complete, final size: {} bytes", self.writer.position());
                Reader::open(file, MmapMode::BestEffort)
            }
            Err(e) => {
                self.poisoned = true;
                Err(e)
            }
        }
    }

    fn do_commit(&mut self) -> Result<File> {
        let total: u64 = self.bucket_counts.iter().map(|&c| u64::from(c)).sum();
        let mut header = [0u8; MAIN_TABLE_SIZE_BYTES];

        if total > 0 {
            let mut starts = [0u64; MAIN_TABLE_SIZE];
            let mut running = 0u64;
            for i in 0..MAIN_TABLE_SIZE {
                running += u64::from(self.bucket_counts[i]);
                starts[i] = running;
            }

            let mut sorted = vec![(0u32, 0u32); total as usize];
            for &(hash, record_offset) in self.journal.iter_newest_to_oldest() {
                let bucket = (hash & 0xFF) as usize;
                starts[bucket] -= 1;
                sorted[starts[bucket] as usize] = (hash, record_offset);
            }

            let max_count = *self.bucket_counts.iter().max().unwrap_or(&0);
            let mut scratch: Vec<(u32, u32)> = Vec::with_capacity(max_count as usize * 2);
            let mut sorted_pos = 0usize;

            for i in 0..MAIN_TABLE_SIZE {
                let count = self.bucket_counts[i];
                let length = count * 2;

                let bucket_ptr = self.writer.position() as u32;
                header[i * SLOT_SIZE..i * SLOT_SIZE + 4]
                    .copy_from_slice(&codec::pack_u32(bucket_ptr));
                header[i * SLOT_SIZE + 4..i * SLOT_SIZE + 8]
                    .copy_from_slice(&codec::pack_u32(length));

                scratch.clear();
                scratch.resize(length as usize, (0u32, 0u32));

                for _ in 0..count {
                    let (hash, record_offset) = sorted[sorted_pos];
                    sorted_pos += 1;
                    let mut slot = ((hash >> 8) as u64 % u64::from(length)) as u32;
                    while scratch[slot as usize].1 != 0 {
                        slot = (slot + 1) % length;
                    }
                    scratch[slot as usize] = (hash, record_offset);
                }

                for &(hash, record_offset) in scratch.iter() {
                    self.writer.write(&codec::pack_u32(hash))?;
                    self.writer.write(&codec::pack_u32(record_offset))?;
                }
            }
        }
        // `total == 0`: leave `header` as the all-zero buffer and skip the
        // table-writing loop entirely, so a database with no records is a
        // literal 2048-byte file of zeros rather than 256 header entries
        // all pointing at an empty table.

        self.writer.flush()?;
        self.writer.write_header_at_start(&header)?;
        self.writer.sync_all()?;
        self.writer.try_clone_file()
    }

    fn destroy_if_uncommitted(&mut self) {
        if !self.committed && self.owns_file {
            if let Some(path) = self.path.take() {
                let _ = fs::remove_file(path);
            }
        }
    }

    pub fn close(&mut self) {
        self.destroy_if_uncommitted();
        self.closed = true;
    }

    #[cfg(unix)]
    pub fn fileno(&self) -> Result<RawFd> {
        self.check_open()?;
        Ok(self.writer.file_ref().as_raw_fd())
    }
}

impl Drop for Builder {
    fn drop(&mut self) {
        self.destroy_if_uncommitted();
    }
}
