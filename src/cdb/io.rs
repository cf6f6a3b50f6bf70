// The unified read surface: a memory-mapped backend and a positional
// (seek + read) backend, selected once at open and never switched
// thereafter (see the dynamic-dispatch note in the design notes: a tagged
// variant, not per-call polymorphism).

use std::cell::RefCell;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};

use memmap::Mmap;

use cdb::errors::CDBError;
use cdb::Result;

/// How a `Reader` should acquire its view of the file.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MmapMode {
    /// Map the file; fail the open if mapping is not possible.
    Required,
    /// Never map; always use positional seek + read.
    Forbidden,
    /// Try to map; fall back to positional on failure, logging the
    /// fallback rather than reporting it as an error.
    BestEffort,
}

pub(crate) enum Backend {
    Mapped(Mmap, File),
    Positional(RefCell<File>),
}

impl Backend {
    pub(crate) fn open(file: File, mode: MmapMode) -> Result<(Backend, u64)> {
        let len = file.metadata().map_err(CDBError::from)?.len();

        match mode {
            MmapMode::Forbidden => Ok((Backend::Positional(RefCell::new(file)), len)),
            MmapMode::Required => {
                let mmap = unsafe { Mmap::map(&file) }.map_err(CDBError::from)?;
                Ok((Backend::Mapped(mmap, file), len))
            }
            MmapMode::BestEffort => match unsafe { Mmap::map(&file) } {
                Ok(mmap) => Ok((Backend::Mapped(mmap, file), len)),
                Err(e) => {
                    debug!("mmap best-effort failed ({}), falling back to positional reads", e);
                    Ok((Backend::Positional(RefCell::new(file)), len))
                }
            },
        }
    }

    #[cfg(unix)]
    pub(crate) fn raw_fd(&self) -> ::std::os::unix::io::RawFd {
        use std::os::unix::io::AsRawFd;
        match self {
            Backend::Mapped(_, f) => f.as_raw_fd(),
            Backend::Positional(f) => f.borrow().as_raw_fd(),
        }
    }

    /// Read exactly `len` bytes starting at `offset`, always returning an
    /// owned buffer so callers don't have to care which backend is live.
    pub(crate) fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        match self {
            Backend::Mapped(mmap, _) => {
                let data: &[u8] = mmap.as_ref();
                let start = offset as usize;
                let end = start.checked_add(len).ok_or_else(|| {
                    CDBError::format_error("offset + length overflowed")
                })?;
                if end > data.len() {
                    return Err(CDBError::format_error(format!(
                        "read of {} bytes at {} runs past end of file ({} bytes)",
                        len, offset, data.len()
                    )).into());
                }
                Ok(data[start..end].to_vec())
            }
            Backend::Positional(file_cell) => {
                let mut file = file_cell.borrow_mut();
                let mut buf = vec![0u8; len];
                file.seek(SeekFrom::Start(offset)).map_err(CDBError::from)?;
                match file.read_exact(&mut buf) {
                    Ok(()) => Ok(buf),
                    Err(ref e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                        Err(CDBError::format_error(format!(
                            "short read of {} bytes at offset {}",
                            len, offset
                        )).into())
                    }
                    Err(e) => Err(CDBError::from(e).into()),
                }
            }
        }
    }
}

/// An 8 KiB buffered append-only sink used by the builder. `write` batches
/// into the buffer and flushes it whole when it would overflow; `flush`
/// issues one write of whatever has accumulated.
pub(crate) const WRITE_BUF_SIZE: usize = 8192;

pub(crate) struct BufferedWriter {
    file: File,
    buf: Vec<u8>,
    position: u64,
}

impl BufferedWriter {
    pub(crate) fn new(file: File) -> BufferedWriter {
        BufferedWriter {
            file,
            buf: Vec::with_capacity(WRITE_BUF_SIZE),
            position: 0,
        }
    }

    #[inline]
    pub(crate) fn position(&self) -> u64 {
        self.position
    }

    pub(crate) fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if self.buf.len() + bytes.len() > WRITE_BUF_SIZE {
            self.flush()?;
        }
        if bytes.len() > WRITE_BUF_SIZE {
            // larger than the buffer itself: write straight through.
            self.file.write_all(bytes).map_err(CDBError::from)?;
        } else {
            self.buf.extend_from_slice(bytes);
        }
        self.position += bytes.len() as u64;
        Ok(())
    }

    pub(crate) fn flush(&mut self) -> Result<()> {
        if !self.buf.is_empty() {
            self.file.write_all(&self.buf).map_err(CDBError::from)?;
            self.buf.clear();
        }
        Ok(())
    }

    /// Seek to absolute offset 0 and write `bytes` directly, bypassing the
    /// append buffer. Used once, at commit, to lay down the final header.
    pub(crate) fn write_header_at_start(&mut self, bytes: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(0)).map_err(CDBError::from)?;
        self.file.write_all(bytes).map_err(CDBError::from)?;
        Ok(())
    }

    pub(crate) fn sync_all(&mut self) -> Result<()> {
        self.flush()?;
        self.file.sync_all().map_err(CDBError::from)?;
        Ok(())
    }

    pub(crate) fn try_clone_file(&self) -> Result<File> {
        self.file.try_clone().map_err(|e| CDBError::from(e).into())
    }

    pub(crate) fn file_ref(&self) -> &File {
        &self.file
    }
}
