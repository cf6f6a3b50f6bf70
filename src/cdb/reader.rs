use std::cell::Cell;
use std::fs::File;
#[cfg(unix)]
use std::os::unix::io::RawFd;
use std::path::Path;

use cdb::codec;
use cdb::errors::CDBError;
use cdb::io::{Backend, MmapMode};
use cdb::iter::{GetAll, Items, Keys, Records};
use cdb::{Bucket, Result, Slot, MAIN_TABLE_SIZE, MAIN_TABLE_SIZE_BYTES, SLOT_SIZE};

/// Counts cached lazily on first request: (unique keys, total records).
#[derive(Copy, Clone)]
struct Counts {
    unique_keys: u64,
    record_count: u64,
}

/// An open, immutable constant database.
pub struct Reader {
    backend: Backend,
    file_len: u64,
    sentinel: Cell<Option<u32>>,
    counts: Cell<Option<Counts>>,
    closed: Cell<bool>,
}

impl Reader {
    pub fn from_path<P: AsRef<Path>>(path: P, mode: MmapMode) -> Result<Reader> {
        let file = File::open(path).map_err(CDBError::from)?;
        Reader::open(file, mode)
    }

    pub fn open(file: File, mode: MmapMode) -> Result<Reader> {
        let (backend, file_len) = Backend::open(file, mode)?;
        let reader = Reader {
            backend,
            file_len,
            sentinel: Cell::new(None),
            counts: Cell::new(None),
            closed: Cell::new(false),
        };
        reader.validate_size()?;
        debug!("opened reader, file_len: {}", file_len);
        Ok(reader)
    }

    #[inline]
    fn check_open(&self) -> Result<()> {
        if self.closed.get() {
            return Err(CDBError::ClosedHandle.into());
        }
        Ok(())
    }

    pub(crate) fn bucket_at(&self, idx: usize) -> Result<Bucket> {
        assert!(idx < MAIN_TABLE_SIZE);
        let off = (idx * SLOT_SIZE) as u64;
        let bytes = self.backend.read_at(off, SLOT_SIZE)?;
        let bucket = Bucket {
            ptr: codec::unpack_u32(&bytes[0..4]),
            num_ents: codec::unpack_u32(&bytes[4..8]),
        };
        trace!("bucket_at idx: {}, got: {:?}", idx, bucket);
        Ok(bucket)
    }

    pub(crate) fn slot_at(&self, bucket: &Bucket, idx: u32) -> Result<Slot> {
        let off = bucket.ptr as u64 + (idx as u64 * SLOT_SIZE as u64);
        let bytes = self.backend.read_at(off, SLOT_SIZE)?;
        Ok(Slot {
            hash: codec::unpack_u32(&bytes[0..4]),
            record_offset: codec::unpack_u32(&bytes[4..8]),
        })
    }

    pub(crate) fn read_lengths(&self, record_offset: u32) -> Result<(u32, u32)> {
        let bytes = self.backend.read_at(record_offset as u64, 8)?;
        Ok((codec::unpack_u32(&bytes[0..4]), codec::unpack_u32(&bytes[4..8])))
    }

    pub(crate) fn read_key(&self, record_offset: u32, klen: u32) -> Result<Vec<u8>> {
        self.backend.read_at(record_offset as u64 + 8, klen as usize)
    }

    pub(crate) fn read_value(&self, record_offset: u32, klen: u32, vlen: u32) -> Result<Vec<u8>> {
        self.backend
            .read_at(record_offset as u64 + 8 + klen as u64, vlen as usize)
    }

    pub(crate) fn read_key_value(&self, record_offset: u32) -> Result<(Vec<u8>, Vec<u8>)> {
        let (klen, vlen) = self.read_lengths(record_offset)?;
        let key = self.read_key(record_offset, klen)?;
        let value = self.read_value(record_offset, klen, vlen)?;
        Ok((key, value))
    }

    /// Offset of the first hash table: the end of the record region. A
    /// genuinely empty database (an all-zero 2048-byte header) has no
    /// non-empty bucket to read this from, so it defaults to the header
    /// size, which is also the (empty) end of its record region.
    pub(crate) fn sentinel(&self) -> Result<u32> {
        if let Some(s) = self.sentinel.get() {
            return Ok(s);
        }
        let b0 = self.bucket_at(0)?;
        let s = if b0.ptr == 0 && b0.num_ents == 0 {
            MAIN_TABLE_SIZE_BYTES as u32
        } else {
            b0.ptr
        };
        self.sentinel.set(Some(s));
        Ok(s)
    }

    fn expected_size(&self) -> Result<u64> {
        let mut max_end = MAIN_TABLE_SIZE_BYTES as u64;
        for i in 0..MAIN_TABLE_SIZE {
            let b = self.bucket_at(i)?;
            if b.num_ents > 0 {
                let end = b.ptr as u64 + b.num_ents as u64 * SLOT_SIZE as u64;
                if end > max_end {
                    max_end = end;
                }
            }
        }
        Ok(max_end)
    }

    fn validate_size(&self) -> Result<()> {
        let expected = self.expected_size()?;
        if expected > self.file_len {
            return Err(CDBError::format_error(format!(
                "header implies a file of at least {} bytes but backing store is only {} bytes",
                expected, self.file_len
            ))
            .into());
        }
        Ok(())
    }

    pub(crate) fn locate(&self, key: &[u8]) -> Result<Option<u32>> {
        let h = codec::hash(key);
        let bucket = self.bucket_at((h & 0xFF) as usize)?;
        if bucket.num_ents == 0 {
            trace!("bucket empty, returning none");
            return Ok(None);
        }
        let start = (h >> 8) % bucket.num_ents;
        for probe in 0..bucket.num_ents {
            let idx = (start + probe) % bucket.num_ents;
            let slot = self.slot_at(&bucket, idx)?;
            if slot.record_offset == 0 {
                return Ok(None);
            }
            if slot.hash == h {
                let (klen, _) = self.read_lengths(slot.record_offset)?;
                if klen as usize == key.len() {
                    let found = self.read_key(slot.record_offset, klen)?;
                    if found == key {
                        return Ok(Some(slot.record_offset));
                    }
                }
            }
        }
        Ok(None)
    }

    pub fn contains(&self, key: &[u8]) -> Result<bool> {
        self.check_open()?;
        Ok(self.locate(key)?.is_some())
    }

    pub fn get_first(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.check_open()?;
        match self.locate(key)? {
            None => Ok(None),
            Some(record_offset) => {
                let (klen, vlen) = self.read_lengths(record_offset)?;
                Ok(Some(self.read_value(record_offset, klen, vlen)?))
            }
        }
    }

    pub fn get_all<'r>(&'r self, key: &[u8]) -> Result<GetAll<'r>> {
        self.check_open()?;
        GetAll::new(self, key)
    }

    pub fn iter_items(&self, all: bool) -> Result<Items> {
        self.check_open()?;
        Ok(Items::new(Records::new(self)?, all))
    }

    pub fn iter_keys(&self, all: bool) -> Result<Keys> {
        self.check_open()?;
        Ok(Keys::new(Records::new(self)?, all))
    }

    fn ensure_counts(&self) -> Result<Counts> {
        if let Some(c) = self.counts.get() {
            return Ok(c);
        }
        let mut record_count = 0u64;
        let mut unique_keys = 0u64;
        for item in Records::new(self)? {
            let item = item?;
            record_count += 1;
            if item.is_first {
                unique_keys += 1;
            }
        }
        let c = Counts { unique_keys, record_count };
        self.counts.set(Some(c));
        Ok(c)
    }

    /// Number of distinct keys.
    pub fn len(&self) -> Result<u64> {
        self.check_open()?;
        Ok(self.ensure_counts()?.unique_keys)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Total number of records, including duplicate keys.
    pub fn record_count(&self) -> Result<u64> {
        self.check_open()?;
        Ok(self.ensure_counts()?.record_count)
    }

    #[cfg(unix)]
    pub fn fileno(&self) -> Result<RawFd> {
        self.check_open()?;
        Ok(self.backend.raw_fd())
    }

    pub fn close(&self) {
        self.closed.set(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdb::builder::Builder;
    use tempfile::NamedTempFile;

    fn build(kvs: &[(&str, &str)]) -> Reader {
        let tmp = NamedTempFile::new().unwrap();
        let mut b = Builder::create(tmp.reopen().unwrap(), false, None).unwrap();
        for (k, v) in kvs {
            b.add(k.as_bytes(), v.as_bytes()).unwrap();
        }
        b.commit().unwrap()
    }

    #[test]
    fn s1_basic_round_trip() {
        let r = build(&[("one", "Hello"), ("two", "Goodbye")]);
        assert!(r.contains(b"one").unwrap());
        assert_eq!(r.get_first(b"one").unwrap(), Some(b"Hello".to_vec()));
        assert!(!r.contains(b"three").unwrap());
        assert_eq!(r.len().unwrap(), 2);
    }

    #[test]
    fn s5_empty_key_and_empty_value() {
        let r = build(&[("", "empty-key"), ("x", "")]);
        assert_eq!(r.get_first(b"").unwrap(), Some(b"empty-key".to_vec()));
        assert_eq!(r.get_first(b"x").unwrap(), Some(b"".to_vec()));
        assert!(r.contains(b"").unwrap());
        assert!(r.contains(b"x").unwrap());
    }

    #[test]
    fn s6_non_ascii_single_byte_key() {
        let tmp = NamedTempFile::new().unwrap();
        let mut b = Builder::create(tmp.reopen().unwrap(), false, None).unwrap();
        b.add(&[0xFFu8], b"hi").unwrap();
        let r = b.commit().unwrap();

        assert!(r.contains(&[0xFFu8]).unwrap());
        for byte in 0u8..=254 {
            assert!(!r.contains(&[byte]).unwrap());
        }
    }

    #[test]
    fn absence_of_unadded_key() {
        let r = build(&[("a", "1")]);
        assert!(!r.contains(b"nope").unwrap());
        assert_eq!(r.get_first(b"nope").unwrap(), None);
    }

    #[test]
    fn s4_one_thousand_pairs() {
        let kvs: Vec<(String, String)> = (0..1000)
            .map(|i| (format!("key{}", i), format!("val{}", i)))
            .collect();
        let tmp = NamedTempFile::new().unwrap();
        let mut b = Builder::create(tmp.reopen().unwrap(), false, None).unwrap();
        for (k, v) in &kvs {
            b.add(k.as_bytes(), v.as_bytes()).unwrap();
        }
        let r = b.commit().unwrap();

        for (k, v) in &kvs {
            assert_eq!(r.get_first(k.as_bytes()).unwrap(), Some(v.clone().into_bytes()));
        }
        assert_eq!(r.len().unwrap(), 1000);
        assert!(!r.contains(b"key1000").unwrap());
    }

    #[test]
    fn closed_reader_rejects_operations() {
        let r = build(&[("a", "1")]);
        r.close();
        assert!(r.contains(b"a").is_err());
        assert!(r.get_first(b"a").is_err());
    }
}
