// Two iterator families: a whole-file record walker (`Records`, wrapped by
// `Items`/`Keys`) and a per-key match walker (`GetAll`), used both directly
// and to detect duplicates during the whole-file walk.
//
// Cursor state here is invalidated by the next call to `next`; every item
// returned is a freshly-allocated `Vec<u8>` rather than a borrowed slice,
// uniformly across the mapped and positional backends, trading one
// allocation per step for not having to reason about borrow lifetimes tied
// to the cursor.

use cdb::codec;
use cdb::errors::CDBError;
use cdb::reader::Reader;
use cdb::{Bucket, Result, MAIN_TABLE_SIZE_BYTES, RECORD_PREFIX_SIZE};

pub struct RecordItem {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub is_first: bool,
}

/// Walks every record in the file, in insertion order, from the start of
/// the record region to the sentinel (the start of the first hash table).
pub struct Records<'r> {
    reader: &'r Reader,
    pos: u32,
    end: u32,
}

impl<'r> Records<'r> {
    pub(crate) fn new(reader: &'r Reader) -> Result<Records<'r>> {
        let end = reader.sentinel()?;
        Ok(Records {
            reader,
            pos: MAIN_TABLE_SIZE_BYTES as u32,
            end,
        })
    }
}

impl<'r> Iterator for Records<'r> {
    type Item = Result<RecordItem>;

    fn next(&mut self) -> Option<Result<RecordItem>> {
        if self.pos >= self.end {
            return None;
        }
        let record_offset = self.pos;

        macro_rules! try_or_stop {
            ($e:expr) => {
                match $e {
                    Ok(v) => v,
                    Err(e) => {
                        self.pos = self.end;
                        return Some(Err(e));
                    }
                }
            };
        }

        let (klen, vlen) = try_or_stop!(self.reader.read_lengths(record_offset));
        let key = try_or_stop!(self.reader.read_key(record_offset, klen));
        let value = try_or_stop!(self.reader.read_value(record_offset, klen, vlen));
        let located = try_or_stop!(self.reader.locate(&key));
        let is_first = match located {
            Some(off) => off == record_offset,
            None => {
                self.pos = self.end;
                return Some(Err(CDBError::format_error(format!(
                    "record at offset {} is reachable by iteration but has no slot in its bucket",
                    record_offset
                )).into()));
            }
        };

        self.pos += RECORD_PREFIX_SIZE as u32 + klen + vlen;

        Some(Ok(RecordItem { key, value, is_first }))
    }
}

/// All (key, value) pairs, either every record (`all = true`) or only the
/// first occurrence of each distinct key (`all = false`).
pub struct Items<'r> {
    inner: Records<'r>,
    all: bool,
}

impl<'r> Items<'r> {
    pub(crate) fn new(inner: Records<'r>, all: bool) -> Items<'r> {
        Items { inner, all }
    }
}

impl<'r> Iterator for Items<'r> {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.inner.next()? {
                Ok(item) => {
                    if self.all || item.is_first {
                        return Some(Ok((item.key, item.value)));
                    }
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Keys only, either every occurrence (`all = true`) or only the first
/// occurrence of each distinct key (`all = false`).
pub struct Keys<'r> {
    inner: Records<'r>,
    all: bool,
}

impl<'r> Keys<'r> {
    pub(crate) fn new(inner: Records<'r>, all: bool) -> Keys<'r> {
        Keys { inner, all }
    }
}

impl<'r> Iterator for Keys<'r> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.inner.next()? {
                Ok(item) => {
                    if self.all || item.is_first {
                        return Some(Ok(item.key));
                    }
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Wraps the probing state of a single-key lookup: each `next` call
/// advances the probe to the next matching slot or to exhaustion.
pub struct GetAll<'r> {
    reader: &'r Reader,
    key: Vec<u8>,
    hash: u32,
    bucket_ptr: u32,
    num_ents: u32,
    start_slot: u32,
    probe: u32,
    done: bool,
}

impl<'r> GetAll<'r> {
    pub(crate) fn new(reader: &'r Reader, key: &[u8]) -> Result<GetAll<'r>> {
        let hash = codec::hash(key);
        let bucket = reader.bucket_at((hash & 0xFF) as usize)?;
        let done = bucket.num_ents == 0;
        let start_slot = if done { 0 } else { (hash >> 8) % bucket.num_ents };
        Ok(GetAll {
            reader,
            key: key.to_vec(),
            hash,
            bucket_ptr: bucket.ptr,
            num_ents: bucket.num_ents,
            start_slot,
            probe: 0,
            done,
        })
    }
}

impl<'r> Iterator for GetAll<'r> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Result<Vec<u8>>> {
        if self.done {
            return None;
        }

        let bucket = Bucket { ptr: self.bucket_ptr, num_ents: self.num_ents };

        loop {
            if self.probe >= self.num_ents {
                self.done = true;
                return None;
            }
            let slot_idx = (self.start_slot + self.probe) % self.num_ents;
            self.probe += 1;

            let slot = match self.reader.slot_at(&bucket, slot_idx) {
                Ok(s) => s,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };

            if slot.record_offset == 0 {
                self.done = true;
                return None;
            }

            if slot.hash != self.hash {
                continue;
            }

            let (klen, vlen) = match self.reader.read_lengths(slot.record_offset) {
                Ok(v) => v,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };

            if klen as usize != self.key.len() {
                continue;
            }

            let found_key = match self.reader.read_key(slot.record_offset, klen) {
                Ok(k) => k,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };

            if found_key != self.key {
                continue;
            }

            return Some(self.reader.read_value(slot.record_offset, klen, vlen));
        }
    }
}
