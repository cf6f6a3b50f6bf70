pub use self::errors::CDBError;
pub use self::io::MmapMode;
pub use self::builder::Builder;
pub use self::reader::Reader;

use failure;
use std::result;

pub mod builder;
pub mod codec;
pub mod errors;
pub mod io;
pub mod iter;
pub mod reader;

pub type Result<T> = result::Result<T, failure::Error>;

pub(crate) const MAIN_TABLE_SIZE: usize = 256;
pub(crate) const MAIN_TABLE_SIZE_BYTES: usize = 2048;
pub(crate) const SLOT_SIZE: usize = 8;
pub(crate) const RECORD_PREFIX_SIZE: usize = 8;

/// One of the 256 fixed-position header entries: the file offset and slot
/// count of a bucket's hash table. `num_ents == 0` means the bucket is
/// empty and `ptr` is meaningless.
#[derive(Copy, Clone, Default, Debug, Eq, PartialEq)]
pub(crate) struct Bucket {
    pub(crate) ptr: u32,
    pub(crate) num_ents: u32,
}

/// One 8-byte `(hash, record_offset)` cell inside a bucket's hash table.
/// `record_offset == 0` marks a free slot.
#[derive(Copy, Clone, Default, Debug, Eq, PartialEq)]
pub(crate) struct Slot {
    pub(crate) hash: u32,
    pub(crate) record_offset: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::NamedTempFile;

    pub(crate) fn build_temp(kvs: &[(&str, &str)]) -> NamedTempFile {
        let tmp = NamedTempFile::new().unwrap();
        {
            let file = tmp.reopen().unwrap();
            let mut b = Builder::create(file, true, None).unwrap();
            for (k, v) in kvs {
                b.add(k.as_bytes(), v.as_bytes()).unwrap();
            }
            b.commit().unwrap();
        }
        tmp
    }

    #[test]
    fn empty_database_is_2048_zero_bytes() {
        let tmp = build_temp(&[]);
        let mut buf = Vec::new();
        tmp.reopen().unwrap().read_to_end(&mut buf).unwrap();
        assert_eq!(buf.len(), MAIN_TABLE_SIZE_BYTES);
        assert!(buf.iter().all(|&b| b == 0));
    }
}
