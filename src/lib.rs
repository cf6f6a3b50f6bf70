extern crate bytes;
extern crate env_logger;
extern crate failure;
#[macro_use]
extern crate failure_derive;
#[macro_use]
extern crate log;
extern crate memmap;

#[cfg(test)]
extern crate tempfile;
#[cfg(test)]
extern crate proptest;

pub use cdb::{Builder, CDBError, MmapMode, Reader, Result};
pub use memmap::Mmap;

pub mod cdb;
