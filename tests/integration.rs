extern crate cdb_rs;
extern crate tempfile;
#[macro_use]
extern crate proptest;

use cdb_rs::{Builder, CDBError, MmapMode, Reader};
use proptest::prelude::*;
use std::fs::OpenOptions;

fn build(kvs: &[(&[u8], &[u8])]) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db.cdb");
    {
        let mut b = Builder::create_path(&path).unwrap();
        for (k, v) in kvs {
            b.add(k, v).unwrap();
        }
        b.commit().unwrap();
    }
    (dir, path)
}

#[test]
fn truncated_file_reports_format_error() {
    let (_dir, path) = build(&[(b"one" as &[u8], b"Hello" as &[u8]), (b"two", b"Goodbye")]);

    let len = std::fs::metadata(&path).unwrap().len();
    let file = OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len(len - 1).unwrap();
    drop(file);

    match Reader::from_path(&path, MmapMode::Forbidden) {
        Err(_) => {} // open itself may reject the truncated header math
        Ok(r) => {
            // or open succeeds and a full walk trips over the missing byte
            let result: Result<Vec<_>, _> = r.iter_items(true).unwrap().collect();
            assert!(result.is_err());
        }
    }
}

#[test]
fn mmap_required_on_nonexistent_path_is_io_error() {
    let err = Reader::from_path("/nonexistent/path/does/not/exist.cdb", MmapMode::Required)
        .unwrap_err();
    match err.downcast_ref::<CDBError>() {
        Some(CDBError::IoError { .. }) => {}
        other => panic!("expected CDBError::IoError, got {:?}", other),
    }
}

#[test]
fn mmap_best_effort_matches_positional_reads() {
    let (_dir, path) = build(&[(b"a" as &[u8], b"1" as &[u8]), (b"b", b"2"), (b"c", b"3")]);

    let mapped = Reader::from_path(&path, MmapMode::BestEffort).unwrap();
    let positional = Reader::from_path(&path, MmapMode::Forbidden).unwrap();

    assert_eq!(mapped.len().unwrap(), positional.len().unwrap());
    for (k, v) in &[(b"a", b"1"), (b"b", b"2"), (b"c", b"3")] {
        assert_eq!(
            mapped.get_first(*k).unwrap(),
            positional.get_first(*k).unwrap()
        );
        assert_eq!(mapped.get_first(*k).unwrap(), Some(v.to_vec()));
    }
}

fn kv_strategy() -> impl Strategy<Value = Vec<(Vec<u8>, Vec<u8>)>> {
    prop::collection::vec(
        (
            prop::collection::vec(any::<u8>(), 0..16),
            prop::collection::vec(any::<u8>(), 0..16),
        ),
        0..64,
    )
}

proptest! {
    #[test]
    fn round_trip_holds_for_arbitrary_distinct_keys(pairs in kv_strategy()) {
        use std::collections::HashMap;

        // last value wins for duplicate keys in this model, since we only
        // check every *distinct* key's first-added value via get_first,
        // and duplicate keys are covered separately by s3-style tests.
        let mut seen = HashMap::new();
        let mut distinct = Vec::new();
        for (k, v) in &pairs {
            if seen.contains_key(k) {
                continue;
            }
            seen.insert(k.clone(), true);
            distinct.push((k.clone(), v.clone()));
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.cdb");
        let mut b = Builder::create_path(&path).unwrap();
        for (k, v) in &distinct {
            b.add(k, v).unwrap();
        }
        let r = b.commit().unwrap();

        prop_assert_eq!(r.len().unwrap() as usize, distinct.len());
        for (k, v) in &distinct {
            prop_assert!(r.contains(k).unwrap());
            prop_assert_eq!(r.get_first(k).unwrap(), Some(v.clone()));
        }
    }
}
