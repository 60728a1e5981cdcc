//! Concurrent lookups through one shared reader
//!
//! The reader promises that any number of threads may call `get` and
//! `find` on a single open instance with no synchronization. These tests
//! hammer that promise with thread storms and interleaved iterators.

use cdb_storage::{CdbReader, CdbWriter};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

fn build_shared_database() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shared.cdb");

    let mut writer = CdbWriter::create(&path).unwrap();
    for i in 0..1000 {
        writer
            .append(format!("key-{i}"), format!("value-{i}"))
            .unwrap();
    }
    for i in 0..100 {
        for j in 0..5 {
            writer
                .append(format!("multi-key-{i}"), format!("multi-value-{i}-{j}"))
                .unwrap();
        }
    }
    writer.finish().unwrap();
    (dir, path)
}

#[test]
fn storm_of_concurrent_gets() {
    let (_dir, path) = build_shared_database();
    let reader = Arc::new(CdbReader::open(&path).unwrap());

    let threads = 200;
    let lookups = 100;
    let mut handles = Vec::with_capacity(threads);

    for t in 0..threads {
        let reader = Arc::clone(&reader);
        handles.push(thread::spawn(move || {
            for j in 0..lookups {
                let i = (t * lookups + j) % 1000;
                let value = reader.get(format!("key-{i}")).unwrap();
                assert_eq!(value.unwrap(), format!("value-{i}").into_bytes());
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn concurrent_find_iterators_do_not_interfere() {
    let (_dir, path) = build_shared_database();
    let reader = CdbReader::open(&path).unwrap();

    // Two live iterators over the same key, advanced in lockstep: each
    // must still see the full value sequence.
    let mut first = reader.find("multi-key-0");
    let mut second = reader.find("multi-key-0");
    for j in 0..5 {
        let expected = format!("multi-value-0-{j}").into_bytes();
        assert_eq!(first.next().unwrap(), expected);
        assert_eq!(second.next().unwrap(), expected);
    }
    assert_eq!(first.next(), None);
    assert_eq!(second.next(), None);
}

#[test]
fn scoped_threads_mix_get_and_find() {
    let (_dir, path) = build_shared_database();
    let reader = CdbReader::open(&path).unwrap();

    thread::scope(|scope| {
        for t in 0..50 {
            let reader = &reader;
            scope.spawn(move || {
                let i = t % 100;
                let values: Vec<Vec<u8>> = reader.find(format!("multi-key-{i}")).collect();
                assert_eq!(values.len(), 5);
                for (j, value) in values.iter().enumerate() {
                    assert_eq!(*value, format!("multi-value-{i}-{j}").into_bytes());
                }

                assert_eq!(
                    reader.get(format!("key-{t}")).unwrap().unwrap(),
                    format!("value-{t}").into_bytes(),
                );
                assert_eq!(reader.get(format!("no-such-key-{t}")).unwrap(), None);
            });
        }
    });
}

#[test]
fn concurrent_misses_stay_clean() {
    let (_dir, path) = build_shared_database();
    let reader = Arc::new(CdbReader::open(&path).unwrap());

    let mut handles = Vec::new();
    for t in 0..50 {
        let reader = Arc::clone(&reader);
        handles.push(thread::spawn(move || {
            for j in 0..20 {
                let key = format!("non-existent-{t}-{j}");
                assert_eq!(reader.get(&key).unwrap(), None);
                assert_eq!(reader.find(&key).count(), 0);
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
}
