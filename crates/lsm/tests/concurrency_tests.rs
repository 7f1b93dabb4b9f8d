//! Searches running against a background thread that keeps flushing and
//! merging underneath them.

use lsm::{Field, IndexConfig, KeyRange, LsmIndex, LsmResult, Tuple};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use tempfile::tempdir;

const KEYS: i64 = 200;
const READERS: usize = 4;

fn row(k: i64, gen: i64) -> Tuple {
    Tuple::new(vec![Field::Int(k), Field::Int(gen)])
}

fn key_of(t: &Tuple) -> i64 {
    match t.field(0) {
        Some(Field::Int(k)) => *k,
        other => panic!("unexpected key {:?}", other),
    }
}

fn sst_files(index: &LsmIndex) -> usize {
    std::fs::read_dir(index.sst_dir())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().map(|x| x == "sst").unwrap_or(false))
        .count()
}

#[test]
fn searches_stay_consistent_during_background_merges() -> LsmResult<()> {
    let dir = tempdir()?;
    let index = Arc::new(LsmIndex::open_default(IndexConfig::with_dir(dir.path().join("c")))?);
    for k in 0..KEYS {
        index.insert(row(k, 0))?;
    }
    index.flush()?;

    let stop = Arc::new(AtomicBool::new(false));
    let scans = Arc::new(AtomicUsize::new(0));

    let readers: Vec<_> = (0..READERS)
        .map(|_| {
            let index = Arc::clone(&index);
            let stop = Arc::clone(&stop);
            let scans = Arc::clone(&scans);
            thread::spawn(move || -> LsmResult<()> {
                while !stop.load(Ordering::Relaxed) {
                    let mut cursor = index.search(&KeyRange::all())?;
                    let mut expected = 0;
                    while cursor.has_next()? {
                        let k = key_of(cursor.advance()?);
                        assert_eq!(k, expected, "every key exactly once, ascending");
                        expected += 1;
                    }
                    cursor.close()?;
                    assert_eq!(expected, KEYS);
                    scans.fetch_add(1, Ordering::Relaxed);
                }
                Ok(())
            })
        })
        .collect();

    let writer = {
        let index = Arc::clone(&index);
        thread::spawn(move || -> LsmResult<()> {
            for gen in 1..=30 {
                for k in (0..KEYS).filter(|k| k % 7 == gen % 7) {
                    index.insert(row(k, gen))?;
                }
                index.flush()?;
                if gen % 3 == 0 {
                    index.merge_all()?;
                }
            }
            Ok(())
        })
    };

    writer.join().expect("writer panicked")?;
    while scans.load(Ordering::Relaxed) < READERS * 4 {
        thread::yield_now();
    }
    stop.store(true, Ordering::Relaxed);
    for r in readers {
        r.join().expect("reader panicked")?;
    }

    index.merge_all()?;
    let harness = index.harness();
    assert_eq!(harness.outstanding_searches(), 0);
    assert_eq!(harness.pending_reclamations(), 0);
    assert_eq!(index.disk_component_count(), 1);
    assert_eq!(sst_files(&index), 1, "superseded files were all reclaimed");
    Ok(())
}

#[test]
fn pinned_components_survive_a_concurrent_merge() -> LsmResult<()> {
    let dir = tempdir()?;
    let index = Arc::new(LsmIndex::open_default(IndexConfig::with_dir(dir.path().join("c")))?);
    for gen in 0..4 {
        for k in 0..KEYS {
            index.insert(row(k, gen))?;
        }
        index.flush()?;
    }

    let mut cursor = index.search(&KeyRange::all())?;
    let mut seen = 0;
    // read half, then merge from another thread while the cursor is mid-stream
    while seen < KEYS / 2 {
        cursor.advance()?;
        seen += 1;
    }

    let merger = {
        let index = Arc::clone(&index);
        thread::spawn(move || index.merge_all())
    };
    merger.join().expect("merger panicked")?;
    assert_eq!(sst_files(&index), 5);

    while cursor.has_next()? {
        let t = cursor.advance()?;
        assert_eq!(t.field(1), Some(&Field::Int(3)), "newest generation wins");
        seen += 1;
    }
    cursor.close()?;

    assert_eq!(seen, KEYS);
    assert_eq!(sst_files(&index), 1);
    Ok(())
}
