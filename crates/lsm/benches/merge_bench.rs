use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use lsm::{
    ComponentCursor, Field, FieldComparator, IndexConfig, KeyComparator, KeyRange, LsmIndex,
    LsmSearchCursor, MergeSource, Tuple,
};
use std::sync::Arc;
use tempfile::tempdir;

const N_KEYS: i64 = 10_000;
const N_SOURCES: usize = 8;

/// In-memory source for measuring the merge alone.
struct VecCursor {
    tuples: std::vec::IntoIter<Tuple>,
    current: Option<Tuple>,
}

impl ComponentCursor for VecCursor {
    fn has_next(&mut self) -> anyhow::Result<bool> {
        Ok(self.tuples.len() > 0)
    }

    fn advance(&mut self) -> anyhow::Result<()> {
        self.current = self.tuples.next();
        Ok(())
    }

    fn current(&self) -> Option<&Tuple> {
        self.current.as_ref()
    }

    fn close(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Source `s` holds every key `k` with `k % N_SOURCES >= s`, so low keys
/// overlap across many sources.
fn build_sources() -> Vec<MergeSource> {
    (0..N_SOURCES)
        .map(|s| {
            let tuples: Vec<Tuple> = (0..N_KEYS)
                .filter(|k| (*k as usize) % N_SOURCES >= s)
                .map(|k| Tuple::new(vec![Field::Int(k), Field::Int(s as i64)]))
                .collect();
            let cursor = VecCursor {
                tuples: tuples.into_iter(),
                current: None,
            };
            MergeSource::new(s, Box::new(cursor))
        })
        .collect()
}

fn merge_cursor_benchmark(c: &mut Criterion) {
    let cmp: Arc<dyn KeyComparator> = Arc::new(FieldComparator::new(1));
    c.bench_function("merge_8_sources_10k", |b| {
        b.iter_batched(
            build_sources,
            |sources| {
                let mut cursor = LsmSearchCursor::new(Arc::clone(&cmp));
                cursor.initialize(sources, None).unwrap();
                let mut n = 0;
                while cursor.has_next().unwrap() {
                    cursor.advance().unwrap();
                    n += 1;
                }
                cursor.close().unwrap();
                assert_eq!(n, N_KEYS);
            },
            BatchSize::LargeInput,
        );
    });
}

fn index_search_benchmark(c: &mut Criterion) {
    c.bench_function("index_search_4_components_10k", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let index = LsmIndex::open_default(IndexConfig::with_dir(dir.path())).unwrap();
                for round in 0..4 {
                    for k in (round..N_KEYS).step_by(4) {
                        index
                            .insert(Tuple::new(vec![Field::Int(k), Field::from("x")]))
                            .unwrap();
                    }
                    index.flush().unwrap();
                }
                (dir, index)
            },
            |(_dir, index)| {
                let mut cursor = index.search(&KeyRange::all()).unwrap();
                let mut n = 0;
                while cursor.has_next().unwrap() {
                    cursor.advance().unwrap();
                    n += 1;
                }
                cursor.close().unwrap();
                assert_eq!(n, N_KEYS);
            },
            BatchSize::LargeInput,
        );
    });
}

criterion_group!(benches, merge_cursor_benchmark, index_search_benchmark);
criterion_main!(benches);
