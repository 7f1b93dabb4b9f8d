use anyhow::Result;
use byteorder::{LittleEndian, WriteBytesExt};
use crc32fast::Hasher as Crc32;
use memtable::Memtable;
use std::cmp::Ordering;
use std::fs::{rename, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use tuple::{KeyComparator, Tuple};

use crate::format::{encode_tuple, write_footer, Footer};

/// Writes sorted tuples to disk as an immutable SSTable file.
///
/// The writer is stateless. The write is crash-safe: data is first written to
/// a temporary file, fsynced, and then atomically renamed to the final path.
pub struct SSTableWriter {}

impl SSTableWriter {
    /// Flushes every entry of `mem` (antimatter included) to a new SSTable.
    ///
    /// # Errors
    ///
    /// Returns an error if the memtable is empty or on any I/O failure.
    pub fn write_from_memtable(path: &Path, mem: &Memtable) -> Result<u64> {
        if mem.is_empty() {
            anyhow::bail!("refusing to write an empty SSTable (empty memtable)");
        }
        Self::write_from_iterator(path, mem.comparator().as_ref(), mem.iter().cloned())
    }

    /// Writes an SSTable from an iterator of tuples, returning the entry count.
    ///
    /// This is the streaming entry point used by merges: tuples are consumed
    /// one at a time and written directly to disk.
    ///
    /// # Arguments
    ///
    /// * `path` – destination `.sst` file path.
    /// * `cmp` – the index comparator; keys must be strictly ascending under it.
    /// * `iter` – the tuples to write, already deduplicated.
    ///
    /// # Errors
    ///
    /// Returns an error if the iterator yields zero tuples, yields a key that
    /// is not strictly greater than its predecessor, or on I/O failure.
    pub fn write_from_iterator<I>(path: &Path, cmp: &dyn KeyComparator, iter: I) -> Result<u64>
    where
        I: Iterator<Item = Tuple>,
    {
        let tmp_path = path.with_extension("sst.tmp");
        let result = Self::write_internal(&tmp_path, cmp, iter);
        let footer = match result {
            Ok(footer) => footer,
            Err(e) => {
                let _ = std::fs::remove_file(&tmp_path);
                return Err(e);
            }
        };

        // Atomically move into place
        rename(&tmp_path, path)?;

        // Fsync the parent directory so the rename survives a crash.
        if let Some(parent) = path.parent() {
            if let Ok(dir) = std::fs::File::open(parent) {
                let _ = dir.sync_all();
            }
        }

        Ok(footer.entry_count)
    }

    fn write_internal<I>(tmp_path: &Path, cmp: &dyn KeyComparator, iter: I) -> Result<Footer>
    where
        I: Iterator<Item = Tuple>,
    {
        let raw_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(tmp_path)?;
        let mut file = BufWriter::new(raw_file);

        let mut body: Vec<u8> = Vec::with_capacity(256);
        let mut data_len: u64 = 0;
        let mut entry_count: u64 = 0;
        let mut prev: Option<Tuple> = None;

        for t in iter {
            if let Some(p) = &prev {
                anyhow::ensure!(
                    cmp.compare(p, &t) == Ordering::Less,
                    "tuples not strictly ascending: {} followed by {}",
                    p,
                    t
                );
            }

            encode_tuple(&t, &mut body)?;
            let mut hasher = Crc32::new();
            hasher.update(&body);
            let crc = hasher.finalize();

            // Write: [crc32][body_len][body]
            file.write_u32::<LittleEndian>(crc)?;
            file.write_u32::<LittleEndian>(body.len() as u32)?;
            file.write_all(&body)?;

            data_len += 8 + body.len() as u64;
            entry_count += 1;
            prev = Some(t);
        }

        if entry_count == 0 {
            anyhow::bail!("refusing to write an empty SSTable (no entries)");
        }

        let footer = Footer {
            entry_count,
            data_len,
        };
        write_footer(&mut file, &footer)?;

        // Flush BufWriter, then sync the underlying file
        file.flush()?;
        file.into_inner()?.sync_all()?;

        Ok(footer)
    }
}
