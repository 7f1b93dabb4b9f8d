use anyhow::{bail, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use crc32fast::Hasher as Crc32;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tuple::{ComponentCursor, KeyComparator, KeyRange, Tuple};

use crate::format::{decode_tuple, read_footer, Footer, MAX_RECORD_BYTES};

/// An opened SSTable file.
///
/// Opening only validates the footer; the data section is streamed by each
/// [`SSTableCursor`] through its own file handle, so any number of cursors
/// can read the same table concurrently.
#[derive(Debug)]
pub struct SSTableReader {
    path: PathBuf,
    footer: Footer,
}

impl SSTableReader {
    /// Opens an SSTable file and validates its footer.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is too small, the magic is wrong, the
    /// data section length runs into the footer, or any I/O operation fails.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut f = File::open(&path)?;
        let footer = read_footer(&mut f)?;
        Ok(Self { path, footer })
    }

    /// Opens a forward cursor over the tuples of this table that fall in `range`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file can no longer be opened.
    pub fn cursor(&self, range: KeyRange, cmp: Arc<dyn KeyComparator>) -> Result<SSTableCursor> {
        let file = File::open(&self.path)?;
        Ok(SSTableCursor {
            path: self.path.clone(),
            file: Some(BufReader::new(file)),
            offset: 0,
            data_len: self.footer.data_len,
            range,
            cmp,
            lookahead: None,
            current: None,
            exhausted: false,
            closed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the number of tuples in the table (antimatter included).
    #[must_use]
    pub fn len(&self) -> u64 {
        self.footer.entry_count
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.footer.entry_count == 0
    }
}

/// Streaming forward cursor over one SSTable.
///
/// Records are read and CRC-checked lazily, one per `has_next` call that
/// needs a new lookahead. Records below the range's low bound are skipped;
/// reading stops at the first record above the high bound.
pub struct SSTableCursor {
    path: PathBuf,
    file: Option<BufReader<File>>,
    offset: u64,
    data_len: u64,
    range: KeyRange,
    cmp: Arc<dyn KeyComparator>,
    lookahead: Option<Tuple>,
    current: Option<Tuple>,
    exhausted: bool,
    closed: bool,
}

impl SSTableCursor {
    fn read_record(&mut self) -> Result<Option<Tuple>> {
        if self.offset >= self.data_len {
            return Ok(None);
        }
        let Some(f) = self.file.as_mut() else {
            bail!("sstable cursor has no open file");
        };

        let record_offset = self.offset;
        let stored_crc = f.read_u32::<LittleEndian>()?;
        let body_len = f.read_u32::<LittleEndian>()? as usize;
        if body_len > MAX_RECORD_BYTES {
            bail!(
                "corrupt data in {}: body_len {} exceeds maximum {}",
                self.path.display(),
                body_len,
                MAX_RECORD_BYTES
            );
        }
        let mut body = vec![0u8; body_len];
        f.read_exact(&mut body)?;

        let mut hasher = Crc32::new();
        hasher.update(&body);
        let actual_crc = hasher.finalize();
        if actual_crc != stored_crc {
            bail!(
                "CRC32 mismatch in {} at offset {}: expected {:#010x}, got {:#010x} (data corruption)",
                self.path.display(),
                record_offset,
                stored_crc,
                actual_crc
            );
        }

        self.offset += 8 + body_len as u64;
        decode_tuple(&body).map(Some)
    }

    fn fill_lookahead(&mut self) -> Result<()> {
        while self.lookahead.is_none() && !self.exhausted {
            match self.read_record()? {
                None => self.exhausted = true,
                Some(t) if self.range.is_below(self.cmp.as_ref(), &t) => continue,
                Some(t) if self.range.is_above(self.cmp.as_ref(), &t) => self.exhausted = true,
                Some(t) => self.lookahead = Some(t),
            }
        }
        Ok(())
    }
}

impl ComponentCursor for SSTableCursor {
    fn has_next(&mut self) -> Result<bool> {
        if self.closed {
            bail!("sstable cursor used after close");
        }
        self.fill_lookahead()?;
        Ok(self.lookahead.is_some())
    }

    fn advance(&mut self) -> Result<()> {
        if self.closed {
            bail!("sstable cursor used after close");
        }
        self.fill_lookahead()?;
        match self.lookahead.take() {
            Some(t) => {
                self.current = Some(t);
                Ok(())
            }
            None => bail!("advance past end of sstable {}", self.path.display()),
        }
    }

    fn current(&self) -> Option<&Tuple> {
        self.current.as_ref()
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            bail!("sstable cursor closed twice");
        }
        self.closed = true;
        self.file = None;
        self.lookahead = None;
        self.current = None;
        Ok(())
    }
}
