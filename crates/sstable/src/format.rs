//! SSTable binary format constants, footer and tuple record codec.
//!
//! ## Footer (20 bytes) - magic `TPL1` (`0x5450_4C31`)
//!
//! ```text
//! [entry_count: u64 LE][data_len: u64 LE][magic: u32 LE]
//! ```
//!
//! ## Record
//!
//! ```text
//! [crc32: u32][body_len: u32][body]
//! body = flags(u8) | field_count(u32) | field*
//! field = tag(u8) | payload
//!   0 Null   -> (nothing)
//!   1 Int    -> i64
//!   2 Str    -> len(u32) | utf8 bytes
//!   3 Bytes  -> len(u32) | bytes
//! ```
//!
//! The CRC32 covers the body only. Bit 0 of `flags` is the antimatter flag.

use anyhow::{bail, ensure, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Read, Result as IoResult, Seek, SeekFrom, Write};
use tuple::{Field, Tuple};

/// Magic number identifying tuple SSTable files (ASCII "TPL1").
pub const SSTABLE_MAGIC: u32 = 0x5450_4C31;

/// Size of the footer in bytes: 8 (`entry_count`) + 8 (`data_len`) + 4 (`magic`).
pub const FOOTER_BYTES: u64 = 8 + 8 + 4;

/// Largest record body we'll allocate during reads (16 MiB). Prevents OOM on corrupt files.
pub const MAX_RECORD_BYTES: usize = 16 * 1024 * 1024;

const FLAG_ANTIMATTER: u8 = 0b0000_0001;

const TAG_NULL: u8 = 0;
const TAG_INT: u8 = 1;
const TAG_STR: u8 = 2;
const TAG_BYTES: u8 = 3;

/// Parsed SSTable footer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footer {
    pub entry_count: u64,
    pub data_len: u64,
}

/// Writes the footer to `w`.
pub fn write_footer<W: Write>(w: &mut W, footer: &Footer) -> IoResult<()> {
    w.write_u64::<LittleEndian>(footer.entry_count)?;
    w.write_u64::<LittleEndian>(footer.data_len)?;
    w.write_u32::<LittleEndian>(SSTABLE_MAGIC)?;
    Ok(())
}

/// Reads the footer from the tail of `r` and validates it against the file size.
pub fn read_footer<R: Read + Seek>(r: &mut R) -> IoResult<Footer> {
    let filesize = r.seek(SeekFrom::End(0))?;
    if filesize < FOOTER_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "file too small for SSTable footer",
        ));
    }

    r.seek(SeekFrom::End(-(FOOTER_BYTES as i64)))?;
    let entry_count = r.read_u64::<LittleEndian>()?;
    let data_len = r.read_u64::<LittleEndian>()?;
    let magic = r.read_u32::<LittleEndian>()?;

    if magic != SSTABLE_MAGIC {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unknown SSTable magic: {:#x}", magic),
        ));
    }
    if data_len > filesize - FOOTER_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("data_len {} runs into footer (file size {})", data_len, filesize),
        ));
    }

    Ok(Footer {
        entry_count,
        data_len,
    })
}

/// Encodes the record body for `t` into `buf` (cleared first).
pub fn encode_tuple(t: &Tuple, buf: &mut Vec<u8>) -> IoResult<()> {
    buf.clear();
    buf.write_u8(if t.is_antimatter() { FLAG_ANTIMATTER } else { 0 })?;
    buf.write_u32::<LittleEndian>(t.len() as u32)?;
    for field in t.fields() {
        match field {
            Field::Null => buf.write_u8(TAG_NULL)?,
            Field::Int(v) => {
                buf.write_u8(TAG_INT)?;
                buf.write_i64::<LittleEndian>(*v)?;
            }
            Field::Str(s) => {
                buf.write_u8(TAG_STR)?;
                buf.write_u32::<LittleEndian>(s.len() as u32)?;
                buf.extend_from_slice(s.as_bytes());
            }
            Field::Bytes(b) => {
                buf.write_u8(TAG_BYTES)?;
                buf.write_u32::<LittleEndian>(b.len() as u32)?;
                buf.extend_from_slice(b);
            }
        }
    }
    Ok(())
}

/// Decodes a record body produced by [`encode_tuple`].
pub fn decode_tuple(body: &[u8]) -> Result<Tuple> {
    let mut r = Cursor::new(body);
    let flags = r.read_u8()?;
    let count = r.read_u32::<LittleEndian>()? as usize;
    // every field costs at least its tag byte
    ensure!(
        count <= body.len(),
        "corrupt record: field_count {} exceeds body length {}",
        count,
        body.len()
    );

    let mut fields = Vec::with_capacity(count);
    for _ in 0..count {
        let field = match r.read_u8()? {
            TAG_NULL => Field::Null,
            TAG_INT => Field::Int(r.read_i64::<LittleEndian>()?),
            TAG_STR => Field::Str(String::from_utf8(read_len_prefixed(&mut r, body.len())?)?),
            TAG_BYTES => Field::Bytes(read_len_prefixed(&mut r, body.len())?),
            tag => bail!("corrupt record: unknown field tag {}", tag),
        };
        fields.push(field);
    }
    ensure!(
        r.position() as usize == body.len(),
        "corrupt record: {} trailing bytes",
        body.len() - r.position() as usize
    );

    Ok(Tuple::from_parts(fields, flags & FLAG_ANTIMATTER != 0))
}

fn read_len_prefixed(r: &mut Cursor<&[u8]>, limit: usize) -> Result<Vec<u8>> {
    let len = r.read_u32::<LittleEndian>()? as usize;
    ensure!(len <= limit, "corrupt record: length {} exceeds body", len);
    let mut out = vec![0u8; len];
    r.read_exact(&mut out)?;
    Ok(out)
}
