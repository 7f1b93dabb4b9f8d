use std::fmt;
use std::sync::Arc;

/// A single typed field value.
///
/// Fields are totally ordered: first by variant (`Null < Int < Str < Bytes`),
/// then by value. This is the order [`FieldComparator`](crate::FieldComparator)
/// uses for keys.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    Null,
    Int(i64),
    Str(String),
    Bytes(Vec<u8>),
}

impl Field {
    /// Approximate heap + inline footprint, used for memtable sizing.
    pub fn approx_size(&self) -> usize {
        match self {
            Field::Null => 1,
            Field::Int(_) => 8,
            Field::Str(s) => s.len(),
            Field::Bytes(b) => b.len(),
        }
    }
}

impl From<i64> for Field {
    fn from(v: i64) -> Self {
        Field::Int(v)
    }
}

impl From<&str> for Field {
    fn from(v: &str) -> Self {
        Field::Str(v.to_string())
    }
}

impl From<String> for Field {
    fn from(v: String) -> Self {
        Field::Str(v)
    }
}

impl From<Vec<u8>> for Field {
    fn from(v: Vec<u8>) -> Self {
        Field::Bytes(v)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Null => write!(f, "null"),
            Field::Int(v) => write!(f, "{}", v),
            Field::Str(s) => write!(f, "{:?}", s),
            Field::Bytes(b) => write!(f, "0x{}", b.iter().map(|x| format!("{:02x}", x)).collect::<String>()),
        }
    }
}

/// An immutable record: key fields followed by payload fields.
///
/// The field storage is shared (`Arc<[Field]>`), so cloning a tuple is a
/// reference-count bump. Cursors hand out references to their current tuple
/// and the merge layer clones them into its slots.
///
/// `antimatter == true` marks the tuple as a delete marker (tombstone) for
/// its key. Antimatter tuples normally carry only key fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tuple {
    fields: Arc<[Field]>,
    antimatter: bool,
}

impl Tuple {
    /// Creates a regular (value) tuple.
    pub fn new(fields: Vec<Field>) -> Self {
        Self {
            fields: fields.into(),
            antimatter: false,
        }
    }

    /// Creates a delete marker for the given key fields.
    pub fn antimatter(key: Vec<Field>) -> Self {
        Self {
            fields: key.into(),
            antimatter: true,
        }
    }

    /// Rebuilds a tuple from decoded parts (used by on-disk readers).
    pub fn from_parts(fields: Vec<Field>, antimatter: bool) -> Self {
        Self {
            fields: fields.into(),
            antimatter,
        }
    }

    #[must_use]
    pub fn is_antimatter(&self) -> bool {
        self.antimatter
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, idx: usize) -> Option<&Field> {
        self.fields.get(idx)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn approx_size(&self) -> usize {
        self.fields.iter().map(Field::approx_size).sum::<usize>() + 1
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.antimatter {
            write!(f, "-")?;
        }
        write!(f, "(")?;
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", field)?;
        }
        write!(f, ")")
    }
}
