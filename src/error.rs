//! Crate-wide error type.
//!
//! Every failure carries a kind (one enum variant per failure class), a short
//! message and an ordered list of `(key, value)` details, so that callers can
//! both match on the class and report the offending values (page numbers,
//! expected vs. actual sizes, field names).

use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

/// Ordered detail pairs attached to an error.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Details {
    message: String,
    pairs: Vec<(String, String)>,
}

impl Details {
    pub fn new(message: impl Into<String>) -> Details {
        Details {
            message: message.into(),
            pairs: vec![],
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }
}

impl fmt::Display for Details {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        let mut sep = " (";
        for (k, v) in &self.pairs {
            write!(f, "{}{}={}", sep, k, v)?;
            sep = ", ";
        }
        if sep == ", " {
            write!(f, ")")?;
        }
        Ok(())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// File not open, lock contention or an unsupported format version.
    #[error("unavailable: {0}")]
    Unavailable(Details),
    /// Read or write past a declared length, record index past the count.
    #[error("out of bounds: {0}")]
    OutOfBounds(Details),
    /// Container header signature/size/length problems.
    #[error("corrupt container header: {0}")]
    CorruptHeader(Details),
    /// Bad object signature, unreadable allocation table, length over capacity.
    #[error("corrupt object: {0}")]
    CorruptObject(Details),
    /// Broken BLOB chain: zero start, oversized slot, cycle, size mismatch.
    #[error("corrupt blob chain: {0}")]
    CorruptBlob(Details),
    /// Record payload disagrees with the table layout or holds invalid text.
    #[error("corrupt record: {0}")]
    CorruptRecord(Details),
    /// A well-known table is missing or its fields are not the expected ones.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(Details),
    /// Mutation attempted on a read-only instance.
    #[error("read-only database: {0}")]
    ReadOnly(Details),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

macro_rules! constructor {
    ($name:ident, $variant:ident) => {
        pub fn $name(message: impl Into<String>) -> Error {
            Error::$variant(Details::new(message))
        }
    };
}

impl Error {
    constructor!(unavailable, Unavailable);
    constructor!(out_of_bounds, OutOfBounds);
    constructor!(corrupt_header, CorruptHeader);
    constructor!(corrupt_object, CorruptObject);
    constructor!(corrupt_blob, CorruptBlob);
    constructor!(corrupt_record, CorruptRecord);
    constructor!(schema_mismatch, SchemaMismatch);
    constructor!(read_only, ReadOnly);

    /// Appends one detail pair, keeping insertion order.
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Error {
        if let Some(d) = self.details_mut() {
            d.pairs.push((key.into(), value.to_string()));
        }
        self
    }

    pub fn details(&self) -> Option<&Details> {
        match self {
            Error::Unavailable(d)
            | Error::OutOfBounds(d)
            | Error::CorruptHeader(d)
            | Error::CorruptObject(d)
            | Error::CorruptBlob(d)
            | Error::CorruptRecord(d)
            | Error::SchemaMismatch(d)
            | Error::ReadOnly(d) => Some(d),
            Error::Io(_) => None,
        }
    }

    fn details_mut(&mut self) -> Option<&mut Details> {
        match self {
            Error::Unavailable(d)
            | Error::OutOfBounds(d)
            | Error::CorruptHeader(d)
            | Error::CorruptObject(d)
            | Error::CorruptBlob(d)
            | Error::CorruptRecord(d)
            | Error::SchemaMismatch(d)
            | Error::ReadOnly(d) => Some(d),
            Error::Io(_) => None,
        }
    }

    /// Looks up a detail value by key.
    pub fn detail(&self, key: &str) -> Option<&str> {
        self.details()?
            .pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Page numbers and offsets are reported in hex, the way the format
/// documentation writes them.
pub(crate) fn hex_u32(value: u32) -> String {
    format!("0x{}", hex::encode(value.to_be_bytes()))
}

pub(crate) fn hex_u64(value: u64) -> String {
    format!("0x{}", hex::encode(value.to_be_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_details_render_in_order() {
        let e = Error::corrupt_blob("slot length over limit")
            .with("slot", 7)
            .with("length", 251);
        assert_eq!(
            e.to_string(),
            "corrupt blob chain: slot length over limit (slot=7, length=251)"
        );
        assert_eq!(e.detail("slot"), Some("7"));
        assert_eq!(e.detail("length"), Some("251"));
        assert_eq!(e.detail("missing"), None);
    }

    #[test]
    fn test_hex_rendering() {
        assert_eq!(hex_u32(0x10), "0x00000010");
        assert_eq!(hex_u64(19 * 4096), "0x0000000000013000");
    }
}
