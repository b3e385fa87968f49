//! Table indexes.
//!
//! The on-disk index object is a B-tree of `(key bytes, record number)`
//! leaves, but its interior layout is treated as opaque: the object is
//! preserved byte-for-byte and lookups go through an oracle — an ordered map
//! from derived keys to physical record numbers, built lazily from the live
//! records and invalidated by any mutation. Key derivation itself follows
//! the field comparison encoding, case-folded for CI fields.

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::field::Field;
use crate::record::TableRecord;

#[derive(Debug, Clone, PartialEq)]
pub struct IndexField {
    /// Position in the table's field list.
    pub field: usize,
    pub descending: bool,
}

#[derive(Debug)]
pub struct Index {
    name: String,
    primary: bool,
    fields: Vec<IndexField>,
    cache: Option<BTreeMap<Vec<u8>, Vec<u32>>>,
}

impl Index {
    pub fn new(
        name: String,
        primary: bool,
        field_refs: &[(String, i64)],
        fields: &[Field],
    ) -> Result<Index> {
        let mut resolved = vec![];
        for (field_name, ordering) in field_refs {
            let position = fields
                .iter()
                .position(|f| f.name.eq_ignore_ascii_case(field_name))
                .ok_or_else(|| {
                    Error::corrupt_record("index references an unknown field")
                        .with("index", name.clone())
                        .with("field", field_name.clone())
                })?;
            resolved.push(IndexField {
                field: position,
                descending: *ordering != 0,
            });
        }
        Ok(Index {
            name,
            primary,
            fields: resolved,
            cache: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_primary(&self) -> bool {
        self.primary
    }

    pub fn fields(&self) -> &[IndexField] {
        &self.fields
    }

    /// Derives the key bytes of `rec` field by field.
    pub fn key_for(&self, fields: &[Field], rec: &TableRecord) -> Vec<u8> {
        let mut key = vec![];
        for part in &self.fields {
            let field = &fields[part.field];
            let mark = key.len();
            match rec.value(field) {
                None => key.push(0x00),
                Some(bytes) => {
                    key.push(0x01);
                    field.key_bytes(bytes, &mut key);
                }
            }
            if part.descending {
                for b in key[mark..].iter_mut() {
                    *b = !*b;
                }
            }
        }
        key
    }

    pub fn is_built(&self) -> bool {
        self.cache.is_some()
    }

    pub fn invalidate(&mut self) {
        self.cache = None;
    }

    /// Rebuilds the oracle from the live records.
    pub fn rebuild<'a>(
        &mut self,
        fields: &[Field],
        records: impl Iterator<Item = (u32, &'a TableRecord)>,
    ) {
        let mut map: BTreeMap<Vec<u8>, Vec<u32>> = BTreeMap::new();
        for (num, rec) in records {
            if rec.is_deleted() {
                continue;
            }
            map.entry(self.key_for(fields, rec)).or_default().push(num);
        }
        self.cache = Some(map);
    }

    fn cache(&self) -> Result<&BTreeMap<Vec<u8>, Vec<u32>>> {
        self.cache.as_ref().ok_or_else(|| {
            Error::unavailable("index oracle is not built").with("index", self.name.clone())
        })
    }

    /// Physical record numbers with exactly this key.
    pub fn lookup(&self, key: &[u8]) -> Result<&[u32]> {
        Ok(self
            .cache()?
            .get(key)
            .map(|v| v.as_slice())
            .unwrap_or(&[]))
    }

    /// Number of keyed entries.
    pub fn num_records(&self) -> Result<u32> {
        Ok(self.cache()?.values().map(|v| v.len() as u32).sum())
    }

    /// The physical record number at `row` in key order.
    pub fn record_at(&self, row: u32) -> Result<u32> {
        let mut remaining = row;
        for nums in self.cache()?.values() {
            if (remaining as usize) < nums.len() {
                return Ok(nums[remaining as usize]);
            }
            remaining -= nums.len() as u32;
        }
        Err(Error::out_of_bounds("index row past the entry count")
            .with("index", self.name.clone())
            .with("row", row))
    }
}
