//! The table-file catalog: system tables shaped `FILENAME, CREATION,
//! MODIFIED, ATTRIBUTES, DATASIZE, BINARYDATA[, PARTNO]` act as named-file
//! stores (CONFIG, CONFIGSAVE, PARAMS, FILES and friends).
//!
//! Files are keyed by case-insensitive name; a file split over several rows
//! is reassembled in `PARTNO` order and its byte count checked against
//! `DATASIZE`. Nested-container parsing stays outside entirely; decompression
//! goes through the [`Compression`] collaborator — [`IdentityCompression`]
//! covers stores whose payloads are raw, callers with deflated payloads
//! supply their own codec and [`TableFile::unpacked`] falls back to the raw
//! bytes whenever the codec rejects one.

use std::collections::BTreeMap;

use itertools::Itertools;

use crate::error::{Error, Result};
use crate::field::{read_int, DateTime};
use crate::pager::Pager;
use crate::table::Table;

/// The shape that makes a table a catalog, in field order.
pub const CATALOG_FIELDS: [&str; 7] = [
    "FILENAME",
    "CREATION",
    "MODIFIED",
    "ATTRIBUTES",
    "DATASIZE",
    "BINARYDATA",
    "PARTNO",
];

/// Inflate/deflate collaborator; payloads are compressed opportunistically,
/// so the catalog only ever tries and falls back.
pub trait Compression {
    fn inflate(&self, src: &[u8]) -> Result<Vec<u8>>;
    fn deflate(&self, src: &[u8]) -> Result<Vec<u8>>;
}

/// Pass-through codec for stores whose payloads are not compressed.
#[derive(Debug, Default)]
pub struct IdentityCompression;

impl Compression for IdentityCompression {
    fn inflate(&self, src: &[u8]) -> Result<Vec<u8>> {
        Ok(src.to_vec())
    }

    fn deflate(&self, src: &[u8]) -> Result<Vec<u8>> {
        Ok(src.to_vec())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableFile {
    pub name: String,
    pub created: DateTime,
    pub modified: DateTime,
    pub attributes: i64,
    pub data: Vec<u8>,
}

impl TableFile {
    /// The payload inflated when the codec accepts it, raw otherwise.
    pub fn unpacked(&self, codec: &dyn Compression) -> Vec<u8> {
        codec
            .inflate(&self.data)
            .unwrap_or_else(|_| self.data.clone())
    }
}

#[derive(Debug, Default)]
pub struct TableFiles {
    /// Keyed by upper-cased name.
    files: BTreeMap<String, TableFile>,
}

/// Verifies that `table` has the catalog shape: six or seven fields bearing
/// the expected names in order.
pub fn check_catalog_shape(table: &Table) -> Result<()> {
    let fields = table.fields();
    if fields.len() < 6 {
        return Err(Error::schema_mismatch("catalog table has fewer than 6 fields")
            .with("table", table.name().to_string())
            .with("field_count", fields.len()));
    }
    if fields.len() > 7 {
        return Err(Error::schema_mismatch("catalog table has more than 7 fields")
            .with("table", table.name().to_string())
            .with("field_count", fields.len()));
    }
    for (i, field) in fields.iter().enumerate() {
        if !field.name.eq_ignore_ascii_case(CATALOG_FIELDS[i]) {
            return Err(Error::schema_mismatch("catalog field name out of place")
                .with("table", table.name().to_string())
                .with("field_index", i)
                .with("expected", CATALOG_FIELDS[i])
                .with("actual", field.name.clone()));
        }
    }
    Ok(())
}

impl TableFiles {
    /// Assembles the catalog view of `table`.
    pub fn open(table: &Table, pager: &mut Pager) -> Result<TableFiles> {
        check_catalog_shape(table)?;
        let has_partno = table.num_fields() == 7;
        let filename = table.fields()[0].clone();
        let creation = table.fields()[1].clone();
        let modified = table.fields()[2].clone();
        let attributes = table.fields()[3].clone();
        let datasize = table.fields()[4].clone();
        let binarydata = table.fields()[5].clone();
        let partno = table.fields().get(6).cloned();

        struct Piece {
            part: i64,
            bytes: Vec<u8>,
        }
        struct Assembly {
            file: TableFile,
            declared_size: i64,
            pieces: Vec<Piece>,
        }
        let mut assemblies: BTreeMap<String, Assembly> = BTreeMap::new();

        for phys in 0..table.phys_count() {
            let rec = table.get_record(pager, phys)?;
            if rec.is_deleted() {
                continue;
            }
            let name = rec
                .presentation(&filename)?
                .unwrap_or_default();
            if name.is_empty() {
                continue;
            }
            let part = match (&partno, has_partno) {
                (Some(field), true) => rec.value(field).map(read_int).unwrap_or(0),
                _ => 0,
            };
            let bytes = table.read_blob_field(pager, &rec, &binarydata)?;
            let declared_size = rec
                .presentation(&datasize)?
                .unwrap_or_default()
                .parse::<i64>()
                .map_err(|_| {
                    Error::corrupt_record("DATASIZE is not a decimal value")
                        .with("table", table.name().to_string())
                        .with("file", name.clone())
                })?;
            let key = name.to_uppercase();
            let entry = assemblies.entry(key).or_insert_with(|| Assembly {
                file: TableFile {
                    name: name.clone(),
                    created: rec
                        .value(&creation)
                        .and_then(|b| DateTime::decode(b).ok())
                        .unwrap_or_default(),
                    modified: rec
                        .value(&modified)
                        .and_then(|b| DateTime::decode(b).ok())
                        .unwrap_or_default(),
                    attributes: rec.value(&attributes).map(read_int).unwrap_or(0),
                    data: vec![],
                },
                declared_size,
                pieces: vec![],
            });
            entry.pieces.push(Piece { part, bytes });
        }

        let mut files = BTreeMap::new();
        for (key, assembly) in assemblies {
            let Assembly {
                mut file,
                declared_size,
                pieces,
            } = assembly;
            file.data = pieces
                .into_iter()
                .sorted_by_key(|p| p.part)
                .flat_map(|p| p.bytes)
                .collect();
            if file.data.len() as i64 != declared_size {
                return Err(
                    Error::corrupt_record("DATASIZE disagrees with the assembled bytes")
                        .with("file", file.name.clone())
                        .with("expected", declared_size)
                        .with("actual", file.data.len()),
                );
            }
            files.insert(key, file);
        }
        Ok(TableFiles { files })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Case-insensitive lookup.
    pub fn get(&self, name: &str) -> Option<&TableFile> {
        self.files.get(&name.to_uppercase())
    }

    pub fn files(&self) -> impl Iterator<Item = &TableFile> {
        self.files.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.files.values().map(|f| f.name.as_str())
    }
}
