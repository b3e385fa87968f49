//! Table descriptors: the structured text document that names a table, its
//! fields and indexes, and carries the page numbers of the three child
//! objects in its `{"Files",data,blob,index}` clause.

use crate::error::{Error, Result};
use crate::field::{assign_offsets, Field, FieldType};
use crate::parser::{self, Node};
use crate::text::{self, Encoding};

/// Four-byte signature in front of the descriptor text payload.
pub const SIG_TABDESCR: [u8; 4] = [0xfd, 0xfe, 0xff, 0xff];

#[derive(Debug, Clone, PartialEq)]
pub struct IndexFieldDescr {
    pub name: String,
    pub ordering: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexDescr {
    pub name: String,
    pub primary: bool,
    pub fields: Vec<IndexFieldDescr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableDescr {
    pub name: String,
    pub fields: Vec<Field>,
    pub indexes: Vec<IndexDescr>,
    pub recordlock: bool,
    pub data_page: u32,
    pub blob_page: u32,
    pub index_page: u32,
    pub record_len: usize,
    /// The source text, kept verbatim for export and re-composition.
    pub text: String,
}

impl TableDescr {
    pub fn parse(text: &str) -> Result<TableDescr> {
        let tree = parser::parse(text)?;
        let items = tree.items()?;
        if items.is_empty() {
            return Err(Error::corrupt_record("descriptor list is empty"));
        }
        let name = items[0].text()?.to_string();
        let mut fields = vec![];
        let mut indexes = vec![];
        let mut recordlock = false;
        let mut files: Option<(u32, u32, u32)> = None;
        for clause in &items[1..] {
            let clause_items = match clause.as_list() {
                Some(v) if !v.is_empty() => v,
                _ => continue,
            };
            let tag = match clause_items[0].as_text() {
                Some(t) => t.as_str(),
                None => continue,
            };
            match tag {
                "Fields" => {
                    for entry in &clause_items[1..] {
                        fields.push(parse_field(entry)?);
                    }
                }
                "Indexes" => {
                    for entry in &clause_items[1..] {
                        indexes.push(parse_index(entry)?);
                    }
                }
                "Recordlock" => {
                    recordlock = match &clause_items[1] {
                        Node::Text(s) => s != "0",
                        Node::Number(n) => *n != 0,
                        _ => false,
                    };
                }
                "Files" => {
                    if clause_items.len() != 4 {
                        return Err(Error::corrupt_record("Files clause needs three pages")
                            .with("entries", clause_items.len() - 1));
                    }
                    files = Some((
                        clause_items[1].number()? as u32,
                        clause_items[2].number()? as u32,
                        clause_items[3].number()? as u32,
                    ));
                }
                _ => {}
            }
        }
        let (data_page, blob_page, index_page) = files.ok_or_else(|| {
            Error::corrupt_record("descriptor has no Files clause").with("table", name.clone())
        })?;
        let record_len = assign_offsets(&mut fields);
        Ok(TableDescr {
            name,
            fields,
            indexes,
            recordlock,
            data_page,
            blob_page,
            index_page,
            record_len,
            text: text.to_string(),
        })
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name.eq_ignore_ascii_case(name))
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|f| f.name.eq_ignore_ascii_case(name))
    }
}

fn parse_field(entry: &Node) -> Result<Field> {
    let items = entry.items()?;
    if items.len() < 6 {
        return Err(Error::corrupt_record("field clause too short").with("entries", items.len()));
    }
    let name = items[0].text()?.to_string();
    let ftype = FieldType::from_tag(items[1].text()?)?;
    let null_exists = items[2].number()? != 0;
    let length = items[3].number()? as u16;
    let precision = items[4].number()? as u16;
    let case_sensitive = items[5].text()? != "CI";
    if ftype == FieldType::Number && !(1..=8).contains(&length) {
        return Err(Error::corrupt_record("numeric field width out of range")
            .with("field", name)
            .with("length", length));
    }
    Ok(Field {
        name,
        ftype,
        null_exists,
        length,
        precision,
        case_sensitive,
        offset: 0,
    })
}

fn parse_index(entry: &Node) -> Result<IndexDescr> {
    let items = entry.items()?;
    if items.len() < 2 {
        return Err(Error::corrupt_record("index clause too short"));
    }
    let name = items[0].text()?.to_string();
    let primary = items[1].number()? != 0;
    let mut fields = vec![];
    for field in &items[2..] {
        let parts = field.items()?;
        if parts.is_empty() {
            continue;
        }
        fields.push(IndexFieldDescr {
            name: parts[0].text()?.to_string(),
            ordering: parts.get(1).and_then(|n| n.as_number()).copied().unwrap_or(0),
        });
    }
    Ok(IndexDescr {
        name,
        primary,
        fields,
    })
}

/// Rewrites the `{"Files",…}` clause of a descriptor text with fresh page
/// numbers, preserving everything before it.
pub fn compose_with_files(descr_text: &str, data: u32, blob: u32, index: u32) -> Result<String> {
    let pos = descr_text
        .find("{\"Files\",")
        .ok_or_else(|| Error::corrupt_record("descriptor has no Files clause"))?;
    let mut out = descr_text[..pos].to_string();
    out.push_str(&format!("{{\"Files\",{},{},{}}}\n}}", data, blob, index));
    Ok(out)
}

/// Decodes a descriptor payload: optional `FD FE FF FF` preamble, then
/// UTF-16LE text for legacy formats or UTF-8 for wide.
pub fn decode_payload(bytes: &[u8], wide: bool) -> Result<String> {
    let body = match bytes.strip_prefix(&SIG_TABDESCR) {
        Some(rest) => rest,
        None => bytes,
    };
    let fallback = if wide {
        Encoding::Utf8
    } else {
        Encoding::Utf16Le
    };
    text::decode(body, fallback)
}

pub fn encode_payload(descr_text: &str, wide: bool) -> Vec<u8> {
    let encoding = if wide {
        Encoding::Utf8
    } else {
        Encoding::Utf16Le
    };
    let mut out = SIG_TABDESCR.to_vec();
    out.extend(text::encode(descr_text, encoding));
    out
}
