//! Tables: a parsed descriptor plus three child objects (fixed-width records,
//! the BLOB heap, the index object), with record CRUD, an edit mode that
//! stages changes, and directory export/import.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};
use streaming_iterator::StreamingIterator;

use crate::blob;
use crate::descr::{self, TableDescr};
use crate::error::{Error, Result};
use crate::field::{Field, FieldType};
use crate::index::Index;
use crate::object::Object;
use crate::pager::{PageNum, Pager};
use crate::record::TableRecord;

/// Per-byte pattern of a valid record, derived from the field layout. Used
/// by the read-only allocation-table verifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplatePat {
    Any,
    /// The presence flag of a nullable field, or a boolean: 0 or 1.
    Flag,
    /// A packed-BCD byte: both nibbles decimal.
    Bcd,
}

impl TemplatePat {
    pub fn matches(&self, byte: u8) -> bool {
        match self {
            TemplatePat::Any => true,
            TemplatePat::Flag => byte <= 1,
            TemplatePat::Bcd => byte >> 4 <= 9 && byte & 0x0f <= 9,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Unchanged,
    Changed,
    Inserted,
    Deleted,
}

#[derive(Debug)]
struct ChangedRec {
    kind: ChangeKind,
    /// One flag per field.
    fields: Vec<bool>,
    rec: TableRecord,
    /// Staged payloads of blob-typed fields, keyed by field position.
    blobs: HashMap<usize, Vec<u8>>,
}

#[derive(Debug, Default)]
struct EditSet {
    changes: BTreeMap<u32, ChangedRec>,
    added: u32,
}

/// A live row produced by [`Table::cursor`].
#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    pub phys: u32,
    pub record: TableRecord,
}

#[derive(Debug)]
pub struct Table {
    descr: TableDescr,
    descr_object: Object,
    wide: bool,
    data: Option<Object>,
    blob: Option<Object>,
    index: Option<Object>,
    indexes: Vec<Index>,
    /// Physical numbers of live records, built lazily.
    records_index: Option<Vec<u32>>,
    edit: Option<EditSet>,
    bad: bool,
}

impl Table {
    /// Opens the table whose descriptor object roots at `descr_page`.
    ///
    /// A malformed or missing child object does not fail the call; it marks
    /// the table bad, and the database skips bad tables.
    pub fn open(pager: &mut Pager, wide: bool, descr_page: PageNum) -> Result<Table> {
        let descr_object = Object::open(pager, descr_page, wide)?;
        let payload = if wide {
            blob::read_blob(&descr_object, pager, 1, None)?
        } else {
            descr_object.read_all(pager)?
        };
        let text = descr::decode_payload(&payload, wide)?;
        let descr = TableDescr::parse(&text)?;
        Self::with_descr(pager, wide, descr, descr_object)
    }

    fn with_descr(
        pager: &mut Pager,
        wide: bool,
        descr: TableDescr,
        descr_object: Object,
    ) -> Result<Table> {
        let mut bad = false;
        let child_pages = [descr.data_page, descr.blob_page, descr.index_page];
        // The three child roots must be distinct, nonzero and valid objects.
        if child_pages.iter().any(|&p| p == 0)
            || child_pages[0] == child_pages[1]
            || child_pages[0] == child_pages[2]
            || child_pages[1] == child_pages[2]
        {
            bad = true;
        }
        let mut open_child = |page: PageNum| -> Option<Object> {
            if bad {
                return None;
            }
            Object::open(pager, page, wide).ok()
        };
        let data = open_child(child_pages[0]);
        let blob = open_child(child_pages[1]);
        let index = open_child(child_pages[2]);
        if data.is_none() || blob.is_none() || index.is_none() {
            bad = true;
        }
        let mut indexes = vec![];
        for idx in &descr.indexes {
            let refs: Vec<(String, i64)> = idx
                .fields
                .iter()
                .map(|f| (f.name.clone(), f.ordering))
                .collect();
            indexes.push(Index::new(idx.name.clone(), idx.primary, &refs, &descr.fields)?);
        }
        Ok(Table {
            descr,
            descr_object,
            wide,
            data,
            blob,
            index,
            indexes,
            records_index: None,
            edit: None,
            bad,
        })
    }

    pub fn name(&self) -> &str {
        &self.descr.name
    }

    pub fn is_bad(&self) -> bool {
        self.bad
    }

    pub fn descr(&self) -> &TableDescr {
        &self.descr
    }

    pub fn descr_page(&self) -> PageNum {
        self.descr_object.root_page()
    }

    pub fn record_len(&self) -> usize {
        self.descr.record_len
    }

    pub fn num_fields(&self) -> usize {
        self.descr.fields.len()
    }

    pub fn fields(&self) -> &[Field] {
        &self.descr.fields
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.descr.field(name)
    }

    pub fn num_indexes(&self) -> usize {
        self.indexes.len()
    }

    pub fn index(&self, name: &str) -> Option<&Index> {
        self.indexes
            .iter()
            .find(|i| i.name().eq_ignore_ascii_case(name))
    }

    pub fn recordlock(&self) -> bool {
        self.descr.recordlock
    }

    fn data_object(&self) -> Result<&Object> {
        self.data.as_ref().ok_or_else(|| {
            Error::unavailable("table has no data object").with("table", self.name().to_string())
        })
    }

    fn blob_object(&self) -> Result<&Object> {
        self.blob.as_ref().ok_or_else(|| {
            Error::unavailable("table has no blob object").with("table", self.name().to_string())
        })
    }

    pub fn data_page(&self) -> Option<PageNum> {
        self.data.as_ref().map(|o| o.root_page())
    }

    pub fn blob_page(&self) -> Option<PageNum> {
        self.blob.as_ref().map(|o| o.root_page())
    }

    pub fn index_page(&self) -> Option<PageNum> {
        self.index.as_ref().map(|o| o.root_page())
    }

    pub(crate) fn data_object_ref(&self) -> Option<&Object> {
        self.data.as_ref()
    }

    /// All records, tombstoned included.
    pub fn phys_count(&self) -> u32 {
        match &self.data {
            Some(data) if self.descr.record_len > 0 => {
                (data.len() / self.descr.record_len as u64) as u32
            }
            _ => 0,
        }
    }

    /// Live records only; builds the record index on first use.
    pub fn log_count(&mut self, pager: &mut Pager) -> Result<u32> {
        Ok(self.live_records(pager)?.len() as u32)
    }

    /// Physical numbers of the live records, in physical order.
    pub fn live_records(&mut self, pager: &mut Pager) -> Result<&[u32]> {
        if self.records_index.is_none() {
            let mut live = vec![];
            for phys in 0..self.phys_count() {
                if self.get_record(pager, phys)?.tombstone() != 0 {
                    live.push(phys);
                }
            }
            self.records_index = Some(live);
        }
        Ok(self.records_index.as_deref().expect("just built"))
    }

    pub fn get_record(&self, pager: &mut Pager, phys: u32) -> Result<TableRecord> {
        if phys >= self.phys_count() {
            return Err(Error::out_of_bounds("record number past the table")
                .with("table", self.name().to_string())
                .with("record", phys)
                .with("count", self.phys_count()));
        }
        let len = self.descr.record_len as u64;
        let bytes = self.data_object()?.read(pager, phys as u64 * len, len)?;
        Ok(TableRecord::from_bytes(bytes))
    }

    fn write_record(&mut self, pager: &mut Pager, phys: u32, rec: &TableRecord) -> Result<()> {
        let len = self.descr.record_len as u64;
        let data = self.data.as_mut().ok_or_else(|| {
            Error::unavailable("table has no data object").with("table", self.descr.name.clone())
        })?;
        data.write(pager, phys as u64 * len, rec.as_bytes())
    }

    fn check_record_len(&self, rec: &TableRecord) -> Result<()> {
        if rec.len() != self.descr.record_len {
            return Err(
                Error::corrupt_record("record size disagrees with the table")
                    .with("table", self.name().to_string())
                    .with("expected", self.descr.record_len)
                    .with("actual", rec.len()),
            );
        }
        Ok(())
    }

    fn mark_mutated(&mut self) {
        self.records_index = None;
        for index in &mut self.indexes {
            index.invalidate();
        }
    }

    /// Appends a live record at the physical end and returns its number.
    pub fn insert_record(&mut self, pager: &mut Pager, rec: &TableRecord) -> Result<u32> {
        self.check_record_len(rec)?;
        let mut rec = rec.clone();
        rec.set_tombstone(true);
        let phys = self.phys_count();
        self.write_record(pager, phys, &rec)?;
        self.mark_mutated();
        Ok(phys)
    }

    /// Clears the tombstone byte and releases the record's BLOB chains.
    pub fn delete_record(&mut self, pager: &mut Pager, phys: u32) -> Result<()> {
        let mut rec = self.get_record(pager, phys)?;
        if rec.is_deleted() {
            return Ok(());
        }
        for i in 0..self.descr.fields.len() {
            let field = self.descr.fields[i].clone();
            if field.ftype.is_blob() {
                let (start, _) = rec.blob_locator(&field);
                self.free_blob(pager, start)?;
                rec.set_blob_locator(&field, 0, 0)?;
            }
        }
        rec.set_tombstone(false);
        self.write_record(pager, phys, &rec)?;
        self.mark_mutated();
        Ok(())
    }

    /// Writes only the fields flagged in `changed`. Blob-typed changed fields
    /// must already carry their new locator in `rec`; the old chains are
    /// released here.
    pub fn update_record(
        &mut self,
        pager: &mut Pager,
        phys: u32,
        rec: &TableRecord,
        changed: &[bool],
    ) -> Result<()> {
        self.check_record_len(rec)?;
        let old = self.get_record(pager, phys)?;
        let mut merged = old.clone();
        for (i, flag) in changed.iter().enumerate().take(self.descr.fields.len()) {
            if !flag {
                continue;
            }
            let field = self.descr.fields[i].clone();
            if field.ftype.is_blob() {
                let (old_start, _) = old.blob_locator(&field);
                let (new_start, _) = rec.blob_locator(&field);
                if old_start != 0 && old_start != new_start {
                    self.free_blob(pager, old_start)?;
                }
            }
            let range = field.offset..field.offset + field.total_width();
            let mut bytes = merged.into_bytes();
            bytes[range.clone()].copy_from_slice(&rec.as_bytes()[range]);
            merged = TableRecord::from_bytes(bytes);
        }
        self.write_record(pager, phys, &merged)?;
        self.mark_mutated();
        Ok(())
    }

    /// Reads the BLOB chain behind a blob-typed field of `rec`.
    pub fn read_blob_field(
        &self,
        pager: &mut Pager,
        rec: &TableRecord,
        field: &Field,
    ) -> Result<Vec<u8>> {
        let (start, length) = rec.blob_locator(field);
        blob::read_blob(self.blob_object()?, pager, start, Some(length))
    }

    /// Writes `payload` as a fresh chain and stores its locator into `rec`.
    pub fn write_blob_field(
        &mut self,
        pager: &mut Pager,
        rec: &mut TableRecord,
        field: &Field,
        payload: &[u8],
    ) -> Result<()> {
        let heap = self.blob.as_mut().ok_or_else(|| {
            Error::unavailable("table has no blob object").with("table", self.descr.name.clone())
        })?;
        let start = blob::write_blob(heap, pager, payload)?;
        rec.set_blob_locator(field, start, payload.len() as u32)
    }

    pub fn read_blob(&self, pager: &mut Pager, start: u32, length: u32) -> Result<Vec<u8>> {
        blob::read_blob(self.blob_object()?, pager, start, Some(length))
    }

    fn free_blob(&mut self, pager: &mut Pager, start: u32) -> Result<()> {
        let heap = self.blob.as_mut().ok_or_else(|| {
            Error::unavailable("table has no blob object").with("table", self.descr.name.clone())
        })?;
        blob::free_blob(heap, pager, start)
    }

    /// A streaming cursor over the live records.
    pub fn cursor<'t, 'p>(&'t self, pager: &'p mut Pager) -> RecordCursor<'t, 'p> {
        RecordCursor {
            table: self,
            pager,
            next_phys: 0,
            current: None,
            error: None,
        }
    }

    /// Rebuilds the oracle behind the named index and returns it.
    pub fn build_index(&mut self, pager: &mut Pager, name: &str) -> Result<&Index> {
        let position = self
            .indexes
            .iter()
            .position(|i| i.name().eq_ignore_ascii_case(name))
            .ok_or_else(|| {
                Error::unavailable("no such index")
                    .with("table", self.name().to_string())
                    .with("index", name.to_string())
            })?;
        if !self.indexes[position].is_built() {
            let mut rows = vec![];
            for phys in 0..self.phys_count() {
                let rec = self.get_record(pager, phys)?;
                if !rec.is_deleted() {
                    rows.push((phys, rec));
                }
            }
            let fields = self.descr.fields.clone();
            self.indexes[position].rebuild(&fields, rows.iter().map(|(p, r)| (*p, r)));
        }
        Ok(&self.indexes[position])
    }

    /// Looks up the physical record numbers matching `probe`'s key fields
    /// through the named index.
    pub fn find_by_index(
        &mut self,
        pager: &mut Pager,
        name: &str,
        probe: &TableRecord,
    ) -> Result<Vec<u32>> {
        self.build_index(pager, name)?;
        let index = self.index(name).expect("build_index checked the name");
        let key = index.key_for(&self.descr.fields, probe);
        Ok(index.lookup(&key)?.to_vec())
    }

    // ------------------------------------------------------------------
    // Edit mode

    pub fn is_editing(&self) -> bool {
        self.edit.is_some()
    }

    pub fn begin_edit(&mut self) {
        self.edit = Some(EditSet::default());
    }

    /// Discards all staged changes.
    pub fn cancel_edit(&mut self) {
        self.edit = None;
    }

    fn edit_set(&mut self) -> Result<&mut EditSet> {
        self.edit.as_mut().ok_or_else(|| {
            Error::unavailable("table is not in edit mode").with("table", self.descr.name.clone())
        })
    }

    pub fn edit_kind(&self, phys: u32) -> ChangeKind {
        self.edit
            .as_ref()
            .and_then(|e| e.changes.get(&phys))
            .map(|c| c.kind)
            .unwrap_or(ChangeKind::Unchanged)
    }

    /// Stages a fresh row; its provisional number continues the physical
    /// numbering.
    pub fn new_edit_record(&mut self) -> Result<u32> {
        let record_len = self.descr.record_len;
        let num_fields = self.descr.fields.len();
        let phys = self.phys_count();
        let edit = self.edit_set()?;
        let phys = phys + edit.added;
        edit.added += 1;
        edit.changes.insert(
            phys,
            ChangedRec {
                kind: ChangeKind::Inserted,
                fields: vec![false; num_fields],
                rec: TableRecord::new_live(record_len),
                blobs: HashMap::new(),
            },
        );
        Ok(phys)
    }

    /// Stages a deletion of an existing row.
    pub fn mark_edit_deleted(&mut self, phys: u32) -> Result<()> {
        let count = self.phys_count();
        let num_fields = self.descr.fields.len();
        let record_len = self.descr.record_len;
        let edit = self.edit_set()?;
        if phys >= count && !edit.changes.contains_key(&phys) {
            return Err(Error::out_of_bounds("record number past the table").with("record", phys));
        }
        let entry = edit.changes.entry(phys).or_insert_with(|| ChangedRec {
            kind: ChangeKind::Unchanged,
            fields: vec![false; num_fields],
            rec: TableRecord::new_live(record_len),
            blobs: HashMap::new(),
        });
        entry.kind = if entry.kind == ChangeKind::Inserted {
            // Inserting then deleting within one edit session cancels out.
            ChangeKind::Unchanged
        } else {
            ChangeKind::Deleted
        };
        Ok(())
    }

    /// Stages one field value. `None` stages SQL-style null; for blob-typed
    /// fields the bytes are the payload, stored on commit.
    pub fn set_edit_value(
        &mut self,
        pager: &mut Pager,
        phys: u32,
        field_index: usize,
        value: Option<&[u8]>,
    ) -> Result<()> {
        let field = self
            .descr
            .fields
            .get(field_index)
            .cloned()
            .ok_or_else(|| Error::out_of_bounds("field index past the field count"))?;
        let base = if phys < self.phys_count() {
            Some(self.get_record(pager, phys)?)
        } else {
            None
        };
        let num_fields = self.descr.fields.len();
        let record_len = self.descr.record_len;
        let edit = self.edit_set()?;
        let entry = edit.changes.entry(phys).or_insert_with(|| ChangedRec {
            kind: ChangeKind::Changed,
            fields: vec![false; num_fields],
            rec: match base {
                Some(rec) => rec,
                None => TableRecord::new_live(record_len),
            },
            blobs: HashMap::new(),
        });
        if entry.kind == ChangeKind::Unchanged {
            entry.kind = ChangeKind::Changed;
        }
        entry.fields[field_index] = true;
        match value {
            None => {
                entry.blobs.remove(&field_index);
                entry.rec.set_null(&field)?;
            }
            Some(bytes) if field.ftype.is_blob() => {
                entry.blobs.insert(field_index, bytes.to_vec());
            }
            Some(bytes) => entry.rec.set_value(&field, bytes)?,
        }
        Ok(())
    }

    /// Applies the staged changes: deletions, then updates, then inserts.
    pub fn commit_edit(&mut self, pager: &mut Pager) -> Result<()> {
        let edit = match self.edit.take() {
            Some(e) => e,
            None => return Ok(()),
        };
        for (&phys, change) in &edit.changes {
            if change.kind == ChangeKind::Deleted {
                self.delete_record(pager, phys)?;
            }
        }
        for (&phys, change) in &edit.changes {
            if change.kind != ChangeKind::Changed {
                continue;
            }
            let mut rec = change.rec.clone();
            for (&field_index, payload) in &change.blobs {
                let field = self.descr.fields[field_index].clone();
                self.write_blob_field(pager, &mut rec, &field, payload)?;
            }
            self.update_record(pager, phys, &rec, &change.fields)?;
        }
        for change in edit.changes.values() {
            if change.kind != ChangeKind::Inserted {
                continue;
            }
            let mut rec = change.rec.clone();
            for (&field_index, payload) in &change.blobs {
                let field = self.descr.fields[field_index].clone();
                self.write_blob_field(pager, &mut rec, &field, payload)?;
            }
            self.insert_record(pager, &rec)?;
        }
        self.mark_mutated();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Export / import

    /// Writes the table as four payload streams plus a `root` header into
    /// `dir`.
    pub fn export(&self, pager: &mut Pager, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        let mut root = [0_u8; 36];
        root[0] = u8::from(self.data.is_some());
        root[1] = u8::from(self.blob.is_some());
        root[2] = u8::from(self.index.is_some());
        root[3] = 1; // the descriptor always exists
        let mut write_version = |slot: usize, version: (u32, u32), root: &mut [u8]| {
            LittleEndian::write_u32(&mut root[4 + slot * 8..8 + slot * 8], version.0);
            LittleEndian::write_u32(&mut root[8 + slot * 8..12 + slot * 8], version.1);
        };
        if let Some(data) = &self.data {
            write_version(0, data.committed_version(), &mut root);
            std::fs::write(dir.join("data"), data.read_all(pager)?)?;
        }
        if let Some(heap) = &self.blob {
            write_version(1, heap.committed_version(), &mut root);
            std::fs::write(dir.join("blob"), heap.read_all(pager)?)?;
        }
        if let Some(index) = &self.index {
            write_version(2, index.committed_version(), &mut root);
            std::fs::write(dir.join("index"), index.read_all(pager)?)?;
        }
        write_version(3, self.descr_object.committed_version(), &mut root);
        let descr_payload = if self.wide {
            blob::read_blob(&self.descr_object, pager, 1, None)?
        } else {
            self.descr_object.read_all(pager)?
        };
        std::fs::write(dir.join("descr"), descr_payload)?;
        std::fs::write(dir.join("root"), root)?;
        Ok(())
    }

    /// Builds a new table from an exported directory: fresh child objects,
    /// a descriptor re-pointed at them, payloads copied in. The caller links
    /// the returned table into the root record.
    pub fn import(pager: &mut Pager, wide: bool, dir: &Path) -> Result<Table> {
        let root = std::fs::read(dir.join("root"))?;
        if root.len() < 36 {
            return Err(Error::corrupt_record("export root header too short")
                .with("length", root.len()));
        }
        let version_at = |slot: usize| {
            (
                LittleEndian::read_u32(&root[4 + slot * 8..8 + slot * 8]),
                LittleEndian::read_u32(&root[8 + slot * 8..12 + slot * 8]),
            )
        };
        let mut load_stream = |name: &str, present: bool| -> Result<Option<Vec<u8>>> {
            if !present {
                return Ok(None);
            }
            Ok(Some(std::fs::read(dir.join(name))?))
        };
        let data_bytes = load_stream("data", root[0] != 0)?;
        let blob_bytes = load_stream("blob", root[1] != 0)?;
        let index_bytes = load_stream("index", root[2] != 0)?;
        let descr_bytes = std::fs::read(dir.join("descr"))?;

        let mut make_object = |bytes: Option<&Vec<u8>>, version: (u32, u32)| -> Result<Object> {
            let mut object = Object::create(pager, wide)?;
            if let Some(bytes) = bytes {
                if !bytes.is_empty() {
                    object.write(pager, 0, bytes)?;
                }
            }
            object.set_committed_version(pager, version)?;
            Ok(object)
        };
        let data = make_object(data_bytes.as_ref(), version_at(0))?;
        let heap = make_object(blob_bytes.as_ref(), version_at(1))?;
        let index = make_object(index_bytes.as_ref(), version_at(2))?;

        let text = descr::decode_payload(&descr_bytes, wide)?;
        let composed = descr::compose_with_files(
            &text,
            data.root_page(),
            heap.root_page(),
            index.root_page(),
        )?;
        let payload = descr::encode_payload(&composed, wide);
        let mut descr_object = Object::create(pager, wide)?;
        if wide {
            blob::write_blob(&mut descr_object, pager, &payload)?;
        } else {
            descr_object.write(pager, 0, &payload)?;
        }
        descr_object.set_committed_version(pager, version_at(3))?;

        let descr = TableDescr::parse(&composed)?;
        Table::with_descr(pager, wide, descr, descr_object)
    }

    // ------------------------------------------------------------------
    // Recovery support

    /// Per-byte validity pattern of one record.
    pub fn record_template(&self) -> Vec<TemplatePat> {
        let mut template = vec![TemplatePat::Any; self.descr.record_len];
        for field in &self.descr.fields {
            let mut offset = field.offset;
            if field.null_exists {
                template[offset] = TemplatePat::Flag;
                offset += 1;
            }
            match field.ftype {
                FieldType::Bool => template[offset] = TemplatePat::Flag,
                FieldType::DateTime => {
                    for pat in template.iter_mut().skip(offset).take(7) {
                        *pat = TemplatePat::Bcd;
                    }
                }
                _ => {}
            }
        }
        template
    }

    /// Every page owned by the three child objects and the descriptor
    /// object, roots included. Used by deletion and the lost-page scans.
    pub fn owned_pages(&self, pager: &mut Pager) -> Result<Vec<PageNum>> {
        let mut pages = vec![self.descr_object.root_page()];
        pages.extend(self.descr_object.owned_pages(pager)?);
        for object in [&self.data, &self.blob, &self.index].into_iter().flatten() {
            pages.push(object.root_page());
            pages.extend(object.owned_pages(pager)?);
        }
        Ok(pages)
    }

    /// Default file name for exports of one record, keyed by the first text
    /// field when there is one.
    pub fn file_name_for_record(&self, rec: &TableRecord, phys: u32) -> String {
        for field in &self.descr.fields {
            if matches!(field.ftype, FieldType::Chars | FieldType::VarChars) {
                if let Ok(Some(name)) = rec.presentation(field) {
                    if !name.is_empty() {
                        return name;
                    }
                }
            }
        }
        format!("{}_{}", self.descr.name, phys)
    }

    pub fn file_name_for_field(&self, rec: &TableRecord, phys: u32, field: &Field) -> String {
        format!("{}.{}", self.file_name_for_record(rec, phys), field.name)
    }
}

/// Streaming iterator over live records; one buffer, no per-row allocation
/// churn for callers that only look.
pub struct RecordCursor<'t, 'p> {
    table: &'t Table,
    pager: &'p mut Pager,
    next_phys: u32,
    current: Option<TableRow>,
    error: Option<Error>,
}

impl<'t, 'p> RecordCursor<'t, 'p> {
    /// The error that stopped the cursor, if any.
    pub fn take_error(&mut self) -> Option<Error> {
        self.error.take()
    }
}

impl<'t, 'p> StreamingIterator for RecordCursor<'t, 'p> {
    type Item = TableRow;

    fn advance(&mut self) {
        self.current = None;
        if self.error.is_some() {
            return;
        }
        while self.next_phys < self.table.phys_count() {
            let phys = self.next_phys;
            self.next_phys += 1;
            match self.table.get_record(self.pager, phys) {
                Ok(record) if record.is_deleted() => continue,
                Ok(record) => {
                    self.current = Some(TableRow { phys, record });
                    return;
                }
                Err(e) => {
                    self.error = Some(e);
                    return;
                }
            }
        }
    }

    fn get(&self) -> Option<&Self::Item> {
        self.current.as_ref()
    }
}
