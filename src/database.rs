//! The database: opens a container file, validates its header, loads the
//! root object and instantiates the tables it lists.
//!
//! Open sequence, in order: lock the file, parse the page-0 header, verify
//! the size arithmetic, stand up the pager and the free list, open the root
//! object, read the root record (inline for legacy formats, BLOB chain 1 for
//! wide), open one table per listed descriptor page, and classify the
//! database by the well-known tables present.

use std::collections::BTreeSet;
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};
use lazy_static::lazy_static;

use crate::blob;
use crate::catalog::{check_catalog_shape, TableFiles};
use crate::descr::SIG_TABDESCR;
use crate::device::{BlockDevice, OpenMode};
use crate::error::{hex_u32, Error, Result};
use crate::freelist::FreeList;
use crate::header::{ContainerHeader, DbVersion, HEADER_LEN};
use crate::messenger::{LogMessenger, Messenger, Severity};
use crate::object::{Object, SIG_OBJECT, SIG_WIDE_DATA, SIG_WIDE_FREE};
use crate::pager::{PageNum, Pager};
use crate::table::{Table, TemplatePat};

lazy_static! {
    /// Tables whose joint presence makes a database an information base.
    static ref INFOBASE_TABLES: Vec<&'static str> =
        vec!["CONFIG", "CONFIGSAVE", "PARAMS", "FILES", "DBSCHEMA"];
    /// Tables whose joint presence makes a database a configuration
    /// repository.
    static ref DEPOT_TABLES: Vec<&'static str> = vec![
        "DEPOT",
        "USERS",
        "OBJECTS",
        "VERSIONS",
        "LABELS",
        "HISTORY",
        "LASTESTVERSIONS",
        "EXTERNALS",
        "SELFREFS",
        "OUTREFS",
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbRole {
    InfoBase,
    Repository,
    Unknown,
}

/// Parsed payload of the root object: the locale string and the descriptor
/// page of every table.
#[derive(Debug, Clone, PartialEq)]
struct RootRecord {
    lang: String,
    blocks: Vec<PageNum>,
}

impl RootRecord {
    fn lang_width(version: DbVersion) -> usize {
        if version.is_8_0() {
            32
        } else {
            8
        }
    }

    fn parse(bytes: &[u8], version: DbVersion) -> Result<RootRecord> {
        if bytes.is_empty() {
            // A freshly initialized database has an empty root object.
            return Ok(RootRecord {
                lang: String::new(),
                blocks: vec![],
            });
        }
        let lang_width = Self::lang_width(version);
        if bytes.len() < lang_width + 4 {
            return Err(Error::corrupt_object("root record too short")
                .with("length", bytes.len()));
        }
        let lang_end = bytes[..lang_width]
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(lang_width);
        let lang = String::from_utf8_lossy(&bytes[..lang_end]).into_owned();
        let numblocks = LittleEndian::read_u32(&bytes[lang_width..lang_width + 4]) as usize;
        if bytes.len() < lang_width + 4 + numblocks * 4 {
            return Err(Error::corrupt_object("root record shorter than its table list")
                .with("tables", numblocks)
                .with("length", bytes.len()));
        }
        let blocks = (0..numblocks)
            .map(|i| {
                let off = lang_width + 4 + i * 4;
                LittleEndian::read_u32(&bytes[off..off + 4])
            })
            .collect();
        Ok(RootRecord { lang, blocks })
    }

    fn serialize(&self, version: DbVersion) -> Vec<u8> {
        let lang_width = Self::lang_width(version);
        let mut out = vec![0_u8; lang_width + 4 + self.blocks.len() * 4];
        let lang_bytes = self.lang.as_bytes();
        let n = lang_bytes.len().min(lang_width - 1);
        out[..n].copy_from_slice(&lang_bytes[..n]);
        LittleEndian::write_u32(
            &mut out[lang_width..lang_width + 4],
            self.blocks.len() as u32,
        );
        for (i, block) in self.blocks.iter().enumerate() {
            let off = lang_width + 4 + i * 4;
            LittleEndian::write_u32(&mut out[off..off + 4], *block);
        }
        out
    }
}

pub struct Database {
    pager: Pager,
    version: DbVersion,
    root: Object,
    root_record: RootRecord,
    tables: Vec<Table>,
    role: DbRole,
    messenger: Box<dyn Messenger>,
}

impl Database {
    /// Opens a database file. `monopoly` takes the exclusive write lock;
    /// otherwise the file is shared read-only. The 8.0.x formats open
    /// read-only regardless.
    pub fn open(path: &Path, monopoly: bool) -> Result<Database> {
        Self::open_with(path, monopoly, Box::new(LogMessenger))
    }

    pub fn open_with(
        path: &Path,
        monopoly: bool,
        messenger: Box<dyn Messenger>,
    ) -> Result<Database> {
        let mode = if monopoly {
            OpenMode::ReadWriteExclusive
        } else {
            OpenMode::ReadShared
        };
        let mut device = BlockDevice::open(path, mode)?;
        let mut header_bytes = [0_u8; HEADER_LEN];
        device.read(0, &mut header_bytes)?;
        let header = ContainerHeader::parse(&header_bytes)?;
        let version = header.version;
        let wide = version.is_wide();
        let readonly = !monopoly || version.is_8_0();

        let file_size = device.size()?;
        let page_count = (file_size / header.page_size as u64) as u32;
        if page_count as u64 * header.page_size as u64 != file_size {
            return Err(
                Error::corrupt_header("file size is not a whole number of pages")
                    .with("page_size", header.page_size)
                    .with("file_size", crate::error::hex_u64(file_size)),
            );
        }
        if page_count != header.length {
            return Err(
                Error::corrupt_header("page count in header disagrees with the file")
                    .with("header_length", header.length)
                    .with("file_pages", page_count),
            );
        }

        let mut pager = Pager::new(device, header.page_size, page_count, readonly);
        let free = FreeList::load(&mut pager, wide)?;
        pager.attach_free_list(free);

        let root = Object::open(&mut pager, 2, wide)?;
        let record_bytes = if root.is_empty() {
            // A freshly initialized database: no root record yet.
            vec![]
        } else if wide {
            blob::read_blob(&root, &mut pager, 1, None)?
        } else {
            root.read_all(&mut pager)?
        };
        let root_record = RootRecord::parse(&record_bytes, version)?;

        let mut tables = vec![];
        for (i, &block) in root_record.blocks.iter().enumerate() {
            match Table::open(&mut pager, wide, block) {
                Ok(table) if table.is_bad() => {
                    messenger.message(
                        "skipping bad table",
                        Severity::Warning,
                        &[
                            ("table".to_string(), table.name().to_string()),
                            ("descriptor_page".to_string(), hex_u32(block)),
                        ],
                    );
                }
                Ok(table) => tables.push(table),
                Err(e) => {
                    // Corruption is contained per table; the database keeps
                    // opening.
                    messenger.message(
                        "skipping unreadable table",
                        Severity::Warning,
                        &[
                            ("descriptor_page".to_string(), hex_u32(block)),
                            ("error".to_string(), e.to_string()),
                        ],
                    );
                }
            }
            if i % 10 == 0 {
                messenger.status(&format!("reading tables {}", i));
            }
        }
        messenger.status(&format!("reading tables {}", tables.len()));

        let role = classify(&tables)?;
        pager.garbage(true);
        Ok(Database {
            pager,
            version,
            root,
            root_record,
            tables,
            role,
            messenger,
        })
    }

    pub fn version(&self) -> DbVersion {
        self.version
    }

    pub fn locale(&self) -> &str {
        &self.root_record.lang
    }

    pub fn role(&self) -> DbRole {
        self.role
    }

    pub fn is_infobase(&self) -> bool {
        self.role == DbRole::InfoBase
    }

    pub fn is_repository(&self) -> bool {
        self.role == DbRole::Repository
    }

    pub fn is_readonly(&self) -> bool {
        self.pager.is_readonly()
    }

    pub fn num_tables(&self) -> usize {
        self.tables.len()
    }

    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    pub fn table_index(&self, name: &str) -> Option<usize> {
        self.tables
            .iter()
            .position(|t| t.name().eq_ignore_ascii_case(name))
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.table_index(name).map(|i| &self.tables[i])
    }

    /// Split borrow for callers that drive a table against the pager.
    pub fn table_and_pager(&mut self, index: usize) -> (&mut Table, &mut Pager) {
        (&mut self.tables[index], &mut self.pager)
    }

    pub fn pager_mut(&mut self) -> &mut Pager {
        &mut self.pager
    }

    pub fn free_page_count(&self) -> u32 {
        self.pager.free_list().map(|f| f.len()).unwrap_or(0)
    }

    /// The catalog view of a well-known file table.
    pub fn files_of(&mut self, name: &str) -> Result<TableFiles> {
        let index = self.table_index(name).ok_or_else(|| {
            Error::schema_mismatch("no such table").with("table", name.to_string())
        })?;
        TableFiles::open(&self.tables[index], &mut self.pager)
    }

    /// Verifies that the well-known file tables carry the expected shape.
    ///
    /// For an information base CONFIG and CONFIGSAVE must exist; every
    /// catalog-shaped well-known table present is checked field by field.
    pub fn test_stream_format(&self) -> Result<()> {
        if self.role == DbRole::InfoBase {
            for required in ["CONFIG", "CONFIGSAVE"] {
                if self.table(required).is_none() {
                    return Err(Error::schema_mismatch("well-known table is missing")
                        .with("table", required));
                }
            }
        }
        for name in ["CONFIG", "CONFIGSAVE", "PARAMS", "FILES", "CONFIGCAS", "CONFIGCASSAVE"] {
            if let Some(table) = self.table(name) {
                check_catalog_shape(table)?;
            }
        }
        Ok(())
    }

    /// Writes every dirty page back and syncs the device.
    pub fn flush(&mut self) -> Result<()> {
        self.pager.flush()
    }

    pub fn garbage(&mut self, aggressive: bool) {
        self.pager.garbage(aggressive)
    }

    // ------------------------------------------------------------------
    // Table lifecycle

    /// Imports a table from an export directory and links it into the root
    /// record.
    pub fn import_table(&mut self, dir: &Path) -> Result<usize> {
        let wide = self.version.is_wide();
        let table = Table::import(&mut self.pager, wide, dir)?;
        self.root_record.blocks.push(table.descr_page());
        self.write_root_record()?;
        self.tables.push(table);
        Ok(self.tables.len() - 1)
    }

    /// Deletes a table: every page of its four objects goes back to the free
    /// list and its descriptor leaves the root record.
    pub fn delete_table(&mut self, index: usize) -> Result<()> {
        if index >= self.tables.len() {
            return Err(Error::out_of_bounds("table index past the table count")
                .with("index", index)
                .with("count", self.tables.len()));
        }
        let pages = self.tables[index].owned_pages(&mut self.pager)?;
        let descr_page = self.tables[index].descr_page();
        for page in pages {
            if page <= 2 {
                return Err(Error::corrupt_object("table claims a reserved page")
                    .with("page", hex_u32(page)));
            }
            self.pager.release_page(page)?;
        }
        let table = self.tables.remove(index);
        self.messenger.message(
            "table deleted",
            Severity::Info,
            &[("table".to_string(), table.name().to_string())],
        );
        self.root_record.blocks.retain(|&b| b != descr_page);
        self.write_root_record()
    }

    fn write_root_record(&mut self) -> Result<()> {
        let bytes = self.root_record.serialize(self.version);
        if self.version.is_wide() {
            if self.root.is_empty() {
                let start = blob::write_blob(&mut self.root, &mut self.pager, &bytes)?;
                debug_assert_eq!(start, 1);
            } else {
                blob::overwrite_chain(&mut self.root, &mut self.pager, 1, &bytes)?;
            }
        } else {
            self.root.write(&mut self.pager, 0, &bytes)?;
            if self.root.len() > bytes.len() as u64 {
                self.root.resize(&mut self.pager, bytes.len() as u64)?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Recovery (strictly best-effort; per-page errors are swallowed)

    fn referenced_roots(&mut self) -> BTreeSet<PageNum> {
        let mut roots: BTreeSet<PageNum> = [1_u32, 2].into_iter().collect();
        for table in &self.tables {
            roots.insert(table.descr_page());
            roots.extend(table.data_page());
            roots.extend(table.blob_page());
            roots.extend(table.index_page());
        }
        roots
    }

    fn page_has_object_signature(&mut self, page: PageNum) -> bool {
        let wide = self.version.is_wide();
        match self.pager.get(page) {
            Ok(buf) => {
                if wide {
                    buf[0..2] == SIG_WIDE_DATA || buf[0..2] == SIG_WIDE_FREE
                } else {
                    &buf[0..8] == SIG_OBJECT
                }
            }
            Err(_) => false,
        }
    }

    /// Scans every page for an object-root signature and reports the ones no
    /// table or system object references.
    pub fn find_lost_objects(&mut self) -> Result<Vec<PageNum>> {
        let known = self.referenced_roots();
        let mut lost = vec![];
        for page in 1..self.pager.page_count() {
            if !self.page_has_object_signature(page) || known.contains(&page) {
                continue;
            }
            self.messenger.message(
                "lost object found",
                Severity::Info,
                &[("page".to_string(), hex_u32(page))],
            );
            lost.push(page);
        }
        self.messenger
            .message("lost object scan finished", Severity::Success, &[]);
        Ok(lost)
    }

    /// Saves every lost object's payload under `dir` as `block<N>`.
    pub fn find_and_save_lost_objects(&mut self, dir: &Path) -> Result<usize> {
        std::fs::create_dir_all(dir)?;
        let lost = self.find_lost_objects()?;
        let wide = self.version.is_wide();
        let mut saved = 0;
        for page in lost {
            let object = match Object::open(&mut self.pager, page, wide) {
                Ok(o) => o,
                Err(_) => continue,
            };
            if object
                .save_to(&mut self.pager, &dir.join(format!("block{}", page)))
                .is_ok()
            {
                saved += 1;
            }
        }
        Ok(saved)
    }

    /// Like [`find_lost_objects`], but lost objects whose payload starts
    /// with the descriptor signature are appended to the root record and
    /// opened as tables. Returns how many tables were recovered.
    ///
    /// [`find_lost_objects`]: Database::find_lost_objects
    pub fn find_and_create_lost_tables(&mut self) -> Result<usize> {
        let lost = self.find_lost_objects()?;
        let wide = self.version.is_wide();
        let mut recovered = 0;
        for page in lost {
            let looks_like_descr = (|| -> Result<bool> {
                let object = Object::open(&mut self.pager, page, wide)?;
                let head = if wide {
                    blob::read_blob(&object, &mut self.pager, 1, None)?
                } else {
                    if object.len() < 4 {
                        return Ok(false);
                    }
                    object.read(&mut self.pager, 0, 4)?
                };
                Ok(head.len() >= 4 && head[0..4] == SIG_TABDESCR)
            })()
            .unwrap_or(false);
            if !looks_like_descr {
                continue;
            }
            match Table::open(&mut self.pager, wide, page) {
                Ok(table) if !table.is_bad() => {
                    self.root_record.blocks.push(page);
                    self.messenger.message(
                        "lost table recovered",
                        Severity::Success,
                        &[
                            ("table".to_string(), table.name().to_string()),
                            ("page".to_string(), hex_u32(page)),
                        ],
                    );
                    self.tables.push(table);
                    recovered += 1;
                }
                _ => {}
            }
        }
        if recovered > 0 {
            self.write_root_record()?;
        }
        Ok(recovered)
    }

    /// Verifies a table's data-object allocation pages against the record
    /// template. Strictly read-only: problems are reported through the
    /// messenger, never written back.
    pub fn restore_data_allocation_table(&mut self, index: usize) -> Result<()> {
        let table = self
            .tables
            .get(index)
            .ok_or_else(|| Error::out_of_bounds("table index past the table count"))?;
        let data = table.data_object_ref().ok_or_else(|| {
            Error::unavailable("table has no data object").with("table", table.name().to_string())
        })?;
        let root_page = data.root_page();
        if root_page < 3 || root_page >= self.pager.page_count() {
            return Err(Error::corrupt_object("data object root out of range")
                .with("table", table.name().to_string())
                .with("page", hex_u32(root_page)));
        }
        let record_len = table.record_len() as u64;
        let len = data.len();
        if record_len == 0 || len % record_len != 0 {
            return Err(
                Error::corrupt_record("data length is not a multiple of the record length")
                    .with("table", table.name().to_string())
                    .with("data_length", len)
                    .with("record_length", record_len),
            );
        }
        let template = table.record_template();
        let name = table.name().to_string();
        let page_size = self.pager.page_size() as u64;
        let data_blocks = (len + page_size - 1) / page_size;

        // Collected first: testing borrows the pager mutably per page.
        let mut block_pages = vec![];
        for block in 0..data_blocks {
            let table_ref = &self.tables[index];
            let data = table_ref.data_object_ref().expect("checked above");
            block_pages.push(data.data_block_page(&mut self.pager, block));
        }
        for (block, page) in block_pages.into_iter().enumerate() {
            let global = block as u64 * page_size;
            let span = page_size.min(len - global) as usize;
            let ok = match page {
                Ok(page) => self.page_matches_template(page, global, span, record_len, &template),
                Err(_) => false,
            };
            if !ok {
                let mut candidates = 0_u32;
                for probe in 3..self.pager.page_count() {
                    if self.page_matches_template(probe, global, span, record_len, &template) {
                        candidates += 1;
                    }
                }
                self.messenger.message(
                    "data page does not match the record template",
                    Severity::Warning,
                    &[
                        ("table".to_string(), name.clone()),
                        ("data_block".to_string(), block.to_string()),
                        ("candidate_pages".to_string(), candidates.to_string()),
                    ],
                );
            }
        }
        self.messenger.message(
            "allocation table verification finished",
            Severity::Success,
            &[("table".to_string(), name)],
        );
        Ok(())
    }

    fn page_matches_template(
        &mut self,
        page: PageNum,
        global_offset: u64,
        span: usize,
        record_len: u64,
        template: &[TemplatePat],
    ) -> bool {
        let buf = match self.pager.get(page) {
            Ok(b) => b,
            Err(_) => return false,
        };
        for i in 0..span {
            let position = ((global_offset + i as u64) % record_len) as usize;
            if !template[position].matches(buf[i]) {
                return false;
            }
        }
        true
    }
}

fn classify(tables: &[Table]) -> Result<DbRole> {
    let present = |name: &str| tables.iter().any(|t| t.name().eq_ignore_ascii_case(name));
    if INFOBASE_TABLES.iter().any(|&n| present(n)) {
        for &name in INFOBASE_TABLES.iter() {
            if !present(name) {
                return Err(Error::schema_mismatch("information base table is missing")
                    .with("table", name));
            }
        }
        return Ok(DbRole::InfoBase);
    }
    if DEPOT_TABLES.iter().any(|&n| present(n)) {
        for &name in DEPOT_TABLES.iter() {
            if !present(name) {
                return Err(Error::schema_mismatch("repository table is missing")
                    .with("table", name));
            }
        }
        return Ok(DbRole::Repository);
    }
    Ok(DbRole::Unknown)
}

impl Drop for Database {
    fn drop(&mut self) {
        if !self.pager.is_readonly() {
            let _ = self.pager.flush();
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("version", &self.version)
            .field("tables", &self.tables.len())
            .field("role", &self.role)
            .finish()
    }
}
