//! End-to-end scenarios over fabricated database files.
//!
//! Every test file is built byte-by-byte through the public API (there are
//! no binary fixtures), then opened again through `Database` like any
//! caller would.

use byteorder::{ByteOrder, LittleEndian};
use tempfile::NamedTempFile;

use onecd::blob;
use onecd::descr;
use onecd::device::{BlockDevice, OpenMode};
use onecd::error::Error;
use onecd::freelist::FreeList;
use onecd::header::{ContainerHeader, DbVersion};
use onecd::object::{Object, SIG_OBJECT};
use onecd::pager::Pager;
use onecd::record::TableRecord;
use onecd::table::Table;
use onecd::{Database, DbRole};

/// An empty legacy image: container header, free-object root on page 1,
/// root object on page 2, zero pages up to `pages`.
fn empty_image(pages: u32) -> Vec<u8> {
    let mut image = vec![0_u8; pages as usize * 4096];
    ContainerHeader {
        version: DbVersion::V8_2_14_0,
        length: pages,
        page_size: 4096,
    }
    .write(&mut image);
    image[4096..4104].copy_from_slice(SIG_OBJECT);
    image[8192..8200].copy_from_slice(SIG_OBJECT);
    image
}

fn image_file(image: &[u8]) -> NamedTempFile {
    let file = NamedTempFile::new().unwrap();
    std::fs::write(file.path(), image).unwrap();
    file
}

/// A writable low-level pager over the file, free list attached.
fn open_pager(file: &NamedTempFile) -> Pager {
    let device = BlockDevice::open(file.path(), OpenMode::ReadWriteExclusive).unwrap();
    let pages = (device.size().unwrap() / 4096) as u32;
    let mut pager = Pager::new(device, 4096, pages, false);
    let free = FreeList::load(&mut pager, false).unwrap();
    pager.attach_free_list(free);
    pager
}

/// Lays a table down on disk and returns its descriptor page.
fn build_table(pager: &mut Pager, name: &str, fields_clause: &str) -> u32 {
    let data = Object::create(pager, false).unwrap();
    let heap = Object::create(pager, false).unwrap();
    let index = Object::create(pager, false).unwrap();
    let text = format!(
        "{{\"{}\",0,\n{{\"Fields\",\n{}\n}},\n{{\"Indexes\"}},\n{{\"Recordlock\",\"0\"}},\n{{\"Files\",{},{},{}}}\n}}",
        name,
        fields_clause,
        data.root_page(),
        heap.root_page(),
        index.root_page()
    );
    let payload = descr::encode_payload(&text, false);
    let mut descr_object = Object::create(pager, false).unwrap();
    descr_object.write(pager, 0, &payload).unwrap();
    descr_object.root_page()
}

const CATALOG_FIELDS: &str = "{\"FILENAME\",\"NVC\",0,64,0,\"CI\"},\n{\"CREATION\",\"DT\",0,0,0,\"CS\"},\n{\"MODIFIED\",\"DT\",0,0,0,\"CS\"},\n{\"ATTRIBUTES\",\"N\",0,4,0,\"CS\"},\n{\"DATASIZE\",\"N\",0,8,0,\"CS\"},\n{\"BINARYDATA\",\"I\",0,0,0,\"CS\"}";

fn build_catalog_table(pager: &mut Pager, name: &str) -> u32 {
    build_table(pager, name, CATALOG_FIELDS)
}

/// Writes the root record (8-byte locale, count, descriptor pages) into the
/// root object on page 2.
fn write_root_record(pager: &mut Pager, blocks: &[u32]) {
    let mut bytes = vec![0_u8; 8 + 4 + blocks.len() * 4];
    LittleEndian::write_u32(&mut bytes[8..12], blocks.len() as u32);
    for (i, block) in blocks.iter().enumerate() {
        LittleEndian::write_u32(&mut bytes[12 + i * 4..16 + i * 4], *block);
    }
    let mut root = Object::open(pager, 2, false).unwrap();
    root.write(pager, 0, &bytes).unwrap();
}

// ---------------------------------------------------------------------
// S1: an empty 16-page 8.2.14.0 file.

#[test]
fn test_open_empty_database() {
    let file = image_file(&empty_image(16));
    let db = Database::open(file.path(), false).unwrap();
    assert_eq!(db.version(), DbVersion::V8_2_14_0);
    assert_eq!(db.num_tables(), 0);
    assert!(!db.is_infobase());
    assert!(!db.is_repository());
    assert_eq!(db.role(), DbRole::Unknown);
    assert_eq!(db.free_page_count(), 0);
    assert!(db.is_readonly());
}

// S2: three allocations extend the file page by page.

#[test]
fn test_allocate_extends_file() {
    let file = image_file(&empty_image(16));
    {
        let mut db = Database::open(file.path(), true).unwrap();
        assert_eq!(db.pager_mut().allocate_page().unwrap(), 16);
        assert_eq!(db.pager_mut().allocate_page().unwrap(), 17);
        assert_eq!(db.pager_mut().allocate_page().unwrap(), 18);
        db.flush().unwrap();
    }
    let bytes = std::fs::read(file.path()).unwrap();
    assert_eq!(bytes.len() as u64, 19 * 4096);
    // The container header tracks the new page count.
    assert_eq!(LittleEndian::read_u32(&bytes[12..16]), 19);
}

// S3: a 9000-byte legacy object occupies three data pages through one
// allocation table.

#[test]
fn test_object_layout_9000_bytes() {
    let file = image_file(&empty_image(3));
    let mut pager = open_pager(&file);
    let mut obj = Object::create(&mut pager, false).unwrap();
    let pattern: Vec<u8> = (0..9000_u32).map(|i| (i % 7) as u8).collect();
    obj.write(&mut pager, 0, &pattern).unwrap();
    assert_eq!(obj.len(), 9000);
    assert_eq!(obj.read(&mut pager, 0, 9000).unwrap(), pattern);
    assert_eq!(obj.allocation_pages().len(), 1);
    assert_eq!(obj.owned_pages(&mut pager).unwrap().len(), 4);
}

// S4: tombstone semantics in a 64-byte-record table.

#[test]
fn test_tombstone_semantics() {
    let file = image_file(&empty_image(3));
    let mut pager = open_pager(&file);
    let descr_page = build_table(&mut pager, "T", "{\"NAME\",\"NC\",0,63,0,\"CS\"}");
    let mut table = Table::open(&mut pager, false, descr_page).unwrap();
    assert_eq!(table.record_len(), 64);
    let mut a = TableRecord::new_live(64);
    a.set_value(&table.fields()[0], &[b'a'; 63]).unwrap();
    let mut b = TableRecord::new_live(64);
    b.set_value(&table.fields()[0], &[b'b'; 63]).unwrap();
    table.insert_record(&mut pager, &a).unwrap();
    table.insert_record(&mut pager, &b).unwrap();
    table.delete_record(&mut pager, 0).unwrap();
    assert_eq!(table.phys_count(), 2);
    assert_eq!(table.log_count(&mut pager).unwrap(), 1);
    assert_eq!(table.get_record(&mut pager, 0).unwrap().tombstone(), 0);
    assert_eq!(table.get_record(&mut pager, 1).unwrap(), b);
    // A later insert lands on a fresh physical index, not the tombstone.
    let phys = table.insert_record(&mut pager, &a).unwrap();
    assert_eq!(phys, 2);
}

// S5: a misnamed CONFIGSAVE field surfaces as SchemaMismatch with details.

#[test]
fn test_stream_format_mismatch() {
    let file = image_file(&empty_image(3));
    {
        let mut pager = open_pager(&file);
        let mut blocks = vec![];
        blocks.push(build_catalog_table(&mut pager, "CONFIG"));
        blocks.push(build_table(
            &mut pager,
            "CONFIGSAVE",
            &CATALOG_FIELDS.replace("ATTRIBUTES", "SOMETHING"),
        ));
        blocks.push(build_catalog_table(&mut pager, "PARAMS"));
        blocks.push(build_catalog_table(&mut pager, "FILES"));
        blocks.push(build_table(
            &mut pager,
            "DBSCHEMA",
            "{\"SCHEMA\",\"I\",0,0,0,\"CS\"}",
        ));
        write_root_record(&mut pager, &blocks);
        pager.flush().unwrap();
    }
    let db = Database::open(file.path(), false).unwrap();
    assert!(db.is_infobase());
    assert_eq!(db.num_tables(), 5);
    let err = db.test_stream_format().unwrap_err();
    assert!(matches!(err, Error::SchemaMismatch(_)));
    assert_eq!(err.detail("field_index"), Some("3"));
    assert_eq!(err.detail("expected"), Some("ATTRIBUTES"));
    assert_eq!(err.detail("actual"), Some("SOMETHING"));
}

// S6: a two-slot blob chain with lengths (250, 50).

#[test]
fn test_blob_chain_lengths() {
    let file = image_file(&empty_image(3));
    let mut pager = open_pager(&file);
    let mut heap = Object::create(&mut pager, false).unwrap();
    let payload: Vec<u8> = (0..300_u32).map(|i| (i % 256) as u8).collect();
    let start = blob::write_blob(&mut heap, &mut pager, &payload).unwrap();
    assert_eq!(start, 1);
    assert_eq!(
        blob::read_blob(&heap, &mut pager, start, Some(300)).unwrap(),
        payload
    );
    let err = blob::read_blob(&heap, &mut pager, start, Some(301)).unwrap_err();
    assert!(matches!(err, Error::CorruptBlob(_)));
    assert_eq!(err.detail("expected"), Some("301"));
    assert_eq!(err.detail("actual"), Some("300"));
}

// Property 4: allocator disjointness.

#[test]
fn test_allocator_disjointness() {
    let file = image_file(&empty_image(3));
    let mut pager = open_pager(&file);
    let mut seen = std::collections::BTreeSet::new();
    for _ in 0..20 {
        assert!(seen.insert(pager.allocate_page().unwrap()));
    }
    let victim = *seen.iter().next().unwrap();
    pager.release_page(victim).unwrap();
    assert_eq!(pager.allocate_page().unwrap(), victim);
}

// Property 5: open, no-op, flush, close leaves the file byte-identical.

#[test]
fn test_open_close_idempotence() {
    let image = empty_image(16);
    let file = image_file(&image);
    {
        let mut db = Database::open(file.path(), true).unwrap();
        db.flush().unwrap();
    }
    assert_eq!(std::fs::read(file.path()).unwrap(), image);
}

// A database whose table survives a flush-and-reopen cycle.

#[test]
fn test_reopen_sees_persisted_rows() {
    let file = image_file(&empty_image(3));
    {
        let mut pager = open_pager(&file);
        let descr_page = build_table(&mut pager, "NOTES", "{\"NAME\",\"NC\",0,15,0,\"CS\"}");
        let mut table = Table::open(&mut pager, false, descr_page).unwrap();
        let mut rec = TableRecord::new_live(table.record_len());
        rec.set_value(&table.fields()[0], b"persisted-here!").unwrap();
        table.insert_record(&mut pager, &rec).unwrap();
        write_root_record(&mut pager, &[descr_page]);
        pager.flush().unwrap();
    }
    let mut db = Database::open(file.path(), false).unwrap();
    assert_eq!(db.num_tables(), 1);
    let index = db.table_index("notes").expect("case-insensitive lookup");
    let (table, pager) = db.table_and_pager(index);
    assert_eq!(table.phys_count(), 1);
    let rec = table.get_record(pager, 0).unwrap();
    assert_eq!(
        rec.presentation(&table.fields()[0]).unwrap().unwrap(),
        "persisted-here!"
    );
}

// Partial presence of the well-known set aborts the open.

#[test]
fn test_partial_infobase_rejected() {
    let file = image_file(&empty_image(3));
    {
        let mut pager = open_pager(&file);
        let config = build_catalog_table(&mut pager, "CONFIG");
        write_root_record(&mut pager, &[config]);
        pager.flush().unwrap();
    }
    let err = Database::open(file.path(), false).unwrap_err();
    assert!(matches!(err, Error::SchemaMismatch(_)));
    assert_eq!(err.detail("table"), Some("CONFIGSAVE"));
}

// Unknown version tags and corrupt sizes abort the open.

#[test]
fn test_header_validation() {
    let mut image = empty_image(3);
    image[8..12].copy_from_slice(&[9, 9, 9, 9]);
    let file = image_file(&image);
    assert!(matches!(
        Database::open(file.path(), false),
        Err(Error::Unavailable(_))
    ));

    let mut image = empty_image(3);
    image.extend_from_slice(&[0_u8; 100]); // no longer a whole page count
    let file = image_file(&image);
    assert!(matches!(
        Database::open(file.path(), false),
        Err(Error::CorruptHeader(_))
    ));

    let mut image = empty_image(3);
    LittleEndian::write_u32(&mut image[12..16], 7); // header length lies
    let file = image_file(&image);
    assert!(matches!(
        Database::open(file.path(), false),
        Err(Error::CorruptHeader(_))
    ));
}

// Catalog assembly through the database surface.

#[test]
fn test_files_of_catalog_table() {
    let file = image_file(&empty_image(3));
    {
        let mut pager = open_pager(&file);
        let blocks = [
            build_catalog_table(&mut pager, "CONFIG"),
            build_catalog_table(&mut pager, "CONFIGSAVE"),
            build_catalog_table(&mut pager, "PARAMS"),
            build_catalog_table(&mut pager, "FILES"),
            build_table(&mut pager, "DBSCHEMA", "{\"SCHEMA\",\"I\",0,0,0,\"CS\"}"),
        ];
        // One file row in CONFIG.
        let mut table = Table::open(&mut pager, false, blocks[0]).unwrap();
        let mut rec = TableRecord::new_live(table.record_len());
        let fields: Vec<_> = table.fields().to_vec();
        let mut name = vec![0_u8; fields[0].width()];
        name[0] = 8;
        name[2..10].copy_from_slice(b"root.cfg");
        rec.set_value(&fields[0], &name).unwrap();
        rec.set_value(&fields[1], &[0x20, 0x17, 0x05, 0x01, 0x12, 0x00, 0x00])
            .unwrap();
        rec.set_value(&fields[2], &[0x20, 0x17, 0x05, 0x01, 0x12, 0x00, 0x00])
            .unwrap();
        rec.set_value(&fields[3], &[0_u8; 4]).unwrap();
        let mut size = vec![0_u8; 8];
        LittleEndian::write_u64(&mut size, 11);
        rec.set_value(&fields[4], &size).unwrap();
        table
            .write_blob_field(&mut pager, &mut rec, &fields[5], b"hello world")
            .unwrap();
        table.insert_record(&mut pager, &rec).unwrap();
        write_root_record(&mut pager, &blocks);
        pager.flush().unwrap();
    }
    let mut db = Database::open(file.path(), false).unwrap();
    assert!(db.is_infobase());
    db.test_stream_format().unwrap();
    let files = db.files_of("CONFIG").unwrap();
    assert_eq!(files.len(), 1);
    let file_entry = files.get("ROOT.CFG").unwrap();
    assert_eq!(file_entry.data, b"hello world");
    assert_eq!(file_entry.created.year, 2017);
    assert_eq!(file_entry.created.month, 5);
}

// Recovery: an orphaned descriptor object is found and re-linked.

#[test]
fn test_find_and_create_lost_tables() {
    let file = image_file(&empty_image(3));
    let orphan;
    {
        let mut pager = open_pager(&file);
        orphan = build_table(&mut pager, "ORPHAN", "{\"NAME\",\"NC\",0,7,0,\"CS\"}");
        // Deliberately not linked into the root record.
        write_root_record(&mut pager, &[]);
        pager.flush().unwrap();
    }
    let mut db = Database::open(file.path(), true).unwrap();
    assert_eq!(db.num_tables(), 0);
    let lost = db.find_lost_objects().unwrap();
    assert!(lost.contains(&orphan));
    let recovered = db.find_and_create_lost_tables().unwrap();
    assert_eq!(recovered, 1);
    assert!(db.table("ORPHAN").is_some());
    db.flush().unwrap();
    drop(db);
    // The re-linked table survives a reopen.
    let db = Database::open(file.path(), false).unwrap();
    assert!(db.table("ORPHAN").is_some());
}

// Export and re-import through the database surface.

#[test]
fn test_table_export_import_cycle() {
    let file = image_file(&empty_image(3));
    {
        let mut pager = open_pager(&file);
        let descr_page = build_table(&mut pager, "SRC", "{\"NAME\",\"NC\",0,7,0,\"CS\"}");
        let mut table = Table::open(&mut pager, false, descr_page).unwrap();
        let mut rec = TableRecord::new_live(table.record_len());
        rec.set_value(&table.fields()[0], b"one+two").unwrap();
        table.insert_record(&mut pager, &rec).unwrap();
        write_root_record(&mut pager, &[descr_page]);
        pager.flush().unwrap();
    }
    let dir = tempfile::tempdir().unwrap();
    let mut db = Database::open(file.path(), true).unwrap();
    {
        let index = db.table_index("SRC").unwrap();
        let (table, pager) = db.table_and_pager(index);
        table.export(pager, dir.path()).unwrap();
    }
    let imported = db.import_table(dir.path()).unwrap();
    assert_eq!(db.num_tables(), 2);
    let (table, pager) = db.table_and_pager(imported);
    assert_eq!(table.name(), "SRC");
    assert_eq!(table.phys_count(), 1);
    let rec = table.get_record(pager, 0).unwrap();
    assert_eq!(
        rec.presentation(&table.fields()[0]).unwrap().unwrap(),
        "one+two"
    );
    db.flush().unwrap();
    drop(db);
    // Both tables listed after reopen.
    let db = Database::open(file.path(), false).unwrap();
    assert_eq!(db.num_tables(), 2);
}

// The read-only allocation verifier accepts a healthy table.

#[test]
fn test_restore_allocation_verifier() {
    let file = image_file(&empty_image(3));
    {
        let mut pager = open_pager(&file);
        let descr_page = build_table(&mut pager, "HEALTHY", "{\"FLAG\",\"L\",0,0,0,\"CS\"}");
        let mut table = Table::open(&mut pager, false, descr_page).unwrap();
        for _ in 0..10 {
            let rec = TableRecord::new_live(table.record_len());
            table.insert_record(&mut pager, &rec).unwrap();
        }
        write_root_record(&mut pager, &[descr_page]);
        pager.flush().unwrap();
    }
    let before = std::fs::read(file.path()).unwrap();
    let mut db = Database::open(file.path(), false).unwrap();
    let index = db.table_index("HEALTHY").unwrap();
    db.restore_data_allocation_table(index).unwrap();
    drop(db);
    // Strictly read-only: the file did not change.
    assert_eq!(std::fs::read(file.path()).unwrap(), before);
}
