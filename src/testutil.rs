//! Helpers for unit tests: fabricate minimal database images in temp files.
//!
//! There are no binary fixtures; every test file is built byte-by-byte, which
//! keeps the writers honest about the format.

use tempfile::NamedTempFile;

use crate::device::{BlockDevice, OpenMode};
use crate::freelist::FreeList;
use crate::header::{ContainerHeader, DbVersion};
use crate::object::{SIG_OBJECT, SIG_WIDE_DATA, SIG_WIDE_FREE};
use crate::pager::Pager;

/// An empty legacy (8.2.14.0) image: header page, free-object root, root
/// object, `extra` zero pages after that.
pub fn legacy_image(extra: u32) -> Vec<u8> {
    let pages = 3 + extra;
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

/// An empty wide (8.3.8.0) image with the given page size.
pub fn wide_image(page_size: u32) -> Vec<u8> {
    let ps = page_size as usize;
    let mut image = vec![0_u8; 3 * ps];
    ContainerHeader {
        version: DbVersion::V8_3_8_0,
        length: 3,
        page_size,
    }
    .write(&mut image);
    image[ps..ps + 2].copy_from_slice(&SIG_WIDE_FREE);
    image[2 * ps..2 * ps + 2].copy_from_slice(&SIG_WIDE_DATA);
    image
}

pub fn pager_over(image: &[u8], page_size: u32, wide: bool) -> (NamedTempFile, Pager) {
    let file = NamedTempFile::new().unwrap();
    std::fs::write(file.path(), image).unwrap();
    let device = BlockDevice::open(file.path(), OpenMode::ReadWriteExclusive).unwrap();
    let pages = (image.len() / page_size as usize) as u32;
    let mut pager = Pager::new(device, page_size, pages, false);
    let free = FreeList::load(&mut pager, wide).unwrap();
    pager.attach_free_list(free);
    (file, pager)
}

/// A writable pager over an empty legacy database.
pub fn scratch_db() -> (NamedTempFile, Pager) {
    let image = legacy_image(0);
    pager_over(&image, 4096, false)
}

/// A writable pager over an empty wide database.
pub fn scratch_db_wide(page_size: u32) -> (NamedTempFile, Pager) {
    let image = wide_image(page_size);
    pager_over(&image, page_size, true)
}
