//! Free-page allocator.
//!
//! Reclaimable page numbers live in the dedicated object rooted at page 1.
//! Its payload is a stack of 32-bit page numbers: `allocate` pops, `release`
//! pushes. The legacy root addresses its storage pages directly from the
//! inline block array, so the stack can grow without going through the
//! regular object resize path — growth extends the file instead of popping
//! the very stack being mutated.
//!
//! The wide (8.3.8) free-object interior is not fully understood yet, so
//! under that format `allocate` always extends the file and `release` is
//! refused.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, Result};
use crate::object::{
    LEGACY_BLOCKS_OFF, LEGACY_LEN_OFF, LEGACY_ROOT_CAPACITY, SIG_OBJECT, SIG_WIDE_FREE,
};
use crate::pager::{PageNum, Pager};

/// The free-space object always roots at page 1.
pub const FREE_ROOT_PAGE: PageNum = 1;

/// The database root object sits at page 2; neither it nor page 1 may ever
/// enter the free stack.
pub const ROOT_OBJECT_PAGE: PageNum = 2;

/// 32-bit slots per legacy storage page.
const WORDS_PER_PAGE: u32 = 1024;

#[derive(Debug)]
pub struct FreeList {
    wide: bool,
    /// Number of stacked free page numbers (the root's `len` field).
    len_words: u32,
    /// Storage pages of the free object, addressed directly from the root.
    storage: Vec<PageNum>,
}

impl FreeList {
    /// Parses the free object root on page 1.
    pub fn load(pager: &mut Pager, wide: bool) -> Result<FreeList> {
        let root = pager.get(FREE_ROOT_PAGE)?;
        if wide {
            if root[0..2] != SIG_WIDE_FREE {
                return Err(Error::corrupt_object("page 1 is not a free-object root")
                    .with("signature", hex::encode(&root[0..2])));
            }
            // Interior layout unknown; nothing usable to read yet.
            return Ok(FreeList {
                wide: true,
                len_words: 0,
                storage: vec![],
            });
        }
        if &root[0..8] != SIG_OBJECT {
            return Err(Error::corrupt_object("page 1 is not a free-object root")
                .with("signature", hex::encode(&root[0..8])));
        }
        let len_words = LittleEndian::read_u32(&root[LEGACY_LEN_OFF..LEGACY_LEN_OFF + 4]);
        let mut storage = vec![];
        for slot in 0..LEGACY_ROOT_CAPACITY {
            let off = LEGACY_BLOCKS_OFF + slot * 4;
            let page = LittleEndian::read_u32(&root[off..off + 4]);
            if page == 0 {
                break;
            }
            storage.push(page);
        }
        let needed = (len_words as u64 + WORDS_PER_PAGE as u64 - 1) / WORDS_PER_PAGE as u64;
        if needed as usize > storage.len() {
            return Err(Error::corrupt_object("free object shorter than its length")
                .with("length_words", len_words)
                .with("storage_pages", storage.len()));
        }
        Ok(FreeList {
            wide: false,
            len_words,
            storage,
        })
    }

    /// Number of page numbers currently stacked.
    pub fn len(&self) -> u32 {
        self.len_words
    }

    pub fn is_empty(&self) -> bool {
        self.len_words == 0
    }

    /// Pops a free page, or extends the file by one page and returns the new
    /// page number. The returned page's frame is dirty and zero-filled when
    /// it came from extension.
    pub fn allocate(&mut self, pager: &mut Pager) -> Result<PageNum> {
        if !self.wide && self.len_words > 0 {
            self.len_words -= 1;
            let slot = self.len_words;
            let storage_page = self.storage[(slot / WORDS_PER_PAGE) as usize];
            let off = (slot % WORDS_PER_PAGE) as usize * 4;
            let buf = pager.get_for_write(storage_page, true)?;
            let page = LittleEndian::read_u32(&buf[off..off + 4]);
            LittleEndian::write_u32(&mut buf[off..off + 4], 0);
            self.write_len(pager)?;
            if page <= ROOT_OBJECT_PAGE || page >= pager.page_count() {
                return Err(Error::corrupt_object("implausible page number on free list")
                    .with("page", crate::error::hex_u32(page))
                    .with("slot", slot));
            }
            return Ok(page);
        }
        let page = pager.page_count();
        pager.get_for_write(page, false)?;
        Ok(page)
    }

    /// Pushes `page` onto the stack for later reuse.
    pub fn release(&mut self, pager: &mut Pager, page: PageNum) -> Result<()> {
        if self.wide {
            return Err(Error::unavailable(
                "free list reclamation is not supported for the 8.3.8 format",
            )
            .with("page", crate::error::hex_u32(page)));
        }
        if page <= ROOT_OBJECT_PAGE {
            return Err(Error::corrupt_object("refusing to free a reserved page")
                .with("page", crate::error::hex_u32(page)));
        }
        let storage_index = (self.len_words / WORDS_PER_PAGE) as usize;
        if storage_index >= self.storage.len() {
            // The stack needs another storage page. It must come from plain
            // file extension: popping the stack mid-mutation would recurse.
            let slot = self.storage.len();
            if slot >= LEGACY_ROOT_CAPACITY {
                return Err(Error::corrupt_object("free object block array is full")
                    .with("capacity", LEGACY_ROOT_CAPACITY));
            }
            let fresh = pager.page_count();
            pager.get_for_write(fresh, false)?;
            let root = pager.get_for_write(FREE_ROOT_PAGE, true)?;
            let off = LEGACY_BLOCKS_OFF + slot * 4;
            LittleEndian::write_u32(&mut root[off..off + 4], fresh);
            self.storage.push(fresh);
        }
        let storage_page = self.storage[storage_index];
        let off = (self.len_words % WORDS_PER_PAGE) as usize * 4;
        let buf = pager.get_for_write(storage_page, true)?;
        LittleEndian::write_u32(&mut buf[off..off + 4], page);
        self.len_words += 1;
        self.write_len(pager)
    }

    fn write_len(&self, pager: &mut Pager) -> Result<()> {
        let root = pager.get_for_write(FREE_ROOT_PAGE, true)?;
        LittleEndian::write_u32(
            &mut root[LEGACY_LEN_OFF..LEGACY_LEN_OFF + 4],
            self.len_words,
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{scratch_db, scratch_db_wide};

    #[test]
    fn test_extend_then_reuse() {
        let (_f, mut pager) = scratch_db();
        // Empty stack: allocation appends to the file.
        assert_eq!(pager.allocate_page().unwrap(), 3);
        assert_eq!(pager.allocate_page().unwrap(), 4);
        pager.release_page(3).unwrap();
        assert_eq!(pager.free_list().unwrap().len(), 1);
        assert_eq!(pager.allocate_page().unwrap(), 3);
        assert!(pager.free_list().unwrap().is_empty());
    }

    #[test]
    fn test_reserved_pages_refused() {
        let (_f, mut pager) = scratch_db();
        for page in [0, 1, 2] {
            assert!(matches!(
                pager.release_page(page),
                Err(Error::CorruptObject(_))
            ));
        }
    }

    #[test]
    fn test_stack_survives_flush() {
        let (_f, mut pager) = scratch_db();
        for _ in 0..5 {
            pager.allocate_page().unwrap();
        }
        for page in [4, 6, 5] {
            pager.release_page(page).unwrap();
        }
        pager.flush().unwrap();
        pager.garbage(true);
        let reloaded = FreeList::load(&mut pager, false).unwrap();
        assert_eq!(reloaded.len(), 3);
        pager.attach_free_list(reloaded);
        // LIFO: the most recently released page comes back first.
        assert_eq!(pager.allocate_page().unwrap(), 5);
        assert_eq!(pager.allocate_page().unwrap(), 6);
        assert_eq!(pager.allocate_page().unwrap(), 4);
    }

    #[test]
    fn test_wide_allocates_by_extension_only() {
        let (_f, mut pager) = scratch_db_wide(4096);
        assert_eq!(pager.allocate_page().unwrap(), 3);
        let err = pager.release_page(3).unwrap_err();
        assert!(matches!(err, Error::Unavailable(_)));
    }
}
