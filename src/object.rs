//! The object: a logical byte-addressable stream stored across possibly
//! non-contiguous pages.
//!
//! An object is rooted at a single page. The root carries a signature, the
//! byte length, a pair of version counters and an inline block array. How the
//! block array reaches the data pages depends on the format family:
//!
//! * legacy (< 8.3.8): data-object roots list allocation-table pages, each of
//!   which lists up to 1023 data pages after a count word; the free object's
//!   root lists its data pages directly and measures its length in 32-bit
//!   words.
//! * wide (>= 8.3.8): with `fatlevel == 0` the root lists data pages
//!   directly (capacity `page_size/4 - 6`), with `fatlevel == 1` it lists
//!   allocation-table pages of `page_size/4` entries each. Growth past the
//!   inline capacity promotes 0 -> 1 automatically.
//!
//! Address translation, read, write and resize live here; everything above
//! (tables, the blob heap, the catalog) only sees byte offsets.

use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{hex_u32, hex_u64, Error, Result};
use crate::header::DEFAULT_PAGE_SIZE;
use crate::pager::{PageNum, Pager};

/// Legacy object root signature, "1CDBOBV8".
pub const SIG_OBJECT: &[u8; 8] = b"1CDBOBV8";

/// First two bytes of a wide-format data object root.
pub const SIG_WIDE_DATA: [u8; 2] = [0x1c, 0xfd];

/// First two bytes of a wide-format free object root.
pub const SIG_WIDE_FREE: [u8; 2] = [0x1c, 0xff];

// Legacy root page layout: signature, length, version counters, block array.
pub const LEGACY_LEN_OFF: usize = 8;
pub const LEGACY_VERSION_OFF: usize = 12;
pub const LEGACY_BLOCKS_OFF: usize = 24;
/// Inline block entries in a legacy root: (4096 - 24) / 4.
pub const LEGACY_ROOT_CAPACITY: usize = 1018;
/// Data-page entries per legacy allocation-table page (after the count word).
pub const LEGACY_TABLE_CAPACITY: u64 = 1023;

// Wide root page layout: 2-byte signature, fatlevel, versions, 64-bit length.
const WIDE_FATLEVEL_OFF: usize = 2;
const WIDE_VERSION_OFF: usize = 4;
const WIDE_LEN_OFF: usize = 16;
const WIDE_BLOCKS_OFF: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    /// Legacy data object: root -> allocation tables -> data pages.
    Data80,
    /// Legacy free object: root -> data pages, length in words.
    Free80,
    /// Wide data object.
    Data838,
    /// Wide free object; interior layout unresolved.
    Free838,
}

impl ObjectKind {
    pub fn is_free(&self) -> bool {
        matches!(self, ObjectKind::Free80 | ObjectKind::Free838)
    }
}

#[derive(Debug)]
pub struct Object {
    root_page: PageNum,
    kind: ObjectKind,
    /// Raw root length field: bytes, except words for `Free80`.
    len: u64,
    fatlevel: u16,
    /// The root's inline block array.
    blocks: Vec<PageNum>,
    committed: (u32, u32),
    staged: (u32, u32),
    version_written: bool,
}

impl Object {
    /// Opens the object rooted at `page`. `wide` selects the root encoding;
    /// page 1 is always the free object.
    pub fn open(pager: &mut Pager, page: PageNum, wide: bool) -> Result<Object> {
        let page_size = pager.page_size();
        let root = pager.get(page)?;
        if !wide {
            if &root[0..8] != SIG_OBJECT {
                return Err(Error::corrupt_object("page is not an object root")
                    .with("page", hex_u32(page))
                    .with("signature", hex::encode(&root[0..8])));
            }
            let len = LittleEndian::read_u32(&root[LEGACY_LEN_OFF..LEGACY_LEN_OFF + 4]) as u64;
            let committed = (
                LittleEndian::read_u32(&root[LEGACY_VERSION_OFF..LEGACY_VERSION_OFF + 4]),
                LittleEndian::read_u32(&root[LEGACY_VERSION_OFF + 4..LEGACY_VERSION_OFF + 8]),
            );
            let kind = if page == 1 {
                ObjectKind::Free80
            } else {
                ObjectKind::Data80
            };
            let numblocks = match kind {
                // Words -> bytes, then data pages addressed directly.
                ObjectKind::Free80 => ceil_div(len * 4, DEFAULT_PAGE_SIZE as u64),
                _ => ceil_div(len, LEGACY_TABLE_CAPACITY * DEFAULT_PAGE_SIZE as u64),
            };
            if numblocks as usize > LEGACY_ROOT_CAPACITY {
                return Err(Error::corrupt_object("length exceeds block array capacity")
                    .with("page", hex_u32(page))
                    .with("length", len)
                    .with("capacity", LEGACY_ROOT_CAPACITY));
            }
            let blocks = read_block_array(&root[LEGACY_BLOCKS_OFF..], numblocks as usize);
            return Ok(Object {
                root_page: page,
                kind,
                len,
                fatlevel: 1,
                blocks,
                committed,
                staged: (committed.0 + 1, 0),
                version_written: false,
            });
        }

        if page == 1 {
            if root[0..2] != SIG_WIDE_FREE {
                return Err(Error::corrupt_object("page is not a free-object root")
                    .with("page", hex_u32(page))
                    .with("signature", hex::encode(&root[0..2])));
            }
            let committed = (
                LittleEndian::read_u32(&root[WIDE_VERSION_OFF..WIDE_VERSION_OFF + 4]),
                0,
            );
            return Ok(Object {
                root_page: page,
                kind: ObjectKind::Free838,
                len: 0,
                fatlevel: 0,
                blocks: vec![],
                committed,
                staged: (committed.0 + 1, 0),
                version_written: false,
            });
        }

        if root[0..2] != SIG_WIDE_DATA {
            return Err(Error::corrupt_object("page is not a data-object root")
                .with("page", hex_u32(page))
                .with("signature", hex::encode(&root[0..2])));
        }
        let fatlevel = LittleEndian::read_u16(&root[WIDE_FATLEVEL_OFF..WIDE_FATLEVEL_OFF + 2]);
        let committed = (
            LittleEndian::read_u32(&root[WIDE_VERSION_OFF..WIDE_VERSION_OFF + 4]),
            LittleEndian::read_u32(&root[WIDE_VERSION_OFF + 4..WIDE_VERSION_OFF + 8]),
        );
        let len = LittleEndian::read_u64(&root[WIDE_LEN_OFF..WIDE_LEN_OFF + 8]);
        let p = page_size as u64;
        let inline_cap = p / 4 - 6;
        if fatlevel == 0 && len > inline_cap * p {
            return Err(
                Error::corrupt_object("length too large for a one-level block array")
                    .with("page", hex_u32(page))
                    .with("length", len),
            );
        }
        if fatlevel == 1 && len > (p / 4) * inline_cap * p {
            return Err(
                Error::corrupt_object("length beyond the fatlevel-1 capacity")
                    .with("page", hex_u32(page))
                    .with("length", len),
            );
        }
        let numblocks = if fatlevel == 0 {
            ceil_div(len, p)
        } else {
            ceil_div(len, (p / 4) * p)
        };
        let blocks = read_block_array(&root[WIDE_BLOCKS_OFF..], numblocks as usize);
        Ok(Object {
            root_page: page,
            kind: ObjectKind::Data838,
            len,
            fatlevel,
            blocks,
            committed,
            staged: (committed.0 + 1, 0),
            version_written: false,
        })
    }

    /// Allocates a page and initializes an empty data-object root on it.
    pub fn create(pager: &mut Pager, wide: bool) -> Result<Object> {
        let page = pager.allocate_page()?;
        let buf = pager.get_for_write(page, false)?;
        buf.fill(0);
        if wide {
            buf[0..2].copy_from_slice(&SIG_WIDE_DATA);
        } else {
            buf[0..8].copy_from_slice(SIG_OBJECT);
        }
        let kind = if wide {
            ObjectKind::Data838
        } else {
            ObjectKind::Data80
        };
        Ok(Object {
            root_page: page,
            kind,
            len: 0,
            fatlevel: if wide { 0 } else { 1 },
            blocks: vec![],
            committed: (0, 0),
            staged: (1, 0),
            version_written: false,
        })
    }

    pub fn root_page(&self) -> PageNum {
        self.root_page
    }

    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    /// Length in bytes. The free object's root counts words, everything else
    /// counts bytes.
    pub fn len(&self) -> u64 {
        match self.kind {
            ObjectKind::Free80 => self.len * 4,
            _ => self.len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn fatlevel(&self) -> u16 {
        self.fatlevel
    }

    /// The on-disk committed version pair.
    pub fn committed_version(&self) -> (u32, u32) {
        self.committed
    }

    /// The in-memory staged version pair; differs from committed once the
    /// object has been mutated this session.
    pub fn staged_version(&self) -> (u32, u32) {
        self.staged
    }

    /// The root's inline block array (allocation tables, or data pages for
    /// single-level encodings).
    pub fn allocation_pages(&self) -> &[PageNum] {
        &self.blocks
    }

    fn version_offset(&self) -> usize {
        match self.kind {
            ObjectKind::Data80 | ObjectKind::Free80 => LEGACY_VERSION_OFF,
            ObjectKind::Data838 | ObjectKind::Free838 => WIDE_VERSION_OFF,
        }
    }

    /// First mutation of the session writes `committed_v1 + 1` and clears
    /// the second counter on the root page; later mutations only advance the
    /// staged counter in memory.
    fn touch(&mut self, pager: &mut Pager) -> Result<()> {
        if self.version_written {
            self.staged.1 += 1;
            return Ok(());
        }
        let off = self.version_offset();
        let root = pager.get_for_write(self.root_page, true)?;
        LittleEndian::write_u32(&mut root[off..off + 4], self.committed.0 + 1);
        LittleEndian::write_u32(&mut root[off + 4..off + 8], 0);
        self.staged = (self.committed.0 + 1, 0);
        self.version_written = true;
        Ok(())
    }

    /// Overwrites the committed version pair; used when importing a table
    /// whose export carried its own counters.
    pub fn set_committed_version(&mut self, pager: &mut Pager, version: (u32, u32)) -> Result<()> {
        let off = self.version_offset();
        let root = pager.get_for_write(self.root_page, true)?;
        LittleEndian::write_u32(&mut root[off..off + 4], version.0);
        LittleEndian::write_u32(&mut root[off + 4..off + 8], version.1);
        self.committed = version;
        self.staged = (version.0 + 1, 0);
        self.version_written = false;
        Ok(())
    }

    /// Resolves the physical page holding logical data block `data_block`.
    fn data_page(&self, pager: &mut Pager, data_block: u64) -> Result<PageNum> {
        let bad_table = |index: u64| {
            Error::corrupt_object("unreadable allocation table")
                .with("object", hex_u32(self.root_page))
                .with("table_index", index)
        };
        let page = match self.kind {
            ObjectKind::Free80 => *self
                .blocks
                .get(data_block as usize)
                .ok_or_else(|| bad_table(data_block))?,
            ObjectKind::Data80 => {
                let table_index = data_block / LEGACY_TABLE_CAPACITY;
                let in_table = (data_block % LEGACY_TABLE_CAPACITY) as usize;
                let table_page = *self
                    .blocks
                    .get(table_index as usize)
                    .ok_or_else(|| bad_table(table_index))?;
                let table = pager.get(table_page)?;
                LittleEndian::read_u32(&table[4 + in_table * 4..8 + in_table * 4])
            }
            ObjectKind::Data838 => {
                if self.fatlevel == 0 {
                    *self
                        .blocks
                        .get(data_block as usize)
                        .ok_or_else(|| bad_table(data_block))?
                } else {
                    let per_table = pager.page_size() as u64 / 4;
                    let table_index = data_block / per_table;
                    let in_table = (data_block % per_table) as usize;
                    let table_page = *self
                        .blocks
                        .get(table_index as usize)
                        .ok_or_else(|| bad_table(table_index))?;
                    let table = pager.get(table_page)?;
                    LittleEndian::read_u32(&table[in_table * 4..in_table * 4 + 4])
                }
            }
            ObjectKind::Free838 => {
                return Err(Error::unavailable(
                    "wide-format free object payload is not readable",
                ))
            }
        };
        if page == 0 {
            return Err(Error::corrupt_object("zero page in allocation table")
                .with("object", hex_u32(self.root_page))
                .with("data_block", data_block));
        }
        Ok(page)
    }

    /// Translates `[offset, offset + length)` into per-page spans.
    fn spans(
        &self,
        pager: &mut Pager,
        offset: u64,
        length: u64,
    ) -> Result<Vec<(PageNum, usize, usize)>> {
        let p = pager.page_size() as u64;
        let mut spans = Vec::with_capacity((length / p + 2) as usize);
        let mut off = offset;
        let mut remaining = length;
        while remaining > 0 {
            let in_page = (off % p) as usize;
            let span = (p - in_page as u64).min(remaining) as usize;
            let page = self.data_page(pager, off / p)?;
            spans.push((page, in_page, span));
            off += span as u64;
            remaining -= span as u64;
        }
        Ok(spans)
    }

    /// Reads `length` bytes at `offset`. Reading past the declared length
    /// fails rather than short-reading.
    pub fn read(&self, pager: &mut Pager, offset: u64, length: u64) -> Result<Vec<u8>> {
        if offset + length > self.len() {
            return Err(Error::out_of_bounds("read past object length")
                .with("object", hex_u32(self.root_page))
                .with("object_length", self.len())
                .with("start", offset)
                .with("length", length));
        }
        let mut out = Vec::with_capacity(length as usize);
        for (page, in_page, span) in self.spans(pager, offset, length)? {
            let buf = pager.get(page)?;
            out.extend_from_slice(&buf[in_page..in_page + span]);
        }
        Ok(out)
    }

    /// The whole payload.
    pub fn read_all(&self, pager: &mut Pager) -> Result<Vec<u8>> {
        self.read(pager, 0, self.len())
    }

    /// Writes `bytes` at `offset`, growing the object first when needed.
    pub fn write(&mut self, pager: &mut Pager, offset: u64, bytes: &[u8]) -> Result<()> {
        if self.kind.is_free() {
            return Err(Error::unavailable("direct write to the free-page object")
                .with("object", hex_u32(self.root_page)));
        }
        let end = offset + bytes.len() as u64;
        if end > self.len() {
            self.resize(pager, end)?;
        }
        let page_size = pager.page_size();
        let mut consumed = 0_usize;
        for (page, in_page, span) in self.spans(pager, offset, bytes.len() as u64)? {
            // A fully overwritten page does not need its old content.
            let partial = span != page_size;
            let buf = pager.get_for_write(page, partial)?;
            buf[in_page..in_page + span].copy_from_slice(&bytes[consumed..consumed + span]);
            consumed += span;
        }
        self.touch(pager)
    }

    /// Grows or shrinks the object to `new_len` bytes, allocating and
    /// releasing data pages and allocation tables as required.
    pub fn resize(&mut self, pager: &mut Pager, new_len: u64) -> Result<()> {
        if self.kind.is_free() {
            return Err(
                Error::unavailable("resizing the free-page object is driven by the allocator")
                    .with("object", hex_u32(self.root_page)),
            );
        }
        if new_len == self.len {
            return Ok(());
        }
        match self.kind {
            ObjectKind::Data80 => self.resize_legacy(pager, new_len)?,
            ObjectKind::Data838 => self.resize_wide(pager, new_len)?,
            _ => unreachable!(),
        }
        self.len = new_len;
        self.touch(pager)
    }

    fn resize_legacy(&mut self, pager: &mut Pager, new_len: u64) -> Result<()> {
        if new_len > u32::MAX as u64 {
            return Err(Error::out_of_bounds("legacy object length limit is 4 GiB")
                .with("object", hex_u32(self.root_page))
                .with("requested", hex_u64(new_len)));
        }
        let p = DEFAULT_PAGE_SIZE as u64;
        let new_blocks = ceil_div(new_len, p);
        let cur_blocks = ceil_div(self.len, p);
        {
            let root = pager.get_for_write(self.root_page, true)?;
            LittleEndian::write_u32(&mut root[LEGACY_LEN_OFF..LEGACY_LEN_OFF + 4], new_len as u32);
        }
        if new_blocks > cur_blocks {
            for db in cur_blocks..new_blocks {
                let in_table = (db % LEGACY_TABLE_CAPACITY) as usize;
                if in_table == 0 {
                    let slot = self.blocks.len();
                    if slot >= LEGACY_ROOT_CAPACITY {
                        return Err(Error::corrupt_object("object block array is full")
                            .with("object", hex_u32(self.root_page)));
                    }
                    let table = pager.allocate_page()?;
                    pager.get_for_write(table, false)?.fill(0);
                    let root = pager.get_for_write(self.root_page, true)?;
                    let off = LEGACY_BLOCKS_OFF + slot * 4;
                    LittleEndian::write_u32(&mut root[off..off + 4], table);
                    self.blocks.push(table);
                }
                let data = pager.allocate_page()?;
                pager.get_for_write(data, false)?.fill(0);
                let table_page = *self.blocks.last().expect("grow ensured a table");
                let table = pager.get_for_write(table_page, true)?;
                let off = 4 + in_table * 4;
                LittleEndian::write_u32(&mut table[off..off + 4], data);
                LittleEndian::write_u32(&mut table[0..4], in_table as u32 + 1);
            }
        } else if new_blocks < cur_blocks {
            for db in (new_blocks..cur_blocks).rev() {
                let in_table = (db % LEGACY_TABLE_CAPACITY) as usize;
                let table_page = *self.blocks.last().expect("shrink walks existing tables");
                let data = {
                    let table = pager.get_for_write(table_page, true)?;
                    let off = 4 + in_table * 4;
                    let data = LittleEndian::read_u32(&table[off..off + 4]);
                    LittleEndian::write_u32(&mut table[off..off + 4], 0);
                    LittleEndian::write_u32(&mut table[0..4], in_table as u32);
                    data
                };
                pager.release_page(data)?;
                if in_table == 0 {
                    pager.release_page(table_page)?;
                    self.blocks.pop();
                    let slot = self.blocks.len();
                    let root = pager.get_for_write(self.root_page, true)?;
                    let off = LEGACY_BLOCKS_OFF + slot * 4;
                    LittleEndian::write_u32(&mut root[off..off + 4], 0);
                }
            }
        }
        Ok(())
    }

    fn resize_wide(&mut self, pager: &mut Pager, new_len: u64) -> Result<()> {
        let p = pager.page_size() as u64;
        let per_table = p / 4;
        let inline_cap = per_table - 6;
        if new_len > per_table * inline_cap * p {
            return Err(
                Error::corrupt_object("length beyond the fatlevel-1 capacity")
                    .with("object", hex_u32(self.root_page))
                    .with("maximum", per_table * inline_cap * p)
                    .with("requested", hex_u64(new_len)),
            );
        }
        if new_len < self.len {
            // Shrinking returns pages to the free list, and the wide free
            // object cannot accept them yet.
            return Err(Error::unavailable(
                "shrinking a wide-format object requires free-list reclamation",
            )
            .with("object", hex_u32(self.root_page)));
        }
        let new_blocks = ceil_div(new_len, p);
        let cur_blocks = ceil_div(self.len, p);
        {
            let root = pager.get_for_write(self.root_page, true)?;
            LittleEndian::write_u64(&mut root[WIDE_LEN_OFF..WIDE_LEN_OFF + 8], new_len);
        }
        if self.fatlevel == 0 && new_blocks > inline_cap {
            // Promote: the inline data-page list moves into one freshly
            // allocated allocation table.
            let table = pager.allocate_page()?;
            let entries = std::mem::take(&mut self.blocks);
            let buf = pager.get_for_write(table, false)?;
            buf.fill(0);
            for (i, entry) in entries.iter().enumerate() {
                LittleEndian::write_u32(&mut buf[i * 4..i * 4 + 4], *entry);
            }
            let root = pager.get_for_write(self.root_page, true)?;
            LittleEndian::write_u16(
                &mut root[WIDE_FATLEVEL_OFF..WIDE_FATLEVEL_OFF + 2],
                1,
            );
            for i in 0..entries.len().max(1) {
                let off = WIDE_BLOCKS_OFF + i * 4;
                LittleEndian::write_u32(&mut root[off..off + 4], 0);
            }
            LittleEndian::write_u32(&mut root[WIDE_BLOCKS_OFF..WIDE_BLOCKS_OFF + 4], table);
            self.fatlevel = 1;
            self.blocks = vec![table];
        }
        if self.fatlevel == 1 {
            for db in cur_blocks..new_blocks {
                let in_table = (db % per_table) as usize;
                if in_table == 0 && db / per_table >= self.blocks.len() as u64 {
                    let slot = self.blocks.len();
                    if slot as u64 >= inline_cap {
                        return Err(Error::corrupt_object("object block array is full")
                            .with("object", hex_u32(self.root_page)));
                    }
                    let table = pager.allocate_page()?;
                    pager.get_for_write(table, false)?.fill(0);
                    let root = pager.get_for_write(self.root_page, true)?;
                    let off = WIDE_BLOCKS_OFF + slot * 4;
                    LittleEndian::write_u32(&mut root[off..off + 4], table);
                    self.blocks.push(table);
                }
                let data = pager.allocate_page()?;
                pager.get_for_write(data, false)?.fill(0);
                let table_page = *self.blocks.last().expect("grow ensured a table");
                let table = pager.get_for_write(table_page, true)?;
                LittleEndian::write_u32(&mut table[in_table * 4..in_table * 4 + 4], data);
            }
        } else {
            for db in cur_blocks..new_blocks {
                let data = pager.allocate_page()?;
                pager.get_for_write(data, false)?.fill(0);
                let slot = self.blocks.len();
                let root = pager.get_for_write(self.root_page, true)?;
                let off = WIDE_BLOCKS_OFF + slot * 4;
                LittleEndian::write_u32(&mut root[off..off + 4], data);
                self.blocks.push(data);
                debug_assert_eq!(slot as u64, db);
            }
        }
        Ok(())
    }

    /// Public resolution of a logical data block to its physical page; the
    /// allocation-table verifier walks blocks one at a time.
    pub fn data_block_page(&self, pager: &mut Pager, data_block: u64) -> Result<PageNum> {
        self.data_page(pager, data_block)
    }

    /// Every page belonging to the object except the root: data pages first,
    /// then allocation tables. Used by table deletion and recovery.
    pub fn owned_pages(&self, pager: &mut Pager) -> Result<Vec<PageNum>> {
        let p = pager.page_size() as u64;
        let data_blocks = ceil_div(self.len(), p);
        let mut pages = Vec::new();
        for db in 0..data_blocks {
            pages.push(self.data_page(pager, db)?);
        }
        let two_level = matches!(self.kind, ObjectKind::Data80)
            || (matches!(self.kind, ObjectKind::Data838) && self.fatlevel == 1);
        if two_level {
            pages.extend_from_slice(&self.blocks);
        }
        Ok(pages)
    }

    /// Streams the payload into a file, page-sized chunk at a time.
    pub fn save_to(&self, pager: &mut Pager, path: &Path) -> Result<()> {
        use std::io::Write;
        let mut out = std::fs::File::create(path)?;
        let chunk = pager.page_size() as u64;
        let total = self.len();
        let mut offset = 0_u64;
        while offset < total {
            let span = chunk.min(total - offset);
            let bytes = self.read(pager, offset, span)?;
            out.write_all(&bytes)?;
            offset += span;
        }
        out.sync_all()?;
        Ok(())
    }
}

fn ceil_div(value: u64, divisor: u64) -> u64 {
    if value == 0 {
        0
    } else {
        (value - 1) / divisor + 1
    }
}

fn read_block_array(bytes: &[u8], count: usize) -> Vec<PageNum> {
    (0..count)
        .map(|i| LittleEndian::read_u32(&bytes[i * 4..i * 4 + 4]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::scratch_db;

    #[test]
    fn test_create_and_round_trip() {
        let (_f, mut pager) = scratch_db();
        let mut obj = Object::create(&mut pager, false).unwrap();
        let pattern: Vec<u8> = (0..9000_u32).map(|i| (i % 251) as u8).collect();
        obj.write(&mut pager, 0, &pattern).unwrap();
        assert_eq!(obj.len(), 9000);
        assert_eq!(obj.read(&mut pager, 0, 9000).unwrap(), pattern);
        // 9000 bytes = three data pages through one allocation table.
        assert_eq!(obj.allocation_pages().len(), 1);
        assert_eq!(obj.owned_pages(&mut pager).unwrap().len(), 4);
    }

    #[test]
    fn test_write_at_offset_grows() {
        let (_f, mut pager) = scratch_db();
        let mut obj = Object::create(&mut pager, false).unwrap();
        obj.write(&mut pager, 5000, b"tail").unwrap();
        assert_eq!(obj.len(), 5004);
        // The gap reads back as zeroes.
        assert_eq!(obj.read(&mut pager, 4998, 2).unwrap(), vec![0, 0]);
        assert_eq!(obj.read(&mut pager, 5000, 4).unwrap(), b"tail");
    }

    #[test]
    fn test_read_past_len() {
        let (_f, mut pager) = scratch_db();
        let mut obj = Object::create(&mut pager, false).unwrap();
        obj.write(&mut pager, 0, b"abc").unwrap();
        let err = obj.read(&mut pager, 2, 2).unwrap_err();
        assert!(matches!(err, Error::OutOfBounds(_)));
        assert_eq!(err.detail("object_length"), Some("3"));
    }

    #[test]
    fn test_resize_monotonicity() {
        let (_f, mut pager) = scratch_db();
        let mut obj = Object::create(&mut pager, false).unwrap();
        let pattern: Vec<u8> = (0..6000_u32).map(|i| (i % 17) as u8 + 1).collect();
        obj.write(&mut pager, 0, &pattern).unwrap();
        obj.resize(&mut pager, 2000).unwrap();
        obj.resize(&mut pager, 6000).unwrap();
        assert_eq!(obj.read(&mut pager, 0, 2000).unwrap(), &pattern[..2000]);
    }

    #[test]
    fn test_shrink_releases_pages() {
        let (_f, mut pager) = scratch_db();
        let mut obj = Object::create(&mut pager, false).unwrap();
        obj.resize(&mut pager, 3 * 4096).unwrap();
        assert!(pager.free_list().unwrap().is_empty());
        obj.resize(&mut pager, 0).unwrap();
        // Three data pages and the allocation table went back to the stack.
        assert_eq!(pager.free_list().unwrap().len(), 4);
        let reused = pager.allocate_page().unwrap();
        assert!(reused > 2);
    }

    #[test]
    fn test_version_written_once() {
        let (_f, mut pager) = scratch_db();
        let mut obj = Object::create(&mut pager, false).unwrap();
        obj.write(&mut pager, 0, b"one").unwrap();
        obj.write(&mut pager, 0, b"two").unwrap();
        obj.write(&mut pager, 0, b"three").unwrap();
        let reopened = Object::open(&mut pager, obj.root_page(), false).unwrap();
        assert_eq!(reopened.committed_version(), (1, 0));
        // Staged counter advanced with the later mutations but stayed off
        // disk.
        assert!(obj.staged_version().1 > 0);
    }

    #[test]
    fn test_wide_object_round_trip() {
        let (_f, mut pager) = crate::testutil::scratch_db_wide(4096);
        let mut obj = Object::create(&mut pager, true).unwrap();
        assert_eq!(obj.kind(), ObjectKind::Data838);
        assert_eq!(obj.fatlevel(), 0);
        let payload: Vec<u8> = (0..10_000_u32).map(|i| (i % 13) as u8).collect();
        obj.write(&mut pager, 0, &payload).unwrap();
        assert_eq!(obj.fatlevel(), 0);
        pager.flush().unwrap();
        pager.garbage(true);
        let reopened = Object::open(&mut pager, obj.root_page(), true).unwrap();
        assert_eq!(reopened.len(), 10_000);
        assert_eq!(reopened.read_all(&mut pager).unwrap(), payload);
    }

    #[test]
    fn test_wide_fatlevel_promotion() {
        let (_f, mut pager) = crate::testutil::scratch_db_wide(4096);
        let mut obj = Object::create(&mut pager, true).unwrap();
        let inline_cap = 4096 / 4 - 6;
        // Up to the inline capacity the block array addresses data directly.
        obj.resize(&mut pager, inline_cap * 4096).unwrap();
        assert_eq!(obj.fatlevel(), 0);
        let boundary = inline_cap * 4096 - 2;
        obj.write(&mut pager, boundary, b"ab").unwrap();
        // One more page crosses over into a one-level allocation table.
        obj.resize(&mut pager, (inline_cap + 2) * 4096).unwrap();
        assert_eq!(obj.fatlevel(), 1);
        assert_eq!(obj.allocation_pages().len(), 1);
        assert_eq!(obj.read(&mut pager, boundary, 2).unwrap(), b"ab");
        obj.write(&mut pager, (inline_cap + 1) * 4096, b"tail").unwrap();
        let reopened = Object::open(&mut pager, obj.root_page(), true).unwrap();
        assert_eq!(reopened.fatlevel(), 1);
        assert_eq!(
            reopened.read(&mut pager, (inline_cap + 1) * 4096, 4).unwrap(),
            b"tail"
        );
    }

    #[test]
    fn test_wide_shrink_refused() {
        let (_f, mut pager) = crate::testutil::scratch_db_wide(4096);
        let mut obj = Object::create(&mut pager, true).unwrap();
        obj.resize(&mut pager, 3 * 4096).unwrap();
        let err = obj.resize(&mut pager, 4096).unwrap_err();
        assert!(matches!(err, Error::Unavailable(_)));
        assert_eq!(obj.len(), 3 * 4096);
    }

    #[test]
    fn test_wide_length_over_capacity() {
        let (_f, mut pager) = crate::testutil::scratch_db_wide(4096);
        let mut obj = Object::create(&mut pager, true).unwrap();
        let max = 1024_u64 * (1024 - 6) * 4096;
        let err = obj.resize(&mut pager, max + 1).unwrap_err();
        assert!(matches!(err, Error::CorruptObject(_)));
    }

    #[test]
    fn test_reopen_after_flush() {
        let (_f, mut pager) = scratch_db();
        let mut obj = Object::create(&mut pager, false).unwrap();
        let payload: Vec<u8> = (0..5000_u32).map(|i| (i * 7 % 256) as u8).collect();
        obj.write(&mut pager, 0, &payload).unwrap();
        pager.flush().unwrap();
        pager.garbage(true);
        let reopened = Object::open(&mut pager, obj.root_page(), false).unwrap();
        assert_eq!(reopened.len(), 5000);
        assert_eq!(reopened.read_all(&mut pager).unwrap(), payload);
    }
}
