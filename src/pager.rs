//! Manages pages of an open database file.
//!
//! The pager owns the block device and a bounded in-memory cache of page
//! frames. All page access in the crate goes through here: read-through on
//! `get`, dirty marking on `get_for_write`, write-back in ascending page
//! order on `flush`. Extending the file by one page also mirrors the new
//! page count into the container header on page 0.
//!
//! Pages are numbered from 0 (the container header); page 1 is the free-page
//! object, page 2 the root object. All pages have the same size.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use byteorder::{ByteOrder, LittleEndian};

use crate::device::BlockDevice;
use crate::error::{Error, Result};
use crate::freelist::FreeList;

pub type PageNum = u32;

/// Soft cap on cached bytes; the frame cap is this divided by the page size.
const CACHE_BYTES: usize = 1 << 30;

/// Clean frames untouched for this long are dropped by non-aggressive
/// `garbage` calls.
const FRAME_TTL: Duration = Duration::from_secs(600);

#[derive(Debug)]
struct Frame {
    buf: Vec<u8>,
    dirty: bool,
    last_touched: Instant,
}

pub struct Pager {
    device: BlockDevice,
    page_size: usize,
    page_count: u32,
    frames: BTreeMap<PageNum, Frame>,
    max_frames: usize,
    readonly: bool,
    free: Option<FreeList>,
}

impl Pager {
    pub fn new(device: BlockDevice, page_size: u32, page_count: u32, readonly: bool) -> Pager {
        Pager {
            device,
            page_size: page_size as usize,
            page_count,
            frames: BTreeMap::new(),
            max_frames: (CACHE_BYTES / page_size as usize).max(16),
            readonly,
            free: None,
        }
    }

    /// Overrides the default frame cap; used by tests and memory-constrained
    /// callers.
    pub fn set_max_frames(&mut self, max_frames: usize) {
        self.max_frames = max_frames.max(1);
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    pub fn attach_free_list(&mut self, free: FreeList) {
        self.free = Some(free);
    }

    pub fn free_list(&self) -> Option<&FreeList> {
        self.free.as_ref()
    }

    fn frame(&mut self, page: PageNum, read: bool) -> Result<&mut Frame> {
        if !self.frames.contains_key(&page) {
            let mut buf = vec![0_u8; self.page_size];
            if read {
                self.device
                    .read(page as u64 * self.page_size as u64, &mut buf)?;
            }
            self.frames.insert(
                page,
                Frame {
                    buf,
                    dirty: false,
                    last_touched: Instant::now(),
                },
            );
        }
        let frame = self.frames.get_mut(&page).expect("frame was just inserted");
        frame.last_touched = Instant::now();
        Ok(frame)
    }

    /// Read access to one page.
    pub fn get(&mut self, page: PageNum) -> Result<&[u8]> {
        if page >= self.page_count {
            return Err(Error::out_of_bounds("page read past end of file")
                .with("page", crate::error::hex_u32(page))
                .with("page_count", self.page_count));
        }
        Ok(&self.frame(page, true)?.buf)
    }

    /// Write access to one page; the frame is marked dirty.
    ///
    /// With `read_first == false` a missing frame is not read from the device
    /// first — callers use that for freshly allocated pages and for pages they
    /// overwrite in full. Asking for the page exactly one past the end extends
    /// the file by one page and bumps the page count in the container header.
    pub fn get_for_write(&mut self, page: PageNum, read_first: bool) -> Result<&mut [u8]> {
        if self.readonly {
            return Err(Error::read_only("page write in read-only mode")
                .with("page", crate::error::hex_u32(page)));
        }
        if page > self.page_count {
            return Err(Error::out_of_bounds("page write past end of file")
                .with("page", crate::error::hex_u32(page))
                .with("page_count", self.page_count));
        }
        if page == self.page_count {
            self.page_count += 1;
            let new_size = self.page_count as u64 * self.page_size as u64;
            self.device.set_size(new_size)?;
            let count = self.page_count;
            let header = self.frame(0, true)?;
            LittleEndian::write_u32(&mut header.buf[12..16], count);
            header.dirty = true;
            // The new page starts zeroed; nothing on disk is worth reading.
            let frame = self.frame(page, false)?;
            frame.dirty = true;
            return Ok(&mut self.frames.get_mut(&page).expect("fresh frame").buf);
        }
        let frame = self.frame(page, read_first)?;
        frame.dirty = true;
        Ok(&mut frame.buf)
    }

    /// Drops cached clean frames: stale ones normally, down to the cap when
    /// `aggressive`. Dirty frames always survive.
    pub fn garbage(&mut self, aggressive: bool) {
        if aggressive {
            while self.frames.len() > self.max_frames {
                let victim = self
                    .frames
                    .iter()
                    .filter(|(_, f)| !f.dirty)
                    .min_by_key(|(_, f)| f.last_touched)
                    .map(|(p, _)| *p);
                match victim {
                    Some(page) => {
                        self.frames.remove(&page);
                    }
                    None => break,
                }
            }
        } else {
            let now = Instant::now();
            self.frames
                .retain(|_, f| f.dirty || now.duration_since(f.last_touched) < FRAME_TTL);
        }
    }

    /// Writes every dirty frame back in ascending page order, then syncs the
    /// device. A device error leaves the remaining frames dirty.
    pub fn flush(&mut self) -> Result<()> {
        let Pager {
            device,
            frames,
            page_size,
            ..
        } = self;
        for (&page, frame) in frames.iter_mut() {
            if frame.dirty {
                device.write(page as u64 * *page_size as u64, &frame.buf)?;
                frame.dirty = false;
            }
        }
        device.flush()
    }

    /// Pops a reusable page off the free list, or extends the file.
    pub fn allocate_page(&mut self) -> Result<PageNum> {
        let mut free = self
            .free
            .take()
            .ok_or_else(|| Error::unavailable("free list is not attached"))?;
        let result = free.allocate(self);
        self.free = Some(free);
        result
    }

    /// Pushes `page` onto the free list for reuse.
    pub fn release_page(&mut self, page: PageNum) -> Result<()> {
        let mut free = self
            .free
            .take()
            .ok_or_else(|| Error::unavailable("free list is not attached"))?;
        let result = free.release(self, page);
        self.free = Some(free);
        result
    }
}

impl std::fmt::Debug for Pager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pager")
            .field("page_size", &self.page_size)
            .field("page_count", &self.page_count)
            .field("cached", &self.frames.len())
            .field("readonly", &self.readonly)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::OpenMode;

    fn scratch_pager(pages: u32) -> (tempfile::NamedTempFile, Pager) {
        let f = tempfile::NamedTempFile::new().unwrap();
        let mut dev = BlockDevice::open(f.path(), OpenMode::ReadWriteExclusive).unwrap();
        dev.set_size(pages as u64 * 4096).unwrap();
        (f, Pager::new(dev, 4096, pages, false))
    }

    #[test]
    fn test_round_trip_page() {
        let (_f, mut pager) = scratch_pager(3);
        for read_first in [true, false] {
            let buf = pager.get_for_write(2, read_first).unwrap();
            buf[0..4].copy_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
            pager.flush().unwrap();
            pager.garbage(true);
            assert_eq!(&pager.get(2).unwrap()[0..4], &[0xde, 0xad, 0xbe, 0xef]);
        }
    }

    #[test]
    fn test_extension_updates_header_count() {
        let (_f, mut pager) = scratch_pager(3);
        pager.get_for_write(3, false).unwrap();
        assert_eq!(pager.page_count(), 4);
        assert_eq!(LittleEndian::read_u32(&pager.get(0).unwrap()[12..16]), 4);
    }

    #[test]
    fn test_read_past_end() {
        let (_f, mut pager) = scratch_pager(3);
        assert!(matches!(pager.get(3), Err(Error::OutOfBounds(_))));
        assert!(matches!(
            pager.get_for_write(5, false),
            Err(Error::OutOfBounds(_))
        ));
    }

    #[test]
    fn test_readonly_rejects_writes() {
        let f = tempfile::NamedTempFile::new().unwrap();
        let mut dev = BlockDevice::open(f.path(), OpenMode::ReadWriteExclusive).unwrap();
        dev.set_size(2 * 4096).unwrap();
        let mut pager = Pager::new(dev, 4096, 2, true);
        assert!(matches!(
            pager.get_for_write(1, true),
            Err(Error::ReadOnly(_))
        ));
    }

    #[test]
    fn test_garbage_keeps_dirty_frames() {
        let (_f, mut pager) = scratch_pager(4);
        pager.set_max_frames(1);
        pager.get_for_write(1, true).unwrap()[0] = 1;
        pager.get_for_write(2, true).unwrap()[0] = 2;
        pager.get(3).unwrap();
        pager.garbage(true);
        // Both dirty frames must survive even though the cap is 1.
        pager.flush().unwrap();
        pager.garbage(true);
        assert_eq!(pager.get(1).unwrap()[0], 1);
        assert_eq!(pager.get(2).unwrap()[0], 2);
    }
}
