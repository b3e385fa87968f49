//! The BLOB heap: variable-length binary values chained through fixed
//! 256-byte slots of a dedicated object.
//!
//! Each slot is `next: u32` (0 terminates the chain), `len: u16` (at most
//! 250), then payload. Slot 0 is reserved: its `next` field heads the list of
//! freed slots, so deletion and reuse thread through the same field as the
//! live chains.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, Result};
use crate::object::Object;
use crate::pager::Pager;

pub const SLOT_LEN: u64 = 256;
pub const SLOT_DATA_LEN: usize = 250;

fn slot_count(obj: &Object) -> Result<u64> {
    let len = obj.len();
    if len % SLOT_LEN != 0 {
        return Err(
            Error::corrupt_blob("blob object length is not a multiple of 0x100")
                .with("object", crate::error::hex_u32(obj.root_page()))
                .with("length", crate::error::hex_u64(len)),
        );
    }
    Ok(len / SLOT_LEN)
}

fn check_slot(obj: &Object, slot: u32, total: u64) -> Result<()> {
    if (slot as u64) >= total {
        return Err(Error::corrupt_blob("blob slot outside the heap")
            .with("object", crate::error::hex_u32(obj.root_page()))
            .with("total_slots", total)
            .with("slot", slot));
    }
    Ok(())
}

/// Reads the chain starting at `start`. With a declared `length` the result
/// must match it exactly; `None` skips the check (used for payloads whose
/// size only the chain knows).
pub fn read_blob(
    obj: &Object,
    pager: &mut Pager,
    start: u32,
    length: Option<u32>,
) -> Result<Vec<u8>> {
    if start == 0 {
        return match length {
            Some(0) | None => Ok(vec![]),
            Some(expected) => Err(Error::corrupt_blob("zero start slot with non-zero length")
                .with("object", crate::error::hex_u32(obj.root_page()))
                .with("length", expected)),
        };
    }
    let total = slot_count(obj)?;
    let mut out: Vec<u8> = vec![];
    let mut visited = 0_u64;
    let mut cur = start;
    while cur != 0 {
        check_slot(obj, cur, total)?;
        let slot = obj.read(pager, cur as u64 * SLOT_LEN, SLOT_LEN)?;
        let next = LittleEndian::read_u32(&slot[0..4]);
        let data_len = LittleEndian::read_u16(&slot[4..6]) as usize;
        if data_len > SLOT_DATA_LEN {
            return Err(Error::corrupt_blob("blob slot reports more than 250 bytes")
                .with("object", crate::error::hex_u32(obj.root_page()))
                .with("slot", cur)
                .with("slot_length", data_len));
        }
        out.extend_from_slice(&slot[6..6 + data_len]);
        visited += 1;
        // The declared length bounds the walk; anything past one extra slot
        // means the chain loops.
        let looping = match length {
            Some(expected) => out.len() > expected as usize + SLOT_DATA_LEN,
            None => visited > total,
        };
        if looping {
            return Err(Error::corrupt_blob("cycle suspected in blob chain")
                .with("object", crate::error::hex_u32(obj.root_page()))
                .with("start", start)
                .with("read", out.len()));
        }
        cur = next;
    }
    if let Some(expected) = length {
        if out.len() != expected as usize {
            return Err(Error::corrupt_blob(
                "blob length in record disagrees with the chain",
            )
            .with("object", crate::error::hex_u32(obj.root_page()))
            .with("expected", expected)
            .with("actual", out.len()));
        }
    }
    Ok(out)
}

/// Reads the head of the freed-slot list out of slot 0.
fn free_head(obj: &Object, pager: &mut Pager) -> Result<u32> {
    if obj.len() == 0 {
        return Ok(0);
    }
    let bytes = obj.read(pager, 0, 4)?;
    Ok(LittleEndian::read_u32(&bytes))
}

fn set_free_head(obj: &mut Object, pager: &mut Pager, head: u32) -> Result<()> {
    let mut bytes = [0_u8; 4];
    LittleEndian::write_u32(&mut bytes, head);
    obj.write(pager, 0, &bytes)
}

/// Takes one writable slot: reuses a freed one when available, otherwise
/// appends to the heap.
fn acquire_slot(obj: &mut Object, pager: &mut Pager) -> Result<u32> {
    if obj.len() == 0 {
        // Bring the reserved slot 0 into existence first.
        obj.resize(pager, SLOT_LEN)?;
    }
    let head = free_head(obj, pager)?;
    if head != 0 {
        let total = slot_count(obj)?;
        check_slot(obj, head, total)?;
        let slot = obj.read(pager, head as u64 * SLOT_LEN, 4)?;
        let next_free = LittleEndian::read_u32(&slot);
        set_free_head(obj, pager, next_free)?;
        return Ok(head);
    }
    let index = (obj.len() / SLOT_LEN) as u32;
    obj.resize(pager, obj.len() + SLOT_LEN)?;
    Ok(index)
}

/// Writes `bytes` as a fresh chain and returns its start slot (0 for empty
/// payloads, matching a `(0, 0)` locator).
pub fn write_blob(obj: &mut Object, pager: &mut Pager, bytes: &[u8]) -> Result<u32> {
    if bytes.is_empty() {
        return Ok(0);
    }
    let chunks: Vec<&[u8]> = bytes.chunks(SLOT_DATA_LEN).collect();
    let mut slots = Vec::with_capacity(chunks.len());
    for _ in 0..chunks.len() {
        slots.push(acquire_slot(obj, pager)?);
    }
    for (i, chunk) in chunks.iter().enumerate() {
        let mut slot = [0_u8; SLOT_LEN as usize];
        let next = slots.get(i + 1).copied().unwrap_or(0);
        LittleEndian::write_u32(&mut slot[0..4], next);
        LittleEndian::write_u16(&mut slot[4..6], chunk.len() as u16);
        slot[6..6 + chunk.len()].copy_from_slice(chunk);
        obj.write(pager, slots[i] as u64 * SLOT_LEN, &slot)?;
    }
    Ok(slots[0])
}

/// Rewrites a chain in place so its start slot stays put: existing slots are
/// overwritten, the chain grows or shrinks at the tail. Used for payloads
/// whose start index is pinned, like the root record at chain 1.
pub fn overwrite_chain(
    obj: &mut Object,
    pager: &mut Pager,
    start: u32,
    bytes: &[u8],
) -> Result<u32> {
    if start == 0 {
        return write_blob(obj, pager, bytes);
    }
    let total = slot_count(obj)?;
    let mut chain = vec![];
    let mut cur = start;
    while cur != 0 {
        check_slot(obj, cur, total)?;
        if chain.len() as u64 > total {
            return Err(Error::corrupt_blob("cycle suspected in blob chain")
                .with("object", crate::error::hex_u32(obj.root_page()))
                .with("start", start));
        }
        chain.push(cur);
        let slot = obj.read(pager, cur as u64 * SLOT_LEN, 4)?;
        cur = LittleEndian::read_u32(&slot);
    }
    let chunks: Vec<&[u8]> = if bytes.is_empty() {
        vec![&bytes[0..0]]
    } else {
        bytes.chunks(SLOT_DATA_LEN).collect()
    };
    let mut slots = chain.clone();
    while slots.len() < chunks.len() {
        slots.push(acquire_slot(obj, pager)?);
    }
    for (i, chunk) in chunks.iter().enumerate() {
        let mut slot = [0_u8; SLOT_LEN as usize];
        let next = if i + 1 < chunks.len() { slots[i + 1] } else { 0 };
        LittleEndian::write_u32(&mut slot[0..4], next);
        LittleEndian::write_u16(&mut slot[4..6], chunk.len() as u16);
        slot[6..6 + chunk.len()].copy_from_slice(chunk);
        obj.write(pager, slots[i] as u64 * SLOT_LEN, &slot)?;
    }
    // Free any surplus slots the old chain still held.
    if chain.len() > chunks.len() {
        let mut head = free_head(obj, pager)?;
        for &index in &chain[chunks.len()..] {
            let mut slot = [0_u8; 6];
            LittleEndian::write_u32(&mut slot[0..4], head);
            obj.write(pager, index as u64 * SLOT_LEN, &slot)?;
            head = index;
        }
        set_free_head(obj, pager, head)?;
    }
    Ok(start)
}

/// Splices every slot of the chain starting at `start` onto the freed list.
pub fn free_blob(obj: &mut Object, pager: &mut Pager, start: u32) -> Result<()> {
    if start == 0 {
        return Ok(());
    }
    let total = slot_count(obj)?;
    let mut chain = vec![];
    let mut cur = start;
    while cur != 0 {
        check_slot(obj, cur, total)?;
        if chain.len() as u64 > total {
            return Err(Error::corrupt_blob("cycle suspected in blob chain")
                .with("object", crate::error::hex_u32(obj.root_page()))
                .with("start", start));
        }
        chain.push(cur);
        let slot = obj.read(pager, cur as u64 * SLOT_LEN, 4)?;
        cur = LittleEndian::read_u32(&slot);
    }
    let mut head = free_head(obj, pager)?;
    for &index in &chain {
        let mut slot = [0_u8; 6];
        LittleEndian::write_u32(&mut slot[0..4], head);
        obj.write(pager, index as u64 * SLOT_LEN, &slot)?;
        head = index;
    }
    set_free_head(obj, pager, head)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::scratch_db;

    #[test]
    fn test_write_read_round_trip() {
        let (_f, mut pager) = scratch_db();
        let mut heap = Object::create(&mut pager, false).unwrap();
        let payload: Vec<u8> = (0..700_u32).map(|i| (i % 256) as u8).collect();
        let start = write_blob(&mut heap, &mut pager, &payload).unwrap();
        assert_ne!(start, 0);
        let back = read_blob(&heap, &mut pager, start, Some(700)).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn test_free_then_write_reuses_slots() {
        let (_f, mut pager) = scratch_db();
        let mut heap = Object::create(&mut pager, false).unwrap();
        let start = write_blob(&mut heap, &mut pager, &[7_u8; 600]).unwrap();
        let len_before = heap.len();
        free_blob(&mut heap, &mut pager, start).unwrap();
        let again = write_blob(&mut heap, &mut pager, &[9_u8; 600]).unwrap();
        assert_eq!(heap.len(), len_before);
        assert_eq!(
            read_blob(&heap, &mut pager, again, Some(600)).unwrap(),
            vec![9_u8; 600]
        );
    }

    #[test]
    fn test_declared_length_mismatch() {
        let (_f, mut pager) = scratch_db();
        let mut heap = Object::create(&mut pager, false).unwrap();
        let start = write_blob(&mut heap, &mut pager, &[1_u8; 300]).unwrap();
        let err = read_blob(&heap, &mut pager, start, Some(301)).unwrap_err();
        assert!(matches!(err, Error::CorruptBlob(_)));
        assert_eq!(err.detail("expected"), Some("301"));
        assert_eq!(err.detail("actual"), Some("300"));
    }

    #[test]
    fn test_zero_start_with_length() {
        let (_f, mut pager) = scratch_db();
        let heap = Object::create(&mut pager, false).unwrap();
        assert!(read_blob(&heap, &mut pager, 0, Some(0)).unwrap().is_empty());
        assert!(matches!(
            read_blob(&heap, &mut pager, 0, Some(5)).unwrap_err(),
            Error::CorruptBlob(_)
        ));
    }

    #[test]
    fn test_cycle_detected() {
        let (_f, mut pager) = scratch_db();
        let mut heap = Object::create(&mut pager, false).unwrap();
        heap.resize(&mut pager, 2 * SLOT_LEN).unwrap();
        // Slot 1 points at itself.
        let mut slot = [0_u8; SLOT_LEN as usize];
        LittleEndian::write_u32(&mut slot[0..4], 1);
        LittleEndian::write_u16(&mut slot[4..6], 250);
        heap.write(&mut pager, SLOT_LEN, &slot).unwrap();
        let err = read_blob(&heap, &mut pager, 1, Some(100)).unwrap_err();
        assert!(matches!(err, Error::CorruptBlob(_)));
    }

    #[test]
    fn test_oversized_slot_length() {
        let (_f, mut pager) = scratch_db();
        let mut heap = Object::create(&mut pager, false).unwrap();
        heap.resize(&mut pager, 2 * SLOT_LEN).unwrap();
        let mut slot = [0_u8; 6];
        LittleEndian::write_u16(&mut slot[4..6], 251);
        heap.write(&mut pager, SLOT_LEN, &slot).unwrap();
        let err = read_blob(&heap, &mut pager, 1, Some(251)).unwrap_err();
        assert_eq!(err.detail("slot_length"), Some("251"));
    }
}
