//! The container header occupies page 0 of the database file.
//!
//! Layout (all integers little-endian):
//!
//! | offset | size | description                                  |
//! |--------|------|----------------------------------------------|
//! | 0      | 8    | signature `"1CDBMSV8"`                       |
//! | 8      | 4    | format version, one byte per component       |
//! | 12     | 4    | total page count                             |
//! | 16     | 4    | reserved                                     |
//! | 20     | 4    | page size (meaningful for 8.3.8 and later)   |

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, Result};

/// Container signature, "1CDBMSV8".
pub const SIG_CONTAINER: &[u8; 8] = b"1CDBMSV8";

/// Page size for every format before 8.3.8.
pub const DEFAULT_PAGE_SIZE: u32 = 4096;

pub const HEADER_LEN: usize = 24;

/// The supported format family. Unrecognized version tags fail `open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DbVersion {
    V8_0_3_0,
    V8_0_5_0,
    V8_1_0_0,
    V8_2_0_0,
    V8_2_14_0,
    V8_3_8_0,
}

impl DbVersion {
    pub fn from_tag(tag: [u8; 4]) -> Option<DbVersion> {
        match tag {
            [8, 0, 3, 0] => Some(DbVersion::V8_0_3_0),
            [8, 0, 5, 0] => Some(DbVersion::V8_0_5_0),
            [8, 1, 0, 0] => Some(DbVersion::V8_1_0_0),
            [8, 2, 0, 0] => Some(DbVersion::V8_2_0_0),
            [8, 2, 14, 0] => Some(DbVersion::V8_2_14_0),
            [8, 3, 8, 0] => Some(DbVersion::V8_3_8_0),
            _ => None,
        }
    }

    pub fn tag(&self) -> [u8; 4] {
        match self {
            DbVersion::V8_0_3_0 => [8, 0, 3, 0],
            DbVersion::V8_0_5_0 => [8, 0, 5, 0],
            DbVersion::V8_1_0_0 => [8, 1, 0, 0],
            DbVersion::V8_2_0_0 => [8, 2, 0, 0],
            DbVersion::V8_2_14_0 => [8, 2, 14, 0],
            DbVersion::V8_3_8_0 => [8, 3, 8, 0],
        }
    }

    /// Wide format: page size from the header, 64-bit object lengths,
    /// `1C FD`/`1C FF` object roots.
    pub fn is_wide(&self) -> bool {
        *self >= DbVersion::V8_3_8_0
    }

    /// The 8.0.x family is only readable; the root record layout differs too.
    pub fn is_8_0(&self) -> bool {
        *self <= DbVersion::V8_0_5_0
    }
}

impl std::fmt::Display for DbVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let [a, b, c, d] = self.tag();
        write!(f, "{}.{}.{}.{}", a, b, c, d)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerHeader {
    pub version: DbVersion,
    /// Total page count, mirrored from the file size.
    pub length: u32,
    pub page_size: u32,
}

impl ContainerHeader {
    pub fn parse(page: &[u8]) -> Result<ContainerHeader> {
        if page.len() < HEADER_LEN {
            return Err(Error::corrupt_header("header page too short").with("length", page.len()));
        }
        if &page[0..8] != SIG_CONTAINER {
            return Err(Error::corrupt_header("signature is not \"1CDBMSV8\"")
                .with("signature", hex::encode(&page[0..8])));
        }
        let tag = [page[8], page[9], page[10], page[11]];
        let version = DbVersion::from_tag(tag).ok_or_else(|| {
            Error::unavailable("unsupported database version").with(
                "version",
                format!("{}.{}.{}.{}", tag[0], tag[1], tag[2], tag[3]),
            )
        })?;
        let length = LittleEndian::read_u32(&page[12..16]);
        let page_size = if version.is_wide() {
            let ps = LittleEndian::read_u32(&page[20..24]);
            if !(4096..=65536).contains(&ps) || !ps.is_power_of_two() {
                return Err(Error::corrupt_header("implausible page size").with("page_size", ps));
            }
            ps
        } else {
            DEFAULT_PAGE_SIZE
        };
        Ok(ContainerHeader {
            version,
            length,
            page_size,
        })
    }

    /// Renders the header into the first bytes of a zeroed page buffer.
    pub fn write(&self, page: &mut [u8]) {
        page[0..8].copy_from_slice(SIG_CONTAINER);
        page[8..12].copy_from_slice(&self.version.tag());
        LittleEndian::write_u32(&mut page[12..16], self.length);
        if self.version.is_wide() {
            LittleEndian::write_u32(&mut page[20..24], self.page_size);
        }
    }
}
