//! Read/write access to 1CD database files (the single-file paged store
//! used by the 8.0 through 8.3.8 platform family).
//!
//! The layering mirrors the on-disk format:
//!
//! * a [`device::BlockDevice`] owns the locked file,
//! * the [`pager::Pager`] caches whole pages over it and hands out reusable
//!   pages through the [`freelist::FreeList`] rooted at page 1,
//! * an [`object::Object`] is a byte-addressable stream spread over pages
//!   through allocation tables,
//! * a [`table::Table`] composes three objects (records, BLOB heap, index)
//!   under a parsed descriptor,
//! * the [`database::Database`] validates the container header, loads the
//!   root object and exposes the tables by name.
//!
//! System tables shaped like file stores are reassembled by
//! [`catalog::TableFiles`].

// The descriptor dialect is parsed with a pest grammar, see descr.pest.
extern crate pest;
#[macro_use]
extern crate pest_derive;

pub mod blob;
pub mod catalog;
pub mod database;
pub mod descr;
pub mod device;
pub mod error;
pub mod field;
pub mod freelist;
pub mod header;
pub mod index;
pub mod messenger;
pub mod object;
pub mod pager;
pub mod parser;
pub mod record;
pub mod table;
pub mod text;

#[cfg(test)]
pub(crate) mod testutil;

pub use crate::database::{Database, DbRole};
pub use crate::error::{Error, Result};
pub use crate::header::DbVersion;
