//! Block device: the sole owner of the backing file handle.
//!
//! Opens the database file with an OS lock (exclusive for read-write,
//! shared for read-only) and exposes positioned reads and writes. Everything
//! above this layer works in whole pages through the pager; the device knows
//! nothing about pages.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Shared read lock; writes are rejected.
    ReadShared,
    /// Exclusive lock; the instance is the single writer.
    ReadWriteExclusive,
}

#[derive(Debug)]
pub struct BlockDevice {
    file: File,
    mode: OpenMode,
}

impl BlockDevice {
    pub fn open(path: &Path, mode: OpenMode) -> Result<BlockDevice> {
        let file = OpenOptions::new()
            .read(true)
            .write(mode == OpenMode::ReadWriteExclusive)
            .open(path)
            .map_err(|e| {
                Error::unavailable("cannot open database file")
                    .with("path", path.display())
                    .with("cause", e)
            })?;
        let locked = match mode {
            OpenMode::ReadShared => fs2::FileExt::try_lock_shared(&file),
            OpenMode::ReadWriteExclusive => fs2::FileExt::try_lock_exclusive(&file),
        };
        locked.map_err(|e| {
            Error::unavailable("database file is locked by another process")
                .with("path", path.display())
                .with("cause", e)
        })?;
        Ok(BlockDevice { file, mode })
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// Fully fills `into` from `offset` or fails.
    pub fn read(&mut self, offset: u64, into: &mut [u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(into).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                Error::out_of_bounds("read truncated at end of file")
                    .with("offset", offset)
                    .with("length", into.len())
            } else {
                Error::Io(e)
            }
        })
    }

    /// Writes `bytes` at `offset`, extending the file if needed.
    pub fn write(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(bytes)?;
        Ok(())
    }

    pub fn size(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    pub fn set_size(&mut self, bytes: u64) -> Result<()> {
        self.file.set_len(bytes)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }
}

impl Drop for BlockDevice {
    fn drop(&mut self) {
        // The lock dies with the descriptor anyway; unlocking here keeps the
        // window as small as possible.
        let _ = self.file.unlock();
    }
}
