use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::util::checked_range;
use crate::{DiskError, Result};

/// Byte-addressed file primitives consumed by [`crate::Image`].
///
/// Transfers are all-or-nothing: `read_at`/`write_at` either move exactly `buf.len()` bytes or
/// fail. Short transfers are never surfaced as partial success.
pub trait StorageBackend {
    fn len(&mut self) -> Result<u64>;

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()>;

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<()>;

    fn flush(&mut self) -> Result<()>;

    /// Hint that the data region is expected to be mostly holes.
    ///
    /// Only a hint: no backend in this crate issues an OS sparse request. Unix filesystems leave
    /// unwritten ranges as holes anyway; on Windows the file ends up zero-filled instead of
    /// sparse, which reads back the same but takes the full size on disk.
    fn mark_sparse(&mut self) -> Result<()> {
        Ok(())
    }

    /// Close the handle and remove whatever it was backed by.
    ///
    /// Only called for images that were newly created by a pipeline that then failed.
    fn discard(self) -> Result<()>
    where
        Self: Sized,
    {
        Ok(())
    }
}

/// In-memory backend, mostly useful for tests.
#[derive(Debug, Default, Clone)]
pub struct MemBackend {
    data: Vec<u8>,
}

impl MemBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }
}

impl StorageBackend for MemBackend {
    fn len(&mut self) -> Result<u64> {
        Ok(self.data.len() as u64)
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        checked_range(offset, buf.len(), self.data.len() as u64)?;
        let start = offset as usize;
        buf.copy_from_slice(&self.data[start..start + buf.len()]);
        Ok(())
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        let end = offset
            .checked_add(buf.len() as u64)
            .ok_or(DiskError::OffsetOverflow)?;
        let end: usize = end
            .try_into()
            .map_err(|_| DiskError::Unsupported("backend length exceeds usize"))?;
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[offset as usize..end].copy_from_slice(buf);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// [`StorageBackend`] over a host file.
///
/// Every transfer seeks to the requested offset first, then uses `read_exact`/`write_all`, so a
/// short read or write surfaces as an error rather than a partial transfer.
#[derive(Debug)]
pub struct StdFileBackend {
    file: File,
    path: PathBuf,
    read_only: bool,
}

impl StdFileBackend {
    /// Open an existing file read-only.
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| DiskError::io("open", &display(path), e))?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            read_only: true,
        })
    }

    /// Open an existing file for reading and writing.
    pub fn open_rw(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| DiskError::io("open", &display(path), e))?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            read_only: false,
        })
    }

    /// Exclusively create a new file; fails without touching anything if `path` already exists.
    pub fn create_new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| DiskError::io("open", &display(path), e))?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            read_only: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn into_file(self) -> File {
        self.file
    }

    fn name(&self) -> String {
        display(&self.path)
    }

    fn seek_to(&mut self, offset: u64) -> Result<()> {
        let pos = self
            .file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| DiskError::io("seek", &self.name(), e))?;
        if pos != offset {
            return Err(DiskError::Io(format!(
                "couldn't seek '{}': landed at {pos} instead of {offset}",
                self.name()
            )));
        }
        Ok(())
    }
}

impl StorageBackend for StdFileBackend {
    fn len(&mut self) -> Result<u64> {
        let meta = self
            .file
            .metadata()
            .map_err(|e| DiskError::io("stat", &self.name(), e))?;
        Ok(meta.len())
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        offset
            .checked_add(buf.len() as u64)
            .ok_or(DiskError::OffsetOverflow)?;
        self.seek_to(offset)?;
        self.file
            .read_exact(buf)
            .map_err(|e| DiskError::io("read from", &self.name(), e))
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        if self.read_only {
            return Err(DiskError::Unsupported("read-only backend"));
        }
        offset
            .checked_add(buf.len() as u64)
            .ok_or(DiskError::OffsetOverflow)?;
        self.seek_to(offset)?;
        self.file
            .write_all(buf)
            .map_err(|e| DiskError::io("write to", &self.name(), e))
    }

    fn flush(&mut self) -> Result<()> {
        if self.read_only {
            return Ok(());
        }
        self.file
            .sync_all()
            .map_err(|e| DiskError::io("flush", &self.name(), e))
    }

    fn mark_sparse(&mut self) -> Result<()> {
        if self.read_only {
            return Err(DiskError::Unsupported("read-only backend"));
        }
        tracing::debug!(path = %self.path.display(), "sparse data region");
        Ok(())
    }

    fn discard(self) -> Result<()> {
        let Self { file, path, .. } = self;
        drop(file);
        fs::remove_file(&path).map_err(|e| DiskError::io("clean up", &display(&path), e))
    }
}

fn display(path: &Path) -> String {
    path.display().to_string()
}
