// storage/src/file/mod.rs

use crate::{Result, StorageError};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Raw byte-addressable persistence. Knows nothing about pages.
pub trait Storage {
    /// Reads up to `buf.len()` bytes at `offset`, returning how many bytes
    /// were available. A short count means the region has never been written.
    fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize>;

    fn write(&mut self, offset: u64, buf: &[u8]) -> Result<()>;

    fn sync(&mut self) -> Result<()>;
}

/// Database file on the local filesystem. Created if it does not exist.
pub struct FileStorage {
    file: File,
    path: PathBuf,
}

impl FileStorage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(StorageError::Io)?;

        log::debug!("opened database file {}", path.display());
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Storage for FileStorage {
    fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(StorageError::Io)?;

        let mut filled = 0;
        while filled < buf.len() {
            match self.file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(StorageError::Io(e)),
            }
        }
        Ok(filled)
    }

    fn write(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(StorageError::Io)?;
        self.file.write_all(buf).map_err(StorageError::Io)
    }

    fn sync(&mut self) -> Result<()> {
        self.file.sync_all().map_err(StorageError::Io)
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    bytes: Vec<u8>,
    writes: usize,
    syncs: usize,
}

/// In-memory backend. Clones share the same bytes, so a test can drop a
/// pager and reopen the "file" with a fresh one.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> Vec<u8> {
        self.inner.lock().bytes.clone()
    }

    /// Overwrites bytes directly, bypassing any pager. Used to simulate
    /// on-disk corruption.
    pub fn poke(&self, offset: usize, bytes: &[u8]) {
        let mut inner = self.inner.lock();
        let end = offset + bytes.len();
        if inner.bytes.len() < end {
            inner.bytes.resize(end, 0);
        }
        inner.bytes[offset..end].copy_from_slice(bytes);
    }

    pub fn write_count(&self) -> usize {
        self.inner.lock().writes
    }

    pub fn sync_count(&self) -> usize {
        self.inner.lock().syncs
    }
}

impl Storage for MemoryStorage {
    fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let inner = self.inner.lock();
        let start = offset as usize;
        if start >= inner.bytes.len() {
            return Ok(0);
        }
        let n = buf.len().min(inner.bytes.len() - start);
        buf[..n].copy_from_slice(&inner.bytes[start..start + n]);
        Ok(n)
    }

    fn write(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        let start = offset as usize;
        let end = start + buf.len();
        if inner.bytes.len() < end {
            inner.bytes.resize(end, 0);
        }
        inner.bytes[start..end].copy_from_slice(buf);
        inner.writes += 1;
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.inner.lock().syncs += 1;
        Ok(())
    }
}
