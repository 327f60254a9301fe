use crate::{PageNo, Result, StorageError};

pub const PAGE_SIZE: usize = 4096;

/// Page 1 holds the file header; B-tree pages start at 2.
pub const HEADER_PAGE: PageNo = 1;

/// Magic number to identify our database files
const DB_MAGIC: [u8; 4] = *b"MDB1";

const FILE_VERSION: u32 = 1;

pub const FILE_HEADER_SIZE: usize = 24;

/// Layout of the first bytes of page 1. The first two fields sit at fixed
/// offsets 0 and 4; everything after them is identification and integrity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    pub next_pgno: PageNo,   // offset 0: next page `alloc` hands out
    pub schema_root: PageNo, // offset 4: root of the schema table, 0 = none
    magic: [u8; 4],          // offset 8
    version: u32,            // offset 12
    page_size: u32,          // offset 16
    checksum: u32,           // offset 20: CRC32 of bytes 0..20
}

impl Default for FileHeader {
    fn default() -> Self {
        Self::new()
    }
}

impl FileHeader {
    pub fn new() -> Self {
        let mut header = Self {
            next_pgno: HEADER_PAGE + 1,
            schema_root: 0,
            magic: DB_MAGIC,
            version: FILE_VERSION,
            page_size: PAGE_SIZE as u32,
            checksum: 0,
        };
        header.update_checksum();
        header
    }

    /// True when the header region has never been written.
    pub fn is_blank(bytes: &[u8]) -> bool {
        bytes[..FILE_HEADER_SIZE].iter().all(|&b| b == 0)
    }

    fn validate(&self) -> Result<()> {
        if self.magic != DB_MAGIC {
            return Err(StorageError::InvalidHeader(
                "wrong magic number".to_string(),
            ));
        }

        if self.version > FILE_VERSION {
            return Err(StorageError::InvalidHeader(format!(
                "unsupported file version {}",
                self.version
            )));
        }

        if self.page_size != PAGE_SIZE as u32 {
            return Err(StorageError::InvalidHeader(format!(
                "expected page size {}, got {}",
                PAGE_SIZE, self.page_size
            )));
        }

        if self.next_pgno <= HEADER_PAGE {
            return Err(StorageError::InvalidHeader(format!(
                "allocation frontier {} overlaps the header page",
                self.next_pgno
            )));
        }

        Ok(())
    }

    pub fn to_bytes(&self) -> [u8; FILE_HEADER_SIZE] {
        let mut bytes = [0u8; FILE_HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.next_pgno.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.schema_root.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.magic);
        bytes[12..16].copy_from_slice(&self.version.to_le_bytes());
        bytes[16..20].copy_from_slice(&self.page_size.to_le_bytes());
        bytes[20..24].copy_from_slice(&self.checksum.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < FILE_HEADER_SIZE {
            return Err(StorageError::InvalidHeader(
                "header region too short".to_string(),
            ));
        }

        let word = |at: usize| {
            u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
        };
        let header = Self {
            next_pgno: word(0),
            schema_root: word(4),
            magic: [bytes[8], bytes[9], bytes[10], bytes[11]],
            version: word(12),
            page_size: word(16),
            checksum: word(20),
        };

        if !header.verify_checksum() {
            return Err(StorageError::ChecksumMismatch(HEADER_PAGE));
        }
        header.validate()?;
        Ok(header)
    }

    fn compute_checksum(&self) -> u32 {
        let bytes = self.to_bytes();
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&bytes[0..20]); // Everything before the checksum field
        hasher.finalize()
    }

    pub fn update_checksum(&mut self) {
        self.checksum = self.compute_checksum();
    }

    pub fn verify_checksum(&self) -> bool {
        self.compute_checksum() == self.checksum
    }
}

/// One cached 4096-byte block.
pub struct Page {
    pgno: PageNo,
    data: Box<[u8; PAGE_SIZE]>,
    dirty: bool,
}

impl Page {
    pub fn new(pgno: PageNo) -> Self {
        Self {
            pgno,
            data: Box::new([0; PAGE_SIZE]),
            dirty: false,
        }
    }

    pub fn pgno(&self) -> PageNo {
        self.pgno
    }

    pub fn data(&self) -> &[u8; PAGE_SIZE] {
        &self.data
    }

    /// Mutable view of the image. Callers must `mark_dirty` for the change
    /// to reach the backend.
    pub fn data_mut(&mut self) -> &mut [u8; PAGE_SIZE] {
        &mut self.data
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    /// Byte offset of this page in the backend.
    pub fn offset(&self) -> u64 {
        (self.pgno as u64 - 1) * PAGE_SIZE as u64
    }
}
