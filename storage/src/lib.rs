//! Storage engine for minidb
//!
//! This crate provides the low-level storage primitives: a byte-addressable
//! storage backend, a fixed-size page cache with write-back flushing, the
//! record codec, and a B-tree keyed by 64-bit row ids.

pub mod btree;
pub mod file;
pub mod page;
pub mod pager;
pub mod record;
pub mod varint;

pub use btree::{BTree, Cursor, MAX_PAYLOAD_SIZE};
pub use file::{FileStorage, MemoryStorage, Storage};
pub use minidb_core::{PageNo, Value};
pub use page::{FileHeader, Page, HEADER_PAGE, PAGE_SIZE};
pub use pager::Pager;
pub use record::{decode_record, encode_record};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Page {0} not found")]
    PageNotFound(PageNo),

    #[error("Page {0} is full")]
    PageFull(PageNo),

    #[error("Invalid page number {0}")]
    InvalidPage(PageNo),

    #[error("Payload of {size} bytes exceeds the limit of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Checksum mismatch for page {0}")]
    ChecksumMismatch(PageNo),

    #[error("Invalid database header: {0}")]
    InvalidHeader(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Corrupt page {page}: {reason}")]
    Corrupt { page: PageNo, reason: String },
}

pub type Result<T> = std::result::Result<T, StorageError>;
