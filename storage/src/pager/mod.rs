//! Write-back page cache over a [`Storage`] backend.
//!
//! Pages are loaded on first access and stay resident until the pager is
//! dropped. Nothing reaches the backend until [`Pager::flush`].

use crate::file::Storage;
use crate::page::{FileHeader, Page, FILE_HEADER_SIZE, HEADER_PAGE, PAGE_SIZE};
use crate::{PageNo, Result, StorageError};
use std::collections::HashMap;

pub struct Pager {
    storage: Box<dyn Storage>,
    cache: HashMap<PageNo, Page>,
    header: FileHeader,
}

impl Pager {
    /// Opens a pager over `storage`, validating the header page or
    /// initializing it when the backend is empty.
    pub fn new(storage: Box<dyn Storage>) -> Result<Self> {
        let mut pager = Self {
            storage,
            cache: HashMap::new(),
            header: FileHeader::new(),
        };

        let page = pager.load(HEADER_PAGE)?;
        let blank = FileHeader::is_blank(page.data());
        let existing = if blank {
            None
        } else {
            Some(FileHeader::from_bytes(&page.data()[..FILE_HEADER_SIZE])?)
        };
        pager.cache.insert(HEADER_PAGE, page);

        match existing {
            Some(header) => {
                log::debug!(
                    "opened database: next page {}, schema root {}",
                    header.next_pgno,
                    header.schema_root
                );
                pager.header = header;
            }
            None => {
                log::warn!("empty backend, initializing a new database header");
                pager.write_header()?;
            }
        }

        Ok(pager)
    }

    fn load(&mut self, pgno: PageNo) -> Result<Page> {
        let mut page = Page::new(pgno);
        let offset = page.offset();
        let read = self.storage.read(offset, page.data_mut())?;
        if read < PAGE_SIZE {
            // Never written (or the file ends mid-page): the rest stays zero.
            page.data_mut()[read..].fill(0);
        }
        log::trace!("loaded page {} ({} bytes from backend)", pgno, read);
        Ok(page)
    }

    /// Returns the in-memory image of `pgno`, reading it from the backend
    /// on first access.
    pub fn get(&mut self, pgno: PageNo) -> Result<&mut Page> {
        if pgno == 0 {
            return Err(StorageError::InvalidPage(pgno));
        }
        let frontier = pgno.checked_add(1).ok_or(StorageError::InvalidPage(pgno))?;

        if !self.cache.contains_key(&pgno) {
            let page = self.load(pgno)?;
            self.cache.insert(pgno, page);
        }

        if frontier > self.header.next_pgno {
            self.header.next_pgno = frontier;
            self.write_header()?;
        }

        self.cache
            .get_mut(&pgno)
            .ok_or(StorageError::PageNotFound(pgno))
    }

    /// Hands out a fresh, zeroed page. Page numbers are never reused.
    pub fn alloc(&mut self) -> Result<PageNo> {
        let pgno = self.header.next_pgno;
        self.header.next_pgno = pgno
            .checked_add(1)
            .ok_or(StorageError::InvalidPage(pgno))?;

        let mut page = Page::new(pgno);
        page.mark_dirty();
        self.cache.insert(pgno, page);
        self.write_header()?;

        log::trace!("allocated page {}", pgno);
        Ok(pgno)
    }

    pub fn mark_dirty(&mut self, pgno: PageNo) -> Result<()> {
        self.get(pgno)?.mark_dirty();
        Ok(())
    }

    /// Writes every dirty page back and syncs the backend.
    pub fn flush(&mut self) -> Result<()> {
        let mut dirty: Vec<&mut Page> = self
            .cache
            .values_mut()
            .filter(|page| page.is_dirty())
            .collect();
        dirty.sort_by_key(|page| page.pgno());

        let count = dirty.len();
        for page in dirty {
            self.storage.write(page.offset(), page.data())?;
            page.clear_dirty();
        }
        self.storage.sync()?;

        log::debug!("flushed {} dirty pages", count);
        Ok(())
    }

    pub fn schema_root(&self) -> PageNo {
        self.header.schema_root
    }

    pub fn set_schema_root(&mut self, root: PageNo) -> Result<()> {
        self.header.schema_root = root;
        self.write_header()
    }

    /// Number of pages in use, header page included.
    pub fn page_count(&self) -> u32 {
        self.header.next_pgno - 1
    }

    pub fn dirty_count(&self) -> usize {
        self.cache.values().filter(|page| page.is_dirty()).count()
    }

    fn write_header(&mut self) -> Result<()> {
        self.header.update_checksum();
        let bytes = self.header.to_bytes();

        let page = self
            .cache
            .get_mut(&HEADER_PAGE)
            .ok_or(StorageError::PageNotFound(HEADER_PAGE))?;
        page.data_mut()[..FILE_HEADER_SIZE].copy_from_slice(&bytes);
        page.mark_dirty();
        Ok(())
    }
}
