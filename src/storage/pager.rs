use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use log::debug;

use crate::error::{DbError, DbResult};
use crate::storage::page::{Node, PAGE_SIZE};

/// Hard cap on the page cache; also the maximum size of the database.
pub const TABLE_MAX_PAGES: usize = 100;

/// Pager: mediates all page I/O against the single backing file. Pages are
/// decoded into memory on first access and kept resident; `flush` writes
/// every resident page back at its `page_num * PAGE_SIZE` offset. There is
/// no eviction and no dirty tracking.
pub struct Pager {
    file: File,
    /// Pages known to exist, on disk or allocated in memory this session.
    num_pages: u32,
    /// `pages[page_num]` is `Some` once that page has been materialised.
    pages: Vec<Option<Box<Node>>>,
}

impl Pager {
    /// Open (or create) the backing file. `num_pages` starts at
    /// `file_length / PAGE_SIZE`.
    pub fn open(path: &Path) -> DbResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        let file_length = file.metadata()?.len();
        let num_pages = (file_length / PAGE_SIZE as u64) as u32;

        Ok(Pager {
            file,
            num_pages,
            pages: Vec::new(),
        })
    }

    /// Fetch the page at `page_num`. A page already in the cache is
    /// returned as-is; a page that exists on disk is read and decoded; a
    /// page past the end is either materialised as a fresh empty leaf
    /// (`create_if_missing`) or reported absent as `Ok(None)`.
    pub fn get_page(
        &mut self,
        page_num: u32,
        create_if_missing: bool,
    ) -> DbResult<Option<&mut Node>> {
        let idx = page_num as usize;
        if idx >= TABLE_MAX_PAGES {
            return Err(DbError::TableFull);
        }
        if self.pages.len() <= idx {
            self.pages.resize_with(idx + 1, || None);
        }

        if self.pages[idx].is_none() {
            if page_num < self.num_pages {
                // Known page missing from the cache: it is on disk from a
                // previous session. A short read here means the file was
                // truncated underneath us.
                let mut buf = [0u8; PAGE_SIZE];
                self.file
                    .seek(SeekFrom::Start(page_num as u64 * PAGE_SIZE as u64))?;
                if let Err(e) = self.file.read_exact(&mut buf) {
                    if e.kind() == io::ErrorKind::UnexpectedEof {
                        panic!("page {page_num} is truncated on disk");
                    }
                    return Err(e.into());
                }
                debug!("page {} loaded from disk", page_num);
                self.pages[idx] = Some(Box::new(Node::decode(&buf)));
            } else if create_if_missing {
                self.pages[idx] = Some(Box::new(Node::new_leaf(page_num, page_num == 0)));
                self.num_pages = self.num_pages.max(page_num + 1);
            } else {
                return Ok(None);
            }
        }

        Ok(self.pages[idx].as_deref_mut())
    }

    /// The next free page index.
    pub fn get_new_page_num(&self) -> u32 {
        self.num_pages
    }

    pub fn num_pages(&self) -> u32 {
        self.num_pages
    }

    /// Write every resident page back to the file, then fsync once.
    pub fn flush(&mut self) -> DbResult<()> {
        let mut written = 0;
        for idx in 0..self.pages.len() {
            let Some(node) = &self.pages[idx] else {
                continue;
            };
            let buf = node.encode();
            self.file
                .seek(SeekFrom::Start(idx as u64 * PAGE_SIZE as u64))?;
            let n = self.file.write(&buf)?;
            if n != PAGE_SIZE {
                return Err(DbError::WriteFailed);
            }
            written += 1;
        }
        self.file.sync_all()?;
        debug!("flushed {} pages", written);
        Ok(())
    }
}
