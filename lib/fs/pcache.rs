//! Write-back page cache for regular files.
//!
//! Pages are filled from the backend on first touch and written back by
//! [`PageCache::commit_all`], which runs on close, fsync and inode reclamation.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use bytes::BytesMut;

use crate::sync::{Arc, Mutex};

use super::error::{VfsError, VfsResult};
use super::inode::Inode;

struct Page {
    data: BytesMut,
    dirty: bool,
}

/// Cached pages of one inode.
pub struct PageCache {
    page_size: usize,
    pages: Mutex<BTreeMap<u64, Page>>,
}

impl std::fmt::Debug for PageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageCache")
            .field("page_size", &self.page_size)
            .field("pages", &self.pages.lock().len())
            .finish()
    }
}

impl PageCache {
    /// Creates an empty cache of `page_size`-byte pages.
    #[must_use]
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            pages: Mutex::new(BTreeMap::new()),
        }
    }

    fn page_len(&self) -> u64 {
        self.page_size as u64
    }

    /// Read into `buf` at `offset`, clipped to the inode size.
    pub fn read(&self, inode: &Arc<Inode>, buf: &mut [u8], offset: u64) -> VfsResult<usize> {
        let size = inode.size();
        if offset >= size {
            return Ok(0);
        }
        let len = usize::try_from(size - offset).map_or(buf.len(), |rem| rem.min(buf.len()));

        let mut pages = self.pages.lock();
        let mut done = 0;
        while done < len {
            let pos = offset + done as u64;
            let within = usize::try_from(pos % self.page_len()).unwrap_or_default();
            let page = self.load(&mut pages, inode, pos / self.page_len())?;
            let n = (self.page_size - within).min(len - done);
            buf[done..done + n].copy_from_slice(&page.data[within..within + n]);
            done += n;
        }
        Ok(done)
    }

    /// Copy `buf` into the cache at `offset`, growing the inode size as needed.
    pub fn write(&self, inode: &Arc<Inode>, buf: &[u8], offset: u64) -> VfsResult<usize> {
        let mut pages = self.pages.lock();
        let mut done = 0;
        while done < buf.len() {
            let pos = offset + done as u64;
            let within = usize::try_from(pos % self.page_len()).unwrap_or_default();
            let page = self.load(&mut pages, inode, pos / self.page_len())?;
            let n = (self.page_size - within).min(buf.len() - done);
            page.data[within..within + n].copy_from_slice(&buf[done..done + n]);
            page.dirty = true;
            done += n;
        }
        inode.extend_size(offset + done as u64);
        Ok(done)
    }

    /// Write every dirty page back through the inode's file operations.
    pub fn commit_all(&self, inode: &Arc<Inode>) -> VfsResult<()> {
        let size = inode.size();
        let mut pages = self.pages.lock();
        for (index, page) in pages.iter_mut().filter(|(_, page)| page.dirty) {
            let start = index * self.page_len();
            if start < size {
                let len = usize::try_from(size - start)
                    .map_or(self.page_size, |rem| rem.min(self.page_size));
                let mut written = 0;
                while written < len {
                    let n = inode.fops().write(
                        inode,
                        &page.data[written..len],
                        start + written as u64,
                    )?;
                    if n == 0 {
                        return Err(VfsError::Backend(libc::EIO));
                    }
                    written += n;
                }
            }
            page.dirty = false;
        }
        Ok(())
    }

    /// Number of pages not yet written back.
    #[must_use]
    pub fn dirty_pages(&self) -> usize {
        self.pages.lock().values().filter(|p| p.dirty).count()
    }

    /// Drop every cached page, dirty or not.
    pub fn release(&self) {
        self.pages.lock().clear();
    }

    fn load<'a>(
        &self,
        pages: &'a mut BTreeMap<u64, Page>,
        inode: &Arc<Inode>,
        index: u64,
    ) -> VfsResult<&'a mut Page> {
        match pages.entry(index) {
            Entry::Occupied(page) => Ok(page.into_mut()),
            Entry::Vacant(slot) => {
                let mut data = BytesMut::zeroed(self.page_size);
                let start = index * self.page_len();
                let mut filled = 0;
                while filled < self.page_size {
                    let n = inode
                        .fops()
                        .read(inode, &mut data[filled..], start + filled as u64)?;
                    if n == 0 {
                        break;
                    }
                    filled += n;
                }
                Ok(slot.insert(Page { data, dirty: false }))
            }
        }
    }
}
