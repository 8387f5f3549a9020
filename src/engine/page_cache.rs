use crate::engine::disk::DiskService;
use crate::engine::pages::{BasePage, HeaderPage, NO_PAGE, Page, load_page};
use crate::engine::{MIN_USEFUL_FREE_BYTES, PageBuffer, PageBufferArray};
use crate::{Error, Result};
use std::collections::BTreeMap;

/// A loaded page plus its pre-image: the bytes this page had on disk when
/// it was last read (or committed). The pre-image makes rollback cheap and
/// lets commit skip pages that were touched but not actually changed.
struct CachedPage {
    page: Box<dyn Page>,
    origin: Box<PageBufferArray>,
}

/// In-memory map of loaded pages plus the page allocator: the empty-page
/// pool and the free-space-ordered lists live here.
///
/// All disk access goes through [`DiskService`] passed per call; the cache
/// owns every loaded buffer (references into it never escape the engine).
pub(crate) struct PageCache {
    pages: BTreeMap<u32, CachedPage>,
    cache_size: usize,
}

impl PageCache {
    pub fn new(cache_size: usize) -> Self {
        PageCache {
            pages: BTreeMap::new(),
            cache_size: cache_size.max(16),
        }
    }

    fn load(&mut self, disk: &mut DiskService, page_id: u32) -> Result<&mut CachedPage> {
        if !self.pages.contains_key(&page_id) {
            let buffer = disk.read_page(page_id)?;
            let origin = Box::new(*buffer.buffer());
            let page = load_page(buffer)?;

            self.pages.insert(page_id, CachedPage { page, origin });
        }

        Ok(self.pages.get_mut(&page_id).unwrap())
    }

    pub fn get<T: Page>(&mut self, disk: &mut DiskService, page_id: u32) -> Result<&T> {
        let cached = self.load(disk, page_id)?;

        cached.page.downcast_ref::<T>().ok_or_else(|| {
            Error::invalid_page_type(page_id, T::page_type(), cached.page.base().page_type())
        })
    }

    pub fn get_mut<T: Page>(&mut self, disk: &mut DiskService, page_id: u32) -> Result<&mut T> {
        let cached = self.load(disk, page_id)?;

        let found = cached.page.base().page_type();
        match cached.page.downcast_mut::<T>() {
            Some(page) => {
                page.base_mut().set_dirty();
                Ok(page)
            }
            None => Err(Error::invalid_page_type(page_id, T::page_type(), found)),
        }
    }

    /// Header-field access for any page type (free-list walks, chains).
    pub fn get_base(&mut self, disk: &mut DiskService, page_id: u32) -> Result<&BasePage> {
        Ok(self.load(disk, page_id)?.page.base())
    }

    pub fn get_base_mut(&mut self, disk: &mut DiskService, page_id: u32) -> Result<&mut BasePage> {
        let base = self.load(disk, page_id)?.page.base_mut();
        base.set_dirty();
        Ok(base)
    }

    pub fn header(&mut self, disk: &mut DiskService) -> Result<&HeaderPage> {
        self.get::<HeaderPage>(disk, 0)
    }

    pub fn header_mut(&mut self, disk: &mut DiskService) -> Result<&mut HeaderPage> {
        self.get_mut::<HeaderPage>(disk, 0)
    }

    /// Installs a brand-new header page; only valid on a fresh datafile.
    pub fn create_header(&mut self) -> &mut HeaderPage {
        let header = HeaderPage::new(PageBuffer::new());
        self.pages.insert(
            0,
            CachedPage {
                page: Box::new(header),
                origin: Box::new([0; crate::engine::PAGE_SIZE]),
            },
        );

        self.pages
            .get_mut(&0)
            .unwrap()
            .page
            .downcast_mut::<HeaderPage>()
            .unwrap()
    }
}

// allocation
impl PageCache {
    /// Allocates a page: reuses the head of the empty-page pool when there
    /// is one, otherwise extends the datafile high-water mark. The reused
    /// page's last-read bytes stay behind as the new page's pre-image so a
    /// rollback restores them.
    pub fn new_page<T: Page>(
        &mut self,
        disk: &mut DiskService,
        prev_page_id: Option<u32>,
    ) -> Result<u32> {
        let free_empty = self.header(disk)?.free_empty_page_id();

        let (page_id, origin) = if free_empty != NO_PAGE {
            let page_id = free_empty;

            // unlink the pool head
            let next_empty = self.get_base(disk, page_id)?.next_page_id();
            if next_empty != NO_PAGE {
                self.get_base_mut(disk, next_empty)?
                    .set_prev_page_id(NO_PAGE);
            }
            self.header_mut(disk)?.set_free_empty_page_id(next_empty);

            let origin = self
                .pages
                .remove(&page_id)
                .map(|cached| cached.origin)
                .expect("reused page was just loaded");

            (page_id, origin)
        } else {
            let header = self.header_mut(disk)?;
            let page_id = header.last_page_id() + 1;
            header.set_last_page_id(page_id);

            (page_id, Box::new([0; crate::engine::PAGE_SIZE]))
        };

        let mut page = T::new(PageBuffer::new(), page_id);
        page.base_mut().set_dirty();

        if let Some(prev_page_id) = prev_page_id {
            self.get_base_mut(disk, prev_page_id)?
                .set_next_page_id(page_id);
            page.base_mut().set_prev_page_id(prev_page_id);
        }

        log::trace!("allocated page {page_id} as {}", T::page_type());

        self.pages.insert(
            page_id,
            CachedPage {
                page: Box::new(page),
                origin,
            },
        );

        Ok(page_id)
    }

    /// Turns the page (and optionally its whole `next` chain) into empty
    /// pages linked onto the pool.
    pub fn delete_page(
        &mut self,
        disk: &mut DiskService,
        page_id: u32,
        cascade_next: bool,
    ) -> Result<()> {
        let mut chain = vec![page_id];
        if cascade_next {
            let mut next = self.get_base(disk, page_id)?.next_page_id();
            while next != NO_PAGE {
                chain.push(next);
                next = self.get_base(disk, next)?.next_page_id();
            }
        }

        for page_id in chain {
            // the old content is gone; the pre-image stays for rollback
            self.load(disk, page_id)?;
            let cached = self.pages.remove(&page_id).unwrap();
            let mut base = cached.page.into_base();
            base.mark_as_empty();

            let old_head = self.header(disk)?.free_empty_page_id();
            base.set_next_page_id(old_head);

            self.pages.insert(
                page_id,
                CachedPage {
                    page: Box::new(base),
                    origin: cached.origin,
                },
            );

            if old_head != NO_PAGE {
                self.get_base_mut(disk, old_head)?.set_prev_page_id(page_id);
            }
            self.header_mut(disk)?.set_free_empty_page_id(page_id);

            log::trace!("freed page {page_id}");
        }

        Ok(())
    }

    /// Returns a page with at least `needed_bytes` free: the free list's
    /// head when it is big enough (the list is ordered by free bytes
    /// descending, so checking the head suffices), else a fresh page.
    pub fn get_free<T: Page>(
        &mut self,
        disk: &mut DiskService,
        list_head: u32,
        needed_bytes: usize,
    ) -> Result<u32> {
        if list_head != NO_PAGE {
            let head = self.get_base(disk, list_head)?;
            if head.free_bytes() >= needed_bytes {
                return Ok(list_head);
            }
        }

        self.new_page::<T>(disk, None)
    }

    /// Re-ranks `page_id` within the free list anchored at `head`,
    /// removing and/or re-inserting it to keep the free-bytes-descending
    /// invariant. Returns the new head.
    pub fn update_free_list(
        &mut self,
        disk: &mut DiskService,
        page_id: u32,
        head: u32,
    ) -> Result<u32> {
        let page = self.get_base(disk, page_id)?;
        let free_bytes = page.free_bytes();
        let on_list =
            head == page_id || page.prev_page_id() != NO_PAGE || page.next_page_id() != NO_PAGE;

        let mut head = head;
        if on_list {
            head = self.unlink_from_free_list(disk, page_id, head)?;
        }

        if free_bytes >= MIN_USEFUL_FREE_BYTES && self.get_base(disk, page_id)?.items_count() > 0
        {
            head = self.link_into_free_list(disk, page_id, head, free_bytes)?;
        }

        Ok(head)
    }

    fn unlink_from_free_list(
        &mut self,
        disk: &mut DiskService,
        page_id: u32,
        head: u32,
    ) -> Result<u32> {
        let page = self.get_base(disk, page_id)?;
        let prev = page.prev_page_id();
        let next = page.next_page_id();

        if prev != NO_PAGE {
            self.get_base_mut(disk, prev)?.set_next_page_id(next);
        }
        if next != NO_PAGE {
            self.get_base_mut(disk, next)?.set_prev_page_id(prev);
        }

        let page = self.get_base_mut(disk, page_id)?;
        page.set_prev_page_id(NO_PAGE);
        page.set_next_page_id(NO_PAGE);

        Ok(if head == page_id { next } else { head })
    }

    fn link_into_free_list(
        &mut self,
        disk: &mut DiskService,
        page_id: u32,
        head: u32,
        free_bytes: usize,
    ) -> Result<u32> {
        // walk until the first page with less free space and splice before it
        let mut prev = NO_PAGE;
        let mut current = head;

        while current != NO_PAGE {
            let current_page = self.get_base(disk, current)?;
            if current_page.free_bytes() <= free_bytes {
                break;
            }
            prev = current;
            current = current_page.next_page_id();
        }

        let page = self.get_base_mut(disk, page_id)?;
        page.set_prev_page_id(prev);
        page.set_next_page_id(current);

        if prev != NO_PAGE {
            self.get_base_mut(disk, prev)?.set_next_page_id(page_id);
        }
        if current != NO_PAGE {
            self.get_base_mut(disk, current)?.set_prev_page_id(page_id);
        }

        Ok(if prev == NO_PAGE { page_id } else { head })
    }
}

// dirty tracking for the transaction service
impl PageCache {
    pub fn dirty_ids(&self) -> Vec<u32> {
        self.pages
            .iter()
            .filter(|(_, cached)| cached.page.base().is_dirty())
            .map(|(&page_id, _)| page_id)
            .collect()
    }

    pub fn has_dirty(&self) -> bool {
        self.pages.values().any(|cached| cached.page.base().is_dirty())
    }

    /// Serializes a dirty page and reports whether its bytes actually
    /// differ from the pre-image (an unchanged page needs no journal write).
    pub fn serialize_page(&mut self, page_id: u32) -> (&PageBufferArray, bool) {
        let cached = self.pages.get_mut(&page_id).expect("dirty page is cached");
        let buffer = cached.page.update_buffer().buffer();
        let changed = buffer != &*cached.origin;
        (buffer, changed)
    }

    /// Marks a page clean after its bytes reached the datafile; the current
    /// image becomes the new pre-image.
    pub fn mark_committed(&mut self, page_id: u32) {
        let cached = self.pages.get_mut(&page_id).expect("dirty page is cached");
        *cached.origin = *cached.page.update_buffer().buffer();
        cached.page.base_mut().clear_dirty();
    }

    /// Drops every dirty page; the next access re-reads pre-transaction
    /// bytes from disk.
    pub fn discard_dirty(&mut self) {
        self.pages.retain(|_, cached| !cached.page.base().is_dirty());
    }

    /// Full invalidation (dirty-read avoidance / explicit clear).
    pub fn clear(&mut self) {
        debug_assert!(!self.has_dirty(), "clearing a cache with dirty pages");
        self.pages.clear();
    }

    /// Soft-cap enforcement: drops clean pages (highest ids first, header
    /// excepted) until the cache fits.
    pub fn trim(&mut self) {
        if self.pages.len() <= self.cache_size {
            return;
        }

        let evictable: Vec<u32> = self
            .pages
            .iter()
            .rev()
            .filter(|&(&id, cached)| id != 0 && !cached.page.base().is_dirty())
            .map(|(&id, _)| id)
            .collect();

        let excess = self.pages.len().saturating_sub(self.cache_size);
        for page_id in evictable.into_iter().take(excess) {
            self.pages.remove(&page_id);
        }
    }

    #[cfg(test)]
    pub fn cached_count(&self) -> usize {
        self.pages.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::pages::{DataPage, PageType};

    fn setup() -> (DiskService, PageCache, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let (mut disk, _) = DiskService::open(&dir.path().join("test.db"), false, 0).unwrap();
        let mut cache = PageCache::new(100);
        cache.create_header();

        // persist the header so reloads see a valid page 0
        let (buffer, _) = cache.serialize_page(0);
        let buffer = *buffer;
        disk.write_page(0, &buffer).unwrap();
        cache.mark_committed(0);

        (disk, cache, dir)
    }

    #[test]
    fn new_pages_bump_high_water() {
        let (mut disk, mut cache, _dir) = setup();

        let a = cache.new_page::<DataPage>(&mut disk, None).unwrap();
        let b = cache.new_page::<DataPage>(&mut disk, None).unwrap();

        assert_eq!((a, b), (1, 2));
        assert_eq!(cache.header(&mut disk).unwrap().last_page_id(), 2);
    }

    #[test]
    fn deleted_pages_are_reused() {
        let (mut disk, mut cache, _dir) = setup();

        let a = cache.new_page::<DataPage>(&mut disk, None).unwrap();
        let b = cache.new_page::<DataPage>(&mut disk, None).unwrap();

        cache.delete_page(&mut disk, a, false).unwrap();
        cache.delete_page(&mut disk, b, false).unwrap();

        // LIFO reuse from the pool, no high-water growth
        let c = cache.new_page::<DataPage>(&mut disk, None).unwrap();
        let d = cache.new_page::<DataPage>(&mut disk, None).unwrap();

        assert_eq!((c, d), (b, a));
        assert_eq!(cache.header(&mut disk).unwrap().last_page_id(), 2);
        assert_eq!(cache.header(&mut disk).unwrap().free_empty_page_id(), NO_PAGE);
    }

    #[test]
    fn delete_page_cascades_through_chain() {
        let (mut disk, mut cache, _dir) = setup();

        let a = cache.new_page::<DataPage>(&mut disk, None).unwrap();
        let b = cache.new_page::<DataPage>(&mut disk, Some(a)).unwrap();
        let _c = cache.new_page::<DataPage>(&mut disk, Some(b)).unwrap();

        cache.delete_page(&mut disk, a, true).unwrap();

        for page_id in 1..=3 {
            assert_eq!(
                cache.get_base(&mut disk, page_id).unwrap().page_type(),
                PageType::Empty
            );
        }
    }

    #[test]
    fn free_list_keeps_descending_order() {
        let (mut disk, mut cache, _dir) = setup();

        let mut ids = Vec::new();
        for fill in [1000usize, 3000, 2000] {
            let id = cache.new_page::<DataPage>(&mut disk, None).unwrap();
            let page: &mut DataPage = cache.get_mut(&mut disk, id).unwrap();
            page.insert_block(fill);
            ids.push(id);
        }

        let mut head = NO_PAGE;
        for &id in &ids {
            head = cache.update_free_list(&mut disk, id, head).unwrap();
        }

        // walk the list and check free bytes never increase
        let mut current = head;
        let mut last_free = usize::MAX;
        let mut seen = 0;
        while current != NO_PAGE {
            let page = cache.get_base(&mut disk, current).unwrap();
            assert!(page.free_bytes() <= last_free);
            last_free = page.free_bytes();
            current = page.next_page_id();
            seen += 1;
        }
        assert_eq!(seen, 3);

        // head must be the page with the most free space (least filled)
        assert_eq!(head, ids[0]);
    }

    #[test]
    fn rollback_discards_dirty_pages() {
        let (mut disk, mut cache, _dir) = setup();

        let id = cache.new_page::<DataPage>(&mut disk, None).unwrap();
        assert!(cache.has_dirty());

        cache.discard_dirty();
        assert!(!cache.has_dirty());
        assert_eq!(cache.cached_count(), 0);

        // header reloads from disk with the pre-transaction high-water mark
        assert_eq!(cache.header(&mut disk).unwrap().last_page_id(), 0);
        let _ = id;
    }
}
