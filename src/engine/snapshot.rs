use crate::engine::disk::DiskService;
use crate::engine::page_cache::PageCache;
use crate::engine::pages::{CollectionPage, DataPage, IndexPage, PageType};
use crate::{Error, Result};

/// One operation's view of a collection: the shared page cache and disk
/// plus the collection page everything hangs off.
///
/// Services borrow this mutably for the duration of a call, which keeps
/// every page access funneled through a single point.
pub(crate) struct Snapshot<'a> {
    pub disk: &'a mut DiskService,
    pub cache: &'a mut PageCache,
    collection_page_id: u32,
}

impl<'a> Snapshot<'a> {
    pub fn new(disk: &'a mut DiskService, cache: &'a mut PageCache, collection_page_id: u32) -> Self {
        Snapshot {
            disk,
            cache,
            collection_page_id,
        }
    }

    pub fn collection_page_id(&self) -> u32 {
        self.collection_page_id
    }

    pub fn collection_page(&mut self) -> Result<&CollectionPage> {
        self.cache.get(self.disk, self.collection_page_id)
    }

    pub fn collection_page_mut(&mut self) -> Result<&mut CollectionPage> {
        self.cache.get_mut(self.disk, self.collection_page_id)
    }

    /// A data page with room for `needed_bytes`: the free-data list head if
    /// it is big enough, else a fresh page.
    pub fn get_free_data_page(&mut self, needed_bytes: usize) -> Result<u32> {
        let head = self.collection_page()?.free_data_page_id();
        self.cache
            .get_free::<DataPage>(self.disk, head, needed_bytes)
    }

    /// Re-ranks a data page on the collection's free list after its free
    /// bytes changed; a page left without blocks goes back to the empty
    /// pool instead.
    pub fn update_free_data_list(&mut self, page_id: u32) -> Result<()> {
        let head = self.collection_page()?.free_data_page_id();
        let new_head = self.cache.update_free_list(self.disk, page_id, head)?;

        if new_head != head {
            self.collection_page_mut()?.set_free_data_page_id(new_head);
        }

        let drained = {
            let base = self.cache.get_base(self.disk, page_id)?;
            base.page_type() == PageType::Data && base.items_count() == 0
        };
        if drained {
            self.cache.delete_page(self.disk, page_id, false)?;
        }

        Ok(())
    }

    fn index_free_list_head(&mut self, field: &str) -> Result<u32> {
        Ok(self
            .collection_page()?
            .get_index(field)
            .ok_or_else(|| Error::file_corrupted(format!("missing index entry `{field}`")))?
            .free_index_page_id())
    }

    pub fn get_free_index_page(&mut self, field: &str, needed_bytes: usize) -> Result<u32> {
        let head = self.index_free_list_head(field)?;
        self.cache
            .get_free::<IndexPage>(self.disk, head, needed_bytes)
    }

    /// Same discipline as [`Self::update_free_data_list`] for the per-index
    /// free-index-page list.
    pub fn update_free_index_list(&mut self, field: &str, page_id: u32) -> Result<()> {
        let head = self.index_free_list_head(field)?;
        let new_head = self.cache.update_free_list(self.disk, page_id, head)?;

        if new_head != head {
            self.collection_page_mut()?
                .get_index_mut(field)
                .ok_or_else(|| Error::file_corrupted(format!("missing index entry `{field}`")))?
                .set_free_index_page_id(new_head);
        }

        let drained = {
            let base = self.cache.get_base(self.disk, page_id)?;
            base.page_type() == PageType::Index && base.items_count() == 0
        };
        if drained {
            self.cache.delete_page(self.disk, page_id, false)?;
        }

        Ok(())
    }
}
