use crate::engine::disk::DiskService;
use crate::engine::index_service::IndexService;
use crate::engine::page_cache::PageCache;
use crate::engine::pages::{CollectionPage, DataPage, NO_PAGE};
use crate::engine::snapshot::Snapshot;
use crate::engine::MAX_COLLECTION_NAME_LENGTH;
use crate::{Error, Result};

/// Collection lifecycle: the header directory entry, the collection page
/// and the `_id` index every collection is born with.
pub(crate) struct CollectionService<'a> {
    disk: &'a mut DiskService,
    cache: &'a mut PageCache,
}

impl<'a> CollectionService<'a> {
    pub fn new(disk: &'a mut DiskService, cache: &'a mut PageCache) -> Self {
        Self { disk, cache }
    }

    fn check_name(name: &str) -> Result<()> {
        let valid = !name.is_empty()
            && name.len() <= MAX_COLLECTION_NAME_LENGTH
            && name
                .chars()
                .next()
                .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');

        if valid {
            Ok(())
        } else {
            Err(Error::invalid_format(format!(
                "invalid collection name `{name}`"
            )))
        }
    }

    pub fn get(&mut self, name: &str) -> Result<Option<u32>> {
        Ok(self.cache.header(self.disk)?.get_collection_page_id(name))
    }

    pub fn get_or_create(&mut self, name: &str) -> Result<u32> {
        match self.get(name)? {
            Some(page_id) => Ok(page_id),
            None => self.create(name),
        }
    }

    pub fn create(&mut self, name: &str) -> Result<u32> {
        Self::check_name(name)?;

        let page_id = self.cache.new_page::<CollectionPage>(self.disk, None)?;
        self.cache
            .get_mut::<CollectionPage>(self.disk, page_id)?
            .set_name(name.to_string());

        self.cache
            .header_mut(self.disk)?
            .insert_collection(name, page_id)?;

        // every collection carries a unique _id index from birth
        let mut snapshot = Snapshot::new(self.disk, self.cache, page_id);
        IndexService::new(&mut snapshot).create_index("_id", true)?;

        log::debug!("created collection `{name}` at page {page_id}");
        Ok(page_id)
    }

    /// Frees every data, extend and index page of the collection, then the
    /// collection page and directory entry. Returns false for an unknown
    /// collection.
    pub fn drop(&mut self, name: &str) -> Result<bool> {
        let Some(page_id) = self.get(name)? else {
            return Ok(false);
        };

        let mut snapshot = Snapshot::new(self.disk, self.cache, page_id);

        // data pages (and their extend chains) are reachable through _id
        let pk = snapshot.collection_page()?.pk_index().clone();

        let mut service = IndexService::new(&mut snapshot);
        let mut data_pages = Vec::new();
        let mut node = service.first(&pk)?;
        while !node.key().is_sentinel() {
            let block_page = node.data_block().page_id();
            if !data_pages.contains(&block_page) {
                data_pages.push(block_page);
            }
            node = service.get_node(node.get_next(0))?;
        }

        for data_page_id in data_pages {
            let page: &DataPage = snapshot.cache.get(snapshot.disk, data_page_id)?;
            let extends: Vec<u32> = page
                .get_blocks()
                .map(|address| page.get_block(address.index()).extend_page_id())
                .filter(|&extend| extend != NO_PAGE)
                .collect();

            for extend in extends {
                snapshot.cache.delete_page(snapshot.disk, extend, true)?;
            }
            snapshot.cache.delete_page(snapshot.disk, data_page_id, false)?;
        }

        let fields: Vec<String> = snapshot
            .collection_page()?
            .get_indexes()
            .map(|index| index.field().to_string())
            .collect();
        for field in fields {
            IndexService::new(&mut snapshot).drop_index(&field)?;
        }

        self.cache.delete_page(self.disk, page_id, false)?;
        self.cache.header_mut(self.disk)?.delete_collection(name);

        log::debug!("dropped collection `{name}`");
        Ok(true)
    }

    pub fn rename(&mut self, old_name: &str, new_name: &str) -> Result<bool> {
        Self::check_name(new_name)?;

        let Some(page_id) = self.get(old_name)? else {
            return Ok(false);
        };
        if self.get(new_name)?.is_some() {
            return Err(Error::invalid_format(format!(
                "collection `{new_name}` already exists"
            )));
        }

        self.cache
            .header_mut(self.disk)?
            .rename_collection(old_name, new_name)?;
        self.cache
            .get_mut::<CollectionPage>(self.disk, page_id)?
            .set_name(new_name.to_string());

        Ok(true)
    }
}
