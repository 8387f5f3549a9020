use crate::engine::collection_index::CollectionIndex;
use crate::engine::index_key::IndexKey;
use crate::engine::index_node::IndexNode;
use crate::engine::page_address::PageAddress;
use crate::engine::pages::IndexPage;
use crate::engine::snapshot::Snapshot;
use crate::engine::{MAX_LEVEL_LENGTH, PAGE_SLOT_SIZE};
use crate::{Error, Result};

/// The on-disk skip list behind every index.
///
/// Each index owns a HEAD/TAIL sentinel pair of full height; every level-`l`
/// chain runs HEAD → nodes → TAIL through the forward pointers, and level 0
/// is additionally back-linked through `prev0`. Node heights come from a
/// fair coin per level, capped at [`MAX_LEVEL_LENGTH`].
pub(crate) struct IndexService<'a, 'b> {
    snapshot: &'a mut Snapshot<'b>,
}

impl<'a, 'b> IndexService<'a, 'b> {
    pub fn new(snapshot: &'a mut Snapshot<'b>) -> Self {
        Self { snapshot }
    }

    fn index_meta(&mut self, field: &str) -> Result<CollectionIndex> {
        let collection = self.snapshot.collection_page()?;
        let name = collection.name().to_string();
        collection
            .get_index(field)
            .cloned()
            .ok_or_else(|| Error::index_not_found(&name, field))
    }

    pub fn get_node(&mut self, address: PageAddress) -> Result<IndexNode> {
        let page: &IndexPage = self
            .snapshot
            .cache
            .get(self.snapshot.disk, address.page_id())?;
        page.get_node(address.index())
    }

    fn set_next(&mut self, node: PageAddress, level: u8, target: PageAddress) -> Result<()> {
        let page: &mut IndexPage = self
            .snapshot
            .cache
            .get_mut(self.snapshot.disk, node.page_id())?;
        page.set_node_next(node.index(), level, target);
        Ok(())
    }

    fn set_prev0(&mut self, node: PageAddress, target: PageAddress) -> Result<()> {
        let page: &mut IndexPage = self
            .snapshot
            .cache
            .get_mut(self.snapshot.disk, node.page_id())?;
        page.set_node_prev0(node.index(), target);
        Ok(())
    }

    pub fn set_data_block(&mut self, node: PageAddress, target: PageAddress) -> Result<()> {
        let page: &mut IndexPage = self
            .snapshot
            .cache
            .get_mut(self.snapshot.disk, node.page_id())?;
        page.set_node_data_block(node.index(), target);
        Ok(())
    }

    /// Draws a node height with `P(h = k) = 2^-k`, capped.
    fn flip_coin() -> u8 {
        let mut levels = 1;
        while rand::random_bool(0.5) && levels < MAX_LEVEL_LENGTH {
            levels += 1;
        }
        levels
    }

    /// Creates the index entry plus its HEAD/TAIL sentinels on a fresh
    /// index page. Every forward pointer of HEAD starts at TAIL.
    pub fn create_index(&mut self, field: &str, unique: bool) -> Result<()> {
        self.snapshot
            .collection_page_mut()?
            .insert_index(field, unique)?;

        let page_id = self
            .snapshot
            .cache
            .new_page::<IndexPage>(self.snapshot.disk, None)?;

        let page: &mut IndexPage = self.snapshot.cache.get_mut(self.snapshot.disk, page_id)?;
        let head = page
            .insert_node(MAX_LEVEL_LENGTH, &IndexKey::MinValue, PageAddress::EMPTY)?
            .position();
        let tail = page
            .insert_node(MAX_LEVEL_LENGTH, &IndexKey::MaxValue, PageAddress::EMPTY)?
            .position();

        for level in 0..MAX_LEVEL_LENGTH {
            page.set_node_next(head.index(), level, tail);
        }
        page.set_node_prev0(tail.index(), head);

        {
            let index = self
                .snapshot
                .collection_page_mut()?
                .get_index_mut(field)
                .expect("entry was just inserted");
            index.set_head(head);
            index.set_tail(tail);
            index.set_free_index_page_id(page_id);
        }
        self.snapshot.update_free_index_list(field, page_id)?;

        log::debug!("created index on `{field}` (unique: {unique})");
        Ok(())
    }

    /// Predecessor at every level: the last node with key strictly below
    /// (or, with `include_equal`, at most) `key`.
    fn find_predecessors(
        &mut self,
        index: &CollectionIndex,
        key: &IndexKey,
        include_equal: bool,
    ) -> Result<Vec<PageAddress>> {
        let mut predecessors = vec![PageAddress::EMPTY; MAX_LEVEL_LENGTH as usize];
        let mut current = self.get_node(index.head())?;

        for level in (0..MAX_LEVEL_LENGTH).rev() {
            loop {
                let next_address = current.get_next(level);
                if next_address.is_empty() {
                    break;
                }

                let next = self.get_node(next_address)?;
                let go_right = if include_equal {
                    next.key() <= key
                } else {
                    next.key() < key
                };

                if !go_right {
                    break;
                }
                current = next;
            }

            predecessors[level as usize] = current.position();
        }

        Ok(predecessors)
    }

    /// First node with key `>= key` (or `> key` when `strict`); may be the
    /// TAIL sentinel.
    pub fn seek(&mut self, index: &CollectionIndex, key: &IndexKey, strict: bool) -> Result<IndexNode> {
        let predecessors = self.find_predecessors(index, key, strict)?;
        let next = self.get_node(predecessors[0])?.get_next(0);
        self.get_node(next)
    }

    pub fn first(&mut self, index: &CollectionIndex) -> Result<IndexNode> {
        let head = self.get_node(index.head())?;
        self.get_node(head.get_next(0))
    }

    pub fn last(&mut self, index: &CollectionIndex) -> Result<IndexNode> {
        let tail = self.get_node(index.tail())?;
        self.get_node(tail.prev0())
    }

    /// Inserts a key for a document: draws a height, splices the node into
    /// every level it participates in, back-links level 0. A duplicate key
    /// on a unique index fails before anything is touched.
    pub fn add_node(
        &mut self,
        field: &str,
        key: IndexKey,
        data_block: PageAddress,
    ) -> Result<IndexNode> {
        debug_assert!(!key.is_sentinel(), "sentinels are not insertable");

        let index = self.index_meta(field)?;

        if index.unique() {
            let existing = self.seek(&index, &key, false)?;
            if !existing.key().is_sentinel() && existing.key() == &key {
                return Err(Error::index_duplicate_key(field, key));
            }
        }

        let levels = Self::flip_coin();
        let predecessors = self.find_predecessors(&index, &key, true)?;

        let node_length = IndexNode::get_node_length(levels, &key);
        let page_id = self
            .snapshot
            .get_free_index_page(field, node_length + PAGE_SLOT_SIZE)?;

        let page: &mut IndexPage = self.snapshot.cache.get_mut(self.snapshot.disk, page_id)?;
        let node = page.insert_node(levels, &key, data_block)?;
        let position = node.position();

        for level in 0..levels {
            let predecessor = predecessors[level as usize];
            let next = self.get_node(predecessor)?.get_next(level);

            self.set_next(position, level, next)?;
            self.set_next(predecessor, level, position)?;

            if level == 0 {
                self.set_prev0(position, predecessor)?;
                self.set_prev0(next, position)?;
            }
        }

        self.snapshot.update_free_index_list(field, page_id)?;

        self.get_node(position)
    }

    /// Unlinks and frees the node carrying (`key`, `data_block`). Walks the
    /// level-0 run of equal keys to find the node, then patches every level
    /// it participates in. Returns false when no such node exists.
    pub fn delete_node(
        &mut self,
        field: &str,
        key: &IndexKey,
        data_block: PageAddress,
    ) -> Result<bool> {
        let index = self.index_meta(field)?;

        let mut node = self.seek(&index, key, false)?;
        loop {
            if node.key().is_sentinel() || node.key() != key {
                return Ok(false);
            }
            if node.data_block() == data_block {
                break;
            }
            node = self.get_node(node.get_next(0))?;
        }

        let predecessors = self.find_predecessors(&index, key, false)?;
        let position = node.position();

        for level in (0..node.levels()).rev() {
            // walk right from the strict predecessor to the node's own
            // predecessor at this level (equal keys may sit in between)
            let mut current = predecessors[level as usize];
            loop {
                let current_node = self.get_node(current)?;
                if current_node.get_next(level) == position {
                    break;
                }
                current = current_node.get_next(level);
                assert!(!current.is_empty(), "unlinked node in level {level} chain");
            }

            self.set_next(current, level, node.get_next(level))?;
        }

        self.set_prev0(node.get_next(0), node.prev0())?;

        let page: &mut IndexPage = self
            .snapshot
            .cache
            .get_mut(self.snapshot.disk, position.page_id())?;
        page.delete_node(position.index());

        self.snapshot.update_free_index_list(field, position.page_id())?;

        Ok(true)
    }

    /// Frees every page of the index (sentinels included) and removes the
    /// table entry.
    pub fn drop_index(&mut self, field: &str) -> Result<()> {
        let index = self.index_meta(field)?;

        let mut page_ids = Vec::new();
        let mut current = index.head();
        while !current.is_empty() {
            if !page_ids.contains(&current.page_id()) {
                page_ids.push(current.page_id());
            }
            current = self.get_node(current)?.get_next(0);
        }

        for page_id in page_ids {
            self.snapshot
                .cache
                .delete_page(self.snapshot.disk, page_id, false)?;
        }

        self.snapshot.collection_page_mut()?.delete_index(field);

        log::debug!("dropped index on `{field}`");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::disk::DiskService;
    use crate::engine::page_cache::PageCache;
    use crate::engine::pages::CollectionPage;
    use crate::engine::query::Order;

    struct Fixture {
        disk: DiskService,
        cache: PageCache,
        collection_page_id: u32,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let (mut disk, _) = DiskService::open(&dir.path().join("test.db"), false, 0).unwrap();
        let mut cache = PageCache::new(200);
        cache.create_header();

        let collection_page_id = cache.new_page::<CollectionPage>(&mut disk, None).unwrap();
        cache
            .get_mut::<CollectionPage>(&mut disk, collection_page_id)
            .unwrap()
            .set_name("fixture".into());

        Fixture {
            disk,
            cache,
            collection_page_id,
            _dir: dir,
        }
    }

    impl Fixture {
        fn snapshot(&mut self) -> Snapshot<'_> {
            Snapshot::new(&mut self.disk, &mut self.cache, self.collection_page_id)
        }
    }

    fn block(n: u16) -> PageAddress {
        PageAddress::new(100, n)
    }

    fn collect_keys(snapshot: &mut Snapshot, field: &str, order: Order) -> Vec<IndexKey> {
        let mut service = IndexService::new(snapshot);
        let index = service.index_meta(field).unwrap();

        let mut keys = Vec::new();
        let mut node = match order {
            Order::Ascending => service.first(&index).unwrap(),
            Order::Descending => service.last(&index).unwrap(),
        };
        while !node.key().is_sentinel() {
            keys.push(node.key().clone());
            node = service.get_node(node.get_next_prev0(order)).unwrap();
        }
        keys
    }

    #[test]
    fn level_zero_is_sorted_both_ways() {
        let mut fixture = fixture();
        let mut snapshot = fixture.snapshot();
        let mut service = IndexService::new(&mut snapshot);

        service.create_index("n", false).unwrap();

        // insert out of order, with duplicates
        for (i, value) in [7, 1, 9, 3, 3, 200, -5].into_iter().enumerate() {
            service
                .add_node("n", IndexKey::Int32(value), block(i as u16))
                .unwrap();
        }

        let ascending = collect_keys(&mut snapshot, "n", Order::Ascending);
        let expected: Vec<IndexKey> = [-5, 1, 3, 3, 7, 9, 200]
            .into_iter()
            .map(IndexKey::Int32)
            .collect();
        assert_eq!(ascending, expected);

        let mut descending = collect_keys(&mut snapshot, "n", Order::Descending);
        descending.reverse();
        assert_eq!(descending, expected);
    }

    #[test]
    fn seek_finds_first_not_below() {
        let mut fixture = fixture();
        let mut snapshot = fixture.snapshot();
        let mut service = IndexService::new(&mut snapshot);

        service.create_index("n", false).unwrap();
        for value in [10, 20, 20, 30] {
            service
                .add_node("n", IndexKey::Int32(value), block(value as u16))
                .unwrap();
        }

        let index = service.index_meta("n").unwrap();

        let node = service.seek(&index, &IndexKey::Int32(15), false).unwrap();
        assert_eq!(*node.key(), IndexKey::Int32(20));

        let node = service.seek(&index, &IndexKey::Int32(20), true).unwrap();
        assert_eq!(*node.key(), IndexKey::Int32(30));

        let node = service.seek(&index, &IndexKey::Int32(99), false).unwrap();
        assert!(node.key().is_sentinel());
    }

    #[test]
    fn unique_index_rejects_duplicates() {
        let mut fixture = fixture();
        let mut snapshot = fixture.snapshot();
        let mut service = IndexService::new(&mut snapshot);

        service.create_index("_id", true).unwrap();
        service
            .add_node("_id", IndexKey::Int32(1), block(0))
            .unwrap();

        let err = service
            .add_node("_id", IndexKey::Int32(1), block(1))
            .unwrap_err();
        assert!(matches!(err, Error::IndexDuplicateKey { .. }));

        // the list is untouched
        drop(service);
        assert_eq!(
            collect_keys(&mut snapshot, "_id", Order::Ascending),
            vec![IndexKey::Int32(1)]
        );
    }

    #[test]
    fn delete_node_matches_on_data_block() {
        let mut fixture = fixture();
        let mut snapshot = fixture.snapshot();
        let mut service = IndexService::new(&mut snapshot);

        service.create_index("n", false).unwrap();
        for i in 0..3 {
            service
                .add_node("n", IndexKey::Int32(5), block(i))
                .unwrap();
        }

        assert!(service.delete_node("n", &IndexKey::Int32(5), block(1)).unwrap());
        assert!(!service.delete_node("n", &IndexKey::Int32(5), block(1)).unwrap());

        let index = service.index_meta("n").unwrap();
        let mut node = service.first(&index).unwrap();
        let mut blocks = Vec::new();
        while !node.key().is_sentinel() {
            blocks.push(node.data_block());
            node = service.get_node(node.get_next(0)).unwrap();
        }
        assert_eq!(blocks, vec![block(0), block(2)]);
    }

    #[test]
    fn many_nodes_span_pages_and_stay_sorted() {
        let mut fixture = fixture();
        let mut snapshot = fixture.snapshot();
        let mut service = IndexService::new(&mut snapshot);

        service.create_index("n", false).unwrap();
        // enough nodes that a single 4 KiB page cannot hold them
        for i in (0..500).rev() {
            service
                .add_node("n", IndexKey::Int32(i), block((i % 100) as u16))
                .unwrap();
        }

        let keys = collect_keys(&mut snapshot, "n", Order::Ascending);
        assert_eq!(keys.len(), 500);
        assert!(keys.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    #[test]
    fn drop_index_releases_pages() {
        let mut fixture = fixture();
        let mut snapshot = fixture.snapshot();
        let mut service = IndexService::new(&mut snapshot);

        service.create_index("n", false).unwrap();
        for i in 0..200 {
            service
                .add_node("n", IndexKey::Int32(i), block(0))
                .unwrap();
        }

        service.drop_index("n").unwrap();

        assert!(snapshot.collection_page().unwrap().get_index("n").is_none());
        assert!(
            snapshot.cache.header(snapshot.disk).unwrap().free_empty_page_id() != u32::MAX,
            "index pages went back to the empty pool"
        );
    }
}
