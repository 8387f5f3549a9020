use crate::engine::index_key::IndexKey;
use crate::engine::index_node::{self, IndexNode};
use crate::engine::page_address::PageAddress;
use crate::engine::pages::base_page::{BasePage, PageType};
use crate::engine::{Page, PageBuffer};
use crate::{Error, Result};
use std::ops::{Deref, DerefMut};

/// A page of skip-list nodes.
pub(crate) struct IndexPage {
    base: BasePage,
}

impl IndexPage {
    pub fn new(buffer: Box<PageBuffer>, page_id: u32) -> Self {
        IndexPage {
            base: BasePage::new(buffer, page_id, PageType::Index),
        }
    }

    pub fn load(buffer: Box<PageBuffer>) -> Result<Self> {
        let base = BasePage::load(buffer)?;

        if base.page_type() != PageType::Index {
            return Err(Error::invalid_page_type(
                base.page_id(),
                PageType::Index,
                base.page_type(),
            ));
        }

        Ok(IndexPage { base })
    }

    pub fn insert_node(
        &mut self,
        levels: u8,
        key: &IndexKey,
        data_block: PageAddress,
    ) -> Result<IndexNode> {
        let length = IndexNode::get_node_length(levels, key);
        let page_id = self.base.page_id();

        let (segment, index) = self.base.insert(length);
        IndexNode::initialize(segment, levels, key, data_block);

        IndexNode::load(page_id, index, segment)
    }

    pub fn get_node(&self, index: u16) -> Result<IndexNode> {
        IndexNode::load(self.base.page_id(), index, self.base.get(index))
    }

    pub fn set_node_next(&mut self, index: u16, level: u8, address: PageAddress) {
        self.base
            .get_mut(index)
            .write_page_address(index_node::calc_next_offset(level), address);
    }

    pub fn set_node_prev0(&mut self, index: u16, address: PageAddress) {
        self.base
            .get_mut(index)
            .write_page_address(index_node::P_PREV0, address);
    }

    pub fn set_node_data_block(&mut self, index: u16, address: PageAddress) {
        self.base
            .get_mut(index)
            .write_page_address(index_node::P_DATA_BLOCK, address);
    }

    pub fn delete_node(&mut self, index: u16) {
        self.base.delete(index);
    }

    pub fn get_nodes(&self) -> impl Iterator<Item = PageAddress> + '_ {
        self.base
            .get_used_indices()
            .map(|index| PageAddress::new(self.base.page_id(), index))
    }
}

impl Deref for IndexPage {
    type Target = BasePage;

    fn deref(&self) -> &Self::Target {
        &self.base
    }
}

impl DerefMut for IndexPage {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.base
    }
}

impl Page for IndexPage {
    fn load(buffer: Box<PageBuffer>) -> Result<Self> {
        Self::load(buffer)
    }

    fn new(buffer: Box<PageBuffer>, page_id: u32) -> Self {
        Self::new(buffer, page_id)
    }

    fn page_type() -> PageType {
        PageType::Index
    }

    fn base(&self) -> &BasePage {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BasePage {
        &mut self.base
    }

    fn update_buffer(&mut self) -> &PageBuffer {
        self.base.update_buffer()
    }

    fn into_base(self: Box<Self>) -> BasePage {
        self.base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::PageBuffer;
    use crate::engine::query::Order;

    #[test]
    fn node_roundtrip() {
        let mut page = IndexPage::new(PageBuffer::new(), 4);

        let node = page
            .insert_node(3, &IndexKey::Int32(10), PageAddress::new(2, 0))
            .unwrap();
        let position = node.position();

        page.set_node_next(position.index(), 0, PageAddress::new(4, 9));
        page.set_node_next(position.index(), 2, PageAddress::new(5, 1));
        page.set_node_prev0(position.index(), PageAddress::new(4, 7));

        let loaded = page.get_node(position.index()).unwrap();
        assert_eq!(loaded.levels(), 3);
        assert_eq!(*loaded.key(), IndexKey::Int32(10));
        assert_eq!(loaded.data_block(), PageAddress::new(2, 0));
        assert_eq!(loaded.get_next(0), PageAddress::new(4, 9));
        assert_eq!(loaded.get_next(1), PageAddress::EMPTY);
        assert_eq!(loaded.get_next(2), PageAddress::new(5, 1));
        assert_eq!(loaded.prev0(), PageAddress::new(4, 7));
        assert_eq!(loaded.get_next_prev0(Order::Descending), PageAddress::new(4, 7));
    }
}
