use crate::engine::data_block::{self, DATA_BLOCK_FIXED_SIZE, DataBlock};
use crate::engine::page_address::PageAddress;
use crate::engine::pages::base_page::{BasePage, PageType};
use crate::engine::{Page, PageBuffer};
use crate::{Error, Result};
use std::ops::{Deref, DerefMut};

/// A page of document blocks.
pub(crate) struct DataPage {
    base: BasePage,
}

impl DataPage {
    pub fn new(buffer: Box<PageBuffer>, page_id: u32) -> Self {
        DataPage {
            base: BasePage::new(buffer, page_id, PageType::Data),
        }
    }

    pub fn load(buffer: Box<PageBuffer>) -> Result<Self> {
        let base = BasePage::load(buffer)?;

        if base.page_type() != PageType::Data {
            return Err(Error::invalid_page_type(
                base.page_id(),
                PageType::Data,
                base.page_type(),
            ));
        }

        Ok(DataPage { base })
    }

    pub fn insert_block(&mut self, payload_length: usize) -> u16 {
        let (segment, index) = self.base.insert(DATA_BLOCK_FIXED_SIZE + payload_length);
        DataBlock::init(segment);
        index
    }

    pub fn get_block(&self, index: u16) -> DataBlock {
        DataBlock::load(self.base.page_id(), index, self.base.get(index))
    }

    pub fn payload(&self, index: u16) -> &[u8] {
        let segment = self.base.get(index);
        segment
            .slice(data_block::P_BUFFER, segment.len() - data_block::P_BUFFER)
            .as_bytes()
    }

    pub fn write_payload(&mut self, index: u16, bytes: &[u8]) {
        let segment = self.base.get_mut(index);
        segment.write_bytes(data_block::P_BUFFER, bytes);
    }

    pub fn set_block_extend_page_id(&mut self, index: u16, page_id: u32) {
        self.base
            .get_mut(index)
            .write_u32(data_block::P_EXTEND_PAGE_ID, page_id);
    }

    pub fn set_block_index_ref(&mut self, index: u16, address: PageAddress) {
        self.base
            .get_mut(index)
            .write_page_address(data_block::P_INDEX_REF, address);
    }

    pub fn set_block_doc_length(&mut self, index: u16, length: u32) {
        self.base
            .get_mut(index)
            .write_u32(data_block::P_DOC_LENGTH, length);
    }

    /// Resizes the block to hold exactly `payload_length` inline bytes,
    /// preserving the block header fields.
    pub fn resize_block(&mut self, index: u16, payload_length: usize) {
        let block = self.get_block(index);
        let segment = self
            .base
            .update(index, DATA_BLOCK_FIXED_SIZE + payload_length);

        segment.write_u32(data_block::P_EXTEND_PAGE_ID, block.extend_page_id());
        segment.write_page_address(data_block::P_INDEX_REF, block.index_ref());
        segment.write_u32(data_block::P_DOC_LENGTH, block.doc_length());
    }

    pub fn delete_block(&mut self, index: u16) {
        self.base.delete(index);
    }

    pub fn get_blocks(&self) -> impl Iterator<Item = PageAddress> + '_ {
        self.base
            .get_used_indices()
            .map(|index| PageAddress::new(self.base.page_id(), index))
    }
}

impl Deref for DataPage {
    type Target = BasePage;

    fn deref(&self) -> &Self::Target {
        &self.base
    }
}

impl DerefMut for DataPage {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.base
    }
}

impl Page for DataPage {
    fn load(buffer: Box<PageBuffer>) -> Result<Self> {
        Self::load(buffer)
    }

    fn new(buffer: Box<PageBuffer>, page_id: u32) -> Self {
        Self::new(buffer, page_id)
    }

    fn page_type() -> PageType {
        PageType::Data
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
    use crate::engine::pages::NO_PAGE;

    #[test]
    fn block_roundtrip() {
        let mut page = DataPage::new(PageBuffer::new(), 3);

        let index = page.insert_block(5);
        page.write_payload(index, b"hello");
        page.set_block_doc_length(index, 5);
        page.set_block_index_ref(index, PageAddress::new(8, 2));

        let block = page.get_block(index);
        assert_eq!(block.extend_page_id(), NO_PAGE);
        assert_eq!(block.index_ref(), PageAddress::new(8, 2));
        assert_eq!(block.doc_length(), 5);
        assert_eq!(block.payload_length(), 5);
        assert_eq!(page.payload(index), b"hello");
    }

    #[test]
    fn resize_preserves_header_fields() {
        let mut page = DataPage::new(PageBuffer::new(), 3);

        let index = page.insert_block(8);
        page.write_payload(index, b"abcdefgh");
        page.set_block_extend_page_id(index, 4);
        page.set_block_doc_length(index, 100);

        page.resize_block(index, 3);

        let block = page.get_block(index);
        assert_eq!(block.extend_page_id(), 4);
        assert_eq!(block.doc_length(), 100);
        assert_eq!(block.payload_length(), 3);
    }
}
