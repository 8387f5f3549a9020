use crate::engine::buffer_reader::BufferReader;
use crate::engine::buffer_writer::BufferWriter;
use crate::engine::collection_index::CollectionIndex;
use crate::engine::pages::base_page::{BasePage, NO_PAGE, PageType};
use crate::engine::{MAX_COLLECTION_INDEXES, PAGE_HEADER_SIZE, PAGE_SIZE, Page, PageBuffer};
use crate::{Error, Result};
use indexmap::IndexMap;

// body: name, document count, free data list head, index table

const INDEX_TABLE_SIZE: usize = PAGE_SIZE - PAGE_HEADER_SIZE - 128;

/// One page per collection: identity, document count, the head of the
/// free-data-page list and the fixed-capacity index table.
pub(crate) struct CollectionPage {
    base: BasePage,
    name: String,
    document_count: u64,
    free_data_page_id: u32,
    indexes: IndexMap<String, CollectionIndex>,
}

impl CollectionPage {
    pub fn new(buffer: Box<PageBuffer>, page_id: u32, name: String) -> Self {
        Self {
            base: BasePage::new(buffer, page_id, PageType::Collection),
            name,
            document_count: 0,
            free_data_page_id: NO_PAGE,
            indexes: IndexMap::new(),
        }
    }

    pub fn load(buffer: Box<PageBuffer>) -> Result<Self> {
        let base = BasePage::load(buffer)?;

        if base.page_type() != PageType::Collection {
            return Err(Error::invalid_page_type(
                base.page_id(),
                PageType::Collection,
                base.page_type(),
            ));
        }

        let area = base
            .buffer()
            .slice(PAGE_HEADER_SIZE, PAGE_SIZE - PAGE_HEADER_SIZE);
        let mut reader = BufferReader::new(area);

        let name = reader.read_cstring()?;
        let document_count = reader.read_u64();
        let free_data_page_id = reader.read_u32();

        let count = reader.read_u8();
        let mut indexes = IndexMap::new();
        for _ in 0..count {
            let index = CollectionIndex::load(&mut reader)?;
            indexes.insert(index.field().to_string(), index);
        }

        Ok(Self {
            base,
            name,
            document_count,
            free_data_page_id,
            indexes,
        })
    }

    fn write_state(&mut self) {
        let buffer = self
            .base
            .buffer_mut()
            .slice_mut(PAGE_HEADER_SIZE, PAGE_SIZE - PAGE_HEADER_SIZE);
        buffer.clear(0, buffer.len());

        let mut writer = BufferWriter::new(buffer);
        writer.write_cstring(&self.name);
        writer.write_u64(self.document_count);
        writer.write_u32(self.free_data_page_id);

        writer.write_u8(self.indexes.len() as u8);
        for index in self.indexes.values() {
            index.update_buffer(&mut writer);
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: String) {
        self.name = name;
        self.base.set_dirty();
    }

    pub fn document_count(&self) -> u64 {
        self.document_count
    }

    pub fn set_document_count(&mut self, count: u64) {
        self.document_count = count;
        self.base.set_dirty();
    }

    pub fn free_data_page_id(&self) -> u32 {
        self.free_data_page_id
    }

    pub fn set_free_data_page_id(&mut self, page_id: u32) {
        self.free_data_page_id = page_id;
        self.base.set_dirty();
    }

    pub fn pk_index(&self) -> &CollectionIndex {
        self.get_index("_id").expect("every collection has _id")
    }

    pub fn get_index(&self, field: &str) -> Option<&CollectionIndex> {
        self.indexes.get(field)
    }

    pub fn get_index_mut(&mut self, field: &str) -> Option<&mut CollectionIndex> {
        self.base.set_dirty();
        self.indexes.get_mut(field)
    }

    pub fn get_indexes(&self) -> impl Iterator<Item = &CollectionIndex> {
        self.indexes.values()
    }

    pub fn insert_index(&mut self, field: &str, unique: bool) -> Result<&mut CollectionIndex> {
        let total_length = 1
            + self
                .indexes
                .values()
                .map(CollectionIndex::get_length)
                .sum::<usize>()
            + CollectionIndex::get_length_static(field);

        if self.indexes.len() >= MAX_COLLECTION_INDEXES || total_length >= INDEX_TABLE_SIZE {
            return Err(Error::collection_limit_size(&self.name, "index table is full"));
        }

        let index = CollectionIndex::new(field.to_string(), unique);
        self.base.set_dirty();

        Ok(self
            .indexes
            .entry(field.to_string())
            .insert_entry(index)
            .into_mut())
    }

    pub fn delete_index(&mut self, field: &str) {
        self.indexes.shift_remove(field);
        self.base.set_dirty();
    }
}

impl Page for CollectionPage {
    fn load(buffer: Box<PageBuffer>) -> Result<Self> {
        Self::load(buffer)
    }

    fn new(buffer: Box<PageBuffer>, page_id: u32) -> Self {
        Self::new(buffer, page_id, String::new())
    }

    fn page_type() -> PageType {
        PageType::Collection
    }

    fn base(&self) -> &BasePage {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BasePage {
        &mut self.base
    }

    fn update_buffer(&mut self) -> &PageBuffer {
        self.write_state();
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
    use crate::engine::page_address::PageAddress;

    #[test]
    fn state_roundtrip() {
        let mut page = CollectionPage::new(PageBuffer::new(), 5, "people".into());
        page.set_document_count(42);
        page.set_free_data_page_id(9);

        {
            let index = page.insert_index("_id", true).unwrap();
            index.set_head(PageAddress::new(6, 0));
            index.set_tail(PageAddress::new(6, 1));
            index.set_free_index_page_id(6);
        }
        page.insert_index("age", false).unwrap();

        let buffer = *Page::update_buffer(&mut page).buffer();
        let loaded = CollectionPage::load(PageBuffer::from_array(buffer)).unwrap();

        assert_eq!(loaded.name(), "people");
        assert_eq!(loaded.document_count(), 42);
        assert_eq!(loaded.free_data_page_id(), 9);
        assert_eq!(loaded.get_indexes().count(), 2);

        let pk = loaded.pk_index();
        assert!(pk.unique());
        assert_eq!(pk.head(), PageAddress::new(6, 0));
        assert_eq!(pk.tail(), PageAddress::new(6, 1));
        assert!(!loaded.get_index("age").unwrap().unique());
    }

    #[test]
    fn index_table_capacity() {
        let mut page = CollectionPage::new(PageBuffer::new(), 5, "caps".into());

        for i in 0..MAX_COLLECTION_INDEXES {
            page.insert_index(&format!("field_{i}"), false).unwrap();
        }

        assert!(matches!(
            page.insert_index("one_too_many", false),
            Err(Error::CollectionLimitSize { .. })
        ));
    }
}
