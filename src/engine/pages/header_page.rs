use crate::engine::buffer_reader::BufferReader;
use crate::engine::buffer_writer::BufferWriter;
use crate::engine::pages::base_page::{BasePage, NO_PAGE, PageType};
use crate::engine::{PAGE_SIZE, Page, PageBuffer};
use crate::{Error, Result};

const HEADER_INFO: &[u8] = b"** This is a BurrowDB file **";
const FILE_VERSION: u8 = 1;

const P_HEADER_INFO: usize = 32; // 32-60 (29 bytes)
const P_FILE_VERSION: usize = 61; // 61-61 (1 byte)
const P_FREE_EMPTY_PAGE_ID: usize = 62; // 62-65 (4 bytes)
const P_LAST_PAGE_ID: usize = 66; // 66-69 (4 bytes)
const P_CREATION_TIME: usize = 70; // 70-77 (8 bytes)
const P_CHANGE_ID: usize = 78; // 78-81 (4 bytes)

const P_COLLECTIONS: usize = 96; // 96-4095: name -> first page id directory
const COLLECTIONS_SIZE: usize = PAGE_SIZE - P_COLLECTIONS;

/// The singleton page 0: datafile identity, allocation state and the
/// collection directory (a BSON document of `name: first_page_id`).
pub(crate) struct HeaderPage {
    base: BasePage,
    creation_time: bson::DateTime,
    free_empty_page_id: u32,
    last_page_id: u32,
    change_id: u32,
    collections: bson::Document,
}

impl HeaderPage {
    pub fn new(buffer: Box<PageBuffer>) -> Self {
        let mut header = HeaderPage {
            base: BasePage::new(buffer, 0, PageType::Header),
            creation_time: bson::DateTime::now(),
            free_empty_page_id: NO_PAGE,
            last_page_id: 0,
            change_id: 0,
            collections: bson::Document::new(),
        };

        let buffer = header.base.buffer_mut();
        buffer.write_bytes(P_HEADER_INFO, HEADER_INFO);
        buffer.write_u8(P_FILE_VERSION, FILE_VERSION);
        buffer.write_i64(P_CREATION_TIME, header.creation_time.timestamp_millis());

        header
    }

    pub fn load(buffer: Box<PageBuffer>) -> Result<Self> {
        let base = BasePage::load(buffer)?;

        let info = base.buffer().read_bytes(P_HEADER_INFO, HEADER_INFO.len());
        if info != HEADER_INFO {
            return Err(Error::invalid_database("header magic mismatch"));
        }

        let version = base.buffer().read_u8(P_FILE_VERSION);
        if version != FILE_VERSION {
            return Err(Error::invalid_database_version(FILE_VERSION, version));
        }

        let buffer = base.buffer();
        let creation_time = bson::DateTime::from_millis(buffer.read_i64(P_CREATION_TIME));
        let free_empty_page_id = buffer.read_u32(P_FREE_EMPTY_PAGE_ID);
        let last_page_id = buffer.read_u32(P_LAST_PAGE_ID);
        let change_id = buffer.read_u32(P_CHANGE_ID);

        let area = buffer.slice(P_COLLECTIONS, COLLECTIONS_SIZE);
        let collections = BufferReader::new(area).read_document()?;

        Ok(HeaderPage {
            base,
            creation_time,
            free_empty_page_id,
            last_page_id,
            change_id,
            collections,
        })
    }

    fn write_state(&mut self) -> Result<()> {
        let buffer = self.base.buffer_mut();

        buffer.write_u32(P_FREE_EMPTY_PAGE_ID, self.free_empty_page_id);
        buffer.write_u32(P_LAST_PAGE_ID, self.last_page_id);
        buffer.write_u32(P_CHANGE_ID, self.change_id);

        buffer.clear(P_COLLECTIONS, COLLECTIONS_SIZE);
        let area = buffer.slice_mut(P_COLLECTIONS, COLLECTIONS_SIZE);
        BufferWriter::new(area).write_document(&self.collections)?;

        Ok(())
    }
}

impl HeaderPage {
    pub fn free_empty_page_id(&self) -> u32 {
        self.free_empty_page_id
    }

    pub fn set_free_empty_page_id(&mut self, page_id: u32) {
        self.free_empty_page_id = page_id;
        self.base.set_dirty();
    }

    pub fn last_page_id(&self) -> u32 {
        self.last_page_id
    }

    pub fn set_last_page_id(&mut self, page_id: u32) {
        self.last_page_id = page_id;
        self.base.set_dirty();
    }

    pub fn change_id(&self) -> u32 {
        self.change_id
    }

    pub fn bump_change_id(&mut self) -> u32 {
        self.change_id = self.change_id.wrapping_add(1);
        self.base.set_dirty();
        self.change_id
    }

    pub fn get_collection_page_id(&self, collection: &str) -> Option<u32> {
        self.collections
            .get(collection)
            .and_then(|value| value.as_i32())
            .map(|page_id| page_id as u32)
    }

    pub fn collection_names(&self) -> Vec<String> {
        self.collections.keys().cloned().collect()
    }

    pub fn insert_collection(&mut self, collection: &str, page_id: u32) -> Result<()> {
        let mut updated = self.collections.clone();
        updated.insert(collection.to_string(), bson::Bson::Int32(page_id as i32));

        let serialized = bson::to_vec(&updated)?;
        if serialized.len() > COLLECTIONS_SIZE {
            return Err(Error::collection_limit_size(
                collection,
                "collection directory is full",
            ));
        }

        self.collections = updated;
        self.base.set_dirty();
        Ok(())
    }

    pub fn delete_collection(&mut self, collection: &str) {
        self.collections.remove(collection);
        self.base.set_dirty();
    }

    pub fn rename_collection(&mut self, old_name: &str, new_name: &str) -> Result<()> {
        let page_id = self
            .collections
            .remove(old_name)
            .expect("renaming a collection that exists");
        self.collections.insert(new_name.to_string(), page_id);

        let serialized = bson::to_vec(&self.collections)?;
        if serialized.len() > COLLECTIONS_SIZE {
            // roll the directory back before surfacing
            let page_id = self.collections.remove(new_name).unwrap();
            self.collections.insert(old_name.to_string(), page_id);
            return Err(Error::collection_limit_size(
                new_name,
                "collection directory is full",
            ));
        }

        self.base.set_dirty();
        Ok(())
    }
}

impl Page for HeaderPage {
    fn load(buffer: Box<PageBuffer>) -> Result<Self> {
        Self::load(buffer)
    }

    fn new(buffer: Box<PageBuffer>, page_id: u32) -> Self {
        assert_eq!(page_id, 0, "header page must be page 0");
        Self::new(buffer)
    }

    fn page_type() -> PageType {
        PageType::Header
    }

    fn base(&self) -> &BasePage {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BasePage {
        &mut self.base
    }

    fn update_buffer(&mut self) -> &PageBuffer {
        self.write_state().expect("header directory fits its page");
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

    #[test]
    fn new_header_roundtrip() {
        let mut header = HeaderPage::new(PageBuffer::new());
        header.set_last_page_id(3);
        header.set_free_empty_page_id(2);
        header.insert_collection("docs", 1).unwrap();
        header.bump_change_id();

        let buffer = *Page::update_buffer(&mut header).buffer();
        let loaded = HeaderPage::load(PageBuffer::from_array(buffer)).unwrap();

        assert_eq!(loaded.last_page_id(), 3);
        assert_eq!(loaded.free_empty_page_id(), 2);
        assert_eq!(loaded.change_id(), 1);
        assert_eq!(loaded.get_collection_page_id("docs"), Some(1));
        assert_eq!(loaded.get_collection_page_id("missing"), None);
    }

    #[test]
    fn rejects_foreign_magic() {
        let mut buffer = PageBuffer::new();
        buffer.write_bytes(P_HEADER_INFO, b"** This is not a database ***");

        assert!(matches!(
            HeaderPage::load(buffer),
            Err(Error::InvalidDatabase(_))
        ));
    }

    #[test]
    fn rejects_future_version() {
        let mut header = HeaderPage::new(PageBuffer::new());
        let mut buffer = *Page::update_buffer(&mut header).buffer();
        buffer[P_FILE_VERSION] = FILE_VERSION + 1;

        assert!(matches!(
            HeaderPage::load(PageBuffer::from_array(buffer)),
            Err(Error::InvalidDatabaseVersion { .. })
        ));
    }
}
