use crate::Result;
use crate::engine::buffer_reader::BufferReader;
use crate::engine::buffer_writer::BufferWriter;
use crate::engine::page_address::PageAddress;
use crate::engine::pages::NO_PAGE;

/// One entry of a collection's index table: the indexed field, uniqueness,
/// the skip-list HEAD/TAIL sentinels and the head of the free-index-page
/// list serving this index.
#[derive(Debug, Clone)]
pub(crate) struct CollectionIndex {
    field: String,
    unique: bool,
    head: PageAddress,
    tail: PageAddress,
    free_index_page_id: u32,
}

impl CollectionIndex {
    pub fn new(field: String, unique: bool) -> Self {
        Self {
            field,
            unique,
            head: PageAddress::EMPTY,
            tail: PageAddress::EMPTY,
            free_index_page_id: NO_PAGE,
        }
    }

    pub fn load(reader: &mut BufferReader) -> Result<Self> {
        let field = reader.read_cstring()?;
        let unique = reader.read_bool();
        let head = reader.read_page_address();
        let tail = reader.read_page_address();
        let free_index_page_id = reader.read_u32();

        Ok(Self {
            field,
            unique,
            head,
            tail,
            free_index_page_id,
        })
    }

    pub fn update_buffer(&self, writer: &mut BufferWriter) {
        writer.write_cstring(&self.field);
        writer.write_bool(self.unique);
        writer.write_page_address(self.head);
        writer.write_page_address(self.tail);
        writer.write_u32(self.free_index_page_id);
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn unique(&self) -> bool {
        self.unique
    }

    pub fn head(&self) -> PageAddress {
        self.head
    }

    pub fn set_head(&mut self, address: PageAddress) {
        self.head = address;
    }

    pub fn tail(&self) -> PageAddress {
        self.tail
    }

    pub fn set_tail(&mut self, address: PageAddress) {
        self.tail = address;
    }

    pub fn free_index_page_id(&self) -> u32 {
        self.free_index_page_id
    }

    pub fn set_free_index_page_id(&mut self, page_id: u32) {
        self.free_index_page_id = page_id;
    }

    pub fn get_length(&self) -> usize {
        Self::get_length_static(&self.field)
    }

    pub fn get_length_static(field: &str) -> usize {
        field.len() + 1 // cstring
            + 1 // unique
            + PageAddress::SERIALIZED_SIZE * 2 // head + tail
            + 4 // free index page id
    }
}
