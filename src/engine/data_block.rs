use crate::engine::page_address::PageAddress;
use crate::engine::pages::NO_PAGE;
use crate::utils::BufferSlice;

pub(crate) const P_EXTEND_PAGE_ID: usize = 0; // 00-03 [uint]
pub(crate) const P_INDEX_REF: usize = 4; // 04-09 [pageAddress]
pub(crate) const P_DOC_LENGTH: usize = 10; // 10-13 [uint]
pub(crate) const P_BUFFER: usize = 14; // 14-EOF [byte[]]

pub(crate) const DATA_BLOCK_FIXED_SIZE: usize = P_BUFFER;

/// One document's block record as stored on a data page. The payload that
/// does not fit the block spills into Extend pages starting at
/// `extend_page_id`; `index_ref` points back at the document's `_id` node.
#[derive(Debug, Clone)]
pub(crate) struct DataBlock {
    position: PageAddress,
    extend_page_id: u32,
    index_ref: PageAddress,
    doc_length: u32,
    payload_length: usize,
}

impl DataBlock {
    pub fn load(page_id: u32, index: u16, segment: &BufferSlice) -> Self {
        DataBlock {
            position: PageAddress::new(page_id, index),
            extend_page_id: segment.read_u32(P_EXTEND_PAGE_ID),
            index_ref: segment.read_page_address(P_INDEX_REF),
            doc_length: segment.read_u32(P_DOC_LENGTH),
            payload_length: segment.len() - P_BUFFER,
        }
    }

    pub fn init(segment: &mut BufferSlice) {
        segment.write_u32(P_EXTEND_PAGE_ID, NO_PAGE);
        segment.write_page_address(P_INDEX_REF, PageAddress::EMPTY);
        segment.write_u32(P_DOC_LENGTH, 0);
    }

    pub fn position(&self) -> PageAddress {
        self.position
    }

    pub fn extend_page_id(&self) -> u32 {
        self.extend_page_id
    }

    pub fn index_ref(&self) -> PageAddress {
        self.index_ref
    }

    pub fn doc_length(&self) -> u32 {
        self.doc_length
    }

    /// Bytes of the document stored inline in this block.
    pub fn payload_length(&self) -> usize {
        self.payload_length
    }
}
