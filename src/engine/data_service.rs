use crate::engine::data_block::{DATA_BLOCK_FIXED_SIZE, DataBlock};
use crate::engine::page_address::PageAddress;
use crate::engine::pages::{DataPage, ExtendPage, NO_PAGE};
use crate::engine::snapshot::Snapshot;
use crate::engine::{MAX_DOCUMENT_SIZE, PAGE_AVAILABLE_BYTES, PAGE_SLOT_SIZE};
use crate::{Error, Result};

/// Stores document payloads as data blocks with extend-page spill chains.
pub(crate) struct DataService<'a, 'b> {
    snapshot: &'a mut Snapshot<'b>,
}

impl<'a, 'b> DataService<'a, 'b> {
    /// Payload capacity of a block that has a fresh page to itself.
    pub const MAX_DATA_BYTES_PER_PAGE: usize =
        PAGE_AVAILABLE_BYTES - PAGE_SLOT_SIZE - DATA_BLOCK_FIXED_SIZE;

    pub fn new(snapshot: &'a mut Snapshot<'b>) -> Self {
        Self { snapshot }
    }

    pub fn get_block(&mut self, address: PageAddress) -> Result<DataBlock> {
        let page: &DataPage = self
            .snapshot
            .cache
            .get(self.snapshot.disk, address.page_id())?;
        Ok(page.get_block(address.index()))
    }

    /// Writes a document's bytes: as much as fits into a block on a free
    /// data page, the rest spilling through a chain of extend pages.
    pub fn insert(&mut self, doc_bytes: &[u8]) -> Result<PageAddress> {
        let total = doc_bytes.len();
        if total > MAX_DOCUMENT_SIZE {
            return Err(Error::invalid_format(format!(
                "document size {total} exceeds {MAX_DOCUMENT_SIZE} bytes"
            )));
        }

        let needed = PAGE_SLOT_SIZE
            + DATA_BLOCK_FIXED_SIZE
            + total.min(Self::MAX_DATA_BYTES_PER_PAGE);
        let page_id = self.snapshot.get_free_data_page(needed)?;

        let page: &mut DataPage = self.snapshot.cache.get_mut(self.snapshot.disk, page_id)?;
        let capacity = page.free_bytes() - PAGE_SLOT_SIZE - DATA_BLOCK_FIXED_SIZE;
        let head_length = total.min(capacity);

        let index = page.insert_block(head_length);
        page.write_payload(index, &doc_bytes[..head_length]);
        page.set_block_doc_length(index, total as u32);

        let first_extend = self.write_extend_chain(&doc_bytes[head_length..], &[])?;
        if first_extend != NO_PAGE {
            let page: &mut DataPage = self.snapshot.cache.get_mut(self.snapshot.disk, page_id)?;
            page.set_block_extend_page_id(index, first_extend);
        }

        self.snapshot.update_free_data_list(page_id)?;

        Ok(PageAddress::new(page_id, index))
    }

    /// Reassembles a document from its block and extend chain.
    pub fn read(&mut self, address: PageAddress) -> Result<Vec<u8>> {
        let page: &DataPage = self
            .snapshot
            .cache
            .get(self.snapshot.disk, address.page_id())?;
        let block = page.get_block(address.index());
        let total = block.doc_length() as usize;

        let mut bytes = Vec::with_capacity(total);
        bytes.extend_from_slice(page.payload(address.index()));

        let mut extend_id = block.extend_page_id();
        while extend_id != NO_PAGE {
            let extend: &ExtendPage = self.snapshot.cache.get(self.snapshot.disk, extend_id)?;
            bytes.extend_from_slice(extend.data());
            extend_id = extend.next_page_id();
        }

        if bytes.len() != total {
            return Err(Error::file_corrupted(format!(
                "data block {address}: expected {total} bytes, found {}",
                bytes.len()
            )));
        }

        Ok(bytes)
    }

    /// Replaces a document. Rewrites in place when the new payload fits the
    /// existing block + extend chain (freeing surplus extend pages);
    /// otherwise relocates and returns the new address, keeping the block's
    /// back-reference so the caller can re-point the `_id` node.
    pub fn update(&mut self, address: PageAddress, doc_bytes: &[u8]) -> Result<Option<PageAddress>> {
        let total = doc_bytes.len();
        if total > MAX_DOCUMENT_SIZE {
            return Err(Error::invalid_format(format!(
                "document size {total} exceeds {MAX_DOCUMENT_SIZE} bytes"
            )));
        }

        let block = self.get_block(address)?;
        let head_capacity = block.payload_length();
        let index_ref = block.index_ref();

        let mut chain = Vec::new();
        let mut extend_id = block.extend_page_id();
        while extend_id != NO_PAGE {
            chain.push(extend_id);
            extend_id = self
                .snapshot
                .cache
                .get_base(self.snapshot.disk, extend_id)?
                .next_page_id();
        }

        if total > head_capacity + chain.len() * ExtendPage::CAPACITY {
            // does not fit: relocate wholesale
            self.delete(address)?;
            let new_address = self.insert(doc_bytes)?;
            self.set_index_ref(new_address, index_ref)?;
            return Ok(Some(new_address));
        }

        let head_length = total.min(head_capacity);
        let page: &mut DataPage = self
            .snapshot
            .cache
            .get_mut(self.snapshot.disk, address.page_id())?;

        if head_length < head_capacity {
            page.resize_block(address.index(), head_length);
        }
        page.write_payload(address.index(), &doc_bytes[..head_length]);
        page.set_block_doc_length(address.index(), total as u32);

        let first_extend = self.write_extend_chain(&doc_bytes[head_length..], &chain)?;
        let page: &mut DataPage = self
            .snapshot
            .cache
            .get_mut(self.snapshot.disk, address.page_id())?;
        page.set_block_extend_page_id(address.index(), first_extend);

        self.snapshot.update_free_data_list(address.page_id())?;

        Ok(None)
    }

    /// Frees the extend chain and the block itself, re-ranking (or
    /// retiring) the host page.
    pub fn delete(&mut self, address: PageAddress) -> Result<()> {
        let block = self.get_block(address)?;

        if block.extend_page_id() != NO_PAGE {
            self.snapshot
                .cache
                .delete_page(self.snapshot.disk, block.extend_page_id(), true)?;
        }

        let page: &mut DataPage = self
            .snapshot
            .cache
            .get_mut(self.snapshot.disk, address.page_id())?;
        page.delete_block(address.index());

        self.snapshot.update_free_data_list(address.page_id())
    }

    pub fn set_index_ref(&mut self, address: PageAddress, node: PageAddress) -> Result<()> {
        let page: &mut DataPage = self
            .snapshot
            .cache
            .get_mut(self.snapshot.disk, address.page_id())?;
        page.set_block_index_ref(address.index(), node);
        Ok(())
    }

    /// Writes `remaining` through extend pages, reusing `existing` chain
    /// pages first, allocating more as needed and freeing the surplus.
    /// Returns the first extend page id (or none).
    fn write_extend_chain(&mut self, mut remaining: &[u8], existing: &[u32]) -> Result<u32> {
        let mut first = NO_PAGE;
        let mut last: Option<u32> = None;
        let mut reuse = existing.iter().copied();

        while !remaining.is_empty() {
            let chunk = remaining.len().min(ExtendPage::CAPACITY);

            let extend_id = match reuse.next() {
                Some(extend_id) => extend_id,
                None => self
                    .snapshot
                    .cache
                    .new_page::<ExtendPage>(self.snapshot.disk, last)?,
            };

            let extend: &mut ExtendPage = self
                .snapshot
                .cache
                .get_mut(self.snapshot.disk, extend_id)?;
            extend.set_data(&remaining[..chunk]);

            if first == NO_PAGE {
                first = extend_id;
            }
            last = Some(extend_id);
            remaining = &remaining[chunk..];
        }

        // cut the chain after the last used page and free the leftovers
        if let Some(surplus) = reuse.next() {
            if let Some(last) = last {
                self.snapshot
                    .cache
                    .get_base_mut(self.snapshot.disk, last)?
                    .set_next_page_id(NO_PAGE);
            }
            self.snapshot
                .cache
                .delete_page(self.snapshot.disk, surplus, true)?;
        }

        Ok(first)
    }
}
