use crate::engine::pages::base_page::{BasePage, PageType};
use crate::engine::{PAGE_AVAILABLE_BYTES, PAGE_HEADER_SIZE, Page, PageBuffer};
use crate::{Error, Result};
use std::ops::{Deref, DerefMut};

/// Overflow page for document payload that does not fit its data block.
///
/// No slots: a single byte run fills the body, its length kept in the
/// `used_bytes` header field, chained through `next_page_id`.
pub(crate) struct ExtendPage {
    base: BasePage,
}

impl ExtendPage {
    /// Payload capacity of one extend page.
    pub const CAPACITY: usize = PAGE_AVAILABLE_BYTES;

    pub fn new(buffer: Box<PageBuffer>, page_id: u32) -> Self {
        ExtendPage {
            base: BasePage::new(buffer, page_id, PageType::Extend),
        }
    }

    pub fn load(buffer: Box<PageBuffer>) -> Result<Self> {
        let base = BasePage::load(buffer)?;

        if base.page_type() != PageType::Extend {
            return Err(Error::invalid_page_type(
                base.page_id(),
                PageType::Extend,
                base.page_type(),
            ));
        }

        Ok(ExtendPage { base })
    }

    pub fn data(&self) -> &[u8] {
        let length = self.base.used_bytes() as usize;
        self.base.buffer().read_bytes(PAGE_HEADER_SIZE, length)
    }

    pub fn set_data(&mut self, bytes: &[u8]) {
        assert!(bytes.len() <= Self::CAPACITY, "extend run exceeds page body");

        let old_length = self.base.used_bytes() as usize;
        if bytes.len() < old_length {
            self.base
                .buffer_mut()
                .clear(PAGE_HEADER_SIZE + bytes.len(), old_length - bytes.len());
        }

        self.base.buffer_mut().write_bytes(PAGE_HEADER_SIZE, bytes);
        self.base.set_used_bytes(bytes.len() as u16);
    }
}

impl Deref for ExtendPage {
    type Target = BasePage;

    fn deref(&self) -> &Self::Target {
        &self.base
    }
}

impl DerefMut for ExtendPage {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.base
    }
}

impl Page for ExtendPage {
    fn load(buffer: Box<PageBuffer>) -> Result<Self> {
        Self::load(buffer)
    }

    fn new(buffer: Box<PageBuffer>, page_id: u32) -> Self {
        Self::new(buffer, page_id)
    }

    fn page_type() -> PageType {
        PageType::Extend
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
