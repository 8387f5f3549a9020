use crate::engine::{PAGE_HEADER_SIZE, PAGE_SIZE, PAGE_SLOT_SIZE, Page, PageBuffer};
use crate::utils::BufferSlice;
use crate::{Error, Result};
use std::cmp::Ordering;
use std::fmt;

// The header shared by every page, and the slotted-item machinery used by
// collection, index and data pages.

const P_PAGE_ID: usize = 0; // 00-03 [uint]
const P_PAGE_TYPE: usize = 4; // 04-04 [byte]
const P_PREV_PAGE_ID: usize = 5; // 05-08 [uint]
const P_NEXT_PAGE_ID: usize = 9; // 09-12 [uint]
const P_ITEMS_COUNT: usize = 13; // 13-14 [ushort]
const P_USED_BYTES: usize = 15; // 15-16 [ushort]
const P_FRAGMENTED_BYTES: usize = 17; // 17-18 [ushort]
const P_NEXT_FREE_POSITION: usize = 19; // 19-20 [ushort]
const P_HIGHEST_INDEX: usize = 21; // 21-22 [ushort]
const P_FREE_BYTES: usize = 23; // 23-24 [ushort]
// 25-31 reserved

/// No-link sentinel for `prev_page_id`/`next_page_id`.
pub(crate) const NO_PAGE: u32 = u32::MAX;
/// No-slot sentinel for `highest_index`.
const NO_INDEX: u16 = u16::MAX;

pub(crate) struct BasePage {
    buffer: Box<PageBuffer>,
    page_id: u32,
    page_type: PageType,
    prev_page_id: u32,
    next_page_id: u32,
    items_count: u16,
    used_bytes: u16,
    fragmented_bytes: u16,
    next_free_position: u16,
    highest_index: u16,

    dirty: bool,
    // cache for get_free_index
    start_index: u16,
}

impl BasePage {
    pub const P_PAGE_ID: usize = P_PAGE_ID;
    pub const P_PAGE_TYPE: usize = P_PAGE_TYPE;

    pub fn new(buffer: Box<PageBuffer>, page_id: u32, page_type: PageType) -> Self {
        let mut base = BasePage {
            buffer,

            page_id,
            page_type,
            prev_page_id: NO_PAGE,
            next_page_id: NO_PAGE,

            items_count: 0,
            used_bytes: 0,
            fragmented_bytes: 0,
            next_free_position: PAGE_HEADER_SIZE as u16,
            highest_index: NO_INDEX,

            dirty: true,
            start_index: 0,
        };

        base.buffer.write_u32(P_PAGE_ID, base.page_id);
        base.buffer.write_u8(P_PAGE_TYPE, page_type as u8);

        base
    }

    pub fn load(buffer: Box<PageBuffer>) -> Result<Self> {
        let mut page = Self::new(buffer, 0, PageType::Empty);
        page.reload()?;
        page.dirty = false;
        Ok(page)
    }

    pub(crate) fn reload(&mut self) -> Result<()> {
        let buffer = &self.buffer;

        self.page_id = buffer.read_u32(P_PAGE_ID);
        self.page_type = buffer.read_u8(P_PAGE_TYPE).try_into()?;
        self.prev_page_id = buffer.read_u32(P_PREV_PAGE_ID);
        self.next_page_id = buffer.read_u32(P_NEXT_PAGE_ID);

        self.items_count = buffer.read_u16(P_ITEMS_COUNT);
        self.used_bytes = buffer.read_u16(P_USED_BYTES);
        self.fragmented_bytes = buffer.read_u16(P_FRAGMENTED_BYTES);
        self.next_free_position = buffer.read_u16(P_NEXT_FREE_POSITION);
        self.highest_index = buffer.read_u16(P_HIGHEST_INDEX);

        self.start_index = 0;

        Ok(())
    }

    pub(crate) fn update_buffer(&mut self) -> &PageBuffer {
        assert_eq!(
            self.buffer.read_u32(P_PAGE_ID),
            self.page_id,
            "page id cannot change"
        );

        let free_bytes = self.free_bytes() as u16;
        let buffer = &mut self.buffer;

        buffer.write_u8(P_PAGE_TYPE, self.page_type as u8);
        buffer.write_u32(P_PREV_PAGE_ID, self.prev_page_id);
        buffer.write_u32(P_NEXT_PAGE_ID, self.next_page_id);

        buffer.write_u16(P_ITEMS_COUNT, self.items_count);
        buffer.write_u16(P_USED_BYTES, self.used_bytes);
        buffer.write_u16(P_FRAGMENTED_BYTES, self.fragmented_bytes);
        buffer.write_u16(P_NEXT_FREE_POSITION, self.next_free_position);
        buffer.write_u16(P_HIGHEST_INDEX, self.highest_index);
        buffer.write_u16(P_FREE_BYTES, free_bytes);

        buffer
    }

    /// Wipes the page into a recyclable empty page; only the page id survives.
    pub fn mark_as_empty(&mut self) {
        self.set_dirty();

        self.page_type = PageType::Empty;
        self.prev_page_id = NO_PAGE;
        self.next_page_id = NO_PAGE;

        self.items_count = 0;
        self.used_bytes = 0;
        self.fragmented_bytes = 0;
        self.next_free_position = PAGE_HEADER_SIZE as u16;
        self.highest_index = NO_INDEX;
        self.start_index = 0;

        self.buffer
            .clear(PAGE_HEADER_SIZE, PAGE_SIZE - PAGE_HEADER_SIZE);
        self.buffer.write_u8(P_PAGE_TYPE, self.page_type as u8);
    }

    pub fn page_id(&self) -> u32 {
        self.page_id
    }

    pub fn page_type(&self) -> PageType {
        self.page_type
    }

    pub fn prev_page_id(&self) -> u32 {
        self.prev_page_id
    }

    pub fn set_prev_page_id(&mut self, page_id: u32) {
        self.prev_page_id = page_id;
        self.set_dirty();
    }

    pub fn next_page_id(&self) -> u32 {
        self.next_page_id
    }

    pub fn set_next_page_id(&mut self, page_id: u32) {
        self.next_page_id = page_id;
        self.set_dirty();
    }

    pub fn items_count(&self) -> u16 {
        self.items_count
    }

    pub fn used_bytes(&self) -> u16 {
        self.used_bytes
    }

    pub(crate) fn set_used_bytes(&mut self, used_bytes: u16) {
        // extend pages store their run length here; they carry no slots
        debug_assert_eq!(self.page_type, PageType::Extend);
        self.used_bytes = used_bytes;
        self.set_dirty();
    }

    pub(crate) fn buffer(&self) -> &PageBuffer {
        &self.buffer
    }

    pub(crate) fn buffer_mut(&mut self) -> &mut PageBuffer {
        &mut self.buffer
    }

    pub(crate) fn set_dirty(&mut self) {
        self.dirty = true;
    }

    pub(crate) fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn free_bytes(&self) -> usize {
        PAGE_SIZE - PAGE_HEADER_SIZE - self.used_bytes as usize - self.footer_size()
    }

    pub(crate) fn footer_size(&self) -> usize {
        if self.highest_index == NO_INDEX {
            0
        } else {
            (self.highest_index as usize + 1) * PAGE_SLOT_SIZE
        }
    }
}

// Slotted item access. Items grow from the header down the page, one
// 4-byte footer slot per item index grows from the page end up.
impl BasePage {
    pub fn get(&self, index: u16) -> &BufferSlice {
        assert!(self.items_count > 0, "no items in this page");
        assert!(
            self.highest_index != NO_INDEX && index <= self.highest_index,
            "slot index out of range"
        );

        let position = self.buffer.read_u16(Self::calc_position_addr(index)) as usize;
        let length = self.buffer.read_u16(Self::calc_length_addr(index)) as usize;

        assert!(self.valid_position(position, length), "invalid segment");

        self.buffer.slice(position, length)
    }

    pub fn get_mut(&mut self, index: u16) -> &mut BufferSlice {
        assert!(self.items_count > 0, "no items in this page");
        assert!(
            self.highest_index != NO_INDEX && index <= self.highest_index,
            "slot index out of range"
        );

        let position = self.buffer.read_u16(Self::calc_position_addr(index)) as usize;
        let length = self.buffer.read_u16(Self::calc_length_addr(index)) as usize;

        assert!(self.valid_position(position, length), "invalid segment");

        self.dirty = true;
        self.buffer.slice_mut(position, length)
    }

    pub fn exists(&self, index: u16) -> bool {
        self.highest_index != NO_INDEX
            && index <= self.highest_index
            && self.buffer.read_u16(Self::calc_position_addr(index)) != 0
    }

    pub fn insert(&mut self, length: usize) -> (&mut BufferSlice, u16) {
        self.internal_insert(length, NO_INDEX)
    }

    fn internal_insert(&mut self, length: usize, mut index: u16) -> (&mut BufferSlice, u16) {
        let is_new = index == NO_INDEX;

        assert!(length > 0, "segment length must be greater than 0");
        assert!(
            self.free_bytes() >= length + (if is_new { PAGE_SLOT_SIZE } else { 0 }),
            "not enough free space in page {}",
            self.page_id
        );
        assert!(
            self.fragmented_bytes as usize <= self.free_bytes(),
            "fragmented bytes must be at most free bytes"
        );

        let continuous = self.free_bytes()
            - self.fragmented_bytes as usize
            - (if is_new { PAGE_SLOT_SIZE } else { 0 });

        if length > continuous {
            self.defrag();
        }

        if index == NO_INDEX {
            index = self.get_free_index();
        }

        if self.highest_index == NO_INDEX || index > self.highest_index {
            debug_assert_eq!(
                index,
                self.highest_index.wrapping_add(1),
                "new slot must extend the footer by exactly one"
            );
            self.highest_index = index;
        }

        let position_addr = Self::calc_position_addr(index);
        let length_addr = Self::calc_length_addr(index);

        debug_assert_eq!(self.buffer.read_u16(position_addr), 0, "slot in use");
        debug_assert_eq!(self.buffer.read_u16(length_addr), 0, "slot in use");

        let position = self.next_free_position;

        self.buffer.write_u16(position_addr, position);
        self.buffer.write_u16(length_addr, length as u16);

        self.items_count += 1;
        self.used_bytes += length as u16;
        self.next_free_position += length as u16;

        self.set_dirty();

        (self.buffer.slice_mut(position as usize, length), index)
    }

    pub fn delete(&mut self, index: u16) {
        let position_addr = Self::calc_position_addr(index);
        let length_addr = Self::calc_length_addr(index);

        let position = self.buffer.read_u16(position_addr) as usize;
        let length = self.buffer.read_u16(length_addr) as usize;

        assert!(self.valid_position(position, length), "invalid segment");

        self.buffer.write_u16(position_addr, 0);
        self.buffer.write_u16(length_addr, 0);

        self.items_count -= 1;
        self.used_bytes -= length as u16;

        self.buffer.clear(position, length);

        let is_last_segment = position + length == self.next_free_position as usize;

        if is_last_segment {
            self.next_free_position = position as u16;
        } else {
            self.fragmented_bytes += length as u16;
        }

        if index == self.highest_index {
            self.update_highest_index();
        }

        self.start_index = 0;

        if self.items_count == 0 {
            debug_assert_eq!(self.highest_index, NO_INDEX, "footer must be gone");
            debug_assert_eq!(self.used_bytes, 0, "no bytes used in an empty page");

            self.next_free_position = PAGE_HEADER_SIZE as u16;
            self.fragmented_bytes = 0;
        }

        self.set_dirty();
    }

    pub fn update(&mut self, index: u16, length: usize) -> &mut BufferSlice {
        debug_assert!(length > 0, "segment length must be greater than 0");

        let position_addr = Self::calc_position_addr(index);
        let length_addr = Self::calc_length_addr(index);

        let position = self.buffer.read_u16(position_addr) as usize;
        let old_length = self.buffer.read_u16(length_addr) as usize;

        assert!(self.valid_position(position, old_length), "invalid segment");

        let is_last_segment = position + old_length == self.next_free_position as usize;
        self.set_dirty();

        match length.cmp(&old_length) {
            Ordering::Equal => self.buffer.slice_mut(position, old_length),
            Ordering::Less => {
                // keep the segment, release the tail
                let diff = old_length - length;

                if is_last_segment {
                    self.next_free_position -= diff as u16;
                } else {
                    self.fragmented_bytes += diff as u16;
                }

                self.used_bytes -= diff as u16;
                self.buffer.write_u16(length_addr, length as u16);
                self.buffer.clear(position + length, diff);

                self.buffer.slice_mut(position, length)
            }
            Ordering::Greater => {
                // drop the old segment and re-insert under the same slot
                self.buffer.clear(position, old_length);

                self.items_count -= 1;
                self.used_bytes -= old_length as u16;

                if is_last_segment {
                    self.next_free_position = position as u16;
                } else {
                    self.fragmented_bytes += old_length as u16;
                }

                self.buffer.write_u16(position_addr, 0);
                self.buffer.write_u16(length_addr, 0);

                self.internal_insert(length, index).0
            }
        }
    }

    /// Slides every live segment down to close the gaps left by deletes.
    pub fn defrag(&mut self) {
        debug_assert!(self.fragmented_bytes > 0, "nothing to defrag");
        debug_assert!(self.highest_index != NO_INDEX, "no items in this page");

        log::debug!(
            "defrag page {} ({} fragmented bytes)",
            self.page_id,
            self.fragmented_bytes
        );

        let mut segments = Vec::with_capacity(self.items_count as usize);

        for index in 0..=self.highest_index {
            let position = self.buffer.read_u16(Self::calc_position_addr(index)) as usize;
            if position != 0 {
                segments.push((position, index));
            }
        }

        segments.sort_by_key(|(position, _)| *position);

        let mut next_position = PAGE_HEADER_SIZE;

        for (position, index) in segments {
            let length = self.buffer.read_u16(Self::calc_length_addr(index)) as usize;

            debug_assert!(self.valid_position(position, length), "invalid segment");

            if position != next_position {
                self.buffer
                    .buffer_mut()
                    .copy_within(position..position + length, next_position);
                self.buffer
                    .write_u16(Self::calc_position_addr(index), next_position as u16);
            }

            next_position += length;
        }

        let empty_length = PAGE_SIZE - next_position - self.footer_size();
        self.buffer.clear(next_position, empty_length);

        self.fragmented_bytes = 0;
        self.next_free_position = next_position as u16;
    }

    fn get_free_index(&mut self) -> u16 {
        if self.highest_index != NO_INDEX {
            for index in self.start_index..=self.highest_index {
                let position = self.buffer.read_u16(Self::calc_position_addr(index));
                if position == 0 {
                    self.start_index = index + 1;
                    return index;
                }
            }
        }

        self.highest_index.wrapping_add(1)
    }

    pub fn get_used_indices(&self) -> impl Iterator<Item = u16> + '_ {
        let highest = match self.highest_index {
            NO_INDEX => 0,
            highest => highest + 1,
        };

        (0..highest).filter(move |&index| {
            self.buffer.read_u16(Self::calc_position_addr(index)) != 0
        })
    }

    fn update_highest_index(&mut self) {
        self.highest_index = self.get_used_indices().max().unwrap_or(NO_INDEX);
    }

    fn valid_position(&self, position: usize, length: usize) -> bool {
        position >= PAGE_HEADER_SIZE
            && position + length <= PAGE_SIZE - self.footer_size()
            && length > 0
    }
}

// static helpers
impl BasePage {
    pub fn get_page_position(page_id: u32) -> u64 {
        page_id as u64 * PAGE_SIZE as u64
    }

    fn calc_length_addr(index: u16) -> usize {
        PAGE_SIZE - (index as usize + 1) * PAGE_SLOT_SIZE
    }

    fn calc_position_addr(index: u16) -> usize {
        PAGE_SIZE - (index as usize + 1) * PAGE_SLOT_SIZE + 2
    }
}

impl Page for BasePage {
    fn load(buffer: Box<PageBuffer>) -> Result<Self> {
        Self::load(buffer)
    }

    fn new(buffer: Box<PageBuffer>, page_id: u32) -> Self {
        Self::new(buffer, page_id, PageType::Empty)
    }

    fn page_type() -> PageType {
        PageType::Empty
    }

    fn base(&self) -> &BasePage {
        self
    }

    fn base_mut(&mut self) -> &mut BasePage {
        self
    }

    fn update_buffer(&mut self) -> &PageBuffer {
        self.update_buffer()
    }

    fn into_base(self: Box<Self>) -> BasePage {
        *self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PageType {
    Empty = 0,
    Header = 1,
    Collection = 2,
    Index = 3,
    Data = 4,
    Extend = 5,
}

impl TryFrom<u8> for PageType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(PageType::Empty),
            1 => Ok(PageType::Header),
            2 => Ok(PageType::Collection),
            3 => Ok(PageType::Index),
            4 => Ok(PageType::Data),
            5 => Ok(PageType::Extend),
            other => Err(Error::file_corrupted(format!("unknown page type {other}"))),
        }
    }
}

impl fmt::Display for PageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PageType::Empty => "Empty",
            PageType::Header => "Header",
            PageType::Collection => "Collection",
            PageType::Index => "Index",
            PageType::Data => "Data",
            PageType::Extend => "Extend",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::PageBuffer;

    fn data_page() -> BasePage {
        BasePage::new(PageBuffer::new(), 7, PageType::Data)
    }

    #[test]
    fn insert_get_roundtrip() {
        let mut page = data_page();

        let (segment, index) = page.insert(16);
        segment.write_u64(0, 0xDEAD_BEEF);

        assert_eq!(page.items_count(), 1);
        assert_eq!(page.get(index).read_u64(0), 0xDEAD_BEEF);
        assert_eq!(
            page.free_bytes(),
            PAGE_SIZE - PAGE_HEADER_SIZE - 16 - PAGE_SLOT_SIZE
        );
    }

    #[test]
    fn delete_reclaims_space() {
        let mut page = data_page();
        let before = page.free_bytes();

        let (_, a) = page.insert(100);
        let (_, b) = page.insert(50);

        page.delete(b);
        page.delete(a);

        assert_eq!(page.items_count(), 0);
        assert_eq!(page.free_bytes(), before);
    }

    #[test]
    fn slot_reuse_after_delete() {
        let mut page = data_page();

        let (_, a) = page.insert(10);
        let (_, _b) = page.insert(10);
        page.delete(a);

        let (_, c) = page.insert(10);
        assert_eq!(c, a, "freed slot should be reused");
    }

    #[test]
    fn insert_defrags_when_fragmented() {
        let mut page = data_page();

        let (_, a) = page.insert(1000);
        let (_, _b) = page.insert(1000);
        let (_, c) = page.insert(1000);
        let (_, _d) = page.insert(1000);

        // punch holes, then ask for more than any single hole
        page.delete(a);
        page.delete(c);

        let (_, e) = page.insert(1900);
        assert_eq!(page.get(e).len(), 1900);
        assert_eq!(page.fragmented_bytes, 0);
    }

    #[test]
    fn update_grow_and_shrink() {
        let mut page = data_page();

        let (segment, index) = page.insert(64);
        segment.write_bytes(0, &[0xAB; 64]);

        let grown = page.update(index, 128);
        assert_eq!(grown.len(), 128);

        let shrunk = page.update(index, 32);
        assert_eq!(shrunk.len(), 32);
        assert_eq!(page.items_count(), 1);
    }

    #[test]
    fn serialized_header_roundtrip() {
        let mut page = data_page();
        page.insert(40);
        page.set_next_page_id(11);

        let buffer = page.update_buffer().buffer();
        let reloaded = BasePage::load(PageBuffer::from_array(*buffer)).unwrap();

        assert_eq!(reloaded.page_id(), 7);
        assert_eq!(reloaded.page_type(), PageType::Data);
        assert_eq!(reloaded.next_page_id(), 11);
        assert_eq!(reloaded.items_count(), 1);
        assert_eq!(reloaded.free_bytes(), page.free_bytes());
    }
}
