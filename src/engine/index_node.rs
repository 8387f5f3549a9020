use crate::Result;
use crate::engine::index_key::IndexKey;
use crate::engine::page_address::PageAddress;
use crate::engine::query::Order;
use crate::utils::BufferSlice;

pub(crate) const P_LEVELS: usize = 0; // 00-00 [byte]
pub(crate) const P_DATA_BLOCK: usize = 1; // 01-06 [pageAddress]
pub(crate) const P_PREV0: usize = 7; // 07-12 [pageAddress]
pub(crate) const P_NEXT: usize = 13; // 13-(13 + levels*6) [pageAddress[]]
// key follows the forward-pointer array

pub(crate) const INDEX_NODE_FIXED_SIZE: usize = P_NEXT;

pub(crate) fn calc_key_offset(levels: u8) -> usize {
    P_NEXT + levels as usize * PageAddress::SERIALIZED_SIZE
}

pub(crate) fn calc_next_offset(level: u8) -> usize {
    P_NEXT + level as usize * PageAddress::SERIALIZED_SIZE
}

/// One skip-list entry, decoded from its page segment.
///
/// Nodes carry one forward pointer per level and a single back pointer at
/// level 0; mutation goes through [`super::IndexPage`] so the host page
/// tracks dirtiness.
#[derive(Debug, Clone)]
pub(crate) struct IndexNode {
    position: PageAddress,
    levels: u8,
    key: IndexKey,
    data_block: PageAddress,
    prev0: PageAddress,
    next: Vec<PageAddress>,
}

impl IndexNode {
    pub fn load(page_id: u32, index: u16, segment: &BufferSlice) -> Result<Self> {
        let levels = segment.read_u8(P_LEVELS);
        let data_block = segment.read_page_address(P_DATA_BLOCK);
        let prev0 = segment.read_page_address(P_PREV0);

        let mut next = Vec::with_capacity(levels as usize);
        for level in 0..levels {
            next.push(segment.read_page_address(calc_next_offset(level)));
        }

        let key = segment.read_index_key(calc_key_offset(levels))?;

        Ok(IndexNode {
            position: PageAddress::new(page_id, index),
            levels,
            key,
            data_block,
            prev0,
            next,
        })
    }

    /// Writes a fresh node into `segment` with empty links.
    pub fn initialize(
        segment: &mut BufferSlice,
        levels: u8,
        key: &IndexKey,
        data_block: PageAddress,
    ) {
        segment.write_u8(P_LEVELS, levels);
        segment.write_page_address(P_DATA_BLOCK, data_block);
        segment.write_page_address(P_PREV0, PageAddress::EMPTY);

        for level in 0..levels {
            segment.write_page_address(calc_next_offset(level), PageAddress::EMPTY);
        }

        segment.write_index_key(calc_key_offset(levels), key);
    }

    pub fn get_node_length(levels: u8, key: &IndexKey) -> usize {
        INDEX_NODE_FIXED_SIZE
            + levels as usize * PageAddress::SERIALIZED_SIZE
            + key.key_length()
    }

    pub fn position(&self) -> PageAddress {
        self.position
    }

    pub fn levels(&self) -> u8 {
        self.levels
    }

    pub fn key(&self) -> &IndexKey {
        &self.key
    }

    pub fn into_key(self) -> IndexKey {
        self.key
    }

    pub fn data_block(&self) -> PageAddress {
        self.data_block
    }

    pub fn prev0(&self) -> PageAddress {
        self.prev0
    }

    pub fn get_next(&self, level: u8) -> PageAddress {
        self.next[level as usize]
    }

    /// Level-0 neighbor in walk direction; descending walks use the back
    /// pointer, so this is only meaningful at level 0.
    pub fn get_next_prev0(&self, order: Order) -> PageAddress {
        match order {
            Order::Ascending => self.next[0],
            Order::Descending => self.prev0,
        }
    }
}
