use crate::engine::page_address::PageAddress;
use crate::utils::BufferSlice;
use crate::{Error, Result};

/// Forward-only cursor over a buffer slice, for variable-length page bodies.
pub(crate) struct BufferReader<'a> {
    slice: &'a BufferSlice,
    position: usize,
}

impl<'a> BufferReader<'a> {
    pub fn new(slice: &'a BufferSlice) -> Self {
        BufferReader { slice, position: 0 }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn skip(&mut self, bytes: usize) {
        self.position += bytes;
    }

    pub fn read_document(&mut self) -> Result<bson::Document> {
        // BSON documents lead with their own i32 length
        let length = self.slice.read_i32(self.position) as usize;
        let bytes = self.slice.read_bytes(self.position, length);
        self.position += length;
        Ok(bson::Document::from_reader(bytes)?)
    }
}

macro_rules! cursor_reads {
    ($($name:ident: $ty:ty),* $(,)?) => {
        impl BufferReader<'_> {
            $(
            pub fn $name(&mut self) -> $ty {
                let value = self.slice.$name(self.position);
                self.position += size_of::<$ty>();
                value
            }
            )*
        }
    };
}

cursor_reads!(
    read_u8: u8,
    read_u16: u16,
    read_u32: u32,
    read_u64: u64,
    read_i32: i32,
    read_i64: i64,
);

impl BufferReader<'_> {
    pub fn read_bool(&mut self) -> bool {
        self.read_u8() != 0
    }

    pub fn read_page_address(&mut self) -> PageAddress {
        let address = self.slice.read_page_address(self.position);
        self.position += PageAddress::SERIALIZED_SIZE;
        address
    }

    pub fn read_cstring(&mut self) -> Result<String> {
        let mut bytes = Vec::new();
        loop {
            let byte = self.read_u8();
            if byte == 0 {
                break;
            }
            bytes.push(byte);
        }
        String::from_utf8(bytes).map_err(Error::invalid_format)
    }
}
