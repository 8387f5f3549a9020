use crate::Result;
use crate::engine::page_address::PageAddress;
use crate::utils::BufferSlice;

/// Forward-only writing cursor, counterpart of [`super::BufferReader`].
pub(crate) struct BufferWriter<'a> {
    slice: &'a mut BufferSlice,
    position: usize,
}

impl<'a> BufferWriter<'a> {
    pub fn new(slice: &'a mut BufferSlice) -> Self {
        BufferWriter { slice, position: 0 }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn skip(&mut self, bytes: usize) {
        self.position += bytes;
    }

    pub fn write_document(&mut self, document: &bson::Document) -> Result<()> {
        let bytes = bson::to_vec(document)?;
        self.slice.write_bytes(self.position, &bytes);
        self.position += bytes.len();
        Ok(())
    }
}

macro_rules! cursor_writes {
    ($($name:ident: $ty:ty),* $(,)?) => {
        impl BufferWriter<'_> {
            $(
            pub fn $name(&mut self, value: $ty) {
                self.slice.$name(self.position, value);
                self.position += size_of::<$ty>();
            }
            )*
        }
    };
}

cursor_writes!(
    write_u8: u8,
    write_u16: u16,
    write_u32: u32,
    write_u64: u64,
    write_i32: i32,
    write_i64: i64,
);

impl BufferWriter<'_> {
    pub fn write_bool(&mut self, value: bool) {
        self.write_u8(value as u8);
    }

    pub fn write_page_address(&mut self, address: PageAddress) {
        self.slice.write_page_address(self.position, address);
        self.position += PageAddress::SERIALIZED_SIZE;
    }

    pub fn write_cstring(&mut self, value: &str) {
        debug_assert!(!value.as_bytes().contains(&0), "cstring with null byte");
        self.slice.write_bytes(self.position, value.as_bytes());
        self.position += value.len();
        self.write_u8(0);
    }
}
