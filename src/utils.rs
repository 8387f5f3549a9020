/// A borrowed run of bytes with little-endian accessors.
///
/// All page content goes through this type; offsets are relative to the
/// start of the slice, never to the page.
#[repr(transparent)]
pub(crate) struct BufferSlice([u8]);

impl BufferSlice {
    pub fn new(slice: &[u8]) -> &BufferSlice {
        // SAFETY: BufferSlice is repr(transparent) over [u8]
        unsafe { &*(slice as *const [u8] as *const BufferSlice) }
    }

    pub fn new_mut(slice: &mut [u8]) -> &mut BufferSlice {
        // SAFETY: BufferSlice is repr(transparent) over [u8]
        unsafe { &mut *(slice as *mut [u8] as *mut BufferSlice) }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.0
    }

    pub fn slice(&self, offset: usize, length: usize) -> &BufferSlice {
        BufferSlice::new(&self.0[offset..offset + length])
    }

    pub fn slice_mut(&mut self, offset: usize, length: usize) -> &mut BufferSlice {
        BufferSlice::new_mut(&mut self.0[offset..offset + length])
    }

    pub fn clear(&mut self, offset: usize, length: usize) {
        self.0[offset..offset + length].fill(0);
    }
}

macro_rules! le_accessors {
    ($($read:ident / $write:ident: $ty:ty),* $(,)?) => {
        impl BufferSlice {
            $(
            pub fn $read(&self, offset: usize) -> $ty {
                const S: usize = size_of::<$ty>();
                <$ty>::from_le_bytes(self.0[offset..offset + S].try_into().unwrap())
            }

            pub fn $write(&mut self, offset: usize, value: $ty) {
                self.0[offset..offset + size_of::<$ty>()]
                    .copy_from_slice(&value.to_le_bytes());
            }
            )*
        }
    };
}

le_accessors!(
    read_u8 / write_u8: u8,
    read_u16 / write_u16: u16,
    read_u32 / write_u32: u32,
    read_u64 / write_u64: u64,
    read_i32 / write_i32: i32,
    read_i64 / write_i64: i64,
    read_f64 / write_f64: f64,
);

impl BufferSlice {
    pub fn read_bool(&self, offset: usize) -> bool {
        self.read_u8(offset) != 0
    }

    pub fn write_bool(&mut self, offset: usize, value: bool) {
        self.write_u8(offset, value as u8);
    }

    pub fn read_bytes(&self, offset: usize, length: usize) -> &[u8] {
        &self.0[offset..offset + length]
    }

    pub fn write_bytes(&mut self, offset: usize, bytes: &[u8]) {
        self.0[offset..offset + bytes.len()].copy_from_slice(bytes);
    }
}
