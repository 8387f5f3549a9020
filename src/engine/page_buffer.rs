use crate::engine::{PAGE_SIZE, PageBufferArray};
use crate::utils::BufferSlice;
use std::ops::{Deref, DerefMut};

/// One page worth of raw bytes.
///
/// Boxed wherever it is stored so a page image never moves on the stack.
pub(crate) struct PageBuffer {
    buffer: PageBufferArray,
}

impl PageBuffer {
    pub fn new() -> Box<Self> {
        Box::new(PageBuffer {
            buffer: [0; PAGE_SIZE],
        })
    }

    pub fn from_array(buffer: PageBufferArray) -> Box<Self> {
        Box::new(PageBuffer { buffer })
    }

    pub fn buffer(&self) -> &PageBufferArray {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut PageBufferArray {
        &mut self.buffer
    }
}

impl Deref for PageBuffer {
    type Target = BufferSlice;

    fn deref(&self) -> &Self::Target {
        BufferSlice::new(&self.buffer)
    }
}

impl DerefMut for PageBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        BufferSlice::new_mut(&mut self.buffer)
    }
}
