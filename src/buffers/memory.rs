//! Flat in-memory byte source.

use bytes::Bytes;

use super::{check_range, InputBuffer};
use crate::error::Result;

/// Input buffer backed by contiguous memory.
///
/// The bytes live in a [`Bytes`] handle, so the buffer can own a vector,
/// borrow a `'static` slice, or keep a memory map alive, and cloning it is
/// cheap.
#[derive(Debug, Clone, Default)]
pub struct InputMemoryBuffer {
    data: Bytes,
}

impl InputMemoryBuffer {
    pub fn new(data: Bytes) -> Self {
        Self { data }
    }

    pub fn from_static(data: &'static [u8]) -> Self {
        Self {
            data: Bytes::from_static(data),
        }
    }

    /// Wrap any owner of bytes (for example a memory map) without copying.
    pub fn from_owner<T>(owner: T) -> Self
    where
        T: AsRef<[u8]> + Send + 'static,
    {
        Self {
            data: Bytes::from_owner(owner),
        }
    }

    pub fn bytes(&self) -> &Bytes {
        &self.data
    }
}

impl From<Vec<u8>> for InputMemoryBuffer {
    fn from(data: Vec<u8>) -> Self {
        Self {
            data: Bytes::from(data),
        }
    }
}

impl From<Bytes> for InputMemoryBuffer {
    fn from(data: Bytes) -> Self {
        Self { data }
    }
}

impl InputBuffer for InputMemoryBuffer {
    fn size(&self) -> usize {
        self.data.len()
    }

    fn read(&self, pos: usize, out: &mut [u8]) -> Result<usize> {
        let count = out.len();
        if count == 0 {
            return Ok(0);
        }
        check_range(pos, count, self.data.len())?;
        out.copy_from_slice(&self.data[pos..pos + count]);
        Ok(count)
    }

    fn raw_data(&self, pos: usize, count: usize) -> Result<Option<&[u8]>> {
        if count == 0 {
            return Ok(Some(&[]));
        }
        check_range(pos, count, self.data.len())?;
        Ok(Some(&self.data[pos..pos + count]))
    }
}
