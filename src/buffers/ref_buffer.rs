//! Holder for a chunk of image data that is either referenced or copied.

use std::borrow::Cow;

use bytes::Bytes;
use sha2::{Digest, Sha256};

use super::{read_all, InputBuffer, InputBufferPtr, OutputBuffer};
use crate::error::Result;

#[derive(Debug, Clone, Default)]
enum RefBufferData {
    #[default]
    Unloaded,
    View(InputBufferPtr),
    Copied(Bytes),
}

/// Section data, DOS stub, overlay and full-headers capture all use this.
///
/// A zero-copy view keeps the backing buffer alive; an eager copy detaches
/// from it (needed when the byte source is transient).
#[derive(Debug, Clone, Default)]
pub struct RefBuffer {
    data: RefBufferData,
    absolute_offset: Option<usize>,
}

impl RefBuffer {
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self {
            data: RefBufferData::Copied(Bytes::from(data)),
            absolute_offset: None,
        }
    }

    /// Capture `buffer`, copying its bytes when `copy_memory` is set.
    pub fn deserialize(&mut self, buffer: InputBufferPtr, copy_memory: bool) -> Result<()> {
        let absolute_offset = buffer.absolute_offset();
        self.data = if copy_memory {
            RefBufferData::Copied(Bytes::from(read_all(buffer.as_ref())?))
        } else {
            RefBufferData::View(buffer)
        };
        self.absolute_offset = Some(absolute_offset);
        Ok(())
    }

    /// True once [`deserialize`](Self::deserialize) succeeded or data was
    /// assigned.
    pub fn is_loaded(&self) -> bool {
        !matches!(self.data, RefBufferData::Unloaded)
    }

    pub fn is_copied(&self) -> bool {
        matches!(self.data, RefBufferData::Copied(_))
    }

    pub fn size(&self) -> usize {
        match &self.data {
            RefBufferData::Unloaded => 0,
            RefBufferData::View(buffer) => buffer.size(),
            RefBufferData::Copied(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Offset of the captured bytes in the byte source they were loaded
    /// from, if any.
    pub fn absolute_offset(&self) -> Option<usize> {
        self.absolute_offset
    }

    /// Access the bytes, borrowing them when the source is contiguous.
    pub fn data(&self) -> Result<Cow<'_, [u8]>> {
        match &self.data {
            RefBufferData::Unloaded => Ok(Cow::Borrowed(&[])),
            RefBufferData::Copied(bytes) => Ok(Cow::Borrowed(bytes.as_ref())),
            RefBufferData::View(buffer) => match buffer.raw_data(0, buffer.size())? {
                Some(raw) => Ok(Cow::Borrowed(raw)),
                None => Ok(Cow::Owned(read_all(buffer.as_ref())?)),
            },
        }
    }

    /// Detach from the backing buffer by copying the referenced bytes.
    pub fn copy_referenced_buffer(&mut self) -> Result<()> {
        if let RefBufferData::View(buffer) = &self.data {
            self.data = RefBufferData::Copied(Bytes::from(read_all(buffer.as_ref())?));
        }
        Ok(())
    }

    pub fn serialize(&self, out: &mut dyn OutputBuffer) -> Result<usize> {
        let data = self.data()?;
        out.write(&data);
        Ok(data.len())
    }

    /// Hex-encoded SHA-256 of the captured bytes.
    pub fn sha256_hex(&self) -> Result<String> {
        let data = self.data()?;
        Ok(hex::encode(Sha256::digest(&data)))
    }
}
