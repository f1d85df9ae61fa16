//! Zero-copy windows over another buffer.

use super::{check_range, InputBuffer, InputBufferPtr};
use crate::error::{BufferErrc, Result};

/// A read-only window `[base, base + len)` of a parent buffer, addressed
/// from zero.
///
/// The window is validated against the parent when it is created and every
/// read is checked against the window itself, so a view can never reach
/// parent bytes outside of it.
#[derive(Debug, Clone)]
pub struct InputBufferSection {
    parent: InputBufferPtr,
    base: usize,
    len: usize,
}

impl InputBufferSection {
    pub fn new(parent: InputBufferPtr, base: usize, len: usize) -> Result<Self> {
        check_range(base, len, parent.size())?;
        // A zero-sized window still has to start inside (or at the end of) the parent
        if base > parent.size() {
            return Err(BufferErrc::BufferOverrun.into());
        }
        Ok(Self { parent, base, len })
    }

    pub fn parent(&self) -> &InputBufferPtr {
        &self.parent
    }

    /// Offset of the window within the parent buffer.
    pub fn base(&self) -> usize {
        self.base
    }
}

impl InputBuffer for InputBufferSection {
    fn size(&self) -> usize {
        self.len
    }

    fn read(&self, pos: usize, out: &mut [u8]) -> Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        check_range(pos, out.len(), self.len)?;
        self.parent.read(self.base + pos, out)
    }

    fn raw_data(&self, pos: usize, count: usize) -> Result<Option<&[u8]>> {
        check_range(pos, count, self.len)?;
        if count == 0 {
            return Ok(Some(&[]));
        }
        self.parent.raw_data(self.base + pos, count)
    }

    fn absolute_offset(&self) -> usize {
        self.parent.absolute_offset().saturating_add(self.base)
    }
}
