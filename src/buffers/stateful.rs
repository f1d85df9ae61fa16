//! Cursor-based sequential access over any input buffer.

use tracing::trace;

use super::{InputBuffer, InputBufferPtr};
use crate::error::{BufferErrc, Result};
use crate::math;

/// Adds a movable read position (`rpos`) to a shared buffer.
///
/// The cursor is private to the wrapper: several wrappers (or section views)
/// may alias the same backing storage without affecting each other.
#[derive(Debug, Clone)]
pub struct InputBufferStatefulWrapper {
    buffer: InputBufferPtr,
    rpos: usize,
}

impl InputBufferStatefulWrapper {
    pub fn new(buffer: InputBufferPtr) -> Self {
        Self { buffer, rpos: 0 }
    }

    pub fn buffer(&self) -> &InputBufferPtr {
        &self.buffer
    }

    pub fn size(&self) -> usize {
        self.buffer.size()
    }

    pub fn rpos(&self) -> usize {
        self.rpos
    }

    /// Bytes between the cursor and the end of the buffer.
    pub fn remaining(&self) -> usize {
        self.buffer.size().saturating_sub(self.rpos)
    }

    /// Position of the cursor within the root byte source.
    pub fn absolute_offset(&self) -> usize {
        self.buffer.absolute_offset().saturating_add(self.rpos)
    }

    /// Move the cursor. Positions past the end of the buffer are rejected;
    /// positioning exactly at the end is allowed.
    pub fn set_rpos(&mut self, pos: usize) -> Result<()> {
        if pos > self.buffer.size() {
            return Err(BufferErrc::BufferOverrun.into());
        }
        trace!(from = self.rpos, to = pos, "Repositioning read cursor");
        self.rpos = pos;
        Ok(())
    }

    pub fn advance_rpos(&mut self, delta: usize) -> Result<()> {
        let pos = math::checked_add(self.rpos, delta)?;
        self.set_rpos(pos)
    }

    /// Read exactly `out.len()` bytes at the cursor and advance past them.
    pub fn read_next(&mut self, out: &mut [u8]) -> Result<usize> {
        let count = self.buffer.read(self.rpos, out)?;
        self.rpos += count;
        Ok(count)
    }

    /// Read as many of `out.len()` bytes as the buffer still holds.
    ///
    /// Returns the number of bytes physically read; the rest of `out` is
    /// left untouched.
    pub fn read_up_to(&mut self, out: &mut [u8]) -> Result<usize> {
        let count = out.len().min(self.remaining());
        self.read_next(&mut out[..count])
    }
}

impl InputBuffer for InputBufferStatefulWrapper {
    fn size(&self) -> usize {
        self.buffer.size()
    }

    fn read(&self, pos: usize, out: &mut [u8]) -> Result<usize> {
        self.buffer.read(pos, out)
    }

    fn raw_data(&self, pos: usize, count: usize) -> Result<Option<&[u8]>> {
        self.buffer.raw_data(pos, count)
    }

    fn absolute_offset(&self) -> usize {
        self.buffer.absolute_offset()
    }
}
