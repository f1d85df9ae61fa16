//! Read-only byte sources and the views built on top of them.
//!
//! Every parser in the crate reads through [`InputBuffer`]. Buffers are
//! shared via [`InputBufferPtr`] (an `Arc`), never mutated after
//! construction, and can be narrowed into zero-copy section views that keep
//! the backing storage alive for as long as any view exists.
//!
//! - [`InputMemoryBuffer`] - flat bytes (owned, static, or memory-mapped)
//! - [`InputBufferSection`] - window `[base, base + len)` re-based to zero
//! - [`InputBufferStatefulWrapper`] - adds a movable read cursor
//! - [`RefBuffer`] - holds either a view or an eager copy of a buffer
//! - [`OutputMemoryBuffer`] - growable sink used by the serializer

use std::fmt;
use std::sync::Arc;

use crate::error::{BufferErrc, Result};
use crate::math;

pub mod memory;
pub mod output;
pub mod ref_buffer;
pub mod section;
pub mod stateful;

pub use memory::InputMemoryBuffer;
pub use output::{OutputBuffer, OutputMemoryBuffer};
pub use ref_buffer::RefBuffer;
pub use section::InputBufferSection;
pub use stateful::InputBufferStatefulWrapper;

/// Shared handle to a read-only buffer.
pub type InputBufferPtr = Arc<dyn InputBuffer>;

/// A read-only, bounds-checked byte source.
pub trait InputBuffer: fmt::Debug + Send + Sync {
    /// Total number of bytes addressable through this buffer.
    fn size(&self) -> usize;

    /// Copy `out.len()` bytes starting at `pos` into `out`.
    ///
    /// Reading zero bytes always succeeds, whatever `pos` is. Otherwise the
    /// read fails with [`BufferErrc::BufferOverrun`] if `pos + out.len()`
    /// overflows or exceeds [`size`](Self::size).
    fn read(&self, pos: usize, out: &mut [u8]) -> Result<usize>;

    /// Borrow `count` bytes at `pos` directly from contiguous storage.
    ///
    /// Returns `Ok(None)` when the buffer is not backed by contiguous memory;
    /// callers then fall back to [`read`](Self::read). Range errors are
    /// reported the same way as for `read`.
    fn raw_data(&self, pos: usize, count: usize) -> Result<Option<&[u8]>> {
        check_range(pos, count, self.size())?;
        Ok(None)
    }

    /// Offset of this buffer's first byte within the root byte source.
    fn absolute_offset(&self) -> usize {
        0
    }
}

/// Validate a `[pos, pos + count)` request against `size`.
///
/// Zero-length requests are always valid.
#[inline]
pub fn check_range(pos: usize, count: usize, size: usize) -> Result<()> {
    if count == 0 {
        return Ok(());
    }
    if !math::is_sum_safe(pos, count) || pos + count > size {
        return Err(BufferErrc::BufferOverrun.into());
    }
    Ok(())
}

/// Narrow `buffer` to `[pos, pos + size)`.
pub fn reduce(buffer: &InputBufferPtr, pos: usize, size: usize) -> Result<InputBufferPtr> {
    Ok(Arc::new(InputBufferSection::new(buffer.clone(), pos, size)?))
}

/// Narrow `buffer` to everything from `pos` to its end.
pub fn reduce_from(buffer: &InputBufferPtr, pos: usize) -> Result<InputBufferPtr> {
    let size = buffer
        .size()
        .checked_sub(pos)
        .ok_or(BufferErrc::BufferOverrun)?;
    reduce(buffer, pos, size)
}

/// Read the whole buffer into a freshly allocated vector.
pub fn read_all(buffer: &dyn InputBuffer) -> Result<Vec<u8>> {
    if let Some(raw) = buffer.raw_data(0, buffer.size())? {
        return Ok(raw.to_vec());
    }
    let mut data = vec![0u8; buffer.size()];
    buffer.read(0, &mut data)?;
    Ok(data)
}
