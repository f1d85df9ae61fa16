//! Trailing data past the last section

use crate::buffers::{reduce_from, InputBufferPtr, OutputBuffer, RefBuffer};
use crate::error::{OverlayErrc, PeError, Result};
use crate::math::{self, SafeUint};

/// Bytes appended after the last section's raw data.
#[derive(Debug, Clone, Default)]
pub struct Overlay {
    buffer: RefBuffer,
    offset: Option<u64>,
}

impl Overlay {
    pub fn buffer(&self) -> &RefBuffer {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut RefBuffer {
        &mut self.buffer
    }

    /// File offset the overlay starts at, once computed.
    pub fn offset(&self) -> Option<u64> {
        self.offset
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Capture everything from `max(section_data_end, size_of_headers)` to
    /// the end of `buffer`. A start at or past the end yields an empty
    /// overlay.
    pub fn deserialize(
        &mut self,
        section_data_end: u64,
        size_of_headers: u32,
        image_start_buffer_pos: usize,
        buffer: &InputBufferPtr,
        copy_memory: bool,
    ) -> Result<()> {
        self.load(
            section_data_end,
            size_of_headers,
            image_start_buffer_pos,
            buffer,
            copy_memory,
        )
        .map_err(|e| PeError::nested(OverlayErrc::UnableToReadOverlay, e))
    }

    fn load(
        &mut self,
        section_data_end: u64,
        size_of_headers: u32,
        image_start_buffer_pos: usize,
        buffer: &InputBufferPtr,
        copy_memory: bool,
    ) -> Result<()> {
        let offset = section_data_end.max(size_of_headers as u64);

        let mut start = SafeUint::new(image_start_buffer_pos);
        start.add(math::to_usize(offset)?)?;
        let mut captured = RefBuffer::default();
        if start.value() < buffer.size() {
            captured.deserialize(reduce_from(buffer, start.value())?, copy_memory)?;
        }

        self.buffer = captured;
        self.offset = Some(offset);
        Ok(())
    }

    pub fn serialize(&self, out: &mut dyn OutputBuffer) -> Result<usize> {
        self.buffer.serialize(out)
    }
}
