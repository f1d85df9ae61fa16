//! Fixed-layout little-endian record codec.
//!
//! A [`PackedStruct`] wraps a decoded record together with the number of its
//! bytes that were physically present in the source. Headers loaded from an
//! in-memory image may end past the end of the file; with virtual reads
//! allowed, the missing tail decodes as zeros and is remembered as virtual so
//! that re-serialization reproduces the original file bytes.

use std::ops::{Deref, DerefMut};

use crate::buffers::{InputBufferStatefulWrapper, OutputBuffer};
use crate::error::{BufferErrc, PeError, Result};

/// A record with a fixed on-disk size and a little-endian field layout.
pub trait PackedLayout: Default + Clone + std::fmt::Debug {
    /// Declared on-disk byte length.
    const PACKED_SIZE: usize;

    fn decode(fields: &mut FieldReader<'_>) -> Self;
    fn encode(&self, fields: &mut FieldWriter<'_>);
}

/// Sequential little-endian reader over a fully sized record image.
///
/// The input always holds `PACKED_SIZE` bytes (virtual tails are zero-filled
/// before decoding); reads past the end yield zero.
pub struct FieldReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn array<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        if let Some(src) = self.data.get(self.pos..self.pos + N) {
            out.copy_from_slice(src);
        }
        self.pos += N;
        out
    }

    pub fn u8(&mut self) -> u8 {
        self.array::<1>()[0]
    }

    pub fn u16(&mut self) -> u16 {
        u16::from_le_bytes(self.array())
    }

    pub fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.array())
    }

    pub fn u64(&mut self) -> u64 {
        u64::from_le_bytes(self.array())
    }
}

/// Sequential little-endian writer into a record image.
pub struct FieldWriter<'a> {
    out: &'a mut [u8],
    pos: usize,
}

impl<'a> FieldWriter<'a> {
    pub fn new(out: &'a mut [u8]) -> Self {
        Self { out, pos: 0 }
    }

    pub fn bytes(&mut self, data: &[u8]) {
        if let Some(dst) = self.out.get_mut(self.pos..self.pos + data.len()) {
            dst.copy_from_slice(data);
        }
        self.pos += data.len();
    }

    pub fn u8(&mut self, value: u8) {
        self.bytes(&[value]);
    }

    pub fn u16(&mut self, value: u16) {
        self.bytes(&value.to_le_bytes());
    }

    pub fn u32(&mut self, value: u32) {
        self.bytes(&value.to_le_bytes());
    }

    pub fn u64(&mut self, value: u64) {
        self.bytes(&value.to_le_bytes());
    }
}

impl PackedLayout for u16 {
    const PACKED_SIZE: usize = 2;

    fn decode(fields: &mut FieldReader<'_>) -> Self {
        fields.u16()
    }

    fn encode(&self, fields: &mut FieldWriter<'_>) {
        fields.u16(*self);
    }
}

impl PackedLayout for u32 {
    const PACKED_SIZE: usize = 4;

    fn decode(fields: &mut FieldReader<'_>) -> Self {
        fields.u32()
    }

    fn encode(&self, fields: &mut FieldWriter<'_>) {
        fields.u32(*self);
    }
}

/// A decoded record plus where it came from and how much of it was physical.
#[derive(Debug, Clone)]
pub struct PackedStruct<T: PackedLayout> {
    value: T,
    physical_size: usize,
    buffer_pos: usize,
    absolute_offset: usize,
}

impl<T: PackedLayout> Default for PackedStruct<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: PackedLayout> PackedStruct<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            physical_size: T::PACKED_SIZE,
            buffer_pos: 0,
            absolute_offset: 0,
        }
    }

    pub const fn packed_size() -> usize {
        T::PACKED_SIZE
    }

    /// Decode the record at the wrapper's cursor and advance past it.
    ///
    /// When fewer than `PACKED_SIZE` bytes remain, `allow_virtual` decides
    /// between failing with `UnableToReadBuffer` and decoding the physical
    /// prefix with a zero-filled tail. A failed decode leaves both the
    /// record and the cursor untouched.
    pub fn deserialize(
        &mut self,
        buf: &mut InputBufferStatefulWrapper,
        allow_virtual: bool,
    ) -> Result<()> {
        if buf.remaining() < T::PACKED_SIZE && !allow_virtual {
            return Err(PeError::nested(
                BufferErrc::UnableToReadBuffer,
                PeError::new(BufferErrc::BufferOverrun),
            ));
        }

        let buffer_pos = buf.rpos();
        let absolute_offset = buf.absolute_offset();
        let mut raw = vec![0u8; T::PACKED_SIZE];
        let physical_size = buf.read_up_to(&mut raw)?;

        self.value = T::decode(&mut FieldReader::new(&raw));
        self.physical_size = physical_size;
        self.buffer_pos = buffer_pos;
        self.absolute_offset = absolute_offset;
        Ok(())
    }

    /// Encode the record. The virtual tail is only written when
    /// `write_virtual_part` is set. Returns the number of bytes written.
    pub fn serialize(&self, out: &mut dyn OutputBuffer, write_virtual_part: bool) -> usize {
        let raw = self.to_bytes();
        let count = if write_virtual_part {
            T::PACKED_SIZE
        } else {
            self.physical_size
        };
        out.write(&raw[..count]);
        count
    }

    /// Full record image, virtual part included.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut raw = vec![0u8; T::PACKED_SIZE];
        self.value.encode(&mut FieldWriter::new(&mut raw));
        raw
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.value
    }

    pub fn into_inner(self) -> T {
        self.value
    }

    /// Bytes of the record that were present in the source.
    pub fn physical_size(&self) -> usize {
        self.physical_size
    }

    /// True when part of the record lies past the end of the source.
    pub fn is_virtual(&self) -> bool {
        self.physical_size < T::PACKED_SIZE
    }

    /// Mark the whole record as physical (e.g. after editing it).
    pub fn set_physical(&mut self) {
        self.physical_size = T::PACKED_SIZE;
    }

    /// Cursor position the record was decoded from.
    pub fn buffer_pos(&self) -> usize {
        self.buffer_pos
    }

    pub fn absolute_offset(&self) -> usize {
        self.absolute_offset
    }
}

impl<T: PackedLayout> Deref for PackedStruct<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T: PackedLayout> DerefMut for PackedStruct<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}
