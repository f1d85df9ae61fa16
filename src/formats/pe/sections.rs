//! Section headers, section table validation and section data

use crate::buffers::{
    reduce, InputBufferPtr, InputBufferStatefulWrapper, OutputBuffer, RefBuffer,
};
use crate::error::{PeError, Result, SectionErrc};
use crate::error_list::ErrorList;
use crate::formats::pe::optional_header::OptionalHeader;
use crate::formats::pe::types::*;
use crate::math::{self, SafeUint};
use crate::packed::{FieldReader, FieldWriter, PackedLayout, PackedStruct};

/// Section header (40 bytes)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageSectionHeader {
    pub name: [u8; 8],
    pub virtual_size: u32,
    pub virtual_address: u32,
    pub size_of_raw_data: u32,
    pub pointer_to_raw_data: u32,
    pub pointer_to_relocations: u32,
    pub pointer_to_line_numbers: u32,
    pub number_of_relocations: u16,
    pub number_of_line_numbers: u16,
    pub characteristics: u32,
}

impl PackedLayout for ImageSectionHeader {
    const PACKED_SIZE: usize = 40;

    fn decode(f: &mut FieldReader<'_>) -> Self {
        Self {
            name: f.array(),
            virtual_size: f.u32(),
            virtual_address: f.u32(),
            size_of_raw_data: f.u32(),
            pointer_to_raw_data: f.u32(),
            pointer_to_relocations: f.u32(),
            pointer_to_line_numbers: f.u32(),
            number_of_relocations: f.u16(),
            number_of_line_numbers: f.u16(),
            characteristics: f.u32(),
        }
    }

    fn encode(&self, f: &mut FieldWriter<'_>) {
        f.bytes(&self.name);
        f.u32(self.virtual_size);
        f.u32(self.virtual_address);
        f.u32(self.size_of_raw_data);
        f.u32(self.pointer_to_raw_data);
        f.u32(self.pointer_to_relocations);
        f.u32(self.pointer_to_line_numbers);
        f.u16(self.number_of_relocations);
        f.u16(self.number_of_line_numbers);
        f.u32(self.characteristics);
    }
}

#[derive(Debug, Clone, Default)]
pub struct SectionHeader {
    descriptor: PackedStruct<ImageSectionHeader>,
}

impl SectionHeader {
    pub fn new(header: ImageSectionHeader) -> Self {
        Self {
            descriptor: PackedStruct::new(header),
        }
    }

    pub fn descriptor(&self) -> &PackedStruct<ImageSectionHeader> {
        &self.descriptor
    }

    pub fn descriptor_mut(&mut self) -> &mut PackedStruct<ImageSectionHeader> {
        &mut self.descriptor
    }

    pub fn name(&self) -> String {
        let name = &self.descriptor.name;
        let end = name.iter().position(|&b| b == 0).unwrap_or(8);
        String::from_utf8_lossy(&name[..end]).to_string()
    }

    pub fn characteristics(&self) -> SectionCharacteristics {
        SectionCharacteristics::from_bits_retain(self.descriptor.characteristics)
    }

    pub fn is_executable(&self) -> bool {
        self.characteristics().contains(SectionCharacteristics::MEM_EXECUTE)
    }

    pub fn is_readable(&self) -> bool {
        self.characteristics().contains(SectionCharacteristics::MEM_READ)
    }

    pub fn is_writable(&self) -> bool {
        self.characteristics().contains(SectionCharacteristics::MEM_WRITE)
    }

    pub fn virtual_address(&self) -> u32 {
        self.descriptor.virtual_address
    }

    /// Effective raw data pointer. Page-aligned images have it rounded down
    /// to 512 bytes, as the Windows loader does.
    pub fn pointer_to_raw_data(&self, section_alignment: u32) -> u32 {
        let pointer = self.descriptor.pointer_to_raw_data;
        if section_alignment >= PAGE_SIZE {
            math::align_down(pointer, MIN_RAW_POINTER_ALIGNMENT)
        } else {
            pointer
        }
    }

    /// Number of raw bytes actually mapped: never more than the aligned
    /// virtual size.
    pub fn raw_size(&self, section_alignment: u32) -> u32 {
        let raw_size = self.descriptor.size_of_raw_data;
        let virtual_size = self.descriptor.virtual_size;
        if virtual_size == 0 {
            return raw_size;
        }
        match math::align_up(virtual_size, section_alignment) {
            Some(aligned) => raw_size.min(aligned),
            None => raw_size,
        }
    }

    /// Virtual size rounded up to the section alignment. A zero virtual size
    /// falls back to the raw size. `None` when the result does not fit.
    pub fn aligned_virtual_size(&self, section_alignment: u32) -> Option<u32> {
        let size = match self.descriptor.virtual_size {
            0 => self.descriptor.size_of_raw_data,
            size => size,
        };
        math::align_up(size, section_alignment)
    }

    /// End of the virtual range (exclusive), computed without wrapping.
    pub fn virtual_end(&self, section_alignment: u32) -> Option<u32> {
        self.aligned_virtual_size(section_alignment)?
            .checked_add(self.descriptor.virtual_address)
    }

    pub fn contains_rva(&self, rva: u32, section_alignment: u32) -> bool {
        let start = self.descriptor.virtual_address;
        match self.virtual_end(section_alignment) {
            Some(end) => rva >= start && rva < end,
            None => rva >= start,
        }
    }

    /// Map an RVA inside this section to its file offset. RVAs in the
    /// zero-filled tail have no file offset.
    pub fn rva_to_file_offset(&self, rva: u32, section_alignment: u32) -> Option<u32> {
        if !self.contains_rva(rva, section_alignment) {
            return None;
        }
        let delta = rva - self.descriptor.virtual_address;
        if delta >= self.raw_size(section_alignment) {
            return None;
        }
        self.pointer_to_raw_data(section_alignment).checked_add(delta)
    }
}

/// Section header table, in file order.
#[derive(Debug, Clone, Default)]
pub struct SectionTable {
    headers: Vec<SectionHeader>,
}

impl SectionTable {
    pub fn new(headers: Vec<SectionHeader>) -> Self {
        Self { headers }
    }

    pub fn headers(&self) -> &[SectionHeader] {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Vec<SectionHeader> {
        &mut self.headers
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub fn last(&self) -> Option<&SectionHeader> {
        self.headers.last()
    }

    /// Decode `count` headers at the cursor.
    pub fn deserialize(
        &mut self,
        buf: &mut InputBufferStatefulWrapper,
        count: u16,
        allow_virtual: bool,
    ) -> Result<()> {
        let mut headers = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let mut header = SectionHeader::default();
            header
                .descriptor
                .deserialize(buf, allow_virtual)
                .map_err(|e| PeError::nested(SectionErrc::UnableToReadSectionTable, e))?;
            headers.push(header);
        }
        self.headers = headers;
        Ok(())
    }

    pub fn serialize(&self, out: &mut dyn OutputBuffer, write_virtual_part: bool) -> usize {
        self.headers
            .iter()
            .map(|header| header.descriptor.serialize(out, write_virtual_part))
            .sum()
    }

    /// File offset right past the last byte of raw section data.
    pub fn raw_data_end_offset(&self, section_alignment: u32) -> u64 {
        self.headers
            .iter()
            .filter(|h| h.raw_size(section_alignment) != 0)
            .map(|h| {
                h.pointer_to_raw_data(section_alignment) as u64 + h.raw_size(section_alignment) as u64
            })
            .max()
            .unwrap_or(0)
    }

    /// Find section by name
    pub fn by_name(&self, name: &str) -> Option<(usize, &SectionHeader)> {
        self.headers.iter().enumerate().find(|(_, h)| h.name() == name)
    }

    /// Like [`by_name`](Self::by_name) but fails with `SectionNotFound`.
    pub fn by_name_strict(&self, name: &str) -> Result<(usize, &SectionHeader)> {
        self.by_name(name)
            .ok_or_else(|| SectionErrc::SectionNotFound.into())
    }

    /// Find section containing RVA
    pub fn by_rva(&self, rva: u32, section_alignment: u32) -> Option<(usize, &SectionHeader)> {
        self.headers
            .iter()
            .enumerate()
            .find(|(_, h)| h.contains_rva(rva, section_alignment))
    }

    pub fn rva_to_file_offset(&self, rva: u32, section_alignment: u32) -> Option<u32> {
        self.by_rva(rva, section_alignment)
            .and_then(|(_, h)| h.rva_to_file_offset(rva, section_alignment))
    }
}

/// Check every section header against the optional header's alignments and
/// against its neighbours. Violations are recorded with the section index.
pub fn validate_section_headers(
    optional_header: &OptionalHeader,
    headers: &[SectionHeader],
    errors: &mut ErrorList,
) {
    let file_alignment = optional_header.file_alignment();
    let section_alignment = optional_header.section_alignment();
    let file_aligned = math::is_power_of_2(file_alignment as u64);
    let section_aligned = math::is_power_of_2(section_alignment as u64);

    let mut prev_end: Option<u32> = None;
    for (index, header) in headers.iter().enumerate() {
        let context = index as u64;
        let raw = header.descriptor();

        if file_aligned && raw.size_of_raw_data != 0 {
            if raw.pointer_to_raw_data % file_alignment != 0 {
                errors.add_error_with_context(SectionErrc::UnalignedRawAddress, context);
            }
            if raw.size_of_raw_data % file_alignment != 0 {
                errors.add_error_with_context(SectionErrc::UnalignedRawSize, context);
            }
        }

        if section_aligned && raw.virtual_address % section_alignment != 0 {
            errors.add_error_with_context(SectionErrc::UnalignedVirtualAddress, context);
        }

        if let Some(prev_end) = prev_end {
            if raw.virtual_address != prev_end {
                errors.add_error_with_context(SectionErrc::VirtualGapBetweenSections, context);
            }
        }

        prev_end = header.virtual_end(section_alignment);
        if prev_end.is_none() {
            errors.add_error_with_context(SectionErrc::VirtualRangeOverflow, context);
        }
    }

    // Raw ranges sorted by start; anything starting before the furthest end
    // seen so far overlaps an earlier range.
    let mut ranges: Vec<(u64, u64, usize)> = headers
        .iter()
        .enumerate()
        .filter(|(_, h)| h.raw_size(section_alignment) != 0)
        .map(|(index, h)| {
            let start = h.pointer_to_raw_data(section_alignment) as u64;
            (start, start + h.raw_size(section_alignment) as u64, index)
        })
        .collect();
    ranges.sort_unstable();

    let mut furthest_end = 0u64;
    for (start, end, index) in ranges {
        if start < furthest_end {
            errors.add_error_with_context(SectionErrc::RawDataOverlap, index as u64);
        }
        furthest_end = furthest_end.max(end);
    }
}

/// The declared size of image must equal the end of the last section (or of
/// the headers when there are none), rounded up to the section alignment.
///
/// Both directions are reported: a smaller value leaves the tail of the last
/// section outside the mapped image, and a larger one maps pages that no
/// section header describes.
pub fn validate_size_of_image(
    last_section: Option<&SectionHeader>,
    optional_header: &OptionalHeader,
) -> Result<()> {
    let section_alignment = optional_header.section_alignment();
    let end = match last_section {
        Some(section) => section.virtual_end(section_alignment),
        None => Some(optional_header.size_of_headers()),
    };
    let expected = end.and_then(|end| math::align_up(end, section_alignment));
    if expected != Some(optional_header.size_of_image()) {
        return Err(SectionErrc::InvalidSizeOfImage.into());
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SectionDataLoadOptions {
    pub section_alignment: u32,
    pub copy_memory: bool,
    pub image_loaded_to_memory: bool,
    /// Position of the image's first byte within the buffer.
    pub image_start_buffer_pos: usize,
}

/// Raw contents of one section.
#[derive(Debug, Clone, Default)]
pub struct SectionData {
    buffer: RefBuffer,
}

impl SectionData {
    pub fn buffer(&self) -> &RefBuffer {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut RefBuffer {
        &mut self.buffer
    }

    pub fn is_loaded(&self) -> bool {
        self.buffer.is_loaded()
    }

    /// Capture the section's bytes, addressed by raw pointer or (for
    /// memory-loaded images) by virtual address.
    pub fn deserialize(
        &mut self,
        header: &SectionHeader,
        buffer: &InputBufferPtr,
        options: &SectionDataLoadOptions,
    ) -> Result<()> {
        self.load(header, buffer, options)
            .map_err(|e| PeError::nested(SectionErrc::UnableToReadSectionData, e))
    }

    fn load(
        &mut self,
        header: &SectionHeader,
        buffer: &InputBufferPtr,
        options: &SectionDataLoadOptions,
    ) -> Result<()> {
        let raw_size = header.raw_size(options.section_alignment) as usize;
        let mut pos = SafeUint::new(options.image_start_buffer_pos);
        if options.image_loaded_to_memory {
            pos.add(header.virtual_address())?;
        } else {
            pos.add(header.pointer_to_raw_data(options.section_alignment))?;
        }

        let view = reduce(buffer, pos.value(), raw_size)?;
        self.buffer.deserialize(view, options.copy_memory)
    }

    pub fn serialize(&self, out: &mut dyn OutputBuffer) -> Result<usize> {
        self.buffer.serialize(out)
    }
}
