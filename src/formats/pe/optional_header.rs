//! PE32 / PE32+ optional header and its validation rules

use serde::{Deserialize, Serialize};

use crate::buffers::{InputBufferStatefulWrapper, OutputBuffer};
use crate::error::{OptionalHeaderErrc, PeError, Result};
use crate::error_list::ErrorList;
use crate::formats::pe::types::*;
use crate::math;
use crate::packed::{FieldReader, FieldWriter, PackedLayout, PackedStruct};

/// 32-bit optional header, without the leading magic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageOptionalHeader32 {
    pub major_linker_version: u8,
    pub minor_linker_version: u8,
    pub size_of_code: u32,
    pub size_of_initialized_data: u32,
    pub size_of_uninitialized_data: u32,
    pub address_of_entry_point: u32,
    pub base_of_code: u32,
    pub base_of_data: u32,
    pub image_base: u32,
    pub section_alignment: u32,
    pub file_alignment: u32,
    pub major_operating_system_version: u16,
    pub minor_operating_system_version: u16,
    pub major_image_version: u16,
    pub minor_image_version: u16,
    pub major_subsystem_version: u16,
    pub minor_subsystem_version: u16,
    pub win32_version_value: u32,
    pub size_of_image: u32,
    pub size_of_headers: u32,
    pub checksum: u32,
    pub subsystem: u16,
    pub dll_characteristics: u16,
    pub size_of_stack_reserve: u32,
    pub size_of_stack_commit: u32,
    pub size_of_heap_reserve: u32,
    pub size_of_heap_commit: u32,
    pub loader_flags: u32,
    pub number_of_rva_and_sizes: u32,
}

impl PackedLayout for ImageOptionalHeader32 {
    const PACKED_SIZE: usize = 94;

    fn decode(f: &mut FieldReader<'_>) -> Self {
        Self {
            major_linker_version: f.u8(),
            minor_linker_version: f.u8(),
            size_of_code: f.u32(),
            size_of_initialized_data: f.u32(),
            size_of_uninitialized_data: f.u32(),
            address_of_entry_point: f.u32(),
            base_of_code: f.u32(),
            base_of_data: f.u32(),
            image_base: f.u32(),
            section_alignment: f.u32(),
            file_alignment: f.u32(),
            major_operating_system_version: f.u16(),
            minor_operating_system_version: f.u16(),
            major_image_version: f.u16(),
            minor_image_version: f.u16(),
            major_subsystem_version: f.u16(),
            minor_subsystem_version: f.u16(),
            win32_version_value: f.u32(),
            size_of_image: f.u32(),
            size_of_headers: f.u32(),
            checksum: f.u32(),
            subsystem: f.u16(),
            dll_characteristics: f.u16(),
            size_of_stack_reserve: f.u32(),
            size_of_stack_commit: f.u32(),
            size_of_heap_reserve: f.u32(),
            size_of_heap_commit: f.u32(),
            loader_flags: f.u32(),
            number_of_rva_and_sizes: f.u32(),
        }
    }

    fn encode(&self, f: &mut FieldWriter<'_>) {
        f.u8(self.major_linker_version);
        f.u8(self.minor_linker_version);
        f.u32(self.size_of_code);
        f.u32(self.size_of_initialized_data);
        f.u32(self.size_of_uninitialized_data);
        f.u32(self.address_of_entry_point);
        f.u32(self.base_of_code);
        f.u32(self.base_of_data);
        f.u32(self.image_base);
        f.u32(self.section_alignment);
        f.u32(self.file_alignment);
        f.u16(self.major_operating_system_version);
        f.u16(self.minor_operating_system_version);
        f.u16(self.major_image_version);
        f.u16(self.minor_image_version);
        f.u16(self.major_subsystem_version);
        f.u16(self.minor_subsystem_version);
        f.u32(self.win32_version_value);
        f.u32(self.size_of_image);
        f.u32(self.size_of_headers);
        f.u32(self.checksum);
        f.u16(self.subsystem);
        f.u16(self.dll_characteristics);
        f.u32(self.size_of_stack_reserve);
        f.u32(self.size_of_stack_commit);
        f.u32(self.size_of_heap_reserve);
        f.u32(self.size_of_heap_commit);
        f.u32(self.loader_flags);
        f.u32(self.number_of_rva_and_sizes);
    }
}

/// 64-bit optional header, without the leading magic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageOptionalHeader64 {
    pub major_linker_version: u8,
    pub minor_linker_version: u8,
    pub size_of_code: u32,
    pub size_of_initialized_data: u32,
    pub size_of_uninitialized_data: u32,
    pub address_of_entry_point: u32,
    pub base_of_code: u32,
    pub image_base: u64,
    pub section_alignment: u32,
    pub file_alignment: u32,
    pub major_operating_system_version: u16,
    pub minor_operating_system_version: u16,
    pub major_image_version: u16,
    pub minor_image_version: u16,
    pub major_subsystem_version: u16,
    pub minor_subsystem_version: u16,
    pub win32_version_value: u32,
    pub size_of_image: u32,
    pub size_of_headers: u32,
    pub checksum: u32,
    pub subsystem: u16,
    pub dll_characteristics: u16,
    pub size_of_stack_reserve: u64,
    pub size_of_stack_commit: u64,
    pub size_of_heap_reserve: u64,
    pub size_of_heap_commit: u64,
    pub loader_flags: u32,
    pub number_of_rva_and_sizes: u32,
}

impl PackedLayout for ImageOptionalHeader64 {
    const PACKED_SIZE: usize = 110;

    fn decode(f: &mut FieldReader<'_>) -> Self {
        Self {
            major_linker_version: f.u8(),
            minor_linker_version: f.u8(),
            size_of_code: f.u32(),
            size_of_initialized_data: f.u32(),
            size_of_uninitialized_data: f.u32(),
            address_of_entry_point: f.u32(),
            base_of_code: f.u32(),
            image_base: f.u64(),
            section_alignment: f.u32(),
            file_alignment: f.u32(),
            major_operating_system_version: f.u16(),
            minor_operating_system_version: f.u16(),
            major_image_version: f.u16(),
            minor_image_version: f.u16(),
            major_subsystem_version: f.u16(),
            minor_subsystem_version: f.u16(),
            win32_version_value: f.u32(),
            size_of_image: f.u32(),
            size_of_headers: f.u32(),
            checksum: f.u32(),
            subsystem: f.u16(),
            dll_characteristics: f.u16(),
            size_of_stack_reserve: f.u64(),
            size_of_stack_commit: f.u64(),
            size_of_heap_reserve: f.u64(),
            size_of_heap_commit: f.u64(),
            loader_flags: f.u32(),
            number_of_rva_and_sizes: f.u32(),
        }
    }

    fn encode(&self, f: &mut FieldWriter<'_>) {
        f.u8(self.major_linker_version);
        f.u8(self.minor_linker_version);
        f.u32(self.size_of_code);
        f.u32(self.size_of_initialized_data);
        f.u32(self.size_of_uninitialized_data);
        f.u32(self.address_of_entry_point);
        f.u32(self.base_of_code);
        f.u64(self.image_base);
        f.u32(self.section_alignment);
        f.u32(self.file_alignment);
        f.u16(self.major_operating_system_version);
        f.u16(self.minor_operating_system_version);
        f.u16(self.major_image_version);
        f.u16(self.minor_image_version);
        f.u16(self.major_subsystem_version);
        f.u16(self.minor_subsystem_version);
        f.u32(self.win32_version_value);
        f.u32(self.size_of_image);
        f.u32(self.size_of_headers);
        f.u32(self.checksum);
        f.u16(self.subsystem);
        f.u16(self.dll_characteristics);
        f.u64(self.size_of_stack_reserve);
        f.u64(self.size_of_stack_commit);
        f.u64(self.size_of_heap_reserve);
        f.u64(self.size_of_heap_commit);
        f.u32(self.loader_flags);
        f.u32(self.number_of_rva_and_sizes);
    }
}

/// Width-specific part of the optional header
#[derive(Debug, Clone)]
pub enum OptionalHeaderVariant {
    Pe32(PackedStruct<ImageOptionalHeader32>),
    Pe32Plus(PackedStruct<ImageOptionalHeader64>),
}

impl Default for OptionalHeaderVariant {
    fn default() -> Self {
        Self::Pe32(PackedStruct::default())
    }
}

/// Which warning-level optional header checks the loader runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptionalHeaderValidationOptions {
    pub validate_address_of_entry_point: bool,
    pub validate_alignments: bool,
    pub validate_subsystem_version: bool,
    pub validate_size_of_heap: bool,
    pub validate_size_of_stack: bool,
    pub validate_size_of_headers: bool,
    pub validate_subsystem: bool,
}

impl Default for OptionalHeaderValidationOptions {
    fn default() -> Self {
        Self {
            validate_address_of_entry_point: true,
            validate_alignments: true,
            validate_subsystem_version: true,
            validate_size_of_heap: true,
            validate_size_of_stack: true,
            validate_size_of_headers: true,
            validate_subsystem: true,
        }
    }
}

/// Read a field that exists in both variants.
macro_rules! field {
    ($self:ident, $name:ident) => {
        match &$self.header {
            OptionalHeaderVariant::Pe32(h) => h.$name,
            OptionalHeaderVariant::Pe32Plus(h) => h.$name,
        }
    };
    ($self:ident, $name:ident as u64) => {
        match &$self.header {
            OptionalHeaderVariant::Pe32(h) => h.$name as u64,
            OptionalHeaderVariant::Pe32Plus(h) => h.$name,
        }
    };
}

#[derive(Debug, Clone)]
pub struct OptionalHeader {
    magic: PackedStruct<u16>,
    header: OptionalHeaderVariant,
}

impl Default for OptionalHeader {
    fn default() -> Self {
        Self {
            magic: PackedStruct::new(PE32_MAGIC),
            header: OptionalHeaderVariant::default(),
        }
    }
}

impl OptionalHeader {
    /// Build a header from a decoded variant with the matching magic.
    pub fn new(header: OptionalHeaderVariant) -> Self {
        let magic = match header {
            OptionalHeaderVariant::Pe32(_) => PE32_MAGIC,
            OptionalHeaderVariant::Pe32Plus(_) => PE32PLUS_MAGIC,
        };
        Self {
            magic: PackedStruct::new(magic),
            header,
        }
    }

    pub fn variant(&self) -> &OptionalHeaderVariant {
        &self.header
    }

    pub fn variant_mut(&mut self) -> &mut OptionalHeaderVariant {
        &mut self.header
    }

    pub fn magic(&self) -> u16 {
        *self.magic
    }

    pub fn is_64bit(&self) -> bool {
        matches!(self.header, OptionalHeaderVariant::Pe32Plus(_))
    }

    /// Decoded size including the magic, without data directories.
    pub fn size_of_structure(&self) -> usize {
        let body = match self.header {
            OptionalHeaderVariant::Pe32(_) => ImageOptionalHeader32::PACKED_SIZE,
            OptionalHeaderVariant::Pe32Plus(_) => ImageOptionalHeader64::PACKED_SIZE,
        };
        u16::PACKED_SIZE + body
    }

    pub fn address_of_entry_point(&self) -> u32 {
        field!(self, address_of_entry_point)
    }

    pub fn image_base(&self) -> u64 {
        field!(self, image_base as u64)
    }

    pub fn section_alignment(&self) -> u32 {
        field!(self, section_alignment)
    }

    pub fn file_alignment(&self) -> u32 {
        field!(self, file_alignment)
    }

    pub fn size_of_image(&self) -> u32 {
        field!(self, size_of_image)
    }

    pub fn size_of_headers(&self) -> u32 {
        field!(self, size_of_headers)
    }

    pub fn checksum(&self) -> u32 {
        field!(self, checksum)
    }

    pub fn subsystem(&self) -> Subsystem {
        Subsystem::from(field!(self, subsystem))
    }

    pub fn dll_characteristics(&self) -> DllCharacteristics {
        DllCharacteristics::from_bits_retain(field!(self, dll_characteristics))
    }

    pub fn subsystem_version(&self) -> (u16, u16) {
        (
            field!(self, major_subsystem_version),
            field!(self, minor_subsystem_version),
        )
    }

    pub fn size_of_stack_reserve(&self) -> u64 {
        field!(self, size_of_stack_reserve as u64)
    }

    pub fn size_of_stack_commit(&self) -> u64 {
        field!(self, size_of_stack_commit as u64)
    }

    pub fn size_of_heap_reserve(&self) -> u64 {
        field!(self, size_of_heap_reserve as u64)
    }

    pub fn size_of_heap_commit(&self) -> u64 {
        field!(self, size_of_heap_commit as u64)
    }

    pub fn number_of_rva_and_sizes(&self) -> u32 {
        field!(self, number_of_rva_and_sizes)
    }

    /// Decode the magic, then the variant it selects. An unknown magic is
    /// reported as-is; read failures are wrapped. `self` is left untouched
    /// unless both parts decode.
    pub fn deserialize(
        &mut self,
        buf: &mut InputBufferStatefulWrapper,
        allow_virtual: bool,
    ) -> Result<()> {
        let wrap = |e| PeError::nested(OptionalHeaderErrc::UnableToReadOptionalHeader, e);

        let mut magic = PackedStruct::<u16>::default();
        magic.deserialize(buf, allow_virtual).map_err(wrap)?;
        let header = match *magic {
            PE32_MAGIC => {
                let mut header = PackedStruct::<ImageOptionalHeader32>::default();
                header.deserialize(buf, allow_virtual).map_err(wrap)?;
                OptionalHeaderVariant::Pe32(header)
            }
            PE32PLUS_MAGIC => {
                let mut header = PackedStruct::<ImageOptionalHeader64>::default();
                header.deserialize(buf, allow_virtual).map_err(wrap)?;
                OptionalHeaderVariant::Pe32Plus(header)
            }
            _ => return Err(OptionalHeaderErrc::InvalidPeMagic.into()),
        };
        self.magic = magic;
        self.header = header;
        Ok(())
    }

    pub fn serialize(&self, out: &mut dyn OutputBuffer, write_virtual_part: bool) -> usize {
        let written = self.magic.serialize(out, write_virtual_part);
        written
            + match &self.header {
                OptionalHeaderVariant::Pe32(h) => h.serialize(out, write_virtual_part),
                OptionalHeaderVariant::Pe32Plus(h) => h.serialize(out, write_virtual_part),
            }
    }

    /// Run the selected checks, appending every violation to `errors`.
    pub fn validate(
        &self,
        options: &OptionalHeaderValidationOptions,
        is_dll: bool,
        errors: &mut ErrorList,
    ) {
        let mut record = |result: Result<()>| {
            if let Err(e) = result {
                errors.add_error(e.kind());
            }
        };

        if options.validate_address_of_entry_point {
            record(self.validate_address_of_entry_point(is_dll));
        }
        if options.validate_alignments {
            record(self.validate_file_alignment());
            record(self.validate_section_alignment());
        }
        if options.validate_subsystem_version {
            record(self.validate_subsystem_version());
        }
        if options.validate_size_of_heap {
            record(self.validate_size_of_heap());
        }
        if options.validate_size_of_stack {
            record(self.validate_size_of_stack());
        }
        if options.validate_size_of_headers {
            record(self.validate_size_of_headers());
        }
        if options.validate_subsystem {
            record(self.validate_subsystem());
        }
    }

    /// Executables need an entry point; when present it must lie past the
    /// headers.
    pub fn validate_address_of_entry_point(&self, is_dll: bool) -> Result<()> {
        let entry = self.address_of_entry_point();
        if (entry == 0 && !is_dll) || (entry != 0 && entry < self.size_of_headers()) {
            return Err(OptionalHeaderErrc::InvalidAddressOfEntryPoint.into());
        }
        Ok(())
    }

    pub fn validate_file_alignment(&self) -> Result<()> {
        let file_alignment = self.file_alignment();
        let section_alignment = self.section_alignment();
        if !math::is_power_of_2(file_alignment as u64) {
            return Err(OptionalHeaderErrc::IncorrectFileAlignment.into());
        }
        if section_alignment < PAGE_SIZE {
            if file_alignment != section_alignment {
                return Err(OptionalHeaderErrc::LowAlignmentMismatch.into());
            }
            return Ok(());
        }
        if !(MIN_FILE_ALIGNMENT..=MAX_FILE_ALIGNMENT).contains(&file_alignment) {
            return Err(OptionalHeaderErrc::FileAlignmentOutOfRange.into());
        }
        Ok(())
    }

    pub fn validate_section_alignment(&self) -> Result<()> {
        let section_alignment = self.section_alignment();
        if !math::is_power_of_2(section_alignment as u64) {
            return Err(OptionalHeaderErrc::IncorrectSectionAlignment.into());
        }
        if self.file_alignment() > section_alignment {
            return Err(OptionalHeaderErrc::FileAlignmentGreaterThanSectionAlignment.into());
        }
        Ok(())
    }

    pub fn validate_subsystem_version(&self) -> Result<()> {
        if self.subsystem_version() < (MIN_MAJOR_SUBSYSTEM_VERSION, MIN_MINOR_SUBSYSTEM_VERSION) {
            return Err(OptionalHeaderErrc::IncorrectSubsystemVersion.into());
        }
        Ok(())
    }

    pub fn validate_size_of_heap(&self) -> Result<()> {
        if self.size_of_heap_commit() > self.size_of_heap_reserve() {
            return Err(OptionalHeaderErrc::IncorrectSizeOfHeap.into());
        }
        Ok(())
    }

    pub fn validate_size_of_stack(&self) -> Result<()> {
        if self.size_of_stack_commit() > self.size_of_stack_reserve() {
            return Err(OptionalHeaderErrc::IncorrectSizeOfStack.into());
        }
        Ok(())
    }

    /// Size of headers must be file-aligned and fit in the image.
    pub fn validate_size_of_headers(&self) -> Result<()> {
        let size_of_headers = self.size_of_headers();
        let file_alignment = self.file_alignment();
        let aligned = !math::is_power_of_2(file_alignment as u64)
            || size_of_headers % file_alignment == 0;
        if !aligned || size_of_headers > self.size_of_image() {
            return Err(OptionalHeaderErrc::InvalidSizeOfHeaders.into());
        }
        Ok(())
    }

    pub fn validate_subsystem(&self) -> Result<()> {
        if !self.subsystem().is_known() {
            return Err(OptionalHeaderErrc::UnknownSubsystem.into());
        }
        Ok(())
    }

    /// Compare the file header's declared size with the decoded structure
    /// plus its (clamped) data directories.
    pub fn validate_size_of_optional_header(&self, size_of_optional_header: u16) -> Result<()> {
        let directories = self.number_of_rva_and_sizes().min(MAX_DATA_DIRECTORIES) as usize;
        let expected = self.size_of_structure() + directories * 8;
        if size_of_optional_header as usize != expected {
            return Err(OptionalHeaderErrc::InvalidSizeOfOptionalHeader.into());
        }
        Ok(())
    }

    /// The image base must be 64K-aligned. Without relocations the image
    /// can only be mapped at its preferred base, which must then be usable.
    pub fn validate_image_base(&self, has_relocations: bool) -> Result<()> {
        let image_base = self.image_base();
        if image_base % IMAGE_BASE_ALIGNMENT != 0 {
            return Err(OptionalHeaderErrc::UnalignedImageBase.into());
        }
        if has_relocations {
            return Ok(());
        }

        let limit = if self.is_64bit() {
            u64::MAX
        } else {
            u32::MAX as u64
        };
        let fits = image_base
            .checked_add(self.size_of_image() as u64)
            .is_some_and(|end| end <= limit);
        if image_base == 0 || !fits {
            return Err(OptionalHeaderErrc::IncorrectImageBase.into());
        }
        Ok(())
    }
}
