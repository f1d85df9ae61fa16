//! DOS header, DOS stub, PE signature and COFF file header

use serde::{Deserialize, Serialize};

use crate::buffers::{reduce, InputBufferStatefulWrapper, OutputBuffer, RefBuffer};
use crate::error::{
    BufferErrc, DosHeaderErrc, DosStubErrc, FileHeaderErrc, ImageSignatureErrc, PeError, Result,
};
use crate::formats::pe::types::*;
use crate::math::{self, SafeUint};
use crate::packed::{FieldReader, FieldWriter, PackedLayout, PackedStruct};

/// DOS header (64 bytes)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageDosHeader {
    pub e_magic: u16,      // Magic number (MZ)
    pub e_cblp: u16,       // Bytes on last page of file
    pub e_cp: u16,         // Pages in file
    pub e_crlc: u16,       // Relocations
    pub e_cparhdr: u16,    // Size of header in paragraphs
    pub e_minalloc: u16,   // Minimum extra paragraphs needed
    pub e_maxalloc: u16,   // Maximum extra paragraphs needed
    pub e_ss: u16,         // Initial (relative) SS value
    pub e_sp: u16,         // Initial SP value
    pub e_csum: u16,       // Checksum
    pub e_ip: u16,         // Initial IP value
    pub e_cs: u16,         // Initial (relative) CS value
    pub e_lfarlc: u16,     // File address of relocation table
    pub e_ovno: u16,       // Overlay number
    pub e_res: [u16; 4],   // Reserved
    pub e_oemid: u16,      // OEM identifier
    pub e_oeminfo: u16,    // OEM information
    pub e_res2: [u16; 10], // Reserved
    pub e_lfanew: u32,     // File address of PE header
}

impl PackedLayout for ImageDosHeader {
    const PACKED_SIZE: usize = 64;

    fn decode(f: &mut FieldReader<'_>) -> Self {
        let mut header = Self {
            e_magic: f.u16(),
            e_cblp: f.u16(),
            e_cp: f.u16(),
            e_crlc: f.u16(),
            e_cparhdr: f.u16(),
            e_minalloc: f.u16(),
            e_maxalloc: f.u16(),
            e_ss: f.u16(),
            e_sp: f.u16(),
            e_csum: f.u16(),
            e_ip: f.u16(),
            e_cs: f.u16(),
            e_lfarlc: f.u16(),
            e_ovno: f.u16(),
            ..Default::default()
        };
        for word in header.e_res.iter_mut() {
            *word = f.u16();
        }
        header.e_oemid = f.u16();
        header.e_oeminfo = f.u16();
        for word in header.e_res2.iter_mut() {
            *word = f.u16();
        }
        header.e_lfanew = f.u32();
        header
    }

    fn encode(&self, f: &mut FieldWriter<'_>) {
        for word in [
            self.e_magic,
            self.e_cblp,
            self.e_cp,
            self.e_crlc,
            self.e_cparhdr,
            self.e_minalloc,
            self.e_maxalloc,
            self.e_ss,
            self.e_sp,
            self.e_csum,
            self.e_ip,
            self.e_cs,
            self.e_lfarlc,
            self.e_ovno,
        ] {
            f.u16(word);
        }
        self.e_res.iter().for_each(|&w| f.u16(w));
        f.u16(self.e_oemid);
        f.u16(self.e_oeminfo);
        self.e_res2.iter().for_each(|&w| f.u16(w));
        f.u32(self.e_lfanew);
    }
}

/// Which DOS header checks the loader runs. Both are fatal on failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DosHeaderValidationOptions {
    pub validate_magic: bool,
    pub validate_e_lfanew: bool,
}

impl Default for DosHeaderValidationOptions {
    fn default() -> Self {
        Self {
            validate_magic: true,
            validate_e_lfanew: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DosHeader {
    descriptor: PackedStruct<ImageDosHeader>,
}

impl DosHeader {
    pub fn descriptor(&self) -> &PackedStruct<ImageDosHeader> {
        &self.descriptor
    }

    pub fn descriptor_mut(&mut self) -> &mut PackedStruct<ImageDosHeader> {
        &mut self.descriptor
    }

    pub fn e_lfanew(&self) -> u32 {
        self.descriptor.e_lfanew
    }

    pub fn deserialize(
        &mut self,
        buf: &mut InputBufferStatefulWrapper,
        allow_virtual: bool,
    ) -> Result<()> {
        self.descriptor
            .deserialize(buf, allow_virtual)
            .map_err(|e| PeError::nested(DosHeaderErrc::UnableToReadDosHeader, e))
    }

    pub fn serialize(&self, out: &mut dyn OutputBuffer, write_virtual_part: bool) -> usize {
        self.descriptor.serialize(out, write_virtual_part)
    }

    /// Run the selected checks, stopping at the first failure.
    pub fn validate(&self, options: &DosHeaderValidationOptions) -> Result<()> {
        if options.validate_magic {
            self.validate_magic()?;
        }
        if options.validate_e_lfanew {
            self.validate_e_lfanew()?;
        }
        Ok(())
    }

    pub fn validate_magic(&self) -> Result<()> {
        if self.descriptor.e_magic != DOS_SIGNATURE {
            return Err(DosHeaderErrc::InvalidDosHeaderSignature.into());
        }
        Ok(())
    }

    /// `e_lfanew` must be DWORD-aligned and within
    /// [`MIN_E_LFANEW`, `MAX_E_LFANEW`].
    pub fn validate_e_lfanew(&self) -> Result<()> {
        let e_lfanew = self.descriptor.e_lfanew;
        if !math::is_aligned::<u32>(e_lfanew as u64) {
            return Err(DosHeaderErrc::UnalignedELfanew.into());
        }
        if !(MIN_E_LFANEW..=MAX_E_LFANEW).contains(&e_lfanew) {
            return Err(DosHeaderErrc::InvalidELfanew.into());
        }
        Ok(())
    }
}

/// Raw bytes between the DOS header and the PE signature.
#[derive(Debug, Clone, Default)]
pub struct DosStub {
    buffer: RefBuffer,
}

impl DosStub {
    pub fn buffer(&self) -> &RefBuffer {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut RefBuffer {
        &mut self.buffer
    }

    /// Capture everything from the cursor up to `e_lfanew` and leave the
    /// cursor at `e_lfanew`.
    pub fn deserialize(
        &mut self,
        buf: &mut InputBufferStatefulWrapper,
        e_lfanew: u32,
        copy_memory: bool,
    ) -> Result<()> {
        self.load(buf, e_lfanew, copy_memory)
            .map_err(|e| PeError::nested(DosStubErrc::UnableToReadDosStub, e))
    }

    fn load(
        &mut self,
        buf: &mut InputBufferStatefulWrapper,
        e_lfanew: u32,
        copy_memory: bool,
    ) -> Result<()> {
        let start = buf.rpos();
        let end = math::to_usize(e_lfanew as u64)?;
        let size = end
            .checked_sub(start)
            .ok_or(BufferErrc::BufferOverrun)?;
        let stub = reduce(buf.buffer(), start, size)?;
        self.buffer.deserialize(stub, copy_memory)?;
        buf.set_rpos(end)
    }

    pub fn serialize(&self, out: &mut dyn OutputBuffer) -> Result<usize> {
        self.buffer.serialize(out)
    }
}

/// The `PE\0\0` signature at `e_lfanew`.
#[derive(Debug, Clone, Default)]
pub struct ImageSignature {
    signature: PackedStruct<u32>,
}

impl ImageSignature {
    pub fn descriptor(&self) -> &PackedStruct<u32> {
        &self.signature
    }

    pub fn descriptor_mut(&mut self) -> &mut PackedStruct<u32> {
        &mut self.signature
    }

    pub fn value(&self) -> u32 {
        *self.signature
    }

    pub fn deserialize(
        &mut self,
        buf: &mut InputBufferStatefulWrapper,
        allow_virtual: bool,
    ) -> Result<()> {
        self.signature
            .deserialize(buf, allow_virtual)
            .map_err(|e| PeError::nested(ImageSignatureErrc::UnableToReadPeSignature, e))
    }

    pub fn serialize(&self, out: &mut dyn OutputBuffer, write_virtual_part: bool) -> usize {
        self.signature.serialize(out, write_virtual_part)
    }

    pub fn validate(&self) -> Result<()> {
        if *self.signature != PE_SIGNATURE {
            return Err(ImageSignatureErrc::InvalidPeSignature.into());
        }
        Ok(())
    }
}

/// COFF header (20 bytes)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageFileHeader {
    pub machine: u16,
    pub number_of_sections: u16,
    pub time_date_stamp: u32,
    pub pointer_to_symbol_table: u32,
    pub number_of_symbols: u32,
    pub size_of_optional_header: u16,
    pub characteristics: u16,
}

impl PackedLayout for ImageFileHeader {
    const PACKED_SIZE: usize = 20;

    fn decode(f: &mut FieldReader<'_>) -> Self {
        Self {
            machine: f.u16(),
            number_of_sections: f.u16(),
            time_date_stamp: f.u32(),
            pointer_to_symbol_table: f.u32(),
            number_of_symbols: f.u32(),
            size_of_optional_header: f.u16(),
            characteristics: f.u16(),
        }
    }

    fn encode(&self, f: &mut FieldWriter<'_>) {
        f.u16(self.machine);
        f.u16(self.number_of_sections);
        f.u32(self.time_date_stamp);
        f.u32(self.pointer_to_symbol_table);
        f.u32(self.number_of_symbols);
        f.u16(self.size_of_optional_header);
        f.u16(self.characteristics);
    }
}

#[derive(Debug, Clone, Default)]
pub struct FileHeader {
    descriptor: PackedStruct<ImageFileHeader>,
}

impl FileHeader {
    pub fn descriptor(&self) -> &PackedStruct<ImageFileHeader> {
        &self.descriptor
    }

    pub fn descriptor_mut(&mut self) -> &mut PackedStruct<ImageFileHeader> {
        &mut self.descriptor
    }

    pub fn machine(&self) -> Machine {
        Machine::from(self.descriptor.machine)
    }

    pub fn characteristics(&self) -> FileCharacteristics {
        FileCharacteristics::from_bits_retain(self.descriptor.characteristics)
    }

    pub fn is_dll(&self) -> bool {
        self.characteristics().contains(FileCharacteristics::DLL)
    }

    pub fn number_of_sections(&self) -> u16 {
        self.descriptor.number_of_sections
    }

    pub fn size_of_optional_header(&self) -> u16 {
        self.descriptor.size_of_optional_header
    }

    /// Cursor position of the section table: right past the file header and
    /// the declared optional header size.
    pub fn section_table_buffer_pos(&self) -> Result<usize> {
        let mut pos = SafeUint::new(self.descriptor.buffer_pos());
        pos.add(ImageFileHeader::PACKED_SIZE)?
            .add(self.descriptor.size_of_optional_header)?;
        Ok(pos.value())
    }

    pub fn deserialize(
        &mut self,
        buf: &mut InputBufferStatefulWrapper,
        allow_virtual: bool,
    ) -> Result<()> {
        self.descriptor
            .deserialize(buf, allow_virtual)
            .map_err(|e| PeError::nested(FileHeaderErrc::UnableToReadFileHeader, e))
    }

    pub fn serialize(&self, out: &mut dyn OutputBuffer, write_virtual_part: bool) -> usize {
        self.descriptor.serialize(out, write_virtual_part)
    }
}
