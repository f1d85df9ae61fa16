//! Loaded PE image model.
//!
//! An [`Image`] is the aggregate the [`loader`] populates stage by stage and
//! the [`builder`] serializes back to bytes. Every part is present from the
//! start in its default state, so a partially loaded image is still a valid
//! value: fields past the stage that failed simply stay unpopulated.

pub mod builder;
pub mod loader;

pub use builder::{build, build_into, ImageBuildOptions};
pub use loader::{load, ImageLoadOptions, ImageLoadResult};

use crate::buffers::RefBuffer;
use crate::formats::pe::{
    DataDirectories, DosHeader, DosStub, FileHeader, ImageSignature, OptionalHeader, Overlay,
    SectionData, SectionHeader, SectionTable,
};

#[derive(Debug, Clone, Default)]
pub struct Image {
    dos_header: DosHeader,
    dos_stub: DosStub,
    image_signature: ImageSignature,
    file_header: FileHeader,
    optional_header: OptionalHeader,
    data_directories: DataDirectories,
    section_table: SectionTable,
    section_data: Vec<SectionData>,
    overlay: Overlay,
    full_headers_buffer: RefBuffer,
    loaded_to_memory: bool,
}

impl Image {
    pub fn dos_header(&self) -> &DosHeader {
        &self.dos_header
    }

    pub fn dos_header_mut(&mut self) -> &mut DosHeader {
        &mut self.dos_header
    }

    pub fn dos_stub(&self) -> &DosStub {
        &self.dos_stub
    }

    pub fn dos_stub_mut(&mut self) -> &mut DosStub {
        &mut self.dos_stub
    }

    pub fn image_signature(&self) -> &ImageSignature {
        &self.image_signature
    }

    pub fn image_signature_mut(&mut self) -> &mut ImageSignature {
        &mut self.image_signature
    }

    pub fn file_header(&self) -> &FileHeader {
        &self.file_header
    }

    pub fn file_header_mut(&mut self) -> &mut FileHeader {
        &mut self.file_header
    }

    pub fn optional_header(&self) -> &OptionalHeader {
        &self.optional_header
    }

    pub fn optional_header_mut(&mut self) -> &mut OptionalHeader {
        &mut self.optional_header
    }

    pub fn data_directories(&self) -> &DataDirectories {
        &self.data_directories
    }

    pub fn data_directories_mut(&mut self) -> &mut DataDirectories {
        &mut self.data_directories
    }

    pub fn section_table(&self) -> &SectionTable {
        &self.section_table
    }

    pub fn section_table_mut(&mut self) -> &mut SectionTable {
        &mut self.section_table
    }

    /// Section contents, index-aligned with [`section_table`](Self::section_table)
    /// when section data was loaded.
    pub fn section_data(&self) -> &[SectionData] {
        &self.section_data
    }

    pub fn section_data_mut(&mut self) -> &mut Vec<SectionData> {
        &mut self.section_data
    }

    pub fn overlay(&self) -> &Overlay {
        &self.overlay
    }

    pub fn overlay_mut(&mut self) -> &mut Overlay {
        &mut self.overlay
    }

    /// Exact bytes of the header region, when captured.
    pub fn full_headers_buffer(&self) -> &RefBuffer {
        &self.full_headers_buffer
    }

    pub fn full_headers_buffer_mut(&mut self) -> &mut RefBuffer {
        &mut self.full_headers_buffer
    }

    /// True when the image was parsed as a module mapped into memory
    /// (sections addressed by RVA).
    pub fn is_loaded_to_memory(&self) -> bool {
        self.loaded_to_memory
    }

    pub fn set_loaded_to_memory(&mut self, loaded_to_memory: bool) {
        self.loaded_to_memory = loaded_to_memory;
    }

    pub fn is_64bit(&self) -> bool {
        self.optional_header.is_64bit()
    }

    pub fn has_relocations(&self) -> bool {
        self.data_directories.has_relocations()
    }

    /// Header and data of the section named `name`.
    pub fn section(&self, name: &str) -> Option<(&SectionHeader, Option<&SectionData>)> {
        let (index, header) = self.section_table.by_name(name)?;
        Some((header, self.section_data.get(index)))
    }

    /// Translate an RVA to a file offset using the section table.
    pub fn rva_to_file_offset(&self, rva: u32) -> Option<u32> {
        self.section_table
            .rva_to_file_offset(rva, self.optional_header.section_alignment())
    }
}
