//! PE/COFF header structures, validators and section/overlay capture.
//!
//! Every structure decodes itself from an [`InputBufferStatefulWrapper`]
//! cursor and re-encodes into an [`OutputBuffer`]; the stage ordering lives
//! in [`crate::image::loader`].
//!
//! [`InputBufferStatefulWrapper`]: crate::buffers::InputBufferStatefulWrapper
//! [`OutputBuffer`]: crate::buffers::OutputBuffer

pub mod data_directories;
pub mod headers;
pub mod optional_header;
pub mod overlay;
pub mod sections;
pub mod types;

pub use data_directories::{DataDirectories, ImageDataDirectory};
pub use headers::{
    DosHeader, DosHeaderValidationOptions, DosStub, FileHeader, ImageDosHeader, ImageFileHeader,
    ImageSignature,
};
pub use optional_header::{
    ImageOptionalHeader32, ImageOptionalHeader64, OptionalHeader,
    OptionalHeaderValidationOptions, OptionalHeaderVariant,
};
pub use overlay::Overlay;
pub use sections::{
    validate_section_headers, validate_size_of_image, ImageSectionHeader, SectionData,
    SectionDataLoadOptions, SectionHeader, SectionTable,
};
pub use types::*;
