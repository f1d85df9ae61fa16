//! Loader pipeline behaviour over well-formed and slightly damaged images.

use peimage::error::{
    BufferErrc, DataDirectoriesErrc, DosHeaderErrc, ErrorKind, ImageSignatureErrc,
    OptionalHeaderErrc, SectionErrc,
};
use peimage::formats::pe::{Machine, Subsystem};
use peimage::image::{load, ImageLoadOptions};
use sha2::{Digest, Sha256};

use crate::common::*;

#[test]
fn test_load_pe32() {
    let fixture = PeFixture::pe32();
    let result = load(fixture.buffer(), &ImageLoadOptions::default());

    assert!(result.is_ok(), "fatal: {:?}", result.fatal_error);
    assert!(result.warnings.is_empty(), "warnings: {:?}", result.warnings);

    let image = &result.image;
    assert_eq!(image.dos_header().e_lfanew(), E_LFANEW);
    assert_eq!(image.image_signature().value(), 0x4550);
    assert_eq!(image.file_header().machine(), Machine::I386);
    assert_eq!(image.file_header().number_of_sections(), 3);
    assert!(!image.file_header().is_dll());
    assert!(!image.is_64bit());
    assert_eq!(image.optional_header().image_base(), 0x40_0000);
    assert_eq!(image.optional_header().size_of_image(), 0x4000);
    assert_eq!(image.optional_header().subsystem(), Subsystem::WindowsCui);
    assert_eq!(image.data_directories().len(), 16);
    assert!(!image.has_relocations());

    let names: Vec<String> = image
        .section_table()
        .headers()
        .iter()
        .map(|h| h.name())
        .collect();
    assert_eq!(names, [".text", ".rdata", ".data"]);
    assert_eq!(image.section_data().len(), 3);
    assert!(image.section_data().iter().all(|d| d.is_loaded()));
}

#[test]
fn test_load_contiguous_sections() {
    // 96 headers push the section table past the default 0x400 headers
    for (count, raw_size) in [(3, 0x200), (96, 0x200), (4, 0x1000)] {
        let fixture = PeFixture::contiguous(count, raw_size);
        let result = load(fixture.buffer(), &ImageLoadOptions::default());

        assert!(result.is_ok(), "fatal: {:?}", result.fatal_error);
        assert!(result.warnings.is_empty(), "{count} sections: {:?}", result.warnings);
        let image = &result.image;
        assert_eq!(image.section_table().len(), count as usize);
        assert_eq!(
            image.optional_header().size_of_headers(),
            fixture.size_of_headers
        );
        let last = image.section_data().last().unwrap();
        assert_eq!(last.buffer().size(), raw_size as usize);
        assert!(last.buffer().data().unwrap().iter().all(|b| *b == (count - 1) as u8));
    }
}

#[test]
fn test_load_pe32_plus() {
    let fixture = PeFixture::pe32_plus();
    let result = load(fixture.buffer(), &ImageLoadOptions::default());

    assert!(result.is_ok(), "fatal: {:?}", result.fatal_error);
    assert!(result.warnings.is_empty(), "warnings: {:?}", result.warnings);
    let image = &result.image;
    assert!(image.is_64bit());
    assert_eq!(image.file_header().machine(), Machine::X86_64);
    assert_eq!(image.optional_header().image_base(), 0x1_4000_0000);
    assert_eq!(image.optional_header().size_of_stack_reserve(), 0x10_0000);
    assert_eq!(
        image.file_header().size_of_optional_header() as usize,
        image.optional_header().size_of_structure() + 16 * 8
    );
}

#[test]
fn test_section_data_contents() {
    let fixture = PeFixture::pe32();
    let result = load(fixture.buffer(), &ImageLoadOptions::default());

    let (header, data) = result.image.section(".rdata").unwrap();
    assert_eq!(header.virtual_address(), 0x2000);
    let data = data.unwrap();
    let bytes = data.buffer().data().unwrap();
    assert_eq!(bytes.len(), 0x200);
    assert!(bytes.iter().all(|b| *b == 0x11));
    assert_eq!(data.buffer().absolute_offset(), Some(0x600));
    assert!(!data.buffer().is_copied());

    assert_eq!(result.image.rva_to_file_offset(0x1010), Some(0x410));
    assert_eq!(result.image.rva_to_file_offset(0x10), None);
}

#[test]
fn test_dos_stub_captured() {
    let fixture = PeFixture::pe32();
    let result = load(fixture.buffer(), &ImageLoadOptions::default());

    let stub = result.image.dos_stub().buffer();
    assert_eq!(stub.size(), (E_LFANEW - 0x40) as usize);
    assert!(stub.data().unwrap().starts_with(b"This program cannot be run"));
}

#[test]
fn test_overlay_captured() {
    let fixture = PeFixture::pe32().with_overlay(b"OVERLAY-PAYLOAD");
    let result = load(fixture.buffer(), &ImageLoadOptions::default());

    assert!(result.is_ok());
    let overlay = result.image.overlay();
    assert_eq!(overlay.offset(), Some(0xA00));
    assert_eq!(&*overlay.buffer().data().unwrap(), b"OVERLAY-PAYLOAD");
}

#[test]
fn test_no_overlay() {
    let result = load(PeFixture::pe32().buffer(), &ImageLoadOptions::default());
    assert!(result.image.overlay().is_empty());
    assert_eq!(result.image.overlay().offset(), Some(0xA00));
}

#[test]
fn test_full_headers_buffer() {
    let fixture = PeFixture::pe32();
    let bytes = fixture.build();
    let result = load(fixture.buffer(), &ImageLoadOptions::default());

    let headers = result.image.full_headers_buffer();
    assert_eq!(headers.size(), SIZE_OF_HEADERS as usize);
    assert_eq!(&*headers.data().unwrap(), &bytes[..SIZE_OF_HEADERS as usize]);
    assert_eq!(
        headers.sha256_hex().unwrap(),
        hex::encode(Sha256::digest(&bytes[..SIZE_OF_HEADERS as usize]))
    );
}

#[test]
fn test_full_headers_buffer_clamped_to_buffer() {
    // Headers claim more than the whole file
    let mut bytes = PeFixture::pe32().build();
    let opt = PeFixture::pe32().optional_header_offset();
    put_u32(&mut bytes, opt + 60, 0x4000);
    let len = bytes.len();
    let result = load(buffer_from(bytes), &ImageLoadOptions::default());

    assert!(result.is_ok());
    assert_eq!(result.image.full_headers_buffer().size(), len);
}

#[test]
fn test_eager_copies() {
    let fixture = PeFixture::pe32().with_overlay(&[0xAB; 32]);
    let options = ImageLoadOptions {
        eager_section_data_copy: true,
        eager_dos_stub_data_copy: true,
        eager_overlay_data_copy: true,
        eager_full_headers_buffer_copy: true,
        ..Default::default()
    };
    let result = load(fixture.buffer(), &options);

    let image = &result.image;
    assert!(image.dos_stub().buffer().is_copied());
    assert!(image.section_data().iter().all(|d| d.buffer().is_copied()));
    assert!(image.overlay().buffer().is_copied());
    assert!(image.full_headers_buffer().is_copied());
    // Copies still remember where they came from
    assert_eq!(image.overlay().buffer().absolute_offset(), Some(0xA00));
}

#[test]
fn test_optional_stages_disabled() {
    let options = ImageLoadOptions {
        load_section_data: false,
        load_overlay: false,
        load_full_headers_buffer: false,
        ..Default::default()
    };
    let result = load(PeFixture::pe32().with_overlay(b"tail").buffer(), &options);

    assert!(result.is_ok());
    assert_eq!(result.image.section_table().len(), 3);
    assert!(result.image.section_data().is_empty());
    assert_eq!(result.image.overlay().offset(), None);
    assert!(!result.image.full_headers_buffer().is_loaded());
}

#[test]
fn test_bad_dos_magic_is_fatal() {
    let mut bytes = PeFixture::pe32().build();
    bytes[0] = b'Z';
    let result = load(buffer_from(bytes), &ImageLoadOptions::default());

    let fatal = result.fatal_error.as_ref().unwrap();
    assert_eq!(
        fatal.kind(),
        ErrorKind::DosHeader(DosHeaderErrc::InvalidDosHeaderSignature)
    );
    assert!(result.warnings.is_empty());

    // Nothing past the DOS header was decoded
    let image = &result.image;
    assert_eq!(image.image_signature().value(), 0);
    assert_eq!(image.file_header().number_of_sections(), 0);
    assert!(image.dos_stub().buffer().is_empty());
    assert!(image.data_directories().is_empty());
    assert!(image.section_table().is_empty());
    assert!(image.section_data().is_empty());
    assert!(!image.full_headers_buffer().is_loaded());
}

#[test]
fn test_bad_dos_magic_tolerated_without_validation() {
    let mut bytes = PeFixture::pe32().build();
    bytes[0] = b'Z';
    let mut options = ImageLoadOptions::default();
    options.dos_header_validation.validate_magic = false;
    let result = load(buffer_from(bytes), &options);

    assert!(result.is_ok());
    assert_eq!(result.image.section_table().len(), 3);
}

#[test]
fn test_unaligned_e_lfanew_is_fatal() {
    let mut bytes = PeFixture::pe32().build();
    put_u32(&mut bytes, 0x3C, 0x82);
    let result = load(buffer_from(bytes), &ImageLoadOptions::default());

    let fatal = result.fatal_error.as_ref().unwrap();
    assert_eq!(fatal.kind(), ErrorKind::DosHeader(DosHeaderErrc::UnalignedELfanew));
    // The signature was never read
    assert_eq!(result.image.image_signature().value(), 0);
    assert_eq!(result.image.image_signature().descriptor().buffer_pos(), 0);
}

#[test]
fn test_e_lfanew_out_of_range_is_fatal() {
    let mut bytes = PeFixture::pe32().build();
    put_u32(&mut bytes, 0x3C, 0x2000_0000);
    let result = load(buffer_from(bytes), &ImageLoadOptions::default());
    assert_eq!(
        result.fatal_error.unwrap().kind(),
        ErrorKind::DosHeader(DosHeaderErrc::InvalidELfanew)
    );
}

#[test]
fn test_unaligned_e_lfanew_without_validation() {
    // Signature is read at the unaligned offset and no longer matches
    let mut bytes = PeFixture::pe32().build();
    put_u32(&mut bytes, 0x3C, 0x82);
    let mut options = ImageLoadOptions::default();
    options.dos_header_validation.validate_e_lfanew = false;
    let result = load(buffer_from(bytes), &options);

    assert_eq!(
        result.fatal_error.unwrap().kind(),
        ErrorKind::ImageSignature(ImageSignatureErrc::InvalidPeSignature)
    );
    assert_eq!(result.image.dos_stub().buffer().size(), 0x42);
}

#[test]
fn test_e_lfanew_inside_dos_header_skips_stub() {
    let mut bytes = PeFixture::pe32().build();
    put_u32(&mut bytes, 0x3C, 0x3C);
    let mut options = ImageLoadOptions::default();
    options.dos_header_validation.validate_e_lfanew = false;
    let result = load(buffer_from(bytes), &options);

    assert!(!result.image.dos_stub().buffer().is_loaded());
    assert_eq!(result.image.image_signature().descriptor().buffer_pos(), 0x3C);
    assert_eq!(
        result.fatal_error.unwrap().kind(),
        ErrorKind::ImageSignature(ImageSignatureErrc::InvalidPeSignature)
    );
}

#[test]
fn test_bad_pe_signature() {
    let mut bytes = PeFixture::pe32().build();
    bytes[E_LFANEW as usize + 2] = b'X';

    let result = load(buffer_from(bytes.clone()), &ImageLoadOptions::default());
    assert_eq!(
        result.fatal_error.unwrap().kind(),
        ErrorKind::ImageSignature(ImageSignatureErrc::InvalidPeSignature)
    );
    assert_eq!(result.image.file_header().number_of_sections(), 0);

    let options = ImageLoadOptions {
        validate_image_signature: false,
        ..Default::default()
    };
    let result = load(buffer_from(bytes), &options);
    assert!(result.is_ok());
    assert_eq!(result.image.file_header().number_of_sections(), 3);
}

#[test]
fn test_invalid_optional_header_magic_is_fatal() {
    let mut bytes = PeFixture::pe32().build();
    let opt = PeFixture::pe32().optional_header_offset();
    put_u16(&mut bytes, opt, 0x107);
    let result = load(buffer_from(bytes), &ImageLoadOptions::default());

    assert_eq!(
        result.fatal_error.unwrap().kind(),
        ErrorKind::OptionalHeader(OptionalHeaderErrc::InvalidPeMagic)
    );
    assert!(result.image.section_table().is_empty());
}

#[test]
fn test_optional_header_warnings() {
    let fixture = PeFixture::pe32();
    let mut bytes = fixture.build();
    let opt = fixture.optional_header_offset();
    put_u16(&mut bytes, opt + 48, 3); // subsystem 3.0
    put_u16(&mut bytes, opt + 68, 0x55); // unknown subsystem
    put_u32(&mut bytes, opt + 84, 0x20_0000); // heap commit > reserve
    let result = load(buffer_from(bytes), &ImageLoadOptions::default());

    assert!(result.is_ok());
    let warnings = &result.warnings;
    assert!(warnings.has_error(OptionalHeaderErrc::IncorrectSubsystemVersion));
    assert!(warnings.has_error(OptionalHeaderErrc::UnknownSubsystem));
    assert!(warnings.has_error(OptionalHeaderErrc::IncorrectSizeOfHeap));
    assert!(!warnings.has_error(OptionalHeaderErrc::IncorrectSizeOfStack));
    assert_eq!(warnings.len(), 3);
    // Everything after the optional header still loads
    assert_eq!(result.image.section_data().len(), 3);

    let mut options = ImageLoadOptions::default();
    options.optional_header_validation.validate_subsystem = false;
    options.optional_header_validation.validate_subsystem_version = false;
    options.optional_header_validation.validate_size_of_heap = false;
    let mut bytes = fixture.build();
    put_u16(&mut bytes, opt + 68, 0x55);
    let result = load(buffer_from(bytes), &options);
    assert!(result.warnings.is_empty());
}

#[test]
fn test_dll_entry_point_rule() {
    let fixture = PeFixture {
        dll: true,
        ..PeFixture::pe32()
    };
    let mut bytes = fixture.build();
    put_u32(&mut bytes, fixture.optional_header_offset() + 16, 0);

    // A DLL may have no entry point
    let result = load(buffer_from(bytes.clone()), &ImageLoadOptions::default());
    assert!(result.image.file_header().is_dll());
    assert!(!result
        .warnings
        .has_error(OptionalHeaderErrc::InvalidAddressOfEntryPoint));

    // An executable may not
    let characteristics_at = E_LFANEW as usize + 22;
    put_u16(&mut bytes, characteristics_at, 0x0102);
    let result = load(buffer_from(bytes), &ImageLoadOptions::default());
    assert!(result
        .warnings
        .has_error(OptionalHeaderErrc::InvalidAddressOfEntryPoint));
}

#[test]
fn test_image_base_warning() {
    let fixture = PeFixture::pe32();
    let mut bytes = fixture.build();
    put_u32(&mut bytes, fixture.optional_header_offset() + 28, 0x40_1000);
    let result = load(buffer_from(bytes.clone()), &ImageLoadOptions::default());
    assert!(result.is_ok());
    assert!(result.warnings.has_error(OptionalHeaderErrc::UnalignedImageBase));

    let options = ImageLoadOptions {
        validate_image_base: false,
        ..Default::default()
    };
    let result = load(buffer_from(bytes), &options);
    assert!(result.warnings.is_empty());
}

#[test]
fn test_zero_image_base_needs_relocations() {
    let fixture = PeFixture::pe32();
    let mut bytes = fixture.build();
    put_u32(&mut bytes, fixture.optional_header_offset() + 28, 0);
    let result = load(buffer_from(bytes), &ImageLoadOptions::default());
    assert!(result.warnings.has_error(OptionalHeaderErrc::IncorrectImageBase));

    let fixture = PeFixture {
        relocations: true,
        ..PeFixture::pe32()
    };
    let mut bytes = fixture.build();
    put_u32(&mut bytes, fixture.optional_header_offset() + 28, 0);
    let result = load(buffer_from(bytes), &ImageLoadOptions::default());
    assert!(result.image.has_relocations());
    assert!(result.warnings.is_empty(), "warnings: {:?}", result.warnings);
}

#[test]
fn test_too_many_data_directories() {
    let fixture = PeFixture {
        number_of_rva_and_sizes: 0x20,
        ..PeFixture::pe32()
    };
    let result = load(fixture.buffer(), &ImageLoadOptions::default());

    assert!(result.is_ok());
    assert_eq!(result.image.data_directories().len(), 16);
    assert!(result
        .warnings
        .has_error_with_context(DataDirectoriesErrc::TooManyDataDirectories, 0x20));
    assert_eq!(result.warnings.len(), 1);
}

#[test]
fn test_fewer_data_directories() {
    let fixture = PeFixture {
        number_of_rva_and_sizes: 6,
        ..PeFixture::pe32()
    };
    let result = load(fixture.buffer(), &ImageLoadOptions::default());

    assert!(result.is_ok());
    assert!(result.warnings.is_empty(), "warnings: {:?}", result.warnings);
    assert_eq!(result.image.data_directories().len(), 6);
    assert_eq!(result.image.section_table().len(), 3);
}

#[test]
fn test_size_of_optional_header_mismatch() {
    let mut bytes = PeFixture::pe32().build();
    put_u16(&mut bytes, E_LFANEW as usize + 20, 0xE8);
    let result = load(buffer_from(bytes), &ImageLoadOptions::default());

    assert!(result.is_ok());
    assert!(result
        .warnings
        .has_error(OptionalHeaderErrc::InvalidSizeOfOptionalHeader));
    // The section table is read at the declared position
    let first = &result.image.section_table().headers()[0];
    assert_eq!(first.descriptor().buffer_pos(), 0x180);
}

#[test]
fn test_unreachable_section_table_is_fatal() {
    let mut bytes = PeFixture::pe32().build();
    put_u16(&mut bytes, E_LFANEW as usize + 20, 0xFFFF);
    let result = load(buffer_from(bytes), &ImageLoadOptions::default());

    let fatal = result.fatal_error.as_ref().unwrap();
    assert_eq!(
        fatal.kind(),
        ErrorKind::Section(SectionErrc::UnableToReadSectionTable)
    );
    assert_eq!(fatal.root_cause().kind(), ErrorKind::Buffer(BufferErrc::BufferOverrun));
    // Warnings recorded before the failure are kept
    assert!(result
        .warnings
        .has_error(OptionalHeaderErrc::InvalidSizeOfOptionalHeader));
    assert_eq!(result.image.data_directories().len(), 16);
    assert!(result.image.section_table().is_empty());
}

#[test]
fn test_section_out_of_bounds_is_warning_with_index() {
    let fixture = PeFixture::pe32();
    let mut bytes = fixture.build();
    let second = fixture.section_table_offset() + 40;
    put_u32(&mut bytes, second + 20, 0x10_0000);
    let result = load(buffer_from(bytes), &ImageLoadOptions::default());

    assert!(result.is_ok());
    assert!(result
        .warnings
        .has_error_with_context(SectionErrc::UnableToReadSectionData, 1));
    assert!(!result
        .warnings
        .has_error_with_context(SectionErrc::UnableToReadSectionData, 0));

    let data = result.image.section_data();
    assert_eq!(data.len(), 3);
    assert!(data[0].is_loaded());
    assert!(!data[1].is_loaded());
    assert!(data[2].is_loaded());
    assert!(data[2].buffer().data().unwrap().iter().all(|b| *b == 0x22));
}

#[test]
fn test_every_section_out_of_bounds() {
    let fixture = PeFixture::pe32();
    let mut bytes = fixture.build();
    for i in 0..3 {
        let at = fixture.section_table_offset() + i * 40;
        put_u32(&mut bytes, at + 16, 0x8000_0000);
    }
    let result = load(buffer_from(bytes), &ImageLoadOptions::default());

    assert!(result.is_ok());
    for i in 0..3 {
        assert!(result
            .warnings
            .has_error_with_context(SectionErrc::UnableToReadSectionData, i));
    }
    assert!(result.image.section_data().iter().all(|d| !d.is_loaded()));
}

#[test]
fn test_section_validation_warnings() {
    let mut fixture = PeFixture::pe32();
    fixture.sections[1].virtual_address = 0x2800;
    fixture.sections[2].pointer_to_raw_data = 0x700;
    let bytes = fixture.build();
    let result = load(buffer_from(bytes), &ImageLoadOptions::default());

    assert!(result.is_ok());
    let warnings = &result.warnings;
    assert!(warnings.has_error_with_context(SectionErrc::UnalignedVirtualAddress, 1));
    assert!(warnings.has_error_with_context(SectionErrc::VirtualGapBetweenSections, 1));
    assert!(warnings.has_error_with_context(SectionErrc::UnalignedRawAddress, 2));

    let options = ImageLoadOptions {
        validate_sections: false,
        validate_size_of_image: false,
        ..Default::default()
    };
    let result = load(buffer_from(fixture.build()), &options);
    assert!(result.warnings.is_empty(), "warnings: {:?}", result.warnings);
}

#[test]
fn test_size_of_image_mismatch() {
    let fixture = PeFixture::pe32();
    let mut bytes = fixture.build();
    put_u32(&mut bytes, fixture.optional_header_offset() + 56, 0x5000);
    let result = load(buffer_from(bytes.clone()), &ImageLoadOptions::default());

    assert!(result.is_ok());
    assert!(result.warnings.has_error(SectionErrc::InvalidSizeOfImage));

    let options = ImageLoadOptions {
        validate_size_of_image: false,
        ..Default::default()
    };
    assert!(load(buffer_from(bytes), &options).warnings.is_empty());
}

#[test]
fn test_image_loaded_to_memory() {
    let fixture = PeFixture::pe32();
    let file = fixture.build();

    // Lay the image out the way the Windows loader maps it
    let mut mapped = vec![0u8; fixture.size_of_image() as usize];
    mapped[..SIZE_OF_HEADERS as usize].copy_from_slice(&file[..SIZE_OF_HEADERS as usize]);
    for section in &fixture.sections {
        let raw = section.pointer_to_raw_data as usize;
        let va = section.virtual_address as usize;
        let len = section.size_of_raw_data as usize;
        mapped[va..va + len].copy_from_slice(&file[raw..raw + len]);
    }

    let options = ImageLoadOptions {
        image_loaded_to_memory: true,
        ..Default::default()
    };
    let result = load(buffer_from(mapped), &options);

    assert!(result.is_ok());
    assert!(result.image.is_loaded_to_memory());
    let data = result.image.section_data();
    assert_eq!(data[0].buffer().absolute_offset(), Some(0x1000));
    assert!(data[0].buffer().data().unwrap().iter().all(|b| *b == 0xCC));
    assert!(data[1].buffer().data().unwrap().iter().all(|b| *b == 0x11));
    // Mapped images have no overlay
    assert_eq!(result.image.overlay().offset(), None);
}

#[test]
fn test_warnings_serialize_to_json() {
    let fixture = PeFixture {
        number_of_rva_and_sizes: 0x40,
        ..PeFixture::pe32()
    };
    let result = load(fixture.buffer(), &ImageLoadOptions::default());

    let json = serde_json::to_string(&result.warnings).unwrap();
    assert!(json.contains("TooManyDataDirectories"));
    let parsed: peimage::ErrorList = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, result.warnings);
    assert_eq!(
        result.warnings.errors()[0].to_string(),
        "data_directories: Number of RVA and sizes exceeds the maximum data directory count (64)"
    );
}
