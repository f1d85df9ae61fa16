//! Hostile and truncated inputs: loads must terminate without panicking and
//! never read out of bounds.

use peimage::buffers::{reduce, InputBuffer, InputBufferStatefulWrapper};
use peimage::error::{BufferErrc, DosHeaderErrc, ErrorKind, SectionErrc};
use peimage::image::{load, ImageLoadOptions};

use crate::common::*;

#[test]
fn test_read_past_end_fails() {
    let buffer = buffer_from(vec![1, 2, 3, 4, 5, 6, 7, 8]);
    let mut out = [0u8; 4];

    assert_eq!(buffer.read(4, &mut out).unwrap(), 4);
    assert_eq!(out, [5, 6, 7, 8]);
    for pos in [5, 8, 9, 1000] {
        let err = buffer.read(pos, &mut out).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Buffer(BufferErrc::BufferOverrun));
    }
}

#[test]
fn test_zero_length_read_always_succeeds() {
    let buffer = buffer_from(vec![0u8; 16]);
    for pos in [0, 16, 17, usize::MAX] {
        assert_eq!(buffer.read(pos, &mut []).unwrap(), 0);
    }
    let view = reduce(&buffer, 4, 8).unwrap();
    assert_eq!(view.read(usize::MAX, &mut []).unwrap(), 0);
}

#[test]
fn test_overflow_adjacent_offsets() {
    let buffer = buffer_from(vec![0u8; 64]);
    let mut out = [0u8; 2];

    let err = buffer.read(usize::MAX - 1, &mut out).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Buffer(BufferErrc::BufferOverrun));

    let view = reduce(&buffer, 8, 16).unwrap();
    let err = view.read(usize::MAX - 1, &mut out).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Buffer(BufferErrc::BufferOverrun));

    assert!(reduce(&buffer, usize::MAX - 1, 2).is_err());
    assert!(reduce(&view, 8, usize::MAX).is_err());

    let mut cursor = InputBufferStatefulWrapper::new(buffer);
    cursor.set_rpos(10).unwrap();
    assert!(cursor.advance_rpos(usize::MAX).is_err());
    assert_eq!(cursor.rpos(), 10);
}

#[test]
fn test_short_dos_header_virtual_tolerance() {
    let mut bytes = vec![0u8; 32];
    bytes[0] = b'M';
    bytes[1] = b'Z';

    let result = load(buffer_from(bytes.clone()), &ImageLoadOptions::default());
    let fatal = result.fatal_error.unwrap();
    assert_eq!(fatal.kind(), ErrorKind::DosHeader(DosHeaderErrc::UnableToReadDosHeader));
    assert!(fatal.contains(BufferErrc::UnableToReadBuffer));

    let options = ImageLoadOptions {
        allow_virtual_headers: true,
        ..Default::default()
    };
    let result = load(buffer_from(bytes), &options);
    // The header decodes; its zero-filled e_lfanew is then rejected
    assert_eq!(
        result.fatal_error.unwrap().kind(),
        ErrorKind::DosHeader(DosHeaderErrc::InvalidELfanew)
    );
    let descriptor = result.image.dos_header().descriptor();
    assert!(descriptor.is_virtual());
    assert_eq!(descriptor.physical_size(), 32);
    assert_eq!(descriptor.e_magic, 0x5A4D);
    assert_eq!(descriptor.e_lfanew, 0);
}

#[test]
fn test_every_truncation_terminates() {
    let bytes = PeFixture::pe32().with_overlay(b"tail").build();
    let strict = ImageLoadOptions::default();
    let tolerant = ImageLoadOptions {
        allow_virtual_headers: true,
        ..Default::default()
    };

    for len in 0..bytes.len() {
        let buffer = buffer_from(bytes[..len].to_vec());
        let result = load(buffer.clone(), &strict);
        if len < 0x40 {
            assert!(result.fatal_error.is_some(), "len {len}");
        }
        if result.is_ok() {
            // Whatever was captured lies inside the buffer
            for data in result.image.section_data().iter().filter(|d| d.is_loaded()) {
                let end = data.buffer().absolute_offset().unwrap() + data.buffer().size();
                assert!(end <= len);
            }
        }
        let _ = load(buffer, &tolerant);
    }
}

#[test]
fn test_truncated_section_table() {
    let fixture = PeFixture::pe32();
    let cut = fixture.section_table_offset() + 40 + 10;
    let bytes = fixture.build()[..cut].to_vec();
    let result = load(buffer_from(bytes), &ImageLoadOptions::default());

    let fatal = result.fatal_error.unwrap();
    assert_eq!(
        fatal.kind(),
        ErrorKind::Section(SectionErrc::UnableToReadSectionTable)
    );
    assert!(fatal.contains(BufferErrc::BufferOverrun));
    assert!(result.image.section_table().is_empty());
}

#[test]
fn test_huge_section_count() {
    let fixture = PeFixture::pe32();
    let mut bytes = fixture.build();
    put_u16(&mut bytes, E_LFANEW as usize + 6, u16::MAX);
    let result = load(buffer_from(bytes), &ImageLoadOptions::default());
    assert_eq!(
        result.fatal_error.unwrap().kind(),
        ErrorKind::Section(SectionErrc::UnableToReadSectionTable)
    );
}

#[test]
fn test_section_pointers_near_u32_max() {
    let fixture = PeFixture::pe32();
    let mut bytes = fixture.build();
    let first = fixture.section_table_offset();
    put_u32(&mut bytes, first + 20, 0xFFFF_FE00);
    put_u32(&mut bytes, first + 12, 0xFFFF_F000);
    let result = load(buffer_from(bytes), &ImageLoadOptions::default());

    assert!(result.is_ok());
    assert!(result
        .warnings
        .has_error_with_context(SectionErrc::UnableToReadSectionData, 0));
    assert!(result
        .warnings
        .has_error_with_context(SectionErrc::VirtualRangeOverflow, 0));
    assert!(result.image.section_data()[1].is_loaded());
    // The overlay starts past the bogus section and is empty
    assert!(result.image.overlay().is_empty());
}

/// xorshift64, so the inputs are reproducible without a rand dependency
fn next(state: &mut u64) -> u64 {
    *state ^= *state << 13;
    *state ^= *state >> 7;
    *state ^= *state << 17;
    *state
}

#[test]
fn test_random_inputs_terminate() {
    let mut state = 0x9E37_79B9_7F4A_7C15u64;
    let template = PeFixture::pe32().build();

    for round in 0..256 {
        let mut bytes = if round % 2 == 0 {
            template.clone()
        } else {
            vec![0u8; (next(&mut state) % 0x1000) as usize]
        };
        // Flip a handful of bytes, biased towards the headers
        let flips = 1 + next(&mut state) % 16;
        for _ in 0..flips {
            if bytes.is_empty() {
                break;
            }
            let limit = bytes.len().min(0x200) as u64;
            let at = (next(&mut state) % limit) as usize;
            bytes[at] = next(&mut state) as u8;
        }

        for allow_virtual_headers in [false, true] {
            let options = ImageLoadOptions {
                allow_virtual_headers,
                ..Default::default()
            };
            let result = load(buffer_from(bytes.clone()), &options);
            if let Some(fatal) = &result.fatal_error {
                assert!(!fatal.root_cause().to_string().is_empty());
            }
        }
    }
}
