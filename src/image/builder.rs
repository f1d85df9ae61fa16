//! Serialize an [`Image`] back to bytes.

use crate::buffers::{OutputBuffer, OutputMemoryBuffer};
use crate::error::Result;
use crate::formats::pe::ImageFileHeader;
use crate::image::Image;
use crate::math::{self, SafeUint};
use crate::packed::PackedLayout;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageBuildOptions {
    /// Also emit the zero-filled tail of headers that were only partially
    /// present in the source.
    pub write_virtual_part: bool,
    pub write_section_data: bool,
    pub write_overlay: bool,
}

impl Default for ImageBuildOptions {
    fn default() -> Self {
        Self {
            write_virtual_part: false,
            write_section_data: true,
            write_overlay: true,
        }
    }
}

/// Serialize `image` into a new byte vector.
///
/// The captured full headers buffer is laid down first so padding between
/// structures survives; each structure is then re-encoded at its own offset.
pub fn build(image: &Image, options: &ImageBuildOptions) -> Result<Vec<u8>> {
    let mut out = OutputMemoryBuffer::new();
    build_into(image, options, &mut out)?;
    Ok(out.into_inner())
}

/// Serialize `image` into `out`, with offset 0 at `out`'s current start.
pub fn build_into(
    image: &Image,
    options: &ImageBuildOptions,
    out: &mut dyn OutputBuffer,
) -> Result<()> {
    let wvp = options.write_virtual_part;

    out.set_wpos(0);
    image.full_headers_buffer().serialize(out)?;

    out.set_wpos(0);
    image.dos_header().serialize(out, wvp);
    out.set_wpos(image.dos_header().descriptor().physical_size());
    image.dos_stub().serialize(out)?;

    let e_lfanew = math::to_usize(image.dos_header().e_lfanew() as u64)?;
    out.set_wpos(e_lfanew);
    image.image_signature().serialize(out, wvp);
    image.file_header().serialize(out, wvp);
    image.optional_header().serialize(out, wvp);
    image.data_directories().serialize(out, wvp);

    let mut section_table_pos = SafeUint::new(e_lfanew);
    section_table_pos
        .add(<u32 as PackedLayout>::PACKED_SIZE)?
        .add(ImageFileHeader::PACKED_SIZE)?
        .add(image.file_header().size_of_optional_header())?;
    out.set_wpos(section_table_pos.value());
    image.section_table().serialize(out, wvp);
    debug!(
        section_table_pos = section_table_pos.value(),
        sections = image.section_table().len(),
        "Headers written"
    );

    if options.write_section_data {
        write_section_data(image, out)?;
    }

    if options.write_overlay {
        if let Some(offset) = image.overlay().offset() {
            if !image.overlay().is_empty() {
                out.set_wpos(math::to_usize(offset)?);
                let written = image.overlay().serialize(out)?;
                debug!(offset, written, "Overlay written");
            }
        }
    }
    Ok(())
}

fn write_section_data(image: &Image, out: &mut dyn OutputBuffer) -> Result<()> {
    let section_alignment = image.optional_header().section_alignment();
    let headers = image.section_table().headers();
    for (header, data) in headers.iter().zip(image.section_data()) {
        if !data.is_loaded() {
            continue;
        }
        let pos = if image.is_loaded_to_memory() {
            header.virtual_address()
        } else {
            header.pointer_to_raw_data(section_alignment)
        };
        out.set_wpos(math::to_usize(pos as u64)?);
        data.serialize(out)?;
    }
    Ok(())
}
