//! Image loading pipeline.
//!
//! [`load`] walks a single cursor over the byte source and fills an
//! [`Image`] stage by stage. Structural failures stop the walk and land in
//! [`ImageLoadResult::fatal_error`]; consistency problems are appended to
//! [`ImageLoadResult::warnings`] and loading carries on.

use crate::buffers::{reduce, InputBufferPtr, InputBufferStatefulWrapper};
use crate::error::{
    DataDirectoriesErrc, ErrorKind, ImageLoaderErrc, PeError, Result, SectionErrc,
};
use crate::error_list::ErrorList;
use crate::formats::pe::{
    validate_section_headers, validate_size_of_image, DataDirectories,
    DosHeaderValidationOptions, ImageDosHeader, OptionalHeaderValidationOptions, SectionData,
    SectionDataLoadOptions,
};
use crate::image::Image;
use crate::packed::PackedLayout;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

/// Load options. Unset fields in a JSON document take their defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageLoadOptions {
    /// Tolerate headers cut short by the end of the buffer; the missing
    /// tail reads as zero.
    pub allow_virtual_headers: bool,
    pub validate_sections: bool,
    pub validate_image_base: bool,
    pub validate_size_of_optional_header: bool,
    pub validate_image_signature: bool,
    pub validate_size_of_image: bool,
    /// Address sections by RVA instead of raw file offset.
    pub image_loaded_to_memory: bool,
    pub eager_section_data_copy: bool,
    pub eager_dos_stub_data_copy: bool,
    pub eager_overlay_data_copy: bool,
    pub eager_full_headers_buffer_copy: bool,
    pub load_section_data: bool,
    pub load_overlay: bool,
    pub load_full_headers_buffer: bool,
    pub dos_header_validation: DosHeaderValidationOptions,
    pub optional_header_validation: OptionalHeaderValidationOptions,
}

impl Default for ImageLoadOptions {
    fn default() -> Self {
        Self {
            allow_virtual_headers: false,
            validate_sections: true,
            validate_image_base: true,
            validate_size_of_optional_header: true,
            validate_image_signature: true,
            validate_size_of_image: true,
            image_loaded_to_memory: false,
            eager_section_data_copy: false,
            eager_dos_stub_data_copy: false,
            eager_overlay_data_copy: false,
            eager_full_headers_buffer_copy: false,
            load_section_data: true,
            load_overlay: true,
            load_full_headers_buffer: true,
            dos_header_validation: DosHeaderValidationOptions::default(),
            optional_header_validation: OptionalHeaderValidationOptions::default(),
        }
    }
}

impl ImageLoadOptions {
    /// Serialize to JSON string
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string
    pub fn from_json(json_str: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json_str)
    }
}

/// Outcome of a load: the (possibly partial) image, the diagnostics, and
/// the structural failure that stopped the load, if any.
#[derive(Debug, Default)]
pub struct ImageLoadResult {
    pub image: Image,
    pub warnings: ErrorList,
    pub fatal_error: Option<PeError>,
}

impl ImageLoadResult {
    /// True when no stage failed fatally. Warnings may still be present.
    pub fn is_ok(&self) -> bool {
        self.fatal_error.is_none()
    }
}

/// Parse `buffer` as a PE image.
///
/// Always returns an image. When [`ImageLoadResult::fatal_error`] is set,
/// only the parts decoded before the failure are populated.
pub fn load(buffer: InputBufferPtr, options: &ImageLoadOptions) -> ImageLoadResult {
    let span = tracing::debug_span!(
        "load_image",
        size_bytes = buffer.size(),
        loaded_to_memory = options.image_loaded_to_memory
    );
    let _g = span.enter();

    let mut result = ImageLoadResult::default();
    result
        .image
        .set_loaded_to_memory(options.image_loaded_to_memory);

    let mut loader = Loader {
        cursor: InputBufferStatefulWrapper::new(buffer.clone()),
        buffer,
        options,
        image: &mut result.image,
        warnings: &mut result.warnings,
    };
    if let Err(e) = loader.run() {
        error!(error = %e, root_cause = %e.root_cause(), "Image load failed");
        result.fatal_error = Some(e);
    }

    debug!(
        warnings = result.warnings.len(),
        fatal = result.fatal_error.is_some(),
        "Image load finished"
    );
    result
}

struct Loader<'a> {
    buffer: InputBufferPtr,
    cursor: InputBufferStatefulWrapper,
    options: &'a ImageLoadOptions,
    image: &'a mut Image,
    warnings: &'a mut ErrorList,
}

impl Loader<'_> {
    fn run(&mut self) -> Result<()> {
        self.load_dos_header()?;
        self.load_dos_stub()?;
        self.load_image_signature()?;
        self.load_file_and_optional_headers()?;
        self.load_data_directories()?;
        self.load_section_table()?;

        if self.options.load_section_data {
            self.load_section_data();
        }
        if self.options.load_overlay && !self.options.image_loaded_to_memory {
            self.load_overlay();
        }
        if self.options.validate_size_of_image {
            let result = validate_size_of_image(
                self.image.section_table.last(),
                &self.image.optional_header,
            );
            self.record(result, None);
        }
        if self.options.load_full_headers_buffer {
            self.load_full_headers_buffer();
        }
        Ok(())
    }

    fn record_kind(&mut self, kind: ErrorKind, context: Option<u64>) {
        match context {
            Some(context) => {
                warn!(error = %kind, context, "Image load warning");
                self.warnings.add_error_with_context(kind, context);
            }
            None => {
                warn!(error = %kind, "Image load warning");
                self.warnings.add_error(kind);
            }
        }
    }

    fn record(&mut self, result: Result<()>, context: Option<u64>) {
        if let Err(e) = result {
            self.record_kind(e.kind(), context);
        }
    }

    fn record_all(&mut self, errors: ErrorList) {
        for info in errors.iter() {
            self.record_kind(info.kind, info.context);
        }
    }

    fn load_dos_header(&mut self) -> Result<()> {
        let dos_header = &mut self.image.dos_header;
        dos_header.deserialize(&mut self.cursor, self.options.allow_virtual_headers)?;
        dos_header.validate(&self.options.dos_header_validation)?;
        debug!(e_lfanew = dos_header.e_lfanew(), "DOS header decoded");
        Ok(())
    }

    fn load_dos_stub(&mut self) -> Result<()> {
        let e_lfanew = self.image.dos_header.e_lfanew();
        if (e_lfanew as usize) < ImageDosHeader::PACKED_SIZE {
            // PE header overlaps the DOS header; no stub
            return self.cursor.set_rpos(e_lfanew as usize);
        }
        self.image.dos_stub.deserialize(
            &mut self.cursor,
            e_lfanew,
            self.options.eager_dos_stub_data_copy,
        )?;
        debug!(size = self.image.dos_stub.buffer().size(), "DOS stub captured");
        Ok(())
    }

    fn load_image_signature(&mut self) -> Result<()> {
        let signature = &mut self.image.image_signature;
        signature.deserialize(&mut self.cursor, self.options.allow_virtual_headers)?;
        if self.options.validate_image_signature {
            signature.validate()?;
        }
        debug!(signature = signature.value(), "Image signature decoded");
        Ok(())
    }

    fn load_file_and_optional_headers(&mut self) -> Result<()> {
        let allow_virtual = self.options.allow_virtual_headers;
        self.image
            .file_header
            .deserialize(&mut self.cursor, allow_virtual)?;
        self.image
            .optional_header
            .deserialize(&mut self.cursor, allow_virtual)?;
        debug!(
            machine = ?self.image.file_header.machine(),
            sections = self.image.file_header.number_of_sections(),
            pe32_plus = self.image.optional_header.is_64bit(),
            "File and optional headers decoded"
        );

        if self.options.validate_size_of_optional_header {
            let declared = self.image.file_header.size_of_optional_header();
            let result = self
                .image
                .optional_header
                .validate_size_of_optional_header(declared);
            self.record(result, None);
        }

        let mut errors = ErrorList::new();
        self.image.optional_header.validate(
            &self.options.optional_header_validation,
            self.image.file_header.is_dll(),
            &mut errors,
        );
        self.record_all(errors);
        Ok(())
    }

    fn load_data_directories(&mut self) -> Result<()> {
        let declared = self.image.optional_header.number_of_rva_and_sizes();
        if DataDirectories::clamped_count(declared) != declared {
            self.record_kind(
                DataDirectoriesErrc::TooManyDataDirectories.into(),
                Some(declared as u64),
            );
        }
        self.image.data_directories.deserialize(
            &mut self.cursor,
            declared,
            self.options.allow_virtual_headers,
        )?;
        debug!(count = self.image.data_directories.len(), "Data directories decoded");

        if self.options.validate_image_base {
            let has_relocations = self.image.has_relocations();
            let result = self
                .image
                .optional_header
                .validate_image_base(has_relocations);
            self.record(result, None);
        }
        Ok(())
    }

    fn load_section_table(&mut self) -> Result<()> {
        let position = self
            .image
            .file_header
            .section_table_buffer_pos()
            .and_then(|pos| self.cursor.set_rpos(pos))
            .map_err(|e| PeError::nested(SectionErrc::UnableToReadSectionTable, e));
        position?;

        let count = self.image.file_header.number_of_sections();
        self.image.section_table.deserialize(
            &mut self.cursor,
            count,
            self.options.allow_virtual_headers,
        )?;
        debug!(count, "Section table decoded");

        if self.options.validate_sections {
            let mut errors = ErrorList::new();
            validate_section_headers(
                &self.image.optional_header,
                self.image.section_table.headers(),
                &mut errors,
            );
            self.record_all(errors);
        }
        Ok(())
    }

    fn load_section_data(&mut self) {
        let load_options = SectionDataLoadOptions {
            section_alignment: self.image.optional_header.section_alignment(),
            copy_memory: self.options.eager_section_data_copy,
            image_loaded_to_memory: self.options.image_loaded_to_memory,
            image_start_buffer_pos: 0,
        };

        let mut section_data = Vec::with_capacity(self.image.section_table.len());
        let mut failures = Vec::new();
        for (index, header) in self.image.section_table.headers().iter().enumerate() {
            let mut data = SectionData::default();
            if let Err(e) = data.deserialize(header, &self.buffer, &load_options) {
                failures.push((e.kind(), index as u64));
            }
            // Placeholder on failure keeps indices aligned with the table
            section_data.push(data);
        }
        self.image.section_data = section_data;

        for (kind, index) in failures {
            self.record_kind(kind, Some(index));
        }
        debug!(
            loaded = self.image.section_data.iter().filter(|d| d.is_loaded()).count(),
            "Section data loaded"
        );
    }

    fn load_overlay(&mut self) {
        let section_alignment = self.image.optional_header.section_alignment();
        let section_data_end = self
            .image
            .section_table
            .raw_data_end_offset(section_alignment);
        let result = self.image.overlay.deserialize(
            section_data_end,
            self.image.optional_header.size_of_headers(),
            0,
            &self.buffer,
            self.options.eager_overlay_data_copy,
        );
        self.record(result, None);
        debug!(
            offset = ?self.image.overlay.offset(),
            size = self.image.overlay.buffer().size(),
            "Overlay captured"
        );
    }

    fn load_full_headers_buffer(&mut self) {
        let size = (self.image.optional_header.size_of_headers() as usize).min(self.buffer.size());
        let copy = self.options.eager_full_headers_buffer_copy;
        let full_headers_buffer = &mut self.image.full_headers_buffer;
        let result = reduce(&self.buffer, 0, size)
            .and_then(|headers| full_headers_buffer.deserialize(headers, copy));
        if result.is_err() {
            self.record_kind(ImageLoaderErrc::UnableToLoadFullHeadersBuffer.into(), None);
            return;
        }
        debug!(size, "Full headers buffer captured");
    }
}
