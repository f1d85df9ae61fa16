//! File-backed byte sources.
//!
//! Files are memory-mapped and handed to the loader as a shared
//! [`InputBufferPtr`], so section views and the overlay alias the mapping
//! instead of copying it. A size limit guards against mapping arbitrarily
//! large inputs.

pub mod error;

use crate::buffers::{InputBufferPtr, InputMemoryBuffer};
use crate::image::{self, ImageLoadOptions, ImageLoadResult};
use crate::io::error::{IoError, Result};
use memmap2::Mmap;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Defines the resource limits for opening files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IOLimits {
    /// The absolute maximum file size that can be opened.
    pub max_file_size: u64,
}

impl Default for IOLimits {
    fn default() -> Self {
        Self {
            max_file_size: 512 * 1024 * 1024, // 512MB
        }
    }
}

/// A read-only file mapped into memory.
pub struct ImageFile;

impl ImageFile {
    /// Opens a file and maps it as an input buffer.
    ///
    /// Fails with [`IoError::FileTooLarge`] if the file size exceeds
    /// `limits.max_file_size`.
    pub fn open<P: AsRef<Path>>(path: P, limits: &IOLimits) -> Result<InputBufferPtr> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();

        debug!(
            path = %path.display(),
            size = file_size,
            limits.max_file_size = limits.max_file_size,
            "Opening image file"
        );

        if file_size > limits.max_file_size {
            warn!(
                path = %path.display(),
                size = file_size,
                limit = limits.max_file_size,
                "File is too large"
            );
            return Err(IoError::FileTooLarge {
                limit: limits.max_file_size,
                found: file_size,
            });
        }

        // memmap cannot map empty files
        if file_size == 0 {
            return Ok(Arc::new(InputMemoryBuffer::default()));
        }

        // Safety: read-only map of a regular file; the loader never writes
        // through it.
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Arc::new(InputMemoryBuffer::from_owner(mmap)))
    }
}

/// Map `path` and run the loader over it.
///
/// I/O failures are returned as errors; everything past that is reported in
/// the [`ImageLoadResult`].
pub fn load_image_file<P: AsRef<Path>>(
    path: P,
    limits: &IOLimits,
    options: &ImageLoadOptions,
) -> Result<ImageLoadResult> {
    let buffer = ImageFile::open(path, limits)?;
    Ok(image::load(buffer, options))
}
