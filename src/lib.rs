//! Tolerant PE image loader.
//!
//! `peimage` decodes Portable Executable files that may be truncated,
//! malformed or deliberately hostile. Loading never panics and never reads
//! out of bounds: structural failures stop the load and are reported as a
//! single fatal error, while consistency problems are collected as warnings
//! and the rest of the image is still decoded.
//!
//! ```no_run
//! use peimage::image::ImageLoadOptions;
//! use peimage::io::{load_image_file, IOLimits};
//!
//! let result = load_image_file("sample.exe", &IOLimits::default(), &ImageLoadOptions::default())?;
//! if let Some(fatal) = &result.fatal_error {
//!     eprintln!("not a PE image: {fatal}");
//! }
//! for warning in &result.warnings {
//!     eprintln!("warning: {warning}");
//! }
//! # Ok::<(), peimage::io::error::IoError>(())
//! ```

pub mod buffers;
pub mod error;
pub mod error_list;
pub mod formats;
pub mod image;
pub mod io;
pub mod logging;
pub mod math;
pub mod packed;

pub use error::{ErrorKind, PeError, Result};
pub use error_list::{ErrorInfo, ErrorList};
pub use image::{load, Image, ImageLoadOptions, ImageLoadResult};
