//! Error types for the peimage loader.
//!
//! Every subsystem owns one closed enumeration of error kinds. The kinds are
//! gathered under [`ErrorKind`], which is what both the fatal error value
//! ([`PeError`]) and the diagnostics list ([`crate::error_list::ErrorList`])
//! carry around.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Low-level buffer failures. These are the only errors raised directly by
/// the buffer layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize, Deserialize)]
pub enum BufferErrc {
    #[error("Buffer overrun")]
    BufferOverrun,
    #[error("Integer overflow in offset computation")]
    IntegerOverflow,
    #[error("Unable to read buffer data")]
    UnableToReadBuffer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize, Deserialize)]
pub enum DosHeaderErrc {
    #[error("Invalid DOS header signature")]
    InvalidDosHeaderSignature,
    #[error("PE header signature is not DWORD-aligned")]
    UnalignedELfanew,
    #[error("Too big or too small e_lfanew value")]
    InvalidELfanew,
    #[error("Unable to read DOS header")]
    UnableToReadDosHeader,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize, Deserialize)]
pub enum DosStubErrc {
    #[error("Unable to read DOS stub")]
    UnableToReadDosStub,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize, Deserialize)]
pub enum ImageSignatureErrc {
    #[error("Invalid PE signature")]
    InvalidPeSignature,
    #[error("Unable to read PE signature")]
    UnableToReadPeSignature,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize, Deserialize)]
pub enum FileHeaderErrc {
    #[error("Unable to read file header")]
    UnableToReadFileHeader,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize, Deserialize)]
pub enum OptionalHeaderErrc {
    #[error("Invalid optional header magic")]
    InvalidPeMagic,
    #[error("Unable to read optional header")]
    UnableToReadOptionalHeader,
    #[error("Size of optional header does not match the decoded header")]
    InvalidSizeOfOptionalHeader,
    #[error("Invalid address of entry point")]
    InvalidAddressOfEntryPoint,
    #[error("File alignment is not a power of two")]
    IncorrectFileAlignment,
    #[error("File alignment is out of range")]
    FileAlignmentOutOfRange,
    #[error("Section alignment is not a power of two")]
    IncorrectSectionAlignment,
    #[error("File alignment is greater than section alignment")]
    FileAlignmentGreaterThanSectionAlignment,
    #[error("File and section alignments must be equal for low-alignment images")]
    LowAlignmentMismatch,
    #[error("Subsystem version is too low")]
    IncorrectSubsystemVersion,
    #[error("Size of heap commit is greater than size of heap reserve")]
    IncorrectSizeOfHeap,
    #[error("Size of stack commit is greater than size of stack reserve")]
    IncorrectSizeOfStack,
    #[error("Invalid size of headers")]
    InvalidSizeOfHeaders,
    #[error("Unknown subsystem")]
    UnknownSubsystem,
    #[error("Image base is not 64K-aligned")]
    UnalignedImageBase,
    #[error("Image base is not valid for an image without relocations")]
    IncorrectImageBase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize, Deserialize)]
pub enum DataDirectoriesErrc {
    #[error("Unable to read data directories")]
    UnableToReadDataDirectories,
    #[error("Number of RVA and sizes exceeds the maximum data directory count")]
    TooManyDataDirectories,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize, Deserialize)]
pub enum SectionErrc {
    #[error("Unable to read section table")]
    UnableToReadSectionTable,
    #[error("Unable to read section data")]
    UnableToReadSectionData,
    #[error("Section raw data pointer is not aligned to file alignment")]
    UnalignedRawAddress,
    #[error("Section raw size is not aligned to file alignment")]
    UnalignedRawSize,
    #[error("Section virtual address is not aligned to section alignment")]
    UnalignedVirtualAddress,
    #[error("Virtual gap between sections")]
    VirtualGapBetweenSections,
    #[error("Section virtual range overflows")]
    VirtualRangeOverflow,
    #[error("Section raw data overlaps another section")]
    RawDataOverlap,
    #[error("Size of image does not match the last section extent")]
    InvalidSizeOfImage,
    #[error("Section not found")]
    SectionNotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize, Deserialize)]
pub enum OverlayErrc {
    #[error("Unable to read overlay")]
    UnableToReadOverlay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize, Deserialize)]
pub enum ImageLoaderErrc {
    #[error("Unable to load full headers buffer")]
    UnableToLoadFullHeadersBuffer,
}

/// Every error kind the loader can report, grouped by subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize, Deserialize)]
pub enum ErrorKind {
    #[error(transparent)]
    Buffer(#[from] BufferErrc),
    #[error(transparent)]
    DosHeader(#[from] DosHeaderErrc),
    #[error(transparent)]
    DosStub(#[from] DosStubErrc),
    #[error(transparent)]
    ImageSignature(#[from] ImageSignatureErrc),
    #[error(transparent)]
    FileHeader(#[from] FileHeaderErrc),
    #[error(transparent)]
    OptionalHeader(#[from] OptionalHeaderErrc),
    #[error(transparent)]
    DataDirectories(#[from] DataDirectoriesErrc),
    #[error(transparent)]
    Section(#[from] SectionErrc),
    #[error(transparent)]
    Overlay(#[from] OverlayErrc),
    #[error(transparent)]
    ImageLoader(#[from] ImageLoaderErrc),
}

impl ErrorKind {
    /// Name of the subsystem that owns this kind.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Buffer(_) => "buffer",
            Self::DosHeader(_) => "dos_header",
            Self::DosStub(_) => "dos_stub",
            Self::ImageSignature(_) => "image_signature",
            Self::FileHeader(_) => "file_header",
            Self::OptionalHeader(_) => "optional_header",
            Self::DataDirectories(_) => "data_directories",
            Self::Section(_) => "section",
            Self::Overlay(_) => "overlay",
            Self::ImageLoader(_) => "image_loader",
        }
    }
}

/// A failure with its chain of causes.
///
/// Structural failures wrap the low-level error that triggered them, so a
/// fatal "unable to read DOS header" still points at the buffer overrun
/// underneath it.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct PeError {
    kind: ErrorKind,
    #[source]
    source: Option<Box<PeError>>,
}

impl PeError {
    pub fn new(kind: impl Into<ErrorKind>) -> Self {
        Self {
            kind: kind.into(),
            source: None,
        }
    }

    /// Wrap `cause` under a higher-level error kind.
    pub fn nested(kind: impl Into<ErrorKind>, cause: PeError) -> Self {
        Self {
            kind: kind.into(),
            source: Some(Box::new(cause)),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn cause(&self) -> Option<&PeError> {
        self.source.as_deref()
    }

    /// The innermost error of the chain (`self` when there is no cause).
    pub fn root_cause(&self) -> &PeError {
        let mut current = self;
        while let Some(next) = current.cause() {
            current = next;
        }
        current
    }

    /// Iterate the chain from this error down to the root cause.
    pub fn chain(&self) -> impl Iterator<Item = &PeError> {
        std::iter::successors(Some(self), |e| e.cause())
    }

    /// True when this error or any of its causes has the given kind.
    pub fn contains(&self, kind: impl Into<ErrorKind>) -> bool {
        let kind = kind.into();
        self.chain().any(|e| e.kind == kind)
    }
}

macro_rules! impl_from_errc {
    ($($errc:ty),* $(,)?) => {
        $(
            impl From<$errc> for PeError {
                fn from(errc: $errc) -> Self {
                    PeError::new(errc)
                }
            }
        )*
    };
}

impl_from_errc!(
    BufferErrc,
    DosHeaderErrc,
    DosStubErrc,
    ImageSignatureErrc,
    FileHeaderErrc,
    OptionalHeaderErrc,
    DataDirectoriesErrc,
    SectionErrc,
    OverlayErrc,
    ImageLoaderErrc,
    ErrorKind,
);

/// Result type alias for loader operations
pub type Result<T> = std::result::Result<T, PeError>;
