use std::io;

use thiserror::Error;

/// Result alias for the binary chunk decoders.
pub type FormatResult<T> = Result<T, FormatError>;

/// Fatal decoding failures in the AXML and ARSC parsers.
///
/// A `FormatError` always aborts the sub-parse that raised it. Missing attributes and
/// unresolved resource references are not errors; they surface as `None` or empty lists.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("read of {size} bytes at offset {offset:#x} exceeds buffer length {len:#x}")]
    OutOfRange { offset: usize, size: usize, len: usize },

    #[error("truncated structure at offset {offset:#x}")]
    Truncated { offset: usize },

    #[error("input buffer is empty")]
    EmptyInput,

    #[error("unexpected chunk type {found:#06x} at offset {offset:#x}, expected {expected:#06x}")]
    UnexpectedChunkType {
        offset: usize,
        expected: u16,
        found: u16,
    },

    #[error("declared size {declared:#x} does not match buffer length {actual:#x}")]
    SizeMismatch { declared: usize, actual: usize },

    #[error("expected exactly one global string pool, found {0}")]
    StringPoolCount(usize),

    #[error("resource table declares {declared} packages but contains {parsed}")]
    PackageCountMismatch { declared: u32, parsed: u32 },

    #[error("text chunk at offset {offset:#x} has no terminating sentinel")]
    UnterminatedText { offset: usize },

    #[error("no start tag marker found after offset {offset:#x}")]
    MissingStartTag { offset: usize },

    #[error("string index {index} out of range for pool of {len} strings")]
    StringIndex { index: u32, len: usize },

    #[error("invalid string data at offset {offset:#x}")]
    InvalidString { offset: usize },

    #[error("malformed chunk at offset {offset:#x}: {reason}")]
    MalformedChunk { offset: usize, reason: &'static str },
}

/// A string that is not a packed resource id.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid resource id {0:?}")]
pub struct ParseResourceIdError(pub String);

/// Failures raised by the archive collaborator.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

/// Result alias for [`crate::android::package_info::extract_package_info`] and friends.
pub type ExtractResult<T> = Result<T, ExtractError>;

/// Extraction failure, tagged with the stage that failed.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("failed to decode manifest: {0}")]
    Manifest(#[source] FormatError),

    #[error("failed to decode resource table: {0}")]
    Resources(#[source] FormatError),

    #[error("archive entry '{0}' not found")]
    MissingEntry(String),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("icon {0} could not be resolved")]
    UnresolvedIcon(String),
}

/// Failure while rendering a decoded manifest back to XML text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("XML rendering failed: {0}")]
pub struct RenderError(pub String);
