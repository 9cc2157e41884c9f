use thiserror::Error;

/// Result type for voxconv operations
pub type Result<T> = std::result::Result<T, VoxconvError>;

/// Error types for voxconv operations
///
/// Per-file problems (unreadable slices, inconsistent geometry, unclaimed
/// inputs) are never surfaced through this enum; they are collected in the
/// [`FileErrors`](crate::models::FileErrors) map of a conversion run. This
/// enum covers run-level faults only.
#[derive(Error, Debug)]
pub enum VoxconvError {
    /// An image builder violated the produce-and-consume contract.
    ///
    /// This indicates a broken builder rather than bad input data, so it
    /// aborts the conversion run.
    #[error("image builder `{builder}` violated the build contract: {reason}")]
    BuilderContract {
        builder: &'static str,
        reason: String,
    },

    /// DICOM reading error
    #[error("DICOM error: {0}")]
    Dicom(String),

    /// MetaIO header or data error
    #[error("MetaIO error: {0}")]
    MetaIo(String),

    /// Pixel buffer and shape disagree
    #[error("invalid image data: {0}")]
    InvalidImage(String),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

// Convert dicom-object errors
impl From<dicom_object::ReadError> for VoxconvError {
    fn from(e: dicom_object::ReadError) -> Self {
        VoxconvError::Dicom(format!("{}", e))
    }
}

impl From<dicom_core::value::ConvertValueError> for VoxconvError {
    fn from(e: dicom_core::value::ConvertValueError) -> Self {
        VoxconvError::Dicom(format!("{}", e))
    }
}
