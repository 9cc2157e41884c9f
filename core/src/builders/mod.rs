//! Image builders
//!
//! Each builder is one format-specific strategy that competes for files from
//! the candidate set of a conversion run. Builders never mutate the set they
//! are given; which files they used is signalled through `consumed_files` on
//! each produced image, and files they recognized but could not build are
//! reported through per-file errors so nothing is dropped silently.

pub mod dicom;
pub mod fallback;
pub mod metaio;

pub use dicom::DicomBuilder;
pub use fallback::FallbackBuilder;
pub use metaio::MetaIoBuilder;

use crate::models::{FileErrors, SourceImage};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Everything one builder produced against one candidate set
#[derive(Debug, Default)]
pub struct BuilderOutput {
    pub images: Vec<SourceImage>,
    pub file_errors: FileErrors,
}

impl BuilderOutput {
    /// Records one error for a file this builder examined and rejected
    pub fn push_error(&mut self, file: &Path, message: String) {
        self.file_errors
            .entry(file.to_path_buf())
            .or_default()
            .push(message);
    }
}

/// A format-specific strategy for interpreting candidate files as images
pub trait ImageBuilder {
    /// Short name used in logs and contract-violation errors
    fn name(&self) -> &'static str;

    /// Whether the builder's external requirements are met.
    ///
    /// Unavailable builders are omitted from the default registry instead of
    /// failing at startup.
    fn available(&self) -> bool {
        true
    }

    /// Attempts to interpret a subset of `files` as images.
    ///
    /// Files that do not look like this builder's format at all must be left
    /// alone: no image, no error. Files that do look like the format but
    /// cannot be built into a valid image must receive a descriptive entry
    /// in `file_errors`.
    fn build(&self, files: &BTreeSet<PathBuf>) -> BuilderOutput;
}

/// Default builder registry
///
/// Ordered most specific format first; the raster fallback opens nearly
/// anything, so it runs last and only sees files no other builder claimed.
pub fn default_builders() -> Vec<Box<dyn ImageBuilder>> {
    let builders: Vec<Box<dyn ImageBuilder>> = vec![
        Box::new(DicomBuilder::new()),
        Box::new(MetaIoBuilder::new()),
        Box::new(FallbackBuilder::new()),
    ];

    builders.into_iter().filter(|b| b.available()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_builder_ordering() {
        let names: Vec<&str> = default_builders().iter().map(|b| b.name()).collect();
        assert_eq!(names, vec!["dicom", "metaio", "fallback"]);
    }
}
