//! Core data shapes shared across the conversion pipeline
//!
//! - [`SourceImage`]: one image produced by a builder, with the input files
//!   it consumed
//! - [`PixelData`] / [`PixelBuffer`]: decoded samples, opaque to the
//!   orchestrator
//! - [`OutputFile`] / [`DerivedFile`]: written primary and derived artifacts
//! - [`FileErrors`]: per-file error accumulation for one conversion run

mod pixels;

pub use pixels::{PixelBuffer, PixelData, MAX_SEGMENTS};

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// Errors accumulated per input file during one conversion run
///
/// A path may collect several entries when multiple builders each reject it
/// for different reasons.
pub type FileErrors = BTreeMap<PathBuf, Vec<String>>;

/// One image produced by an image builder
#[derive(Debug, Clone)]
pub struct SourceImage {
    /// Human-readable name, used to derive the output file name
    pub name: String,

    /// Decoded samples, produced by the delegated codec
    pub pixels: PixelData,

    /// Physical element spacing in mm, when the source carries geometry
    pub spacing: Option<[f64; 3]>,

    /// Position of the first element in patient coordinates
    pub origin: Option<[f64; 3]>,

    /// Direction cosines (columns: row axis, column axis, normal)
    pub direction: Option<[[f64; 3]; 3]>,

    /// Window level from the source headers, when present
    pub window_center: Option<f64>,
    pub window_width: Option<f64>,

    /// Timepoint count for 4-D acquisitions
    pub timepoints: Option<u32>,

    /// Distinct label values, when the image plausibly is a segmentation
    pub segments: Option<BTreeSet<i64>>,

    /// Input files claimed to produce this image. Never empty, and disjoint
    /// from every other image's set within one run.
    pub consumed_files: BTreeSet<PathBuf>,
}

impl SourceImage {
    /// Populates `segments` from the pixel buffer
    ///
    /// Runs uniformly after any builder produces an image, regardless of the
    /// source format. Non-integral buffers and integral buffers with more
    /// than [`MAX_SEGMENTS`] distinct values leave `segments` unset.
    pub fn extract_segments(&mut self) {
        self.segments = self.pixels.buffer().distinct_integer_values(MAX_SEGMENTS);
    }
}

/// Kind of a written primary output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Mha,
}

/// Kind of a derived secondary artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DerivedKind {
    RangeSidecar,
    Thumbnail,
}

/// A written primary output file
///
/// Retains the association between the output and the input files it was
/// produced from.
#[derive(Debug, Clone, Serialize)]
pub struct OutputFile {
    pub path: PathBuf,
    pub kind: OutputKind,
    pub name: String,
    pub consumed_files: BTreeSet<PathBuf>,
}

/// A derived artifact written by a post-processor
///
/// Always tied 1:1 to the primary output it was derived from; never a new
/// logical image.
#[derive(Debug, Clone, Serialize)]
pub struct DerivedFile {
    /// The primary output this artifact was derived from
    pub source: PathBuf,
    pub path: PathBuf,
    pub kind: DerivedKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray_image(values: Vec<u8>, shape: Vec<usize>) -> SourceImage {
        SourceImage {
            name: "test".to_string(),
            pixels: PixelData::new(shape, PixelBuffer::U8(values)).unwrap(),
            spacing: None,
            origin: None,
            direction: None,
            window_center: None,
            window_width: None,
            timepoints: None,
            segments: None,
            consumed_files: [PathBuf::from("test.png")].into_iter().collect(),
        }
    }

    #[test]
    fn test_extract_segments_label_map() {
        let mut image = gray_image(vec![0, 1, 1, 2], vec![2, 2]);
        image.extract_segments();
        assert_eq!(image.segments.as_ref().map(|s| s.len()), Some(3));
    }

    #[test]
    fn test_extract_segments_float_unset() {
        let mut image = gray_image(vec![0, 1, 1, 2], vec![2, 2]);
        image.pixels = PixelData::new(vec![2, 2], PixelBuffer::F32(vec![0.0; 4])).unwrap();
        image.extract_segments();
        assert!(image.segments.is_none());
    }
}
