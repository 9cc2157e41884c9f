use crate::error::{Result, VoxconvError};
use std::collections::BTreeSet;

/// Maximum number of distinct values for an integral image to count as a
/// label map. Segmentations have a handful of classes; intensity images
/// stored as integers have far more, and collecting their full value set
/// would be meaningless.
pub const MAX_SEGMENTS: usize = 64;

/// Decoded pixel samples of one produced image
///
/// The orchestrator treats this as an opaque handle produced by the
/// delegated codecs; only the shared segment-extraction step and the output
/// writer look inside.
#[derive(Debug, Clone, PartialEq)]
pub enum PixelBuffer {
    U8(Vec<u8>),
    I16(Vec<i16>),
    U16(Vec<u16>),
    I32(Vec<i32>),
    F32(Vec<f32>),
    /// Interleaved 8-bit RGB samples
    Rgb8(Vec<u8>),
}

impl PixelBuffer {
    /// Number of elements (an RGB triplet counts as one element)
    pub fn len(&self) -> usize {
        match self {
            PixelBuffer::U8(v) => v.len(),
            PixelBuffer::I16(v) => v.len(),
            PixelBuffer::U16(v) => v.len(),
            PixelBuffer::I32(v) => v.len(),
            PixelBuffer::F32(v) => v.len(),
            PixelBuffer::Rgb8(v) => v.len() / 3,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Samples per element
    pub fn components(&self) -> usize {
        match self {
            PixelBuffer::Rgb8(_) => 3,
            _ => 1,
        }
    }

    /// Whether elements are single-component integers
    ///
    /// Multi-sample buffers are never label maps, so RGB does not count.
    pub fn is_integral(&self) -> bool {
        !matches!(self, PixelBuffer::F32(_) | PixelBuffer::Rgb8(_))
    }

    /// Distinct integer values present in the buffer
    ///
    /// Returns `None` for non-integral buffers, and for integral buffers
    /// with more than `cap` distinct values. Collection stops as soon as the
    /// cap is exceeded, so large intensity images are cheap to reject.
    pub fn distinct_integer_values(&self, cap: usize) -> Option<BTreeSet<i64>> {
        fn collect<T: Copy + Into<i64>>(values: &[T], cap: usize) -> Option<BTreeSet<i64>> {
            let mut seen = BTreeSet::new();
            for v in values {
                seen.insert((*v).into());
                if seen.len() > cap {
                    return None;
                }
            }
            Some(seen)
        }

        match self {
            PixelBuffer::U8(v) => collect(v, cap),
            PixelBuffer::I16(v) => collect(v, cap),
            PixelBuffer::U16(v) => collect(v, cap),
            PixelBuffer::I32(v) => collect(v, cap),
            PixelBuffer::F32(_) | PixelBuffer::Rgb8(_) => None,
        }
    }

    /// Minimum and maximum sample values, or `None` for an empty buffer
    pub fn min_max(&self) -> Option<(f64, f64)> {
        fn fold<T: Copy + Into<f64>>(values: &[T]) -> Option<(f64, f64)> {
            values.iter().fold(None, |acc, v| {
                let v: f64 = (*v).into();
                match acc {
                    None => Some((v, v)),
                    Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
                }
            })
        }

        match self {
            PixelBuffer::U8(v) => fold(v),
            PixelBuffer::I16(v) => fold(v),
            PixelBuffer::U16(v) => fold(v),
            PixelBuffer::I32(v) => fold(v),
            PixelBuffer::F32(v) => fold(v),
            PixelBuffer::Rgb8(v) => fold(v),
        }
    }
}

/// Pixel buffer plus its axis sizes
///
/// Shape is stored slowest axis first: `[rows, cols]` for 2-D images,
/// `[slices, rows, cols]` for volumes, `[timepoints, slices, rows, cols]`
/// for 4-D acquisitions.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelData {
    shape: Vec<usize>,
    buffer: PixelBuffer,
}

impl PixelData {
    /// Creates pixel data, checking that the buffer length matches the shape
    ///
    /// # Errors
    ///
    /// Returns an error if the element count implied by `shape` differs from
    /// the buffer length, or if the shape is not 2-, 3- or 4-dimensional.
    pub fn new(shape: Vec<usize>, buffer: PixelBuffer) -> Result<Self> {
        if !(2..=4).contains(&shape.len()) {
            return Err(VoxconvError::InvalidImage(format!(
                "unsupported dimensionality: {}",
                shape.len()
            )));
        }
        let expected: usize = shape.iter().product();
        if expected != buffer.len() {
            return Err(VoxconvError::InvalidImage(format!(
                "shape {:?} implies {} elements but buffer holds {}",
                shape,
                expected,
                buffer.len()
            )));
        }
        Ok(Self { shape, buffer })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn buffer(&self) -> &PixelBuffer {
        &self.buffer
    }

    pub fn width(&self) -> usize {
        self.shape[self.shape.len() - 1]
    }

    pub fn height(&self) -> usize {
        self.shape[self.shape.len() - 2]
    }

    /// Slice count across all leading axes (1 for plain 2-D images)
    pub fn slice_count(&self) -> usize {
        self.shape[..self.shape.len() - 2].iter().product()
    }

    pub fn is_volumetric(&self) -> bool {
        self.shape.len() >= 3
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_shape_mismatch_rejected() {
        let result = PixelData::new(vec![2, 3], PixelBuffer::U8(vec![0; 5]));
        assert!(result.is_err());
    }

    #[test]
    fn test_rgb_components_counted_per_element() {
        let data = PixelData::new(vec![2, 2], PixelBuffer::Rgb8(vec![0; 12])).unwrap();
        assert_eq!(data.buffer().len(), 4);
        assert_eq!(data.buffer().components(), 3);
    }

    #[test]
    fn test_one_dimensional_shape_rejected() {
        assert!(PixelData::new(vec![4], PixelBuffer::U8(vec![0; 4])).is_err());
    }

    #[test]
    fn test_distinct_values_small_label_map() {
        let buffer = PixelBuffer::U8(vec![0, 1, 1, 2, 0, 2]);
        let segments = buffer.distinct_integer_values(MAX_SEGMENTS).unwrap();
        assert_eq!(segments, [0i64, 1, 2].into_iter().collect());
    }

    #[test]
    fn test_distinct_values_at_cap() {
        // Exactly 64 distinct values is still a plausible label map
        let values: Vec<u16> = (0..64).collect();
        let segments = PixelBuffer::U16(values)
            .distinct_integer_values(MAX_SEGMENTS)
            .unwrap();
        assert_eq!(segments.len(), 64);
    }

    #[test]
    fn test_distinct_values_above_cap() {
        let values: Vec<u16> = (0..65).collect();
        assert!(PixelBuffer::U16(values)
            .distinct_integer_values(MAX_SEGMENTS)
            .is_none());
    }

    #[rstest]
    #[case::float(PixelBuffer::F32(vec![0.0, 1.0]))]
    #[case::rgb(PixelBuffer::Rgb8(vec![0; 6]))]
    fn test_distinct_values_non_integral(#[case] buffer: PixelBuffer) {
        assert!(buffer.distinct_integer_values(MAX_SEGMENTS).is_none());
    }

    #[test]
    fn test_min_max() {
        let buffer = PixelBuffer::I16(vec![-4, 7, 0]);
        assert_eq!(buffer.min_max(), Some((-4.0, 7.0)));
        assert_eq!(PixelBuffer::F32(vec![]).min_max(), None);
    }

    #[test]
    fn test_slice_count() {
        let volume = PixelData::new(vec![5, 2, 2], PixelBuffer::U8(vec![0; 20])).unwrap();
        assert_eq!(volume.slice_count(), 5);
        assert!(volume.is_volumetric());

        let image = PixelData::new(vec![2, 2], PixelBuffer::U8(vec![0; 4])).unwrap();
        assert_eq!(image.slice_count(), 1);
        assert!(!image.is_volumetric());
    }
}
