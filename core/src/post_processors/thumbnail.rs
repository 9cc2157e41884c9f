//! Thumbnail rendering
//!
//! Renders the middle plane of each single-component output as an 8-bit
//! grayscale PNG, normalized over that plane's value range. Color outputs
//! are skipped; they have no obvious grayscale rendition.

use crate::metaio;
use crate::models::{DerivedFile, DerivedKind, OutputFile, PixelBuffer};
use crate::post_processors::PostProcessor;
use std::ops::Range;

pub struct ThumbnailProcessor;

impl ThumbnailProcessor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ThumbnailProcessor {
    fn default() -> Self {
        Self::new()
    }
}

fn plane_values(buffer: &PixelBuffer, range: Range<usize>) -> Option<Vec<f64>> {
    let values = match buffer {
        PixelBuffer::U8(v) => v[range].iter().map(|x| *x as f64).collect(),
        PixelBuffer::I16(v) => v[range].iter().map(|x| *x as f64).collect(),
        PixelBuffer::U16(v) => v[range].iter().map(|x| *x as f64).collect(),
        PixelBuffer::I32(v) => v[range].iter().map(|x| *x as f64).collect(),
        PixelBuffer::F32(v) => v[range].iter().map(|x| *x as f64).collect(),
        PixelBuffer::Rgb8(_) => return None,
    };
    Some(values)
}

fn normalize(values: &[f64]) -> Vec<u8> {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for v in values {
        min = min.min(*v);
        max = max.max(*v);
    }
    if !(max > min) {
        return vec![0; values.len()];
    }
    values
        .iter()
        .map(|v| (((v - min) / (max - min)) * 255.0).round() as u8)
        .collect()
}

impl PostProcessor for ThumbnailProcessor {
    fn name(&self) -> &'static str {
        "thumbnail"
    }

    fn process(&self, output: &OutputFile) -> Result<Option<DerivedFile>, String> {
        let (_, pixels) = metaio::read_image(&output.path).map_err(|e| format!("{}", e))?;

        let width = pixels.width();
        let height = pixels.height();
        let plane_len = width * height;
        if plane_len == 0 {
            return Ok(None);
        }
        let planes = pixels.buffer().len() / plane_len;
        let start = (planes / 2) * plane_len;

        let values = match plane_values(pixels.buffer(), start..start + plane_len) {
            Some(values) => values,
            None => return Ok(None),
        };
        let bytes = normalize(&values);

        let img = image::GrayImage::from_raw(width as u32, height as u32, bytes)
            .ok_or_else(|| "thumbnail plane size mismatch".to_string())?;
        let path = output.path.with_extension("png");
        img.save(&path).map_err(|e| format!("{}", e))?;

        Ok(Some(DerivedFile {
            source: output.path.clone(),
            path,
            kind: DerivedKind::Thumbnail,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OutputKind, PixelData, SourceImage};
    use std::collections::BTreeSet;
    use std::path::Path;

    fn write_volume(path: &Path, buffer: PixelBuffer, shape: Vec<usize>) {
        let image = SourceImage {
            name: "volume".to_string(),
            pixels: PixelData::new(shape, buffer).unwrap(),
            spacing: None,
            origin: None,
            direction: None,
            window_center: None,
            window_width: None,
            timepoints: None,
            segments: None,
            consumed_files: BTreeSet::new(),
        };
        metaio::write_mha(&image, path).unwrap();
    }

    fn output_for(path: &Path) -> OutputFile {
        OutputFile {
            path: path.to_path_buf(),
            kind: OutputKind::Mha,
            name: "volume".to_string(),
            consumed_files: BTreeSet::new(),
        }
    }

    #[test]
    fn test_renders_middle_slice() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("volume.mha");
        // Three 2x2 slices; the middle one holds 100..400
        let values: Vec<u16> = vec![0, 0, 0, 0, 100, 200, 300, 400, 0, 0, 0, 0];
        write_volume(&path, PixelBuffer::U16(values), vec![3, 2, 2]);

        let derived = ThumbnailProcessor::new()
            .process(&output_for(&path))
            .unwrap()
            .unwrap();
        assert_eq!(derived.kind, DerivedKind::Thumbnail);

        let thumb = image::open(&derived.path).unwrap().to_luma8();
        assert_eq!(thumb.dimensions(), (2, 2));
        // Normalized over the middle plane: 100 -> 0, 400 -> 255
        assert_eq!(thumb.get_pixel(0, 0).0[0], 0);
        assert_eq!(thumb.get_pixel(1, 1).0[0], 255);
    }

    #[test]
    fn test_color_output_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("color.mha");
        write_volume(&path, PixelBuffer::Rgb8(vec![0; 12]), vec![2, 2]);

        let result = ThumbnailProcessor::new().process(&output_for(&path)).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_flat_plane_renders_black() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flat.mha");
        write_volume(&path, PixelBuffer::U8(vec![42; 4]), vec![2, 2]);

        let derived = ThumbnailProcessor::new()
            .process(&output_for(&path))
            .unwrap()
            .unwrap();
        let thumb = image::open(&derived.path).unwrap().to_luma8();
        assert_eq!(thumb.get_pixel(0, 0).0[0], 0);
    }
}
