//! Fallback raster builder
//!
//! Last-resort builder for plain 2-D raster files (PNG and JPEG). Detection
//! goes by content magic rather than extension. Raster files carry no
//! physical geometry, so produced images have no spacing, origin or
//! direction.

use crate::builders::{BuilderOutput, ImageBuilder};
use crate::models::{PixelBuffer, PixelData, SourceImage};
use image::{DynamicImage, ImageFormat, ImageReader};
use log::debug;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

fn format_error(message: &str) -> String {
    format!("fallback image builder: {}", message)
}

/// Builds 2-D images from ordinary raster files
pub struct FallbackBuilder;

impl FallbackBuilder {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FallbackBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Decodes one raster file, or `Ok(None)` when it is not a supported format
fn build_one(path: &Path) -> Result<Option<SourceImage>, String> {
    let reader = match ImageReader::open(path).and_then(|r| r.with_guessed_format()) {
        Ok(reader) => reader,
        Err(_) => return Ok(None),
    };
    match reader.format() {
        Some(ImageFormat::Png) | Some(ImageFormat::Jpeg) => {}
        _ => return Ok(None),
    }

    let decoded = reader
        .decode()
        .map_err(|_| "not a valid image file".to_string())?;

    let (width, height) = (decoded.width() as usize, decoded.height() as usize);
    let buffer = match decoded {
        DynamicImage::ImageLuma8(img) => PixelBuffer::U8(img.into_raw()),
        DynamicImage::ImageLuma16(img) => PixelBuffer::U16(img.into_raw()),
        other => PixelBuffer::Rgb8(other.to_rgb8().into_raw()),
    };
    let pixels = PixelData::new(vec![height, width], buffer).map_err(|e| format!("{}", e))?;

    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("image")
        .to_string();

    Ok(Some(SourceImage {
        name,
        pixels,
        spacing: None,
        origin: None,
        direction: None,
        window_center: None,
        window_width: None,
        timepoints: None,
        segments: None,
        consumed_files: [path.to_path_buf()].into_iter().collect(),
    }))
}

impl ImageBuilder for FallbackBuilder {
    fn name(&self) -> &'static str {
        "fallback"
    }

    fn build(&self, files: &BTreeSet<PathBuf>) -> BuilderOutput {
        let mut out = BuilderOutput::default();

        for file in files {
            match build_one(file) {
                Ok(Some(image)) => {
                    debug!("built raster image `{}` from {:?}", image.name, file);
                    out.images.push(image);
                }
                Ok(None) => {}
                Err(message) => out.push_error(file, format_error(&message)),
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_builds_grayscale_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tile.png");
        let img = image::GrayImage::from_raw(3, 2, vec![0, 50, 100, 150, 200, 250]).unwrap();
        img.save(&path).unwrap();

        let files: BTreeSet<PathBuf> = [path.clone()].into_iter().collect();
        let out = FallbackBuilder::new().build(&files);

        assert!(out.file_errors.is_empty());
        assert_eq!(out.images.len(), 1);
        let image = &out.images[0];
        assert_eq!(image.name, "tile");
        // Shape is (height, width); rasters carry no physical geometry
        assert_eq!(image.pixels.shape(), &[2, 3]);
        assert_eq!(image.spacing, None);
        assert!(image.consumed_files.contains(&path));
    }

    #[test]
    fn test_rgb_png_keeps_three_channels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("color.png");
        let img = image::RgbImage::from_raw(2, 1, vec![255, 0, 0, 0, 0, 255]).unwrap();
        img.save(&path).unwrap();

        let files: BTreeSet<PathBuf> = [path].into_iter().collect();
        let out = FallbackBuilder::new().build(&files);

        assert_eq!(out.images.len(), 1);
        match out.images[0].pixels.buffer() {
            PixelBuffer::Rgb8(values) => assert_eq!(values.len(), 6),
            other => panic!("unexpected buffer type: {:?}", other),
        }
    }

    #[test]
    fn test_unrecognized_content_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.xyz");
        fs::write(&path, "nothing raster-like in here").unwrap();

        let files: BTreeSet<PathBuf> = [path].into_iter().collect();
        let out = FallbackBuilder::new().build(&files);
        assert!(out.images.is_empty());
        assert!(out.file_errors.is_empty());
    }

    #[test]
    fn test_corrupt_png_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        let mut bytes = vec![0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];
        bytes.extend_from_slice(b"garbage follows the signature");
        fs::write(&path, &bytes).unwrap();

        let files: BTreeSet<PathBuf> = [path.clone()].into_iter().collect();
        let out = FallbackBuilder::new().build(&files);

        assert!(out.images.is_empty());
        let messages = out.file_errors.get(&path).unwrap();
        assert_eq!(messages[0], "fallback image builder: not a valid image file");
    }
}
