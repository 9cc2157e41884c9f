//! Pixel range sidecar
//!
//! Writes a small JSON file next to each output recording the minimum and
//! maximum sample value, so consumers can window the image without reading
//! the whole volume.

use crate::metaio;
use crate::models::{DerivedFile, DerivedKind, OutputFile};
use crate::post_processors::PostProcessor;
use std::fs;

pub struct PixelRangeProcessor;

impl PixelRangeProcessor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PixelRangeProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl PostProcessor for PixelRangeProcessor {
    fn name(&self) -> &'static str {
        "pixel_range"
    }

    fn process(&self, output: &OutputFile) -> Result<Option<DerivedFile>, String> {
        let (_, pixels) = metaio::read_image(&output.path).map_err(|e| format!("{}", e))?;
        let (min, max) = match pixels.buffer().min_max() {
            Some(range) => range,
            None => return Ok(None),
        };

        let path = output.path.with_extension("range.json");
        let payload = serde_json::json!({ "min": min, "max": max });
        let file = fs::File::create(&path).map_err(|e| format!("{}", e))?;
        serde_json::to_writer_pretty(file, &payload).map_err(|e| format!("{}", e))?;

        Ok(Some(DerivedFile {
            source: output.path.clone(),
            path,
            kind: DerivedKind::RangeSidecar,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OutputKind, PixelBuffer, PixelData, SourceImage};
    use std::collections::BTreeSet;

    #[test]
    fn test_writes_range_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("volume.mha");
        let image = SourceImage {
            name: "volume".to_string(),
            pixels: PixelData::new(vec![2, 2], PixelBuffer::I16(vec![-100, 0, 50, 300])).unwrap(),
            spacing: None,
            origin: None,
            direction: None,
            window_center: None,
            window_width: None,
            timepoints: None,
            segments: None,
            consumed_files: BTreeSet::new(),
        };
        metaio::write_mha(&image, &path).unwrap();

        let output = OutputFile {
            path: path.clone(),
            kind: OutputKind::Mha,
            name: "volume".to_string(),
            consumed_files: BTreeSet::new(),
        };
        let derived = PixelRangeProcessor::new().process(&output).unwrap().unwrap();

        assert_eq!(derived.kind, DerivedKind::RangeSidecar);
        assert_eq!(derived.source, path);
        let text = fs::read_to_string(&derived.path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["min"], -100.0);
        assert_eq!(value["max"], 300.0);
    }

    #[test]
    fn test_missing_output_is_a_failure() {
        let output = OutputFile {
            path: std::path::PathBuf::from("/does/not/exist.mha"),
            kind: OutputKind::Mha,
            name: "ghost".to_string(),
            consumed_files: BTreeSet::new(),
        };
        assert!(PixelRangeProcessor::new().process(&output).is_err());
    }
}
