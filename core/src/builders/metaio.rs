//! MetaIO builder
//!
//! Claims `.mha`/`.mhd` headers from the candidate set. A detached `.raw`
//! data file referenced by a header is consumed together with it, so neither
//! half of an mhd/raw pair is reported as unrecognized.

use crate::builders::{BuilderOutput, ImageBuilder};
use crate::metaio;
use crate::models::SourceImage;
use log::debug;
use std::collections::BTreeSet;
use std::fs;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

fn format_error(message: &str) -> String {
    format!("MetaIO image builder: {}", message)
}

/// Builds images from MetaIO headers and their element data
pub struct MetaIoBuilder;

impl MetaIoBuilder {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MetaIoBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Format probe: a MetaIO image header starts with `ObjectType = Image`
///
/// Anything else (including the raw data files next to `.mhd` headers) is
/// left for other builders without recording an error.
fn is_metaio_header(path: &Path) -> bool {
    let file = match fs::File::open(path) {
        Ok(f) => f,
        Err(_) => return false,
    };
    let mut reader = BufReader::new(file).take(256);
    let mut line = Vec::new();
    if reader.read_until(b'\n', &mut line).is_err() {
        return false;
    }
    match std::str::from_utf8(&line) {
        Ok(text) => matches!(
            text.split_once('='),
            Some((key, value)) if key.trim() == "ObjectType" && value.trim() == "Image"
        ),
        Err(_) => false,
    }
}

fn build_one(header_path: &Path, files: &BTreeSet<PathBuf>) -> crate::error::Result<SourceImage> {
    let (header, pixels) = metaio::read_image(header_path)?;

    let mut consumed_files: BTreeSet<PathBuf> = BTreeSet::new();
    consumed_files.insert(header_path.to_path_buf());
    if !header.is_local() {
        let data_path = metaio::data_file_path(header_path, &header.element_data_file)?;
        // Only files from the candidate set may be claimed
        if files.contains(&data_path) {
            consumed_files.insert(data_path);
        }
    }

    let name = header_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("image")
        .to_string();

    let mut spacing = [1.0; 3];
    if let Some(values) = &header.element_spacing {
        for (target, value) in spacing.iter_mut().zip(values) {
            *target = *value;
        }
    }
    let mut origin = [0.0; 3];
    if let Some(values) = &header.offset {
        for (target, value) in origin.iter_mut().zip(values) {
            *target = *value;
        }
    }

    let direction = header.transform_matrix.as_ref().and_then(|matrix| {
        if header.ndims < 3 || matrix.len() != header.ndims * header.ndims {
            return None;
        }
        let mut direction = [[0.0; 3]; 3];
        for (i, row) in direction.iter_mut().enumerate() {
            for (j, value) in row.iter_mut().enumerate() {
                *value = matrix[i * header.ndims + j];
            }
        }
        Some(direction)
    });

    // The slowest axis of a 4-D MetaIO volume is time
    let timepoints = (header.ndims == 4)
        .then(|| header.dim_size.last().copied().unwrap_or(1) as u32);

    Ok(SourceImage {
        name,
        pixels,
        spacing: Some(spacing),
        origin: Some(origin),
        direction,
        window_center: header.window_center,
        window_width: header.window_width,
        timepoints,
        segments: None,
        consumed_files,
    })
}

impl ImageBuilder for MetaIoBuilder {
    fn name(&self) -> &'static str {
        "metaio"
    }

    fn build(&self, files: &BTreeSet<PathBuf>) -> BuilderOutput {
        let mut out = BuilderOutput::default();
        let mut claimed: BTreeSet<PathBuf> = BTreeSet::new();

        for file in files {
            if claimed.contains(file) || !is_metaio_header(file) {
                continue;
            }
            match build_one(file, files) {
                Ok(image) => {
                    // Two headers may reference the same data file; the first
                    // keeps it and the later one is rejected as bad data
                    if let Some(dup) =
                        image.consumed_files.iter().find(|f| claimed.contains(*f))
                    {
                        let message = format_error(&format!(
                            "data file {:?} is already claimed by another header",
                            dup
                        ));
                        out.push_error(file, message);
                        continue;
                    }
                    claimed.extend(image.consumed_files.iter().cloned());
                    debug!("built MetaIO image `{}` from {:?}", image.name, file);
                    out.images.push(image);
                }
                Err(e) => out.push_error(file, format_error(&format!("{}", e))),
            }
        }

        out
    }
}
