//! DICOM series builder
//!
//! The most intricate builder: DICOM slice files carry no directory
//! structure implying which files form one volume, several series may be
//! interleaved in one directory, and geometry must be inferred from tags
//! rather than filenames. Groups are formed from header metadata, ordered
//! and validated spatially, then promoted to produced images or dissolved
//! with per-file errors.

mod geometry;
mod group;

use crate::builders::{BuilderOutput, ImageBuilder};
use crate::models::{PixelBuffer, PixelData, SourceImage};
use dicom_dictionary_std::tags;
use dicom_object::InMemDicomObject;
use dicom_pixeldata::{DecodedPixelData, PixelDecoder};
use self::geometry::{Orientation, Vec3};
use self::group::{SliceGroup, SliceHeader};
use log::{debug, warn};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// Builds 3-D/4-D volumes (and single 2-D slices) from DICOM files
pub struct DicomBuilder;

impl DicomBuilder {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DicomBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageBuilder for DicomBuilder {
    fn name(&self) -> &'static str {
        "dicom"
    }

    fn build(&self, files: &BTreeSet<PathBuf>) -> BuilderOutput {
        let mut out = BuilderOutput::default();

        let headers = group::read_slice_headers(files.iter(), &mut out.file_errors);
        if headers.is_empty() {
            return out;
        }

        for slice_group in group::group_slices(headers, &mut out.file_errors) {
            match build_group(&slice_group) {
                Ok(image) => {
                    debug!(
                        "built DICOM image `{}` from {} file(s)",
                        image.name,
                        image.consumed_files.len()
                    );
                    out.images.push(image);
                }
                Err(message) => {
                    warn!("dissolving DICOM group `{}`: {}", slice_group.name, message);
                    let message = group::format_error(&message);
                    for slice in &slice_group.slices {
                        out.push_error(&slice.file, message.clone());
                    }
                }
            }
        }

        out
    }
}

/// Spatial and temporal layout of a validated classic slice group
#[derive(Debug)]
struct VolumeLayout {
    ordered_files: Vec<PathBuf>,
    orientation: Orientation,
    /// 1 when the acquisition is not 4-D
    n_time: usize,
    /// Slices per timepoint
    n_slices: usize,
    /// Spacing along the volume normal in mm
    z_spacing: f64,
    origin: Vec3,
}

fn build_group(slice_group: &SliceGroup) -> Result<SourceImage, String> {
    let enhanced = slice_group
        .slices
        .iter()
        .filter(|s| group::is_enhanced(&s.data))
        .count();

    // A series mixing assembly styles has ambiguous volume membership;
    // dissolve it rather than guess.
    if enhanced > 0 && enhanced < slice_group.slices.len() {
        return Err("series mixes multi-frame and single-frame objects".to_string());
    }
    if enhanced > 1 {
        return Err("multiple multi-frame objects share one series".to_string());
    }

    if enhanced == 1 {
        build_enhanced(slice_group)
    } else {
        build_classic(slice_group)
    }
}

/// Orders a classic group along the volume normal and validates its spacing
fn classic_layout(slice_group: &SliceGroup) -> Result<VolumeLayout, String> {
    let reference = &slice_group.slices[0].data;
    let orientation = Orientation::from_header(reference).unwrap_or_default();
    let normal = orientation.normal();

    let multi = slice_group.slices.len() > 1;
    let mut entries: Vec<(Option<i32>, f64, &SliceHeader)> =
        Vec::with_capacity(slice_group.slices.len());
    for slice in &slice_group.slices {
        let projection = match geometry::slice_position(&slice.data) {
            Some(position) => geometry::dot(position, normal),
            None if multi => return Err("missing ImagePositionPatient tag".to_string()),
            None => 0.0,
        };
        entries.push((group::temporal_index(&slice.data), projection, slice));
    }

    // A 4-D acquisition tags every slice. Groups where only some slices
    // carry TemporalPositionIndex stay 3-D, so a stray tag cannot invent a
    // phantom timepoint.
    let timepoints: BTreeSet<i32> = entries.iter().filter_map(|e| e.0).collect();
    let all_tagged = entries.iter().all(|e| e.0.is_some());
    let n_time = if all_tagged && timepoints.len() >= 2 {
        timepoints.len()
    } else {
        1
    };

    let mut ordered: Vec<(i32, f64, &SliceHeader)> = entries
        .into_iter()
        .map(|(temporal, projection, slice)| {
            let key = if n_time > 1 { temporal.unwrap_or(0) } else { 0 };
            (key, projection, slice)
        })
        .collect();
    // Position along the normal, not filename or instance number
    ordered.sort_by(|a, b| {
        a.0.cmp(&b.0)
            .then(a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal))
    });
    if slice_group.slices.len() % n_time != 0 {
        return Err("number of slices per time point differs".to_string());
    }
    let n_slices = slice_group.slices.len() / n_time;
    if n_time > 1 {
        let mut counts: BTreeMap<i32, usize> = BTreeMap::new();
        for o in &ordered {
            *counts.entry(o.0).or_default() += 1;
        }
        if counts.values().any(|c| *c != n_slices) {
            return Err("number of slices per time point differs".to_string());
        }
    }

    let z_spacing = if n_slices > 1 {
        let projections: Vec<f64> = ordered[..n_slices].iter().map(|o| o.1).collect();
        geometry::validate_spacing(&projections)?
    } else {
        spacing_between_slices(reference)
    };

    let origin = geometry::slice_position(&ordered[0].2.data).unwrap_or([0.0; 3]);

    Ok(VolumeLayout {
        ordered_files: ordered.iter().map(|o| o.2.file.clone()).collect(),
        orientation,
        n_time,
        n_slices,
        z_spacing,
        origin,
    })
}

fn build_classic(slice_group: &SliceGroup) -> Result<SourceImage, String> {
    let layout = classic_layout(slice_group)?;
    let reference = &slice_group.slices[0].data;

    let rescale = pixel_values_need_scaling(&slice_group.slices);
    let template = target_buffer(reference, rescale);
    let (buffer, rows, cols) = read_volume(&layout.ordered_files, template)?;

    // A lone slice stays 2-D; 4-D data gets its timepoint axis rather than
    // separate images per timepoint
    let shape = if layout.n_time > 1 {
        vec![layout.n_time, layout.n_slices, rows, cols]
    } else if layout.n_slices > 1 {
        vec![layout.n_slices, rows, cols]
    } else {
        vec![rows, cols]
    };
    let pixels = PixelData::new(shape, buffer).map_err(|e| format!("{}", e))?;

    let (row_spacing, col_spacing) = geometry::pixel_spacing(reference);
    let (window_center, window_width) = window_level(reference);

    Ok(SourceImage {
        name: slice_group.name.clone(),
        pixels,
        spacing: Some([row_spacing, col_spacing, layout.z_spacing]),
        origin: Some(layout.origin),
        direction: Some(layout.orientation.direction()),
        window_center,
        window_width,
        timepoints: (layout.n_time > 1).then_some(layout.n_time as u32),
        segments: None,
        consumed_files: slice_group.slices.iter().map(|s| s.file.clone()).collect(),
    })
}

/// Builds a volume from a single enhanced multi-frame object
fn build_enhanced(slice_group: &SliceGroup) -> Result<SourceImage, String> {
    let slice = &slice_group.slices[0];
    let n_frames = group::number_of_frames(&slice.data) as usize;

    let rescale = pixel_values_need_scaling(&slice_group.slices);
    let template = target_buffer(&slice.data, rescale);
    let (buffer, rows, cols) = read_volume(std::slice::from_ref(&slice.file), template)?;

    let shape = if n_frames > 1 {
        vec![n_frames, rows, cols]
    } else {
        vec![rows, cols]
    };
    let pixels = PixelData::new(shape, buffer).map_err(|e| format!("{}", e))?;

    let orientation = enhanced_orientation(&slice.data);
    let (origin, z_spacing) = enhanced_geometry(&slice.data, &orientation, n_frames)?;
    let (row_spacing, col_spacing) = geometry::pixel_spacing(&slice.data);
    let (window_center, window_width) = window_level(&slice.data);

    Ok(SourceImage {
        name: slice_group.name.clone(),
        pixels,
        spacing: Some([row_spacing, col_spacing, z_spacing]),
        origin: Some(origin),
        direction: Some(orientation.direction()),
        window_center,
        window_width,
        timepoints: None,
        segments: None,
        consumed_files: [slice.file.clone()].into_iter().collect(),
    })
}

/// Orientation of an enhanced object, which usually keeps its cosines in
/// the shared functional groups rather than at top level
fn enhanced_orientation(data: &InMemDicomObject) -> Orientation {
    if let Some(orientation) = Orientation::from_header(data) {
        return orientation;
    }
    data.element(tags::SHARED_FUNCTIONAL_GROUPS_SEQUENCE)
        .ok()
        .and_then(|e| e.items())
        .and_then(|items| items.first())
        .and_then(|item| item.element(tags::PLANE_ORIENTATION_SEQUENCE).ok())
        .and_then(|e| e.items())
        .and_then(|items| items.first())
        .and_then(Orientation::from_header)
        .unwrap_or_default()
}

/// Per-frame positions from PerFrameFunctionalGroupsSequence
///
/// `None` when the sequence is absent or any frame lacks a plane position.
fn frame_positions(data: &InMemDicomObject) -> Option<Vec<Vec3>> {
    let items = data
        .element(tags::PER_FRAME_FUNCTIONAL_GROUPS_SEQUENCE)
        .ok()?
        .items()?;
    let mut positions = Vec::with_capacity(items.len());
    for item in items {
        let plane = item.element(tags::PLANE_POSITION_SEQUENCE).ok()?.items()?;
        positions.push(geometry::slice_position(plane.first()?)?);
    }
    Some(positions)
}

/// Origin and slice spacing of an enhanced object
///
/// Enhanced files carry their geometry per frame; the top-level
/// SpacingBetweenSlices/SliceThickness tags are only a fallback.
fn enhanced_geometry(
    data: &InMemDicomObject,
    orientation: &Orientation,
    n_frames: usize,
) -> Result<([f64; 3], f64), String> {
    if let Some(positions) = frame_positions(data) {
        if positions.len() == n_frames && n_frames > 1 {
            let normal = orientation.normal();
            let mut projections: Vec<f64> = positions
                .iter()
                .map(|p| geometry::dot(*p, normal))
                .collect();
            // Frame storage order may run against the normal; the origin
            // stays the first stored frame either way
            if projections[0] > projections[n_frames - 1] {
                projections.reverse();
            }
            let spacing = geometry::validate_spacing(&projections)?;
            return Ok((positions[0], spacing));
        }
        if let Some(first) = positions.first() {
            return Ok((*first, spacing_between_slices(data)));
        }
    }
    Ok((
        geometry::slice_position(data).unwrap_or([0.0; 3]),
        spacing_between_slices(data),
    ))
}

fn spacing_between_slices(data: &InMemDicomObject) -> f64 {
    group::get_f64(data, tags::SPACING_BETWEEN_SLICES)
        .or_else(|| group::get_f64(data, tags::SLICE_THICKNESS))
        .unwrap_or(1.0)
}

fn window_level(data: &InMemDicomObject) -> (Option<f64>, Option<f64>) {
    let first = |tag| {
        data.element(tag)
            .ok()
            .and_then(|e| e.to_multi_float64().ok())
            .and_then(|v| v.first().copied())
    };
    (first(tags::WINDOW_CENTER), first(tags::WINDOW_WIDTH))
}

/// Whether any slice carries a non-trivial rescale slope or intercept,
/// which forces decoding into floating point
fn pixel_values_need_scaling(slices: &[SliceHeader]) -> bool {
    slices.iter().any(|s| {
        let slope = group::get_f64(&s.data, tags::RESCALE_SLOPE).unwrap_or(1.0);
        let intercept = group::get_f64(&s.data, tags::RESCALE_INTERCEPT).unwrap_or(0.0);
        (slope - 1.0).abs() > 1e-9 || intercept.abs() > 1e-9
    })
}

/// Picks the element type for the assembled volume from the reference header
fn target_buffer(data: &InMemDicomObject, rescale: bool) -> PixelBuffer {
    let get_u16 = |tag| {
        data.element(tag)
            .ok()
            .and_then(|e| e.to_int::<u16>().ok())
    };

    if get_u16(tags::SAMPLES_PER_PIXEL).unwrap_or(1) > 1 {
        return PixelBuffer::Rgb8(Vec::new());
    }
    if rescale {
        return PixelBuffer::F32(Vec::new());
    }
    let bits = get_u16(tags::BITS_ALLOCATED).unwrap_or(16);
    let signed = get_u16(tags::PIXEL_REPRESENTATION).unwrap_or(0) == 1;
    match (bits, signed) {
        (8, _) => PixelBuffer::U8(Vec::new()),
        (16, true) => PixelBuffer::I16(Vec::new()),
        (16, false) => PixelBuffer::U16(Vec::new()),
        (32, true) => PixelBuffer::I32(Vec::new()),
        _ => PixelBuffer::F32(Vec::new()),
    }
}

fn append_decoded(buffer: &mut PixelBuffer, decoded: &DecodedPixelData<'_>) -> Result<(), String> {
    match buffer {
        PixelBuffer::U8(v) => v.extend(decoded.to_vec::<u8>().map_err(|e| format!("{}", e))?),
        PixelBuffer::I16(v) => v.extend(decoded.to_vec::<i16>().map_err(|e| format!("{}", e))?),
        PixelBuffer::U16(v) => v.extend(decoded.to_vec::<u16>().map_err(|e| format!("{}", e))?),
        PixelBuffer::I32(v) => v.extend(decoded.to_vec::<i32>().map_err(|e| format!("{}", e))?),
        PixelBuffer::F32(v) => v.extend(decoded.to_vec::<f32>().map_err(|e| format!("{}", e))?),
        PixelBuffer::Rgb8(v) => v.extend(decoded.to_vec::<u8>().map_err(|e| format!("{}", e))?),
    }
    Ok(())
}

/// Decodes pixel data for the ordered slice files, delegated to the
/// wrapped DICOM toolkit
fn read_volume(
    files: &[PathBuf],
    template: PixelBuffer,
) -> Result<(PixelBuffer, usize, usize), String> {
    let mut buffer = template;
    let mut dims: Option<(usize, usize)> = None;

    for file in files {
        let obj = dicom_object::open_file(file).map_err(|e| format!("{}", e))?;
        let decoded = obj.decode_pixel_data().map_err(|e| format!("{}", e))?;
        let slice_dims = (decoded.rows() as usize, decoded.columns() as usize);
        match dims {
            None => dims = Some(slice_dims),
            Some(d) if d != slice_dims => {
                return Err("inconsistent slice dimensions within one series".to_string())
            }
            Some(_) => {}
        }
        append_decoded(&mut buffer, &decoded)?;
    }

    let (rows, cols) = dims.ok_or_else(|| "series group holds no slices".to_string())?;
    Ok((buffer, rows, cols))
}
