//! DICOM header reading and series grouping
//!
//! Slice files are grouped by (Series Instance UID, Stack ID, Frame of
//! Reference UID). Stack ID splits multi-stack acquisitions that a series
//! UID alone would wrongly merge; the frame of reference keeps slices from
//! unrelated coordinate systems apart.

use crate::models::FileErrors;
use dicom_dictionary_std::tags;
use dicom_object::{InMemDicomObject, OpenFileOptions};
use log::debug;
use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

pub(crate) fn format_error(message: &str) -> String {
    format!("DICOM image builder: {}", message)
}

/// One slice file with its parsed header (pixel data not read)
pub(crate) struct SliceHeader {
    pub file: PathBuf,
    pub data: InMemDicomObject,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct GroupKey {
    pub series_instance_uid: String,
    pub stack_id: Option<String>,
    pub frame_of_reference_uid: Option<String>,
}

/// A set of slices believed to form one acquisition
///
/// Never escapes the DICOM builder: a group is either promoted to a
/// produced image or dissolved with errors attached to its members.
pub(crate) struct SliceGroup {
    pub key: GroupKey,
    /// Series UID plus a per-series index, so multiple stacks within one
    /// series get distinct names
    pub name: String,
    pub slices: Vec<SliceHeader>,
}

pub(crate) fn get_string(data: &InMemDicomObject, tag: dicom_core::Tag) -> Option<String> {
    data.element(tag)
        .ok()
        .and_then(|e| e.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub(crate) fn get_f64(data: &InMemDicomObject, tag: dicom_core::Tag) -> Option<f64> {
    data.element(tag).ok().and_then(|e| e.to_float64().ok())
}

/// Number of frames encoded in one object, at least 1
pub(crate) fn number_of_frames(data: &InMemDicomObject) -> u32 {
    data.element(tags::NUMBER_OF_FRAMES)
        .ok()
        .and_then(|e| e.to_int::<i32>().ok())
        .map(|n| n.max(1) as u32)
        .unwrap_or(1)
}

/// Whether this object is an enhanced multi-frame DICOM file, i.e. a single
/// file already representing a full volume
pub(crate) fn is_enhanced(data: &InMemDicomObject) -> bool {
    number_of_frames(data) > 1
        || data
            .element(tags::PER_FRAME_FUNCTIONAL_GROUPS_SEQUENCE)
            .is_ok()
}

/// Temporal position of a slice within a 4-D acquisition
pub(crate) fn temporal_index(data: &InMemDicomObject) -> Option<i32> {
    data.element(tags::TEMPORAL_POSITION_INDEX)
        .ok()
        .and_then(|e| e.to_int::<i32>().ok())
}

/// Checks the 128-byte preamble plus "DICM" magic
///
/// Files without the magic are not DICOM and are simply left for other
/// builders; no error is recorded for them.
pub(crate) fn is_dicom_file(path: &Path) -> bool {
    let mut preamble = [0u8; 132];
    match fs::File::open(path).and_then(|mut f| f.read_exact(&mut preamble)) {
        Ok(()) => &preamble[128..] == b"DICM",
        Err(_) => false,
    }
}

/// Reads headers for all DICOM files in the candidate set
///
/// Pixel data is skipped at this stage; it is only decoded for groups that
/// survive validation. Read failures of recognized DICOM files are recorded
/// per file so one corrupt slice does not poison its directory.
pub(crate) fn read_slice_headers<'a>(
    files: impl Iterator<Item = &'a PathBuf>,
    errors: &mut FileErrors,
) -> Vec<SliceHeader> {
    let mut headers = Vec::new();
    for file in files {
        if !is_dicom_file(file) {
            continue;
        }
        match OpenFileOptions::new()
            .read_until(tags::PIXEL_DATA)
            .open_file(file)
        {
            Ok(obj) => headers.push(SliceHeader {
                file: file.clone(),
                data: (*obj).clone(),
            }),
            Err(e) => errors
                .entry(file.clone())
                .or_default()
                .push(format_error(&format!("{}", e))),
        }
    }
    headers
}

/// Groups slice headers into candidate acquisitions
///
/// Slices without a Series Instance UID cannot be assigned to any volume
/// and receive a per-file error.
pub(crate) fn group_slices(headers: Vec<SliceHeader>, errors: &mut FileErrors) -> Vec<SliceGroup> {
    let mut grouped: BTreeMap<GroupKey, Vec<SliceHeader>> = BTreeMap::new();

    for header in headers {
        let series_instance_uid = match get_string(&header.data, tags::SERIES_INSTANCE_UID) {
            Some(uid) => uid,
            None => {
                errors
                    .entry(header.file.clone())
                    .or_default()
                    .push(format_error("missing SeriesInstanceUID tag"));
                continue;
            }
        };
        let key = GroupKey {
            series_instance_uid,
            stack_id: get_string(&header.data, tags::STACK_ID),
            frame_of_reference_uid: get_string(&header.data, tags::FRAME_OF_REFERENCE_UID),
        };
        grouped.entry(key).or_default().push(header);
    }

    let mut series_counters: BTreeMap<String, usize> = BTreeMap::new();
    let groups: Vec<SliceGroup> = grouped
        .into_iter()
        .map(|(key, slices)| {
            let index = series_counters
                .entry(key.series_instance_uid.clone())
                .or_insert(0);
            let name = format!("{}-{}", key.series_instance_uid, index);
            *index += 1;
            SliceGroup { key, name, slices }
        })
        .collect();

    debug!("grouped DICOM slices into {} series group(s)", groups.len());
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use dicom_core::{DataElement, PrimitiveValue, VR};

    fn slice(file: &str, series: &str, stack: Option<&str>) -> SliceHeader {
        let mut data = InMemDicomObject::new_empty();
        data.put(DataElement::new(
            tags::SERIES_INSTANCE_UID,
            VR::UI,
            PrimitiveValue::from(series),
        ));
        if let Some(stack) = stack {
            data.put(DataElement::new(
                tags::STACK_ID,
                VR::SH,
                PrimitiveValue::from(stack),
            ));
        }
        SliceHeader {
            file: PathBuf::from(file),
            data,
        }
    }

    #[test]
    fn test_grouping_by_series_uid() {
        let headers = vec![
            slice("a.dcm", "1.2.3", None),
            slice("b.dcm", "1.2.3", None),
            slice("c.dcm", "4.5.6", None),
        ];
        let mut errors = FileErrors::new();
        let groups = group_slices(headers, &mut errors);

        assert!(errors.is_empty());
        assert_eq!(groups.len(), 2);
        let sizes: Vec<usize> = groups.iter().map(|g| g.slices.len()).collect();
        assert!(sizes.contains(&2) && sizes.contains(&1));
    }

    #[test]
    fn test_stack_id_splits_series() {
        let headers = vec![
            slice("a.dcm", "1.2.3", Some("1")),
            slice("b.dcm", "1.2.3", Some("2")),
        ];
        let mut errors = FileErrors::new();
        let groups = group_slices(headers, &mut errors);

        assert_eq!(groups.len(), 2);
        // Stacks within one series get distinct names
        let names: Vec<&str> = groups.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["1.2.3-0", "1.2.3-1"]);
    }

    #[test]
    fn test_missing_series_uid_is_an_error() {
        let headers = vec![SliceHeader {
            file: PathBuf::from("broken.dcm"),
            data: InMemDicomObject::new_empty(),
        }];
        let mut errors = FileErrors::new();
        let groups = group_slices(headers, &mut errors);

        assert!(groups.is_empty());
        let messages = errors.get(Path::new("broken.dcm")).unwrap();
        assert!(messages[0].contains("SeriesInstanceUID"));
    }

    #[test]
    fn test_enhanced_detection() {
        let mut data = InMemDicomObject::new_empty();
        assert!(!is_enhanced(&data));
        data.put(DataElement::new(
            tags::NUMBER_OF_FRAMES,
            VR::IS,
            PrimitiveValue::from("16"),
        ));
        assert!(is_enhanced(&data));
        assert_eq!(number_of_frames(&data), 16);
    }
}
