//! Spatial geometry for DICOM slice assembly
//!
//! Slices carry no filesystem ordering, so volumes are ordered by the scalar
//! projection of each slice position onto the volume normal (the cross
//! product of the row/column orientation cosines). Oblique acquisitions
//! still produce uniform spacing along that normal, so the spacing check
//! works on projections rather than any fixed axis.

use dicom_dictionary_std::tags;
use dicom_object::InMemDicomObject;

pub(crate) type Vec3 = [f64; 3];

/// Relative tolerance on inter-slice spacing deviation from the mean
const SPACING_TOLERANCE: f64 = 0.01;
/// Absolute tolerance floor in mm, so near-zero means keep a real bound
const SPACING_TOLERANCE_FLOOR: f64 = 1e-3;
/// Below this, two slice positions are considered duplicates
const MIN_SPACING: f64 = 1e-6;

pub(crate) fn cross(a: Vec3, b: Vec3) -> Vec3 {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

pub(crate) fn dot(a: Vec3, b: Vec3) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

/// In-plane orientation cosines of a slice
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Orientation {
    pub row: Vec3,
    pub col: Vec3,
}

impl Default for Orientation {
    /// Axial identity, used when ImageOrientationPatient is absent
    /// (plain X-ray images for example)
    fn default() -> Self {
        Self {
            row: [1.0, 0.0, 0.0],
            col: [0.0, 1.0, 0.0],
        }
    }
}

impl Orientation {
    /// Reads ImageOrientationPatient (six cosines) from a slice header
    pub fn from_header(data: &InMemDicomObject) -> Option<Self> {
        let values = data
            .element(tags::IMAGE_ORIENTATION_PATIENT)
            .ok()?
            .to_multi_float64()
            .ok()?;
        if values.len() != 6 {
            return None;
        }
        Some(Self {
            row: [values[0], values[1], values[2]],
            col: [values[3], values[4], values[5]],
        })
    }

    /// Volume normal
    pub fn normal(&self) -> Vec3 {
        cross(self.row, self.col)
    }

    /// Direction cosine matrix with the row, column and normal cosines as
    /// its columns
    pub fn direction(&self) -> [[f64; 3]; 3] {
        let normal = self.normal();
        let mut direction = [[0.0; 3]; 3];
        for i in 0..3 {
            direction[i][0] = self.row[i];
            direction[i][1] = self.col[i];
            direction[i][2] = normal[i];
        }
        direction
    }
}

/// Reads ImagePositionPatient from a slice header
pub(crate) fn slice_position(data: &InMemDicomObject) -> Option<Vec3> {
    let values = data
        .element(tags::IMAGE_POSITION_PATIENT)
        .ok()?
        .to_multi_float64()
        .ok()?;
    if values.len() != 3 {
        return None;
    }
    Some([values[0], values[1], values[2]])
}

/// In-plane pixel spacing (row spacing, column spacing), defaulting to 1 mm
pub(crate) fn pixel_spacing(data: &InMemDicomObject) -> (f64, f64) {
    data.element(tags::PIXEL_SPACING)
        .ok()
        .and_then(|e| e.to_multi_float64().ok())
        .filter(|v| v.len() >= 2)
        .map(|v| (v[0], v[1]))
        .unwrap_or((1.0, 1.0))
}

/// Validates that consecutive sorted slice positions are uniformly spaced
///
/// `positions` are scalar projections along the volume normal, sorted
/// ascending, with at least two entries. Returns the mean spacing.
///
/// # Errors
///
/// Returns a description of the first duplicate position or the first
/// spacing deviating from the mean by more than the tolerance.
pub(crate) fn validate_spacing(positions: &[f64]) -> Result<f64, String> {
    debug_assert!(positions.len() >= 2);

    let spacings: Vec<f64> = positions.windows(2).map(|w| w[1] - w[0]).collect();
    if let Some(bad) = spacings.iter().find(|s| **s < MIN_SPACING) {
        return Err(format!(
            "duplicate or non-increasing slice positions (spacing {:.6} mm)",
            bad
        ));
    }

    let mean = spacings.iter().sum::<f64>() / spacings.len() as f64;
    let tolerance = (mean * SPACING_TOLERANCE).max(SPACING_TOLERANCE_FLOOR);
    if let Some(bad) = spacings.iter().find(|s| (**s - mean).abs() > tolerance) {
        return Err(format!(
            "inconsistent slice spacing: {:.4} mm differs from the mean of {:.4} mm",
            bad, mean
        ));
    }

    Ok(mean)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_axial_normal() {
        let orientation = Orientation::default();
        assert_eq!(orientation.normal(), [0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_direction_columns() {
        let orientation = Orientation {
            row: [0.0, 1.0, 0.0],
            col: [0.0, 0.0, 1.0],
        };
        let direction = orientation.direction();
        // Columns are the row, column and normal cosines
        assert_eq!(direction[1][0], 1.0);
        assert_eq!(direction[2][1], 1.0);
        assert_eq!(direction[0][2], 1.0);
    }

    #[test]
    fn test_uniform_spacing_passes() {
        let positions = [0.0, 2.5, 5.0, 7.5];
        assert_eq!(validate_spacing(&positions).unwrap(), 2.5);
    }

    #[test]
    fn test_spacing_within_tolerance_passes() {
        // 0.5% jitter around 2.0 mm stays inside the 1% band
        let positions = [0.0, 2.0, 4.008, 6.004];
        assert!(validate_spacing(&positions).is_ok());
    }

    #[test]
    fn test_outlier_spacing_rejected() {
        let positions = [0.0, 2.0, 4.0, 7.0];
        let err = validate_spacing(&positions).unwrap_err();
        assert!(err.contains("inconsistent slice spacing"));
    }

    #[test]
    fn test_duplicate_positions_rejected() {
        let positions = [0.0, 2.0, 2.0, 4.0];
        let err = validate_spacing(&positions).unwrap_err();
        assert!(err.contains("duplicate"));
    }

    #[test]
    fn test_oblique_projections_uniform() {
        // Slices offset along a tilted normal still project uniformly
        let orientation = Orientation {
            row: [1.0, 0.0, 0.0],
            col: [0.0, 0.8, 0.6],
        };
        let normal = orientation.normal();
        assert_eq!(normal, [0.0, -0.6, 0.8]);

        let base = [12.0, -5.0, 30.0];
        let positions: Vec<f64> = (0..5)
            .map(|i| {
                let offset = i as f64 * 1.5;
                let position = [
                    base[0] + normal[0] * offset,
                    base[1] + normal[1] * offset,
                    base[2] + normal[2] * offset,
                ];
                dot(position, normal)
            })
            .collect();
        let spacing = validate_spacing(&positions).unwrap();
        assert!((spacing - 1.5).abs() < 1e-9);
    }
}
