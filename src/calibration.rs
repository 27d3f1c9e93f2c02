//! Camera-to-robot calibration data and the pixel-to-physical transform.
//!
//! The affine transform is derived once per calibration session by a
//! least-squares fit over paired (physical, pixel) points and must be
//! re-anchored at run time to the robot's current reference position plus an
//! empirically measured offset, because the absolute origin drifts between
//! sessions. The `offset` is only valid relative to the `calib_origin`
//! captured in the same session; that pairing is a documented precondition,
//! not a runtime check.

use crate::consts::MIN_CORRESPONDENCES;
use eyre::{Result, WrapErr};
use nalgebra::{DMatrix, DVector, Matrix3, Point2, Vector2, Vector3};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

/// Error raised by malformed or missing calibration data. Treated as fatal
/// by the picking plan.
#[derive(Debug, thiserror::Error)]
pub enum CalibrationError {
    /// The calibration file could not be read.
    #[error("failed to read calibration file {path}: {source}")]
    Io {
        /// Path of the offending file.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The calibration file could not be parsed.
    #[error("malformed calibration file {path}: {source}")]
    Malformed {
        /// Path of the offending file.
        path: String,
        /// Underlying parse error.
        source: serde_json::Error,
    },
    /// Not enough point correspondences for the least-squares fit.
    #[error("transform fit needs at least {MIN_CORRESPONDENCES} correspondences, got {0}")]
    TooFewCorrespondences(usize),
    /// The least-squares system could not be solved.
    #[error("transform fit is degenerate: {0}")]
    Degenerate(String),
}

/// On-disk calibration record. `transform_matrix` is row-major.
#[derive(Debug, Serialize, Deserialize)]
struct Record {
    transform_matrix: [f64; 9],
    calib_origin: [f64; 2],
    offset: [f64; 2],
    area_to_physical_ratio: f64,
    pixel_to_mm_ratio: f64,
}

/// Calibration data pairing the pixel-to-physical affine transform with the
/// session it was derived in.
#[derive(Clone, Debug)]
pub struct Calibration {
    /// Affine transform: `physical = matrix · [px, py, 1]ᵗ`.
    pub transform_matrix: Matrix3<f64>,
    /// Physical point the robot was at when the transform was derived.
    pub calib_origin: Point2<f64>,
    /// Physical correction vector measured by the fine-calibration routine.
    pub offset: Vector2<f64>,
    /// Object area conversion, mm² per px².
    pub area_to_physical_ratio: f64,
    /// Linear distance conversion, mm per px.
    pub pixel_to_mm_ratio: f64,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            transform_matrix: Matrix3::identity(),
            calib_origin: Point2::origin(),
            offset: Vector2::zeros(),
            area_to_physical_ratio: 1.0,
            pixel_to_mm_ratio: 1.0,
        }
    }
}

impl Calibration {
    /// Converts a pixel position to physical coordinates, anchored to the
    /// robot's reference position.
    #[must_use]
    pub fn pixel_to_physical(
        &self,
        cx: f64,
        cy: f64,
        reference: Point2<f64>,
    ) -> Point2<f64> {
        let projected = self.transform_matrix * Vector3::new(cx, cy, 1.0);
        let diff = reference - self.calib_origin;
        Point2::new(
            projected.x + diff.x + self.offset.x,
            projected.y + diff.y + self.offset.y,
        )
    }

    /// Replaces the physical correction vector. Called when an external
    /// fine-calibration routine re-measures it.
    pub fn set_offset(&mut self, offset: Vector2<f64>) {
        self.offset = offset;
    }

    /// Loads calibration data from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        log::info!("Loading calibration from {}", path.display());
        let contents = fs::read_to_string(path).map_err(|source| CalibrationError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let record: Record =
            serde_json::from_str(&contents).map_err(|source| CalibrationError::Malformed {
                path: path.display().to_string(),
                source,
            })?;
        Ok(record.into())
    }

    /// Tries to load calibration data, or constructs the identity calibration
    /// on failure.
    #[must_use]
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(path)
            .map_err(|err| log::error!("Calibration loading error: {err:#?}"))
            .unwrap_or_default()
    }

    /// Stores the calibration data to a JSON file.
    pub fn store(&self, path: impl AsRef<Path>) -> Result<()> {
        let record = Record::from(self);
        let json = serde_json::to_string_pretty(&record)?;
        log::info!("Storing calibration data to {}", path.as_ref().display());
        fs::write(path.as_ref(), json).wrap_err_with(|| {
            format!("failed to write calibration to {}", path.as_ref().display())
        })?;
        Ok(())
    }
}

impl From<Record> for Calibration {
    fn from(record: Record) -> Self {
        Self {
            transform_matrix: Matrix3::from_row_slice(&record.transform_matrix),
            calib_origin: Point2::new(record.calib_origin[0], record.calib_origin[1]),
            offset: Vector2::new(record.offset[0], record.offset[1]),
            area_to_physical_ratio: record.area_to_physical_ratio,
            pixel_to_mm_ratio: record.pixel_to_mm_ratio,
        }
    }
}

impl From<&Calibration> for Record {
    fn from(calibration: &Calibration) -> Self {
        let m = &calibration.transform_matrix;
        Self {
            transform_matrix: [
                m[(0, 0)],
                m[(0, 1)],
                m[(0, 2)],
                m[(1, 0)],
                m[(1, 1)],
                m[(1, 2)],
                m[(2, 0)],
                m[(2, 1)],
                m[(2, 2)],
            ],
            calib_origin: [calibration.calib_origin.x, calibration.calib_origin.y],
            offset: [calibration.offset.x, calibration.offset.y],
            area_to_physical_ratio: calibration.area_to_physical_ratio,
            pixel_to_mm_ratio: calibration.pixel_to_mm_ratio,
        }
    }
}

/// Fits the affine pixel-to-physical transform over point correspondences by
/// linear least squares.
///
/// Builds a `2n×6` system from `n` (physical, pixel) pairs, solves it with
/// SVD, and reshapes the solution into a 3×3 matrix with bottom row
/// `[0, 0, 1]`. At least 3 non-collinear correspondences are required;
/// 4 or more are typical.
pub fn compute_transform_matrix(
    correspondences: &[(Point2<f64>, Point2<f64>)],
) -> Result<Matrix3<f64>, CalibrationError> {
    if correspondences.len() < MIN_CORRESPONDENCES {
        return Err(CalibrationError::TooFewCorrespondences(correspondences.len()));
    }
    let n = correspondences.len();
    let mut a = DMatrix::zeros(2 * n, 6);
    let mut b = DVector::zeros(2 * n);
    for (i, (physical, pixel)) in correspondences.iter().enumerate() {
        a[(2 * i, 0)] = pixel.x;
        a[(2 * i, 1)] = pixel.y;
        a[(2 * i, 2)] = 1.0;
        a[(2 * i + 1, 3)] = pixel.x;
        a[(2 * i + 1, 4)] = pixel.y;
        a[(2 * i + 1, 5)] = 1.0;
        b[2 * i] = physical.x;
        b[2 * i + 1] = physical.y;
    }
    let svd = a.svd(true, true);
    let x = svd
        .solve(&b, f64::EPSILON)
        .map_err(|err| CalibrationError::Degenerate(err.to_string()))?;
    let mut matrix = Matrix3::zeros();
    matrix[(0, 0)] = x[0];
    matrix[(0, 1)] = x[1];
    matrix[(0, 2)] = x[2];
    matrix[(1, 0)] = x[3];
    matrix[(1, 1)] = x[4];
    matrix[(1, 2)] = x[5];
    matrix[(2, 2)] = 1.0;
    Ok(matrix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn transform_anchors_to_reference_and_offset() {
        let mut calibration = Calibration {
            transform_matrix: Matrix3::new(0.5, 0.0, 10.0, 0.0, 0.5, 20.0, 0.0, 0.0, 1.0),
            calib_origin: Point2::new(100.0, 200.0),
            ..Default::default()
        };
        calibration.set_offset(Vector2::new(0.3, -0.7));
        let physical = calibration.pixel_to_physical(40.0, 60.0, Point2::new(101.0, 199.0));
        // 0.5*40 + 10 + (101-100) + 0.3
        assert_relative_eq!(physical.x, 31.3, epsilon = 1e-12);
        // 0.5*60 + 20 + (199-200) - 0.7
        assert_relative_eq!(physical.y, 48.3, epsilon = 1e-12);
    }

    #[test]
    fn fit_rejects_too_few_points() {
        let pairs = vec![
            (Point2::new(0.0, 0.0), Point2::new(0.0, 0.0)),
            (Point2::new(1.0, 0.0), Point2::new(100.0, 0.0)),
        ];
        assert!(matches!(
            compute_transform_matrix(&pairs),
            Err(CalibrationError::TooFewCorrespondences(2))
        ));
    }

    #[test]
    fn fit_recovers_known_affine_transform() {
        let truth = Matrix3::new(0.02, 0.001, 150.0, -0.002, 0.021, 80.0, 0.0, 0.0, 1.0);
        let pixels = [
            Point2::new(10.0, 20.0),
            Point2::new(900.0, 40.0),
            Point2::new(60.0, 800.0),
            Point2::new(1000.0, 1000.0),
            Point2::new(420.0, 330.0),
        ];
        let pairs: Vec<_> = pixels
            .iter()
            .map(|px| {
                let v = truth * Vector3::new(px.x, px.y, 1.0);
                (Point2::new(v.x, v.y), *px)
            })
            .collect();
        let fitted = compute_transform_matrix(&pairs).unwrap();
        assert_relative_eq!(fitted, truth, epsilon = 1e-9);
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibration.json");
        let calibration = Calibration {
            transform_matrix: Matrix3::new(0.02, 0.0, 150.0, 0.0, 0.02, 80.0, 0.0, 0.0, 1.0),
            calib_origin: Point2::new(200.0, 160.0),
            offset: Vector2::new(0.1, 0.2),
            area_to_physical_ratio: 4.8e-4,
            pixel_to_mm_ratio: 0.022,
        };
        calibration.store(&path).unwrap();
        let loaded = Calibration::load(&path).unwrap();
        assert_relative_eq!(loaded.transform_matrix, calibration.transform_matrix);
        assert_relative_eq!(loaded.calib_origin, calibration.calib_origin);
        assert_relative_eq!(loaded.offset, calibration.offset);
        assert_relative_eq!(loaded.pixel_to_mm_ratio, calibration.pixel_to_mm_ratio);
    }

    #[test]
    fn malformed_file_is_a_calibration_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, r#"{"transform_matrix": "nope"}"#).unwrap();
        let err = Calibration::load(&path).unwrap_err();
        assert!(err.downcast_ref::<CalibrationError>().is_some());
    }
}
