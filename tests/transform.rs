use approx::assert_relative_eq;
use cuboid_picker::calibration::{compute_transform_matrix, Calibration};
use nalgebra::{Matrix3, Point2, Vector2, Vector3};

/// Fitting a transform from measured correspondences, storing it, loading it
/// back, and converting a detection must land on the original physical
/// point.
#[test]
fn fit_store_load_convert() {
    let truth = Matrix3::new(0.022, 0.0003, 151.2, -0.0002, 0.0218, 79.6, 0.0, 0.0, 1.0);
    let pixels = [
        Point2::new(120.0, 95.0),
        Point2::new(2400.0, 110.0),
        Point2::new(180.0, 1800.0),
        Point2::new(2350.0, 1850.0),
    ];
    let pairs: Vec<_> = pixels
        .iter()
        .map(|px| {
            let v = truth * Vector3::new(px.x, px.y, 1.0);
            (Point2::new(v.x, v.y), *px)
        })
        .collect();
    let fitted = compute_transform_matrix(&pairs).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("calibration.json");
    let calibration = Calibration {
        transform_matrix: fitted,
        calib_origin: Point2::new(200.0, 160.0),
        offset: Vector2::new(0.15, -0.1),
        area_to_physical_ratio: 0.022 * 0.022,
        pixel_to_mm_ratio: 0.022,
    };
    calibration.store(&path).unwrap();
    let loaded = Calibration::load(&path).unwrap();

    // At the calibration origin the conversion is the bare transform plus
    // the offset.
    let detection = Point2::new(1296.0, 972.0);
    let expected = truth * Vector3::new(detection.x, detection.y, 1.0);
    let physical =
        loaded.pixel_to_physical(detection.x, detection.y, loaded.calib_origin);
    assert_relative_eq!(physical.x, expected.x + 0.15, epsilon = 1e-6);
    assert_relative_eq!(physical.y, expected.y - 0.1, epsilon = 1e-6);

    // A shifted reference shifts the result by the same amount.
    let shifted = loaded.pixel_to_physical(
        detection.x,
        detection.y,
        Point2::new(loaded.calib_origin.x + 2.0, loaded.calib_origin.y - 3.0),
    );
    assert_relative_eq!(shifted.x, physical.x + 2.0, epsilon = 1e-6);
    assert_relative_eq!(shifted.y, physical.y - 3.0, epsilon = 1e-6);
}

/// A missing calibration file falls back to the identity calibration
/// instead of failing.
#[test]
fn missing_file_falls_back_to_identity() {
    let calibration = Calibration::load_or_default("/nonexistent/calibration.json");
    assert_relative_eq!(calibration.transform_matrix, Matrix3::identity());
    assert_relative_eq!(calibration.pixel_to_mm_ratio, 1.0);
}
