//! Machine-vision pipeline turning an overview frame into pickable object
//! candidates.
//!
//! The pipeline is pure: it takes a frame plus the active configuration and
//! calibration and produces an [`Analysis`] without touching any hardware.
//! Stages mirror a classic dark-object segmentation: grayscale, blur,
//! inverted adaptive threshold, morphological opening, dish mask, contour
//! extraction, then per-object classification.

pub mod contours;
pub mod ops;

use crate::{calibration::Calibration, config::PickingConfig, consts};
use image::RgbImage;
use std::f64::consts::PI;

/// One detected object with its classification.
#[derive(Clone, Debug)]
pub struct CandidateObject {
    /// Outer boundary in pixels, clockwise.
    pub boundary: Vec<(u32, u32)>,
    /// Contour polygon area in square pixels.
    pub area_px: f64,
    /// Contour centroid in pixels.
    pub center_px: (f64, f64),
    /// Bounding-box width over height.
    pub aspect_ratio: f64,
    /// Shape compactness, 1 for an ideal circle.
    pub circularity: f64,
    /// Equivalent circular diameter in microns.
    pub diameter_microns: f64,
    /// Distance to the nearest other candidate, in millimeters. Infinite
    /// when this is the only candidate in the frame.
    pub nn_distance_mm: f64,
    /// Pixel distance from the dish center.
    pub distance_to_center_px: f64,
    /// Whether the object is hollow at its centroid, which marks bubbles
    /// and other imaging artifacts rather than tissue.
    pub is_artifact: bool,
    /// Whether the diameter falls inside the configured size window.
    pub in_size_range: bool,
    /// Whether every pick criterion holds for this object.
    pub pickable: bool,
    /// Pickable and far enough from all neighbors to pick without
    /// disturbing them.
    pub isolated: bool,
}

/// Result of analyzing one frame.
#[derive(Clone, Debug, Default)]
pub struct Analysis {
    /// Every candidate that survived the contour area filter.
    pub candidates: Vec<CandidateObject>,
}

impl Analysis {
    /// Candidates passing every pick criterion.
    pub fn pickable(&self) -> impl Iterator<Item = &CandidateObject> {
        self.candidates.iter().filter(|c| c.pickable)
    }

    /// Pickable candidates with no close neighbor.
    pub fn isolated(&self) -> impl Iterator<Item = &CandidateObject> {
        self.candidates.iter().filter(|c| c.isolated)
    }

    /// Number of candidates inside the size window, pickable or not.
    #[must_use]
    pub fn in_size_range_count(&self) -> usize {
        self.candidates.iter().filter(|c| c.in_size_range).count()
    }

    /// Number of pickable candidates.
    #[must_use]
    pub fn pickable_count(&self) -> usize {
        self.pickable().count()
    }

    /// Number of isolated candidates.
    #[must_use]
    pub fn isolated_count(&self) -> usize {
        self.isolated().count()
    }
}

/// Runs the detection pipeline over one overview frame.
#[must_use]
pub fn analyze(
    frame: &RgbImage,
    config: &PickingConfig,
    calibration: &Calibration,
) -> Analysis {
    let gray = ops::grayscale(frame);
    let blurred = ops::blur(&gray, consts::BLUR_SIGMA);
    let binary = ops::adaptive_threshold_inv(
        &blurred,
        consts::THRESHOLD_BLOCK,
        consts::THRESHOLD_C,
    );
    // The artifact mask comes from the unblurred frame so thin bubble walls
    // stay separated from their hollow interior.
    let artifact_mask =
        ops::adaptive_threshold_inv(&gray, consts::ARTIFACT_BLOCK, consts::ARTIFACT_C);
    let opened = ops::open3x3(&binary);
    // Mask slightly beyond the pickable radius so objects just outside it
    // still count as neighbors for the isolation check.
    let margin_px = if calibration.pixel_to_mm_ratio > 0.0 {
        config.minimum_distance / calibration.pixel_to_mm_ratio
    } else {
        0.0
    };
    let masked = ops::mask_circle(
        &opened,
        config.circle_center,
        config.circle_radius + margin_px,
    );

    let (area_min, area_max) = config.contour_filter_window;
    let kept: Vec<_> = contours::find_contours(&masked)
        .into_iter()
        .filter(|c| c.area > area_min && c.area < area_max)
        .collect();

    let centers: Vec<(f64, f64)> = kept.iter().map(|c| c.centroid).collect();
    let (size_min, size_max) = config.cuboid_size_threshold;
    let (aspect_min, aspect_max) = config.aspect_ratio_window;
    let (circ_min, circ_max) = config.circularity_window;
    let (dish_cx, dish_cy) = config.circle_center;

    let candidates = kept
        .into_iter()
        .enumerate()
        .map(|(i, contour)| {
            let (cx, cy) = contour.centroid;
            let nn_distance_px = centers
                .iter()
                .enumerate()
                .filter(|&(j, _)| j != i)
                .map(|(_, &(ox, oy))| ((ox - cx).powi(2) + (oy - cy).powi(2)).sqrt())
                .fold(f64::INFINITY, f64::min);
            let nn_distance_mm = nn_distance_px * calibration.pixel_to_mm_ratio;
            let diameter_microns = 2.0
                * (contour.area * calibration.area_to_physical_ratio
                    * consts::MICRON2_PER_MM2
                    / PI)
                    .sqrt();
            let distance_to_center_px =
                ((cx - dish_cx).powi(2) + (cy - dish_cy).powi(2)).sqrt();
            let is_artifact = artifact_mask
                .get_pixel(cx.round() as u32, cy.round() as u32)
                .0[0]
                == 0;
            let in_size_range = diameter_microns > size_min && diameter_microns < size_max;
            let aspect_ratio = contour.aspect_ratio();
            let circularity = contour.circularity();
            let pickable = in_size_range
                && aspect_ratio > aspect_min
                && aspect_ratio < aspect_max
                && circularity > circ_min
                && circularity < circ_max
                && !is_artifact
                && distance_to_center_px <= config.circle_radius;
            let isolated = pickable && nn_distance_mm > config.minimum_distance;
            CandidateObject {
                boundary: contour.boundary,
                area_px: contour.area,
                center_px: contour.centroid,
                aspect_ratio,
                circularity,
                diameter_microns,
                nn_distance_mm,
                distance_to_center_px,
                is_artifact,
                in_size_range,
                pickable,
                isolated,
            }
        })
        .collect();
    Analysis { candidates }
}
