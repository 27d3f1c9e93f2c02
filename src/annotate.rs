//! Detection overlays drawn onto published frames.
//!
//! Color scheme: every filtered object is outlined red, pickable objects
//! yellow, isolated objects green, artifacts magenta. Chosen targets get a
//! black bounding box and the pickup-verification pass draws a blue circle
//! of the failure radius around each previous target.

use crate::{calibration::Calibration, config::PickingConfig, vision::{Analysis, CandidateObject}};
use image::{Rgb, RgbImage};

const RED: Rgb<u8> = Rgb([255, 0, 0]);
const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
const YELLOW: Rgb<u8> = Rgb([255, 255, 0]);
const MAGENTA: Rgb<u8> = Rgb([255, 0, 255]);
const BLACK: Rgb<u8> = Rgb([0, 0, 0]);
const BLUE: Rgb<u8> = Rgb([0, 0, 255]);

fn put(frame: &mut RgbImage, x: i64, y: i64, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && x < i64::from(frame.width()) && y < i64::from(frame.height()) {
        frame.put_pixel(x as u32, y as u32, color);
    }
}

/// Midpoint circle outline.
fn draw_circle(frame: &mut RgbImage, center: (i64, i64), radius: i64, color: Rgb<u8>) {
    let (cx, cy) = center;
    let mut x = radius;
    let mut y = 0;
    let mut err = 1 - radius;
    while x >= y {
        for (dx, dy) in [
            (x, y),
            (y, x),
            (-y, x),
            (-x, y),
            (-x, -y),
            (-y, -x),
            (y, -x),
            (x, -y),
        ] {
            put(frame, cx + dx, cy + dy, color);
        }
        y += 1;
        if err < 0 {
            err += 2 * y + 1;
        } else {
            x -= 1;
            err += 2 * (y - x) + 1;
        }
    }
}

fn draw_boundary(frame: &mut RgbImage, boundary: &[(u32, u32)], color: Rgb<u8>) {
    for &(x, y) in boundary {
        put(frame, i64::from(x), i64::from(y), color);
    }
}

fn draw_rect(frame: &mut RgbImage, x0: i64, y0: i64, w: i64, h: i64, color: Rgb<u8>) {
    for x in x0..x0 + w {
        put(frame, x, y0, color);
        put(frame, x, y0 + h - 1, color);
    }
    for y in y0..y0 + h {
        put(frame, x0, y, color);
        put(frame, x0 + w - 1, y, color);
    }
}

fn classification_color(candidate: &CandidateObject) -> Rgb<u8> {
    if candidate.is_artifact {
        MAGENTA
    } else if candidate.isolated {
        GREEN
    } else if candidate.pickable {
        YELLOW
    } else {
        RED
    }
}

/// Draws the dish boundaries and per-object classification outlines.
///
/// `chosen` objects additionally get a bounding box; `verify_centers` are
/// previous pick sites to circle with the failure radius.
pub fn draw_overlays(
    frame: &mut RgbImage,
    analysis: &Analysis,
    chosen: &[CandidateObject],
    verify_centers: &[(f64, f64)],
    config: &PickingConfig,
    calibration: &Calibration,
) {
    let center = (
        config.circle_center.0.round() as i64,
        config.circle_center.1.round() as i64,
    );
    let margin_px = if calibration.pixel_to_mm_ratio > 0.0 {
        (config.minimum_distance / calibration.pixel_to_mm_ratio).round() as i64
    } else {
        0
    };
    let radius = config.circle_radius.round() as i64;
    draw_circle(frame, center, radius + margin_px, RED);
    draw_circle(frame, center, radius, GREEN);

    for candidate in &analysis.candidates {
        draw_boundary(frame, &candidate.boundary, classification_color(candidate));
    }

    for candidate in chosen {
        let (min_x, min_y, max_x, max_y) = candidate.boundary.iter().fold(
            (u32::MAX, u32::MAX, 0u32, 0u32),
            |(ax, ay, bx, by), &(x, y)| (ax.min(x), ay.min(y), bx.max(x), by.max(y)),
        );
        if min_x <= max_x {
            draw_rect(
                frame,
                i64::from(min_x) - 2,
                i64::from(min_y) - 2,
                i64::from(max_x - min_x) + 5,
                i64::from(max_y - min_y) + 5,
                BLACK,
            );
        }
    }

    if calibration.pixel_to_mm_ratio > 0.0 {
        let failure_radius =
            (config.failure_threshold / calibration.pixel_to_mm_ratio).round() as i64;
        for &(x, y) in verify_centers {
            draw_circle(frame, (x.round() as i64, y.round() as i64), failure_radius, BLUE);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dish_circles_are_drawn() {
        let config = PickingConfig {
            circle_center: (50.0, 50.0),
            circle_radius: 30.0,
            ..PickingConfig::default()
        };
        let calibration = Calibration {
            pixel_to_mm_ratio: 0.1,
            ..Calibration::default()
        };
        let mut frame = RgbImage::from_pixel(100, 100, Rgb([128, 128, 128]));
        draw_overlays(&mut frame, &Analysis::default(), &[], &[], &config, &calibration);
        assert_eq!(*frame.get_pixel(80, 50), GREEN);
        // 30 px radius plus the 17 px isolation margin.
        assert_eq!(*frame.get_pixel(97, 50), RED);
    }

    #[test]
    fn verify_centers_get_failure_circles() {
        let config = PickingConfig {
            circle_center: (50.0, 50.0),
            circle_radius: 10.0,
            failure_threshold: 0.5,
            ..PickingConfig::default()
        };
        let calibration = Calibration {
            pixel_to_mm_ratio: 0.1,
            ..Calibration::default()
        };
        let mut frame = RgbImage::from_pixel(100, 100, Rgb([128, 128, 128]));
        draw_overlays(
            &mut frame,
            &Analysis::default(),
            &[],
            &[(50.0, 50.0)],
            &config,
            &calibration,
        );
        // failure_threshold 0.5 mm at 0.1 mm/px is a 5 px radius.
        assert_eq!(*frame.get_pixel(55, 50), BLUE);
    }
}
