//! Low-level raster operations backing the detection pipeline.
//!
//! Everything here works on 8-bit single-channel buffers where foreground is
//! 255 and background is 0.

use image::{GrayImage, RgbImage};

/// Converts a color frame to 8-bit grayscale.
#[must_use]
pub fn grayscale(frame: &RgbImage) -> GrayImage {
    image::imageops::grayscale(frame)
}

/// Gaussian blur with the given sigma.
#[must_use]
pub fn blur(gray: &GrayImage, sigma: f32) -> GrayImage {
    image::imageops::blur(gray, sigma)
}

/// Summed-area table over `gray`, one row and column of zero padding at the
/// top-left so `sums[(y + 1) * (w + 1) + x + 1]` covers pixels `..=(x, y)`.
fn integral(gray: &GrayImage) -> Vec<u64> {
    let (w, h) = (gray.width() as usize, gray.height() as usize);
    let mut sums = vec![0u64; (w + 1) * (h + 1)];
    for y in 0..h {
        let mut row_sum = 0u64;
        for x in 0..w {
            row_sum += u64::from(gray.get_pixel(x as u32, y as u32).0[0]);
            sums[(y + 1) * (w + 1) + x + 1] = sums[y * (w + 1) + x + 1] + row_sum;
        }
    }
    sums
}

/// Adaptive mean threshold, inverted: a pixel turns foreground when it is
/// darker than its `block`-sized neighborhood mean by more than `c`.
///
/// `block` must be odd. Windows are clamped at the image border, so edge
/// pixels compare against a smaller neighborhood.
#[must_use]
pub fn adaptive_threshold_inv(gray: &GrayImage, block: u32, c: f64) -> GrayImage {
    debug_assert!(block % 2 == 1, "threshold block must be odd");
    let (w, h) = (gray.width(), gray.height());
    let sums = integral(gray);
    let stride = w as usize + 1;
    let r = (block / 2) as i64;
    let mut out = GrayImage::new(w, h);
    for y in 0..h as i64 {
        for x in 0..w as i64 {
            let x0 = (x - r).max(0) as usize;
            let y0 = (y - r).max(0) as usize;
            let x1 = ((x + r).min(w as i64 - 1) + 1) as usize;
            let y1 = ((y + r).min(h as i64 - 1) + 1) as usize;
            let area = ((x1 - x0) * (y1 - y0)) as f64;
            let sum = sums[y1 * stride + x1] + sums[y0 * stride + x0]
                - sums[y0 * stride + x1]
                - sums[y1 * stride + x0];
            let mean = sum as f64 / area;
            let value = f64::from(gray.get_pixel(x as u32, y as u32).0[0]);
            if value <= mean - c {
                out.put_pixel(x as u32, y as u32, image::Luma([255]));
            }
        }
    }
    out
}

fn erode3x3(binary: &GrayImage) -> GrayImage {
    let (w, h) = (binary.width() as i64, binary.height() as i64);
    let mut out = GrayImage::new(binary.width(), binary.height());
    for y in 0..h {
        'pixel: for x in 0..w {
            for dy in -1..=1 {
                for dx in -1..=1 {
                    let (nx, ny) = (x + dx, y + dy);
                    if nx < 0 || ny < 0 || nx >= w || ny >= h {
                        continue 'pixel;
                    }
                    if binary.get_pixel(nx as u32, ny as u32).0[0] == 0 {
                        continue 'pixel;
                    }
                }
            }
            out.put_pixel(x as u32, y as u32, image::Luma([255]));
        }
    }
    out
}

fn dilate3x3(binary: &GrayImage) -> GrayImage {
    let (w, h) = (binary.width() as i64, binary.height() as i64);
    let mut out = GrayImage::new(binary.width(), binary.height());
    for y in 0..h {
        for x in 0..w {
            'neighbors: for dy in -1..=1 {
                for dx in -1..=1 {
                    let (nx, ny) = (x + dx, y + dy);
                    if nx < 0 || ny < 0 || nx >= w || ny >= h {
                        continue;
                    }
                    if binary.get_pixel(nx as u32, ny as u32).0[0] == 255 {
                        out.put_pixel(x as u32, y as u32, image::Luma([255]));
                        break 'neighbors;
                    }
                }
            }
        }
    }
    out
}

/// Morphological opening with a 3×3 box element, removing speckle noise
/// smaller than the element.
#[must_use]
pub fn open3x3(binary: &GrayImage) -> GrayImage {
    dilate3x3(&erode3x3(binary))
}

/// Zeroes every pixel outside the circle of `radius` around `center`.
#[must_use]
pub fn mask_circle(binary: &GrayImage, center: (f64, f64), radius: f64) -> GrayImage {
    let mut out = binary.clone();
    let (cx, cy) = center;
    let r2 = radius * radius;
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let dx = f64::from(x) - cx;
        let dy = f64::from(y) - cy;
        if dx * dx + dy * dy > r2 {
            pixel.0[0] = 0;
        }
    }
    out
}
