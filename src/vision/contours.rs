//! Connected-component extraction and boundary tracing over binary images.

use image::GrayImage;

/// Clockwise Moore neighborhood in image coordinates (y grows downward),
/// starting at west.
const DIRS: [(i64, i64); 8] = [
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
];

/// Closed outer boundary of one foreground component together with its shape
/// statistics.
#[derive(Clone, Debug)]
pub struct Contour {
    /// Boundary pixels in clockwise trace order.
    pub boundary: Vec<(u32, u32)>,
    /// Polygon area of the boundary (shoelace formula).
    pub area: f64,
    /// Polygon perimeter of the closed boundary.
    pub perimeter: f64,
    /// Polygon centroid, falling back to the boundary mean for degenerate
    /// (near zero area) contours.
    pub centroid: (f64, f64),
    /// Bounding box as `(x, y, width, height)`.
    pub bbox: (u32, u32, u32, u32),
}

impl Contour {
    /// Width over height of the bounding box.
    #[must_use]
    pub fn aspect_ratio(&self) -> f64 {
        f64::from(self.bbox.2) / f64::from(self.bbox.3)
    }

    /// Shape compactness `4πA / P²`, which is 1 for an ideal circle and
    /// drops toward 0 for elongated or ragged shapes.
    #[must_use]
    pub fn circularity(&self) -> f64 {
        if self.perimeter <= f64::EPSILON {
            return 0.0;
        }
        4.0 * std::f64::consts::PI * self.area / (self.perimeter * self.perimeter)
    }
}

fn is_foreground(binary: &GrayImage, x: i64, y: i64) -> bool {
    x >= 0
        && y >= 0
        && x < i64::from(binary.width())
        && y < i64::from(binary.height())
        && binary.get_pixel(x as u32, y as u32).0[0] != 0
}

/// Moore-neighbor boundary trace starting from the component's
/// topmost-leftmost pixel.
fn trace_boundary(binary: &GrayImage, start: (u32, u32)) -> Vec<(u32, u32)> {
    let mut boundary = vec![start];
    let start = (i64::from(start.0), i64::from(start.1));
    let mut current = start;
    // The start pixel is first in scan order, so its west neighbor is
    // background.
    let mut backtrack = 0usize;
    loop {
        let mut advanced = false;
        // Last background neighbor scanned, which the next scan restarts
        // from. Consecutive ring positions are always adjacent, so it sits
        // in the new pixel's neighborhood too.
        let mut last_bg = (current.0 + DIRS[backtrack].0, current.1 + DIRS[backtrack].1);
        for step in 1..=8 {
            let dir = (backtrack + step) % 8;
            let (dx, dy) = DIRS[dir];
            let next = (current.0 + dx, current.1 + dy);
            if is_foreground(binary, next.0, next.1) {
                if next == start {
                    return boundary;
                }
                boundary.push((next.0 as u32, next.1 as u32));
                let rel = (last_bg.0 - next.0, last_bg.1 - next.1);
                backtrack = DIRS
                    .iter()
                    .position(|&d| d == rel)
                    .unwrap_or(0);
                current = next;
                advanced = true;
                break;
            }
            last_bg = next;
        }
        if !advanced {
            // Isolated pixel.
            return boundary;
        }
    }
}

fn shape_stats(boundary: &[(u32, u32)]) -> (f64, f64, (f64, f64)) {
    let n = boundary.len();
    let mut area2 = 0.0;
    let mut perimeter = 0.0;
    let mut mx = 0.0;
    let mut my = 0.0;
    for i in 0..n {
        let (x0, y0) = (f64::from(boundary[i].0), f64::from(boundary[i].1));
        let (x1, y1) = (
            f64::from(boundary[(i + 1) % n].0),
            f64::from(boundary[(i + 1) % n].1),
        );
        let cross = x0 * y1 - x1 * y0;
        area2 += cross;
        mx += (x0 + x1) * cross;
        my += (y0 + y1) * cross;
        perimeter += ((x1 - x0).powi(2) + (y1 - y0).powi(2)).sqrt();
    }
    let area = (area2 / 2.0).abs();
    let centroid = if area > f64::EPSILON {
        (mx / (3.0 * area2), my / (3.0 * area2))
    } else {
        let sx: f64 = boundary.iter().map(|p| f64::from(p.0)).sum();
        let sy: f64 = boundary.iter().map(|p| f64::from(p.1)).sum();
        (sx / n as f64, sy / n as f64)
    };
    (area, perimeter, centroid)
}

/// Extracts the outer contour of every 8-connected foreground component.
#[must_use]
pub fn find_contours(binary: &GrayImage) -> Vec<Contour> {
    let (w, h) = (binary.width(), binary.height());
    let mut visited = vec![false; (w * h) as usize];
    let mut contours = Vec::new();
    for y in 0..h {
        for x in 0..w {
            let idx = (y * w + x) as usize;
            if visited[idx] || binary.get_pixel(x, y).0[0] == 0 {
                continue;
            }
            // Flood-fill the whole component so later scan rows skip it.
            let mut stack = vec![(x, y)];
            visited[idx] = true;
            let (mut min_x, mut min_y, mut max_x, mut max_y) = (x, y, x, y);
            while let Some((px, py)) = stack.pop() {
                min_x = min_x.min(px);
                min_y = min_y.min(py);
                max_x = max_x.max(px);
                max_y = max_y.max(py);
                for (dx, dy) in DIRS {
                    let (nx, ny) = (i64::from(px) + dx, i64::from(py) + dy);
                    if !is_foreground(binary, nx, ny) {
                        continue;
                    }
                    let nidx = (ny as u32 * w + nx as u32) as usize;
                    if !visited[nidx] {
                        visited[nidx] = true;
                        stack.push((nx as u32, ny as u32));
                    }
                }
            }
            let boundary = trace_boundary(binary, (x, y));
            let (area, perimeter, centroid) = shape_stats(&boundary);
            contours.push(Contour {
                boundary,
                area,
                perimeter,
                centroid,
                bbox: (min_x, min_y, max_x - min_x + 1, max_y - min_y + 1),
            });
        }
    }
    contours
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use image::Luma;

    fn blank(w: u32, h: u32) -> GrayImage {
        GrayImage::new(w, h)
    }

    fn fill_rect(image: &mut GrayImage, x0: u32, y0: u32, w: u32, h: u32) {
        for y in y0..y0 + h {
            for x in x0..x0 + w {
                image.put_pixel(x, y, Luma([255]));
            }
        }
    }

    fn fill_disc(image: &mut GrayImage, cx: i64, cy: i64, r: i64) {
        for y in cy - r..=cy + r {
            for x in cx - r..=cx + r {
                if (x - cx).pow(2) + (y - cy).pow(2) <= r * r {
                    image.put_pixel(x as u32, y as u32, Luma([255]));
                }
            }
        }
    }

    #[test]
    fn square_stats() {
        let mut image = blank(20, 20);
        fill_rect(&mut image, 5, 5, 6, 6);
        let contours = find_contours(&image);
        assert_eq!(contours.len(), 1);
        let c = &contours[0];
        // Boundary polygon of a 6x6 block is the 5x5 square of its outermost
        // pixel centers.
        assert_relative_eq!(c.area, 25.0, epsilon = 1e-9);
        assert_relative_eq!(c.perimeter, 20.0, epsilon = 1e-9);
        assert_relative_eq!(c.centroid.0, 7.5, epsilon = 1e-9);
        assert_relative_eq!(c.centroid.1, 7.5, epsilon = 1e-9);
        assert_eq!(c.bbox, (5, 5, 6, 6));
        assert_relative_eq!(c.aspect_ratio(), 1.0);
    }

    #[test]
    fn disc_is_nearly_circular() {
        let mut image = blank(40, 40);
        fill_disc(&mut image, 20, 20, 8);
        let contours = find_contours(&image);
        assert_eq!(contours.len(), 1);
        let c = &contours[0];
        assert!(c.circularity() > 0.8 && c.circularity() < 1.2, "{}", c.circularity());
        assert_relative_eq!(c.centroid.0, 20.0, epsilon = 0.5);
        assert_relative_eq!(c.centroid.1, 20.0, epsilon = 0.5);
    }

    #[test]
    fn separate_components_yield_separate_contours() {
        let mut image = blank(30, 30);
        fill_rect(&mut image, 2, 2, 4, 4);
        fill_rect(&mut image, 20, 20, 5, 5);
        let contours = find_contours(&image);
        assert_eq!(contours.len(), 2);
    }

    #[test]
    fn single_pixel_component_is_degenerate_but_present() {
        let mut image = blank(10, 10);
        image.put_pixel(4, 4, Luma([255]));
        let contours = find_contours(&image);
        assert_eq!(contours.len(), 1);
        assert_relative_eq!(contours[0].area, 0.0);
        assert_eq!(contours[0].centroid, (4.0, 4.0));
    }

    #[test]
    fn empty_image_has_no_contours() {
        assert!(find_contours(&blank(8, 8)).is_empty());
    }
}
