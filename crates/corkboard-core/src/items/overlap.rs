//! Area overlap between rotated rectangles.

use kurbo::{Affine, Point, Rect, Size};

/// Corners of a `size` rectangle centered on `center` and rotated about it.
pub fn rotated_corners(center: Point, size: Size, rotation: f64) -> [Point; 4] {
    let rect = Rect::from_center_size(center, size);
    let rot = Affine::rotate_about(rotation, center);
    [
        rot * Point::new(rect.x0, rect.y0),
        rot * Point::new(rect.x1, rect.y0),
        rot * Point::new(rect.x1, rect.y1),
        rot * Point::new(rect.x0, rect.y1),
    ]
}

/// Signed shoelace area: positive for one winding, negative for the other.
fn signed_area(points: &[Point]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut sum = 0.0;
    for (i, a) in points.iter().enumerate() {
        let b = points[(i + 1) % points.len()];
        sum += a.x * b.y - b.x * a.y;
    }
    sum / 2.0
}

/// Area enclosed by a simple polygon.
pub fn polygon_area(points: &[Point]) -> f64 {
    signed_area(points).abs()
}

/// Intersection of `subject` with the convex polygon `clip`
/// (Sutherland-Hodgman). Either winding is accepted for `clip`.
pub fn clip_polygon(subject: &[Point], clip: &[Point]) -> Vec<Point> {
    let winding = signed_area(clip).signum();
    if winding == 0.0 {
        return Vec::new();
    }

    let mut output = subject.to_vec();
    for (i, &edge_start) in clip.iter().enumerate() {
        if output.is_empty() {
            break;
        }
        let edge_end = clip[(i + 1) % clip.len()];
        let inside = |p: Point| {
            let edge = edge_end - edge_start;
            let rel = p - edge_start;
            edge.cross(rel) * winding >= 0.0
        };

        let input = std::mem::take(&mut output);
        for (j, &current) in input.iter().enumerate() {
            let previous = input[(j + input.len() - 1) % input.len()];
            match (inside(previous), inside(current)) {
                (true, true) => output.push(current),
                (true, false) => {
                    if let Some(p) = line_intersection(previous, current, edge_start, edge_end) {
                        output.push(p);
                    }
                }
                (false, true) => {
                    if let Some(p) = line_intersection(previous, current, edge_start, edge_end) {
                        output.push(p);
                    }
                    output.push(current);
                }
                (false, false) => {}
            }
        }
    }
    output
}

/// Intersection of segment `p0..p1` with the infinite line through `q0..q1`.
fn line_intersection(p0: Point, p1: Point, q0: Point, q1: Point) -> Option<Point> {
    let d = p1 - p0;
    let e = q1 - q0;
    let denom = d.cross(e);
    if denom.abs() < f64::EPSILON {
        return None;
    }
    let t = (q0 - p0).cross(e) / denom;
    Some(p0 + d * t)
}

/// Fraction of `this` polygon's area covered by `other`, in `[0, 1]`.
pub fn fraction_covered(this: &[Point], other: &[Point]) -> f64 {
    let area = polygon_area(this);
    if area <= 0.0 || !area.is_finite() {
        return 0.0;
    }
    let intersection = clip_polygon(this, other);
    if intersection.len() < 3 {
        return 0.0;
    }
    (polygon_area(&intersection) / area).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_4;

    fn square(x: f64, y: f64, side: f64) -> [Point; 4] {
        rotated_corners(Point::new(x, y), Size::new(side, side), 0.0)
    }

    #[test]
    fn test_polygon_area() {
        assert!((polygon_area(&square(0.0, 0.0, 10.0)) - 100.0).abs() < 1e-9);
        assert_eq!(polygon_area(&[Point::ZERO, Point::new(1.0, 1.0)]), 0.0);
    }

    #[test]
    fn test_quarter_overlap() {
        let a = square(0.0, 0.0, 100.0);
        let b = square(50.0, 50.0, 100.0);
        assert!((fraction_covered(&a, &b) - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_identical_is_full() {
        let a = square(3.0, 4.0, 20.0);
        assert!((fraction_covered(&a, &a) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_disjoint_is_zero() {
        let a = square(0.0, 0.0, 10.0);
        let b = square(100.0, 100.0, 10.0);
        assert_eq!(fraction_covered(&a, &b), 0.0);
    }

    #[test]
    fn test_rotated_diamond_inside_square() {
        // A square rotated 45 degrees inscribed in a larger square covers half of it.
        let outer = square(0.0, 0.0, 2.0);
        let side = 2.0 / 2f64.sqrt();
        let diamond = rotated_corners(Point::ZERO, Size::new(side, side), FRAC_PI_4);
        assert!((fraction_covered(&outer, &diamond) - 0.5).abs() < 1e-9);
        assert!((fraction_covered(&diamond, &outer) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_clip_accepts_reversed_winding() {
        let a = square(0.0, 0.0, 100.0);
        let mut b = square(50.0, 50.0, 100.0);
        b.reverse();
        assert!((fraction_covered(&a, &b) - 0.25).abs() < 1e-9);
    }
}
