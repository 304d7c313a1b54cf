//! Geometric primitives shared by the orientation and crop stages.
//!
//! Coordinates are pixels with the origin at the top-left corner, `x` to the
//! right and `y` downwards.

use serde::{Deserialize, Serialize};

/// A 2D point with floating-point coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    #[inline]
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    pub fn scale(&self, factor: f32) -> Point {
        Point::new(self.x * factor, self.y * factor)
    }
}

/// An axis-aligned rectangle, `x0 <= x1`, `y0 <= y1`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl Rect {
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self {
            x0: x0.min(x1),
            y0: y0.min(y1),
            x1: x0.max(x1),
            y1: y0.max(y1),
        }
    }

    /// Bounding rectangle of a set of points. `None` for an empty set.
    pub fn bounding(points: &[Point]) -> Option<Rect> {
        let first = points.first()?;
        let mut r = Rect::new(first.x, first.y, first.x, first.y);
        for p in &points[1..] {
            r.x0 = r.x0.min(p.x);
            r.y0 = r.y0.min(p.y);
            r.x1 = r.x1.max(p.x);
            r.y1 = r.y1.max(p.y);
        }
        Some(r)
    }

    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    pub fn union(&self, other: &Rect) -> Rect {
        Rect {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }

    /// Grow by `pad` on every side.
    pub fn pad(&self, pad: f32) -> Rect {
        Rect {
            x0: self.x0 - pad,
            y0: self.y0 - pad,
            x1: self.x1 + pad,
            y1: self.y1 + pad,
        }
    }

    /// Clamp to `[0, width] × [0, height]`.
    pub fn clamp(&self, width: f32, height: f32) -> Rect {
        Rect {
            x0: self.x0.clamp(0.0, width),
            y0: self.y0.clamp(0.0, height),
            x1: self.x1.clamp(0.0, width),
            y1: self.y1.clamp(0.0, height),
        }
    }

    pub fn scale(&self, factor: f32) -> Rect {
        Rect {
            x0: self.x0 * factor,
            y0: self.y0 * factor,
            x1: self.x1 * factor,
            y1: self.y1 * factor,
        }
    }

    /// Integer pixel window `(x, y, w, h)` covering this rectangle.
    pub fn to_pixel_window(&self) -> (u32, u32, u32, u32) {
        let x = self.x0.floor().max(0.0) as u32;
        let y = self.y0.floor().max(0.0) as u32;
        let x1 = self.x1.ceil().max(0.0) as u32;
        let y1 = self.y1.ceil().max(0.0) as u32;
        (x, y, x1.saturating_sub(x), y1.saturating_sub(y))
    }
}

/// A quadrilateral with corners ordered top-left, top-right, bottom-right, bottom-left.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quad {
    pub corners: [Point; 4],
}

impl Quad {
    /// Order four arbitrary corners as TL, TR, BR, BL.
    ///
    /// TL has the smallest `x + y`, BR the largest; TR has the smallest
    /// `y - x`, BL the largest. Returns `None` when two roles land on the same
    /// point (degenerate input).
    pub fn from_unordered(points: [Point; 4]) -> Option<Quad> {
        let by = |key: fn(&Point) -> f32, max: bool| -> usize {
            let mut best = 0;
            for i in 1..4 {
                let better = if max {
                    key(&points[i]) > key(&points[best])
                } else {
                    key(&points[i]) < key(&points[best])
                };
                if better {
                    best = i;
                }
            }
            best
        };
        let tl = by(|p| p.x + p.y, false);
        let br = by(|p| p.x + p.y, true);
        let tr = by(|p| p.y - p.x, false);
        let bl = by(|p| p.y - p.x, true);

        let mut seen = [false; 4];
        for i in [tl, tr, br, bl] {
            if seen[i] {
                return None;
            }
            seen[i] = true;
        }
        Some(Quad {
            corners: [points[tl], points[tr], points[br], points[bl]],
        })
    }

    /// Area by the shoelace formula.
    pub fn area(&self) -> f32 {
        let c = &self.corners;
        let mut acc = 0.0;
        for i in 0..4 {
            let j = (i + 1) % 4;
            acc += c[i].x * c[j].y - c[j].x * c[i].y;
        }
        acc.abs() / 2.0
    }

    pub fn scale(&self, factor: f32) -> Quad {
        Quad {
            corners: self.corners.map(|p| p.scale(factor)),
        }
    }

    pub fn bounding_rect(&self) -> Rect {
        let [a, b, c, d] = self.corners;
        Rect::new(a.x, a.y, a.x, a.y)
            .union(&Rect::new(b.x, b.y, b.x, b.y))
            .union(&Rect::new(c.x, c.y, c.x, c.y))
            .union(&Rect::new(d.x, d.y, d.x, d.y))
    }

    /// Output size of an upright rectangle that preserves the longer of each
    /// pair of opposite edges.
    pub fn target_size(&self) -> (u32, u32) {
        let [tl, tr, br, bl] = self.corners;
        let width = tl.distance(&tr).max(bl.distance(&br));
        let height = tl.distance(&bl).max(tr.distance(&br));
        (width.round().max(1.0) as u32, height.round().max(1.0) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_pad_and_clamp() {
        let r = Rect::new(10.0, 10.0, 90.0, 50.0).pad(20.0).clamp(100.0, 60.0);
        assert_eq!(r, Rect::new(0.0, 0.0, 100.0, 60.0));
        assert_eq!(r.to_pixel_window(), (0, 0, 100, 60));
    }

    #[test]
    fn rect_bounding_and_union() {
        let pts = [Point::new(5.0, 9.0), Point::new(1.0, 3.0), Point::new(7.0, 4.0)];
        let r = Rect::bounding(&pts).unwrap();
        assert_eq!(r, Rect::new(1.0, 3.0, 7.0, 9.0));
        assert_eq!(r.area(), 36.0);
        assert!(Rect::bounding(&[]).is_none());
        let u = r.union(&Rect::new(0.0, 0.0, 2.0, 2.0));
        assert_eq!(u, Rect::new(0.0, 0.0, 7.0, 9.0));
    }

    #[test]
    fn quad_orders_corners() {
        let q = Quad::from_unordered([
            Point::new(90.0, 95.0),
            Point::new(10.0, 5.0),
            Point::new(12.0, 98.0),
            Point::new(95.0, 8.0),
        ])
        .unwrap();
        assert_eq!(q.corners[0], Point::new(10.0, 5.0));
        assert_eq!(q.corners[1], Point::new(95.0, 8.0));
        assert_eq!(q.corners[2], Point::new(90.0, 95.0));
        assert_eq!(q.corners[3], Point::new(12.0, 98.0));
    }

    #[test]
    fn degenerate_quad_is_rejected() {
        let p = Point::new(1.0, 1.0);
        assert!(Quad::from_unordered([p, p, p, p]).is_none());
    }

    #[test]
    fn quad_area_and_target_size() {
        let q = Quad {
            corners: [
                Point::new(0.0, 0.0),
                Point::new(40.0, 0.0),
                Point::new(40.0, 30.0),
                Point::new(0.0, 30.0),
            ],
        };
        assert_eq!(q.area(), 1200.0);
        assert_eq!(q.target_size(), (40, 30));
        assert_eq!(q.scale(2.0).target_size(), (80, 60));
    }
}
