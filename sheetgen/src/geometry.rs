//! Geometry primitives shared by every layout stage.
//!
//! Coordinates are integer micrometres in screen orientation (+x right,
//! +y down). Integer arithmetic keeps placement and routing exactly
//! reproducible between runs.

use serde::{Deserialize, Serialize};
use std::ops::{Add, Sub};

/// A coordinate in micrometres.
pub type Coord = i64;

/// One millimetre in [`Coord`] units.
pub const MM: Coord = 1000;

/// Default schematic grid (50 mil).
pub const DEFAULT_GRID: Coord = 1270;

/// Round `value` to the nearest multiple of `grid` (ties away from zero).
pub fn snap(value: Coord, grid: Coord) -> Coord {
    if grid <= 0 {
        return value;
    }
    let half = grid / 2;
    if value >= 0 {
        ((value + half) / grid) * grid
    } else {
        -(((-value + half) / grid) * grid)
    }
}

/// Round `value` up to the next multiple of `grid`.
pub fn snap_up(value: Coord, grid: Coord) -> Coord {
    if grid <= 0 {
        return value;
    }
    value.div_euclid(grid) * grid + if value.rem_euclid(grid) == 0 { 0 } else { grid }
}

/// A point in sheet space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Point {
    pub x: Coord,
    pub y: Coord,
}

impl Point {
    pub const fn new(x: Coord, y: Coord) -> Self {
        Self { x, y }
    }

    /// Build a point from millimetres, rounding to the nearest micrometre.
    pub fn from_mm(x: f64, y: f64) -> Self {
        Self {
            x: (x * MM as f64).round() as Coord,
            y: (y * MM as f64).round() as Coord,
        }
    }

    pub fn to_mm(self) -> (f64, f64) {
        (self.x as f64 / MM as f64, self.y as f64 / MM as f64)
    }

    pub fn manhattan(self, other: Point) -> Coord {
        (self.x - other.x).abs() + (self.y - other.y).abs()
    }

    pub fn snapped(self, grid: Coord) -> Self {
        Self::new(snap(self.x, grid), snap(self.y, grid))
    }

    pub fn is_on_grid(self, grid: Coord) -> bool {
        grid > 0 && self.x.rem_euclid(grid) == 0 && self.y.rem_euclid(grid) == 0
    }

    /// True when the two points share an axis.
    pub fn is_aligned_with(self, other: Point) -> bool {
        self.x == other.x || self.y == other.y
    }
}

impl Add for Point {
    type Output = Point;

    fn add(self, rhs: Point) -> Point {
        Point::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Point {
    type Output = Point;

    fn sub(self, rhs: Point) -> Point {
        Point::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl std::fmt::Display for Point {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (x, y) = self.to_mm();
        write!(f, "({:.2}, {:.2})", x, y)
    }
}

/// Axis-aligned rectangle with inclusive corners (`min <= max`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub min: Point,
    pub max: Point,
}

impl Rect {
    /// Build a rectangle from any two opposite corners.
    pub fn new(x0: Coord, y0: Coord, x1: Coord, y1: Coord) -> Self {
        Self {
            min: Point::new(x0.min(x1), y0.min(y1)),
            max: Point::new(x0.max(x1), y0.max(y1)),
        }
    }

    pub fn from_point(p: Point) -> Self {
        Self { min: p, max: p }
    }

    pub fn from_center(center: Point, width: Coord, height: Coord) -> Self {
        let hw = width / 2;
        let hh = height / 2;
        Self::new(center.x - hw, center.y - hh, center.x + (width - hw), center.y + (height - hh))
    }

    pub fn width(&self) -> Coord {
        self.max.x - self.min.x
    }

    pub fn height(&self) -> Coord {
        self.max.y - self.min.y
    }

    pub fn center(&self) -> Point {
        Point::new((self.min.x + self.max.x) / 2, (self.min.y + self.max.y) / 2)
    }

    /// Inclusive containment.
    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.min.x && p.x <= self.max.x && p.y >= self.min.y && p.y <= self.max.y
    }

    pub fn contains_rect(&self, other: &Rect) -> bool {
        self.contains(other.min) && self.contains(other.max)
    }

    /// Interiors overlap. Rectangles that only share an edge do not intersect.
    pub fn intersects(&self, other: &Rect) -> bool {
        self.min.x < other.max.x
            && self.max.x > other.min.x
            && self.min.y < other.max.y
            && self.max.y > other.min.y
    }

    pub fn expand(&self, margin: Coord) -> Rect {
        Rect {
            min: Point::new(self.min.x - margin, self.min.y - margin),
            max: Point::new(self.max.x + margin, self.max.y + margin),
        }
    }

    pub fn union(&self, other: &Rect) -> Rect {
        Rect {
            min: Point::new(self.min.x.min(other.min.x), self.min.y.min(other.min.y)),
            max: Point::new(self.max.x.max(other.max.x), self.max.y.max(other.max.y)),
        }
    }

    pub fn include(&self, p: Point) -> Rect {
        self.union(&Rect::from_point(p))
    }

    pub fn translate(&self, by: Point) -> Rect {
        Rect {
            min: self.min + by,
            max: self.max + by,
        }
    }

    pub fn rotate(&self, rotation: Rotation) -> Rect {
        let a = rotation.apply(self.min);
        let b = rotation.apply(self.max);
        Rect::new(a.x, a.y, b.x, b.y)
    }
}

/// Symbol rotation in 90° steps, counter-clockwise as seen on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
pub enum Rotation {
    #[default]
    R0,
    R90,
    R180,
    R270,
}

impl Rotation {
    pub const ALL: [Rotation; 4] = [Rotation::R0, Rotation::R90, Rotation::R180, Rotation::R270];

    pub fn degrees(self) -> u16 {
        match self {
            Rotation::R0 => 0,
            Rotation::R90 => 90,
            Rotation::R180 => 180,
            Rotation::R270 => 270,
        }
    }

    /// Rotate an offset about the symbol origin.
    ///
    /// With +y pointing down, a counter-clockwise quarter turn maps
    /// `(x, y)` to `(y, -x)`.
    pub fn apply(self, p: Point) -> Point {
        match self {
            Rotation::R0 => p,
            Rotation::R90 => Point::new(p.y, -p.x),
            Rotation::R180 => Point::new(-p.x, -p.y),
            Rotation::R270 => Point::new(-p.y, p.x),
        }
    }
}

impl From<Rotation> for u16 {
    fn from(r: Rotation) -> u16 {
        r.degrees()
    }
}

impl TryFrom<u16> for Rotation {
    type Error = String;

    fn try_from(degrees: u16) -> Result<Self, Self::Error> {
        match degrees % 360 {
            0 => Ok(Rotation::R0),
            90 => Ok(Rotation::R90),
            180 => Ok(Rotation::R180),
            270 => Ok(Rotation::R270),
            other => Err(format!("rotation must be a multiple of 90 degrees, got {}", other)),
        }
    }
}

/// One of the four lattice directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Right,
    Up,
    Left,
    Down,
}

impl Side {
    pub const ALL: [Side; 4] = [Side::Right, Side::Up, Side::Left, Side::Down];

    pub fn unit(self) -> Point {
        match self {
            Side::Right => Point::new(1, 0),
            Side::Up => Point::new(0, -1),
            Side::Left => Point::new(-1, 0),
            Side::Down => Point::new(0, 1),
        }
    }

    /// Dominant direction of an offset; vertical wins ties.
    pub fn of_offset(offset: Point) -> Side {
        if offset.x.abs() > offset.y.abs() {
            if offset.x > 0 {
                Side::Right
            } else {
                Side::Left
            }
        } else if offset.y < 0 {
            Side::Up
        } else {
            Side::Down
        }
    }
}

/// Check that every consecutive pair differs in exactly one axis.
pub fn is_orthogonal(points: &[Point]) -> bool {
    points
        .windows(2)
        .all(|w| (w[0].x == w[1].x) != (w[0].y == w[1].y))
}

/// Inclusive test for `p` lying on the axis-aligned segment `a`-`b`.
pub fn segment_contains(a: Point, b: Point, p: Point) -> bool {
    if a.x == b.x {
        p.x == a.x && p.y >= a.y.min(b.y) && p.y <= a.y.max(b.y)
    } else if a.y == b.y {
        p.y == a.y && p.x >= a.x.min(b.x) && p.x <= a.x.max(b.x)
    } else {
        false
    }
}

/// Closest point of the axis-aligned segment `a`-`b` to `p`.
pub fn nearest_on_segment(a: Point, b: Point, p: Point) -> Point {
    Point::new(
        p.x.clamp(a.x.min(b.x), a.x.max(b.x)),
        p.y.clamp(a.y.min(b.y), a.y.max(b.y)),
    )
}

/// Drop repeated points and interior points of straight runs.
pub fn simplify_path(points: &[Point]) -> Vec<Point> {
    let mut out: Vec<Point> = Vec::with_capacity(points.len());
    for &p in points {
        if out.last() == Some(&p) {
            continue;
        }
        if out.len() >= 2 {
            let a = out[out.len() - 2];
            let b = out[out.len() - 1];
            if (a.x == b.x && b.x == p.x) || (a.y == b.y && b.y == p.y) {
                out.pop();
            }
        }
        out.push(p);
    }
    out
}

/// Orthogonal dog-leg from `from` to `to`: horizontal first, then vertical.
pub fn dog_leg(from: Point, to: Point) -> Vec<Point> {
    simplify_path(&[from, Point::new(to.x, from.y), to])
}

/// Both L-shaped paths from `from` to `to`, horizontal leg first first.
pub fn dog_legs(from: Point, to: Point) -> [Vec<Point>; 2] {
    [
        dog_leg(from, to),
        simplify_path(&[from, Point::new(from.x, to.y), to]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snap_rounds_to_nearest_grid_point() {
        assert_eq!(snap(1900, 1270), 1270);
        assert_eq!(snap(1905, 1270), 2540);
        assert_eq!(snap(-1905, 1270), -2540);
        assert_eq!(snap_up(1271, 1270), 2540);
        assert_eq!(snap_up(-1269, 1270), 0);
    }

    #[test]
    fn rotation_quarter_turn_moves_right_to_up() {
        let right = Point::new(10, 0);
        assert_eq!(Rotation::R90.apply(right), Point::new(0, -10));
        assert_eq!(Rotation::R180.apply(right), Point::new(-10, 0));
        assert_eq!(Rotation::R270.apply(right), Point::new(0, 10));
        assert_eq!(Rotation::try_from(450u16), Ok(Rotation::R90));
        assert!(Rotation::try_from(45u16).is_err());
    }

    #[test]
    fn rect_rotation_normalizes_corners() {
        let r = Rect::new(-1000, -3000, 1000, 3000).rotate(Rotation::R90);
        assert_eq!(r, Rect::new(-3000, -1000, 3000, 1000));
    }

    #[test]
    fn touching_rects_do_not_intersect() {
        let a = Rect::new(0, 0, 10, 10);
        let b = Rect::new(10, 0, 20, 10);
        assert!(!a.intersects(&b));
        assert!(a.intersects(&Rect::new(9, 9, 12, 12)));
    }

    #[test]
    fn simplify_collapses_straight_runs() {
        let pts = [
            Point::new(0, 0),
            Point::new(1, 0),
            Point::new(2, 0),
            Point::new(2, 0),
            Point::new(2, 5),
        ];
        assert_eq!(simplify_path(&pts), vec![Point::new(0, 0), Point::new(2, 0), Point::new(2, 5)]);
    }

    #[test]
    fn dog_leg_is_orthogonal() {
        let path = dog_leg(Point::new(0, 0), Point::new(5, 7));
        assert_eq!(path.len(), 3);
        assert!(is_orthogonal(&path));
        assert_eq!(dog_leg(Point::new(0, 0), Point::new(0, 7)).len(), 2);

        let [h, v] = dog_legs(Point::new(0, 0), Point::new(5, 7));
        assert_eq!(h[1], Point::new(5, 0));
        assert_eq!(v[1], Point::new(0, 7));
    }

    #[test]
    fn segment_queries() {
        let a = Point::new(0, 0);
        let b = Point::new(0, 10);
        assert!(segment_contains(a, b, Point::new(0, 4)));
        assert!(!segment_contains(a, b, Point::new(1, 4)));
        assert_eq!(nearest_on_segment(a, b, Point::new(7, 12)), b);
        assert_eq!(nearest_on_segment(a, b, Point::new(7, 3)), Point::new(0, 3));
    }
}
