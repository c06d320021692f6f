//! Data models for plotter geometry and tool position
//!
//! This module provides:
//! - `Point`: a 2D coordinate in millimetres (or source pixels before fitting)
//! - `Path`: an immutable polyline drawn as one continuous pen stroke
//! - `Position`: the last known 3-axis tool position
//! - `Bounds`: the plotter working area

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// A 2D coordinate
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    /// X coordinate
    pub x: f64,
    /// Y coordinate
    pub y: f64,
}

impl Point {
    /// Create a new point
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point
    pub fn distance_to(&self, other: &Point) -> f64 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        (dx * dx + dy * dy).sqrt()
    }
}

impl From<(f64, f64)> for Point {
    fn from((x, y): (f64, f64)) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.3}, {:.3})", self.x, self.y)
    }
}

/// An ordered sequence of at least two points drawn as one pen stroke.
///
/// The point buffer is shared, so cloning a path (for instance into a
/// layer) does not copy its points.
#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    points: Arc<[Point]>,
}

impl Path {
    /// Build a path, returning `None` when fewer than two points are given.
    pub fn new(points: Vec<Point>) -> Option<Self> {
        if points.len() < 2 {
            return None;
        }
        Some(Self {
            points: points.into(),
        })
    }

    /// The points of this path
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// Number of points
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Always false; a path holds at least two points
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// First point
    pub fn start(&self) -> Point {
        self.points[0]
    }

    /// Last point
    pub fn end(&self) -> Point {
        self.points[self.points.len() - 1]
    }

    /// Cumulative Euclidean length
    pub fn length(&self) -> f64 {
        polyline_length(&self.points)
    }

    /// Apply a transform to every point, producing a new path
    pub fn map_points<F>(&self, f: F) -> Path
    where
        F: Fn(Point) -> Point,
    {
        Path {
            points: self.points.iter().map(|p| f(*p)).collect(),
        }
    }
}

/// Cumulative Euclidean length of a polyline
pub fn polyline_length(points: &[Point]) -> f64 {
    points.windows(2).map(|w| w[0].distance_to(&w[1])).sum()
}

/// Three-axis tool position in millimetres
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    /// X position
    pub x: f64,
    /// Y position
    pub y: f64,
    /// Z (pen) position
    pub z: f64,
}

impl Position {
    /// Create a new position
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// The XY part of this position
    pub fn xy(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "X{:.3} Y{:.3} Z{:.3}", self.x, self.y, self.z)
    }
}

/// Rectangular working area, origin at the lower-left corner
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    /// Minimum X
    pub min_x: f64,
    /// Minimum Y
    pub min_y: f64,
    /// Maximum X
    pub max_x: f64,
    /// Maximum Y
    pub max_y: f64,
}

impl Bounds {
    /// A working area of `width` x `height` starting at the origin
    pub fn from_size(width: f64, height: f64) -> Self {
        Self {
            min_x: 0.0,
            min_y: 0.0,
            max_x: width,
            max_y: height,
        }
    }

    /// Width of the area
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    /// Height of the area
    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Whether the point lies inside (inclusive)
    pub fn contains(&self, p: &Point) -> bool {
        p.x >= self.min_x && p.x <= self.max_x && p.y >= self.min_y && p.y <= self.max_y
    }

    /// Nearest point inside the area
    pub fn clamp(&self, p: Point) -> Point {
        Point::new(
            p.x.clamp(self.min_x, self.max_x),
            p.y.clamp(self.min_y, self.max_y),
        )
    }

    /// Bounding box of a set of point sequences, `None` when empty
    pub fn enclosing<'a, I>(sequences: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a [Point]>,
    {
        let mut bounds: Option<Bounds> = None;
        for p in sequences.into_iter().flatten() {
            let b = bounds.get_or_insert(Bounds {
                min_x: p.x,
                min_y: p.y,
                max_x: p.x,
                max_y: p.y,
            });
            b.min_x = b.min_x.min(p.x);
            b.min_y = b.min_y.min(p.y);
            b.max_x = b.max_x.max(p.x);
            b.max_y = b.max_y.max(p.y);
        }
        bounds
    }
}

impl Default for Bounds {
    fn default() -> Self {
        Self::from_size(200.0, 200.0)
    }
}
