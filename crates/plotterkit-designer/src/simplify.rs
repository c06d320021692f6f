//! Polyline simplification.
//!
//! Raw point sequences (traced outlines, canvas strokes, glyph strokes) are
//! reduced with a Douglas-Peucker pass bounded by a tolerance, after
//! collapsing consecutive duplicate points. Paths shorter than the minimum
//! length are dropped as noise when requested.

use plotterkit_core::{polyline_length, Path, Point};

/// Points closer than this are treated as duplicates (mm).
const DUPLICATE_EPSILON: f64 = 1e-9;

/// Simplification parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimplifyOptions {
    /// Maximum perpendicular deviation of the result from the input (mm)
    pub tolerance: f64,
    /// Paths shorter than this are noise (mm)
    pub min_path_length: f64,
    /// Whether to drop noise-length paths
    pub remove_noise: bool,
}

impl Default for SimplifyOptions {
    fn default() -> Self {
        Self {
            tolerance: 0.5,
            min_path_length: 2.0,
            remove_noise: true,
        }
    }
}

impl SimplifyOptions {
    /// The same options expressed in another unit, e.g. source pixels when
    /// `scale` is millimetres per pixel.
    pub fn in_source_units(&self, scale: f64) -> Self {
        if scale <= 0.0 {
            return *self;
        }
        Self {
            tolerance: self.tolerance / scale,
            min_path_length: self.min_path_length / scale,
            remove_noise: self.remove_noise,
        }
    }
}

/// Drop points identical to their predecessor
pub fn dedup_consecutive(points: &[Point]) -> Vec<Point> {
    let mut out: Vec<Point> = Vec::with_capacity(points.len());
    for p in points {
        match out.last() {
            Some(last) if last.distance_to(p) <= DUPLICATE_EPSILON => {}
            _ => out.push(*p),
        }
    }
    out
}

/// Distance from `p` to the line through `a` and `b`, or to `a` when the
/// two coincide.
fn perpendicular_distance(p: &Point, a: &Point, b: &Point) -> f64 {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let len = (dx * dx + dy * dy).sqrt();
    if len <= DUPLICATE_EPSILON {
        return p.distance_to(a);
    }
    ((p.x - a.x) * dy - (p.y - a.y) * dx).abs() / len
}

/// Douglas-Peucker reduction.
///
/// Keeps both endpoints and every point whose removal would move the
/// polyline by more than `tolerance`. The output is a subsequence of the
/// input.
pub fn douglas_peucker(points: &[Point], tolerance: f64) -> Vec<Point> {
    if points.len() < 3 {
        return points.to_vec();
    }

    let mut keep = vec![false; points.len()];
    keep[0] = true;
    keep[points.len() - 1] = true;

    let mut stack = vec![(0usize, points.len() - 1)];
    while let Some((first, last)) = stack.pop() {
        if last <= first + 1 {
            continue;
        }

        let mut max_distance = 0.0;
        let mut index = first;
        for i in (first + 1)..last {
            let d = perpendicular_distance(&points[i], &points[first], &points[last]);
            if d > max_distance {
                max_distance = d;
                index = i;
            }
        }

        if max_distance > tolerance {
            keep[index] = true;
            stack.push((first, index));
            stack.push((index, last));
        }
    }

    points
        .iter()
        .zip(keep)
        .filter_map(|(p, k)| k.then_some(*p))
        .collect()
}

/// Path simplifier
#[derive(Debug, Clone, Default)]
pub struct PathSimplifier {
    /// Active parameters
    pub options: SimplifyOptions,
}

impl PathSimplifier {
    /// Create a simplifier with the given options
    pub fn new(options: SimplifyOptions) -> Self {
        Self { options }
    }

    /// Simplify one raw point sequence.
    ///
    /// Returns `None` when fewer than two distinct points remain or when the
    /// path is noise.
    pub fn simplify(&self, points: &[Point]) -> Option<Path> {
        let deduped = dedup_consecutive(points);
        let reduced = douglas_peucker(&deduped, self.options.tolerance.max(0.0));
        if reduced.len() < 2 {
            return None;
        }

        let length = polyline_length(&reduced);
        if self.options.remove_noise && length < self.options.min_path_length {
            tracing::trace!(
                "Dropping {:.3}mm path (minimum {:.3}mm)",
                length,
                self.options.min_path_length
            );
            return None;
        }

        Path::new(reduced)
    }

    /// Simplify a set of raw point sequences, keeping input order.
    ///
    /// An empty result means nothing is drawable; callers report that as
    /// `InputError::NoDrawablePaths` rather than generating an empty program.
    pub fn simplify_all<S>(&self, sequences: &[S]) -> Vec<Path>
    where
        S: AsRef<[Point]>,
    {
        let paths: Vec<Path> = sequences
            .iter()
            .filter_map(|s| self.simplify(s.as_ref()))
            .collect();

        tracing::debug!(
            "Simplified {} raw paths to {} (tolerance {:.3})",
            sequences.len(),
            paths.len(),
            self.options.tolerance
        );
        paths
    }
}
