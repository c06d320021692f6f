//! Mapping source coordinates into the plotter working area.
//!
//! Traced images and canvas strokes use a top-left origin with Y growing
//! downward; the plotter uses a lower-left origin with Y growing upward.

use plotterkit_core::{Bounds, InputError, Path, Point};

/// Uniform scale plus offset, with optional Y flip
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitTransform {
    /// Millimetres per source unit
    pub scale: f64,
    /// X offset applied after scaling (mm)
    pub offset_x: f64,
    /// Y offset applied after scaling (mm)
    pub offset_y: f64,
    /// Source height, used to flip Y
    pub source_height: f64,
    /// Whether source Y grows downward
    pub flip_y: bool,
}

impl FitTransform {
    /// Identity mapping
    pub fn identity() -> Self {
        Self {
            scale: 1.0,
            offset_x: 0.0,
            offset_y: 0.0,
            source_height: 0.0,
            flip_y: false,
        }
    }

    /// Source point to plotter millimetres
    pub fn apply(&self, p: Point) -> Point {
        let y = if self.flip_y {
            self.source_height - p.y
        } else {
            p.y
        };
        Point::new(
            p.x * self.scale + self.offset_x,
            y * self.scale + self.offset_y,
        )
    }

    /// Plotter millimetres back to a source point
    pub fn invert(&self, p: Point) -> Point {
        let x = (p.x - self.offset_x) / self.scale;
        let y = (p.y - self.offset_y) / self.scale;
        let y = if self.flip_y {
            self.source_height - y
        } else {
            y
        };
        Point::new(x, y)
    }

    /// Map every point of every path
    pub fn apply_paths(&self, paths: &[Path]) -> Vec<Path> {
        paths
            .iter()
            .map(|path| path.map_points(|p| self.apply(p)))
            .collect()
    }
}

/// Largest aspect-preserving fit of a `source_width` x `source_height`
/// source into `bounds` shrunk by `margin`, centred.
pub fn fit_to_bounds(
    source_width: f64,
    source_height: f64,
    bounds: &Bounds,
    margin: f64,
    flip_y: bool,
) -> Result<FitTransform, InputError> {
    if source_width <= 0.0 || source_height <= 0.0 {
        return Err(InputError::InvalidSource {
            reason: format!(
                "source size {}x{} is empty",
                source_width, source_height
            ),
        });
    }

    let available_w = bounds.width() - 2.0 * margin;
    let available_h = bounds.height() - 2.0 * margin;
    if available_w <= 0.0 || available_h <= 0.0 {
        return Err(InputError::InvalidParameter {
            name: "margin_mm".to_string(),
            reason: format!("margin {} leaves no drawable area", margin),
        });
    }

    let scale = (available_w / source_width).min(available_h / source_height);
    Ok(FitTransform {
        scale,
        offset_x: bounds.min_x + margin + (available_w - source_width * scale) / 2.0,
        offset_y: bounds.min_y + margin + (available_h - source_height * scale) / 2.0,
        source_height,
        flip_y,
    })
}
