//! # PlotterKit Designer
//!
//! Turns drawing sources into motion programs for the plotter:
//! - Geometry simplification (Douglas-Peucker with noise removal)
//! - Colour layer classification of traced paths
//! - Motion program generation and G-code rendering
//! - Fitting source coordinates to the working area and laying out text

pub mod fit;
pub mod gcode_gen;
pub mod layers;
pub mod pipeline;
pub mod simplify;
pub mod text;

pub use fit::{fit_to_bounds, FitTransform};
pub use gcode_gen::{
    format_estimate, GeneratorConfig, Instruction, MotionProgram, ProgramGenerator, ProgramStats,
};
pub use layers::{
    default_palette, Channel, ClassifierThresholds, ColorClassifier, Layer, PaletteEntry,
    PixelClass, PixelSample,
};
pub use pipeline::{DrawingPipeline, PipelineConfig};
pub use simplify::{douglas_peucker, PathSimplifier, SimplifyOptions};
pub use text::{layout_text, Glyph, GlyphMap, GlyphSource, TextLayout};
