//! End-to-end conversion of drawing sources into motion programs.
//!
//! Traced outlines and canvas strokes arrive in source coordinates. They are
//! simplified in source units (tolerances are converted through the fit
//! scale), optionally split into colour layers against the source pixels,
//! then mapped into plotter millimetres and handed to the generator. Text is
//! laid out directly in millimetres.

use plotterkit_core::{InputError, Path, Point};

use crate::fit::{fit_to_bounds, FitTransform};
use crate::gcode_gen::{GeneratorConfig, MotionProgram, ProgramGenerator};
use crate::layers::{ColorClassifier, Layer, PixelSample};
use crate::simplify::{PathSimplifier, SimplifyOptions};
use crate::text::{layout_text, GlyphSource, TextLayout};

/// Settings shared by every conversion
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    /// Simplification in millimetres
    pub simplify: SimplifyOptions,
    /// Program generation
    pub generator: GeneratorConfig,
    /// Blank border kept inside the working area (mm)
    pub margin_mm: f64,
}

/// Converts sources to motion programs
#[derive(Debug, Clone, Default)]
pub struct DrawingPipeline {
    config: PipelineConfig,
}

impl DrawingPipeline {
    /// Create a pipeline
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Active settings
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Fit transform for a source of the given size
    pub fn fit(&self, source_width: f64, source_height: f64) -> Result<FitTransform, InputError> {
        fit_to_bounds(
            source_width,
            source_height,
            &self.config.generator.bounds,
            self.config.margin_mm,
            true,
        )
    }

    /// Simplify raw sequences in source units, returning source-space paths
    pub fn simplify_source<S>(&self, raw: &[S], transform: &FitTransform) -> Vec<Path>
    where
        S: AsRef<[Point]>,
    {
        let options = self.config.simplify.in_source_units(transform.scale);
        PathSimplifier::new(options).simplify_all(raw)
    }

    /// Single-colour program from traced outlines or canvas strokes
    pub fn trace_program<S>(
        &self,
        raw: &[S],
        source_width: f64,
        source_height: f64,
    ) -> Result<MotionProgram, InputError>
    where
        S: AsRef<[Point]>,
    {
        let transform = self.fit(source_width, source_height)?;
        let paths = self.simplify_source(raw, &transform);
        if paths.is_empty() {
            return Err(InputError::NoDrawablePaths);
        }
        ProgramGenerator::new(self.config.generator).generate(&transform.apply_paths(&paths))
    }

    /// Layered program from traced outlines and the source pixels.
    ///
    /// Returns the per-colour layers (in millimetres) alongside the program
    /// so callers can show previews and counts.
    pub fn layered_program<S>(
        &self,
        raw: &[S],
        source_width: f64,
        source_height: f64,
        sample: &PixelSample,
        classifier: &ColorClassifier,
    ) -> Result<(MotionProgram, Vec<Layer>), InputError>
    where
        S: AsRef<[Point]>,
    {
        let transform = self.fit(source_width, source_height)?;
        let paths = self.simplify_source(raw, &transform);
        if paths.is_empty() {
            return Err(InputError::NoDrawablePaths);
        }

        let layers: Vec<Layer> = classifier
            .assign_layers(&paths, sample)
            .into_iter()
            .map(|layer| Layer {
                paths: transform.apply_paths(&layer.paths),
                ..layer
            })
            .collect();
        for layer in &layers {
            tracing::info!(
                "Layer {}: {} paths, {} pixels",
                layer.color_name,
                layer.paths.len(),
                layer.pixel_count
            );
        }

        let program = ProgramGenerator::new(self.config.generator).generate_layers(&layers)?;
        Ok((program, layers))
    }

    /// Program for text laid out with a glyph source
    pub fn text_program<G>(
        &self,
        text: &str,
        glyphs: &G,
        layout: &TextLayout,
    ) -> Result<MotionProgram, InputError>
    where
        G: GlyphSource + ?Sized,
    {
        let strokes = layout_text(text, glyphs, layout);
        let paths = PathSimplifier::new(SimplifyOptions {
            remove_noise: false,
            ..self.config.simplify
        })
        .simplify_all(&strokes);
        if paths.is_empty() {
            return Err(InputError::NoDrawablePaths);
        }
        ProgramGenerator::new(self.config.generator).generate(&paths)
    }
}
