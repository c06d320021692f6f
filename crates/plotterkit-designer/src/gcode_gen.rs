//! Motion program generation.
//!
//! Turns simplified paths (optionally grouped into colour layers) into an
//! ordered instruction sequence for the plotter plus distance and time
//! statistics, and renders that sequence as G-code text.

use plotterkit_core::program::is_transmittable;
use plotterkit_core::{Bounds, InputError, Path, Point};
use serde::{Deserialize, Serialize};

use crate::layers::Layer;

/// One motion instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Instruction {
    /// Travel with the pen raised
    Move {
        /// Target X (mm).
        x: f64,
        /// Target Y (mm).
        y: f64,
    },
    /// Feed move with the pen lowered
    Draw {
        /// Target X (mm).
        x: f64,
        /// Target Y (mm).
        y: f64,
    },
    /// Raise the pen
    PenUp,
    /// Lower the pen
    PenDown,
    /// Set the drawing feed rate (mm/min)
    SetFeed {
        /// Feed rate.
        rate: f64,
    },
    /// Informational comment, never transmitted
    Comment {
        /// Comment text.
        text: String,
    },
    /// Stop until the operator resumes, e.g. for a pen change
    Pause {
        /// Prompt shown to the operator.
        message: String,
    },
    /// A program line passed through verbatim
    Raw {
        /// The line.
        line: String,
    },
}

/// Distance and time statistics of a program
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ProgramStats {
    /// Number of drawn paths
    pub path_count: usize,
    /// Number of transmittable program lines
    pub line_count: usize,
    /// Pen-down distance (mm)
    pub drawing_distance: f64,
    /// Pen-up travel distance (mm)
    pub move_distance: f64,
    /// Sum of drawing and travel distance (mm)
    pub total_distance: f64,
    /// `total_distance / feed_rate`, in minutes
    pub estimated_time_min: f64,
}

impl ProgramStats {
    /// Human readable estimate
    pub fn estimate_display(&self) -> String {
        format_estimate(self.estimated_time_min)
    }
}

/// Render a time estimate, using seconds below one minute
pub fn format_estimate(minutes: f64) -> String {
    if minutes < 1.0 {
        format!("{:.0} s", (minutes * 60.0).max(0.0))
    } else {
        format!("{:.1} min", minutes)
    }
}

/// Generator settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Drawing feed rate (mm/min)
    pub feed_rate: f64,
    /// Z height with the pen raised
    pub pen_up_z: f64,
    /// Z height with the pen touching paper
    pub pen_down_z: f64,
    /// Plotter working area; drawing points are clamped into it
    pub bounds: Bounds,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            feed_rate: 1500.0,
            pen_up_z: 5.0,
            pen_down_z: 0.0,
            bounds: Bounds::default(),
        }
    }
}

impl GeneratorConfig {
    /// Check generation parameters
    pub fn validate(&self) -> Result<(), InputError> {
        if self.feed_rate.is_nan() || self.feed_rate <= 0.0 {
            return Err(InputError::InvalidParameter {
                name: "feed_rate".to_string(),
                reason: format!("must be positive, got {}", self.feed_rate),
            });
        }
        if self.pen_down_z >= self.pen_up_z {
            return Err(InputError::InvalidParameter {
                name: "pen_down_z".to_string(),
                reason: format!(
                    "pen-down Z {} must be below pen-up Z {}",
                    self.pen_down_z, self.pen_up_z
                ),
            });
        }
        if self.bounds.width() <= 0.0 || self.bounds.height() <= 0.0 {
            return Err(InputError::InvalidParameter {
                name: "bounds".to_string(),
                reason: "working area must have positive size".to_string(),
            });
        }
        Ok(())
    }
}

/// A complete program for one job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionProgram {
    /// Ordered instructions
    pub instructions: Vec<Instruction>,
    /// Statistics
    pub stats: ProgramStats,
    /// Pen-up Z used when rendering
    pub pen_up_z: f64,
    /// Pen-down Z used when rendering
    pub pen_down_z: f64,
}

impl MotionProgram {
    /// Wrap existing program text.
    ///
    /// Comment lines become comments, everything else passes through
    /// verbatim. Distances are not known for imported text.
    pub fn from_text(text: &str, pen_up_z: f64, pen_down_z: f64) -> Self {
        let instructions: Vec<Instruction> = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(|l| match l.strip_prefix(plotterkit_core::program::COMMENT_MARKER) {
                Some(text) => Instruction::Comment {
                    text: text.trim().to_string(),
                },
                None => Instruction::Raw {
                    line: l.to_string(),
                },
            })
            .collect();

        let mut program = Self {
            instructions,
            stats: ProgramStats::default(),
            pen_up_z,
            pen_down_z,
        };
        program.stats.line_count = program.transmittable_count();
        program
    }

    /// Render as G-code lines
    pub fn to_lines(&self) -> Vec<String> {
        let mut lines = Vec::with_capacity(self.instructions.len() + 2);
        let mut pending_feed: Option<f64> = None;
        let mut feed = None;

        for instruction in &self.instructions {
            match instruction {
                Instruction::Move { x, y } => lines.push(format!("G0 X{:.3} Y{:.3}", x, y)),
                Instruction::Draw { x, y } => match pending_feed.take() {
                    Some(rate) => lines.push(format!("G1 X{:.3} Y{:.3} F{:.0}", x, y, rate)),
                    None => lines.push(format!("G1 X{:.3} Y{:.3}", x, y)),
                },
                Instruction::PenUp => lines.push(format!("G0 Z{:.3}", self.pen_up_z)),
                Instruction::PenDown => match feed {
                    Some(rate) => lines.push(format!("G1 Z{:.3} F{:.0}", self.pen_down_z, rate)),
                    None => lines.push(format!("G1 Z{:.3}", self.pen_down_z)),
                },
                Instruction::SetFeed { rate } => {
                    pending_feed = Some(*rate);
                    feed = Some(*rate);
                }
                Instruction::Comment { text } => lines.push(format!("; {}", text)),
                Instruction::Pause { message } => lines.push(format!("M0 ; {}", message)),
                Instruction::Raw { line } => lines.push(line.clone()),
            }
        }
        lines
    }

    /// Render as newline-terminated G-code text
    pub fn to_gcode(&self) -> String {
        let mut out = String::new();
        for line in self.to_lines() {
            out.push_str(&line);
            out.push('\n');
        }
        out
    }

    /// Number of lines that will actually be sent
    pub fn transmittable_count(&self) -> usize {
        self.to_lines().iter().filter(|l| is_transmittable(l)).count()
    }
}

/// Builds motion programs from simplified paths
#[derive(Debug, Clone, Default)]
pub struct ProgramGenerator {
    config: GeneratorConfig,
}

struct Builder<'a> {
    config: &'a GeneratorConfig,
    instructions: Vec<Instruction>,
    position: Point,
    drawing: f64,
    travel: f64,
    paths: usize,
    clamped: usize,
}

impl<'a> Builder<'a> {
    fn new(config: &'a GeneratorConfig) -> Self {
        let instructions = vec![
            Instruction::Raw {
                line: "G21".to_string(),
            },
            Instruction::Raw {
                line: "G90".to_string(),
            },
            Instruction::PenUp,
            Instruction::SetFeed {
                rate: config.feed_rate,
            },
        ];
        Self {
            config,
            instructions,
            position: Point::default(),
            drawing: 0.0,
            travel: 0.0,
            paths: 0,
            clamped: 0,
        }
    }

    fn clamp(&mut self, p: Point) -> Point {
        let clamped = self.config.bounds.clamp(p);
        if clamped != p {
            self.clamped += 1;
        }
        clamped
    }

    fn travel_to(&mut self, target: Point) {
        self.travel += self.position.distance_to(&target);
        self.position = target;
        self.instructions.push(Instruction::Move {
            x: target.x,
            y: target.y,
        });
    }

    fn path(&mut self, path: &Path) {
        self.paths += 1;
        self.instructions.push(Instruction::Comment {
            text: format!("Path {}", self.paths),
        });

        let start = self.clamp(path.start());
        self.travel_to(start);
        self.instructions.push(Instruction::PenDown);
        for p in &path.points()[1..] {
            let target = self.clamp(*p);
            self.drawing += self.position.distance_to(&target);
            self.position = target;
            self.instructions.push(Instruction::Draw {
                x: target.x,
                y: target.y,
            });
        }
        self.instructions.push(Instruction::PenUp);
    }

    fn finish(mut self) -> MotionProgram {
        self.travel_to(Point::default());

        if self.clamped > 0 {
            tracing::warn!(
                "Clamped {} points outside the {:.1}x{:.1}mm working area",
                self.clamped,
                self.config.bounds.width(),
                self.config.bounds.height()
            );
        }

        let total = self.drawing + self.travel;
        let mut program = MotionProgram {
            instructions: self.instructions,
            stats: ProgramStats {
                path_count: self.paths,
                line_count: 0,
                drawing_distance: self.drawing,
                move_distance: self.travel,
                total_distance: total,
                estimated_time_min: total / self.config.feed_rate,
            },
            pen_up_z: self.config.pen_up_z,
            pen_down_z: self.config.pen_down_z,
        };
        program.stats.line_count = program.transmittable_count();
        tracing::info!(
            "Generated program: {} paths, {} lines, {:.1}mm total, ~{}",
            program.stats.path_count,
            program.stats.line_count,
            program.stats.total_distance,
            program.stats.estimate_display()
        );
        program
    }
}

impl ProgramGenerator {
    /// Create a generator
    pub fn new(config: GeneratorConfig) -> Self {
        Self { config }
    }

    /// Active settings
    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Generate a single-colour program.
    ///
    /// Fails with [`InputError::NoDrawablePaths`] when `paths` is empty.
    pub fn generate(&self, paths: &[Path]) -> Result<MotionProgram, InputError> {
        self.config.validate()?;
        if paths.is_empty() {
            return Err(InputError::NoDrawablePaths);
        }

        let mut builder = Builder::new(&self.config);
        for path in paths {
            builder.path(path);
        }
        Ok(builder.finish())
    }

    /// Generate a layered program with a pen-change pause between layers.
    ///
    /// Layers without paths are skipped; fails when no layer has a path.
    pub fn generate_layers(&self, layers: &[Layer]) -> Result<MotionProgram, InputError> {
        self.config.validate()?;
        let drawable: Vec<&Layer> = layers.iter().filter(|l| !l.paths.is_empty()).collect();
        if drawable.is_empty() {
            return Err(InputError::NoDrawablePaths);
        }

        let mut builder = Builder::new(&self.config);
        for (i, layer) in drawable.iter().enumerate() {
            if i > 0 {
                builder.travel_to(Point::default());
                builder.instructions.push(Instruction::Pause {
                    message: format!("Change pen to {}", layer.color_name),
                });
            }
            builder.instructions.push(Instruction::Comment {
                text: format!("Layer {} ({} paths)", layer.color_name, layer.paths.len()),
            });
            for path in &layer.paths {
                builder.path(path);
            }
        }
        Ok(builder.finish())
    }
}
