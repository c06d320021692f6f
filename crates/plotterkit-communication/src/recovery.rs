//! Position tracking and recovery programs
//!
//! The link follows the tool by reading the X/Y/Z words of every
//! acknowledged line. After a failed stream the last known position and the
//! last acknowledged line index survive, and a short safe program can bring
//! the device back to the origin. Recovery never resumes the aborted job.

use plotterkit_core::program::COMMENT_MARKER;
use plotterkit_core::Position;
use serde::{Deserialize, Serialize};

/// Where the device was when the last line was acknowledged
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RecoveryPoint {
    /// X position (mm)
    pub x: f64,
    /// Y position (mm)
    pub y: f64,
    /// Z (pen) position (mm)
    pub z: f64,
    /// 0-based index of the last acknowledged line of the last stream
    pub last_successful_line: Option<usize>,
}

impl RecoveryPoint {
    /// Tool position
    pub fn position(&self) -> Position {
        Position::new(self.x, self.y, self.z)
    }
}

/// Follows the tool position through acknowledged program lines
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PositionTracker {
    position: Position,
    relative: bool,
}

impl PositionTracker {
    /// Start from a known position in absolute mode
    pub fn new(position: Position) -> Self {
        Self {
            position,
            relative: false,
        }
    }

    /// Current position
    pub fn position(&self) -> Position {
        self.position
    }

    /// Apply one acknowledged line
    pub fn apply(&mut self, line: &str) {
        let code = match line.find(COMMENT_MARKER) {
            Some(i) => &line[..i],
            None => line,
        };

        let mut x = None;
        let mut y = None;
        let mut z = None;
        for word in code.split_whitespace() {
            let mut chars = word.chars();
            let Some(letter) = chars.next() else {
                continue;
            };
            let value = chars.as_str();
            match letter.to_ascii_uppercase() {
                'G' => match value.parse::<f64>().ok().map(|v| v as i64) {
                    Some(90) => self.relative = false,
                    Some(91) => self.relative = true,
                    _ => {}
                },
                'X' => x = value.parse::<f64>().ok(),
                'Y' => y = value.parse::<f64>().ok(),
                'Z' => z = value.parse::<f64>().ok(),
                _ => {}
            }
        }

        let relative = self.relative;
        let update = |current: &mut f64, word: Option<f64>| {
            if let Some(v) = word {
                if relative {
                    *current += v;
                } else {
                    *current = v;
                }
            }
        };
        update(&mut self.position.x, x);
        update(&mut self.position.y, y);
        update(&mut self.position.z, z);
    }
}

/// Parameters of the safe-return program
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecoveryPlan {
    /// Pen-up Z height
    pub pen_up_z: f64,
    /// Conservative feed rate for the return move (mm/min)
    pub feed_rate: f64,
}

impl Default for RecoveryPlan {
    fn default() -> Self {
        Self {
            pen_up_z: 5.0,
            feed_rate: 500.0,
        }
    }
}

/// Lines that raise the pen if needed and return to the origin
pub fn recovery_program(point: &RecoveryPoint, plan: &RecoveryPlan) -> Vec<String> {
    let mut lines = vec!["G90".to_string()];
    if point.z < plan.pen_up_z {
        lines.push(format!("G0 Z{:.3}", plan.pen_up_z));
    }
    lines.push(format!("G1 X0 Y0 F{:.0}", plan.feed_rate));
    lines
}
