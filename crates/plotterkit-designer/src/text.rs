//! Text layout from single-line glyph strokes.
//!
//! Glyph shapes come from an external font store. Each glyph is a set of
//! stroke polylines in em units (baseline at y = 0, y up) plus an advance
//! width.

use plotterkit_core::{InputError, Point};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Fallback advance for whitespace the font does not define (em)
const SPACE_ADVANCE_EM: f64 = 0.5;

/// Stroke paths and advance width of one character
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Glyph {
    /// Stroke polylines in em units
    pub strokes: Vec<Vec<Point>>,
    /// Horizontal advance in em units
    pub advance: f64,
}

/// Character to glyph lookup
pub trait GlyphSource {
    /// Glyph for `ch`, if the font defines it
    fn glyph(&self, ch: char) -> Option<&Glyph>;
}

/// In-memory glyph table
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GlyphMap {
    glyphs: HashMap<char, Glyph>,
}

impl GlyphMap {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON object mapping characters to glyphs
    pub fn from_json(json: &str) -> Result<Self, InputError> {
        serde_json::from_str(json).map_err(|e| InputError::InvalidSource {
            reason: format!("glyph table: {}", e),
        })
    }

    /// Add or replace a glyph
    pub fn insert(&mut self, ch: char, glyph: Glyph) {
        self.glyphs.insert(ch, glyph);
    }

    /// Number of glyphs
    pub fn len(&self) -> usize {
        self.glyphs.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.glyphs.is_empty()
    }
}

impl GlyphSource for GlyphMap {
    fn glyph(&self, ch: char) -> Option<&Glyph> {
        self.glyphs.get(&ch)
    }
}

/// Placement of laid-out text
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TextLayout {
    /// Em size (mm)
    pub size_mm: f64,
    /// Extra space after each character (mm)
    pub letter_spacing_mm: f64,
    /// Baseline distance as a multiple of the em size
    pub line_height: f64,
    /// Baseline start of the first line (mm)
    pub origin: Point,
}

impl Default for TextLayout {
    fn default() -> Self {
        Self {
            size_mm: 10.0,
            letter_spacing_mm: 1.0,
            line_height: 1.4,
            origin: Point::new(10.0, 100.0),
        }
    }
}

/// Lay out `text` as raw stroke polylines in millimetres.
///
/// Characters missing from `source` are skipped, except whitespace which
/// still advances. `'\n'` moves to the next line below.
pub fn layout_text<G>(text: &str, source: &G, layout: &TextLayout) -> Vec<Vec<Point>>
where
    G: GlyphSource + ?Sized,
{
    let mut strokes = Vec::new();
    let mut cursor = layout.origin;
    let mut skipped = 0usize;

    for ch in text.chars() {
        if ch == '\n' {
            cursor.x = layout.origin.x;
            cursor.y -= layout.size_mm * layout.line_height;
            continue;
        }

        let Some(glyph) = source.glyph(ch) else {
            if ch.is_whitespace() {
                cursor.x += SPACE_ADVANCE_EM * layout.size_mm + layout.letter_spacing_mm;
            } else {
                skipped += 1;
                tracing::warn!("No glyph for {:?}, skipping", ch);
            }
            continue;
        };

        for stroke in &glyph.strokes {
            strokes.push(
                stroke
                    .iter()
                    .map(|p| {
                        Point::new(
                            cursor.x + p.x * layout.size_mm,
                            cursor.y + p.y * layout.size_mm,
                        )
                    })
                    .collect(),
            );
        }
        cursor.x += glyph.advance * layout.size_mm + layout.letter_spacing_mm;
    }

    if skipped > 0 {
        tracing::debug!("Skipped {} characters without glyphs", skipped);
    }
    strokes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn font() -> GlyphMap {
        GlyphMap::from_json(
            r#"{
                "I": {"strokes": [[{"x": 0.0, "y": 0.0}, {"x": 0.0, "y": 1.0}]], "advance": 0.3},
                "L": {"strokes": [[{"x": 0.0, "y": 1.0}, {"x": 0.0, "y": 0.0}, {"x": 0.5, "y": 0.0}]], "advance": 0.6}
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_layout_advances_cursor() {
        let layout = TextLayout {
            size_mm: 10.0,
            letter_spacing_mm: 1.0,
            line_height: 1.5,
            origin: Point::new(0.0, 50.0),
        };
        let strokes = layout_text("IL", &font(), &layout);
        assert_eq!(strokes.len(), 2);
        assert_eq!(strokes[0], vec![Point::new(0.0, 50.0), Point::new(0.0, 60.0)]);
        // 0.3em advance + 1mm spacing
        assert_eq!(strokes[1][0], Point::new(4.0, 60.0));
    }

    #[test]
    fn test_unknown_characters_are_skipped() {
        let strokes = layout_text("I?I", &font(), &TextLayout::default());
        assert_eq!(strokes.len(), 2);
        assert_eq!(strokes[0][0].x, strokes[1][0].x - 4.0);
    }

    #[test]
    fn test_newline_and_space() {
        let layout = TextLayout {
            size_mm: 10.0,
            letter_spacing_mm: 0.0,
            line_height: 2.0,
            origin: Point::new(0.0, 100.0),
        };
        let strokes = layout_text("I I\nI", &font(), &layout);
        assert_eq!(strokes.len(), 3);
        assert_eq!(strokes[1][0], Point::new(8.0, 100.0));
        assert_eq!(strokes[2][0], Point::new(0.0, 80.0));
    }

    #[test]
    fn test_bad_glyph_json() {
        let err = GlyphMap::from_json("[1, 2]").unwrap_err();
        assert_eq!(err.code(), "input.invalid_source");
    }
}
