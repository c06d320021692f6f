//! Colour layer classification.
//!
//! Pixels of a reduced-resolution sample of the source image are bucketed
//! into a small fixed palette by an ordered rule list (first match wins,
//! darkest palette entry as the catch-all). Each path is then assigned to a
//! layer by a plurality vote over five samples taken along it.

use image::{imageops, DynamicImage, Rgb, RgbImage};
use plotterkit_core::{InputError, Path, Point};
use serde::{Deserialize, Serialize};

/// Pixels with every channel above this are background.
pub const DEFAULT_BACKGROUND_MIN: u8 = 240;
/// A dominant channel must exceed this value.
pub const DEFAULT_CHANNEL_MIN: u8 = 100;
/// A dominant channel must exceed both other channels by this margin.
pub const DEFAULT_DOMINANCE_MARGIN: u8 = 50;

/// Fractional positions along a path that vote on its colour
pub const SAMPLE_FRACTIONS: [f64; 5] = [0.0, 0.25, 0.5, 0.75, 1.0];

/// RGB channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Red channel.
    Red,
    /// Green channel.
    Green,
    /// Blue channel.
    Blue,
}

impl Channel {
    fn index(self) -> usize {
        match self {
            Channel::Red => 0,
            Channel::Green => 1,
            Channel::Blue => 2,
        }
    }
}

/// Classifier threshold constants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifierThresholds {
    /// Near-white threshold for background detection
    pub background_min: u8,
    /// Minimum value of a dominant channel
    pub channel_min: u8,
    /// Required lead of a dominant channel over the others
    pub dominance_margin: u8,
}

impl Default for ClassifierThresholds {
    fn default() -> Self {
        Self {
            background_min: DEFAULT_BACKGROUND_MIN,
            channel_min: DEFAULT_CHANNEL_MIN,
            dominance_margin: DEFAULT_DOMINANCE_MARGIN,
        }
    }
}

/// One drawable colour
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaletteEntry {
    /// Display name, also used in pen-change prompts
    pub name: String,
    /// Nominal colour
    pub rgb: [u8; 3],
    /// Channel whose dominance selects this entry; `None` for entries only
    /// reachable as the fallback
    pub dominant_channel: Option<Channel>,
}

impl PaletteEntry {
    /// Create a palette entry
    pub fn new(name: impl Into<String>, rgb: [u8; 3], dominant_channel: Option<Channel>) -> Self {
        Self {
            name: name.into(),
            rgb,
            dominant_channel,
        }
    }

    fn brightness(&self) -> u32 {
        self.rgb.iter().map(|&c| c as u32).sum()
    }
}

/// Red, green, blue and black
pub fn default_palette() -> Vec<PaletteEntry> {
    vec![
        PaletteEntry::new("red", [255, 0, 0], Some(Channel::Red)),
        PaletteEntry::new("green", [0, 255, 0], Some(Channel::Green)),
        PaletteEntry::new("blue", [0, 0, 255], Some(Channel::Blue)),
        PaletteEntry::new("black", [0, 0, 0], None),
    ]
}

/// Result of classifying one pixel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelClass {
    /// Near-white paper
    Background,
    /// Index into the classifier palette
    Color(usize),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Predicate {
    AllAbove(u8),
    Dominant {
        channel: Channel,
        min: u8,
        margin: u8,
    },
}

impl Predicate {
    fn matches(&self, rgb: [u8; 3]) -> bool {
        match *self {
            Predicate::AllAbove(threshold) => rgb.iter().all(|&c| c > threshold),
            Predicate::Dominant {
                channel,
                min,
                margin,
            } => {
                let i = channel.index();
                let value = rgb[i] as i16;
                value > min as i16
                    && rgb
                        .iter()
                        .enumerate()
                        .filter(|(j, _)| *j != i)
                        .all(|(_, &other)| value > other as i16 + margin as i16)
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Rule {
    predicate: Predicate,
    class: PixelClass,
}

/// A reduced-resolution copy of the source image.
///
/// `scale` is the number of source units (the coordinate space of the
/// paths being classified) covered by one sample pixel.
#[derive(Debug, Clone)]
pub struct PixelSample {
    /// Sampled pixels
    pub image: RgbImage,
    /// Source units per sample pixel
    pub scale: f64,
}

impl PixelSample {
    /// Wrap an image that is already in path coordinates
    pub fn new(image: RgbImage) -> Self {
        Self { image, scale: 1.0 }
    }

    /// Downsample `source` so its longer side is at most `max_dimension`
    /// pixels. Nearest-neighbour filtering keeps palette colours unblended.
    pub fn from_image(source: &DynamicImage, max_dimension: u32) -> Self {
        let rgb = source.to_rgb8();
        let (width, height) = rgb.dimensions();
        let longest = width.max(height);
        if max_dimension == 0 || longest <= max_dimension {
            return Self::new(rgb);
        }

        let scale = longest as f64 / max_dimension as f64;
        let w = ((width as f64 / scale).round() as u32).max(1);
        let h = ((height as f64 / scale).round() as u32).max(1);
        let image = imageops::resize(&rgb, w, h, imageops::FilterType::Nearest);
        tracing::debug!(
            "Downsampled {}x{} source to {}x{} for classification",
            width,
            height,
            w,
            h
        );
        Self {
            image,
            scale: width as f64 / w as f64,
        }
    }

    /// Pixel under a point in source coordinates, clamped to the image
    pub fn pixel_at(&self, p: &Point) -> Option<[u8; 3]> {
        let (width, height) = self.image.dimensions();
        if width == 0 || height == 0 {
            return None;
        }
        let x = (p.x / self.scale).floor().clamp(0.0, (width - 1) as f64) as u32;
        let y = (p.y / self.scale).floor().clamp(0.0, (height - 1) as f64) as u32;
        Some(self.image.get_pixel(x, y).0)
    }
}

/// Paths sharing one drawing colour
#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    /// Palette entry name
    pub color_name: String,
    /// Palette entry colour
    pub rgb: [u8; 3],
    /// Assigned paths, in input order
    pub paths: Vec<Path>,
    /// Sample pixels classified to this colour
    pub pixel_count: usize,
}

/// Ordered-rule pixel classifier with 5-point path voting
#[derive(Debug, Clone)]
pub struct ColorClassifier {
    palette: Vec<PaletteEntry>,
    rules: Vec<Rule>,
    fallback: usize,
}

impl ColorClassifier {
    /// Build the rule list for a palette.
    ///
    /// Rules are: background first, then one dominance rule per palette
    /// entry that names a channel, in palette order. The darkest entry is
    /// the fallback.
    pub fn new(
        palette: Vec<PaletteEntry>,
        thresholds: ClassifierThresholds,
    ) -> Result<Self, InputError> {
        let fallback = palette
            .iter()
            .enumerate()
            .min_by_key(|(_, entry)| entry.brightness())
            .map(|(i, _)| i)
            .ok_or_else(|| InputError::InvalidParameter {
                name: "palette".to_string(),
                reason: "palette is empty".to_string(),
            })?;

        let mut rules = vec![Rule {
            predicate: Predicate::AllAbove(thresholds.background_min),
            class: PixelClass::Background,
        }];
        rules.extend(palette.iter().enumerate().filter_map(|(i, entry)| {
            entry.dominant_channel.map(|channel| Rule {
                predicate: Predicate::Dominant {
                    channel,
                    min: thresholds.channel_min,
                    margin: thresholds.dominance_margin,
                },
                class: PixelClass::Color(i),
            })
        }));

        Ok(Self {
            palette,
            rules,
            fallback,
        })
    }

    /// The palette in use
    pub fn palette(&self) -> &[PaletteEntry] {
        &self.palette
    }

    /// Classify a single pixel
    pub fn classify_pixel(&self, rgb: [u8; 3]) -> PixelClass {
        self.rules
            .iter()
            .find(|rule| rule.predicate.matches(rgb))
            .map(|rule| rule.class)
            .unwrap_or(PixelClass::Color(self.fallback))
    }

    /// Palette name of a class, `None` for background
    pub fn class_name(&self, class: PixelClass) -> Option<&str> {
        match class {
            PixelClass::Background => None,
            PixelClass::Color(i) => self.palette.get(i).map(|e| e.name.as_str()),
        }
    }

    /// Palette index a path votes for, `None` when every sample is background
    pub fn classify_path(&self, path: &Path, sample: &PixelSample) -> Option<usize> {
        let classes: Vec<PixelClass> = sample_points(path.points())
            .iter()
            .filter_map(|p| sample.pixel_at(p))
            .map(|rgb| self.classify_pixel(rgb))
            .collect();
        plurality(&classes)
    }

    /// Group paths into layers in palette order, skipping colours with no
    /// assigned path.
    pub fn assign_layers(&self, paths: &[Path], sample: &PixelSample) -> Vec<Layer> {
        let mut assigned: Vec<Vec<Path>> = vec![Vec::new(); self.palette.len()];
        let mut discarded = 0usize;
        for path in paths {
            match self.classify_path(path, sample) {
                Some(i) => assigned[i].push(path.clone()),
                None => discarded += 1,
            }
        }
        if discarded > 0 {
            tracing::debug!("Discarded {} paths lying on background", discarded);
        }

        let counts = self.pixel_counts(sample);
        self.palette
            .iter()
            .zip(assigned)
            .zip(counts)
            .filter(|((_, paths), _)| !paths.is_empty())
            .map(|((entry, paths), pixel_count)| Layer {
                color_name: entry.name.clone(),
                rgb: entry.rgb,
                paths,
                pixel_count,
            })
            .collect()
    }

    /// Number of sample pixels in each palette class
    pub fn pixel_counts(&self, sample: &PixelSample) -> Vec<usize> {
        let mut counts = vec![0usize; self.palette.len()];
        for pixel in sample.image.pixels() {
            if let PixelClass::Color(i) = self.classify_pixel(pixel.0) {
                counts[i] += 1;
            }
        }
        counts
    }

    /// Display-only preview of one colour: matching pixels painted in the
    /// palette colour on a white canvas.
    pub fn render_preview(&self, sample: &PixelSample, color: usize) -> RgbImage {
        let (width, height) = sample.image.dimensions();
        let paint = self
            .palette
            .get(color)
            .map(|e| Rgb(e.rgb))
            .unwrap_or(Rgb([0, 0, 0]));
        let mut canvas = RgbImage::from_pixel(width, height, Rgb([255, 255, 255]));
        for (x, y, pixel) in sample.image.enumerate_pixels() {
            if self.classify_pixel(pixel.0) == PixelClass::Color(color) {
                canvas.put_pixel(x, y, paint);
            }
        }
        canvas
    }
}

/// Points at [`SAMPLE_FRACTIONS`] of a path, chosen by index
pub fn sample_points(points: &[Point]) -> Vec<Point> {
    if points.is_empty() {
        return Vec::new();
    }
    let last = points.len() - 1;
    SAMPLE_FRACTIONS
        .iter()
        .map(|f| points[((last as f64) * f).round() as usize])
        .collect()
}

/// Plurality vote over non-background samples. Ties go to the colour seen
/// first.
pub fn plurality(classes: &[PixelClass]) -> Option<usize> {
    let mut tally: Vec<(usize, usize)> = Vec::new();
    for class in classes {
        if let PixelClass::Color(i) = class {
            match tally.iter_mut().find(|(color, _)| color == i) {
                Some((_, votes)) => *votes += 1,
                None => tally.push((*i, 1)),
            }
        }
    }

    let mut best: Option<(usize, usize)> = None;
    for (color, votes) in tally {
        if best.is_none_or(|(_, top)| votes > top) {
            best = Some((color, votes));
        }
    }
    best.map(|(color, _)| color)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> ColorClassifier {
        ColorClassifier::new(default_palette(), ClassifierThresholds::default()).unwrap()
    }

    fn name(c: &ColorClassifier, rgb: [u8; 3]) -> Option<String> {
        c.class_name(c.classify_pixel(rgb)).map(str::to_string)
    }

    #[test]
    fn test_pixel_rules() {
        let c = classifier();
        assert_eq!(name(&c, [255, 0, 0]).as_deref(), Some("red"));
        assert_eq!(name(&c, [10, 200, 40]).as_deref(), Some("green"));
        assert_eq!(name(&c, [0, 0, 255]).as_deref(), Some("blue"));
        assert_eq!(c.classify_pixel([255, 255, 255]), PixelClass::Background);
        assert_eq!(name(&c, [0, 0, 0]).as_deref(), Some("black"));
    }

    #[test]
    fn test_weak_dominance_falls_back_to_darkest() {
        let c = classifier();
        // Red leads green by only 40.
        assert_eq!(name(&c, [200, 160, 0]).as_deref(), Some("black"));
        // Mid grey is neither background nor dominant.
        assert_eq!(name(&c, [128, 128, 128]).as_deref(), Some("black"));
    }

    #[test]
    fn test_thresholds_are_overridable() {
        let c = ColorClassifier::new(
            default_palette(),
            ClassifierThresholds {
                background_min: 100,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(c.classify_pixel([128, 128, 128]), PixelClass::Background);
    }

    #[test]
    fn test_empty_palette_rejected() {
        let err = ColorClassifier::new(Vec::new(), ClassifierThresholds::default()).unwrap_err();
        assert_eq!(err.code(), "input.invalid_parameter");
    }

    #[test]
    fn test_plurality_vote() {
        let red = PixelClass::Color(0);
        let black = PixelClass::Color(3);
        let bg = PixelClass::Background;
        assert_eq!(plurality(&[red, red, red, black, bg]), Some(0));
        assert_eq!(plurality(&[bg, bg, bg, bg, bg]), None);
        assert_eq!(plurality(&[black, red, red, black, bg]), Some(3));
    }

    #[test]
    fn test_sample_points_by_index() {
        let points: Vec<Point> = (0..9).map(|i| Point::new(i as f64, 0.0)).collect();
        let xs: Vec<f64> = sample_points(&points).iter().map(|p| p.x).collect();
        assert_eq!(xs, vec![0.0, 2.0, 4.0, 6.0, 8.0]);
    }

    #[test]
    fn test_preview_paints_matching_pixels() {
        let mut image = RgbImage::from_pixel(2, 1, Rgb([255, 255, 255]));
        image.put_pixel(1, 0, Rgb([250, 10, 10]));
        let c = classifier();
        let preview = c.render_preview(&PixelSample::new(image), 0);
        assert_eq!(preview.get_pixel(0, 0).0, [255, 255, 255]);
        assert_eq!(preview.get_pixel(1, 0).0, [255, 0, 0]);
    }
}
