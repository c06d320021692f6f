use image::{Rgb, RgbImage};
use plotterkit_core::{InputError, Path, Point};
use plotterkit_designer::{
    default_palette, ClassifierThresholds, ColorClassifier, DrawingPipeline, Glyph, GlyphMap,
    PixelSample, TextLayout,
};

fn classifier() -> ColorClassifier {
    ColorClassifier::new(default_palette(), ClassifierThresholds::default()).unwrap()
}

#[test]
fn test_path_vote_red_beats_black() {
    // Columns 0..=6 red, 7..=8 black, 9 and beyond white.
    let mut image = RgbImage::from_pixel(20, 1, Rgb([255, 255, 255]));
    for x in 0..=6 {
        image.put_pixel(x, 0, Rgb([255, 0, 0]));
    }
    for x in 7..=8 {
        image.put_pixel(x, 0, Rgb([0, 0, 0]));
    }
    let sample = PixelSample::new(image);

    // Nine points sampled at indices 0, 2, 4, 6, 8 -> red, red, red, black, white
    let xs = [0.0, 1.0, 2.0, 3.0, 5.0, 6.0, 7.0, 8.0, 12.0];
    let path = Path::new(xs.iter().map(|&x| Point::new(x, 0.0)).collect()).unwrap();

    let c = classifier();
    assert_eq!(c.classify_path(&path, &sample), Some(0));
}

#[test]
fn test_all_background_path_is_discarded() {
    let sample = PixelSample::new(RgbImage::from_pixel(10, 10, Rgb([250, 250, 250])));
    let path = Path::new(vec![Point::new(1.0, 1.0), Point::new(8.0, 8.0)]).unwrap();

    let c = classifier();
    assert_eq!(c.classify_path(&path, &sample), None);
    assert!(c.assign_layers(&[path], &sample).is_empty());
}

#[test]
fn test_downsampled_sample_maps_source_coordinates() {
    let mut image = RgbImage::from_pixel(400, 200, Rgb([255, 255, 255]));
    for x in 200..400 {
        for y in 0..200 {
            image.put_pixel(x, y, Rgb([0, 0, 220]));
        }
    }
    let sample = PixelSample::from_image(&image::DynamicImage::ImageRgb8(image), 100);
    assert_eq!(sample.image.dimensions(), (100, 50));
    assert_eq!(sample.scale, 4.0);

    let path = Path::new(vec![Point::new(250.0, 20.0), Point::new(390.0, 180.0)]).unwrap();
    assert_eq!(classifier().classify_path(&path, &sample), Some(2));
}

#[test]
fn test_text_program() {
    let mut font = GlyphMap::new();
    font.insert(
        'T',
        Glyph {
            strokes: vec![
                vec![Point::new(0.0, 1.0), Point::new(0.6, 1.0)],
                vec![Point::new(0.3, 1.0), Point::new(0.3, 0.0)],
            ],
            advance: 0.7,
        },
    );

    let pipeline = DrawingPipeline::default();
    let program = pipeline
        .text_program("TT", &font, &TextLayout::default())
        .unwrap();
    assert_eq!(program.stats.path_count, 4);

    let err = pipeline
        .text_program("??", &font, &TextLayout::default())
        .unwrap_err();
    assert_eq!(err, InputError::NoDrawablePaths);
}
