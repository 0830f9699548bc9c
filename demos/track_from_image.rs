use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result, anyhow};
use gauntlet::{
    Frame, HandLandmarker, LandmarkerOptions, ModelKind, OrtHandLandmarker,
    ensure_model_ready_with_progress, overlay, types::landmark,
};
use image::RgbaImage;

fn main() -> Result<()> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let input_image = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("demo/hand.png"));
    let output_image = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("demo/image_with_landmarks.png"));

    let options = LandmarkerOptions::default();
    ensure_model_ready_with_progress(ModelKind::PalmDetector, &options.palm_model)?;
    ensure_model_ready_with_progress(ModelKind::HandLandmarker, &options.landmark_model)?;
    let mut landmarker = OrtHandLandmarker::new(options)?;

    let image = image::open(&input_image)
        .with_context(|| format!("failed to open image {}", input_image.display()))?
        .to_rgba8();
    let (width, height) = image.dimensions();
    let frame = Frame {
        rgba: image.into_raw(),
        width,
        height,
        timestamp: Instant::now(),
    };

    println!("Running detection on {}", input_image.display());
    let detection = landmarker
        .detect(&frame, frame.timestamp)
        .context("detection failed")?;

    if detection.hands.is_empty() {
        println!("No hands found");
    }
    for (idx, hand) in detection.hands.iter().enumerate() {
        let wrist = hand.landmark(landmark::WRIST);
        println!(
            "Hand {idx}: {:?}, score {:.3}, wrist at {:?}",
            hand.handedness,
            hand.score,
            wrist.map(|lm| (lm.x, lm.y))
        );
    }

    let mut canvas = frame.rgba.clone();
    overlay::draw_detection(&mut canvas, width, height, &detection);
    let annotated = RgbaImage::from_raw(width, height, canvas)
        .ok_or_else(|| anyhow!("annotated buffer has the wrong size"))?;
    annotated
        .save(&output_image)
        .with_context(|| format!("failed to save {}", output_image.display()))?;

    println!("Wrote {}", output_image.display());
    Ok(())
}
