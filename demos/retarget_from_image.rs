use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use gauntlet::{
    Frame, HandLandmarker, JointTable, LandmarkerOptions, ModelKind, OrtHandLandmarker,
    RetargetConfig, Retargeter, Viewport, ensure_model_ready_with_progress,
};

/// How many render frames to simulate; enough for the joint smoothing to
/// settle onto the detected pose.
const SETTLE_FRAMES: usize = 30;

fn main() -> Result<()> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let input_image = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("demo/hand.png"));

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

    let detection = landmarker
        .detect(&frame, frame.timestamp)
        .context("detection failed")?;
    println!(
        "Detected {} hand(s) on {}",
        detection.hands.len(),
        input_image.display()
    );

    // A rig stand-in: every canonical node "exists" under its own name.
    let table = JointTable::default();
    let rig_map = table.resolve(|name| Some(name.to_string()))?;

    let viewport = Viewport {
        width: 2.0 * width as f32 / height as f32,
        height: 2.0,
    };
    let mut retargeter = Retargeter::new(RetargetConfig {
        table,
        ..RetargetConfig::default()
    });
    for _ in 0..SETTLE_FRAMES {
        retargeter.update(Some(&detection), viewport);
    }

    let pose = retargeter.pose();
    if !pose.visible {
        println!("No hand to retarget");
        return Ok(());
    }

    println!(
        "Root: position ({:.3}, {:.3}, {:.3}), scale x {:+.1}",
        pose.root.position.x, pose.root.position.y, pose.root.position.z, pose.root.scale.x
    );
    let (axis, angle) = pose.root.rotation.to_axis_angle();
    println!(
        "      rotation {:.1} deg about ({:.2}, {:.2}, {:.2})",
        angle.to_degrees(),
        axis.x,
        axis.y,
        axis.z
    );

    for joint in &pose.joints {
        let node = rig_map
            .node(joint.landmark)
            .map(String::as_str)
            .unwrap_or("<unmapped>");
        let (_, angle) = joint.rotation.to_axis_angle();
        println!("{node:>12}: {:6.1} deg from bind", angle.to_degrees());
    }

    Ok(())
}
