use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use crossbeam_channel::bounded;
use gauntlet::{
    CameraConfig, CaptureSession, DetectionBuffer, LandmarkerOptions, OrtHandLandmarker,
    RetargetConfig, Retargeter, TrackerEvent, TrackerOptions, Viewport, has_camera, spawn_tracker,
};

const RUN_FOR: Duration = Duration::from_secs(20);
const VIEWPORT: Viewport = Viewport {
    width: 4.0,
    height: 3.0,
};

fn main() -> Result<()> {
    env_logger::init();

    if !has_camera()? {
        bail!("no camera device found");
    }

    let (frame_tx, frame_rx) = bounded(1);
    let mut session = CaptureSession::new();
    session.acquire(&CameraConfig::default(), frame_tx)?;

    let buffer = DetectionBuffer::new();
    let options = LandmarkerOptions::default();
    let handle = spawn_tracker(
        move || OrtHandLandmarker::new(options),
        frame_rx,
        buffer.clone(),
        TrackerOptions::default(),
    );

    println!("Staging models and building sessions...");
    match handle.events().recv_timeout(Duration::from_secs(300)) {
        Ok(TrackerEvent::Ready) => println!("Tracking; wave a hand at the camera"),
        Ok(TrackerEvent::Failed(err)) => return Err(err.into()),
        Ok(other) => bail!("unexpected event before readiness: {other:?}"),
        Err(_) => bail!("landmarker did not come up in time"),
    }

    let mut retargeter = Retargeter::new(RetargetConfig::default());
    let started = Instant::now();
    let mut last_line = Instant::now();
    while started.elapsed() < RUN_FOR {
        while let Ok(event) = handle.events().try_recv() {
            if let TrackerEvent::Fps(rate) = event {
                println!("{rate:.1} detections/s");
            }
        }

        let snapshot = buffer.snapshot();
        let pose = retargeter.update(snapshot.as_deref(), VIEWPORT);
        if pose.visible && last_line.elapsed() >= Duration::from_secs(1) {
            println!(
                "hand at ({:+.2}, {:+.2}, {:+.2}), mirror {:+.0}",
                pose.root.position.x, pose.root.position.y, pose.root.position.z, pose.root.scale.x
            );
            last_line = Instant::now();
        }

        // Render cadence stand-in.
        thread::sleep(Duration::from_millis(33));
    }

    session.release();
    Ok(())
}
