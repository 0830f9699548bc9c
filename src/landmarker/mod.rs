mod anchors;
mod common;
mod engine;
mod palm;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded, unbounded};

use crate::buffer::DetectionBuffer;
use crate::error::Error;
use crate::fps::FpsCounter;
use crate::model::ModelKind;
use crate::overlay;
use crate::types::{Detection, Frame};

pub use engine::OrtHandLandmarker;
pub use palm::{PalmDetector, PalmDetectorConfig, PalmRegion};

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A hand detector the tracking loop can drive. One call per processed
/// frame; an error fails that tick only.
pub trait HandLandmarker: Send + 'static {
    fn detect(&mut self, frame: &Frame, timestamp: Instant) -> anyhow::Result<Detection>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delegate {
    Cpu,
    Gpu,
}

#[derive(Clone, Debug)]
pub struct LandmarkerOptions {
    pub num_hands: usize,
    pub min_detection_confidence: f32,
    pub min_presence_confidence: f32,
    pub min_tracking_confidence: f32,
    pub delegate: Delegate,
    pub palm_model: PathBuf,
    pub landmark_model: PathBuf,
}

impl Default for LandmarkerOptions {
    fn default() -> Self {
        Self {
            num_hands: 2,
            min_detection_confidence: 0.5,
            min_presence_confidence: 0.5,
            min_tracking_confidence: 0.5,
            delegate: Delegate::Gpu,
            palm_model: ModelKind::PalmDetector.default_path(),
            landmark_model: ModelKind::HandLandmarker.default_path(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct TrackerOptions {
    /// Emit frames with the detection drawn on top of them.
    pub overlay: bool,
    /// Rolling window for the processing-rate meter.
    pub fps_window: Duration,
}

impl Default for TrackerOptions {
    fn default() -> Self {
        Self {
            overlay: false,
            fps_window: Duration::from_millis(1000),
        }
    }
}

#[derive(Debug)]
pub enum TrackerEvent {
    /// Models are staged and sessions are built; detections will follow.
    Ready,
    /// Frames processed per second over the configured rolling window.
    Fps(f32),
    /// Initialization failed and the loop exited.
    Failed(Error),
}

/// Handle to a running tracking loop. Dropping it stops the loop and joins
/// the worker.
pub struct TrackerHandle {
    stop: Arc<AtomicBool>,
    worker: Option<thread::JoinHandle<()>>,
    events: Receiver<TrackerEvent>,
    overlay: Receiver<Frame>,
}

impl TrackerHandle {
    pub fn events(&self) -> &Receiver<TrackerEvent> {
        &self.events
    }

    pub fn overlay_frames(&self) -> &Receiver<Frame> {
        &self.overlay
    }

    /// Stops the loop and joins the worker. Idempotent; safe to call before
    /// initialization finished (a model download in flight completes first).
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::warn!("hand tracker worker panicked");
            }
        }
    }
}

impl Drop for TrackerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Starts the tracking loop on its own thread. `init` runs inside the
/// worker, so model staging and session builds never block the caller;
/// failures surface as [`TrackerEvent::Failed`]. Each tick drains the frame
/// channel to the most recent frame, runs the landmarker, and publishes the
/// detection into `buffer`.
pub fn spawn_tracker<L, F>(
    init: F,
    frame_rx: Receiver<Frame>,
    buffer: DetectionBuffer,
    options: TrackerOptions,
) -> TrackerHandle
where
    L: HandLandmarker,
    F: FnOnce() -> Result<L, Error> + Send + 'static,
{
    let stop = Arc::new(AtomicBool::new(false));
    let (event_tx, event_rx) = unbounded();
    let (overlay_tx, overlay_rx) = bounded(1);

    let worker_stop = stop.clone();
    let worker = thread::spawn(move || {
        run_worker(
            init, frame_rx, buffer, options, worker_stop, event_tx, overlay_tx,
        );
    });

    TrackerHandle {
        stop,
        worker: Some(worker),
        events: event_rx,
        overlay: overlay_rx,
    }
}

fn run_worker<L: HandLandmarker>(
    init: impl FnOnce() -> Result<L, Error>,
    frame_rx: Receiver<Frame>,
    buffer: DetectionBuffer,
    options: TrackerOptions,
    stop: Arc<AtomicBool>,
    event_tx: Sender<TrackerEvent>,
    overlay_tx: Sender<Frame>,
) {
    let mut landmarker = match init() {
        Ok(landmarker) => landmarker,
        Err(err) => {
            log::error!("hand tracker failed to initialize: {err}");
            let _ = event_tx.send(TrackerEvent::Failed(err));
            return;
        }
    };
    if stop.load(Ordering::Relaxed) {
        return;
    }
    let _ = event_tx.send(TrackerEvent::Ready);

    let mut fps = FpsCounter::with_window(options.fps_window);
    while let Some(frame) = recv_latest_frame(&frame_rx, &stop) {
        match landmarker.detect(&frame, frame.timestamp) {
            Ok(detection) => {
                let canvas = options.overlay.then(|| {
                    let mut canvas = frame.clone();
                    overlay::draw_detection(
                        &mut canvas.rgba,
                        canvas.width,
                        canvas.height,
                        &detection,
                    );
                    canvas
                });
                buffer.publish(detection);
                if let Some(canvas) = canvas {
                    let _ = overlay_tx.try_send(canvas);
                }
            }
            Err(err) => {
                let err = Error::InferenceTick(err);
                log::warn!("hand detection failed: {err:?}");
            }
        }
        if let Some(rate) = fps.tick(Instant::now()) {
            let _ = event_tx.send(TrackerEvent::Fps(rate));
        }
    }

    // Consumers must not keep acting on a detection nobody refreshes.
    buffer.clear();
}

fn recv_latest_frame(frame_rx: &Receiver<Frame>, stop: &AtomicBool) -> Option<Frame> {
    loop {
        if stop.load(Ordering::Relaxed) {
            return None;
        }
        match frame_rx.recv_timeout(STOP_POLL_INTERVAL) {
            Ok(mut frame) => {
                while let Ok(newer) = frame_rx.try_recv() {
                    frame = newer;
                }
                if stop.load(Ordering::Relaxed) {
                    return None;
                }
                return Some(frame);
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return None,
        }
    }
}
