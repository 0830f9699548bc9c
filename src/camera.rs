use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use anyhow::anyhow;
use crossbeam_channel::Sender;
use nokhwa::{
    Camera,
    pixel_format::RgbFormat,
    query,
    utils::{
        ApiBackend, CameraIndex, CameraInfo, FrameFormat, RequestedFormat, RequestedFormatType,
    },
};

use crate::{convert, error::Error, types::Frame};

// Prefer pixel formats that are widely supported; built-in cameras often
// reject YUYV even though the backend reports it.
const PREFERRED_PIXEL_FORMATS: &[FrameFormat] = &[
    FrameFormat::RAWRGB,
    FrameFormat::RAWBGR,
    FrameFormat::GRAY,
    FrameFormat::YUYV,
    FrameFormat::NV12,
    FrameFormat::MJPEG,
];

pub const DEVICE_POLL_INTERVAL: Duration = Duration::from_secs(2);

fn requested_formats() -> [RequestedFormat<'static>; 4] {
    [
        RequestedFormat::with_formats(
            RequestedFormatType::AbsoluteHighestFrameRate,
            PREFERRED_PIXEL_FORMATS,
        ),
        RequestedFormat::with_formats(
            RequestedFormatType::AbsoluteHighestResolution,
            PREFERRED_PIXEL_FORMATS,
        ),
        // Fall back to anything the backend can decode, but prefer higher FPS
        // to avoid very low default rates some drivers reject.
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate),
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::None),
    ]
}

#[derive(Clone, Debug)]
pub struct CameraDevice {
    pub index: CameraIndex,
    pub label: String,
}

#[derive(Clone, Debug, Default)]
pub struct CameraConfig {
    /// Device to open; `None` selects the first enumerated camera.
    pub device: Option<CameraIndex>,
}

/// Owns the camera stream lifecycle. `acquire` opens the device and spawns a
/// capture thread that decodes every frame to RGBA and forwards it over
/// `frame_tx`, dropping frames while the receiver is busy. `release` stops
/// and joins the thread; it is idempotent and safe without a prior `acquire`.
#[derive(Debug, Default)]
pub struct CaptureSession {
    worker: Option<CaptureWorker>,
}

impl CaptureSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&mut self, config: &CameraConfig, frame_tx: Sender<Frame>) -> Result<(), Error> {
        self.release();

        let index = match &config.device {
            Some(index) => index.clone(),
            None => first_device_index()?,
        };

        // Fail fast before spawning the capture thread.
        build_camera(index.clone()).map_err(acquire_error)?;

        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();

        let handle = thread::spawn(move || {
            let mut camera = match build_camera(index) {
                Ok(cam) => cam,
                Err(err) => {
                    log::error!("failed to reopen camera in capture thread: {err:?}");
                    return;
                }
            };

            while !stop_flag.load(Ordering::Relaxed) {
                let raw = match camera.frame() {
                    Ok(raw) => raw,
                    Err(err) => {
                        log::warn!("camera frame read failed: {err:?}");
                        continue;
                    }
                };

                let frame = match convert::frame_from_camera(&raw) {
                    Ok(frame) => frame,
                    Err(err) => {
                        log::warn!("failed to decode camera frame: {err:?}");
                        continue;
                    }
                };

                // Drop if the consumer is busy, otherwise forward every frame.
                let _ = frame_tx.try_send(frame);
            }
        });

        self.worker = Some(CaptureWorker {
            stop,
            handle: Some(handle),
        });
        Ok(())
    }

    pub fn release(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.stop();
        }
    }

    pub fn is_active(&self) -> bool {
        self.worker.is_some()
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.release();
    }
}

#[derive(Debug)]
struct CaptureWorker {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl CaptureWorker {
    fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CaptureWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One-shot device presence probe, independent of any open session. An
/// enumeration failure counts as unavailable.
pub fn has_camera() -> Result<bool, Error> {
    let devices = query(ApiBackend::Auto).map_err(|err| {
        log::warn!("camera enumeration failed: {err:?}");
        Error::DeviceUnavailable
    })?;
    Ok(!devices.is_empty())
}

pub fn available_cameras() -> Result<Vec<CameraDevice>, Error> {
    let devices = query(ApiBackend::Auto).map_err(|err| {
        log::warn!("camera enumeration failed: {err:?}");
        Error::DeviceUnavailable
    })?;
    Ok(devices
        .into_iter()
        .map(|info| CameraDevice {
            index: info.index().clone(),
            label: format_camera_label(&info),
        })
        .collect())
}

fn format_camera_label(info: &CameraInfo) -> String {
    info.human_name()
}

/// Watches camera presence for the lifetime of the handle. The backend has
/// no change events, so a thread re-enumerates on an interval; `on_change`
/// fires once with the initial state and again whenever presence flips.
/// Dropping the watcher stops and joins the poll thread.
#[derive(Debug)]
pub struct DeviceWatcher {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

pub fn watch_devices<F>(interval: Duration, mut on_change: F) -> DeviceWatcher
where
    F: FnMut(bool) + Send + 'static,
{
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = stop.clone();

    let handle = thread::spawn(move || {
        let mut last: Option<bool> = None;
        while !stop_flag.load(Ordering::Relaxed) {
            let present = query(ApiBackend::Auto)
                .map(|devices| !devices.is_empty())
                .unwrap_or(false);
            if last != Some(present) {
                last = Some(present);
                on_change(present);
            }

            // Sleep in short hops so drop does not stall a long interval.
            let mut slept = Duration::ZERO;
            while slept < interval && !stop_flag.load(Ordering::Relaxed) {
                let hop = Duration::from_millis(50).min(interval - slept);
                thread::sleep(hop);
                slept += hop;
            }
        }
    });

    DeviceWatcher {
        stop,
        handle: Some(handle),
    }
}

impl DeviceWatcher {
    pub fn stop(mut self) {
        self.join();
    }

    fn join(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DeviceWatcher {
    fn drop(&mut self) {
        self.join();
    }
}

fn first_device_index() -> Result<CameraIndex, Error> {
    let devices = query(ApiBackend::Auto).map_err(|err| {
        log::warn!("camera enumeration failed: {err:?}");
        Error::DeviceUnavailable
    })?;
    devices
        .first()
        .map(|info| info.index().clone())
        .ok_or(Error::DeviceUnavailable)
}

// Opening failed; distinguish missing hardware from refused access.
fn acquire_error(err: anyhow::Error) -> Error {
    match query(ApiBackend::Auto) {
        Ok(devices) if devices.is_empty() => Error::DeviceUnavailable,
        Ok(_) => Error::PermissionDenied(err),
        Err(_) => Error::DeviceUnavailable,
    }
}

fn build_camera(index: CameraIndex) -> anyhow::Result<Camera> {
    let mut last_err = None;

    for requested in requested_formats() {
        match Camera::new(index.clone(), requested) {
            Ok(mut camera) => match camera.open_stream() {
                Ok(()) => return Ok(camera),
                Err(err) => last_err = Some(err.into()),
            },
            Err(err) => last_err = Some(err.into()),
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("failed to open camera with any supported format")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_without_acquire_is_a_no_op() {
        let mut session = CaptureSession::new();
        assert!(!session.is_active());
        session.release();
        session.release();
        assert!(!session.is_active());
    }

    #[test]
    fn watcher_reports_initial_state_and_stops() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let watcher = watch_devices(Duration::from_millis(100), move |present| {
            let _ = tx.try_send(present);
        });
        // Whatever the machine has, the initial poll must fire.
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
        watcher.stop();
    }
}
