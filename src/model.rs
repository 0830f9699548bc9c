use std::{
    fs,
    io::{Read, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::Client;

/// The two ONNX assets the tracker needs: the palm region proposer and the
/// per-region hand landmark model.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelKind {
    PalmDetector,
    HandLandmarker,
}

const PALM_DETECTOR_URL: &str = "https://raw.githubusercontent.com/opencv/opencv_zoo/main/models/palm_detection_mediapipe/palm_detection_mediapipe_2023feb.onnx";
const HAND_LANDMARKER_URL: &str = "https://raw.githubusercontent.com/opencv/opencv_zoo/main/models/handpose_estimation_mediapipe/handpose_estimation_mediapipe_2023feb.onnx";

impl ModelKind {
    pub fn file_name(&self) -> &'static str {
        match self {
            ModelKind::PalmDetector => "palm_detection_mediapipe_2023feb.onnx",
            ModelKind::HandLandmarker => "handpose_estimation_mediapipe_2023feb.onnx",
        }
    }

    pub fn url(&self) -> &'static str {
        match self {
            ModelKind::PalmDetector => PALM_DETECTOR_URL,
            ModelKind::HandLandmarker => HAND_LANDMARKER_URL,
        }
    }

    pub fn default_path(&self) -> PathBuf {
        PathBuf::from("models").join(self.file_name())
    }

    fn label(&self) -> &'static str {
        match self {
            ModelKind::PalmDetector => "palm detector",
            ModelKind::HandLandmarker => "hand landmarker",
        }
    }
}

#[derive(Clone, Debug)]
pub enum ModelEvent {
    AlreadyPresent {
        model: ModelKind,
    },
    Started {
        model: ModelKind,
        total: Option<u64>,
    },
    Progress {
        model: ModelKind,
        downloaded: u64,
        total: Option<u64>,
    },
    Finished {
        model: ModelKind,
    },
}

/// Makes sure the model file exists at `path`, downloading it from the
/// published location when missing. Staging progress is reported through
/// `on_event`.
pub fn ensure_model_ready<F>(model: ModelKind, path: &Path, mut on_event: F) -> anyhow::Result<()>
where
    F: FnMut(ModelEvent),
{
    if path.exists() {
        on_event(ModelEvent::AlreadyPresent { model });
        on_event(ModelEvent::Finished { model });
        return Ok(());
    }

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create model directory {}", parent.display())
            })?;
        }
    }

    download_to_path(model, model.url(), path, &mut on_event)
}

/// Same staging with an attached terminal progress bar, for interactive use.
pub fn ensure_model_ready_with_progress(model: ModelKind, path: &Path) -> anyhow::Result<()> {
    let mut progress: Option<ProgressBar> = None;
    ensure_model_ready(model, path, |event| match &event {
        ModelEvent::Started { total, .. } => {
            progress = Some(progress_bar(*total));
        }
        ModelEvent::Progress { downloaded, .. } => {
            if let Some(pb) = progress.as_ref() {
                pb.set_position(*downloaded);
            }
        }
        ModelEvent::Finished { model } => {
            if let Some(pb) = progress.take() {
                pb.finish_with_message(format!("{} model ready", model.label()));
            }
        }
        ModelEvent::AlreadyPresent { .. } => {}
    })
}

fn download_to_path<F>(
    model: ModelKind,
    url: &str,
    dest: &Path,
    on_event: &mut F,
) -> anyhow::Result<()>
where
    F: FnMut(ModelEvent),
{
    log::info!(
        "downloading {} model from {url} to {}",
        model.label(),
        dest.display()
    );

    let client = Client::new();
    let mut response = client
        .get(url)
        .send()
        .context("failed to start model download")?
        .error_for_status()
        .context("model download returned error status")?;

    let total = response.content_length();
    on_event(ModelEvent::Started { model, total });

    let tmp_path = dest.with_extension("download");
    let mut file = fs::File::create(&tmp_path)
        .with_context(|| format!("failed to create {}", tmp_path.display()))?;

    let mut downloaded: u64 = 0;
    let mut buffer = [0u8; 16 * 1024];
    loop {
        let bytes_read = response
            .read(&mut buffer)
            .context("failed while reading model bytes")?;
        if bytes_read == 0 {
            break;
        }

        file.write_all(&buffer[..bytes_read])
            .context("failed while writing model to disk")?;
        downloaded += bytes_read as u64;
        on_event(ModelEvent::Progress {
            model,
            downloaded,
            total,
        });
    }

    file.sync_all()
        .context("failed to flush downloaded model to disk")?;
    fs::rename(&tmp_path, dest).with_context(|| {
        format!(
            "failed to move temp model {} into place at {}",
            tmp_path.display(),
            dest.display()
        )
    })?;

    on_event(ModelEvent::Finished { model });
    Ok(())
}

fn progress_bar(total: Option<u64>) -> ProgressBar {
    match total {
        Some(total) if total > 0 => {
            let pb = ProgressBar::new(total);
            let style = ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta})",
            )
            .unwrap()
            .progress_chars("=>-");
            pb.set_style(style);
            pb
        }
        _ => {
            let pb = ProgressBar::new_spinner();
            let style = ProgressStyle::with_template("{spinner:.green} downloading model").unwrap();
            pb.set_style(style);
            pb.enable_steady_tick(Duration::from_millis(100));
            pb
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_paths_live_under_models() {
        let palm = ModelKind::PalmDetector.default_path();
        let hand = ModelKind::HandLandmarker.default_path();
        assert!(palm.starts_with("models"));
        assert!(hand.starts_with("models"));
        assert_ne!(palm, hand);
    }

    #[test]
    fn existing_file_short_circuits_without_download() {
        let nonce = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let path = std::env::temp_dir().join(format!(
            "gauntlet-model-test-{}-{nonce}",
            std::process::id()
        ));
        fs::write(&path, b"stub").unwrap();

        let mut events = Vec::new();
        ensure_model_ready(ModelKind::PalmDetector, &path, |e| events.push(e)).unwrap();
        fs::remove_file(&path).ok();

        assert!(matches!(events[0], ModelEvent::AlreadyPresent { .. }));
        assert!(matches!(events[1], ModelEvent::Finished { .. }));
    }
}
