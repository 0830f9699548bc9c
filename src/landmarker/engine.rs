use std::f32::consts::FRAC_PI_2;
use std::time::Instant;

use anyhow::{Context, Result, anyhow};
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;

use super::common::{self, LANDMARK_INPUT_SIZE};
use super::palm::{CropRegion, PalmDetector, PalmDetectorConfig, crop_from_palm, top_regions};
use super::{Delegate, HandLandmarker, LandmarkerOptions};
use crate::error::Error;
use crate::model::{ModelKind, ensure_model_ready};
use crate::types::{Detection, Frame, Handedness, Landmark, TrackedHand, landmark};

/// Two-stage detector: a palm proposal model finds hands, a landmark model
/// refines each proposal into 21 points. While every tracked hand stays
/// confident the palm stage is skipped and crops are carried over from the
/// previous frame's landmarks.
pub struct OrtHandLandmarker {
    landmark_session: Session,
    palm_detector: PalmDetector,
    options: LandmarkerOptions,
    tracked: Vec<TrackedCrop>,
}

#[derive(Clone, Copy)]
struct TrackedCrop {
    region: CropRegion,
    score: f32,
}

impl OrtHandLandmarker {
    /// Stages both model files (downloading when absent) and builds the
    /// inference sessions.
    pub fn new(options: LandmarkerOptions) -> Result<Self, Error> {
        ensure_model_ready(ModelKind::PalmDetector, &options.palm_model, |_evt| {})
            .map_err(Error::ModelLoad)?;
        ensure_model_ready(ModelKind::HandLandmarker, &options.landmark_model, |_evt| {})
            .map_err(Error::ModelLoad)?;

        if options.delegate == Delegate::Gpu {
            log::warn!("no GPU execution provider compiled in, running on CPU");
        }

        let landmark_session =
            build_landmark_session(&options.landmark_model).map_err(Error::ModelLoad)?;

        let palm_detector = PalmDetector::new(
            &options.palm_model,
            PalmDetectorConfig {
                score_threshold: options.min_detection_confidence,
                ..PalmDetectorConfig::default()
            },
        )
        .map_err(Error::ModelLoad)?;

        Ok(Self {
            landmark_session,
            palm_detector,
            options,
            tracked: Vec::new(),
        })
    }

    /// Crops to run the landmark model on this frame. Tracked crops are
    /// reused as long as the full set of hands stayed confident; otherwise
    /// the palm detector re-runs and its proposals replace the set.
    fn plan_crops(&mut self, frame: &Frame) -> Result<Vec<CropRegion>> {
        let tracking_holds = self.tracked.len() >= self.options.num_hands
            && self
                .tracked
                .iter()
                .all(|t| t.score >= self.options.min_tracking_confidence);

        if tracking_holds {
            return Ok(self.tracked.iter().map(|t| t.region).collect());
        }

        let regions = self
            .palm_detector
            .detect(frame)
            .context("palm detection failed")?;
        Ok(top_regions(&regions, self.options.num_hands)
            .into_iter()
            .map(crop_from_palm)
            .collect())
    }

    fn infer_hand(&mut self, frame: &Frame, crop: CropRegion) -> Result<Option<TrackedHand>> {
        let (input, transform) = common::prepare_rotated_crop(
            frame,
            crop.center,
            crop.side,
            crop.angle,
            LANDMARK_INPUT_SIZE,
        )?;
        let tensor = Tensor::from_array(input)?;
        let outputs = self
            .landmark_session
            .run(ort::inputs![tensor])
            .context("failed to run hand landmark session")?;

        if outputs.len() == 0 {
            return Err(anyhow!("hand landmark model returned no outputs"));
        }

        let coords = outputs[0].try_extract_array::<f32>()?;
        let flattened: Vec<f32> = coords.iter().copied().collect();
        let raw = common::decode_landmarks(&flattened)?;

        let confidence = if outputs.len() > 1 {
            outputs[1]
                .try_extract_array::<f32>()
                .ok()
                .and_then(|arr| arr.iter().next().copied())
                .unwrap_or(0.0)
        } else {
            0.0
        };
        if confidence < self.options.min_presence_confidence {
            return Ok(None);
        }

        let handedness_score = if outputs.len() > 2 {
            outputs[2]
                .try_extract_array::<f32>()
                .ok()
                .and_then(|arr| arr.iter().next().copied())
                .unwrap_or(0.0)
        } else {
            0.0
        };

        Ok(Some(TrackedHand {
            landmarks: common::normalize_landmarks(&raw, &transform),
            handedness: Handedness::from_score(handedness_score),
            score: confidence,
        }))
    }
}

impl HandLandmarker for OrtHandLandmarker {
    fn detect(&mut self, frame: &Frame, timestamp: Instant) -> Result<Detection> {
        let crops = self.plan_crops(frame)?;
        if crops.is_empty() {
            self.tracked.clear();
            return Ok(Detection::empty(timestamp));
        }

        let mut hands = Vec::new();
        for crop in crops {
            if hands.len() >= self.options.num_hands {
                break;
            }
            if let Some(hand) = self.infer_hand(frame, crop)? {
                hands.push(hand);
            }
        }

        self.tracked = hands
            .iter()
            .filter_map(|hand| {
                crop_from_landmarks(&hand.landmarks, frame).map(|region| TrackedCrop {
                    region,
                    score: hand.score,
                })
            })
            .collect();

        Ok(Detection { hands, timestamp })
    }
}

fn build_landmark_session(path: &std::path::Path) -> Result<Session> {
    Ok(Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(2)?
        .commit_from_file(path)
        .with_context(|| format!("failed to load hand landmark model from {}", path.display()))?)
}

/// Derives next frame's crop window from this frame's landmarks, in frame
/// pixels. Angle is zero when the fingers point up in the image.
fn crop_from_landmarks(landmarks: &[Landmark], frame: &Frame) -> Option<CropRegion> {
    if landmarks.len() <= landmark::MIDDLE_MCP {
        return None;
    }

    let w = frame.width as f32;
    let h = frame.height as f32;
    let (mut min_x, mut max_x) = (f32::MAX, f32::MIN);
    let (mut min_y, mut max_y) = (f32::MAX, f32::MIN);
    for lm in landmarks {
        if !lm.is_finite() {
            return None;
        }
        let px = lm.x * w;
        let py = lm.y * h;
        min_x = min_x.min(px);
        max_x = max_x.max(px);
        min_y = min_y.min(py);
        max_y = max_y.max(py);
    }

    let span = (max_x - min_x).max(max_y - min_y);
    let side = span.max(80.0) * 2.4;
    let center = ((min_x + max_x) * 0.5, (min_y + max_y) * 0.5);

    let wrist = landmarks[landmark::WRIST];
    let middle = landmarks[landmark::MIDDLE_MCP];
    let dx = (middle.x - wrist.x) * w;
    let dy = (middle.y - wrist.y) * h;
    let angle = if dx.abs() < f32::EPSILON && dy.abs() < f32::EPSILON {
        0.0
    } else {
        dy.atan2(dx) + FRAC_PI_2
    };

    Some(CropRegion {
        center,
        side,
        angle,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NUM_LANDMARKS;

    fn frame(width: u32, height: u32) -> Frame {
        Frame {
            rgba: vec![0; (width * height * 4) as usize],
            width,
            height,
            timestamp: Instant::now(),
        }
    }

    fn upright_hand() -> Vec<Landmark> {
        // Wrist at the bottom, fingers reaching up, in a 100px frame.
        let mut landmarks = vec![Landmark::new(0.5, 0.8, 0.0); NUM_LANDMARKS];
        landmarks[landmark::MIDDLE_MCP] = Landmark::new(0.5, 0.5, 0.0);
        landmarks[landmark::MIDDLE_TIP] = Landmark::new(0.5, 0.3, 0.0);
        landmarks[landmark::THUMB_TIP] = Landmark::new(0.3, 0.6, 0.0);
        landmarks[landmark::PINKY_TIP] = Landmark::new(0.7, 0.55, 0.0);
        landmarks
    }

    #[test]
    fn crop_follows_the_landmark_extent() {
        let crop = crop_from_landmarks(&upright_hand(), &frame(100, 100)).unwrap();
        assert!((crop.center.0 - 50.0).abs() < 1.0);
        assert!((crop.center.1 - 55.0).abs() < 1.0);
        // 50px extent loses to the 80px floor, scaled by 2.4.
        assert!((crop.side - 192.0).abs() < 1e-3);
    }

    #[test]
    fn upright_fingers_leave_the_crop_unrotated() {
        let crop = crop_from_landmarks(&upright_hand(), &frame(100, 100)).unwrap();
        assert!(crop.angle.abs() < 1e-3);
    }

    #[test]
    fn sideways_fingers_rotate_the_crop() {
        let mut landmarks = upright_hand();
        landmarks[landmark::WRIST] = Landmark::new(0.2, 0.5, 0.0);
        landmarks[landmark::MIDDLE_MCP] = Landmark::new(0.5, 0.5, 0.0);
        let crop = crop_from_landmarks(&landmarks, &frame(100, 100)).unwrap();
        assert!((crop.angle - FRAC_PI_2).abs() < 1e-3);
    }

    #[test]
    fn non_finite_landmarks_yield_no_crop() {
        let mut landmarks = upright_hand();
        landmarks[3] = Landmark::new(f32::NAN, 0.5, 0.0);
        assert!(crop_from_landmarks(&landmarks, &frame(100, 100)).is_none());
    }

    #[test]
    fn sparse_hands_yield_no_crop() {
        let landmarks = vec![Landmark::new(0.5, 0.5, 0.0); 4];
        assert!(crop_from_landmarks(&landmarks, &frame(100, 100)).is_none());
    }
}
