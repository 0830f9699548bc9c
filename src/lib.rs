//! Camera-to-rig hand tracking: a capture thread feeds frames to a
//! perception worker running a two-stage ONNX hand landmark model, the
//! latest detection sits in a single-slot buffer, and a per-rig
//! [`Retargeter`] turns snapshots of it into a [`HandPose`] the rendering
//! engine applies every frame.

pub mod buffer;
#[cfg(feature = "camera-nokhwa")]
pub mod camera;
#[cfg(feature = "camera-nokhwa")]
mod convert;
pub mod error;
pub mod fps;
pub mod landmarker;
pub mod model;
pub mod overlay;
pub mod retarget;
pub mod rig;
pub mod types;

pub use buffer::DetectionBuffer;
#[cfg(feature = "camera-nokhwa")]
pub use camera::{
    CameraConfig, CameraDevice, CaptureSession, DeviceWatcher, available_cameras, has_camera,
    watch_devices,
};
pub use error::Error;
pub use fps::FpsCounter;
pub use landmarker::{
    Delegate, HandLandmarker, LandmarkerOptions, OrtHandLandmarker, TrackerEvent, TrackerHandle,
    TrackerOptions, spawn_tracker,
};
pub use model::{ModelEvent, ModelKind, ensure_model_ready, ensure_model_ready_with_progress};
pub use retarget::{RetargetConfig, Retargeter};
pub use rig::{HandPose, JointPose, JointTable, RigMap, RootTransform, UnresolvedJoint};
pub use types::{Detection, Frame, Handedness, Landmark, TrackedHand, Viewport};
