use glam::{Mat3, Quat, Vec3};

use crate::rig::{HandPose, JointTable};
use crate::types::{Detection, Handedness, Landmark, TrackedHand, Viewport, landmark};

/// Tuning for one retargeted hand. Scale and smoothing values are per
/// instance, so two hands can be driven with different feels.
#[derive(Clone, Debug)]
pub struct RetargetConfig {
    /// Which hand of a detection this instance follows.
    pub hand_index: usize,
    /// Scene units per unit of relative landmark depth.
    pub depth_scale: f32,
    /// Uniform rig scale; mirroring negates its x.
    pub base_scale: f32,
    /// Slerp factor for chain-base joints.
    pub base_factor: f32,
    /// Slerp factor for mid and distal joints.
    pub distal_factor: f32,
    /// Clear smoothed joint state when the hand reappears after being lost.
    pub reset_on_reacquire: bool,
    /// Bone rest direction the rig was authored with.
    pub bind_dir: Vec3,
    pub table: JointTable,
}

impl Default for RetargetConfig {
    fn default() -> Self {
        Self {
            hand_index: 0,
            depth_scale: 5.0,
            base_scale: 4.0,
            base_factor: 0.2,
            distal_factor: 0.4,
            reset_on_reacquire: false,
            bind_dir: Vec3::NEG_Y,
            table: JointTable::default(),
        }
    }
}

/// Turns detections into a [`HandPose`], one instance per rig. Holds the
/// smoothed joint state between frames; the caller feeds it the latest
/// detection snapshot once per render frame.
pub struct Retargeter {
    config: RetargetConfig,
    pose: HandPose,
}

impl Retargeter {
    pub fn new(mut config: RetargetConfig) -> Self {
        // The bind direction feeds rotation arcs, which need unit input.
        config.bind_dir = config.bind_dir.try_normalize().unwrap_or(Vec3::NEG_Y);
        let pose = HandPose::hidden(&config.table);
        Self { config, pose }
    }

    pub fn config(&self) -> &RetargetConfig {
        &self.config
    }

    pub fn pose(&self) -> &HandPose {
        &self.pose
    }

    /// Recomputes the pose from the newest detection. `None`, a missing
    /// hand index, or an empty landmark list hide the pose and touch
    /// nothing else, so smoothing state survives dropouts.
    pub fn update(&mut self, detection: Option<&Detection>, viewport: Viewport) -> &HandPose {
        let Some(hand) = detection.and_then(|d| d.hands.get(self.config.hand_index)) else {
            return self.hide();
        };
        if hand.landmarks.is_empty() {
            return self.hide();
        }

        if !self.pose.visible && self.config.reset_on_reacquire {
            self.reset_joints();
        }
        // The hand exists, so it shows; a sparse frame below keeps the last
        // transforms on screen rather than blanking the model.
        self.pose.visible = true;

        let (Some(wrist), Some(middle)) = (
            finite_landmark(hand, landmark::WRIST),
            finite_landmark(hand, landmark::MIDDLE_MCP),
        ) else {
            return &self.pose;
        };

        let depth_scale = self.config.depth_scale;
        let map = move |lm: Landmark| scene_point(lm, viewport, depth_scale);

        self.pose.root.position = map(wrist);

        let up_raw = map(middle) - map(wrist);
        if let (Some(index), Some(pinky)) = (
            finite_landmark(hand, landmark::INDEX_MCP),
            finite_landmark(hand, landmark::PINKY_MCP),
        ) {
            let side_raw = map(pinky) - map(index);
            if let Some(rotation) = basis_rotation(up_raw, side_raw) {
                // Set directly; smoothing the root makes the whole hand lag.
                self.pose.root.rotation = rotation;
            }
        }

        let mirror = match hand.handedness {
            Handedness::Right => -1.0,
            Handedness::Left => 1.0,
        };
        self.pose.root.scale = Vec3::new(
            mirror * self.config.base_scale,
            self.config.base_scale,
            self.config.base_scale,
        );

        let bind_dir = self.config.bind_dir;
        let root_rotation = self.pose.root.rotation;
        for chain in &self.config.table.chains {
            // Parent world rotation accumulates down the chain, through
            // the held rotation of any joint whose update was skipped.
            let mut parent_world = root_rotation;
            for (idx, pair) in chain.joints.windows(2).enumerate() {
                let Some(slot) = self
                    .pose
                    .joints
                    .iter_mut()
                    .find(|joint| joint.landmark == pair[0].landmark)
                else {
                    continue;
                };

                if let (Some(a), Some(b)) = (
                    finite_landmark(hand, pair[0].landmark),
                    finite_landmark(hand, pair[1].landmark),
                ) {
                    let dir_world = map(b) - map(a);
                    if let Some(local_dir) = (parent_world.inverse() * dir_world).try_normalize() {
                        let target = Quat::from_rotation_arc(bind_dir, local_dir);
                        let factor = if idx == 0 {
                            self.config.base_factor
                        } else {
                            self.config.distal_factor
                        };
                        slot.rotation = slot.rotation.slerp(target, factor);
                    }
                }

                parent_world *= slot.rotation;
            }
        }

        &self.pose
    }

    fn hide(&mut self) -> &HandPose {
        self.pose.visible = false;
        &self.pose
    }

    fn reset_joints(&mut self) {
        for joint in &mut self.pose.joints {
            joint.rotation = Quat::IDENTITY;
        }
    }
}

/// Normalized landmark to scene space: the camera image is mirrored for
/// the viewer, y points up, larger relative depth comes toward the camera.
fn scene_point(lm: Landmark, viewport: Viewport, depth_scale: f32) -> Vec3 {
    Vec3::new(
        -(lm.x - 0.5) * viewport.width,
        -(lm.y - 0.5) * viewport.height,
        -lm.z * depth_scale,
    )
}

/// Root orientation from the palm's reference vectors. `None` when either
/// vector is too short or they are parallel, in which case the caller keeps
/// the previous rotation.
fn basis_rotation(up_raw: Vec3, side_raw: Vec3) -> Option<Quat> {
    let up = up_raw.try_normalize()?;
    let side = side_raw.try_normalize()?;
    let forward = side.cross(up).try_normalize()?;
    let ortho_side = up.cross(forward);
    Some(Quat::from_mat3(&Mat3::from_cols(ortho_side, up, forward)))
}

fn finite_landmark(hand: &TrackedHand, id: usize) -> Option<Landmark> {
    hand.landmark(id).filter(Landmark::is_finite)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NUM_LANDMARKS;
    use std::time::Instant;

    const VIEWPORT: Viewport = Viewport {
        width: 2.0,
        height: 2.0,
    };

    fn hand_with(points: &[(usize, Landmark)], handedness: Handedness) -> TrackedHand {
        let mut landmarks = vec![Landmark::new(0.5, 0.5, 0.0); NUM_LANDMARKS];
        for (id, lm) in points {
            landmarks[*id] = *lm;
        }
        TrackedHand {
            landmarks,
            handedness,
            score: 0.9,
        }
    }

    fn detection(hand: TrackedHand) -> Detection {
        Detection {
            hands: vec![hand],
            timestamp: Instant::now(),
        }
    }

    /// Wrist at frame center, middle base above it. Orientation reference
    /// vectors stay degenerate (index and pinky sit on the same point).
    fn centered_hand(handedness: Handedness) -> Detection {
        detection(hand_with(
            &[(landmark::MIDDLE_MCP, Landmark::new(0.5, 0.4, 0.0))],
            handedness,
        ))
    }

    #[test]
    fn position_maps_the_viewport_corners() {
        let mut retargeter = Retargeter::new(RetargetConfig::default());

        let top_left = detection(hand_with(
            &[
                (landmark::WRIST, Landmark::new(0.0, 0.0, 0.0)),
                (landmark::MIDDLE_MCP, Landmark::new(0.5, 0.4, 0.0)),
            ],
            Handedness::Left,
        ));
        let pose = retargeter.update(Some(&top_left), VIEWPORT).clone();
        assert!((pose.root.position - Vec3::new(1.0, 1.0, 0.0)).length() < 1e-6);

        let bottom_right = detection(hand_with(
            &[
                (landmark::WRIST, Landmark::new(1.0, 1.0, 0.0)),
                (landmark::MIDDLE_MCP, Landmark::new(0.5, 0.4, 0.0)),
            ],
            Handedness::Left,
        ));
        let pose = retargeter.update(Some(&bottom_right), VIEWPORT).clone();
        assert!((pose.root.position - Vec3::new(-1.0, -1.0, 0.0)).length() < 1e-6);

        let center = centered_hand(Handedness::Left);
        let pose = retargeter.update(Some(&center), VIEWPORT).clone();
        assert!(pose.root.position.length() < 1e-6);
    }

    #[test]
    fn depth_comes_toward_the_camera() {
        let mut retargeter = Retargeter::new(RetargetConfig::default());
        let frame = detection(hand_with(
            &[
                (landmark::WRIST, Landmark::new(0.5, 0.5, 0.2)),
                (landmark::MIDDLE_MCP, Landmark::new(0.5, 0.4, 0.0)),
            ],
            Handedness::Left,
        ));
        let pose = retargeter.update(Some(&frame), VIEWPORT).clone();
        assert!((pose.root.position.z - (-1.0)).abs() < 1e-6);
    }

    #[test]
    fn left_hand_at_center_keeps_identity_rotation_and_positive_scale() {
        let mut retargeter = Retargeter::new(RetargetConfig::default());
        let frame = centered_hand(Handedness::Left);
        let pose = retargeter.update(Some(&frame), VIEWPORT).clone();

        assert!(pose.visible);
        assert!(pose.root.position.length() < 1e-6);
        assert_eq!(pose.root.scale, Vec3::new(4.0, 4.0, 4.0));
        // Degenerate side vector: the orientation branch must not run.
        assert_eq!(pose.root.rotation, Quat::IDENTITY);
    }

    #[test]
    fn right_hand_only_flips_the_mirror_axis() {
        let mut retargeter = Retargeter::new(RetargetConfig::default());
        let left = retargeter
            .update(Some(&centered_hand(Handedness::Left)), VIEWPORT)
            .clone();
        let right = retargeter
            .update(Some(&centered_hand(Handedness::Right)), VIEWPORT)
            .clone();

        assert_eq!(right.root.scale, Vec3::new(-4.0, 4.0, 4.0));
        assert_eq!(right.root.position, left.root.position);
        assert_eq!(right.root.rotation, left.root.rotation);
    }

    #[test]
    fn mirroring_round_trips() {
        let mut retargeter = Retargeter::new(RetargetConfig::default());
        retargeter.update(Some(&centered_hand(Handedness::Left)), VIEWPORT);
        let first = retargeter.pose().root.scale.x;
        retargeter.update(Some(&centered_hand(Handedness::Right)), VIEWPORT);
        assert_eq!(retargeter.pose().root.scale.x, -first);
        retargeter.update(Some(&centered_hand(Handedness::Left)), VIEWPORT);
        assert_eq!(retargeter.pose().root.scale.x, first);
    }

    #[test]
    fn basis_stays_orthonormal_for_noisy_inputs() {
        let up_raw = Vec3::new(0.1, 1.0, 0.05);
        let side_raw = Vec3::new(1.0, 0.2, -0.1);
        let rotation = basis_rotation(up_raw, side_raw).unwrap();

        assert!(rotation.is_normalized());
        let up = up_raw.normalize();
        let forward = side_raw.normalize().cross(up).normalize();
        let side = up.cross(forward);

        assert!((rotation * Vec3::Y - up).length() < 1e-5);
        assert!((rotation * Vec3::Z - forward).length() < 1e-5);
        assert!((rotation * Vec3::X - side).length() < 1e-5);

        let det = (rotation * Vec3::X)
            .cross(rotation * Vec3::Y)
            .dot(rotation * Vec3::Z);
        assert!((det - 1.0).abs() < 1e-5);
    }

    #[test]
    fn degenerate_reference_vectors_yield_no_rotation() {
        assert!(basis_rotation(Vec3::ZERO, Vec3::X).is_none());
        assert!(basis_rotation(Vec3::Y, Vec3::ZERO).is_none());
        // Parallel vectors span no plane.
        assert!(basis_rotation(Vec3::Y, Vec3::Y * 2.0).is_none());
    }

    /// Index finger pointing screen-left in landmark space, which lands on
    /// +X in scene space. The chain-base joint must converge onto the
    /// rotation arc from the bind direction.
    fn pointing_hand() -> Detection {
        detection(hand_with(
            &[
                (landmark::MIDDLE_MCP, Landmark::new(0.5, 0.4, 0.0)),
                (landmark::INDEX_PIP, Landmark::new(0.4, 0.5, 0.0)),
            ],
            Handedness::Left,
        ))
    }

    #[test]
    fn smoothing_converges_monotonically_onto_a_constant_target() {
        let config = RetargetConfig::default();
        let target = Quat::from_rotation_arc(config.bind_dir, Vec3::X);
        let mut retargeter = Retargeter::new(config);
        let frame = pointing_hand();

        let mut previous = std::f32::consts::FRAC_PI_2;
        for _ in 0..40 {
            retargeter.update(Some(&frame), VIEWPORT);
            let angle = retargeter
                .pose()
                .joint(landmark::INDEX_MCP)
                .unwrap()
                .rotation
                .angle_between(target);
            assert!(angle < previous || angle < 1e-3);
            previous = angle;
        }
        assert!(previous < 1e-3);
    }

    #[test]
    fn base_and_distal_joints_use_their_own_factors() {
        let mut retargeter = Retargeter::new(RetargetConfig::default());
        retargeter.update(Some(&pointing_hand()), VIEWPORT);

        let base = retargeter
            .pose()
            .joint(landmark::INDEX_MCP)
            .unwrap()
            .rotation;
        let distal = retargeter
            .pose()
            .joint(landmark::INDEX_PIP)
            .unwrap()
            .rotation;

        // One step from identity: angle == factor * arc angle.
        let base_angle = base.angle_between(Quat::IDENTITY);
        let expected = 0.2 * std::f32::consts::FRAC_PI_2;
        assert!((base_angle - expected).abs() < 1e-3);
        // The distal joint saw a different direction, but must have moved
        // further than a base step could.
        let distal_angle = distal.angle_between(Quat::IDENTITY);
        assert!(distal_angle > expected + 1e-3);
    }

    #[test]
    fn dropouts_freeze_the_pose_bitwise() {
        let mut retargeter = Retargeter::new(RetargetConfig::default());
        for _ in 0..10 {
            retargeter.update(Some(&pointing_hand()), VIEWPORT);
        }
        let held = retargeter.pose().clone();
        assert!(held.visible);

        let empty = Detection::empty(Instant::now());
        for _ in 0..5 {
            retargeter.update(None, VIEWPORT);
            retargeter.update(Some(&empty), VIEWPORT);
            let pose = retargeter.pose();
            assert!(!pose.visible);
            assert_eq!(pose.joints, held.joints);
            assert_eq!(pose.root, held.root);
        }
    }

    #[test]
    fn smoothing_state_survives_reacquisition_by_default() {
        let mut retargeter = Retargeter::new(RetargetConfig::default());
        for _ in 0..10 {
            retargeter.update(Some(&pointing_hand()), VIEWPORT);
        }
        let held = retargeter.pose().joints.clone();

        retargeter.update(None, VIEWPORT);
        retargeter.update(Some(&pointing_hand()), VIEWPORT);

        let resumed = retargeter
            .pose()
            .joint(landmark::INDEX_MCP)
            .unwrap()
            .rotation;
        let held_mcp = held
            .iter()
            .find(|j| j.landmark == landmark::INDEX_MCP)
            .unwrap()
            .rotation;
        // Continued from the held state, not from bind pose.
        assert!(resumed.angle_between(held_mcp) < resumed.angle_between(Quat::IDENTITY));
    }

    #[test]
    fn reset_on_reacquire_starts_smoothing_over() {
        let config = RetargetConfig {
            reset_on_reacquire: true,
            ..RetargetConfig::default()
        };
        let mut retargeter = Retargeter::new(config);
        for _ in 0..10 {
            retargeter.update(Some(&pointing_hand()), VIEWPORT);
        }
        retargeter.update(None, VIEWPORT);
        retargeter.update(Some(&pointing_hand()), VIEWPORT);
        let reacquired = retargeter
            .pose()
            .joint(landmark::INDEX_MCP)
            .unwrap()
            .rotation;

        let mut fresh = Retargeter::new(RetargetConfig {
            reset_on_reacquire: true,
            ..RetargetConfig::default()
        });
        fresh.update(Some(&pointing_hand()), VIEWPORT);
        let first_step = fresh
            .pose()
            .joint(landmark::INDEX_MCP)
            .unwrap()
            .rotation;

        assert_eq!(reacquired, first_step);
    }

    #[test]
    fn zero_length_directions_skip_only_that_joint() {
        let mut retargeter = Retargeter::new(RetargetConfig::default());
        // Ring PIP collapses onto its base; index keeps a real direction.
        let frame = detection(hand_with(
            &[
                (landmark::MIDDLE_MCP, Landmark::new(0.5, 0.4, 0.0)),
                (landmark::INDEX_PIP, Landmark::new(0.4, 0.5, 0.0)),
                (landmark::RING_MCP, Landmark::new(0.55, 0.52, 0.0)),
                (landmark::RING_PIP, Landmark::new(0.55, 0.52, 0.0)),
            ],
            Handedness::Left,
        ));
        retargeter.update(Some(&frame), VIEWPORT);

        let pose = retargeter.pose();
        assert_eq!(
            pose.joint(landmark::RING_MCP).unwrap().rotation,
            Quat::IDENTITY
        );
        assert_ne!(
            pose.joint(landmark::INDEX_MCP).unwrap().rotation,
            Quat::IDENTITY
        );
        assert!(pose.joints.iter().all(|j| j.rotation.is_finite()));
    }

    #[test]
    fn non_finite_landmarks_skip_without_poisoning_the_pose() {
        let mut retargeter = Retargeter::new(RetargetConfig::default());
        let frame = detection(hand_with(
            &[
                (landmark::MIDDLE_MCP, Landmark::new(0.5, 0.4, 0.0)),
                (landmark::INDEX_PIP, Landmark::new(0.4, 0.5, 0.0)),
                (landmark::RING_PIP, Landmark::new(f32::NAN, 0.5, 0.0)),
            ],
            Handedness::Left,
        ));
        retargeter.update(Some(&frame), VIEWPORT);

        let pose = retargeter.pose();
        assert_eq!(
            pose.joint(landmark::RING_MCP).unwrap().rotation,
            Quat::IDENTITY
        );
        assert_eq!(
            pose.joint(landmark::RING_PIP).unwrap().rotation,
            Quat::IDENTITY
        );
        assert!(pose.joints.iter().all(|j| j.rotation.is_finite()));
        assert!(pose.root.position.is_finite());
    }

    #[test]
    fn absent_hands_hide_the_pose() {
        let mut retargeter = Retargeter::new(RetargetConfig::default());
        assert!(!retargeter.update(None, VIEWPORT).visible);

        let empty = Detection::empty(Instant::now());
        assert!(!retargeter.update(Some(&empty), VIEWPORT).visible);

        let bare = detection(TrackedHand {
            landmarks: Vec::new(),
            handedness: Handedness::Left,
            score: 0.9,
        });
        assert!(!retargeter.update(Some(&bare), VIEWPORT).visible);

        let mut second_slot = Retargeter::new(RetargetConfig {
            hand_index: 1,
            ..RetargetConfig::default()
        });
        let one_hand = centered_hand(Handedness::Left);
        assert!(!second_slot.update(Some(&one_hand), VIEWPORT).visible);
    }

    #[test]
    fn sparse_frames_keep_the_model_visible_but_frozen() {
        let mut retargeter = Retargeter::new(RetargetConfig::default());
        retargeter.update(Some(&pointing_hand()), VIEWPORT);
        let held = retargeter.pose().clone();

        // Wrist goes non-finite: the hand is still there, so it stays on
        // screen with its last transforms.
        let frame = detection(hand_with(
            &[(landmark::WRIST, Landmark::new(f32::NAN, 0.5, 0.0))],
            Handedness::Left,
        ));
        let pose = retargeter.update(Some(&frame), VIEWPORT).clone();
        assert!(pose.visible);
        assert_eq!(pose.root, held.root);
        assert_eq!(pose.joints, held.joints);
    }

    #[test]
    fn first_frame_without_references_shows_bind_pose() {
        let mut retargeter = Retargeter::new(RetargetConfig::default());
        let frame = detection(hand_with(
            &[(landmark::MIDDLE_MCP, Landmark::new(f32::NAN, 0.4, 0.0))],
            Handedness::Left,
        ));
        let pose = retargeter.update(Some(&frame), VIEWPORT).clone();

        assert!(pose.visible);
        assert_eq!(pose.root, crate::rig::RootTransform::default());
        assert!(pose.joints.iter().all(|j| j.rotation == Quat::IDENTITY));
    }
}
