use glam::{Quat, Vec3};

use crate::error::Error;
use crate::types::{FINGER_CHAINS, NUM_LANDMARKS, landmark};

/// Canonical node names, aligned with the landmark ids.
const NODE_NAMES: [&str; NUM_LANDMARKS] = [
    "wrist",
    "thumb_cmc",
    "thumb_mcp",
    "thumb_ip",
    "thumb_tip",
    "index_mcp",
    "index_pip",
    "index_dip",
    "index_tip",
    "middle_mcp",
    "middle_pip",
    "middle_dip",
    "middle_tip",
    "ring_mcp",
    "ring_pip",
    "ring_dip",
    "ring_tip",
    "pinky_mcp",
    "pinky_pip",
    "pinky_dip",
    "pinky_tip",
];

/// One animated joint: which landmark drives it and which rig node it
/// lands on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JointSpec {
    pub landmark: usize,
    pub node: String,
}

/// One finger, base to tip, wrist excluded. The tip is kept as the aim
/// target of the last segment; it never receives a rotation of its own.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FingerChain {
    pub joints: Vec<JointSpec>,
}

/// Landmark → rig-node wiring: the root node plus five finger chains.
/// The default matches the canonical landmark layout; rigs with different
/// node names or fewer fingers supply their own table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JointTable {
    pub root: JointSpec,
    pub chains: Vec<FingerChain>,
}

impl Default for JointTable {
    fn default() -> Self {
        let chains = FINGER_CHAINS
            .iter()
            .map(|chain| FingerChain {
                joints: chain[1..]
                    .iter()
                    .map(|&id| JointSpec {
                        landmark: id,
                        node: NODE_NAMES[id].to_string(),
                    })
                    .collect(),
            })
            .collect();

        Self {
            root: JointSpec {
                landmark: landmark::WRIST,
                node: NODE_NAMES[landmark::WRIST].to_string(),
            },
            chains,
        }
    }
}

/// A joint named in the table but absent from the rig asset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnresolvedJoint {
    pub landmark: usize,
    pub node: String,
}

/// Joint table resolved against a loaded rig. `N` is whatever handle the
/// rendering engine uses for a node. Resolved once after rig load and kept
/// for the session.
#[derive(Debug)]
pub struct RigMap<N> {
    root: N,
    nodes: Vec<Option<N>>,
    missing: Vec<UnresolvedJoint>,
}

impl JointTable {
    /// Looks every named node up in the rig. A missing root is an error; a
    /// missing finger node is reported and logged once, and that joint stays
    /// unanimated.
    pub fn resolve<N>(&self, mut lookup: impl FnMut(&str) -> Option<N>) -> Result<RigMap<N>, Error> {
        let root = lookup(&self.root.node).ok_or_else(|| Error::MissingRigNode {
            node: self.root.node.clone(),
            landmark: self.root.landmark,
        })?;

        let mut nodes: Vec<Option<N>> = (0..NUM_LANDMARKS).map(|_| None).collect();
        let mut missing = Vec::new();
        for joint in self.chains.iter().flat_map(|chain| chain.joints.iter()) {
            if joint.landmark >= nodes.len() {
                continue;
            }
            match lookup(&joint.node) {
                Some(node) => nodes[joint.landmark] = Some(node),
                None => {
                    log::warn!(
                        "rig node '{}' (landmark {}) not found, joint stays unanimated",
                        joint.node,
                        joint.landmark
                    );
                    missing.push(UnresolvedJoint {
                        landmark: joint.landmark,
                        node: joint.node.clone(),
                    });
                }
            }
        }

        Ok(RigMap {
            root,
            nodes,
            missing,
        })
    }
}

impl<N> RigMap<N> {
    pub fn root(&self) -> &N {
        &self.root
    }

    /// Node for a finger landmark; `None` when the landmark is not in the
    /// table or its node was missing from the asset.
    pub fn node(&self, landmark: usize) -> Option<&N> {
        self.nodes.get(landmark).and_then(|slot| slot.as_ref())
    }

    pub fn missing(&self) -> &[UnresolvedJoint] {
        &self.missing
    }
}

/// Root transform of the hand: scene-space position, orientation, and the
/// mirroring scale.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RootTransform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for RootTransform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

/// Smoothed local rotation for one finger joint, relative to bind pose.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct JointPose {
    pub landmark: usize,
    pub rotation: Quat,
}

/// The full pose for one hand, recomputed every render frame and applied by
/// the rendering engine through a [`RigMap`]. While `visible` is false the
/// transforms hold their last values.
#[derive(Clone, Debug, PartialEq)]
pub struct HandPose {
    pub visible: bool,
    pub root: RootTransform,
    pub joints: Vec<JointPose>,
}

impl HandPose {
    /// Starting pose for a table: hidden, root at rest, every driven joint
    /// at bind orientation. Tips carry no joint entry.
    pub fn hidden(table: &JointTable) -> Self {
        let joints = table
            .chains
            .iter()
            .flat_map(|chain| {
                let last = chain.joints.len().saturating_sub(1);
                chain.joints[..last].iter().map(|joint| JointPose {
                    landmark: joint.landmark,
                    rotation: Quat::IDENTITY,
                })
            })
            .collect();

        Self {
            visible: false,
            root: RootTransform::default(),
            joints,
        }
    }

    pub fn joint(&self, landmark: usize) -> Option<&JointPose> {
        self.joints.iter().find(|joint| joint.landmark == landmark)
    }
}
