use std::time::Instant;

/// A camera frame as tightly packed RGBA8.
#[derive(Clone, Debug)]
pub struct Frame {
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: Instant,
}

/// One tracked point. `x` and `y` are normalized to `[0, 1]` against the
/// source frame; `z` is relative depth with no fixed unit, more negative
/// meaning closer to the camera.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Landmark {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Handedness {
    Left,
    Right,
}

impl Handedness {
    /// Maps the landmark model's handedness output (1.0 = right hand).
    pub fn from_score(score: f32) -> Self {
        if score >= 0.5 {
            Handedness::Right
        } else {
            Handedness::Left
        }
    }
}

/// One detected hand. Landmarks are in canonical index order (see
/// [`landmark`]); a sparse detection carries fewer than [`NUM_LANDMARKS`]
/// entries and consumers must treat missing indices as absent.
#[derive(Clone, Debug)]
pub struct TrackedHand {
    pub landmarks: Vec<Landmark>,
    pub handedness: Handedness,
    pub score: f32,
}

impl TrackedHand {
    pub fn landmark(&self, id: usize) -> Option<Landmark> {
        self.landmarks.get(id).copied()
    }
}

/// Everything one inference pass produced for one frame. A detection is
/// published atomically and superseded wholesale by the next pass; an empty
/// `hands` list means the frame was processed and no hand was found.
#[derive(Clone, Debug)]
pub struct Detection {
    pub hands: Vec<TrackedHand>,
    pub timestamp: Instant,
}

impl Detection {
    pub fn empty(timestamp: Instant) -> Self {
        Self {
            hands: Vec::new(),
            timestamp,
        }
    }
}

/// Scene extent in world units at the plane the hand is projected onto.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub width: f32,
    pub height: f32,
}

pub const NUM_LANDMARKS: usize = 21;

/// Canonical hand landmark ids.
pub mod landmark {
    pub const WRIST: usize = 0;
    pub const THUMB_CMC: usize = 1;
    pub const THUMB_MCP: usize = 2;
    pub const THUMB_IP: usize = 3;
    pub const THUMB_TIP: usize = 4;
    pub const INDEX_MCP: usize = 5;
    pub const INDEX_PIP: usize = 6;
    pub const INDEX_DIP: usize = 7;
    pub const INDEX_TIP: usize = 8;
    pub const MIDDLE_MCP: usize = 9;
    pub const MIDDLE_PIP: usize = 10;
    pub const MIDDLE_DIP: usize = 11;
    pub const MIDDLE_TIP: usize = 12;
    pub const RING_MCP: usize = 13;
    pub const RING_PIP: usize = 14;
    pub const RING_DIP: usize = 15;
    pub const RING_TIP: usize = 16;
    pub const PINKY_MCP: usize = 17;
    pub const PINKY_PIP: usize = 18;
    pub const PINKY_DIP: usize = 19;
    pub const PINKY_TIP: usize = 20;
}

/// The five finger chains, wrist-rooted, base to tip.
pub const FINGER_CHAINS: [[usize; 5]; 5] = [
    [0, 1, 2, 3, 4],
    [0, 5, 6, 7, 8],
    [0, 9, 10, 11, 12],
    [0, 13, 14, 15, 16],
    [0, 17, 18, 19, 20],
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handedness_from_score_splits_at_half() {
        assert_eq!(Handedness::from_score(0.0), Handedness::Left);
        assert_eq!(Handedness::from_score(0.49), Handedness::Left);
        assert_eq!(Handedness::from_score(0.5), Handedness::Right);
        assert_eq!(Handedness::from_score(1.0), Handedness::Right);
    }

    #[test]
    fn finger_chains_are_wrist_rooted_and_tip_terminated() {
        assert_eq!(FINGER_CHAINS.len(), 5);
        for chain in FINGER_CHAINS {
            assert_eq!(chain[0], landmark::WRIST);
            assert!(chain.iter().all(|&id| id < NUM_LANDMARKS));
        }
        assert_eq!(FINGER_CHAINS[0][4], landmark::THUMB_TIP);
        assert_eq!(FINGER_CHAINS[4][4], landmark::PINKY_TIP);
    }

    #[test]
    fn sparse_hand_reports_missing_landmarks() {
        let hand = TrackedHand {
            landmarks: vec![Landmark::new(0.5, 0.5, 0.0)],
            handedness: Handedness::Left,
            score: 0.9,
        };
        assert!(hand.landmark(0).is_some());
        assert!(hand.landmark(landmark::MIDDLE_MCP).is_none());
    }
}
