use std::sync::{Arc, Mutex};

use crate::types::Detection;

/// Single-slot hand-off cell between the tracking worker and pose consumers.
///
/// `publish` replaces the previous detection wholesale and `snapshot` hands
/// out the current one without waiting on the writer. A consumer polling
/// faster than the tracker sees the same detection repeatedly; a slower one
/// skips intermediates. There is no queue and no backpressure.
#[derive(Clone, Debug, Default)]
pub struct DetectionBuffer {
    slot: Arc<Mutex<Option<Arc<Detection>>>>,
}

impl DetectionBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, detection: Detection) {
        *self.lock() = Some(Arc::new(detection));
    }

    /// Latest published detection, if any. Never blocks on inference; the
    /// slot lock is only ever held for a pointer swap.
    pub fn snapshot(&self) -> Option<Arc<Detection>> {
        self.lock().clone()
    }

    /// Empties the slot. Called when the tracking loop shuts down so
    /// consumers stop acting on a stale detection.
    pub fn clear(&self) {
        *self.lock() = None;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Arc<Detection>>> {
        match self.slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::types::{Handedness, Landmark, TrackedHand};

    fn detection_with_score(score: f32) -> Detection {
        Detection {
            hands: vec![TrackedHand {
                landmarks: vec![Landmark::new(0.5, 0.5, 0.0)],
                handedness: Handedness::Left,
                score,
            }],
            timestamp: Instant::now(),
        }
    }

    #[test]
    fn starts_empty() {
        let buffer = DetectionBuffer::new();
        assert!(buffer.snapshot().is_none());
    }

    #[test]
    fn publish_overwrites_previous_detection() {
        let buffer = DetectionBuffer::new();
        buffer.publish(detection_with_score(0.1));
        buffer.publish(detection_with_score(0.9));

        let seen = buffer.snapshot().unwrap();
        assert_eq!(seen.hands[0].score, 0.9);
    }

    #[test]
    fn snapshot_is_rereadable_and_stable() {
        let buffer = DetectionBuffer::new();
        buffer.publish(detection_with_score(0.7));

        let first = buffer.snapshot().unwrap();
        let second = buffer.snapshot().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn snapshot_taken_before_overwrite_stays_valid() {
        let buffer = DetectionBuffer::new();
        buffer.publish(detection_with_score(0.2));
        let held = buffer.snapshot().unwrap();

        buffer.publish(detection_with_score(0.8));
        assert_eq!(held.hands[0].score, 0.2);
        assert_eq!(buffer.snapshot().unwrap().hands[0].score, 0.8);
    }

    #[test]
    fn clear_empties_the_slot() {
        let buffer = DetectionBuffer::new();
        buffer.publish(detection_with_score(0.5));
        buffer.clear();
        assert!(buffer.snapshot().is_none());
    }

    #[test]
    fn publishes_cross_thread() {
        let buffer = DetectionBuffer::new();
        let writer = buffer.clone();
        let handle = std::thread::spawn(move || {
            writer.publish(detection_with_score(0.6));
        });
        handle.join().unwrap();
        assert_eq!(buffer.snapshot().unwrap().hands[0].score, 0.6);
    }
}
