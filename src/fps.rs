use std::time::{Duration, Instant};

/// Frame rate meter over a rolling window.
///
/// Counts processed frames and, once at least one full window has elapsed,
/// reports the rate and restarts the count. The clock is injected through
/// `tick` so the arithmetic is testable.
#[derive(Debug)]
pub struct FpsCounter {
    window: Duration,
    window_start: Option<Instant>,
    frames: u32,
    rate: Option<f32>,
}

impl FpsCounter {
    pub fn new() -> Self {
        Self::with_window(Duration::from_millis(1000))
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            window,
            window_start: None,
            frames: 0,
            rate: None,
        }
    }

    /// Records one processed frame at `now`. Returns the refreshed rate
    /// whenever a full window has elapsed.
    pub fn tick(&mut self, now: Instant) -> Option<f32> {
        let start = *self.window_start.get_or_insert(now);
        self.frames += 1;

        let elapsed = now.saturating_duration_since(start);
        if elapsed < self.window || elapsed.is_zero() {
            return None;
        }

        let rate = self.frames as f32 / elapsed.as_secs_f32();
        self.rate = Some(rate);
        self.frames = 0;
        self.window_start = Some(now);
        Some(rate)
    }

    /// Rate from the most recently completed window.
    pub fn rate(&self) -> Option<f32> {
        self.rate
    }
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new()
    }
}
