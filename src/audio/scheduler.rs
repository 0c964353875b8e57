//! Gapless playback clock.

/// Next start time for inbound audio, in output device seconds.
///
/// Buffers are placed back to back: each starts where the previous one ends,
/// or at the device time if playback has fallen behind.
#[derive(Debug, Clone, Default)]
pub struct PlaybackScheduler {
    next_start: f64,
}

impl PlaybackScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_start(&self) -> f64 {
        self.next_start
    }

    /// Align the clock with the device, used before the first buffer of a session.
    pub fn sync_to(&mut self, device_time: f64) {
        self.next_start = device_time;
    }

    /// Reserve a slot of `duration` seconds and return its start time.
    pub fn schedule(&mut self, device_time: f64, duration: f64) -> f64 {
        let start = self.next_start.max(device_time);
        self.next_start = start + duration;
        start
    }

    pub fn reset(&mut self) {
        self.next_start = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_back_to_back_buffers() {
        let mut clock = PlaybackScheduler::new();
        assert_eq!(clock.schedule(0.0, 0.5), 0.0);
        assert_eq!(clock.schedule(0.1, 0.5), 0.5);
        assert_eq!(clock.schedule(0.2, 0.25), 1.0);
        assert_eq!(clock.next_start(), 1.25);
    }

    #[test]
    fn test_catches_up_with_device_time() {
        let mut clock = PlaybackScheduler::new();
        clock.schedule(0.0, 0.5);
        // Device ran past the queued audio
        assert_eq!(clock.schedule(3.0, 0.5), 3.0);
        assert_eq!(clock.next_start(), 3.5);
    }

    #[test]
    fn test_monotonic_for_any_sequence() {
        let mut clock = PlaybackScheduler::new();
        let calls = [(0.0, 0.1), (0.05, 0.3), (1.0, 0.0), (0.9, 0.2), (5.0, 0.01)];
        let mut prev_end = 0.0;
        for (now, duration) in calls {
            let start = clock.schedule(now, duration);
            assert!(start >= prev_end);
            assert!(start >= now);
            prev_end = start + duration;
        }
    }

    #[test]
    fn test_sync_and_reset() {
        let mut clock = PlaybackScheduler::new();
        clock.sync_to(2.0);
        assert_eq!(clock.schedule(0.0, 1.0), 2.0);
        clock.reset();
        assert_eq!(clock.next_start(), 0.0);
    }
}
