//! Platform audio devices.
//!
//! These traits allow swapping implementations (real sound card, WAV file,
//! in-memory mock). An input device hands raw microphone samples to a
//! callback; an output device plays buffers at absolute times on its own
//! clock.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::permission::CaptureConstraints;

/// Lifecycle of a device context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceState {
    Running,
    Suspended,
    Closed,
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeviceState::Running => "running",
            DeviceState::Suspended => "suspended",
            DeviceState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Receives mono `f32` samples in [-1, 1] from the capture thread.
pub type SampleCallback = Arc<dyn Fn(&[f32]) + Send + Sync>;

/// Fired once when a scheduled buffer has finished playing.
pub type EndedCallback = Box<dyn FnOnce() + Send>;

/// Creates device contexts at a requested sample rate.
pub trait AudioBackend: Send + Sync {
    fn create_input(&self, sample_rate: u32) -> Result<Arc<dyn InputDevice>>;

    fn create_output(&self, sample_rate: u32) -> Result<Arc<dyn OutputDevice>>;
}

/// Microphone side context.
#[async_trait]
pub trait InputDevice: Send + Sync {
    fn sample_rate(&self) -> u32;

    fn state(&self) -> DeviceState;

    fn resume(&self) -> Result<()>;

    /// Acquire the microphone and start delivering samples to `on_samples`.
    async fn open_stream(
        &self,
        constraints: &CaptureConstraints,
        on_samples: SampleCallback,
    ) -> Result<Box<dyn CaptureStream>>;

    /// Base latency in seconds.
    fn latency(&self) -> f64 {
        0.0
    }

    /// Close the context. A closed context is never reused.
    fn close(&self);
}

/// An acquired microphone stream.
pub trait CaptureStream: Send {
    fn stop(&mut self);
}

/// Speaker side context with a monotonic clock in seconds.
pub trait OutputDevice: Send + Sync {
    fn sample_rate(&self) -> u32;

    fn state(&self) -> DeviceState;

    fn resume(&self) -> Result<()>;

    /// Seconds of audio rendered since the context was created.
    fn current_time(&self) -> f64;

    fn set_gain(&self, gain: f32);

    /// Play `samples` starting at `start_at` on the device clock.
    fn schedule(
        &self,
        samples: Vec<f32>,
        start_at: f64,
        on_ended: EndedCallback,
    ) -> Result<Box<dyn ScheduledSource>>;

    fn latency(&self) -> f64 {
        0.0
    }

    fn close(&self);
}

/// A buffer queued on an output device.
pub trait ScheduledSource: Send {
    /// Stop playback. Safe to call after the buffer has ended.
    fn stop(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_state_display() {
        assert_eq!(DeviceState::Running.to_string(), "running");
        assert_eq!(DeviceState::Suspended.to_string(), "suspended");
        assert_eq!(DeviceState::Closed.to_string(), "closed");
    }

    #[test]
    fn test_traits_are_object_safe() {
        fn takes_backend(_: Option<Arc<dyn AudioBackend>>) {}
        fn takes_input(_: Option<Arc<dyn InputDevice>>) {}
        fn takes_output(_: Option<Arc<dyn OutputDevice>>) {}
        fn takes_stream(_: Option<Box<dyn CaptureStream>>) {}
        fn takes_source(_: Option<Box<dyn ScheduledSource>>) {}

        takes_backend(None);
        takes_input(None);
        takes_output(None);
        takes_stream(None);
        takes_source(None);
    }
}
