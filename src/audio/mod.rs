pub mod device;
pub mod metrics;
pub mod mock;
pub mod pcm;
pub mod pipeline;
pub mod scheduler;
pub mod wav;

#[cfg(feature = "cpal-audio")]
pub mod capture;
#[cfg(feature = "cpal-audio")]
pub mod playback;

pub use device::{AudioBackend, DeviceState, InputDevice, OutputDevice};
pub use pipeline::{AudioPipeline, PipelineSettings};
