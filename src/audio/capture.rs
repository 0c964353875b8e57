//! Real audio devices using CPAL (Cross-Platform Audio Library).

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::audio::device::{
    AudioBackend, CaptureStream, DeviceState, InputDevice, OutputDevice, SampleCallback,
};
use crate::audio::playback::CpalOutputDevice;
use crate::audio::wav;
use crate::error::{Result, VoiceCallError};
use crate::permission::{CaptureConstraints, MediaError, MicrophoneAccess, PermissionState};

/// Run a closure with stderr temporarily redirected to /dev/null.
///
/// This suppresses noisy ALSA/JACK/PipeWire messages that CPAL triggers
/// when probing audio backends. The messages are harmless but confusing to users.
///
/// # Safety
/// Uses `libc::dup`/`libc::dup2` to save and restore file descriptor 2 (stderr).
/// Safe as long as no other thread is concurrently manipulating fd 2.
pub(crate) fn with_suppressed_stderr<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    unsafe {
        let saved_fd = libc::dup(2);
        let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY);
        if saved_fd >= 0 && devnull >= 0 {
            libc::dup2(devnull, 2);
            libc::close(devnull);
        }

        let result = f();

        if saved_fd >= 0 {
            libc::dup2(saved_fd, 2);
            libc::close(saved_fd);
        }

        result
    }
}

/// Suppress noisy JACK/ALSA error messages that occur during audio backend probing.
///
/// # Safety
/// This modifies environment variables which is safe when called before spawning threads.
pub fn suppress_audio_warnings() {
    // SAFETY: Called at startup before any threads are spawned
    unsafe {
        std::env::set_var("JACK_NO_START_SERVER", "1");
        std::env::set_var("JACK_NO_AUDIO_RESERVATION", "1");
        std::env::set_var("PIPEWIRE_DEBUG", "0");
        std::env::set_var("ALSA_DEBUG", "0");
        std::env::set_var("PW_LOG", "0");
    }
}

/// Preferred device names for GNOME/PipeWire environments.
const PREFERRED_DEVICES: &[&str] = &["pipewire", "pulse", "PulseAudio"];

/// Device name patterns not useful for a voice call.
const FILTERED_PATTERNS: &[&str] = &[
    "surround",
    "front:",
    "rear:",
    "center:",
    "side:",
    "Digital Output",
    "HDMI",
    "S/PDIF",
];

fn should_filter_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    FILTERED_PATTERNS
        .iter()
        .any(|pattern| lower.contains(&pattern.to_lowercase()))
}

fn is_preferred_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    PREFERRED_DEVICES
        .iter()
        .any(|pref| lower.contains(&pref.to_lowercase()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

/// List usable devices, preferred ones marked with "\[recommended\]".
pub fn list_devices(direction: Direction) -> Result<Vec<String>> {
    let (host, devices) = with_suppressed_stderr(|| {
        let host = cpal::default_host();
        let devices = match direction {
            Direction::Input => host.input_devices(),
            Direction::Output => host.output_devices(),
        };
        (host, devices)
    });
    let _ = host; // keep host alive while iterating devices
    let devices = devices.map_err(|e| VoiceCallError::AudioDevice {
        message: format!("Failed to enumerate devices: {}", e),
    })?;

    let mut device_names = Vec::new();
    for device in devices {
        if let Ok(name) = device.name() {
            if should_filter_device(&name) {
                continue;
            }
            if is_preferred_device(&name) {
                device_names.push(format!("{} [recommended]", name));
            } else {
                device_names.push(name);
            }
        }
    }

    Ok(device_names)
}

/// Find a device by name, or the best default (PipeWire, then Pulse, then
/// the system default).
pub(crate) fn find_device(direction: Direction, name: Option<&str>) -> Result<cpal::Device> {
    with_suppressed_stderr(|| {
        let host = cpal::default_host();
        let devices = match direction {
            Direction::Input => host.input_devices(),
            Direction::Output => host.output_devices(),
        };
        let devices = devices.map_err(|e| VoiceCallError::AudioDevice {
            message: format!("Failed to enumerate devices: {}", e),
        })?;

        let mut preferred = None;
        for device in devices {
            let Ok(device_name) = device.name() else {
                continue;
            };
            match name {
                Some(wanted) if device_name == wanted => return Ok(device),
                None if preferred.is_none() && is_preferred_device(&device_name) => {
                    preferred = Some(device);
                }
                _ => {}
            }
        }

        if let Some(wanted) = name {
            return Err(VoiceCallError::NoMicrophone {
                message: format!("audio device '{}' not found", wanted),
            });
        }
        if let Some(device) = preferred {
            return Ok(device);
        }

        let default = match direction {
            Direction::Input => host.default_input_device(),
            Direction::Output => host.default_output_device(),
        };
        default.ok_or_else(|| match direction {
            Direction::Input => VoiceCallError::NoMicrophone {
                message: "no input device available".to_string(),
            },
            Direction::Output => VoiceCallError::AudioDevice {
                message: "no output device available".to_string(),
            },
        })
    })
}

/// Wrapper for cpal::Stream to make it Send.
///
/// SAFETY: The stream is only touched through the owning struct, which is
/// never shared between threads without a lock.
pub(crate) struct SendableStream(pub(crate) cpal::Stream);

unsafe impl Send for SendableStream {}

/// CPAL devices for both directions.
#[derive(Debug, Clone, Default)]
pub struct CpalBackend {
    input_device: Option<String>,
    output_device: Option<String>,
}

impl CpalBackend {
    pub fn new(input_device: Option<String>, output_device: Option<String>) -> Self {
        Self {
            input_device,
            output_device,
        }
    }
}

impl AudioBackend for CpalBackend {
    fn create_input(&self, sample_rate: u32) -> Result<Arc<dyn InputDevice>> {
        Ok(Arc::new(CpalInputDevice {
            device_name: self.input_device.clone(),
            sample_rate,
            state: Mutex::new(DeviceState::Running),
        }))
    }

    fn create_output(&self, sample_rate: u32) -> Result<Arc<dyn OutputDevice>> {
        let device = find_device(Direction::Output, self.output_device.as_deref())?;
        Ok(Arc::new(CpalOutputDevice::open(device, sample_rate)?))
    }
}

/// Microphone context. The device itself is opened per stream.
pub struct CpalInputDevice {
    device_name: Option<String>,
    sample_rate: u32,
    state: Mutex<DeviceState>,
}

#[async_trait]
impl InputDevice for CpalInputDevice {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn state(&self) -> DeviceState {
        *self.state.lock()
    }

    fn resume(&self) -> Result<()> {
        let mut state = self.state.lock();
        if *state == DeviceState::Closed {
            return Err(VoiceCallError::AudioContext {
                message: "cannot resume a closed context".to_string(),
            });
        }
        *state = DeviceState::Running;
        Ok(())
    }

    async fn open_stream(
        &self,
        _constraints: &CaptureConstraints,
        on_samples: SampleCallback,
    ) -> Result<Box<dyn CaptureStream>> {
        if self.state() == DeviceState::Closed {
            return Err(VoiceCallError::AudioContext {
                message: "input context is closed".to_string(),
            });
        }

        let device = find_device(Direction::Input, self.device_name.as_deref())?;
        let counter = Arc::new(AtomicU64::new(0));

        let stream = build_input_stream(
            &device,
            self.sample_rate,
            Arc::clone(&on_samples),
            Arc::clone(&counter),
        )?;
        stream.play().map_err(|e| VoiceCallError::AudioDevice {
            message: format!("Failed to start audio stream: {}", e),
        })?;
        let stream = SendableStream(stream);

        // Some PipeWire-ALSA setups accept non-native configs but never
        // deliver data. Give the callback a moment to fire.
        tokio::time::sleep(Duration::from_millis(200)).await;

        let stream = if counter.load(Ordering::Relaxed) == 0 {
            drop(stream);
            let native = build_native_input_stream(&device, self.sample_rate, on_samples, counter)?;
            native.play().map_err(|e| VoiceCallError::AudioDevice {
                message: format!("Failed to start native audio stream: {}", e),
            })?;
            SendableStream(native)
        } else {
            stream
        };

        if let Ok(name) = device.name() {
            info!("Microphone stream opened on {}", name);
        }
        Ok(Box::new(CpalCaptureStream {
            stream: Some(stream),
        }))
    }

    fn close(&self) {
        *self.state.lock() = DeviceState::Closed;
    }
}

/// Try f32 then i16 at the requested rate, mono.
fn build_input_stream(
    device: &cpal::Device,
    sample_rate: u32,
    on_samples: SampleCallback,
    counter: Arc<AtomicU64>,
) -> Result<cpal::Stream> {
    let preferred_config = cpal::StreamConfig {
        channels: 1,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let cb = Arc::clone(&on_samples);
    let count = Arc::clone(&counter);
    if let Ok(stream) = device.build_input_stream(
        &preferred_config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            count.fetch_add(1, Ordering::Relaxed);
            cb(data);
        },
        |err| warn!("Audio stream error: {}", err),
        None,
    ) {
        return Ok(stream);
    }

    let cb = Arc::clone(&on_samples);
    let count = Arc::clone(&counter);
    if let Ok(stream) = device.build_input_stream(
        &preferred_config,
        move |data: &[i16], _: &cpal::InputCallbackInfo| {
            count.fetch_add(1, Ordering::Relaxed);
            let samples: Vec<f32> = data
                .iter()
                .map(|&s| crate::audio::pcm::i16_to_f32(s))
                .collect();
            cb(&samples);
        },
        |err| warn!("Audio stream error: {}", err),
        None,
    ) {
        return Ok(stream);
    }

    build_native_input_stream(device, sample_rate, on_samples, counter)
}

/// Capture at the device's native config, mixing to mono and resampling in
/// software.
fn build_native_input_stream(
    device: &cpal::Device,
    sample_rate: u32,
    on_samples: SampleCallback,
    counter: Arc<AtomicU64>,
) -> Result<cpal::Stream> {
    use cpal::SampleFormat;

    let default_config = device
        .default_input_config()
        .map_err(|e| VoiceCallError::AudioDevice {
            message: format!("Failed to query default input config: {}", e),
        })?;

    let native_rate = default_config.sample_rate().0;
    let native_channels = default_config.channels() as usize;
    let stream_config: cpal::StreamConfig = default_config.clone().into();

    debug!(
        "Using native audio format ({}ch/{}Hz/{:?}), converting in software",
        native_channels,
        native_rate,
        default_config.sample_format(),
    );

    let convert = move |samples: &[f32]| {
        let mono = wav::downmix(samples, native_channels);
        wav::resample(&mono, native_rate, sample_rate)
    };

    match default_config.sample_format() {
        SampleFormat::F32 => device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    counter.fetch_add(1, Ordering::Relaxed);
                    on_samples(&convert(data));
                },
                |err| warn!("Audio stream error: {}", err),
                None,
            )
            .map_err(|e| VoiceCallError::AudioDevice {
                message: format!("Failed to build native f32 stream: {}", e),
            }),
        SampleFormat::I16 => device
            .build_input_stream(
                &stream_config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    counter.fetch_add(1, Ordering::Relaxed);
                    let floats: Vec<f32> = data
                        .iter()
                        .map(|&s| crate::audio::pcm::i16_to_f32(s))
                        .collect();
                    on_samples(&convert(&floats));
                },
                |err| warn!("Audio stream error: {}", err),
                None,
            )
            .map_err(|e| VoiceCallError::AudioDevice {
                message: format!("Failed to build native i16 stream: {}", e),
            }),
        fmt => Err(VoiceCallError::AudioDevice {
            message: format!(
                "Unsupported native sample format: {:?}. \
                 Try setting audio.input_device in the config.",
                fmt
            ),
        }),
    }
}

struct CpalCaptureStream {
    stream: Option<SendableStream>,
}

impl CaptureStream for CpalCaptureStream {
    fn stop(&mut self) {
        if let Some(stream) = self.stream.take()
            && let Err(e) = stream.0.pause()
        {
            debug!("Failed to pause capture stream: {}", e);
        }
    }
}

impl Drop for CpalCaptureStream {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Desktop microphone access. There is no passive permission query, so the
/// gate always probes by opening the device.
#[derive(Debug, Clone, Default)]
pub struct CpalMicrophone {
    device_name: Option<String>,
}

impl CpalMicrophone {
    pub fn new(device_name: Option<String>) -> Self {
        Self { device_name }
    }
}

fn classify_open_error(err: VoiceCallError) -> MediaError {
    match err {
        VoiceCallError::NoMicrophone { message } => MediaError::NotFound(message),
        VoiceCallError::Unsupported { message } => MediaError::NotSupported(message),
        other => {
            let message = other.to_string();
            if message.to_lowercase().contains("permission") {
                MediaError::NotAllowed(message)
            } else {
                MediaError::Other(message)
            }
        }
    }
}

#[async_trait]
impl MicrophoneAccess for CpalMicrophone {
    async fn query_permission(&self) -> std::result::Result<Option<PermissionState>, MediaError> {
        Ok(None)
    }

    async fn probe(&self, constraints: &CaptureConstraints) -> std::result::Result<(), MediaError> {
        let name = self.device_name.clone();
        let rate = constraints.sample_rate;
        tokio::task::spawn_blocking(move || {
            let device = find_device(Direction::Input, name.as_deref())?;
            let stream = match rate {
                Some(rate) => build_input_stream(
                    &device,
                    rate,
                    Arc::new(|_: &[f32]| {}),
                    Arc::new(AtomicU64::new(0)),
                )?,
                None => build_native_input_stream(
                    &device,
                    crate::defaults::INPUT_SAMPLE_RATE,
                    Arc::new(|_: &[f32]| {}),
                    Arc::new(AtomicU64::new(0)),
                )?,
            };
            drop(stream);
            Ok::<(), VoiceCallError>(())
        })
        .await
        .map_err(|e| MediaError::Other(e.to_string()))?
        .map_err(classify_open_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_filter_device() {
        assert!(should_filter_device("surround51"));
        assert!(should_filter_device("front:CARD=PCH"));
        assert!(should_filter_device("HDMI Output"));
        assert!(should_filter_device("Digital Output S/PDIF"));
        assert!(!should_filter_device("pipewire"));
        assert!(!should_filter_device("PulseAudio"));
        assert!(!should_filter_device("Built-in Audio"));
    }

    #[test]
    fn test_is_preferred_device() {
        assert!(is_preferred_device("pipewire"));
        assert!(is_preferred_device("PipeWire"));
        assert!(is_preferred_device("pulse"));
        assert!(!is_preferred_device("hw:0,0"));
        assert!(!is_preferred_device("default"));
    }

    #[test]
    fn test_classify_open_error() {
        assert!(matches!(
            classify_open_error(VoiceCallError::NoMicrophone {
                message: "none".to_string()
            }),
            MediaError::NotFound(_)
        ));
        assert!(matches!(
            classify_open_error(VoiceCallError::AudioDevice {
                message: "Permission denied (os error 13)".to_string()
            }),
            MediaError::NotAllowed(_)
        ));
        assert!(matches!(
            classify_open_error(VoiceCallError::AudioDevice {
                message: "device busy".to_string()
            }),
            MediaError::Other(_)
        ));
    }

    #[test]
    fn test_find_device_with_invalid_name() {
        let result = find_device(Direction::Input, Some("NonExistentDevice12345"));
        assert!(result.is_err());
    }

    #[test]
    #[ignore] // Requires audio hardware
    fn test_list_devices_filters_unusable() {
        let devices = list_devices(Direction::Input).expect("Failed to list devices");
        for device in &devices {
            assert!(!device.to_lowercase().contains("hdmi"), "{}", device);
        }
    }

    #[tokio::test]
    #[ignore] // Requires audio hardware
    async fn test_microphone_probe() {
        let mic = CpalMicrophone::default();
        assert!(mic.probe(&CaptureConstraints::voice()).await.is_ok());
    }
}
