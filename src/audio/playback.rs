//! Speaker output using CPAL.
//!
//! Scheduled buffers are mixed in the device callback. The device clock is
//! the number of samples rendered so far, so `current_time` advances only
//! while audio is actually being played.

use cpal::traits::{DeviceTrait, StreamTrait};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, warn};

use crate::audio::capture::SendableStream;
use crate::audio::device::{DeviceState, EndedCallback, OutputDevice, ScheduledSource};
use crate::error::{Result, VoiceCallError};

struct Voice {
    start: u64,
    samples: Vec<f32>,
    stopped: Arc<AtomicBool>,
    on_ended: Option<EndedCallback>,
}

/// Mixes scheduled voices into the device buffer.
struct Mixer {
    rate: u32,
    /// Logical samples rendered, at `rate`.
    position: f64,
    /// Logical samples per device frame.
    step: f64,
    channels: usize,
    gain: f32,
    state: DeviceState,
    voices: Vec<Voice>,
}

impl Mixer {
    fn new(rate: u32, device_rate: u32, channels: usize) -> Self {
        Self {
            rate,
            position: 0.0,
            step: rate as f64 / device_rate.max(1) as f64,
            channels: channels.max(1),
            gain: 1.0,
            state: DeviceState::Running,
            voices: Vec::new(),
        }
    }

    fn current_time(&self) -> f64 {
        self.position / self.rate as f64
    }

    /// Fill `out` (interleaved) and collect completions of finished voices.
    /// Completions must run after the mixer lock is released.
    fn render(&mut self, out: &mut [f32], finished: &mut Vec<EndedCallback>) {
        if self.state != DeviceState::Running {
            out.fill(0.0);
            return;
        }

        for frame in out.chunks_mut(self.channels) {
            let pos = self.position as u64;
            let mut sum = 0.0f32;
            for voice in &self.voices {
                if pos < voice.start || voice.stopped.load(Ordering::Relaxed) {
                    continue;
                }
                if let Some(sample) = voice.samples.get((pos - voice.start) as usize) {
                    sum += sample;
                }
            }
            frame.fill((sum * self.gain).clamp(-1.0, 1.0));
            self.position += self.step;
        }

        let pos = self.position as u64;
        self.voices.retain_mut(|voice| {
            if voice.stopped.load(Ordering::Relaxed) {
                return false;
            }
            if pos >= voice.start + voice.samples.len() as u64 {
                if let Some(cb) = voice.on_ended.take() {
                    finished.push(cb);
                }
                return false;
            }
            true
        });
    }
}

fn render_into(mixer: &Mutex<Mixer>, out: &mut [f32]) {
    let mut finished = Vec::new();
    mixer.lock().render(out, &mut finished);
    for callback in finished {
        callback();
    }
}

pub struct CpalOutputDevice {
    mixer: Arc<Mutex<Mixer>>,
    stream: Mutex<Option<SendableStream>>,
    sample_rate: u32,
    latency_bits: Arc<AtomicU64>,
}

impl CpalOutputDevice {
    /// Open `device` and start rendering at the logical rate `sample_rate`.
    ///
    /// The stream runs at the device's native config; voices are stepped
    /// to match.
    pub fn open(device: cpal::Device, sample_rate: u32) -> Result<Self> {
        use cpal::SampleFormat;

        let config = device
            .default_output_config()
            .map_err(|e| VoiceCallError::AudioContext {
                message: format!("Failed to query default output config: {}", e),
            })?;
        let device_rate = config.sample_rate().0;
        let channels = config.channels() as usize;
        let stream_config: cpal::StreamConfig = config.clone().into();

        debug!(
            "Output at {}ch/{}Hz/{:?}, rendering {}Hz voices",
            channels,
            device_rate,
            config.sample_format(),
            sample_rate
        );

        let mixer = Arc::new(Mutex::new(Mixer::new(sample_rate, device_rate, channels)));
        let latency_bits = Arc::new(AtomicU64::new(0f64.to_bits()));

        let stream = match config.sample_format() {
            SampleFormat::F32 => {
                let mixer = Arc::clone(&mixer);
                let latency = Arc::clone(&latency_bits);
                device.build_output_stream(
                    &stream_config,
                    move |data: &mut [f32], info: &cpal::OutputCallbackInfo| {
                        record_latency(&latency, info);
                        render_into(&mixer, data);
                    },
                    |err| warn!("Audio output error: {}", err),
                    None,
                )
            }
            SampleFormat::I16 => {
                let mixer = Arc::clone(&mixer);
                let latency = Arc::clone(&latency_bits);
                let mut scratch = Vec::new();
                device.build_output_stream(
                    &stream_config,
                    move |data: &mut [i16], info: &cpal::OutputCallbackInfo| {
                        record_latency(&latency, info);
                        scratch.resize(data.len(), 0.0);
                        render_into(&mixer, &mut scratch);
                        for (out, &sample) in data.iter_mut().zip(scratch.iter()) {
                            *out = crate::audio::pcm::f32_to_i16(sample);
                        }
                    },
                    |err| warn!("Audio output error: {}", err),
                    None,
                )
            }
            fmt => {
                return Err(VoiceCallError::AudioContext {
                    message: format!("Unsupported output sample format: {:?}", fmt),
                });
            }
        }
        .map_err(|e| VoiceCallError::AudioContext {
            message: format!("Failed to build output stream: {}", e),
        })?;

        stream.play().map_err(|e| VoiceCallError::AudioContext {
            message: format!("Failed to start output stream: {}", e),
        })?;

        Ok(Self {
            mixer,
            stream: Mutex::new(Some(SendableStream(stream))),
            sample_rate,
            latency_bits,
        })
    }
}

fn record_latency(latency: &AtomicU64, info: &cpal::OutputCallbackInfo) {
    let ts = info.timestamp();
    if let Some(delay) = ts.playback.duration_since(&ts.callback) {
        latency.store(delay.as_secs_f64().to_bits(), Ordering::Relaxed);
    }
}

impl OutputDevice for CpalOutputDevice {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn state(&self) -> DeviceState {
        self.mixer.lock().state
    }

    fn resume(&self) -> Result<()> {
        let mut mixer = self.mixer.lock();
        match mixer.state {
            DeviceState::Closed => Err(VoiceCallError::AudioContext {
                message: "cannot resume a closed context".to_string(),
            }),
            _ => {
                mixer.state = DeviceState::Running;
                drop(mixer);
                if let Some(stream) = self.stream.lock().as_ref() {
                    stream.0.play().map_err(|e| VoiceCallError::AudioContext {
                        message: format!("Failed to resume output stream: {}", e),
                    })?;
                }
                Ok(())
            }
        }
    }

    fn current_time(&self) -> f64 {
        self.mixer.lock().current_time()
    }

    fn set_gain(&self, gain: f32) {
        self.mixer.lock().gain = gain;
    }

    fn schedule(
        &self,
        samples: Vec<f32>,
        start_at: f64,
        on_ended: EndedCallback,
    ) -> Result<Box<dyn ScheduledSource>> {
        let mut mixer = self.mixer.lock();
        if mixer.state == DeviceState::Closed {
            return Err(VoiceCallError::AudioContext {
                message: "output context is closed".to_string(),
            });
        }
        let stopped = Arc::new(AtomicBool::new(false));
        let start = (start_at.max(0.0) * mixer.rate as f64).round() as u64;
        mixer.voices.push(Voice {
            start,
            samples,
            stopped: Arc::clone(&stopped),
            on_ended: Some(on_ended),
        });
        Ok(Box::new(CpalSource { stopped }))
    }

    fn latency(&self) -> f64 {
        f64::from_bits(self.latency_bits.load(Ordering::Relaxed))
    }

    fn close(&self) {
        {
            let mut mixer = self.mixer.lock();
            mixer.state = DeviceState::Closed;
            for voice in &mixer.voices {
                voice.stopped.store(true, Ordering::Relaxed);
            }
            mixer.voices.clear();
        }
        if let Some(stream) = self.stream.lock().take() {
            drop(stream);
            debug!("Output stream closed");
        }
    }
}

struct CpalSource {
    stopped: Arc<AtomicBool>,
}

impl ScheduledSource for CpalSource {
    fn stop(&mut self) {
        self.stopped.store(true, Ordering::Relaxed);
    }
}
