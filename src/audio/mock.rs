//! In-memory audio backend for tests and headless runs.
//!
//! Output devices keep a virtual clock that only moves when
//! [`MockAudioBackend::advance`] is called, so playback scheduling can be
//! asserted exactly.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tokio::sync::watch;

use crate::audio::device::{
    AudioBackend, CaptureStream, DeviceState, EndedCallback, InputDevice, OutputDevice,
    SampleCallback, ScheduledSource,
};
use crate::error::{Result, VoiceCallError};
use crate::permission::CaptureConstraints;

#[derive(Default)]
struct Failures {
    create_input: Option<String>,
    create_output: Option<String>,
    open_stream: Option<String>,
}

#[derive(Default)]
struct BackendState {
    inputs: Vec<Arc<MockInputDevice>>,
    outputs: Vec<Arc<MockOutputDevice>>,
    failures: Failures,
    start_suspended: bool,
    latency: f64,
}

/// Mock audio backend. Cheap to clone; clones share devices.
#[derive(Clone, Default)]
pub struct MockAudioBackend {
    state: Arc<Mutex<BackendState>>,
    streams: Arc<StreamRegistry>,
}

struct StreamRegistry {
    next_id: AtomicU64,
    open: Mutex<Vec<(u64, SampleCallback)>>,
    opened_total: AtomicUsize,
    last_constraints: Mutex<Option<CaptureConstraints>>,
    held: watch::Sender<bool>,
    waiting: watch::Sender<usize>,
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            open: Mutex::new(Vec::new()),
            opened_total: AtomicUsize::new(0),
            last_constraints: Mutex::new(None),
            held: watch::channel(false).0,
            waiting: watch::channel(0).0,
        }
    }
}

impl MockAudioBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure the mock to fail creating input contexts
    pub fn with_input_failure(self, message: &str) -> Self {
        self.state.lock().failures.create_input = Some(message.to_string());
        self
    }

    /// Configure the mock to fail creating output contexts
    pub fn with_output_failure(self, message: &str) -> Self {
        self.state.lock().failures.create_output = Some(message.to_string());
        self
    }

    /// Configure the mock to fail acquiring the microphone
    pub fn with_stream_failure(self, message: &str) -> Self {
        self.state.lock().failures.open_stream = Some(message.to_string());
        self
    }

    /// New contexts start suspended, like a browser before user activation.
    pub fn with_suspended_contexts(self) -> Self {
        self.state.lock().start_suspended = true;
        self
    }

    /// Base latency reported by every new context.
    pub fn with_latency(self, seconds: f64) -> Self {
        self.state.lock().latency = seconds;
        self
    }

    /// Make microphone acquisition wait until
    /// [`release_streams`](Self::release_streams).
    pub fn hold_streams(&self) {
        self.streams.held.send_replace(true);
    }

    pub fn release_streams(&self) {
        self.streams.held.send_replace(false);
    }

    /// Resolves once some acquisition is parked on the hold.
    pub async fn wait_for_pending_stream(&self) {
        let mut rx = self.streams.waiting.subscribe();
        rx.wait_for(|n| *n > 0).await.ok();
    }

    pub fn clear_stream_failure(&self) {
        self.state.lock().failures.open_stream = None;
    }

    pub fn inputs_created(&self) -> usize {
        self.state.lock().inputs.len()
    }

    pub fn outputs_created(&self) -> usize {
        self.state.lock().outputs.len()
    }

    pub fn last_input(&self) -> Option<Arc<MockInputDevice>> {
        self.state.lock().inputs.last().cloned()
    }

    pub fn last_output(&self) -> Option<Arc<MockOutputDevice>> {
        self.state.lock().outputs.last().cloned()
    }

    /// Contexts that have not been closed.
    pub fn open_contexts(&self) -> usize {
        let state = self.state.lock();
        state
            .inputs
            .iter()
            .filter(|d| d.state() != DeviceState::Closed)
            .count()
            + state
                .outputs
                .iter()
                .filter(|d| d.state() != DeviceState::Closed)
                .count()
    }

    /// Microphone streams currently acquired.
    pub fn open_streams(&self) -> usize {
        self.streams.open.lock().len()
    }

    pub fn streams_opened_total(&self) -> usize {
        self.streams.opened_total.load(Ordering::SeqCst)
    }

    pub fn last_constraints(&self) -> Option<CaptureConstraints> {
        *self.streams.last_constraints.lock()
    }

    /// Feed samples to every open microphone stream, as the capture thread would.
    pub fn push_samples(&self, samples: &[f32]) {
        let callbacks: Vec<SampleCallback> = self
            .streams
            .open
            .lock()
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in callbacks {
            callback(samples);
        }
    }

    /// Move every open output clock forward, firing completions for buffers
    /// that finished.
    pub fn advance(&self, seconds: f64) {
        let outputs: Vec<Arc<MockOutputDevice>> = self.state.lock().outputs.clone();
        for output in outputs {
            if output.state() != DeviceState::Closed {
                output.advance(seconds);
            }
        }
    }
}

impl AudioBackend for MockAudioBackend {
    fn create_input(&self, sample_rate: u32) -> Result<Arc<dyn InputDevice>> {
        let mut state = self.state.lock();
        if let Some(message) = &state.failures.create_input {
            return Err(VoiceCallError::AudioContext {
                message: message.clone(),
            });
        }
        let device = Arc::new(MockInputDevice {
            sample_rate,
            state: Mutex::new(initial_state(state.start_suspended)),
            latency: state.latency,
            streams: Arc::clone(&self.streams),
            backend: Arc::clone(&self.state),
        });
        state.inputs.push(Arc::clone(&device));
        Ok(device)
    }

    fn create_output(&self, sample_rate: u32) -> Result<Arc<dyn OutputDevice>> {
        let mut state = self.state.lock();
        if let Some(message) = &state.failures.create_output {
            return Err(VoiceCallError::AudioContext {
                message: message.clone(),
            });
        }
        let device = Arc::new(MockOutputDevice {
            sample_rate,
            state: Mutex::new(initial_state(state.start_suspended)),
            latency: state.latency,
            clock: Mutex::new(0.0),
            gain: Mutex::new(1.0),
            scheduled: Mutex::new(Vec::new()),
            history: Mutex::new(Vec::new()),
        });
        state.outputs.push(Arc::clone(&device));
        Ok(device)
    }
}

fn initial_state(suspended: bool) -> DeviceState {
    if suspended {
        DeviceState::Suspended
    } else {
        DeviceState::Running
    }
}

pub struct MockInputDevice {
    sample_rate: u32,
    state: Mutex<DeviceState>,
    latency: f64,
    streams: Arc<StreamRegistry>,
    backend: Arc<Mutex<BackendState>>,
}

#[async_trait]
impl InputDevice for MockInputDevice {
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
        constraints: &CaptureConstraints,
        on_samples: SampleCallback,
    ) -> Result<Box<dyn CaptureStream>> {
        let mut held = self.streams.held.subscribe();
        if *held.borrow_and_update() {
            self.streams.waiting.send_modify(|n| *n += 1);
            held.wait_for(|held| !*held).await.ok();
            self.streams.waiting.send_modify(|n| *n -= 1);
        }

        let failure = self.backend.lock().failures.open_stream.clone();
        if let Some(message) = failure {
            return Err(VoiceCallError::AudioDevice { message });
        }
        if self.state() == DeviceState::Closed {
            return Err(VoiceCallError::AudioContext {
                message: "input context is closed".to_string(),
            });
        }

        *self.streams.last_constraints.lock() = Some(*constraints);
        let id = self.streams.next_id.fetch_add(1, Ordering::SeqCst);
        self.streams.open.lock().push((id, on_samples));
        self.streams.opened_total.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(MockCaptureStream {
            id,
            streams: Arc::clone(&self.streams),
        }))
    }

    fn latency(&self) -> f64 {
        self.latency
    }

    fn close(&self) {
        *self.state.lock() = DeviceState::Closed;
    }
}

struct MockCaptureStream {
    id: u64,
    streams: Arc<StreamRegistry>,
}

impl CaptureStream for MockCaptureStream {
    fn stop(&mut self) {
        self.streams.open.lock().retain(|(id, _)| *id != self.id);
    }
}

impl Drop for MockCaptureStream {
    fn drop(&mut self) {
        self.stop();
    }
}

struct PendingBuffer {
    end: f64,
    stopped: Arc<AtomicBool>,
    on_ended: Option<EndedCallback>,
}

/// A buffer as it was handed to the device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledRecord {
    pub start: f64,
    pub duration: f64,
    pub device_time: f64,
}

pub struct MockOutputDevice {
    sample_rate: u32,
    state: Mutex<DeviceState>,
    latency: f64,
    clock: Mutex<f64>,
    gain: Mutex<f32>,
    scheduled: Mutex<Vec<PendingBuffer>>,
    history: Mutex<Vec<ScheduledRecord>>,
}

impl MockOutputDevice {
    /// Every buffer scheduled on this device, in order.
    pub fn history(&self) -> Vec<ScheduledRecord> {
        self.history.lock().clone()
    }

    pub fn gain(&self) -> f32 {
        *self.gain.lock()
    }

    /// Buffers neither finished nor stopped.
    pub fn playing(&self) -> usize {
        self.scheduled
            .lock()
            .iter()
            .filter(|b| !b.stopped.load(Ordering::SeqCst))
            .count()
    }

    pub fn set_time(&self, seconds: f64) {
        *self.clock.lock() = seconds;
    }

    fn advance(&self, seconds: f64) {
        let now = {
            let mut clock = self.clock.lock();
            *clock += seconds;
            *clock
        };

        let finished: Vec<EndedCallback> = {
            let mut scheduled = self.scheduled.lock();
            let mut done = Vec::new();
            scheduled.retain_mut(|buffer| {
                if buffer.stopped.load(Ordering::SeqCst) {
                    return false;
                }
                if buffer.end <= now {
                    if let Some(cb) = buffer.on_ended.take() {
                        done.push(cb);
                    }
                    return false;
                }
                true
            });
            done
        };

        for callback in finished {
            callback();
        }
    }
}

impl OutputDevice for MockOutputDevice {
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

    fn current_time(&self) -> f64 {
        *self.clock.lock()
    }

    fn set_gain(&self, gain: f32) {
        *self.gain.lock() = gain;
    }

    fn schedule(
        &self,
        samples: Vec<f32>,
        start_at: f64,
        on_ended: EndedCallback,
    ) -> Result<Box<dyn ScheduledSource>> {
        if self.state() == DeviceState::Closed {
            return Err(VoiceCallError::AudioContext {
                message: "output context is closed".to_string(),
            });
        }
        let duration = samples.len() as f64 / self.sample_rate as f64;
        let stopped = Arc::new(AtomicBool::new(false));

        self.history.lock().push(ScheduledRecord {
            start: start_at,
            duration,
            device_time: self.current_time(),
        });
        self.scheduled.lock().push(PendingBuffer {
            end: start_at + duration,
            stopped: Arc::clone(&stopped),
            on_ended: Some(on_ended),
        });

        Ok(Box::new(MockSource { stopped }))
    }

    fn latency(&self) -> f64 {
        self.latency
    }

    fn close(&self) {
        *self.state.lock() = DeviceState::Closed;
        for buffer in self.scheduled.lock().iter() {
            buffer.stopped.store(true, Ordering::SeqCst);
        }
    }
}

struct MockSource {
    stopped: Arc<AtomicBool>,
}

impl ScheduledSource for MockSource {
    fn stop(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}
