//! Capture and playback graphs for one voice call.
//!
//! The capture graph turns microphone samples into fixed-size frames. The
//! playback graph queues inbound PCM back to back on the output device and
//! tracks every queued buffer until it finishes, so a barge-in can silence
//! all of them at once.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use crate::audio::device::{
    AudioBackend, CaptureStream, DeviceState, InputDevice, OutputDevice, SampleCallback,
    ScheduledSource,
};
use crate::audio::metrics::{AudioMetrics, GlitchMonitor};
use crate::audio::pcm;
use crate::audio::scheduler::PlaybackScheduler;
use crate::config::AudioConfig;
use crate::defaults;
use crate::error::{Result, VoiceCallError};
use crate::permission::CaptureConstraints;

/// Receives one fixed-size frame of captured samples.
pub type FrameCallback = Arc<dyn Fn(&[f32]) + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub frame_size: usize,
    pub output_gain: f32,
    pub constraints: CaptureConstraints,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            input_sample_rate: defaults::INPUT_SAMPLE_RATE,
            output_sample_rate: defaults::OUTPUT_SAMPLE_RATE,
            frame_size: defaults::CAPTURE_BUFFER_SIZE,
            output_gain: defaults::OUTPUT_GAIN,
            constraints: CaptureConstraints::voice(),
        }
    }
}

impl From<&AudioConfig> for PipelineSettings {
    fn from(config: &AudioConfig) -> Self {
        Self {
            input_sample_rate: config.input_sample_rate,
            output_sample_rate: config.output_sample_rate,
            frame_size: config.capture_buffer_size,
            output_gain: config.output_gain,
            constraints: CaptureConstraints {
                echo_cancellation: config.echo_cancellation,
                noise_suppression: config.noise_suppression,
                sample_rate: Some(config.input_sample_rate),
            },
        }
    }
}

/// Regroups arbitrary-length sample blocks into frames of `frame_size`.
#[derive(Debug)]
struct FrameChunker {
    frame_size: usize,
    buffer: Vec<f32>,
}

impl FrameChunker {
    fn new(frame_size: usize) -> Self {
        Self {
            frame_size: frame_size.max(1),
            buffer: Vec::with_capacity(frame_size.max(1)),
        }
    }

    fn push(&mut self, samples: &[f32], mut emit: impl FnMut(&[f32])) {
        let mut rest = samples;
        while !rest.is_empty() {
            let take = (self.frame_size - self.buffer.len()).min(rest.len());
            self.buffer.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if self.buffer.len() == self.frame_size {
                emit(&self.buffer);
                self.buffer.clear();
            }
        }
    }
}

struct CaptureGraph {
    stream: Box<dyn CaptureStream>,
}

type PendingSources = Arc<Mutex<HashMap<u64, Box<dyn ScheduledSource>>>>;

#[derive(Default)]
struct PlaybackGraph {
    pending: PendingSources,
    clock: PlaybackScheduler,
    next_id: u64,
    glitches: GlitchMonitor,
}

pub struct AudioPipeline {
    backend: Arc<dyn AudioBackend>,
    settings: PipelineSettings,
    input: Option<Arc<dyn InputDevice>>,
    output: Option<Arc<dyn OutputDevice>>,
    capture: Option<CaptureGraph>,
    playback: PlaybackGraph,
}

impl AudioPipeline {
    pub fn new(backend: Arc<dyn AudioBackend>, settings: PipelineSettings) -> Self {
        Self {
            backend,
            settings,
            input: None,
            output: None,
            capture: None,
            playback: PlaybackGraph::default(),
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    fn ensure_input(&mut self) -> Result<Arc<dyn InputDevice>> {
        match &self.input {
            Some(input) if input.state() != DeviceState::Closed => Ok(Arc::clone(input)),
            _ => {
                debug!(
                    "Creating input context at {}Hz",
                    self.settings.input_sample_rate
                );
                let input = self.backend.create_input(self.settings.input_sample_rate)?;
                self.input = Some(Arc::clone(&input));
                Ok(input)
            }
        }
    }

    fn ensure_output(&mut self) -> Result<Arc<dyn OutputDevice>> {
        match &self.output {
            Some(output) if output.state() != DeviceState::Closed => Ok(Arc::clone(output)),
            _ => {
                debug!(
                    "Creating output context at {}Hz",
                    self.settings.output_sample_rate
                );
                let output = self
                    .backend
                    .create_output(self.settings.output_sample_rate)?;
                output.set_gain(self.settings.output_gain);
                self.output = Some(Arc::clone(&output));
                Ok(output)
            }
        }
    }

    /// Create both contexts if they are missing or closed.
    pub fn ensure_contexts(&mut self) -> Result<()> {
        self.ensure_input()?;
        self.ensure_output()?;
        Ok(())
    }

    /// Close both contexts and open fresh ones.
    pub fn reset_contexts(&mut self) -> Result<()> {
        self.stop_capture();
        self.stop_playback();
        self.close_contexts();
        self.ensure_contexts()
    }

    /// Align the scheduling clock with the output device.
    pub fn init_playback_clock(&mut self) {
        if let Some(output) = &self.output
            && output.state() != DeviceState::Closed
        {
            self.playback.clock.sync_to(output.current_time());
            self.playback.glitches.reset();
            debug!("Playback clock at {:.3}s", self.playback.clock.next_start());
        }
    }

    pub fn has_contexts(&self) -> bool {
        let open = |state: Option<DeviceState>| state.is_some_and(|s| s != DeviceState::Closed);
        open(self.input.as_ref().map(|i| i.state()))
            && open(self.output.as_ref().map(|o| o.state()))
    }

    pub fn is_capturing(&self) -> bool {
        self.capture.is_some()
    }

    /// Acquire the microphone and deliver fixed-size frames to `on_frame`.
    ///
    /// Does nothing if capture is already running.
    pub async fn start_capture(&mut self, on_frame: FrameCallback) -> Result<()> {
        if self.capture.is_some() {
            debug!("Capture already active");
            return Ok(());
        }

        let input = self.ensure_input()?;
        input.resume()?;

        let chunker = Arc::new(Mutex::new(FrameChunker::new(self.settings.frame_size)));
        let on_samples: SampleCallback = Arc::new(move |samples: &[f32]| {
            chunker.lock().push(samples, |frame| on_frame(frame));
        });

        let stream = input
            .open_stream(&self.settings.constraints, on_samples)
            .await?;
        self.capture = Some(CaptureGraph { stream });
        info!(
            "Capture started ({} samples per frame)",
            self.settings.frame_size
        );
        Ok(())
    }

    /// Stop and release the microphone. Returns whether capture was running.
    pub fn stop_capture(&mut self) -> bool {
        match self.capture.take() {
            Some(mut graph) => {
                graph.stream.stop();
                debug!("Capture stopped");
                true
            }
            None => false,
        }
    }

    /// Queue 16-bit little-endian mono PCM for gapless playback.
    ///
    /// Returns the start time on the output clock.
    pub fn play_chunk(&mut self, pcm_bytes: &[u8]) -> Result<f64> {
        let output = match &self.output {
            Some(output) if output.state() != DeviceState::Closed => Arc::clone(output),
            _ => {
                return Err(VoiceCallError::AudioContext {
                    message: "output context is not available".to_string(),
                });
            }
        };

        if output.state() == DeviceState::Suspended {
            debug!("Resuming suspended output context");
            output.resume()?;
        }

        let samples = pcm::pcm_bytes_to_f32(pcm_bytes)?;
        let duration = pcm::duration_secs(samples.len(), output.sample_rate());
        let now = output.current_time();
        self.playback.glitches.check(now);

        let mut clock = self.playback.clock.clone();
        let start = clock.schedule(now, duration);

        let id = self.playback.next_id;
        self.playback.next_id += 1;

        let pending = Arc::clone(&self.playback.pending);
        let mut sources = self.playback.pending.lock();
        let source = output.schedule(
            samples,
            start,
            Box::new(move || {
                if pending.lock().remove(&id).is_some() {
                    trace!("Playback source {} ended", id);
                }
            }),
        )?;
        sources.insert(id, source);
        drop(sources);

        self.playback.clock = clock;
        trace!("Scheduled {:.3}s of audio at {:.3}s", duration, start);
        Ok(start)
    }

    fn drain_pending(&mut self) -> usize {
        let drained: Vec<Box<dyn ScheduledSource>> = self
            .playback
            .pending
            .lock()
            .drain()
            .map(|(_, source)| source)
            .collect();
        let count = drained.len();
        for mut source in drained {
            source.stop();
        }
        count
    }

    /// Silence everything queued and restart the clock at zero.
    pub fn interrupt(&mut self) -> usize {
        let stopped = self.drain_pending();
        self.playback.clock.reset();
        debug!("Interrupted playback, stopped {} sources", stopped);
        stopped
    }

    /// Silence everything queued, leaving the clock alone.
    pub fn stop_playback(&mut self) -> usize {
        let stopped = self.drain_pending();
        if stopped > 0 {
            debug!("Stopped {} audio sources", stopped);
        }
        stopped
    }

    pub fn pending_sources(&self) -> usize {
        self.playback.pending.lock().len()
    }

    pub fn next_start(&self) -> f64 {
        self.playback.clock.next_start()
    }

    fn close_contexts(&mut self) {
        if let Some(input) = self.input.take()
            && input.state() != DeviceState::Closed
        {
            debug!("Closing input context");
            input.close();
        }
        if let Some(output) = self.output.take()
            && output.state() != DeviceState::Closed
        {
            debug!("Closing output context");
            output.close();
        }
    }

    /// Release every device. Safe to call any number of times.
    pub fn teardown(&mut self) {
        self.stop_capture();
        self.stop_playback();
        self.close_contexts();
        self.playback.glitches.reset();
    }

    pub fn metrics(&self) -> AudioMetrics {
        let pending_sources = self.pending_sources();
        AudioMetrics {
            input_sample_rate: self.input.as_ref().map(|i| i.sample_rate()),
            output_sample_rate: self.output.as_ref().map(|o| o.sample_rate()),
            input_latency: self.input.as_ref().map_or(0.0, |i| i.latency()),
            output_latency: self.output.as_ref().map_or(0.0, |o| o.latency()),
            input_state: self.input.as_ref().map(|i| i.state()),
            output_state: self.output.as_ref().map(|o| o.state()),
            pending_sources,
            estimated_memory_kb: pending_sources * 1024,
            glitches: self.playback.glitches.glitch_count(),
        }
    }

    pub fn log_performance_warnings(&self) {
        let metrics = self.metrics();
        if metrics.warnings().is_empty() {
            trace!("Audio performance nominal");
        } else {
            warn!("Audio performance degraded");
            metrics.log_performance_warnings();
        }
    }
}

impl Drop for AudioPipeline {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::mock::MockAudioBackend;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn pipeline() -> (AudioPipeline, MockAudioBackend) {
        let backend = MockAudioBackend::new();
        let pipeline = AudioPipeline::new(Arc::new(backend.clone()), PipelineSettings::default());
        (pipeline, backend)
    }

    /// `ms` milliseconds of 24 kHz PCM silence.
    fn pcm_ms(ms: usize) -> Vec<u8> {
        vec![0u8; 24 * ms * 2]
    }

    #[test]
    fn test_frame_chunker_emits_fixed_frames() {
        let mut chunker = FrameChunker::new(4);
        let mut frames = Vec::new();

        chunker.push(&[1.0, 2.0, 3.0], |f| frames.push(f.to_vec()));
        assert!(frames.is_empty());
        chunker.push(&[4.0, 5.0, 6.0, 7.0, 8.0, 9.0], |f| frames.push(f.to_vec()));

        assert_eq!(
            frames,
            vec![vec![1.0, 2.0, 3.0, 4.0], vec![5.0, 6.0, 7.0, 8.0]]
        );
        assert_eq!(chunker.buffer, vec![9.0]);
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = AudioConfig::default();
        config.capture_buffer_size = 512;
        config.echo_cancellation = false;
        let settings = PipelineSettings::from(&config);

        assert_eq!(settings.frame_size, 512);
        assert!(!settings.constraints.echo_cancellation);
        assert_eq!(settings.constraints.sample_rate, Some(16000));
    }

    #[test]
    fn test_play_chunk_without_output_fails() {
        let (mut pipeline, _backend) = pipeline();
        assert!(matches!(
            pipeline.play_chunk(&pcm_ms(10)),
            Err(VoiceCallError::AudioContext { .. })
        ));
    }

    #[test]
    fn test_play_chunk_schedules_back_to_back() {
        let (mut pipeline, backend) = pipeline();
        pipeline.ensure_contexts().unwrap();
        pipeline.init_playback_clock();

        assert_eq!(pipeline.play_chunk(&pcm_ms(500)).unwrap(), 0.0);
        assert_eq!(pipeline.play_chunk(&pcm_ms(250)).unwrap(), 0.5);
        assert_eq!(pipeline.pending_sources(), 2);
        assert_eq!(pipeline.next_start(), 0.75);

        backend.advance(0.6);
        assert_eq!(pipeline.pending_sources(), 1);
        backend.advance(0.2);
        assert_eq!(pipeline.pending_sources(), 0);
    }

    #[test]
    fn test_play_chunk_rejects_odd_bytes_without_moving_clock() {
        let (mut pipeline, _backend) = pipeline();
        pipeline.ensure_contexts().unwrap();

        assert!(matches!(
            pipeline.play_chunk(&[0u8; 3]),
            Err(VoiceCallError::Decode { .. })
        ));
        assert_eq!(pipeline.next_start(), 0.0);
        assert_eq!(pipeline.pending_sources(), 0);
    }

    #[test]
    fn test_play_chunk_resumes_suspended_output() {
        let backend = MockAudioBackend::new().with_suspended_contexts();
        let mut pipeline =
            AudioPipeline::new(Arc::new(backend.clone()), PipelineSettings::default());
        pipeline.ensure_contexts().unwrap();

        pipeline.play_chunk(&pcm_ms(10)).unwrap();
        assert_eq!(
            backend.last_output().unwrap().state(),
            DeviceState::Running
        );
    }

    #[test]
    fn test_output_gain_applied() {
        let backend = MockAudioBackend::new();
        let settings = PipelineSettings {
            output_gain: 0.25,
            ..PipelineSettings::default()
        };
        let mut pipeline = AudioPipeline::new(Arc::new(backend.clone()), settings);
        pipeline.ensure_contexts().unwrap();
        assert_eq!(backend.last_output().unwrap().gain(), 0.25);
    }

    #[test]
    fn test_interrupt_clears_pending_and_clock() {
        for pending in [0usize, 1, 5] {
            let (mut pipeline, backend) = pipeline();
            pipeline.ensure_contexts().unwrap();
            for _ in 0..pending {
                pipeline.play_chunk(&pcm_ms(100)).unwrap();
            }

            assert_eq!(pipeline.interrupt(), pending);
            assert_eq!(pipeline.pending_sources(), 0);
            assert_eq!(pipeline.next_start(), 0.0);
            assert_eq!(backend.last_output().unwrap().playing(), 0);
        }
    }

    #[test]
    fn test_stop_playback_keeps_clock() {
        let (mut pipeline, _backend) = pipeline();
        pipeline.ensure_contexts().unwrap();
        pipeline.play_chunk(&pcm_ms(100)).unwrap();

        assert_eq!(pipeline.stop_playback(), 1);
        assert!((pipeline.next_start() - 0.1).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_capture_delivers_fixed_frames() {
        let (mut pipeline, backend) = pipeline();
        let frames = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&frames);
        pipeline
            .start_capture(Arc::new(move |frame: &[f32]| {
                assert_eq!(frame.len(), 256);
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .await
            .unwrap();

        backend.push_samples(&[0.0; 600]);
        assert_eq!(frames.load(Ordering::SeqCst), 2);
        assert_eq!(
            backend.last_constraints(),
            Some(CaptureConstraints::voice())
        );
    }

    #[tokio::test]
    async fn test_start_capture_twice_acquires_once() {
        let (mut pipeline, backend) = pipeline();
        pipeline.start_capture(Arc::new(|_: &[f32]| {})).await.unwrap();
        pipeline.start_capture(Arc::new(|_: &[f32]| {})).await.unwrap();

        assert_eq!(backend.streams_opened_total(), 1);
        assert!(pipeline.stop_capture());
        assert!(!pipeline.stop_capture());
        assert_eq!(backend.open_streams(), 0);
    }

    #[tokio::test]
    async fn test_start_capture_recreates_closed_input() {
        let (mut pipeline, backend) = pipeline();
        pipeline.ensure_contexts().unwrap();
        backend.last_input().unwrap().close();

        pipeline.start_capture(Arc::new(|_: &[f32]| {})).await.unwrap();
        assert_eq!(backend.inputs_created(), 2);
    }

    #[tokio::test]
    async fn test_start_capture_surfaces_device_error() {
        let backend = MockAudioBackend::new().with_stream_failure("device busy");
        let mut pipeline =
            AudioPipeline::new(Arc::new(backend.clone()), PipelineSettings::default());

        let result = pipeline.start_capture(Arc::new(|_: &[f32]| {})).await;
        assert!(matches!(result, Err(VoiceCallError::AudioDevice { .. })));
        assert!(!pipeline.is_capturing());
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent() {
        let (mut pipeline, backend) = pipeline();
        pipeline.ensure_contexts().unwrap();
        pipeline.start_capture(Arc::new(|_: &[f32]| {})).await.unwrap();
        pipeline.play_chunk(&pcm_ms(100)).unwrap();

        pipeline.teardown();
        let after_first = (
            pipeline.is_capturing(),
            pipeline.pending_sources(),
            pipeline.has_contexts(),
            backend.open_contexts(),
            backend.open_streams(),
        );
        pipeline.teardown();
        let after_second = (
            pipeline.is_capturing(),
            pipeline.pending_sources(),
            pipeline.has_contexts(),
            backend.open_contexts(),
            backend.open_streams(),
        );

        assert_eq!(after_first, (false, 0, false, 0, 0));
        assert_eq!(after_first, after_second);
    }

    #[test]
    fn test_reset_contexts_never_reuses_closed() {
        let (mut pipeline, backend) = pipeline();
        pipeline.ensure_contexts().unwrap();
        pipeline.reset_contexts().unwrap();

        assert_eq!(backend.inputs_created(), 2);
        assert_eq!(backend.outputs_created(), 2);
        assert_eq!(backend.open_contexts(), 2);
    }

    #[test]
    fn test_metrics_reflect_devices() {
        let backend = MockAudioBackend::new().with_latency(0.08);
        let mut pipeline =
            AudioPipeline::new(Arc::new(backend.clone()), PipelineSettings::default());

        let metrics = pipeline.metrics();
        assert_eq!(metrics.input_state, None);

        pipeline.ensure_contexts().unwrap();
        pipeline.play_chunk(&pcm_ms(10)).unwrap();
        let metrics = pipeline.metrics();

        assert_eq!(metrics.input_sample_rate, Some(16000));
        assert_eq!(metrics.output_sample_rate, Some(24000));
        assert_eq!(metrics.pending_sources, 1);
        assert_eq!(metrics.estimated_memory_kb, 1024);
        assert_eq!(metrics.warnings().len(), 2);
    }
}
