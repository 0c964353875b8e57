//! WAV file standing in for the microphone.
//!
//! Useful for scripted calls and for exercising a live session without
//! audio hardware. Samples are fed in real time, in 20ms blocks.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::audio::device::{
    AudioBackend, CaptureStream, DeviceState, InputDevice, OutputDevice, SampleCallback,
};
use crate::error::{Result, VoiceCallError};
use crate::permission::{CaptureConstraints, MediaError, MicrophoneAccess, PermissionState};

/// Block length fed to the capture callback.
const BLOCK_MS: u64 = 20;

/// Decode WAV data to mono `f32` at `target_rate`.
///
/// Supports 16-bit integer and 32-bit float files with any channel count.
pub fn decode_wav(reader: impl Read, target_rate: u32) -> Result<Vec<f32>> {
    let mut wav_reader = hound::WavReader::new(reader).map_err(|e| VoiceCallError::AudioDevice {
        message: format!("Failed to parse WAV file: {}", e),
    })?;

    let spec = wav_reader.spec();
    let read_err = |e: hound::Error| VoiceCallError::AudioDevice {
        message: format!("Failed to read WAV samples: {}", e),
    };

    let interleaved: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Int, 16) => wav_reader
            .samples::<i16>()
            .map(|s| s.map(crate::audio::pcm::i16_to_f32))
            .collect::<std::result::Result<_, _>>()
            .map_err(read_err)?,
        (hound::SampleFormat::Float, 32) => wav_reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(read_err)?,
        (format, bits) => {
            return Err(VoiceCallError::AudioDevice {
                message: format!("Unsupported WAV format: {:?} {}-bit", format, bits),
            });
        }
    };

    let mono = downmix(&interleaved, spec.channels as usize);
    Ok(resample(&mono, spec.sample_rate, target_rate))
}

/// Average interleaved channels into one.
pub fn downmix(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Simple linear interpolation resampling.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = source_pos.floor() as usize;
            let fraction = (source_pos - source_idx as f64) as f32;

            if source_idx + 1 >= samples.len() {
                samples[samples.len() - 1]
            } else {
                let left = samples[source_idx];
                let right = samples[source_idx + 1];
                left + (right - left) * fraction
            }
        })
        .collect()
}

/// Backend whose microphone plays a WAV file; output goes to `output`.
pub struct WavBackend {
    samples: Arc<Vec<f32>>,
    output: Arc<dyn AudioBackend>,
}

impl WavBackend {
    pub fn new(samples: Vec<f32>, output: Arc<dyn AudioBackend>) -> Self {
        Self {
            samples: Arc::new(samples),
            output,
        }
    }

    /// Load `path`, resampled to `sample_rate`.
    pub fn open(path: &Path, sample_rate: u32, output: Arc<dyn AudioBackend>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let samples = decode_wav(std::io::BufReader::new(file), sample_rate)?;
        info!(
            "Loaded {} ({:.1}s) as microphone input",
            path.display(),
            samples.len() as f64 / sample_rate as f64
        );
        Ok(Self::new(samples, output))
    }

    pub fn duration(&self, sample_rate: u32) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / sample_rate.max(1) as f64)
    }
}

impl AudioBackend for WavBackend {
    fn create_input(&self, sample_rate: u32) -> Result<Arc<dyn InputDevice>> {
        Ok(Arc::new(WavInputDevice {
            samples: Arc::clone(&self.samples),
            sample_rate,
            state: Mutex::new(DeviceState::Running),
            position: Arc::new(Mutex::new(0)),
        }))
    }

    fn create_output(&self, sample_rate: u32) -> Result<Arc<dyn OutputDevice>> {
        self.output.create_output(sample_rate)
    }
}

struct WavInputDevice {
    samples: Arc<Vec<f32>>,
    sample_rate: u32,
    state: Mutex<DeviceState>,
    // Shared across streams so muting and unmuting resumes where it left off.
    position: Arc<Mutex<usize>>,
}

#[async_trait]
impl InputDevice for WavInputDevice {
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
        let samples = Arc::clone(&self.samples);
        let position = Arc::clone(&self.position);
        let block = (self.sample_rate as u64 * BLOCK_MS / 1000).max(1) as usize;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(BLOCK_MS));
            let silence = vec![0.0f32; block];
            loop {
                ticker.tick().await;
                let chunk = {
                    let mut pos = position.lock();
                    let start = (*pos).min(samples.len());
                    let end = (start + block).min(samples.len());
                    *pos = end;
                    samples[start..end].to_vec()
                };
                // Past the end of the file the microphone goes quiet.
                if chunk.is_empty() {
                    on_samples(&silence);
                } else {
                    on_samples(&chunk);
                }
            }
        });

        debug!("WAV microphone stream opened");
        Ok(Box::new(WavCaptureStream {
            task: Some(task.abort_handle()),
        }))
    }

    fn close(&self) {
        *self.state.lock() = DeviceState::Closed;
    }
}

struct WavCaptureStream {
    task: Option<tokio::task::AbortHandle>,
}

impl CaptureStream for WavCaptureStream {
    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for WavCaptureStream {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Permission source for a WAV microphone: always granted.
pub struct WavMicrophone;

#[async_trait]
impl MicrophoneAccess for WavMicrophone {
    async fn query_permission(&self) -> std::result::Result<Option<PermissionState>, MediaError> {
        Ok(Some(PermissionState::Granted))
    }

    async fn probe(
        &self,
        _constraints: &CaptureConstraints,
    ) -> std::result::Result<(), MediaError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::mock::MockAudioBackend;
    use std::io::Cursor;

    fn make_wav_data(sample_rate: u32, channels: u16, samples: &[i16]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
        cursor.into_inner()
    }

    #[test]
    fn decode_16khz_mono_matches_exactly() {
        let wav = make_wav_data(16000, 1, &[0, 16384, -16384]);
        let samples = decode_wav(Cursor::new(wav), 16000).unwrap();
        assert_eq!(samples, vec![0.0, 0.5, -0.5]);
    }

    #[test]
    fn decode_stereo_downmixes_to_mono() {
        let wav = make_wav_data(16000, 2, &[16384, 0, -16384, -16384]);
        let samples = decode_wav(Cursor::new(wav), 16000).unwrap();
        assert_eq!(samples, vec![0.25, -0.5]);
    }

    #[test]
    fn decode_48khz_resamples_to_16khz() {
        let wav = make_wav_data(48000, 1, &vec![0i16; 48000]);
        let samples = decode_wav(Cursor::new(wav), 16000).unwrap();
        assert!(samples.len() >= 15900 && samples.len() <= 16100);
    }

    #[test]
    fn decode_rejects_garbage() {
        let result = decode_wav(Cursor::new(b"not a wav file".to_vec()), 16000);
        assert!(matches!(result, Err(VoiceCallError::AudioDevice { .. })));
    }

    #[test]
    fn resample_preserves_constant_signal() {
        let input = vec![0.25f32; 441];
        let output = resample(&input, 44100, 16000);
        assert!((160..=161).contains(&output.len()));
        assert!(output.iter().all(|&s| (s - 0.25).abs() < 1e-6));
    }

    #[test]
    fn resample_same_rate_is_identity() {
        let input = vec![0.1f32, 0.2, 0.3];
        assert_eq!(resample(&input, 16000, 16000), input);
    }

    #[tokio::test(start_paused = true)]
    async fn stream_feeds_file_then_silence() {
        let output = Arc::new(MockAudioBackend::new());
        let backend = WavBackend::new(vec![0.5; 480], output);
        let input = backend.create_input(16000).unwrap();

        let received = Arc::new(Mutex::new(Vec::<f32>::new()));
        let sink = Arc::clone(&received);
        let mut stream = input
            .open_stream(
                &CaptureConstraints::voice(),
                Arc::new(move |s: &[f32]| sink.lock().extend_from_slice(s)),
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(65)).await;
        stream.stop();

        let received = received.lock();
        // 320 samples per 20ms block: one full block, the 160 left, then silence
        assert!(received.len() >= 800);
        assert!(received[..480].iter().all(|&s| s == 0.5));
        assert!(received[480..].iter().all(|&s| s == 0.0));
    }

    #[tokio::test]
    async fn wav_microphone_is_always_granted() {
        let mic = WavMicrophone;
        assert_eq!(
            mic.query_permission().await,
            Ok(Some(PermissionState::Granted))
        );
        assert!(mic.probe(&CaptureConstraints::voice()).await.is_ok());
    }
}
