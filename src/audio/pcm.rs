//! PCM framing to and from the wire.
//!
//! The live session carries 16-bit little-endian mono PCM, base64-encoded
//! inside JSON. Outbound audio is 16 kHz, inbound audio is 24 kHz.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::defaults;
use crate::error::{Result, VoiceCallError};

/// One base64 media chunk as it travels inside a JSON message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioBlob {
    pub mime_type: String,
    pub data: String,
}

/// MIME type for raw PCM at `sample_rate`.
pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={sample_rate}")
}

/// Convert one float sample to 16-bit, saturating at the edges.
#[inline]
pub fn f32_to_i16(sample: f32) -> i16 {
    let scaled = sample.clamp(-1.0, 1.0) * 32768.0;
    scaled.clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

#[inline]
pub fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

/// Encode captured samples as a 16 kHz PCM blob.
pub fn encode_blob(samples: &[f32]) -> AudioBlob {
    encode_blob_at(samples, defaults::INPUT_SAMPLE_RATE)
}

pub fn encode_blob_at(samples: &[f32], sample_rate: u32) -> AudioBlob {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        bytes.extend_from_slice(&f32_to_i16(sample).to_le_bytes());
    }
    AudioBlob {
        mime_type: pcm_mime_type(sample_rate),
        data: STANDARD.encode(bytes),
    }
}

/// Decode base64 text into raw bytes.
pub fn decode_base64(data: &str) -> Result<Vec<u8>> {
    STANDARD.decode(data).map_err(|e| VoiceCallError::Decode {
        message: format!("invalid base64: {}", e),
    })
}

/// Interpret little-endian 16-bit PCM bytes as float samples.
pub fn pcm_bytes_to_f32(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 2 != 0 {
        return Err(VoiceCallError::Decode {
            message: format!("odd PCM byte length {}", bytes.len()),
        });
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16_to_f32(i16::from_le_bytes([pair[0], pair[1]])))
        .collect())
}

/// Decode a base64 PCM payload straight to float samples.
pub fn decode_pcm(data: &str) -> Result<Vec<f32>> {
    pcm_bytes_to_f32(&decode_base64(data)?)
}

/// Playback length of `samples` mono samples at `sample_rate`.
pub fn duration_secs(samples: usize, sample_rate: u32) -> f64 {
    if sample_rate == 0 {
        return 0.0;
    }
    samples as f64 / sample_rate as f64
}
