//! Default configuration constants for voicecall.
//!
//! This module provides shared constants used across different configuration types
//! to ensure consistency and eliminate duplication.

/// Microphone capture sample rate in Hz.
///
/// The live speech model expects 16kHz mono PCM on the input side.
pub const INPUT_SAMPLE_RATE: u32 = 16000;

/// Playback sample rate in Hz.
///
/// Audio returned by the live speech model is 24kHz mono PCM.
pub const OUTPUT_SAMPLE_RATE: u32 = 24000;

/// Samples per captured frame handed to the transport.
///
/// 256 samples at 16kHz is 16ms, small enough for low-latency barge-in.
pub const CAPTURE_BUFFER_SIZE: usize = 256;

/// Audio frames queued for the socket writer before new frames are dropped.
///
/// 64 frames of 256 samples is about one second of speech.
pub const OUTBOUND_QUEUE_FRAMES: usize = 64;

/// Output gain applied to all playback.
pub const OUTPUT_GAIN: f32 = 1.0;

/// Delay between the live session opening and the microphone starting.
pub const SETTLE_DELAY_MS: u64 = 100;

/// Grace period before a deferred cleanup re-checks the lifecycle flags.
///
/// Long enough for a connect that was in flight when the owner detached to finish.
pub const CLEANUP_GRACE_MS: u64 = 2000;

/// How many times a deferred cleanup re-checks before giving up.
pub const CLEANUP_RETRIES: u32 = 5;

/// Live API WebSocket endpoint.
pub const LIVE_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// REST endpoint used by diagnostics to verify the API key.
pub const MODELS_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Native-audio dialog model used for voice calls.
pub const LIVE_MODEL: &str = "gemini-2.5-flash-preview-native-audio-dialog";

/// Language code for speech output.
pub const LANGUAGE_CODE: &str = "id-ID";

/// English language code, for characters configured to speak English.
pub const ENGLISH_LANGUAGE_CODE: &str = "en-US";

/// Environment variable holding the API key.
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

/// Input latency above which a performance warning is logged (seconds).
pub const LATENCY_WARN_SECS: f64 = 0.05;

/// Pending playback sources above which a performance warning is logged.
pub const PENDING_SOURCES_WARN: usize = 10;

/// Estimated memory above which a performance warning is logged (KB).
pub const MEMORY_WARN_KB: usize = 10240;

/// Gap between audio chunks treated as a glitch (seconds).
pub const GLITCH_GAP_SECS: f64 = 0.1;

/// Glitch count after which a larger buffer is recommended.
pub const GLITCH_ALERT_COUNT: u32 = 5;
