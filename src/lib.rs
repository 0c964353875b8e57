//! voicecall - Real-time voice calls with AI characters
//!
//! Streams microphone audio to a live speech model and plays its spoken
//! replies back, one call at a time, with barge-in.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
pub mod character;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod defaults;
#[cfg(all(feature = "cli", feature = "cpal-audio"))]
pub mod diagnostics;
pub mod error;
#[cfg(feature = "cli")]
pub mod output;
pub mod permission;
pub mod session;
pub mod transport;

// Composition root - needs everything
#[cfg(all(feature = "cli", feature = "cpal-audio", feature = "live-ws"))]
pub mod app;

// Seams
pub use audio::device::{AudioBackend, InputDevice, OutputDevice};
pub use character::{CharacterRegistry, RosterRegistry, VoiceProfile};
pub use permission::{MicrophoneAccess, PermissionGate, PermissionState};
pub use transport::{LiveConnector, LiveSession, SessionTransport};

// Session
pub use session::{
    CleanupGuard, SessionSettings, VoiceChatState, VoiceChatStatus, VoiceSessionManager,
};

// Error handling
pub use error::{ErrorKind, Result, VoiceCallError};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
