//! Error types for voicecall.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoiceCallError {
    // Configuration errors
    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Microphone permission errors
    #[error("Microphone permission denied: {message}")]
    PermissionDenied { message: String },

    #[error("No microphone found: {message}")]
    NoMicrophone { message: String },

    #[error("Microphone access is not supported: {message}")]
    Unsupported { message: String },

    // Audio device errors
    #[error("Audio context failed: {message}")]
    AudioContext { message: String },

    #[error("Audio device error: {message}")]
    AudioDevice { message: String },

    // Session transport errors
    #[error("API key is not set (expected {env_var})")]
    ApiKeyMissing { env_var: String },

    #[error("Failed to connect to live session: {message}")]
    ConnectFailed { message: String },

    #[error("Connection closed unexpectedly (code {code}): {reason}")]
    ConnectionClosed { code: u16, reason: String },

    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Audio decode failed: {message}")]
    Decode { message: String },

    #[error("A connection attempt is already in progress")]
    AlreadyConnecting,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("No session available")]
    NoSession,

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, VoiceCallError>;

/// Coarse classification of failures, as shown to the person on the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    PermissionDenied,
    NoMicrophone,
    ApiKeyMissing,
    ApiConnectionFailed,
    AudioContextFailed,
    NetworkError,
    UnsupportedPlatform,
    Unknown,
}

impl ErrorKind {
    /// Short, non-technical message suitable for an error banner.
    pub fn user_message(self) -> &'static str {
        match self {
            ErrorKind::PermissionDenied => {
                "Microphone access is required for voice chat. Please allow microphone access and try again."
            }
            ErrorKind::NoMicrophone => {
                "No microphone detected. Please connect a microphone and try again."
            }
            ErrorKind::ApiKeyMissing => {
                "Voice chat service is not configured. Please contact support."
            }
            ErrorKind::ApiConnectionFailed => {
                "Unable to connect to voice chat service. Please check your internet connection and try again."
            }
            ErrorKind::AudioContextFailed => {
                "Unable to initialize audio system. Please restart the call and try again."
            }
            ErrorKind::NetworkError => {
                "Network connection error. Please check your internet connection and try again."
            }
            ErrorKind::UnsupportedPlatform => "This system does not support voice chat.",
            ErrorKind::Unknown => {
                "An unexpected error occurred. Please try again or contact support."
            }
        }
    }

    /// Things the user can try to fix the problem.
    pub fn suggestions(self) -> &'static [&'static str] {
        match self {
            ErrorKind::PermissionDenied => &[
                "Allow microphone access for this application in your system settings",
                "Check that no privacy switch is muting the microphone",
                "Restart the call and try again",
            ],
            ErrorKind::NoMicrophone => &[
                "Connect a microphone to your device",
                "Check if the microphone is properly connected",
                "Try a different microphone",
            ],
            ErrorKind::ApiKeyMissing => &[
                "Set GEMINI_API_KEY in the environment or api_key in the [live] config section",
                "Get a valid API key from Google AI Studio",
            ],
            ErrorKind::ApiConnectionFailed => &[
                "Check your internet connection",
                "Verify the API key has Gemini Live access",
                "Try again in a few moments",
            ],
            ErrorKind::AudioContextFailed => &[
                "Check if another application is using your microphone",
                "Select a different audio device in the config",
            ],
            ErrorKind::NetworkError => &[
                "Check your internet connection",
                "Check if you are behind a firewall",
            ],
            ErrorKind::UnsupportedPlatform => &["Use a system with a supported audio backend"],
            ErrorKind::Unknown => &["Run `voicecall check` for more details"],
        }
    }
}

impl VoiceCallError {
    /// Classify this error into the user-facing taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            VoiceCallError::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            VoiceCallError::NoMicrophone { .. } => ErrorKind::NoMicrophone,
            VoiceCallError::Unsupported { .. } => ErrorKind::UnsupportedPlatform,
            VoiceCallError::AudioContext { .. } | VoiceCallError::AudioDevice { .. } => {
                ErrorKind::AudioContextFailed
            }
            VoiceCallError::ApiKeyMissing { .. } => ErrorKind::ApiKeyMissing,
            VoiceCallError::ConnectFailed { .. } => ErrorKind::ApiConnectionFailed,
            VoiceCallError::ConnectionClosed { .. } | VoiceCallError::Transport { .. } => {
                ErrorKind::NetworkError
            }
            _ => ErrorKind::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_config_parse_display() {
        let error = VoiceCallError::ConfigParse {
            message: "invalid TOML syntax".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Failed to parse configuration: invalid TOML syntax"
        );
    }

    #[test]
    fn test_config_invalid_value_display() {
        let error = VoiceCallError::ConfigInvalidValue {
            key: "audio.input_sample_rate".to_string(),
            message: "must be positive".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid configuration value for audio.input_sample_rate: must be positive"
        );
    }

    #[test]
    fn test_permission_denied_display() {
        let error = VoiceCallError::PermissionDenied {
            message: "user dismissed prompt".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Microphone permission denied: user dismissed prompt"
        );
    }

    #[test]
    fn test_connection_closed_display() {
        let error = VoiceCallError::ConnectionClosed {
            code: 1011,
            reason: "internal error".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Connection closed unexpectedly (code 1011): internal error"
        );
    }

    #[test]
    fn test_api_key_missing_display() {
        let error = VoiceCallError::ApiKeyMissing {
            env_var: "GEMINI_API_KEY".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "API key is not set (expected GEMINI_API_KEY)"
        );
    }

    #[test]
    fn test_no_session_display() {
        assert_eq!(VoiceCallError::NoSession.to_string(), "No session available");
    }

    #[test]
    fn test_from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error: VoiceCallError = io_error.into();
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_toml_error() {
        let toml_error = toml::from_str::<toml::Value>("invalid = toml = syntax").unwrap_err();
        let error: VoiceCallError = toml_error.into();
        assert!(error.to_string().contains("Configuration error"));
    }

    #[test]
    fn test_kind_classification() {
        let cases = [
            (
                VoiceCallError::PermissionDenied {
                    message: String::new(),
                },
                ErrorKind::PermissionDenied,
            ),
            (
                VoiceCallError::NoMicrophone {
                    message: String::new(),
                },
                ErrorKind::NoMicrophone,
            ),
            (
                VoiceCallError::AudioContext {
                    message: String::new(),
                },
                ErrorKind::AudioContextFailed,
            ),
            (
                VoiceCallError::ConnectFailed {
                    message: String::new(),
                },
                ErrorKind::ApiConnectionFailed,
            ),
            (
                VoiceCallError::ConnectionClosed {
                    code: 1006,
                    reason: String::new(),
                },
                ErrorKind::NetworkError,
            ),
            (VoiceCallError::Cancelled, ErrorKind::Unknown),
        ];

        for (error, expected) in cases {
            assert_eq!(error.kind(), expected, "wrong kind for {:?}", error);
        }
    }

    #[test]
    fn test_every_kind_has_message_and_suggestions() {
        let kinds = [
            ErrorKind::PermissionDenied,
            ErrorKind::NoMicrophone,
            ErrorKind::ApiKeyMissing,
            ErrorKind::ApiConnectionFailed,
            ErrorKind::AudioContextFailed,
            ErrorKind::NetworkError,
            ErrorKind::UnsupportedPlatform,
            ErrorKind::Unknown,
        ];
        for kind in kinds {
            assert!(!kind.user_message().is_empty());
            assert!(!kind.suggestions().is_empty());
        }
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<VoiceCallError>();
        assert_sync::<VoiceCallError>();
    }
}
