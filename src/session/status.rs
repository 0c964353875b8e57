use std::fmt;

use crate::permission::PermissionState;

/// Where a voice call is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VoiceChatStatus {
    #[default]
    Idle,
    Connecting,
    Connected,
    Recording,
    Error,
}

impl VoiceChatStatus {
    /// A session is being set up or is open.
    pub fn is_live(self) -> bool {
        matches!(
            self,
            VoiceChatStatus::Connecting | VoiceChatStatus::Connected | VoiceChatStatus::Recording
        )
    }
}

impl fmt::Display for VoiceChatStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VoiceChatStatus::Idle => "idle",
            VoiceChatStatus::Connecting => "connecting",
            VoiceChatStatus::Connected => "connected",
            VoiceChatStatus::Recording => "recording",
            VoiceChatStatus::Error => "error",
        };
        f.write_str(name)
    }
}

/// Snapshot published to observers on every change.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VoiceChatState {
    pub status: VoiceChatStatus,
    pub is_recording: bool,
    pub error: Option<String>,
    pub permission: PermissionState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_is_idle() {
        let state = VoiceChatState::default();
        assert_eq!(state.status, VoiceChatStatus::Idle);
        assert!(!state.is_recording);
        assert_eq!(state.error, None);
        assert_eq!(state.permission, PermissionState::Prompt);
    }

    #[test]
    fn test_live_statuses() {
        assert!(!VoiceChatStatus::Idle.is_live());
        assert!(VoiceChatStatus::Connecting.is_live());
        assert!(VoiceChatStatus::Recording.is_live());
        assert!(!VoiceChatStatus::Error.is_live());
        assert_eq!(VoiceChatStatus::Recording.to_string(), "recording");
    }
}
