pub mod flags;
pub mod manager;
pub mod status;

pub use manager::{CleanupGuard, SessionSettings, VoiceSessionManager};
pub use status::{VoiceChatState, VoiceChatStatus};
