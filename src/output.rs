//! Terminal rendering for a running call.
//! Status lines go to stderr so stdout stays clean for piping.

use crate::error::VoiceCallError;
use crate::session::{VoiceChatState, VoiceChatStatus};

const DIM: &str = "\x1b[2m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

pub const KEY_HELP: &str = "m = mute/unmute, s = stop, r = reconnect, q = hang up";

/// Clear the current terminal line.
pub fn clear_line() {
    eprint!("\r\x1b[2K");
}

fn status_color(status: VoiceChatStatus) -> &'static str {
    match status {
        VoiceChatStatus::Idle => DIM,
        VoiceChatStatus::Connecting | VoiceChatStatus::Connected => YELLOW,
        VoiceChatStatus::Recording => GREEN,
        VoiceChatStatus::Error => RED,
    }
}

/// Short human label for a call state.
pub fn status_label(state: &VoiceChatState) -> &'static str {
    match state.status {
        VoiceChatStatus::Idle => "Call ended",
        VoiceChatStatus::Connecting => "Connecting...",
        VoiceChatStatus::Connected if !state.is_recording => "Connected (muted)",
        VoiceChatStatus::Connected => "Connected",
        VoiceChatStatus::Recording => "Live - listening",
        VoiceChatStatus::Error => "Error",
    }
}

/// One status line, colored unless `color` is false.
pub fn format_status(state: &VoiceChatState, character: &str, color: bool) -> String {
    let mut line = format!("[{}] {}", character, status_label(state));
    if let Some(error) = &state.error {
        line.push_str(": ");
        line.push_str(error);
    }
    if color {
        format!("{}{}{}", status_color(state.status), line, RESET)
    } else {
        line
    }
}

pub fn render_status(state: &VoiceChatState, character: &str, color: bool) {
    clear_line();
    eprintln!("{}", format_status(state, character, color));
}

/// User-facing description of an error plus what to try next.
pub fn format_error(error: &VoiceCallError) -> Vec<String> {
    let kind = error.kind();
    let mut lines = vec![kind.user_message().to_string()];
    lines.extend(kind.suggestions().iter().map(|tip| format!("  - {}", tip)));
    lines
}

pub fn render_error(error: &VoiceCallError, color: bool) {
    for (idx, line) in format_error(error).into_iter().enumerate() {
        if color && idx == 0 {
            eprintln!("{RED}{line}{RESET}");
        } else {
            eprintln!("{line}");
        }
    }
}
