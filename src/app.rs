//! Terminal call client.
//!
//! Wires the real microphone, speakers and live session into a
//! [`VoiceSessionManager`] and drives it from stdin.

use anyhow::{Context, Result, bail};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

use crate::audio::capture::{CpalBackend, CpalMicrophone};
use crate::audio::device::AudioBackend;
use crate::audio::wav::{WavBackend, WavMicrophone};
use crate::character::{CharacterRegistry, RosterRegistry};
use crate::config::Config;
use crate::error::VoiceCallError;
use crate::output::{KEY_HELP, render_error, render_status};
use crate::permission::MicrophoneAccess;
use crate::session::{SessionSettings, VoiceChatStatus, VoiceSessionManager};
use crate::transport::websocket::WebSocketConnector;

/// Keys accepted on stdin during a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallCommand {
    ToggleMute,
    Stop,
    HangUp,
    Reconnect,
}

fn parse_command(line: &str) -> Option<CallCommand> {
    match line.trim().to_ascii_lowercase().as_str() {
        "m" | "mute" => Some(CallCommand::ToggleMute),
        "s" | "stop" => Some(CallCommand::Stop),
        "q" | "quit" | "hangup" => Some(CallCommand::HangUp),
        "r" | "reconnect" => Some(CallCommand::Reconnect),
        _ => None,
    }
}

/// Character roster from the configured file, or the stock cast.
pub fn load_registry(config: &Config) -> Result<RosterRegistry> {
    let registry = match &config.characters.path {
        Some(path) => RosterRegistry::load(path)
            .with_context(|| format!("Failed to load characters from {}", path.display()))?,
        None => RosterRegistry::builtin(),
    };
    Ok(registry.with_language(config.live.language_code.clone()))
}

/// Run one call with `character_id` until it ends or the user hangs up.
pub async fn run_call_command(
    mut config: Config,
    character_id: String,
    max_duration: Option<Duration>,
    input_wav: Option<PathBuf>,
    device: Option<String>,
    language: Option<String>,
    quiet: bool,
) -> Result<()> {
    if let Some(d) = device {
        config.audio.input_device = Some(d);
    }
    if let Some(l) = language {
        config.live.language_code = l;
    }

    let registry = load_registry(&config)?;
    let Some(character) = registry.character(&character_id) else {
        bail!(
            "Unknown character '{}'. Run `voicecall characters` to list them.",
            character_id
        );
    };
    let Some(profile) = registry.voice_profile(&character_id) else {
        bail!("No voice profile for character '{}'", character_id);
    };

    let connector = match WebSocketConnector::from_config(&config.live) {
        Ok(connector) => Arc::new(connector),
        Err(e) => {
            render_error(&e, std::io::stderr().is_terminal());
            return Err(e.into());
        }
    };

    let speakers: Arc<dyn AudioBackend> = Arc::new(CpalBackend::new(
        config.audio.input_device.clone(),
        config.audio.output_device.clone(),
    ));
    let (microphone, backend): (Arc<dyn MicrophoneAccess>, Arc<dyn AudioBackend>) =
        match &input_wav {
            Some(path) => {
                let wav = WavBackend::open(path, config.audio.input_sample_rate, speakers)
                    .with_context(|| format!("Failed to open {}", path.display()))?;
                if !quiet {
                    eprintln!(
                        "Using {} as microphone ({:.1}s)",
                        path.display(),
                        wav.duration(config.audio.input_sample_rate).as_secs_f32()
                    );
                }
                (Arc::new(WavMicrophone), Arc::new(wav))
            }
            None => (
                Arc::new(CpalMicrophone::new(config.audio.input_device.clone())),
                speakers,
            ),
        };

    let manager = VoiceSessionManager::new(
        microphone,
        backend,
        connector,
        profile,
        SessionSettings::from(&config),
    );

    let color = std::io::stderr().is_terminal();
    let watcher = if quiet {
        None
    } else {
        let mut states = manager.subscribe();
        let name = character.name.clone();
        Some(tokio::spawn(async move {
            while states.changed().await.is_ok() {
                let state = states.borrow_and_update().clone();
                render_status(&state, &name, color);
            }
        }))
    };

    info!(
        "Calling {} ({}) with voice {}",
        character.name,
        character.id,
        manager.profile().voice_name
    );
    let outcome = match manager.start_voice_chat().await {
        Ok(()) => {
            if !quiet {
                eprintln!("{}", KEY_HELP);
            }
            drive_call(&manager, max_duration, quiet).await
        }
        Err(VoiceCallError::Cancelled) => Ok(()),
        Err(e) => {
            render_error(&e, color);
            Err(e.into())
        }
    };

    manager.metrics().await.log_report();
    let final_error = manager.error();
    manager.force_stop_voice_chat().await;
    if let Some(watcher) = watcher {
        watcher.abort();
    }

    outcome?;
    if let Some(error) = final_error {
        bail!(error);
    }
    Ok(())
}

/// React to stdin, signals and state changes until the call ends.
async fn drive_call(
    manager: &VoiceSessionManager,
    max_duration: Option<Duration>,
    quiet: bool,
) -> Result<()> {
    let mut states = manager.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    let deadline = async {
        match max_duration {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        debug!("stdin closed, call continues");
                        stdin_open = false;
                        continue;
                    }
                    Err(e) => return Err(e).context("Failed to read stdin"),
                };
                match parse_command(&line) {
                    Some(CallCommand::ToggleMute) => {
                        if let Err(e) = manager.toggle_recording().await {
                            render_error(&e, false);
                        }
                    }
                    Some(CallCommand::Stop) => {
                        if manager.stop_voice_chat().await {
                            return Ok(());
                        }
                        if !quiet {
                            eprintln!("Call is busy, use q to hang up");
                        }
                    }
                    Some(CallCommand::HangUp) => return Ok(()),
                    Some(CallCommand::Reconnect) => {
                        manager.reset_session().await;
                        match manager.start_voice_chat().await {
                            Ok(()) | Err(VoiceCallError::Cancelled) => {}
                            Err(e) => {
                                render_error(&e, false);
                                return Ok(());
                            }
                        }
                    }
                    None if line.trim().is_empty() => {}
                    None => {
                        if !quiet {
                            eprintln!("{}", KEY_HELP);
                        }
                    }
                }
            }
            changed = states.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let status = states.borrow_and_update().status;
                if matches!(status, VoiceChatStatus::Idle | VoiceChatStatus::Error) {
                    info!("Call ended ({})", status);
                    return Ok(());
                }
            }
            () = &mut deadline => {
                info!("Maximum call duration reached, hanging up");
                return Ok(());
            }
            _ = tokio::signal::ctrl_c() => {
                return Ok(());
            }
        }
    }
}
