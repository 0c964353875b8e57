//! The voice call state machine.
//!
//! `Idle → Connecting → Connected → Recording`, back to `Connected` on mute
//! and to `Idle` on hang-up; any state may fall into `Error`. Operations are
//! issued by one owner, but transport events and capture frames arrive from
//! other tasks, so every continuation re-checks the lifecycle flags and the
//! epoch before touching shared resources.

use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, mpsc, watch};
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use crate::audio::device::AudioBackend;
use crate::audio::metrics::AudioMetrics;
use crate::audio::pcm;
use crate::audio::pipeline::{AudioPipeline, FrameCallback, PipelineSettings};
use crate::character::VoiceProfile;
use crate::config::Config;
use crate::defaults;
use crate::error::{Result, VoiceCallError};
use crate::permission::{MicrophoneAccess, PermissionGate, PermissionState};
use crate::session::flags::LifecycleFlags;
use crate::session::status::{VoiceChatState, VoiceChatStatus};
use crate::transport::{
    EventReceiver, LiveConnector, ServerEvent, SessionId, SessionTransport, TransportEvent,
};

const PERMISSION_REQUIRED: &str = "Microphone permission is required for voice chat";
const NO_SESSION: &str = "No session available";

/// Close codes that end a call without an error.
const NORMAL_CLOSE_CODES: [u16; 2] = [1000, 1005];

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    /// Pause between the session opening and the microphone starting.
    pub settle_delay: Duration,
    /// Interval between deferred cleanup checks after `release`.
    pub cleanup_grace: Duration,
    pub cleanup_retries: u32,
    pub pipeline: PipelineSettings,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(defaults::SETTLE_DELAY_MS),
            cleanup_grace: Duration::from_millis(defaults::CLEANUP_GRACE_MS),
            cleanup_retries: defaults::CLEANUP_RETRIES,
            pipeline: PipelineSettings::default(),
        }
    }
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        Self {
            settle_delay: config.lifecycle.settle_delay(),
            cleanup_grace: config.lifecycle.cleanup_grace(),
            cleanup_retries: config.lifecycle.cleanup_retries,
            pipeline: PipelineSettings::from(&config.audio),
        }
    }
}

struct Inner {
    gate: PermissionGate,
    pipeline: AsyncMutex<AudioPipeline>,
    transport: Arc<SessionTransport>,
    flags: Arc<LifecycleFlags>,
    profile: VoiceProfile,
    settings: SessionSettings,
    state: watch::Sender<VoiceChatState>,
    pump: Mutex<Option<AbortHandle>>,
    cleanup_timer: Mutex<Option<AbortHandle>>,
}

/// Runs one voice call at a time for one character.
///
/// Cheap to clone; clones drive the same call.
#[derive(Clone)]
pub struct VoiceSessionManager {
    inner: Arc<Inner>,
}

/// Keeps stop requests from tearing the call down while alive.
///
/// [`VoiceSessionManager::force_stop_voice_chat`] still works.
pub struct CleanupGuard {
    flags: Arc<LifecycleFlags>,
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        self.flags.set_cleanup_prevented(false);
    }
}

/// Clears the initializing flag however a start ends.
struct InitializingGuard<'a>(&'a LifecycleFlags);

impl Drop for InitializingGuard<'_> {
    fn drop(&mut self) {
        self.0.end_initializing();
    }
}

impl VoiceSessionManager {
    pub fn new(
        microphone: Arc<dyn MicrophoneAccess>,
        backend: Arc<dyn AudioBackend>,
        connector: Arc<dyn LiveConnector>,
        profile: VoiceProfile,
        settings: SessionSettings,
    ) -> Self {
        let gate = PermissionGate::with_constraints(microphone, settings.pipeline.constraints);
        let pipeline = AudioPipeline::new(backend, settings.pipeline.clone());
        let (state, _) = watch::channel(VoiceChatState::default());

        Self {
            inner: Arc::new(Inner {
                gate,
                pipeline: AsyncMutex::new(pipeline),
                transport: Arc::new(SessionTransport::new(connector)),
                flags: Arc::new(LifecycleFlags::default()),
                profile,
                settings,
                state,
                pump: Mutex::new(None),
                cleanup_timer: Mutex::new(None),
            }),
        }
    }

    pub fn profile(&self) -> &VoiceProfile {
        &self.inner.profile
    }

    // --- Observables ---

    pub fn state(&self) -> VoiceChatState {
        self.inner.state.borrow().clone()
    }

    pub fn status(&self) -> VoiceChatStatus {
        self.inner.state.borrow().status
    }

    pub fn is_recording(&self) -> bool {
        self.inner.state.borrow().is_recording
    }

    pub fn error(&self) -> Option<String> {
        self.inner.state.borrow().error.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<VoiceChatState> {
        self.inner.state.subscribe()
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.inner.transport.session_id()
    }

    pub async fn metrics(&self) -> AudioMetrics {
        self.inner.pipeline.lock().await.metrics()
    }

    // --- Permission ---

    pub fn permission_state(&self) -> PermissionState {
        self.inner.gate.state()
    }

    pub async fn check_permission(&self) -> PermissionState {
        let state = self.inner.gate.check_permission().await;
        self.inner.sync_permission();
        state
    }

    pub async fn request_permission(&self) -> bool {
        let granted = self.inner.gate.request_permission().await;
        self.inner.sync_permission();
        if let Some(message) = self.inner.gate.error() {
            self.inner.update(|s| s.error = Some(message));
        }
        granted
    }

    // --- Call lifecycle ---

    /// Open a session and start talking.
    ///
    /// Ignored while another start is in progress. Returns `Cancelled` if
    /// the call was stopped or released before it finished starting.
    pub async fn start_voice_chat(&self) -> Result<()> {
        let inner = &self.inner;
        if !inner.flags.begin_initializing() {
            debug!("Voice chat already initializing, ignoring start");
            return Ok(());
        }
        let _initializing = InitializingGuard(&inner.flags);

        inner.cancel_cleanup_timer();
        inner.flags.set_detached(false);
        let epoch = inner.flags.bump_epoch();
        inner.flags.set_active(true);
        inner.flags.set_cleanup_prevented(true);
        inner.flags.set_recording(false);
        inner.update(|s| {
            s.error = None;
            s.is_recording = false;
            s.status = VoiceChatStatus::Connecting;
        });
        info!("Starting voice chat (voice {})", inner.profile.voice_name);

        match self.start_inner(epoch).await {
            Ok(()) => {
                info!("Voice chat started");
                Ok(())
            }
            Err(VoiceCallError::Cancelled) => {
                debug!("Voice chat start abandoned");
                if inner.flags.detached() {
                    inner.teardown(true).await;
                    inner.update(|s| s.status = VoiceChatStatus::Idle);
                } else {
                    inner.release_resources().await;
                }
                Err(VoiceCallError::Cancelled)
            }
            Err(e) => {
                error!("Failed to start voice chat: {}", e);
                inner.teardown(true).await;
                let message = error_text(&e);
                inner.update(|s| {
                    s.status = VoiceChatStatus::Idle;
                    s.error = Some(message);
                });
                Err(e)
            }
        }
    }

    async fn start_inner(&self, epoch: u64) -> Result<()> {
        let inner = &self.inner;

        if inner.gate.state() != PermissionState::Granted {
            debug!("Requesting microphone permission");
            let granted = inner.gate.request_permission().await;
            inner.sync_permission();
            if !granted {
                let message = inner
                    .gate
                    .error()
                    .unwrap_or_else(|| PERMISSION_REQUIRED.to_string());
                return Err(VoiceCallError::PermissionDenied { message });
            }
        }
        inner.checkpoint(epoch)?;

        inner.transport.close();
        {
            let mut pipeline = inner.pipeline.lock().await;
            pipeline.reset_contexts()?;
            pipeline.init_playback_clock();
        }
        inner.checkpoint(epoch)?;

        let (events, receiver) = mpsc::unbounded_channel();
        let session = inner.transport.connect(&inner.profile, events).await?;
        inner.spawn_pump(session, receiver);
        inner.checkpoint(epoch)?;

        tokio::time::sleep(inner.settings.settle_delay).await;
        inner.checkpoint(epoch)?;

        self.start_recording().await
    }

    /// Hang up, unless a recording call is protected by a [`CleanupGuard`].
    ///
    /// Returns whether the call was torn down.
    pub async fn stop_voice_chat(&self) -> bool {
        let inner = &self.inner;
        if self.status() == VoiceChatStatus::Recording
            && inner.flags.recording()
            && inner.flags.cleanup_prevented()
        {
            debug!("Recording with cleanup prevented, ignoring stop");
            return false;
        }

        info!("Stopping voice chat");
        inner.teardown(true).await;
        inner.update(|s| {
            s.status = VoiceChatStatus::Idle;
            s.error = None;
        });
        true
    }

    /// Hang up from any state.
    pub async fn force_stop_voice_chat(&self) {
        info!("Force stopping voice chat");
        let inner = &self.inner;
        inner.cancel_cleanup_timer();
        inner.teardown(true).await;
        inner.update(|s| {
            s.status = VoiceChatStatus::Idle;
            s.error = None;
        });
    }

    /// Force stop and clear any error.
    pub async fn reset_session(&self) {
        self.force_stop_voice_chat().await;
        debug!("Session reset");
    }

    /// The owner is going away.
    ///
    /// Tears down now if nothing protects the call, otherwise marks it
    /// inactive and re-checks every `cleanup_grace`.
    pub async fn release(&self) {
        let inner = &self.inner;
        inner.cancel_cleanup_timer();

        if inner.flags.may_clean_up() && self.status() != VoiceChatStatus::Recording {
            debug!("Releasing voice chat");
            inner.teardown(true).await;
            if self.status().is_live() {
                inner.update(|s| s.status = VoiceChatStatus::Idle);
            }
            return;
        }

        debug!("Voice chat busy, deferring cleanup");
        inner.flags.set_active(false);
        inner.flags.set_detached(true);
        inner.arm_deferred_cleanup();
    }

    /// Protect the call against [`stop_voice_chat`](Self::stop_voice_chat)
    /// until the guard is dropped.
    pub fn prevent_cleanup(&self) -> CleanupGuard {
        self.inner.flags.set_cleanup_prevented(true);
        CleanupGuard {
            flags: Arc::clone(&self.inner.flags),
        }
    }

    // --- Recording ---

    pub async fn toggle_recording(&self) -> Result<()> {
        if self.inner.flags.recording() {
            self.stop_recording().await;
            Ok(())
        } else {
            self.start_recording().await
        }
    }

    /// Start sending microphone audio on the open session.
    pub async fn start_recording(&self) -> Result<()> {
        let inner = &self.inner;
        if inner.flags.recording() {
            debug!("Already recording");
            return Ok(());
        }
        if !inner.transport.is_open() {
            warn!("Cannot start recording without a session");
            inner.update(|s| {
                s.status = VoiceChatStatus::Error;
                s.error = Some(NO_SESSION.to_string());
            });
            return Err(VoiceCallError::NoSession);
        }

        let epoch = inner.flags.epoch();
        let on_frame = inner.frame_callback();
        let mut pipeline = inner.pipeline.lock().await;
        let started = pipeline.start_capture(on_frame).await;

        // A teardown bumps the epoch before it waits for the pipeline, then
        // clears the flags, so setting `recording` first and re-checking
        // catches a hang-up that arrived during acquisition.
        if started.is_ok() {
            inner.flags.set_recording(true);
        }
        if !inner.flags.is_current(epoch) || !inner.transport.is_open() {
            debug!("Call ended while acquiring the microphone");
            inner.flags.set_recording(false);
            pipeline.stop_capture();
            return Err(VoiceCallError::Cancelled);
        }

        if let Err(e) = started {
            error!("Error starting recording: {}", e);
            inner.flags.set_active(false);
            inner.flags.set_cleanup_prevented(false);
            pipeline.stop_capture();
            drop(pipeline);
            let message = format!("Error: {}", e);
            inner.update(|s| {
                s.status = VoiceChatStatus::Error;
                s.is_recording = false;
                s.error = Some(message);
            });
            return Err(e);
        }
        drop(pipeline);

        inner.flags.set_cleanup_prevented(false);
        inner.update(|s| {
            s.status = VoiceChatStatus::Recording;
            s.is_recording = true;
        });
        info!("Recording");
        Ok(())
    }

    /// Release the microphone; the session stays open.
    pub async fn stop_recording(&self) {
        let inner = &self.inner;
        inner.flags.set_recording(false);
        inner.pipeline.lock().await.stop_capture();

        let active = inner.flags.active();
        inner.update(|s| {
            s.is_recording = false;
            if active {
                s.status = VoiceChatStatus::Connected;
            }
        });
        inner.flags.set_cleanup_prevented(false);
        debug!("Recording stopped");
    }

    pub async fn log_performance_warnings(&self) {
        self.inner.pipeline.lock().await.log_performance_warnings();
    }
}

impl Inner {
    fn update(&self, modify: impl FnOnce(&mut VoiceChatState)) {
        self.state.send_if_modified(|state| {
            let before = state.clone();
            modify(state);
            if before.status != state.status {
                debug!("Voice chat status: {} -> {}", before.status, state.status);
            }
            *state != before
        });
    }

    fn status(&self) -> VoiceChatStatus {
        self.state.borrow().status
    }

    fn sync_permission(&self) {
        let permission = self.gate.state();
        self.update(|s| s.permission = permission);
    }

    /// Err(Cancelled) if this start has been overtaken.
    fn checkpoint(&self, epoch: u64) -> Result<()> {
        if !self.flags.is_current(epoch) || self.flags.detached() {
            return Err(VoiceCallError::Cancelled);
        }
        Ok(())
    }

    fn cancel_cleanup_timer(&self) {
        if let Some(timer) = self.cleanup_timer.lock().take() {
            debug!("Cancelling pending cleanup");
            timer.abort();
        }
    }

    /// Capture frames go out only while recording on an open session.
    fn frame_callback(&self) -> FrameCallback {
        let flags = Arc::clone(&self.flags);
        let transport = Arc::clone(&self.transport);
        let sample_rate = self.settings.pipeline.input_sample_rate;
        Arc::new(move |frame: &[f32]| {
            if !flags.recording() || !transport.is_open() {
                return;
            }
            transport.send(pcm::encode_blob_at(frame, sample_rate));
        })
    }

    /// Close the session and every audio resource.
    async fn release_resources(&self) {
        self.transport.close();
        self.pipeline.lock().await.teardown();
    }

    /// End the call: new epoch, flags cleared, resources released.
    ///
    /// `stop_pump` must be false when called from the pump itself.
    async fn teardown(&self, stop_pump: bool) {
        self.flags.bump_epoch();
        self.flags.clear();
        if stop_pump && let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
        self.release_resources().await;
        self.update(|s| s.is_recording = false);
    }

    /// End the call from the event pump with `message` as the error.
    async fn fail(&self, message: String) {
        error!("Voice chat failed: {}", message);
        self.teardown(false).await;
        self.update(|s| {
            s.status = VoiceChatStatus::Error;
            s.error = Some(message);
        });
    }

    fn spawn_pump(self: &Arc<Self>, session: SessionId, mut events: EventReceiver) {
        let weak: Weak<Inner> = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                if inner.transport.session_id() != Some(session) {
                    debug!("Dropping event from stale session {}", session);
                    break;
                }
                if !inner.handle_event(event).await {
                    break;
                }
            }
            debug!("Event pump for session {} finished", session);
        });

        if let Some(previous) = self.pump.lock().replace(task.abort_handle()) {
            previous.abort();
        }
    }

    /// Returns whether the pump should keep running.
    async fn handle_event(&self, event: TransportEvent) -> bool {
        match event {
            TransportEvent::Opened => {
                if self.flags.active() && self.status() == VoiceChatStatus::Connecting {
                    self.update(|s| s.status = VoiceChatStatus::Connected);
                }
                true
            }
            TransportEvent::Message(ServerEvent::SetupComplete) => {
                info!("Live session ready");
                true
            }
            TransportEvent::Message(ServerEvent::Audio { data, .. }) => {
                let played = match pcm::decode_base64(&data) {
                    Ok(bytes) => self.pipeline.lock().await.play_chunk(&bytes).map(|_| ()),
                    Err(e) => Err(e),
                };
                match played {
                    Ok(()) => true,
                    Err(e) => {
                        self.fail(format!("Failed to play audio: {}", e)).await;
                        false
                    }
                }
            }
            TransportEvent::Message(ServerEvent::Interrupted) => {
                let stopped = self.pipeline.lock().await.interrupt();
                info!("Interrupted, stopped {} queued buffers", stopped);
                true
            }
            TransportEvent::Message(ServerEvent::TurnComplete) => {
                debug!("Turn complete");
                self.pipeline.lock().await.log_performance_warnings();
                true
            }
            TransportEvent::Error(message) => {
                self.fail(message).await;
                false
            }
            TransportEvent::Closed { code, reason } => {
                if NORMAL_CLOSE_CODES.contains(&code) {
                    info!("Live session closed ({})", code);
                    let active = self.flags.active();
                    self.teardown(false).await;
                    if active {
                        self.update(|s| s.status = VoiceChatStatus::Idle);
                    }
                } else {
                    self.fail(
                        VoiceCallError::ConnectionClosed { code, reason }.to_string(),
                    )
                    .await;
                }
                false
            }
        }
    }

    fn arm_deferred_cleanup(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let grace = self.settings.cleanup_grace;
        let retries = self.settings.cleanup_retries.max(1);

        let task = tokio::spawn(async move {
            for attempt in 1..=retries {
                tokio::time::sleep(grace).await;
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                if inner.flags.may_clean_up() {
                    info!("Performing deferred cleanup");
                    inner.teardown(true).await;
                    if inner.status().is_live() {
                        inner.update(|s| s.status = VoiceChatStatus::Idle);
                    }
                    return;
                }
                debug!("Cleanup still prevented (check {}/{})", attempt, retries);
            }
            warn!("Deferred cleanup gave up after {} checks", retries);
        });

        if let Some(previous) = self.cleanup_timer.lock().replace(task.abort_handle()) {
            previous.abort();
        }
    }
}

fn error_text(error: &VoiceCallError) -> String {
    match error {
        VoiceCallError::PermissionDenied { message } => message.clone(),
        VoiceCallError::NoSession => NO_SESSION.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::mock::MockAudioBackend;
    use crate::permission::MockMicrophone;
    use crate::transport::mock::MockConnector;

    struct Harness {
        manager: VoiceSessionManager,
        backend: MockAudioBackend,
        connector: Arc<MockConnector>,
    }

    fn harness_with(microphone: MockMicrophone) -> Harness {
        let backend = MockAudioBackend::new();
        let connector = Arc::new(MockConnector::new());
        let manager = VoiceSessionManager::new(
            Arc::new(microphone),
            Arc::new(backend.clone()),
            connector.clone(),
            VoiceProfile {
                voice_name: "Orus".to_string(),
                language_code: "id-ID".to_string(),
                system_instruction: "You are Andang.".to_string(),
            },
            SessionSettings::default(),
        );
        Harness {
            manager,
            backend,
            connector,
        }
    }

    fn harness() -> Harness {
        harness_with(MockMicrophone::granted())
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_reaches_recording() {
        let h = harness();
        h.manager.start_voice_chat().await.unwrap();

        assert_eq!(h.manager.status(), VoiceChatStatus::Recording);
        assert!(h.manager.is_recording());
        assert_eq!(h.manager.error(), None);
        assert_eq!(h.manager.permission_state(), PermissionState::Granted);
        assert_eq!(h.backend.open_streams(), 1);
        assert_eq!(h.connector.open_sessions(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_frames_sent_only_while_recording() {
        let h = harness();
        h.manager.start_voice_chat().await.unwrap();

        h.backend.push_samples(&[0.1; 512]);
        assert_eq!(h.connector.sent_frames(), 2);
        assert_eq!(h.connector.sent()[0].mime_type, "audio/pcm;rate=16000");

        h.manager.stop_recording().await;
        h.backend.push_samples(&[0.1; 512]);
        assert_eq!(h.connector.sent_frames(), 2);
        assert_eq!(h.manager.status(), VoiceChatStatus::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_recording_round_trip() {
        let h = harness();
        h.manager.start_voice_chat().await.unwrap();

        h.manager.toggle_recording().await.unwrap();
        assert!(!h.manager.is_recording());
        assert_eq!(h.backend.open_streams(), 0);
        assert_eq!(h.connector.open_sessions(), 1);

        h.manager.toggle_recording().await.unwrap();
        assert!(h.manager.is_recording());
        assert_eq!(h.manager.status(), VoiceChatStatus::Recording);
    }

    #[tokio::test]
    async fn test_start_recording_without_session_errors() {
        let h = harness();
        let result = h.manager.start_recording().await;

        assert!(matches!(result, Err(VoiceCallError::NoSession)));
        assert_eq!(h.manager.status(), VoiceChatStatus::Error);
        assert_eq!(h.manager.error().as_deref(), Some("No session available"));
        assert_eq!(h.backend.open_streams(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_stop_while_acquiring_microphone_wins() {
        let h = harness();
        h.backend.hold_streams();

        let start = {
            let manager = h.manager.clone();
            tokio::spawn(async move { manager.start_voice_chat().await })
        };
        h.backend.wait_for_pending_stream().await;

        let stop = {
            let manager = h.manager.clone();
            tokio::spawn(async move { manager.force_stop_voice_chat().await })
        };
        tokio::time::sleep(Duration::from_millis(1)).await;
        h.backend.release_streams();

        let result = start.await.unwrap();
        stop.await.unwrap();

        assert!(matches!(result, Err(VoiceCallError::Cancelled)));
        assert_eq!(h.manager.status(), VoiceChatStatus::Idle);
        assert_eq!(h.manager.error(), None);
        assert!(!h.manager.is_recording());
        assert_eq!(h.backend.streams_opened_total(), 1);
        assert_eq!(h.backend.open_streams(), 0);
        assert_eq!(h.connector.open_sessions(), 0);

        h.backend.push_samples(&[0.1; 512]);
        assert_eq!(h.connector.sent_frames(), 0);
        assert!(matches!(
            h.manager.start_recording().await,
            Err(VoiceCallError::NoSession)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_failure_returns_to_idle_with_error() {
        let h = harness();
        h.connector.fail_next("handshake refused");

        let result = h.manager.start_voice_chat().await;
        assert!(matches!(result, Err(VoiceCallError::ConnectFailed { .. })));
        assert_eq!(h.manager.status(), VoiceChatStatus::Idle);
        assert!(h.manager.error().unwrap().contains("handshake refused"));
        assert_eq!(h.backend.open_contexts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_while_initializing_is_ignored() {
        let h = harness();
        h.connector.hold_connects();

        let first = {
            let manager = h.manager.clone();
            tokio::spawn(async move { manager.start_voice_chat().await })
        };
        h.connector.wait_for_pending_connect().await;

        assert!(h.manager.start_voice_chat().await.is_ok());
        h.connector.release_connects();
        first.await.unwrap().unwrap();

        assert_eq!(h.connector.connects(), 1);
        assert_eq!(h.manager.status(), VoiceChatStatus::Recording);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_text_for_unexpected_close() {
        let h = harness();
        h.manager.start_voice_chat().await.unwrap();
        let mut states = h.manager.subscribe();

        h.connector.server_close(1011, "internal error");
        states
            .wait_for(|s| s.status == VoiceChatStatus::Error)
            .await
            .unwrap();

        assert_eq!(
            h.manager.error().as_deref(),
            Some("Connection closed unexpectedly (code 1011): internal error")
        );
        assert_eq!(h.backend.open_contexts(), 0);
        assert_eq!(h.backend.open_streams(), 0);
    }
}
