//! Microphone permission gate.
//!
//! The gate wraps a platform [`MicrophoneAccess`] and turns its answers into
//! a [`PermissionState`] plus a human-readable error. Platform failures are
//! never propagated: checking falls back to `Prompt`, requesting returns
//! `false` with the reason stored in [`PermissionGate::error`].

use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::defaults;
use crate::error::VoiceCallError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PermissionState {
    #[default]
    Prompt,
    Granted,
    Denied,
    Checking,
}

impl fmt::Display for PermissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PermissionState::Prompt => "prompt",
            PermissionState::Granted => "granted",
            PermissionState::Denied => "denied",
            PermissionState::Checking => "checking",
        };
        f.write_str(s)
    }
}

/// Why the platform refused to hand out a microphone.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaError {
    #[error("not allowed: {0}")]
    NotAllowed(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("not supported: {0}")]
    NotSupported(String),
    #[error("{0}")]
    Other(String),
}

impl MediaError {
    /// Message shown to the user when a permission request fails.
    pub fn user_message(&self) -> String {
        match self {
            MediaError::NotAllowed(_) => {
                "Microphone access denied. Please allow microphone access in your system settings."
                    .to_string()
            }
            MediaError::NotFound(_) => {
                "No microphone found. Please connect a microphone and try again.".to_string()
            }
            MediaError::NotSupported(_) => {
                "Microphone access is not supported on this system.".to_string()
            }
            MediaError::Other(msg) => format!("Failed to access microphone: {msg}"),
        }
    }
}

impl From<MediaError> for VoiceCallError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::NotAllowed(message) => VoiceCallError::PermissionDenied { message },
            MediaError::NotFound(message) => VoiceCallError::NoMicrophone { message },
            MediaError::NotSupported(message) => VoiceCallError::Unsupported { message },
            MediaError::Other(message) => VoiceCallError::AudioDevice { message },
        }
    }
}

/// Processing requested from the microphone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub sample_rate: Option<u32>,
}

impl CaptureConstraints {
    /// Any microphone, any format.
    pub fn plain() -> Self {
        Self {
            echo_cancellation: false,
            noise_suppression: false,
            sample_rate: None,
        }
    }

    /// What a voice call asks for.
    pub fn voice() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            sample_rate: Some(defaults::INPUT_SAMPLE_RATE),
        }
    }
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self::voice()
    }
}

/// Platform access to the microphone.
#[async_trait]
pub trait MicrophoneAccess: Send + Sync {
    /// Passive permission query. `Ok(None)` means the platform has no way to
    /// ask without opening the device.
    async fn query_permission(&self) -> Result<Option<PermissionState>, MediaError>;

    /// Open the microphone with `constraints` and release it again.
    async fn probe(&self, constraints: &CaptureConstraints) -> Result<(), MediaError>;
}

pub struct PermissionGate {
    access: Arc<dyn MicrophoneAccess>,
    constraints: CaptureConstraints,
    state: watch::Sender<PermissionState>,
    error: Mutex<Option<String>>,
}

impl PermissionGate {
    pub fn new(access: Arc<dyn MicrophoneAccess>) -> Self {
        Self::with_constraints(access, CaptureConstraints::voice())
    }

    pub fn with_constraints(
        access: Arc<dyn MicrophoneAccess>,
        constraints: CaptureConstraints,
    ) -> Self {
        let (state, _) = watch::channel(PermissionState::Prompt);
        Self {
            access,
            constraints,
            state,
            error: Mutex::new(None),
        }
    }

    pub fn state(&self) -> PermissionState {
        *self.state.borrow()
    }

    pub fn error(&self) -> Option<String> {
        self.error.lock().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PermissionState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: PermissionState) {
        self.state.send_replace(state);
    }

    /// Find out whether the microphone may be used, without prompting if the
    /// platform allows that.
    pub async fn check_permission(&self) -> PermissionState {
        *self.error.lock() = None;

        let state = match self.access.query_permission().await {
            Ok(Some(state)) => state,
            Ok(None) => match self.access.probe(&CaptureConstraints::plain()).await {
                Ok(()) => PermissionState::Granted,
                Err(e) => {
                    debug!("Permission probe failed: {}", e);
                    PermissionState::Prompt
                }
            },
            Err(e) => {
                warn!("Error checking audio permission: {}", e);
                *self.error.lock() = Some("Failed to check audio permission".to_string());
                PermissionState::Prompt
            }
        };

        self.set_state(state);
        state
    }

    /// Ask for microphone access. Returns whether it was granted.
    pub async fn request_permission(&self) -> bool {
        *self.error.lock() = None;
        self.set_state(PermissionState::Checking);

        match self.access.probe(&self.constraints).await {
            Ok(()) => {
                debug!("Microphone permission granted");
                self.set_state(PermissionState::Granted);
                true
            }
            Err(e) => {
                warn!("Error requesting audio permission: {}", e);
                *self.error.lock() = Some(e.user_message());
                self.set_state(PermissionState::Denied);
                false
            }
        }
    }
}

/// Scriptable [`MicrophoneAccess`] for tests and headless runs.
pub struct MockMicrophone {
    query: Mutex<Result<Option<PermissionState>, MediaError>>,
    probe: Mutex<Result<(), MediaError>>,
    probes: AtomicUsize,
    last_constraints: Mutex<Option<CaptureConstraints>>,
    held: watch::Sender<bool>,
    waiting: watch::Sender<usize>,
}

impl MockMicrophone {
    /// A microphone that is always available.
    pub fn granted() -> Self {
        Self {
            query: Mutex::new(Ok(Some(PermissionState::Granted))),
            probe: Mutex::new(Ok(())),
            probes: AtomicUsize::new(0),
            last_constraints: Mutex::new(None),
            held: watch::channel(false).0,
            waiting: watch::channel(0).0,
        }
    }

    /// A microphone whose every probe fails with `err`.
    pub fn failing(err: MediaError) -> Self {
        let mock = Self::granted();
        *mock.query.lock() = Ok(Some(PermissionState::Prompt));
        *mock.probe.lock() = Err(err);
        mock
    }

    pub fn denied() -> Self {
        Self::failing(MediaError::NotAllowed("Permission denied".to_string()))
    }

    pub fn set_query(&self, result: Result<Option<PermissionState>, MediaError>) {
        *self.query.lock() = result;
    }

    pub fn set_probe(&self, result: Result<(), MediaError>) {
        *self.probe.lock() = result;
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn last_constraints(&self) -> Option<CaptureConstraints> {
        *self.last_constraints.lock()
    }

    /// Keep access requests pending, like an unanswered browser prompt,
    /// until [`release_access`](Self::release_access).
    pub fn hold_access(&self) {
        self.held.send_replace(true);
    }

    pub fn release_access(&self) {
        self.held.send_replace(false);
    }

    /// Resolves once some access request is parked on the hold.
    pub async fn wait_for_pending_access(&self) {
        let mut rx = self.waiting.subscribe();
        rx.wait_for(|n| *n > 0).await.ok();
    }
}

#[async_trait]
impl MicrophoneAccess for MockMicrophone {
    async fn query_permission(&self) -> Result<Option<PermissionState>, MediaError> {
        self.query.lock().clone()
    }

    async fn probe(&self, constraints: &CaptureConstraints) -> Result<(), MediaError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        *self.last_constraints.lock() = Some(*constraints);
        let mut held = self.held.subscribe();
        if *held.borrow_and_update() {
            self.waiting.send_modify(|n| *n += 1);
            held.wait_for(|held| !*held).await.ok();
            self.waiting.send_modify(|n| *n -= 1);
        }
        self.probe.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate(mock: MockMicrophone) -> (PermissionGate, Arc<MockMicrophone>) {
        let mock = Arc::new(mock);
        (PermissionGate::new(mock.clone()), mock)
    }

    #[tokio::test]
    async fn test_check_uses_passive_query() {
        let (gate, mock) = gate(MockMicrophone::granted());

        assert_eq!(gate.check_permission().await, PermissionState::Granted);
        assert_eq!(gate.state(), PermissionState::Granted);
        assert_eq!(mock.probe_count(), 0);
    }

    #[tokio::test]
    async fn test_check_falls_back_to_probe() {
        let (gate, mock) = gate(MockMicrophone::granted());
        mock.set_query(Ok(None));

        assert_eq!(gate.check_permission().await, PermissionState::Granted);
        assert_eq!(mock.probe_count(), 1);
        assert_eq!(mock.last_constraints(), Some(CaptureConstraints::plain()));

        mock.set_probe(Err(MediaError::NotAllowed("nope".to_string())));
        assert_eq!(gate.check_permission().await, PermissionState::Prompt);
        assert_eq!(gate.error(), None);
    }

    #[tokio::test]
    async fn test_check_query_error_sets_error_and_prompt() {
        let (gate, mock) = gate(MockMicrophone::granted());
        mock.set_query(Err(MediaError::Other("portal crashed".to_string())));

        assert_eq!(gate.check_permission().await, PermissionState::Prompt);
        assert_eq!(
            gate.error(),
            Some("Failed to check audio permission".to_string())
        );
    }

    #[tokio::test]
    async fn test_request_granted_uses_voice_constraints() {
        let (gate, mock) = gate(MockMicrophone::granted());

        assert!(gate.request_permission().await);
        assert_eq!(gate.state(), PermissionState::Granted);
        assert_eq!(gate.error(), None);

        let constraints = mock.last_constraints().unwrap();
        assert!(constraints.echo_cancellation);
        assert!(constraints.noise_suppression);
        assert_eq!(constraints.sample_rate, Some(16000));
    }

    #[tokio::test]
    async fn test_request_failure_messages() {
        let cases = [
            (
                MediaError::NotAllowed("x".to_string()),
                "Microphone access denied. Please allow microphone access in your system settings.",
            ),
            (
                MediaError::NotFound("x".to_string()),
                "No microphone found. Please connect a microphone and try again.",
            ),
            (
                MediaError::NotSupported("x".to_string()),
                "Microphone access is not supported on this system.",
            ),
            (
                MediaError::Other("device busy".to_string()),
                "Failed to access microphone: device busy",
            ),
        ];

        for (err, expected) in cases {
            let (gate, _mock) = gate(MockMicrophone::failing(err));
            assert!(!gate.request_permission().await);
            assert_eq!(gate.state(), PermissionState::Denied);
            assert_eq!(gate.error().as_deref(), Some(expected));
        }
    }

    #[tokio::test]
    async fn test_request_clears_previous_error() {
        let (gate, mock) = gate(MockMicrophone::denied());
        assert!(!gate.request_permission().await);
        assert!(gate.error().is_some());

        mock.set_probe(Ok(()));
        assert!(gate.request_permission().await);
        assert_eq!(gate.error(), None);
    }

    #[tokio::test]
    async fn test_subscribe_observes_state_changes() {
        let (gate, _mock) = gate(MockMicrophone::granted());
        let mut rx = gate.subscribe();
        assert_eq!(*rx.borrow(), PermissionState::Prompt);

        gate.request_permission().await;
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), PermissionState::Granted);
    }

    #[test]
    fn test_media_error_into_voicecall_error() {
        let err: VoiceCallError = MediaError::NotFound("none".to_string()).into();
        assert!(matches!(err, VoiceCallError::NoMicrophone { .. }));

        let err: VoiceCallError = MediaError::NotAllowed("no".to_string()).into();
        assert!(matches!(err, VoiceCallError::PermissionDenied { .. }));
    }
}
