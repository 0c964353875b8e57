//! In-memory live connector for tests and offline runs.
//!
//! Sessions open instantly unless connects are held, and the remote side is
//! driven by hand through [`MockConnector::emit`] and
//! [`MockConnector::server_close`].

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::watch;
use tracing::debug;

use crate::audio::pcm::AudioBlob;
use crate::character::VoiceProfile;
use crate::error::{Result, VoiceCallError};
use crate::transport::{EventSender, LiveConnector, LiveSession, ServerEvent, TransportEvent};

#[derive(Default)]
struct Remote {
    /// Sender of the most recently opened session still open.
    current: Option<(u64, EventSender)>,
    next_id: u64,
    open: usize,
    max_open: usize,
    fail_next: Option<String>,
    last_profile: Option<VoiceProfile>,
    sent: Vec<AudioBlob>,
}

pub struct MockConnector {
    remote: Arc<Mutex<Remote>>,
    held: watch::Sender<bool>,
    waiting: watch::Sender<usize>,
    connects: AtomicUsize,
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConnector {
    pub fn new() -> Self {
        Self {
            remote: Arc::new(Mutex::new(Remote::default())),
            held: watch::channel(false).0,
            waiting: watch::channel(0).0,
            connects: AtomicUsize::new(0),
        }
    }

    /// Make connects wait until [`release_connects`](Self::release_connects).
    pub fn hold_connects(&self) {
        self.held.send_replace(true);
    }

    pub fn release_connects(&self) {
        self.held.send_replace(false);
    }

    /// Resolves once some connect is parked on the hold.
    pub async fn wait_for_pending_connect(&self) {
        let mut rx = self.waiting.subscribe();
        rx.wait_for(|n| *n > 0).await.ok();
    }

    /// The next connect fails with `ConnectFailed`.
    pub fn fail_next(&self, message: &str) {
        self.remote.lock().fail_next = Some(message.to_string());
    }

    /// Connect attempts that reached the remote side.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn open_sessions(&self) -> usize {
        self.remote.lock().open
    }

    /// Highest number of sessions ever open at once.
    pub fn max_open_sessions(&self) -> usize {
        self.remote.lock().max_open
    }

    pub fn sent_frames(&self) -> usize {
        self.remote.lock().sent.len()
    }

    pub fn sent(&self) -> Vec<AudioBlob> {
        self.remote.lock().sent.clone()
    }

    pub fn last_profile(&self) -> Option<VoiceProfile> {
        self.remote.lock().last_profile.clone()
    }

    /// Deliver `event` on the current session. Returns whether anyone got it.
    pub fn emit(&self, event: TransportEvent) -> bool {
        let remote = self.remote.lock();
        match &remote.current {
            Some((_, tx)) => tx.send(event).is_ok(),
            None => false,
        }
    }

    pub fn emit_server(&self, event: ServerEvent) -> bool {
        self.emit(TransportEvent::Message(event))
    }

    /// The remote side hangs up.
    pub fn server_close(&self, code: u16, reason: &str) -> bool {
        let mut remote = self.remote.lock();
        let Some((_, tx)) = remote.current.take() else {
            return false;
        };
        remote.open = remote.open.saturating_sub(1);
        tx.send(TransportEvent::Closed {
            code,
            reason: reason.to_string(),
        })
        .is_ok()
    }
}

#[async_trait]
impl LiveConnector for MockConnector {
    async fn connect(
        &self,
        profile: &VoiceProfile,
        events: EventSender,
    ) -> Result<Box<dyn LiveSession>> {
        let mut held = self.held.subscribe();
        if *held.borrow_and_update() {
            self.waiting.send_modify(|n| *n += 1);
            let released = held.wait_for(|held| !*held).await.is_ok();
            self.waiting.send_modify(|n| *n -= 1);
            if !released {
                return Err(VoiceCallError::Cancelled);
            }
        }

        self.connects.fetch_add(1, Ordering::SeqCst);
        let mut remote = self.remote.lock();
        if let Some(message) = remote.fail_next.take() {
            return Err(VoiceCallError::ConnectFailed { message });
        }

        let id = remote.next_id;
        remote.next_id += 1;
        remote.open += 1;
        remote.max_open = remote.max_open.max(remote.open);
        remote.last_profile = Some(profile.clone());

        events.send(TransportEvent::Opened).ok();
        events
            .send(TransportEvent::Message(ServerEvent::SetupComplete))
            .ok();
        remote.current = Some((id, events));
        debug!("Mock session {} opened", id);

        Ok(Box::new(MockSession {
            id,
            remote: Arc::clone(&self.remote),
            closed: false,
        }))
    }
}

struct MockSession {
    id: u64,
    remote: Arc<Mutex<Remote>>,
    closed: bool,
}

impl LiveSession for MockSession {
    fn send_audio(&self, blob: AudioBlob) -> Result<()> {
        let mut remote = self.remote.lock();
        if self.closed || !matches!(remote.current, Some((id, _)) if id == self.id) {
            return Err(VoiceCallError::Transport {
                message: "session is closed".to_string(),
            });
        }
        remote.sent.push(blob);
        Ok(())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let mut remote = self.remote.lock();
        if matches!(remote.current, Some((id, _)) if id == self.id) {
            remote.current = None;
            remote.open = remote.open.saturating_sub(1);
        }
    }
}

impl Drop for MockSession {
    fn drop(&mut self) {
        self.close();
    }
}
