//! One duplex live session at a time.
//!
//! A [`LiveConnector`] opens connections; [`SessionTransport`] owns the one
//! that is current, refuses overlapping connects and closes anything that
//! finishes opening after the caller gave up on it.

pub mod mock;
pub mod protocol;
#[cfg(feature = "live-ws")]
pub mod websocket;

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::audio::pcm::AudioBlob;
use crate::character::VoiceProfile;
use crate::error::{Result, VoiceCallError};

pub use protocol::ServerEvent;

/// Identifies one opened session. Never reused within a transport.
pub type SessionId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Message(ServerEvent),
    Error(String),
    Closed { code: u16, reason: String },
}

pub type EventSender = mpsc::UnboundedSender<TransportEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// Opens live sessions.
#[async_trait]
pub trait LiveConnector: Send + Sync {
    /// Connect and configure the remote side for `profile`. Events for the
    /// new session are delivered on `events`.
    async fn connect(
        &self,
        profile: &VoiceProfile,
        events: EventSender,
    ) -> Result<Box<dyn LiveSession>>;
}

/// An open live session.
pub trait LiveSession: Send {
    fn send_audio(&self, blob: AudioBlob) -> Result<()>;

    /// Close the connection. Must be safe to call more than once.
    fn close(&mut self);
}

struct Session {
    id: SessionId,
    handle: Box<dyn LiveSession>,
}

/// Clears the connecting flag however the connect ends.
struct ConnectingGuard<'a>(&'a AtomicBool);

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct SessionTransport {
    connector: Arc<dyn LiveConnector>,
    session: Mutex<Option<Session>>,
    connecting: AtomicBool,
    abandon: AtomicBool,
    next_id: AtomicU64,
}

impl SessionTransport {
    pub fn new(connector: Arc<dyn LiveConnector>) -> Self {
        Self {
            connector,
            session: Mutex::new(None),
            connecting: AtomicBool::new(false),
            abandon: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        }
    }

    /// Open a session for `profile`, replacing any existing one.
    pub async fn connect(&self, profile: &VoiceProfile, events: EventSender) -> Result<SessionId> {
        if self
            .connecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(VoiceCallError::AlreadyConnecting);
        }
        let _guard = ConnectingGuard(&self.connecting);
        self.abandon.store(false, Ordering::SeqCst);

        self.close_session();

        debug!("Connecting live session (voice {})", profile.voice_name);
        let mut handle = self.connector.connect(profile, events).await?;

        if self.abandon.swap(false, Ordering::SeqCst) {
            debug!("Connect abandoned, closing fresh session");
            handle.close();
            return Err(VoiceCallError::Cancelled);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let previous = self.session.lock().replace(Session { id, handle });
        if let Some(mut previous) = previous {
            previous.handle.close();
        }
        info!("Live session {} open", id);
        Ok(id)
    }

    /// Transmit one frame. Returns `false` if it was not sent.
    pub fn send(&self, blob: AudioBlob) -> bool {
        let session = self.session.lock();
        let Some(session) = session.as_ref() else {
            debug!("No open session, dropping audio frame");
            return false;
        };
        match session.handle.send_audio(blob) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to send audio on session {}: {}", session.id, e);
                false
            }
        }
    }

    /// Close the current session, and any connect still in flight.
    pub fn close(&self) {
        if self.connecting.load(Ordering::SeqCst) {
            self.abandon.store(true, Ordering::SeqCst);
        }
        self.close_session();
    }

    fn close_session(&self) {
        let session = self.session.lock().take();
        if let Some(mut session) = session {
            session.handle.close();
            debug!("Live session {} closed", session.id);
        }
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session.lock().as_ref().map(|s| s.id)
    }

    pub fn is_open(&self) -> bool {
        self.session.lock().is_some()
    }

    pub fn is_connecting(&self) -> bool {
        self.connecting.load(Ordering::SeqCst)
    }
}

impl Drop for SessionTransport {
    fn drop(&mut self) {
        self.close_session();
    }
}
