//! Live sessions over a WebSocket.
//!
//! After the handshake the setup message is sent and the socket is split: a
//! writer task drains outbound frames, a reader task turns inbound frames
//! into [`TransportEvent`]s.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::AbortHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::audio::pcm::AudioBlob;
use crate::character::VoiceProfile;
use crate::config::LiveConfig;
use crate::defaults;
use crate::error::{Result, VoiceCallError};
use crate::transport::protocol::{ClientMessage, parse_server_message};
use crate::transport::{EventSender, LiveConnector, LiveSession, TransportEvent};

/// Close code reported when the peer sent a close frame without one.
const NO_STATUS_CODE: u16 = 1005;
/// Close code reported when the socket ended without a close frame.
const ABNORMAL_CLOSE_CODE: u16 = 1006;

pub struct WebSocketConnector {
    endpoint: String,
    model: String,
    api_key: String,
}

impl WebSocketConnector {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            model: model.into(),
            api_key: api_key.into(),
        }
    }

    /// Build from the `[live]` config section. Fails if no API key is set.
    pub fn from_config(config: &LiveConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or_else(|| VoiceCallError::ApiKeyMissing {
                env_var: defaults::API_KEY_ENV.to_string(),
            })?;
        Ok(Self::new(&config.endpoint, &config.model, api_key))
    }

    fn url(&self) -> Result<Url> {
        Url::parse_with_params(&self.endpoint, &[("key", self.api_key.as_str())]).map_err(|e| {
            VoiceCallError::ConnectFailed {
                message: format!("Invalid endpoint {}: {}", self.endpoint, e),
            }
        })
    }
}

enum Outbound {
    Frame(String),
    Close,
}

#[async_trait]
impl LiveConnector for WebSocketConnector {
    async fn connect(
        &self,
        profile: &VoiceProfile,
        events: EventSender,
    ) -> Result<Box<dyn LiveSession>> {
        let url = self.url()?;
        debug!("Connecting to {}", self.endpoint);

        let (ws_stream, _) = connect_async(url.as_str()).await.map_err(|e| {
            VoiceCallError::ConnectFailed {
                message: e.to_string(),
            }
        })?;
        let (mut sink, mut stream) = ws_stream.split();

        let setup = ClientMessage::setup(&self.model, profile).to_json()?;
        sink.send(Message::Text(setup))
            .await
            .map_err(|e| VoiceCallError::ConnectFailed {
                message: format!("Failed to send setup: {}", e),
            })?;
        info!(
            "Live session connected (model {}, voice {})",
            self.model, profile.voice_name
        );
        events.send(TransportEvent::Opened).ok();

        let (outbound_tx, mut outbound_rx) =
            mpsc::channel::<Outbound>(defaults::OUTBOUND_QUEUE_FRAMES);

        let writer_events = events.clone();
        let writer = tokio::spawn(async move {
            while let Some(outbound) = outbound_rx.recv().await {
                match outbound {
                    Outbound::Frame(json) => {
                        if let Err(e) = sink.send(Message::Text(json)).await {
                            error!("Failed to send frame: {}", e);
                            writer_events
                                .send(TransportEvent::Error(format!("Send failed: {}", e)))
                                .ok();
                            break;
                        }
                    }
                    Outbound::Close => {
                        if let Err(e) = sink.send(Message::Close(None)).await {
                            debug!("Close frame not sent: {}", e);
                        }
                        break;
                    }
                }
            }
            sink.close().await.ok();
        });

        let reader = tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                match message {
                    Ok(Message::Text(text)) => forward(&events, &text),
                    Ok(Message::Binary(data)) => match String::from_utf8(data) {
                        Ok(text) => forward(&events, &text),
                        Err(e) => warn!("Dropping non-UTF-8 binary frame: {}", e),
                    },
                    Ok(Message::Close(frame)) => {
                        let (code, reason) = match frame {
                            Some(frame) => (u16::from(frame.code), frame.reason.to_string()),
                            None => (NO_STATUS_CODE, String::new()),
                        };
                        info!("Live session closed by server ({}): {}", code, reason);
                        events.send(TransportEvent::Closed { code, reason }).ok();
                        return;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("WebSocket error: {}", e);
                        events.send(TransportEvent::Error(e.to_string())).ok();
                        return;
                    }
                }
            }
            events
                .send(TransportEvent::Closed {
                    code: ABNORMAL_CLOSE_CODE,
                    reason: "connection lost".to_string(),
                })
                .ok();
        });

        Ok(Box::new(WebSocketSession {
            outbound: outbound_tx,
            reader: Some(reader.abort_handle()),
            writer: writer.abort_handle(),
        }))
    }
}

fn forward(events: &EventSender, text: &str) {
    match parse_server_message(text) {
        Ok(parsed) => {
            for event in parsed {
                trace!("Server event: {:?}", event);
                events.send(TransportEvent::Message(event)).ok();
            }
        }
        Err(e) => warn!("Unparseable server message: {}", e),
    }
}

struct WebSocketSession {
    outbound: mpsc::Sender<Outbound>,
    reader: Option<AbortHandle>,
    writer: AbortHandle,
}

impl LiveSession for WebSocketSession {
    fn send_audio(&self, blob: AudioBlob) -> Result<()> {
        let json = ClientMessage::audio(blob).to_json()?;
        self.outbound
            .try_send(Outbound::Frame(json))
            .map_err(|e| match e {
                TrySendError::Full(_) => VoiceCallError::Transport {
                    message: "send queue full, frame dropped".to_string(),
                },
                TrySendError::Closed(_) => VoiceCallError::Transport {
                    message: "connection is closed".to_string(),
                },
            })
    }

    fn close(&mut self) {
        let Some(reader) = self.reader.take() else {
            return;
        };
        reader.abort();
        // The writer exits after sending the close frame. If it is gone or
        // backed up, drop the socket without one.
        if self.outbound.try_send(Outbound::Close).is_err() {
            self.writer.abort();
        }
        debug!("WebSocket session closing");
    }
}

impl Drop for WebSocketSession {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::task::JoinHandle;

    #[test]
    fn test_from_config_requires_api_key() {
        let config = LiveConfig::default();
        assert!(matches!(
            WebSocketConnector::from_config(&config),
            Err(VoiceCallError::ApiKeyMissing { .. })
        ));

        let config = LiveConfig {
            api_key: Some("   ".to_string()),
            ..LiveConfig::default()
        };
        assert!(WebSocketConnector::from_config(&config).is_err());
    }

    #[test]
    fn test_url_carries_key() {
        let connector = WebSocketConnector::new("wss://example.com/live", "m", "abc+123");
        let url = connector.url().unwrap();
        assert_eq!(url.as_str(), "wss://example.com/live?key=abc%2B123");
    }

    #[test]
    fn test_invalid_endpoint_is_connect_failure() {
        let connector = WebSocketConnector::new("not a url", "m", "k");
        assert!(matches!(
            connector.url(),
            Err(VoiceCallError::ConnectFailed { .. })
        ));
    }

    #[test]
    fn test_forward_emits_each_event() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        forward(
            &tx,
            r#"{"serverContent": {"interrupted": true, "turnComplete": true}}"#,
        );
        forward(&tx, "garbage");

        assert!(matches!(rx.try_recv(), Ok(TransportEvent::Message(_))));
        assert!(matches!(rx.try_recv(), Ok(TransportEvent::Message(_))));
        assert!(rx.try_recv().is_err());
    }

    fn session(
        capacity: usize,
    ) -> (WebSocketSession, mpsc::Receiver<Outbound>, JoinHandle<()>) {
        let (outbound, rx) = mpsc::channel(capacity);
        let writer = tokio::spawn(std::future::pending::<()>());
        let session = WebSocketSession {
            outbound,
            reader: Some(tokio::spawn(std::future::pending::<()>()).abort_handle()),
            writer: writer.abort_handle(),
        };
        (session, rx, writer)
    }

    #[tokio::test]
    async fn test_full_send_queue_drops_frames() {
        let (session, mut rx, _writer) = session(2);
        let blob = || crate::audio::pcm::encode_blob(&[0.1; 256]);

        assert!(session.send_audio(blob()).is_ok());
        assert!(session.send_audio(blob()).is_ok());
        assert!(matches!(
            session.send_audio(blob()),
            Err(VoiceCallError::Transport { message }) if message.contains("queue full")
        ));

        assert!(matches!(rx.try_recv(), Ok(Outbound::Frame(_))));
        assert!(matches!(rx.try_recv(), Ok(Outbound::Frame(_))));
        assert!(rx.try_recv().is_err());
        assert!(session.send_audio(blob()).is_ok());
    }

    #[tokio::test]
    async fn test_close_with_full_queue_stops_writer() {
        let (mut session, mut rx, writer) = session(1);
        session
            .send_audio(crate::audio::pcm::encode_blob(&[0.1; 256]))
            .unwrap();

        session.close();
        assert!(writer.await.unwrap_err().is_cancelled());
        assert!(matches!(rx.try_recv(), Ok(Outbound::Frame(_))));

        drop(rx);
        assert!(matches!(
            session.send_audio(crate::audio::pcm::encode_blob(&[0.1; 256])),
            Err(VoiceCallError::Transport { message }) if message == "connection is closed"
        ));
    }
}
