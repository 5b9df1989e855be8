//! Socket Mode over a real WebSocket.
//!
//! `connect` asks `apps.connections.open` for a fresh URL and dials it.
//! `next_envelope` answers pings, skips `hello` and malformed frames, and reports a `disconnect`
//! request or a closed socket as [`TransportError::Disconnected`] so the
//! runner reconnects.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::socket::{SocketEnvelope, SocketMessage, SocketTransport, TransportError};
use crate::web::SlackWebClient;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WebSocketTransport {
    web: SlackWebClient,
    reader: Mutex<Option<SplitStream<WsStream>>>,
    writer: Mutex<Option<SplitSink<WsStream, Message>>>,
}

impl WebSocketTransport {
    pub fn new(web: SlackWebClient) -> Self {
        Self { web, reader: Mutex::new(None), writer: Mutex::new(None) }
    }

    async fn send(&self, message: Message) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        let sink = writer
            .as_mut()
            .ok_or_else(|| TransportError::Acknowledge("socket is not connected".to_owned()))?;
        sink.send(message).await.map_err(|error| TransportError::Acknowledge(error.to_string()))
    }
}

/// Serialises the acknowledgement frame for an envelope.
pub fn ack_frame(envelope_id: &str, payload: Option<&Value>) -> String {
    match payload {
        Some(payload) => json!({"envelope_id": envelope_id, "payload": payload}).to_string(),
        None => json!({"envelope_id": envelope_id}).to_string(),
    }
}

/// Interprets one text frame. `Ok(None)` means keep reading; only a
/// `disconnect` request ends the read with an error.
fn read_text_frame(text: &str) -> Result<Option<SocketEnvelope>, TransportError> {
    match SocketMessage::parse(text) {
        Err(error) => warn!(error = %error, frame = %text, "skipping malformed socket frame"),
        Ok(SocketMessage::Hello) => debug!("socket mode hello received"),
        Ok(SocketMessage::Disconnect { reason }) => {
            info!(reason = %reason, "slack requested socket mode disconnect");
            return Err(TransportError::Disconnected(reason));
        }
        Ok(SocketMessage::Envelope(envelope)) => return Ok(Some(envelope)),
        Ok(SocketMessage::Unknown(message_type)) => {
            debug!(message_type = %message_type, "ignoring unknown socket message");
        }
    }
    Ok(None)
}

#[async_trait]
impl SocketTransport for WebSocketTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let url = self.web.connections_open().await.map_err(|error| TransportError::Connect(error.to_string()))?;

        let (stream, _response) = connect_async(url.as_str())
            .await
            .map_err(|error| TransportError::Connect(format!("websocket connect failed: {error}")))?;
        let (write, read) = stream.split();
        *self.writer.lock().await = Some(write);
        *self.reader.lock().await = Some(read);

        info!("websocket connected to slack socket mode");
        Ok(())
    }

    async fn next_envelope(&self) -> Result<Option<SocketEnvelope>, TransportError> {
        let mut reader = self.reader.lock().await;
        let stream =
            reader.as_mut().ok_or_else(|| TransportError::Receive("socket is not connected".to_owned()))?;

        loop {
            let Some(frame) = stream.next().await else {
                return Err(TransportError::Disconnected("websocket stream ended".to_owned()));
            };
            let frame = frame.map_err(|error| TransportError::Receive(error.to_string()))?;

            match frame {
                Message::Text(text) => {
                    if let Some(envelope) = read_text_frame(&text)? {
                        return Ok(Some(envelope));
                    }
                }
                Message::Ping(data) => self.send(Message::Pong(data)).await?,
                Message::Close(_) => {
                    return Err(TransportError::Disconnected("websocket close frame".to_owned()));
                }
                _ => {}
            }
        }
    }

    async fn acknowledge(&self, envelope_id: &str, payload: Option<&Value>) -> Result<(), TransportError> {
        self.send(Message::Text(ack_frame(envelope_id, payload))).await
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let writer = self.writer.lock().await.take();
        self.reader.lock().await.take();
        if let Some(mut sink) = writer {
            sink.close().await.map_err(|error| TransportError::Disconnect(error.to_string()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{ack_frame, read_text_frame, WebSocketTransport};
    use crate::socket::{EnvelopeKind, SocketTransport, TransportError};
    use crate::web::SlackWebClient;

    #[test]
    fn ack_frame_carries_optional_payload() {
        let bare: Value = serde_json::from_str(&ack_frame("env-1", None)).expect("json");
        let with_payload: Value =
            serde_json::from_str(&ack_frame("env-2", Some(&json!({"response_action": "clear"})))).expect("json");

        assert_eq!(bare, json!({"envelope_id": "env-1"}));
        assert_eq!(with_payload, json!({"envelope_id": "env-2", "payload": {"response_action": "clear"}}));
    }

    #[tokio::test]
    async fn unconnected_transport_reports_errors_instead_of_panicking() {
        let transport = WebSocketTransport::new(SlackWebClient::new("xoxb-test", "xapp-test"));

        assert!(matches!(transport.next_envelope().await, Err(TransportError::Receive(_))));
        assert!(matches!(transport.acknowledge("env-1", None).await, Err(TransportError::Acknowledge(_))));
        assert_eq!(transport.disconnect().await, Ok(()));
    }

    #[test]
    fn malformed_frames_are_skipped_without_dropping_the_connection() {
        assert_eq!(read_text_frame("{not json"), Ok(None));
        assert_eq!(read_text_frame(r#"{"type":"hello"}"#), Ok(None));

        let envelope = read_text_frame(r#"{"type":"events_api","envelope_id":"e9","payload":{}}"#)
            .expect("frame")
            .expect("envelope");
        assert_eq!(envelope.kind, EnvelopeKind::EventsApi);
        assert_eq!(
            read_text_frame(r#"{"type":"disconnect","reason":"link_disabled"}"#),
            Err(TransportError::Disconnected("link_disabled".to_owned()))
        );
    }
}
