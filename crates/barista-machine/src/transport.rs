//! STOMP-over-WebSocket telemetry transport.
//!
//! One connection per appliance, subscribed to the dashboard topic.
//! The transport is deliberately passive: `poll` never blocks and never
//! fails, it just advances the handshake and queues inbound MESSAGE
//! bodies for the controller to drain.

use std::collections::VecDeque;

use futures_util::{FutureExt as _, SinkExt as _, StreamExt as _};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest as _;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};
use uuid::Uuid;

use barista_core::error::{Error, Result};
use barista_core::stomp::{self, Frame};
use barista_crypto::{
    HEADER_INSTALLATION_ID, HEADER_NONCE, HEADER_SIGNATURE, HEADER_TIMESTAMP, SignedHeaders,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection lifecycle. `Subscribed` is the only state in which
/// telemetry flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Disconnected,
    Connecting,
    AwaitingConnected,
    Subscribed,
}

/// STOMP session over a single WebSocket.
pub struct StompTransport {
    host: String,
    state: TransportState,
    socket: Option<WsStream>,
    subscription_id: Option<String>,
    serial_number: Option<String>,
    inbound: VecDeque<String>,
}

impl StompTransport {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            state: TransportState::Disconnected,
            socket: None,
            subscription_id: None,
            serial_number: None,
            inbound: VecDeque::new(),
        }
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    /// True once the dashboard subscription is active.
    pub fn is_connected(&self) -> bool {
        self.state == TransportState::Subscribed
    }

    /// Open the WebSocket, send the STOMP CONNECT frame and wait (via
    /// subsequent `poll` calls) for CONNECTED before subscribing.
    ///
    /// Any existing connection is torn down first.
    pub async fn connect(
        &mut self,
        serial_number: &str,
        access_token: &str,
        headers: &SignedHeaders,
    ) -> Result<()> {
        self.disconnect().await;
        self.state = TransportState::Connecting;

        match self.open_and_handshake(serial_number, access_token, headers).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.teardown();
                Err(e)
            }
        }
    }

    async fn open_and_handshake(
        &mut self,
        serial_number: &str,
        access_token: &str,
        headers: &SignedHeaders,
    ) -> Result<()> {
        let url = format!("wss://{}/ws/connect", self.host);
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| Error::Transport(e.to_string()))?;
        {
            let map = request.headers_mut();
            for (name, value) in [
                (HEADER_INSTALLATION_ID, headers.installation_id.as_str()),
                (HEADER_TIMESTAMP, headers.timestamp.as_str()),
                (HEADER_NONCE, headers.nonce.as_str()),
                (HEADER_SIGNATURE, headers.signature.as_str()),
            ] {
                map.insert(
                    HeaderName::from_bytes(name.as_bytes())
                        .map_err(|e| Error::Transport(e.to_string()))?,
                    HeaderValue::from_str(value).map_err(|e| Error::Transport(e.to_string()))?,
                );
            }
        }

        let (mut socket, _) = connect_async(request)
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        let frame = connect_frame(&self.host, access_token);
        socket
            .send(Message::Text(stomp::encode(&frame)))
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        self.socket = Some(socket);
        self.serial_number = Some(serial_number.to_string());
        self.state = TransportState::AwaitingConnected;
        info!(serial_number, "WebSocket opened, STOMP handshake started");
        Ok(())
    }

    /// Drain everything the socket has ready without blocking.
    ///
    /// Handshake frames advance the state machine, MESSAGE bodies are
    /// queued, and any socket failure degrades to `Disconnected` so the
    /// controller can schedule a reconnect. Never returns an error.
    pub async fn poll(&mut self) {
        loop {
            let next = {
                let Some(socket) = self.socket.as_mut() else {
                    return;
                };
                socket.next().now_or_never()
            };
            match next {
                // Nothing ready right now.
                None => return,
                Some(None) => {
                    warn!("WebSocket stream ended");
                    self.teardown();
                    return;
                }
                Some(Some(Err(e))) => {
                    warn!(error = %e, "WebSocket read failed");
                    self.teardown();
                    return;
                }
                Some(Some(Ok(Message::Text(text)))) => self.handle_text(&text).await,
                Some(Some(Ok(Message::Close(_)))) => {
                    info!("WebSocket closed by peer");
                    self.teardown();
                    return;
                }
                // Ping/pong is handled by tungstenite; binary is not part
                // of the vendor protocol.
                Some(Some(Ok(_))) => {}
            }
        }
    }

    /// Pop the next queued telemetry payload, if any.
    pub fn pop_message(&mut self) -> Option<String> {
        self.inbound.pop_front()
    }

    /// Graceful shutdown: UNSUBSCRIBE if subscribed, then close.
    pub async fn disconnect(&mut self) {
        if let Some(socket) = self.socket.as_mut() {
            if self.state == TransportState::Subscribed {
                if let Some(id) = self.subscription_id.as_deref() {
                    let frame = unsubscribe_frame(id);
                    let _ = socket.send(Message::Text(stomp::encode(&frame))).await;
                }
            }
            let _ = socket.close(None).await;
        }
        self.teardown();
    }

    async fn handle_text(&mut self, text: &str) {
        let Some(frame) = stomp::decode(text) else {
            warn!("Dropping unparseable STOMP frame");
            return;
        };
        match frame.command.as_str() {
            "CONNECTED" => self.send_subscribe().await,
            "MESSAGE" => {
                debug!(bytes = frame.body.len(), "Telemetry message received");
                self.inbound.push_back(frame.body);
            }
            "ERROR" => {
                warn!(
                    message = frame.header("message").unwrap_or("<none>"),
                    "STOMP error frame"
                );
            }
            other => debug!(command = other, "Ignoring STOMP frame"),
        }
    }

    async fn send_subscribe(&mut self) {
        let Some(serial) = self.serial_number.clone() else {
            return;
        };
        let id = Uuid::new_v4().to_string();
        let frame = subscribe_frame(&serial, &id);

        let Some(socket) = self.socket.as_mut() else {
            return;
        };
        match socket.send(Message::Text(stomp::encode(&frame))).await {
            Ok(()) => {
                info!(serial_number = %serial, subscription = %id, "Dashboard subscription active");
                self.subscription_id = Some(id);
                self.state = TransportState::Subscribed;
            }
            Err(e) => {
                warn!(error = %e, "Failed to send SUBSCRIBE");
                self.teardown();
            }
        }
    }

    fn teardown(&mut self) {
        self.socket = None;
        self.subscription_id = None;
        self.state = TransportState::Disconnected;
    }
}

fn connect_frame(host: &str, access_token: &str) -> Frame {
    Frame::new(
        "CONNECT",
        vec![
            ("host".into(), host.into()),
            ("accept-version".into(), "1.2,1.1,1.0".into()),
            ("heart-beat".into(), "0,0".into()),
            ("Authorization".into(), format!("Bearer {access_token}")),
        ],
    )
}

fn subscribe_frame(serial_number: &str, subscription_id: &str) -> Frame {
    Frame::new(
        "SUBSCRIBE",
        vec![
            (
                "destination".into(),
                format!("/ws/sn/{serial_number}/dashboard"),
            ),
            ("ack".into(), "auto".into()),
            ("id".into(), subscription_id.into()),
            ("content-length".into(), "0".into()),
        ],
    )
}

fn unsubscribe_frame(subscription_id: &str) -> Frame {
    Frame::new("UNSUBSCRIBE", vec![("id".into(), subscription_id.into())])
}
