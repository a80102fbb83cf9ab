//! Signal channel integration
//!
//! Talks to a signal-cli-rest-api service running in json-rpc mode. Incoming
//! envelopes are read from the `/v1/receive/{number}` websocket; replies go out
//! through `POST /v2/send`.

use async_trait::async_trait;
use base64::Engine;
use chrono::{TimeZone, Utc};
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, error, info, warn};

use sigbridge_core::bus::{InboundMessage, OutboundMessage};
use sigbridge_core::config::SignalConfig;
use sigbridge_core::utils::truncate;

use crate::base::{sender_allowed, ChannelError, ChannelHandler, Result};

/// Prefix signal-cli-rest-api uses for group recipients
const GROUP_RECIPIENT_PREFIX: &str = "group.";

/// One websocket frame from the receive endpoint
#[derive(Debug, Deserialize)]
struct ReceiveFrame {
    #[serde(default)]
    envelope: Option<Envelope>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    source_number: Option<String>,
    #[serde(default)]
    source_uuid: Option<String>,
    #[serde(default)]
    source_name: Option<String>,
    #[serde(default)]
    data_message: Option<DataMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DataMessage {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    timestamp: Option<i64>,
    #[serde(default)]
    group_info: Option<GroupInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroupInfo {
    #[serde(default)]
    group_id: Option<String>,
}

/// Body of `POST /v2/send`
#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    message: &'a str,
    number: &'a str,
    recipients: Vec<&'a str>,
}

/// HTTP and websocket roots derived from the configured service address
#[derive(Debug, Clone, PartialEq, Eq)]
struct ServiceUrls {
    http: String,
    ws: String,
}

impl ServiceUrls {
    /// Accepts `host:port`, `http://host:port` or `https://host:port`
    fn parse(service: &str) -> Self {
        let service = service.trim().trim_end_matches('/');
        if let Some(rest) = service.strip_prefix("https://") {
            Self {
                http: format!("https://{}", rest),
                ws: format!("wss://{}", rest),
            }
        } else {
            let rest = service.strip_prefix("http://").unwrap_or(service);
            Self {
                http: format!("http://{}", rest),
                ws: format!("ws://{}", rest),
            }
        }
    }
}

/// Turns receive frames into inbound messages
#[derive(Clone)]
struct EnvelopeRouter {
    name: String,
    allow_from: Vec<String>,
    inbound_tx: Option<mpsc::UnboundedSender<InboundMessage>>,
}

impl EnvelopeRouter {
    /// Parse one frame; `None` for anything that is not a text message from
    /// an allowed sender (receipts, typing indicators, attachment-only).
    fn parse(&self, raw: &str) -> Option<InboundMessage> {
        let frame: ReceiveFrame = match serde_json::from_str(raw) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(
                    "Invalid JSON from signal service: {} (raw: {})",
                    e,
                    truncate(raw, 100)
                );
                return None;
            }
        };

        let envelope = frame.envelope?;
        let data = envelope.data_message?;
        let text = data.message.filter(|t| !t.trim().is_empty())?;

        let sender_id = envelope
            .source_number
            .filter(|s| !s.is_empty())
            .or(envelope.source.filter(|s| !s.is_empty()))
            .or(envelope.source_uuid.filter(|s| !s.is_empty()))?;

        if !sender_allowed(&self.allow_from, &sender_id) {
            info!(
                "Dropping Signal message from non-allowlisted sender: {}",
                sender_id
            );
            return None;
        }

        let group_id = data
            .group_info
            .and_then(|g| g.group_id)
            .filter(|g| !g.is_empty());
        let chat_id = match &group_id {
            Some(group_id) => group_recipient(group_id),
            None => sender_id.clone(),
        };

        info!("Received message from sender: {}", sender_id);

        let mut msg = InboundMessage::new(self.name.clone(), sender_id, chat_id, text)
            .with_metadata("is_group", group_id.is_some());
        if let Some(ts) = data.timestamp {
            msg = msg.with_metadata("timestamp", ts);
            if let Some(at) = Utc.timestamp_millis_opt(ts).single() {
                msg = msg.with_timestamp(at);
            }
        }
        if let Some(group_id) = group_id {
            msg = msg.with_metadata("group_id", group_id);
        }
        if let Some(name) = envelope.source_name.filter(|n| !n.is_empty()) {
            msg = msg.with_metadata("source_name", name);
        }

        Some(msg)
    }

    fn forward(&self, raw: &str) {
        let Some(msg) = self.parse(raw) else {
            return;
        };

        match &self.inbound_tx {
            Some(tx) => {
                if let Err(e) = tx.send(msg) {
                    error!("Failed to send inbound message: {}", e);
                }
            }
            None => debug!("No inbound sender set, dropping Signal message"),
        }
    }
}

/// Recipient id for a group, as the send endpoint expects it
fn group_recipient(group_id: &str) -> String {
    format!(
        "{}{}",
        GROUP_RECIPIENT_PREFIX,
        base64::engine::general_purpose::STANDARD.encode(group_id)
    )
}

/// Signal channel handler
pub struct SignalHandler {
    name: String,
    urls: ServiceUrls,
    phone_number: String,
    allow_from: Vec<String>,
    reconnect_delay: Duration,
    running: bool,
    inbound_tx: Option<mpsc::UnboundedSender<InboundMessage>>,
    http: Client,
    /// Connection state
    connected: Arc<RwLock<bool>>,
    /// Background task handle
    task_handle: Option<JoinHandle<()>>,
    /// Shutdown signal
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl SignalHandler {
    /// Create a new Signal handler
    pub fn new(config: &SignalConfig) -> Self {
        Self {
            name: "signal".to_string(),
            urls: ServiceUrls::parse(&config.service),
            phone_number: config.phone_number.clone(),
            allow_from: config.allow_from.clone(),
            reconnect_delay: Duration::from_secs(config.reconnect_delay_secs.max(1)),
            running: false,
            inbound_tx: None,
            http: Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| Client::new()),
            connected: Arc::new(RwLock::new(false)),
            task_handle: None,
            shutdown_tx: None,
        }
    }

    /// Websocket endpoint envelopes are read from
    pub fn receive_url(&self) -> String {
        format!("{}/v1/receive/{}", self.urls.ws, self.phone_number)
    }

    /// REST endpoint replies are posted to
    pub fn send_url(&self) -> String {
        format!("{}/v2/send", self.urls.http)
    }

    /// Whether the receive websocket is currently open
    pub async fn is_connected(&self) -> bool {
        *self.connected.read().await
    }

    fn envelope_router(&self) -> EnvelopeRouter {
        EnvelopeRouter {
            name: self.name.clone(),
            allow_from: self.allow_from.clone(),
            inbound_tx: self.inbound_tx.clone(),
        }
    }

    /// Handle one raw frame from the receive websocket
    pub fn handle_frame(&self, raw: &str) {
        self.envelope_router().forward(raw);
    }

    /// Websocket receive loop with reconnection
    async fn connection_loop(
        url: String,
        router: EnvelopeRouter,
        reconnect_delay: Duration,
        connected: Arc<RwLock<bool>>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        let mut running = true;

        while running {
            info!("Connecting to Signal service at {}...", url);

            tokio::select! {
                result = connect_async(url.as_str()) => match result {
                    Ok((ws_stream, _)) => {
                        info!("Connected to Signal service");
                        *connected.write().await = true;
                        let (_write, mut read) = ws_stream.split();

                        loop {
                            tokio::select! {
                                msg = read.next() => {
                                    match msg {
                                        Some(Ok(WsMessage::Text(text))) => router.forward(&text),
                                        Some(Ok(WsMessage::Close(_))) | None => {
                                            info!("WebSocket closed by server");
                                            break;
                                        }
                                        Some(Err(e)) => {
                                            error!("WebSocket error: {}", e);
                                            break;
                                        }
                                        _ => {}
                                    }
                                }
                                _ = shutdown_rx.recv() => {
                                    info!("Shutdown signal received");
                                    running = false;
                                    break;
                                }
                            }
                        }

                        *connected.write().await = false;
                    }
                    Err(e) => {
                        error!("Failed to connect to Signal service: {}", e);
                    }
                },
                _ = shutdown_rx.recv() => {
                    running = false;
                }
            }

            if running {
                info!("Reconnecting in {} seconds...", reconnect_delay.as_secs());
                tokio::select! {
                    _ = tokio::time::sleep(reconnect_delay) => {}
                    _ = shutdown_rx.recv() => running = false,
                }
            }
        }

        info!("Signal connection loop ended");
    }
}

#[async_trait]
impl ChannelHandler for SignalHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_running(&self) -> bool {
        self.running
    }

    async fn start(&mut self) -> Result<()> {
        if self.running {
            return Ok(());
        }

        if self.phone_number.is_empty() {
            return Err(ChannelError::InvalidConfig(
                "signal.phone_number is not set".to_string(),
            ));
        }

        info!("Starting Signal channel...");
        info!("Receive URL: {}", self.receive_url());

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        self.shutdown_tx = Some(shutdown_tx);

        let url = self.receive_url();
        let router = self.envelope_router();
        let reconnect_delay = self.reconnect_delay;
        let connected = self.connected.clone();

        let handle = tokio::spawn(async move {
            Self::connection_loop(url, router, reconnect_delay, connected, shutdown_rx).await;
        });

        self.task_handle = Some(handle);
        self.running = true;

        info!("Signal channel started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if !self.running {
            return Ok(());
        }

        info!("Stopping Signal channel...");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }

        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }

        *self.connected.write().await = false;
        self.running = false;
        info!("Signal channel stopped");

        Ok(())
    }

    async fn send(&self, msg: OutboundMessage) -> Result<()> {
        if self.phone_number.is_empty() {
            return Err(ChannelError::NotConfigured(
                "signal.phone_number is not set".to_string(),
            ));
        }

        let request = SendRequest {
            message: &msg.content,
            number: &self.phone_number,
            recipients: vec![msg.chat_id.as_str()],
        };

        debug!(
            "Sending Signal message to {}: {}",
            msg.chat_id,
            truncate(&msg.content, 80)
        );

        let response = self
            .http
            .post(self.send_url())
            .json(&request)
            .send()
            .await
            .map_err(|e| ChannelError::ConnectionError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ChannelError::ApiError(format!("HTTP {}: {}", status, body)));
        }

        Ok(())
    }

    fn set_inbound_sender(&mut self, tx: mpsc::UnboundedSender<InboundMessage>) {
        self.inbound_tx = Some(tx);
    }

    fn is_allowed(&self, sender_id: &str) -> bool {
        sender_allowed(&self.allow_from, sender_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    fn config(service: &str, allow_from: &[&str]) -> SignalConfig {
        SignalConfig {
            service: service.to_string(),
            phone_number: "+10000000000".to_string(),
            allow_from: allow_from.iter().map(|s| s.to_string()).collect(),
            reconnect_delay_secs: 1,
        }
    }

    fn handler_with_rx(
        allow_from: &[&str],
    ) -> (SignalHandler, mpsc::UnboundedReceiver<InboundMessage>) {
        let mut handler = SignalHandler::new(&config("localhost:8080", allow_from));
        let (tx, rx) = mpsc::unbounded_channel();
        handler.set_inbound_sender(tx);
        (handler, rx)
    }

    #[test]
    fn test_service_urls() {
        assert_eq!(
            ServiceUrls::parse("localhost:8080"),
            ServiceUrls {
                http: "http://localhost:8080".to_string(),
                ws: "ws://localhost:8080".to_string(),
            }
        );
        assert_eq!(
            ServiceUrls::parse("https://signal.example.org/").ws,
            "wss://signal.example.org"
        );
        assert_eq!(
            ServiceUrls::parse("http://10.0.0.2:9922").http,
            "http://10.0.0.2:9922"
        );
    }

    #[test]
    fn test_handler_urls() {
        let handler = SignalHandler::new(&config("localhost:8080", &[]));
        assert_eq!(handler.name(), "signal");
        assert!(!handler.is_running());
        assert_eq!(
            handler.receive_url(),
            "ws://localhost:8080/v1/receive/+10000000000"
        );
        assert_eq!(handler.send_url(), "http://localhost:8080/v2/send");
    }

    #[test]
    fn test_direct_message_is_forwarded() {
        let (handler, mut rx) = handler_with_rx(&[]);
        let raw = json!({
            "envelope": {
                "source": "+15551234",
                "sourceNumber": "+15551234",
                "sourceName": "Alice",
                "timestamp": 1700000000000i64,
                "dataMessage": {"timestamp": 1700000000000i64, "message": "hello"}
            },
            "account": "+10000000000"
        })
        .to_string();

        handler.handle_frame(&raw);
        let msg = rx.try_recv().unwrap();
        assert_eq!(msg.channel, "signal");
        assert_eq!(msg.sender_id, "+15551234");
        assert_eq!(msg.chat_id, "+15551234");
        assert_eq!(msg.content, "hello");
        assert_eq!(msg.timestamp.timestamp_millis(), 1700000000000);
        assert_eq!(msg.metadata.get("is_group"), Some(&json!(false)));
        assert_eq!(msg.metadata.get("source_name"), Some(&json!("Alice")));
    }

    #[test]
    fn test_group_message_replies_to_group() {
        let (handler, mut rx) = handler_with_rx(&[]);
        let raw = json!({
            "envelope": {
                "source": "uuid-abc",
                "dataMessage": {
                    "message": "!help",
                    "groupInfo": {"groupId": "abc=", "type": "DELIVER"}
                }
            }
        })
        .to_string();

        handler.handle_frame(&raw);
        let msg = rx.try_recv().unwrap();
        assert_eq!(msg.sender_id, "uuid-abc");
        assert_eq!(msg.chat_id, "group.YWJjPQ==");
        assert_eq!(msg.metadata.get("group_id"), Some(&json!("abc=")));
    }

    #[test]
    fn test_non_text_envelopes_are_dropped() {
        let (handler, mut rx) = handler_with_rx(&[]);
        let frames = [
            json!({"envelope": {"source": "+1", "receiptMessage": {"isDelivery": true}}}),
            json!({"envelope": {"source": "+1", "typingMessage": {"action": "STARTED"}}}),
            json!({"envelope": {"source": "+1", "dataMessage": {"attachments": [{}]}}}),
            json!({"envelope": {"source": "+1", "dataMessage": {"message": "   "}}}),
            json!({"envelope": {"dataMessage": {"message": "no sender"}}}),
            json!({"account": "+10000000000"}),
        ];

        for frame in frames {
            handler.handle_frame(&frame.to_string());
        }
        handler.handle_frame("not json");

        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_allowlist_blocks_sender() {
        let (handler, mut rx) = handler_with_rx(&["+15551234"]);
        let blocked = json!({
            "envelope": {"sourceNumber": "+15559999", "dataMessage": {"message": "hi"}}
        });
        let allowed = json!({
            "envelope": {"sourceNumber": "+15551234", "dataMessage": {"message": "hi"}}
        });

        handler.handle_frame(&blocked.to_string());
        assert!(rx.try_recv().is_err());

        handler.handle_frame(&allowed.to_string());
        assert_eq!(rx.try_recv().unwrap().sender_id, "+15551234");
    }

    #[tokio::test]
    async fn test_send_posts_to_rest_api() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v2/send")
            .match_body(Matcher::Json(json!({
                "message": "reply text",
                "number": "+10000000000",
                "recipients": ["+15551234"]
            })))
            .with_status(201)
            .with_body(r#"{"timestamp":"1700000000001"}"#)
            .create_async()
            .await;

        let handler = SignalHandler::new(&config(&server.url(), &[]));
        handler
            .send(OutboundMessage::new("signal", "+15551234", "reply text"))
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_send_reports_api_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v2/send")
            .with_status(400)
            .with_body(r#"{"error":"unknown recipient"}"#)
            .create_async()
            .await;

        let handler = SignalHandler::new(&config(&server.url(), &[]));
        let err = handler
            .send(OutboundMessage::new("signal", "+15551234", "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::ApiError(ref m) if m.contains("400")));
    }

    #[tokio::test]
    async fn test_start_requires_phone_number() {
        let mut cfg = config("localhost:8080", &[]);
        cfg.phone_number.clear();
        let mut handler = SignalHandler::new(&cfg);

        assert!(matches!(
            handler.start().await,
            Err(ChannelError::InvalidConfig(_))
        ));
        assert!(!handler.is_running());
    }

    #[tokio::test]
    async fn test_start_stop() {
        let mut handler = SignalHandler::new(&config("127.0.0.1:1", &[]));

        handler.start().await.unwrap();
        assert!(handler.is_running());

        handler.stop().await.unwrap();
        assert!(!handler.is_running());
        assert!(!handler.is_connected().await);
    }
}
