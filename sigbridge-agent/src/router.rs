//! Session router: the per-message processing engine

use futures::future::join_all;
use sigbridge_core::bus::{InboundMessage, MessageBus, OutboundMessage};
use sigbridge_core::config::{Config, RepliesConfig};
use sigbridge_core::session::{ChatMessage, HistoryStore};
use sigbridge_core::utils::truncate;
use sigbridge_providers::{CompletionGateway, GatewayError};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::command::{classify, help_text, Command};

/// Which path produced a reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The completion service answered a chat turn
    Answered,
    /// A fixed reply (clear, help, model list, empty chat)
    Acknowledged,
    /// The completion service call failed; carries `GatewayError::kind`
    Failed(&'static str),
}

/// Reply to one inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub sender: String,
    pub text: String,
    pub outcome: Outcome,
}

impl Reply {
    fn new(sender: &str, text: impl Into<String>, outcome: Outcome) -> Self {
        Self {
            sender: sender.to_string(),
            text: text.into(),
            outcome,
        }
    }
}

/// Routes inbound messages to commands and runs chat turns against the
/// completion gateway.
///
/// A chat turn holds the sender's history lock from snapshot to append, so
/// turns of one sender never interleave while other senders run in parallel.
/// A failed or timed out turn leaves the history untouched.
pub struct SessionRouter {
    store: Arc<HistoryStore>,
    gateway: Arc<dyn CompletionGateway>,
    replies: RepliesConfig,
    timeout: Duration,
}

impl SessionRouter {
    pub fn new(
        store: Arc<HistoryStore>,
        gateway: Arc<dyn CompletionGateway>,
        replies: RepliesConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            gateway,
            replies,
            timeout,
        }
    }

    /// Build a router with a fresh store sized from `session.max_history_messages`
    /// and the gateway timeout from `privatemode.timeout_secs`
    pub fn from_config(config: &Config, gateway: Arc<dyn CompletionGateway>) -> Self {
        Self::new(
            Arc::new(HistoryStore::new(config.session.max_history_messages)),
            gateway,
            config.replies.clone(),
            Duration::from_secs(config.privatemode.timeout_secs),
        )
    }

    pub fn store(&self) -> &Arc<HistoryStore> {
        &self.store
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Handle one message from `sender`. Safe to call concurrently.
    pub async fn on_message(&self, sender: &str, text: &str) -> Reply {
        let command = classify(text);
        info!(
            "Message from {} [{}]: {}",
            sender,
            command.name(),
            truncate(text, 60)
        );

        match command {
            Command::Chat(text) => self.chat_turn(sender, &text).await,
            Command::Clear => self.clear(sender).await,
            Command::ListModels => self.list_models(sender).await,
            Command::Help => Reply::new(
                sender,
                help_text(&self.replies.help_footer),
                Outcome::Acknowledged,
            ),
            // Unrecognized commands still get an answer, using the full text
            Command::Unknown(text) => self.chat_turn(sender, &text).await,
        }
    }

    /// Handle a bus message and build the reply addressed to its chat
    pub async fn handle_inbound(&self, msg: InboundMessage) -> OutboundMessage {
        let reply = self.on_message(&msg.sender_id, &msg.content).await;
        let outcome = match reply.outcome {
            Outcome::Answered => "answered",
            Outcome::Acknowledged => "acknowledged",
            Outcome::Failed(kind) => kind,
        };
        msg.reply(reply.text).with_metadata("outcome", outcome)
    }

    /// Consume the bus inbound queue until `shutdown` resolves.
    ///
    /// Each sender gets a lane (a queue drained by one task), so messages of
    /// one sender are answered strictly in arrival order while different
    /// senders are processed concurrently. On shutdown, queued messages are
    /// still answered before this returns.
    pub async fn run<F>(self: Arc<Self>, bus: MessageBus, shutdown: F) -> sigbridge_core::Result<()>
    where
        F: Future<Output = ()>,
    {
        let Some(mut inbound_rx) = bus.take_inbound_receiver().await else {
            error!("Failed to take inbound receiver");
            return Err(sigbridge_core::Error::Channel(
                "Inbound receiver already taken".to_string(),
            ));
        };

        info!("Session router started");

        let mut lanes: HashMap<String, mpsc::UnboundedSender<InboundMessage>> = HashMap::new();
        let mut tasks: Vec<JoinHandle<()>> = Vec::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                maybe_msg = inbound_rx.recv() => {
                    let Some(msg) = maybe_msg else {
                        info!("Message bus closed, stopping session router");
                        break;
                    };
                    debug!("Received message from {}:{}", msg.channel, msg.sender_id);
                    self.route_to_lane(&bus, &mut lanes, &mut tasks, msg);
                }
                _ = &mut shutdown => {
                    info!("Shutdown requested, draining session lanes");
                    break;
                }
            }
        }

        // Messages already accepted onto the bus are still answered
        let mut queued = 0usize;
        while let Ok(msg) = inbound_rx.try_recv() {
            self.route_to_lane(&bus, &mut lanes, &mut tasks, msg);
            queued += 1;
        }
        if queued > 0 {
            info!("Routed {} queued messages before stopping", queued);
        }

        drop(lanes);
        for result in join_all(tasks).await {
            if let Err(e) = result {
                error!("Session lane task failed: {}", e);
            }
        }

        info!("Session router stopped");
        Ok(())
    }

    /// Hand `msg` to its sender's lane, starting the lane on first use
    fn route_to_lane(
        self: &Arc<Self>,
        bus: &MessageBus,
        lanes: &mut HashMap<String, mpsc::UnboundedSender<InboundMessage>>,
        tasks: &mut Vec<JoinHandle<()>>,
        msg: InboundMessage,
    ) {
        let lane = lanes.entry(msg.sender_id.clone()).or_insert_with(|| {
            let (tx, handle) = self.spawn_lane(bus.clone());
            tasks.push(handle);
            tx
        });

        if let Err(mpsc::error::SendError(msg)) = lane.send(msg) {
            // Lane task ended unexpectedly; start a fresh one
            warn!("Lane for {} closed, restarting", msg.sender_id);
            let (tx, handle) = self.spawn_lane(bus.clone());
            tasks.push(handle);
            let _ = tx.send(msg);
            *lane = tx;
        }
    }

    fn spawn_lane(
        self: &Arc<Self>,
        bus: MessageBus,
    ) -> (mpsc::UnboundedSender<InboundMessage>, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<InboundMessage>();
        let router = Arc::clone(self);

        let handle = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let response = router.handle_inbound(msg).await;
                if let Err(e) = bus.publish_outbound(response) {
                    error!("Failed to publish response: {}", e);
                }
            }
        });

        (tx, handle)
    }

    async fn chat_turn(&self, sender: &str, text: &str) -> Reply {
        if text.trim().is_empty() {
            return Reply::new(sender, self.replies.empty_chat.clone(), Outcome::Acknowledged);
        }

        let mut session = self.store.lock(sender).await;
        let history = session.snapshot();

        let result = tokio::time::timeout(self.timeout, self.gateway.complete(&history, text))
            .await
            .unwrap_or(Err(GatewayError::Timeout));

        match result {
            Ok(answer) => {
                session.append(ChatMessage::user(text));
                session.append(ChatMessage::assistant(answer.clone()));
                debug!(
                    "Chat turn for {} done, history now {} messages",
                    sender,
                    session.len()
                );
                Reply::new(sender, answer, Outcome::Answered)
            }
            Err(e) => {
                warn!("Chat turn for {} failed ({}): {}", sender, e.kind(), e);
                Reply::new(sender, self.replies.chat_failed.clone(), Outcome::Failed(e.kind()))
            }
        }
    }

    async fn clear(&self, sender: &str) -> Reply {
        let text = if self.store.clear(sender).await {
            info!("Cleared history for {}", sender);
            &self.replies.cleared
        } else {
            &self.replies.nothing_to_clear
        };
        Reply::new(sender, text.clone(), Outcome::Acknowledged)
    }

    async fn list_models(&self, sender: &str) -> Reply {
        let result = tokio::time::timeout(self.timeout, self.gateway.list_models())
            .await
            .unwrap_or(Err(GatewayError::Timeout));

        let text = match result {
            Ok(models) if !models.is_empty() => format_models(&self.replies.models_header, &models),
            Ok(_) => self.replies.models_unavailable.clone(),
            Err(e) => {
                warn!("Model listing failed ({}): {}", e.kind(), e);
                self.replies.models_unavailable.clone()
            }
        };
        Reply::new(sender, text, Outcome::Acknowledged)
    }
}

/// Header line followed by one bullet per model
fn format_models(header: &str, models: &[String]) -> String {
    let mut text = header.to_string();
    for model in models {
        text.push_str("\n• ");
        text.push_str(model);
    }
    text
}
