//! Async message queue implementation

use super::events::{InboundMessage, OutboundMessage};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

type OutboundCallback = Arc<
    dyn Fn(OutboundMessage) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
        + Send
        + Sync,
>;

/// A message paired with the callbacks it is delivered to
type Delivery = (OutboundMessage, Vec<OutboundCallback>);

/// Async message bus that decouples transport channels from the router
///
/// Channels push messages to the inbound queue, and the router processes
/// them and pushes replies to the outbound queue.
#[derive(Clone)]
pub struct MessageBus {
    /// Inbound messages from channels
    inbound_tx: mpsc::UnboundedSender<InboundMessage>,
    inbound_rx: Arc<RwLock<Option<mpsc::UnboundedReceiver<InboundMessage>>>>,
    /// Outbound messages to channels
    outbound_tx: mpsc::UnboundedSender<OutboundMessage>,
    outbound_rx: Arc<RwLock<Option<mpsc::UnboundedReceiver<OutboundMessage>>>>,
    /// Outbound subscribers by channel
    subscribers: Arc<RwLock<HashMap<String, Vec<OutboundCallback>>>>,
    /// Running state
    running: Arc<RwLock<bool>>,
}

impl MessageBus {
    /// Create a new message bus
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        Self {
            inbound_tx,
            inbound_rx: Arc::new(RwLock::new(Some(inbound_rx))),
            outbound_tx,
            outbound_rx: Arc::new(RwLock::new(Some(outbound_rx))),
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Take the inbound receiver (can only be called once)
    pub async fn take_inbound_receiver(&self) -> Option<mpsc::UnboundedReceiver<InboundMessage>> {
        self.inbound_rx.write().await.take()
    }

    /// Take the outbound receiver (can only be called once)
    pub async fn take_outbound_receiver(&self) -> Option<mpsc::UnboundedReceiver<OutboundMessage>> {
        self.outbound_rx.write().await.take()
    }

    /// Sender half of the inbound queue, for transports that push directly
    pub fn inbound_sender(&self) -> mpsc::UnboundedSender<InboundMessage> {
        self.inbound_tx.clone()
    }

    /// Publish a message from a channel to the router
    pub fn publish_inbound(&self, msg: InboundMessage) -> crate::Result<()> {
        self.inbound_tx
            .send(msg)
            .map_err(|_| crate::Error::Channel("Inbound channel closed".to_string()))
    }

    /// Publish a reply from the router to channels
    pub fn publish_outbound(&self, msg: OutboundMessage) -> crate::Result<()> {
        self.outbound_tx
            .send(msg)
            .map_err(|_| crate::Error::Channel("Outbound channel closed".to_string()))
    }

    /// Subscribe to outbound messages for a specific channel with a callback
    pub async fn subscribe_outbound<F, Fut>(&self, channel: impl Into<String>, callback: F)
    where
        F: Fn(OutboundMessage) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let channel = channel.into();
        let wrapped: OutboundCallback = Arc::new(move |msg| Box::pin(callback(msg)));

        let mut subscribers = self.subscribers.write().await;
        subscribers.entry(channel).or_default().push(wrapped);
    }

    /// Dispatch outbound messages to subscribed channels.
    /// Run this as a background task.
    ///
    /// Each chat gets its own delivery lane: callbacks for one chat are
    /// awaited in publish order, while a slow delivery to one chat does not
    /// hold up the others. Lanes finish their queued deliveries after `stop`.
    pub async fn dispatch_outbound_loop(&self) {
        let mut outbound_rx = match self.take_outbound_receiver().await {
            Some(rx) => rx,
            None => {
                debug!("Outbound receiver already taken");
                return;
            }
        };

        *self.running.write().await = true;
        debug!("Starting outbound dispatcher");

        let mut lanes: HashMap<(String, String), mpsc::UnboundedSender<Delivery>> = HashMap::new();
        let mut tasks: Vec<JoinHandle<()>> = Vec::new();

        while *self.running.read().await {
            tokio::select! {
                Some(msg) = outbound_rx.recv() => {
                    let callbacks = {
                        let subscribers = self.subscribers.read().await;
                        subscribers.get(&msg.channel).cloned()
                    };

                    let Some(callbacks) = callbacks else {
                        debug!("No subscribers for channel: {}", msg.channel);
                        continue;
                    };

                    let key = (msg.channel.clone(), msg.chat_id.clone());
                    let lane = lanes.entry(key).or_insert_with(|| {
                        let (tx, handle) = spawn_delivery_lane();
                        tasks.push(handle);
                        tx
                    });

                    if let Err(mpsc::error::SendError(delivery)) = lane.send((msg, callbacks)) {
                        warn!("Delivery lane for {} closed, restarting", delivery.0.chat_id);
                        let (tx, handle) = spawn_delivery_lane();
                        tasks.push(handle);
                        let _ = tx.send(delivery);
                        *lane = tx;
                    }
                }
                _ = tokio::time::sleep(tokio::time::Duration::from_millis(100)) => {
                    // Check running state periodically
                    continue;
                }
            }
        }

        drop(lanes);
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Delivery lane task failed: {}", e);
            }
        }

        debug!("Outbound dispatcher stopped");
    }

    /// Stop the dispatcher loop
    pub async fn stop(&self) {
        *self.running.write().await = false;
    }

    /// Check if the bus is running
    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}

/// Runs queued deliveries for one chat, one at a time
fn spawn_delivery_lane() -> (mpsc::UnboundedSender<Delivery>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<Delivery>();
    let handle = tokio::spawn(async move {
        while let Some((msg, callbacks)) = rx.recv().await {
            for callback in callbacks {
                callback(msg.clone()).await;
            }
        }
    });
    (tx, handle)
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}
