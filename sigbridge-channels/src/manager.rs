//! Channel manager

use crate::base::{ChannelHandler, ChannelHandlerPtr, Result};
use crate::signal::SignalHandler;
use sigbridge_core::bus::{MessageBus, OutboundMessage};
use sigbridge_core::config::schema::Config;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Channel manager that coordinates the transport handlers
pub struct ChannelManager {
    /// Configuration
    config: Config,
    /// Channel handlers
    handlers: RwLock<HashMap<String, ChannelHandlerPtr>>,
}

impl ChannelManager {
    /// Create a new channel manager
    pub fn new(config: Config) -> Self {
        Self {
            config,
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Initialize channels based on configuration
    pub async fn initialize(&self) -> Result<()> {
        let mut handlers = self.handlers.write().await;

        if self.config.signal.phone_number.is_empty() {
            tracing::warn!("Signal channel not initialized: phone_number not configured");
        } else {
            let handler = SignalHandler::new(&self.config.signal);
            handlers.insert(
                "signal".to_string(),
                Arc::new(RwLock::new(handler)) as Arc<RwLock<dyn ChannelHandler>>,
            );
            tracing::info!("Signal channel initialized");
        }

        Ok(())
    }

    /// Connect every handler to the bus: inbound messages are pushed onto
    /// the bus and outbound replies for the channel are handed to `send`.
    pub async fn attach(&self, bus: &MessageBus) {
        let handlers = self.handlers.read().await;

        for (name, handler) in handlers.iter() {
            handler.write().await.set_inbound_sender(bus.inbound_sender());

            let handler = Arc::clone(handler);
            let channel = name.clone();
            bus.subscribe_outbound(name.clone(), move |msg: OutboundMessage| {
                let handler = Arc::clone(&handler);
                let channel = channel.clone();
                async move {
                    let chat_id = msg.chat_id.clone();
                    if let Err(e) = handler.read().await.send(msg).await {
                        tracing::error!("Failed to send {} reply to {}: {}", channel, chat_id, e);
                    }
                }
            })
            .await;
        }
    }

    /// Start all channel handlers
    pub async fn start_all(&self) -> Result<()> {
        let handlers = self.handlers.read().await;

        for (name, handler) in handlers.iter() {
            tracing::info!("Starting {} channel...", name);
            let mut handler = handler.write().await;
            if let Err(e) = handler.start().await {
                tracing::error!("Failed to start {} channel: {}", name, e);
            }
        }

        Ok(())
    }

    /// Stop all channel handlers
    pub async fn stop_all(&self) -> Result<()> {
        let mut handlers = self.handlers.write().await;

        for (name, handler) in handlers.iter_mut() {
            tracing::info!("Stopping {} channel...", name);
            let mut handler = handler.write().await;
            if let Err(e) = handler.stop().await {
                tracing::error!("Failed to stop {} channel: {}", name, e);
            }
        }

        handlers.clear();
        Ok(())
    }

    /// Check if a channel is running
    pub async fn is_channel_running(&self, name: &str) -> bool {
        let handlers = self.handlers.read().await;
        match handlers.get(name) {
            Some(handler) => handler.read().await.is_running(),
            None => false,
        }
    }

    /// Get list of active channels
    pub async fn list_channels(&self) -> Vec<String> {
        let handlers = self.handlers.read().await;
        let mut names: Vec<String> = handlers.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for ChannelManager {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::ChannelError;
    use async_trait::async_trait;
    use sigbridge_core::bus::InboundMessage;
    use tokio::sync::mpsc;
    use tokio::time::{timeout, Duration};

    /// Handler that records what it was asked to send
    struct RecordingHandler {
        sent: mpsc::UnboundedSender<OutboundMessage>,
        inbound_tx: Option<mpsc::UnboundedSender<InboundMessage>>,
        running: bool,
    }

    #[async_trait]
    impl ChannelHandler for RecordingHandler {
        fn name(&self) -> &str {
            "signal"
        }

        fn is_running(&self) -> bool {
            self.running
        }

        async fn start(&mut self) -> Result<()> {
            self.running = true;
            Ok(())
        }

        async fn stop(&mut self) -> Result<()> {
            self.running = false;
            Ok(())
        }

        async fn send(&self, message: OutboundMessage) -> Result<()> {
            self.sent
                .send(message)
                .map_err(|e| ChannelError::ApiError(e.to_string()))
        }

        fn set_inbound_sender(&mut self, tx: mpsc::UnboundedSender<InboundMessage>) {
            self.inbound_tx = Some(tx);
        }

        fn is_allowed(&self, _sender_id: &str) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_initialize_skips_signal_without_number() {
        let manager = ChannelManager::default();
        manager.initialize().await.unwrap();
        assert!(manager.list_channels().await.is_empty());
    }

    #[tokio::test]
    async fn test_initialize_registers_signal() {
        let mut config = Config::default();
        config.signal.phone_number = "+10000000000".to_string();
        let manager = ChannelManager::new(config);
        manager.initialize().await.unwrap();

        assert_eq!(manager.list_channels().await, vec!["signal".to_string()]);
        assert!(!manager.is_channel_running("signal").await);
    }

    #[tokio::test]
    async fn test_attach_wires_both_directions() {
        let (sent_tx, mut sent_rx) = mpsc::unbounded_channel();
        let handler = RecordingHandler {
            sent: sent_tx,
            inbound_tx: None,
            running: false,
        };
        let concrete = Arc::new(RwLock::new(handler));
        let handler: ChannelHandlerPtr = concrete.clone();

        let manager = ChannelManager::default();
        manager
            .handlers
            .write()
            .await
            .insert("signal".to_string(), handler);

        let bus = MessageBus::new();
        let mut inbound_rx = bus.take_inbound_receiver().await.unwrap();
        manager.attach(&bus).await;
        manager.start_all().await.unwrap();
        assert!(manager.is_channel_running("signal").await);

        // Inbound: handler pushes, bus receives
        let tx = concrete.read().await.inbound_tx.clone().unwrap();
        tx.send(InboundMessage::new("signal", "+1", "+1", "hi")).unwrap();
        assert_eq!(inbound_rx.recv().await.unwrap().content, "hi");

        // Outbound: bus dispatches to handler.send
        let dispatcher = bus.clone();
        tokio::spawn(async move { dispatcher.dispatch_outbound_loop().await });
        bus.publish_outbound(OutboundMessage::new("signal", "+1", "reply"))
            .unwrap();

        let sent = timeout(Duration::from_secs(2), sent_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sent.content, "reply");

        bus.stop().await;
        manager.stop_all().await.unwrap();
        assert!(manager.list_channels().await.is_empty());
    }
}
