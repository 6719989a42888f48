//! Loop-local in-memory broker
//!
//! Delivers every publish synchronously to all matching handlers and keeps a
//! retained-message store, replayed to new subscriptions. Handlers always run
//! outside the internal locks so they may publish or subscribe themselves.

use super::{topic_matches, Message, MessageBus, MessageHandler};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tracing::trace;

type Subscription = (String, Arc<dyn MessageHandler>);

/// In-process message bus with retained messages
#[derive(Default)]
pub struct InMemoryBus {
    subscriptions: RwLock<Vec<Subscription>>,
    retained: RwLock<BTreeMap<String, Vec<u8>>>,
    history: RwLock<Vec<Message>>,
    fail_publishes: AtomicBool,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent publish fail until reset
    pub fn set_fail_publishes(&self, fail: bool) {
        self.fail_publishes.store(fail, Ordering::SeqCst);
    }

    /// Every message published so far, in order
    pub fn published(&self) -> Vec<Message> {
        self.history
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Messages published to topics matching `pattern`
    pub fn published_to(&self, pattern: &str) -> Vec<Message> {
        self.published()
            .into_iter()
            .filter(|m| topic_matches(pattern, &m.topic))
            .collect()
    }

    /// Current retained payload for a topic
    pub fn retained(&self, topic: &str) -> Option<Vec<u8>> {
        self.retained
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(topic)
            .cloned()
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    fn handlers_for(&self, topic: &str) -> Vec<Arc<dyn MessageHandler>> {
        self.subscriptions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(pattern, _)| topic_matches(pattern, topic))
            .map(|(_, handler)| handler.clone())
            .collect()
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<()> {
        if self.fail_publishes.load(Ordering::SeqCst) {
            anyhow::bail!("publish to {} rejected: broker unavailable", topic);
        }

        if retain {
            let mut retained = self
                .retained
                .write()
                .map_err(|e| anyhow::anyhow!("Lock poisoned: {}", e))?;
            if payload.is_empty() {
                retained.remove(topic);
            } else {
                retained.insert(topic.to_string(), payload.clone());
            }
        }

        let message = Message {
            topic: topic.to_string(),
            payload,
            retained: false,
        };
        self.history
            .write()
            .map_err(|e| anyhow::anyhow!("Lock poisoned: {}", e))?
            .push(message.clone());

        let handlers = self.handlers_for(topic);
        trace!(topic = %topic, handlers = handlers.len(), "Dispatching message");
        for handler in handlers {
            handler.handle(&message);
        }

        Ok(())
    }

    async fn subscribe(&self, pattern: &str, handler: Arc<dyn MessageHandler>) -> Result<()> {
        self.subscriptions
            .write()
            .map_err(|e| anyhow::anyhow!("Lock poisoned: {}", e))?
            .push((pattern.to_string(), handler.clone()));

        let replay: Vec<Message> = self
            .retained
            .read()
            .map_err(|e| anyhow::anyhow!("Lock poisoned: {}", e))?
            .iter()
            .filter(|(topic, _)| topic_matches(pattern, topic))
            .map(|(topic, payload)| Message {
                topic: topic.clone(),
                payload: payload.clone(),
                retained: true,
            })
            .collect();

        for message in &replay {
            handler.handle(message);
        }

        Ok(())
    }

    async fn unsubscribe(&self, pattern: &str) -> Result<()> {
        self.subscriptions
            .write()
            .map_err(|e| anyhow::anyhow!("Lock poisoned: {}", e))?
            .retain(|(p, _)| p != pattern);
        Ok(())
    }
}
