//! Topic-addressed publish/subscribe transport
//!
//! This module provides:
//! - The `MessageBus` seam every control loop publishes and subscribes through
//! - MQTT-style topic matching (`+` single level, `#` remainder)
//! - Typed builders for the topic namespace
//! - An in-memory loop-local broker and an MQTT adapter

mod memory;
mod mqtt;

pub use memory::InMemoryBus;
pub use mqtt::{MqttBus, MqttBusConfig};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

/// A message delivered to a subscription handler
#[derive(Debug, Clone)]
pub struct Message {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retained: bool,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            retained: false,
        }
    }

    /// The last `/`-separated level of the topic
    pub fn last_segment(&self) -> &str {
        self.topic.rsplit('/').next().unwrap_or_default()
    }

    /// Decode the payload as JSON
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.payload)
            .with_context(|| format!("Malformed JSON payload on {}", self.topic))
    }
}

/// Receives messages for one subscription
pub trait MessageHandler: Send + Sync {
    fn handle(&self, message: &Message);
}

impl<F> MessageHandler for F
where
    F: Fn(&Message) + Send + Sync,
{
    fn handle(&self, message: &Message) {
        (self)(message)
    }
}

/// Trait for message bus implementations
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish a payload; retained messages are replayed to later subscribers
    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<()>;

    /// Register a handler for every topic matching `pattern`
    async fn subscribe(&self, pattern: &str, handler: Arc<dyn MessageHandler>) -> Result<()>;

    /// Drop all handlers registered for `pattern`
    async fn unsubscribe(&self, pattern: &str) -> Result<()>;
}

/// Serialize `payload` as JSON and publish it
pub async fn publish_json<T: Serialize + ?Sized>(
    bus: &dyn MessageBus,
    topic: &str,
    payload: &T,
    retain: bool,
) -> Result<()> {
    let bytes = serde_json::to_vec(payload).context("Failed to serialize payload")?;
    bus.publish(topic, bytes, retain).await
}

/// Check whether `topic` matches an MQTT-style subscription `pattern`
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    let mut pattern_levels = pattern.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (pattern_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(p), Some(t)) if p == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Topic namespace
pub mod topics {
    /// Sentinel payload for prewarm lifecycle signals
    pub const SENTINEL: &[u8] = b"1";

    pub const ALL_DATA: &str = "data/#";
    pub const ALL_STATE: &str = "state/#";
    pub const ALL_BUFFER: &str = "buffer/#";
    pub const ALL_METRICS: &str = "metrics/#";

    pub fn data(machine_id: &str) -> String {
        format!("data/{}", machine_id)
    }

    pub fn state(processor_id: &str) -> String {
        format!("state/{}", processor_id)
    }

    pub fn buffer(processor_id: &str) -> String {
        format!("buffer/{}", processor_id)
    }

    pub fn metrics(processor_id: &str) -> String {
        format!("metrics/{}", processor_id)
    }

    pub fn control(processor_id: &str) -> String {
        format!("control/{}", processor_id)
    }

    pub fn hydrate(pod_name: &str) -> String {
        format!("prewarm/{}/hydrate", pod_name)
    }

    pub fn activate(pod_name: &str) -> String {
        format!("prewarm/{}/activate", pod_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        assert!(topic_matches("data/m1", "data/m1"));
        assert!(!topic_matches("data/m1", "data/m2"));
        assert!(!topic_matches("data/m1", "data/m1/extra"));
    }

    #[test]
    fn test_multi_level_wildcard() {
        assert!(topic_matches("data/#", "data/m1"));
        assert!(topic_matches("prewarm/#", "prewarm/pod-1/hydrate"));
        assert!(topic_matches("#", "state/p1"));
        assert!(!topic_matches("data/#", "metrics/p1"));
    }

    #[test]
    fn test_single_level_wildcard() {
        assert!(topic_matches("prewarm/+/activate", "prewarm/pod-1/activate"));
        assert!(!topic_matches("prewarm/+/activate", "prewarm/pod-1/hydrate"));
        assert!(!topic_matches("data/+", "data/m1/x"));
    }

    #[test]
    fn test_topic_builders() {
        assert_eq!(topics::control("processor-a"), "control/processor-a");
        assert_eq!(topics::hydrate("pw-1"), "prewarm/pw-1/hydrate");
        assert_eq!(topics::activate("pw-1"), "prewarm/pw-1/activate");
        assert!(topic_matches(topics::ALL_DATA, &topics::data("m7")));
    }

    #[test]
    fn test_last_segment() {
        let msg = Message::new("data/machine-3", b"{}".to_vec());
        assert_eq!(msg.last_segment(), "machine-3");
    }
}
