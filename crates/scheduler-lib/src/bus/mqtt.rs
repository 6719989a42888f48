//! MQTT broker adapter
//!
//! Publishes and subscribes with QoS 1 (at-least-once). A background task
//! drives the client event loop, dispatches incoming publishes to the
//! registered handlers, and re-subscribes every pattern after a reconnect.
//! Publishes and subscribes give up after `request_timeout` while the
//! outgoing queue is full.

use super::{topic_matches, Message, MessageBus, MessageHandler};
use anyhow::{Context, Result};
use async_trait::async_trait;
use rumqttc::{AsyncClient, ClientError, Event, EventLoop, MqttOptions, Packet, QoS};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type Subscriptions = Arc<RwLock<Vec<(String, Arc<dyn MessageHandler>)>>>;

/// Connection settings for the MQTT broker
#[derive(Debug, Clone)]
pub struct MqttBusConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive: Duration,
    /// Capacity of the outgoing request queue
    pub queue_capacity: usize,
    /// Bound on queueing one publish/subscribe request
    pub request_timeout: Duration,
}

impl Default for MqttBusConfig {
    fn default() -> Self {
        Self {
            host: "mqtt-broker".to_string(),
            port: 1883,
            client_id: "fleet-scheduler".to_string(),
            keep_alive: Duration::from_secs(60),
            queue_capacity: 100,
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// Message bus backed by an MQTT broker
pub struct MqttBus {
    client: AsyncClient,
    subscriptions: Subscriptions,
    connected: Arc<AtomicBool>,
    request_timeout: Duration,
    event_task: JoinHandle<()>,
}

impl MqttBus {
    /// Create the client and start driving its event loop
    pub fn connect(config: MqttBusConfig) -> Self {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(config.keep_alive);

        let (client, event_loop) = AsyncClient::new(options, config.queue_capacity);
        let subscriptions: Subscriptions = Arc::new(RwLock::new(Vec::new()));
        let connected = Arc::new(AtomicBool::new(false));

        info!(
            host = %config.host,
            port = config.port,
            client_id = %config.client_id,
            "Connecting to MQTT broker"
        );

        let event_task = tokio::spawn(drive_event_loop(
            event_loop,
            client.clone(),
            subscriptions.clone(),
            connected.clone(),
        ));

        Self {
            client,
            subscriptions,
            connected,
            request_timeout: config.request_timeout,
            event_task,
        }
    }

    /// Whether the last broker handshake succeeded and no error followed
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn bounded<F>(&self, what: &str, topic: &str, request: F) -> Result<()>
    where
        F: Future<Output = Result<(), ClientError>>,
    {
        match tokio::time::timeout(self.request_timeout, request).await {
            Ok(result) => result.with_context(|| format!("Failed to {} {}", what, topic)),
            Err(_) => anyhow::bail!(
                "Timed out after {:?} trying to {} {}",
                self.request_timeout,
                what,
                topic
            ),
        }
    }
}

impl Drop for MqttBus {
    fn drop(&mut self) {
        self.event_task.abort();
    }
}

async fn drive_event_loop(
    mut event_loop: EventLoop,
    client: AsyncClient,
    subscriptions: Subscriptions,
    connected: Arc<AtomicBool>,
) {
    let mut connections = 0u64;
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let message = Message {
                    topic: publish.topic.clone(),
                    payload: publish.payload.to_vec(),
                    retained: publish.retain,
                };
                dispatch(&subscriptions, &message);
            }
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                connections += 1;
                connected.store(true, Ordering::SeqCst);
                info!(session_present = ack.session_present, "Connected to MQTT broker");

                // Requests queued before the first handshake are still pending;
                // later handshakes start from an empty broker session
                if connections > 1 && !ack.session_present {
                    let restored = resubscribe(&client, &subscriptions);
                    info!(patterns = restored, "Restored subscriptions after reconnect");
                }
            }
            Ok(_) => {}
            Err(e) => {
                connected.store(false, Ordering::SeqCst);
                // rumqttc reconnects on the next poll
                warn!(error = %e, "MQTT connection error, retrying");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

/// Queue a SUBSCRIBE for every registered pattern; returns how many were queued
///
/// Runs on the event loop task, so it must never wait on the request queue.
fn resubscribe(client: &AsyncClient, subscriptions: &Subscriptions) -> usize {
    let patterns: BTreeSet<String> = subscriptions
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .iter()
        .map(|(pattern, _)| pattern.clone())
        .collect();

    let mut restored = 0;
    for pattern in patterns {
        match client.try_subscribe(pattern.as_str(), QoS::AtLeastOnce) {
            Ok(()) => restored += 1,
            Err(e) => warn!(pattern = %pattern, error = %e, "Failed to restore subscription"),
        }
    }
    restored
}

fn dispatch(subscriptions: &Subscriptions, message: &Message) {
    let handlers: Vec<Arc<dyn MessageHandler>> = subscriptions
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .iter()
        .filter(|(pattern, _)| topic_matches(pattern, &message.topic))
        .map(|(_, handler)| handler.clone())
        .collect();

    if handlers.is_empty() {
        debug!(topic = %message.topic, "No handler for incoming message");
    }
    for handler in handlers {
        handler.handle(message);
    }
}

#[async_trait]
impl MessageBus for MqttBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<()> {
        self.bounded(
            "publish to",
            topic,
            self.client.publish(topic, QoS::AtLeastOnce, retain, payload),
        )
        .await
    }

    async fn subscribe(&self, pattern: &str, handler: Arc<dyn MessageHandler>) -> Result<()> {
        self.subscriptions
            .write()
            .map_err(|e| anyhow::anyhow!("Lock poisoned: {}", e))?
            .push((pattern.to_string(), handler));

        self.bounded(
            "subscribe to",
            pattern,
            self.client.subscribe(pattern, QoS::AtLeastOnce),
        )
        .await
    }

    async fn unsubscribe(&self, pattern: &str) -> Result<()> {
        self.subscriptions
            .write()
            .map_err(|e| anyhow::anyhow!("Lock poisoned: {}", e))?
            .retain(|(p, _)| p != pattern);

        self.bounded("unsubscribe from", pattern, self.client.unsubscribe(pattern))
            .await
    }
}
