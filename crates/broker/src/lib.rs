//! MQTT connectivity for the orchestrator.
//!
//! One connection, one subscription to the command wildcard. Inbound
//! commands are forwarded to the dispatcher over a channel so broker
//! delivery is never blocked by command handling. Publishing is
//! fire-and-forget: while disconnected, messages are dropped and logged,
//! never raised to business logic.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use common::{topics, Config, InboundCommand};

const EVENT_CAPACITY: usize = 64;
const COMMAND_QUEUE: usize = 64;
const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// Cloneable publishing handle shared with the dispatcher and the
/// monitoring loop.
#[derive(Clone)]
pub struct BrokerHandle {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
}

impl BrokerHandle {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Publish a JSON payload, best effort. A publish while disconnected or
    /// with a full outgoing queue is dropped with a log line; the caller
    /// must not treat delivery as guaranteed.
    pub fn publish_json(&self, topic: &str, payload: &impl Serialize) {
        if !self.is_connected() {
            debug!(topic = %topic, "Broker disconnected, dropping publish");
            return;
        }
        let bytes = match serde_json::to_vec(payload) {
            Ok(b) => b,
            Err(e) => {
                warn!(topic = %topic, error = %e, "Failed to encode publish payload");
                return;
            }
        };
        if let Err(e) = self.client.try_publish(topic, QoS::AtMostOnce, false, bytes) {
            warn!(topic = %topic, error = %e, "Publish dropped");
        }
    }
}

/// Owns the MQTT event loop. `run` is consumed by `tokio::spawn`.
pub struct BrokerClient {
    client: AsyncClient,
    eventloop: EventLoop,
    connected: Arc<AtomicBool>,
    command_tx: mpsc::Sender<InboundCommand>,
}

impl BrokerClient {
    /// Build the MQTT session from config. Returns the event-loop driver,
    /// the shared publish handle, and the inbound command stream consumed
    /// by the dispatcher.
    pub fn new(cfg: &Config) -> (BrokerClient, BrokerHandle, mpsc::Receiver<InboundCommand>) {
        let mut options =
            MqttOptions::new(cfg.mqtt_client_id.clone(), cfg.mqtt_host.clone(), cfg.mqtt_port);
        options.set_keep_alive(Duration::from_secs(30));
        if let (Some(user), Some(pass)) = (&cfg.mqtt_username, &cfg.mqtt_password) {
            options.set_credentials(user.clone(), pass.clone());
        }

        let (client, eventloop) = AsyncClient::new(options, EVENT_CAPACITY);
        let connected = Arc::new(AtomicBool::new(false));
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);

        let handle = BrokerHandle { client: client.clone(), connected: connected.clone() };
        let broker = BrokerClient { client, eventloop, connected, command_tx };
        (broker, handle, command_rx)
    }

    /// Drive the MQTT connection: subscribe on every (re)connect, decode
    /// inbound commands, flip the connectivity flag on errors. rumqttc
    /// reconnects on its own; we only pace it with a short backoff.
    pub async fn run(mut self) {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("Connected to MQTT broker");
                    self.connected.store(true, Ordering::SeqCst);
                    if let Err(e) = self
                        .client
                        .subscribe(topics::COMMAND_WILDCARD, QoS::AtMostOnce)
                        .await
                    {
                        warn!(error = %e, "Failed to subscribe to command topic");
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    handle_publish(&self.command_tx, &publish.topic, &publish.payload);
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    warn!("Broker sent disconnect");
                    self.connected.store(false, Ordering::SeqCst);
                }
                Ok(_) => {}
                Err(e) => {
                    self.connected.store(false, Ordering::SeqCst);
                    warn!(error = %e, "MQTT connection error, retrying");
                    tokio::time::sleep(RECONNECT_BACKOFF).await;
                }
            }
        }
    }

}

/// Decode an inbound publish and hand it to the dispatcher. Must never
/// suspend: this runs on the event-loop task, and parking it stalls
/// keep-alives and every queued outgoing publish. A full dispatcher queue
/// means the command is dropped, same as any other at-most-once loss.
fn handle_publish(command_tx: &mpsc::Sender<InboundCommand>, topic: &str, payload: &[u8]) {
    if !topic.starts_with(topics::COMMAND_PREFIX) {
        return;
    }
    let name = topics::leaf(topic).to_string();
    let payload: serde_json::Value = match serde_json::from_slice(payload) {
        Ok(v) => v,
        Err(e) => {
            warn!(topic = %topic, error = %e, "Discarding undecodable command payload");
            return;
        }
    };

    debug!(command = %name, "Command received");
    if let Err(e) = command_tx.try_send(InboundCommand { name, payload }) {
        warn!(command = %topics::leaf(topic), error = %e, "Dispatcher queue full, dropping command");
    }
}
