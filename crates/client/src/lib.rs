//! Caller-side command library.
//!
//! `ControlClient` publishes commands with a per-request correlation ID and
//! resolves the matching response through a oneshot future fulfilled by the
//! MQTT event loop. Correlation is keyed by request, not by command name,
//! so concurrent identical commands never swap or lose responses.

pub mod correlate;

use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use common::command::CreateStrategy;
use common::{topics, Command, Error, ErrorLog, Heartbeat, Response, Result, StatusSnapshot};

use crate::correlate::Correlator;

const EVENT_CAPACITY: usize = 64;
const BROADCAST_CAPACITY: usize = 256;

/// Connection settings for a control client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub client_id: String,
    pub response_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            mqtt_host: "localhost".to_string(),
            mqtt_port: 1883,
            mqtt_username: None,
            mqtt_password: None,
            client_id: format!("fleet-client-{}", Uuid::new_v4()),
            response_timeout: Duration::from_secs(30),
        }
    }
}

impl ClientConfig {
    pub fn from_config(cfg: &common::Config) -> Self {
        Self {
            mqtt_host: cfg.mqtt_host.clone(),
            mqtt_port: cfg.mqtt_port,
            mqtt_username: cfg.mqtt_username.clone(),
            mqtt_password: cfg.mqtt_password.clone(),
            response_timeout: cfg.response_timeout,
            ..Default::default()
        }
    }
}

/// Broadcasts the orchestrator pushes without being asked.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Heartbeat(Heartbeat),
    StatusUpdate(StatusSnapshot),
    ErrorLog(ErrorLog),
}

pub struct ControlClient {
    mqtt: AsyncClient,
    correlator: Arc<Correlator>,
    events: broadcast::Sender<ClientEvent>,
    response_timeout: Duration,
}

impl ControlClient {
    /// Open the MQTT session and spawn its event-loop task.
    pub fn connect(cfg: &ClientConfig) -> Self {
        let mut options =
            MqttOptions::new(cfg.client_id.clone(), cfg.mqtt_host.clone(), cfg.mqtt_port);
        options.set_keep_alive(Duration::from_secs(30));
        if let (Some(user), Some(pass)) = (&cfg.mqtt_username, &cfg.mqtt_password) {
            options.set_credentials(user.clone(), pass.clone());
        }

        let (mqtt, eventloop) = AsyncClient::new(options, EVENT_CAPACITY);
        let correlator = Arc::new(Correlator::new());
        let (events, _) = broadcast::channel(BROADCAST_CAPACITY);

        tokio::spawn(run_event_loop(
            eventloop,
            mqtt.clone(),
            correlator.clone(),
            events.clone(),
        ));

        Self { mqtt, correlator, events, response_timeout: cfg.response_timeout }
    }

    /// Subscribe to heartbeats, status snapshots and error logs.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Issue a command and await its correlated response.
    pub async fn request(&self, command: Command) -> Result<Response> {
        let request_id = Uuid::new_v4();
        let rx = self.correlator.register(request_id);

        let mut payload = command.payload();
        if let Some(map) = payload.as_object_mut() {
            map.insert("request_id".into(), serde_json::json!(request_id.to_string()));
        }
        let bytes = serde_json::to_vec(&payload)?;

        let topic = topics::command(command.name());
        debug!(command = command.name(), request_id = %request_id, "Sending command");
        if let Err(e) = self.mqtt.publish(topic, QoS::AtMostOnce, false, bytes).await {
            self.correlator.forget(request_id);
            warn!(error = %e, "Command publish failed");
            return Err(Error::BrokerUnavailable);
        }

        await_response(&self.correlator, request_id, rx, self.response_timeout).await
    }

    // ── Typed convenience wrappers ───────────────────────────────────────

    pub async fn create_strategy(&self, fields: CreateStrategy) -> Result<Response> {
        self.request(Command::CreateStrategy(fields)).await
    }

    pub async fn start_strategy(&self, name: &str) -> Result<Response> {
        self.request(Command::StartStrategy { name: name.into() }).await
    }

    pub async fn stop_strategy(&self, name: &str) -> Result<Response> {
        self.request(Command::StopStrategy { name: name.into() }).await
    }

    pub async fn pause_strategy(&self, name: &str) -> Result<Response> {
        self.request(Command::PauseStrategy { name: name.into() }).await
    }

    pub async fn resume_strategy(&self, name: &str) -> Result<Response> {
        self.request(Command::ResumeStrategy { name: name.into() }).await
    }

    pub async fn delete_strategy(&self, name: &str) -> Result<Response> {
        self.request(Command::DeleteStrategy { name: name.into() }).await
    }

    pub async fn update_strategy_config(
        &self,
        name: &str,
        config: serde_json::Value,
    ) -> Result<Response> {
        self.request(Command::UpdateStrategyConfig { name: name.into(), config }).await
    }

    pub async fn get_strategies(&self) -> Result<Response> {
        self.request(Command::GetStrategies).await
    }

    pub async fn get_strategy_status(&self, name: &str) -> Result<Response> {
        self.request(Command::GetStrategyStatus { name: name.into() }).await
    }

    pub async fn get_performance(&self, name: Option<&str>) -> Result<Response> {
        self.request(Command::GetPerformance { name: name.map(str::to_string) }).await
    }

    pub async fn get_logs(&self, name: Option<&str>, lines: usize) -> Result<Response> {
        self.request(Command::GetLogs { name: name.map(str::to_string), lines }).await
    }

    pub async fn restart_hummingbot(&self) -> Result<Response> {
        self.request(Command::RestartHummingbot).await
    }
}

/// Wait for the correlated response, bounded by the response window. On
/// expiry the pending entry is forgotten so a late response does not leak
/// a table slot.
async fn await_response(
    correlator: &Correlator,
    request_id: Uuid,
    rx: oneshot::Receiver<Response>,
    window: Duration,
) -> Result<Response> {
    match tokio::time::timeout(window, rx).await {
        Ok(Ok(response)) => Ok(response),
        // Fulfiller dropped: the event loop task died.
        Ok(Err(_)) => Err(Error::BrokerUnavailable),
        Err(_) => {
            correlator.forget(request_id);
            Err(Error::Timeout(window.as_secs()))
        }
    }
}

async fn run_event_loop(
    mut eventloop: EventLoop,
    mqtt: AsyncClient,
    correlator: Arc<Correlator>,
    events: broadcast::Sender<ClientEvent>,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("Control client connected");
                for wildcard in [topics::STATUS_WILDCARD, topics::LOGS_WILDCARD] {
                    if let Err(e) = mqtt.subscribe(wildcard, QoS::AtMostOnce).await {
                        warn!(topic = wildcard, error = %e, "Subscribe failed");
                    }
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                route_message(&publish.topic, &publish.payload, &correlator, &events);
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "Control client connection error, retrying");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

fn route_message(
    topic: &str,
    payload: &[u8],
    correlator: &Correlator,
    events: &broadcast::Sender<ClientEvent>,
) {
    if topic == topics::HEARTBEAT {
        if let Ok(hb) = serde_json::from_slice::<Heartbeat>(payload) {
            let _ = events.send(ClientEvent::Heartbeat(hb));
        }
    } else if topic == topics::STATUS_UPDATE {
        if let Ok(snapshot) = serde_json::from_slice::<StatusSnapshot>(payload) {
            let _ = events.send(ClientEvent::StatusUpdate(snapshot));
        }
    } else if topic == topics::ERROR_LOG {
        if let Ok(error_log) = serde_json::from_slice::<ErrorLog>(payload) {
            let _ = events.send(ClientEvent::ErrorLog(error_log));
        }
    } else if topic.starts_with(topics::STATUS_PREFIX) {
        match serde_json::from_slice::<Response>(payload) {
            Ok(response) => {
                if !correlator.fulfill(response) {
                    // Response to someone else's request, or one we stopped
                    // waiting for.
                    debug!(topic = %topic, "Uncorrelated response ignored");
                }
            }
            Err(e) => warn!(topic = %topic, error = %e, "Undecodable response"),
        }
    }
}
