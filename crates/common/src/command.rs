use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::error::{Error, Result};

/// A raw command as delivered by the broker: the topic's last segment plus
/// the decoded JSON payload. Parsed into a [`Command`] by the dispatcher.
#[derive(Debug, Clone)]
pub struct InboundCommand {
    pub name: String,
    pub payload: Value,
}

impl InboundCommand {
    /// Correlation ID embedded by the caller, echoed back in the response.
    pub fn request_id(&self) -> Option<Uuid> {
        self.payload
            .get("request_id")
            .and_then(Value::as_str)
            .and_then(|s| Uuid::parse_str(s).ok())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateStrategy {
    pub name: String,
    pub strategy_type: String,
    pub exchange: String,
    pub trading_pair: String,
    #[serde(default = "empty_object")]
    pub config: Value,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

/// Every command the orchestrator understands. Parsing an inbound message
/// into this enum gives exhaustive-match coverage in the dispatcher; an
/// unknown command name never reaches a handler.
#[derive(Debug, Clone)]
pub enum Command {
    CreateStrategy(CreateStrategy),
    StartStrategy { name: String },
    StopStrategy { name: String },
    PauseStrategy { name: String },
    ResumeStrategy { name: String },
    DeleteStrategy { name: String },
    UpdateStrategyConfig { name: String, config: Value },
    GetStrategies,
    GetStrategyStatus { name: String },
    GetPerformance { name: Option<String> },
    GetLogs { name: Option<String>, lines: usize },
    RestartHummingbot,
}

pub const DEFAULT_LOG_LINES: usize = 100;

impl Command {
    /// Parse `(command_name, payload)` into a typed command.
    ///
    /// Returns `Validation` for a known command with a malformed payload and
    /// `Other` for an unknown command name (the dispatcher logs those and
    /// sends no response, since there is no reply topic to use).
    pub fn parse(name: &str, payload: &Value) -> Result<Command> {
        match name {
            "create_strategy" => {
                let create: CreateStrategy = from_payload(payload)?;
                if create.name.is_empty()
                    || create.strategy_type.is_empty()
                    || create.exchange.is_empty()
                    || create.trading_pair.is_empty()
                {
                    return Err(Error::Validation(
                        "name, strategy_type, exchange and trading_pair must be non-empty".into(),
                    ));
                }
                if !create.config.is_object() {
                    return Err(Error::Validation("config must be an object".into()));
                }
                Ok(Command::CreateStrategy(create))
            }
            "start_strategy" => Ok(Command::StartStrategy { name: required_name(payload)? }),
            "stop_strategy" => Ok(Command::StopStrategy { name: required_name(payload)? }),
            "pause_strategy" => Ok(Command::PauseStrategy { name: required_name(payload)? }),
            "resume_strategy" => Ok(Command::ResumeStrategy { name: required_name(payload)? }),
            "delete_strategy" => Ok(Command::DeleteStrategy { name: required_name(payload)? }),
            "update_strategy_config" => {
                let name = required_name(payload)?;
                let config = payload
                    .get("config")
                    .cloned()
                    .ok_or_else(|| Error::Validation("missing required field: config".into()))?;
                if !config.is_object() {
                    return Err(Error::Validation("config must be an object".into()));
                }
                Ok(Command::UpdateStrategyConfig { name, config })
            }
            "get_strategies" => Ok(Command::GetStrategies),
            "get_strategy_status" => Ok(Command::GetStrategyStatus { name: required_name(payload)? }),
            "get_performance" => Ok(Command::GetPerformance { name: optional_name(payload) }),
            "get_logs" => Ok(Command::GetLogs {
                name: optional_name(payload),
                lines: payload
                    .get("lines")
                    .and_then(Value::as_u64)
                    .map(|n| n as usize)
                    .unwrap_or(DEFAULT_LOG_LINES),
            }),
            "restart_hummingbot" => Ok(Command::RestartHummingbot),
            other => Err(Error::Other(format!("unknown command: {other}"))),
        }
    }

    /// Wire name of this command, also the leaf of its command/status topics.
    pub fn name(&self) -> &'static str {
        match self {
            Command::CreateStrategy(_) => "create_strategy",
            Command::StartStrategy { .. } => "start_strategy",
            Command::StopStrategy { .. } => "stop_strategy",
            Command::PauseStrategy { .. } => "pause_strategy",
            Command::ResumeStrategy { .. } => "resume_strategy",
            Command::DeleteStrategy { .. } => "delete_strategy",
            Command::UpdateStrategyConfig { .. } => "update_strategy_config",
            Command::GetStrategies => "get_strategies",
            Command::GetStrategyStatus { .. } => "get_strategy_status",
            Command::GetPerformance { .. } => "get_performance",
            Command::GetLogs { .. } => "get_logs",
            Command::RestartHummingbot => "restart_hummingbot",
        }
    }

    /// Wire payload for this command, used by the client library.
    pub fn payload(&self) -> Value {
        match self {
            Command::CreateStrategy(c) => serde_json::to_value(c).unwrap_or_default(),
            Command::StartStrategy { name }
            | Command::StopStrategy { name }
            | Command::PauseStrategy { name }
            | Command::ResumeStrategy { name }
            | Command::DeleteStrategy { name } => json!({ "name": name }),
            Command::UpdateStrategyConfig { name, config } => {
                json!({ "name": name, "config": config })
            }
            Command::GetStrategies | Command::RestartHummingbot => json!({}),
            Command::GetStrategyStatus { name } => json!({ "name": name }),
            Command::GetPerformance { name } => match name {
                Some(n) => json!({ "name": n }),
                None => json!({}),
            },
            Command::GetLogs { name, lines } => match name {
                Some(n) => json!({ "name": n, "lines": lines }),
                None => json!({ "lines": lines }),
            },
        }
    }
}

fn from_payload<T: serde::de::DeserializeOwned>(payload: &Value) -> Result<T> {
    serde_json::from_value(payload.clone())
        .map_err(|e| Error::Validation(format!("invalid payload: {e}")))
}

fn required_name(payload: &Value) -> Result<String> {
    match payload.get("name").and_then(Value::as_str) {
        Some(name) if !name.is_empty() => Ok(name.to_string()),
        _ => Err(Error::Validation("missing required field: name".into())),
    }
}

fn optional_name(payload: &Value) -> Option<String> {
    payload
        .get("name")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Response published on `control/status/<command_name>`. Handlers never
/// let an error escape the dispatch boundary; failures become
/// `{success: false, error}` here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Uuid>,
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl Response {
    /// Bare success, used by read-only handlers that only attach data.
    pub fn success() -> Self {
        Response { success: true, ..Default::default() }
    }

    pub fn ok(message: impl Into<String>) -> Self {
        Response {
            success: true,
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn err(error: &Error) -> Self {
        Response {
            success: false,
            error: Some(error.to_string()),
            ..Default::default()
        }
    }

    /// Attach a data field. Serialization failures are unreachable for the
    /// types handlers attach, so a failed conversion is simply skipped.
    pub fn with(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.data.insert(key.into(), v);
        }
        self
    }

    pub fn correlated(mut self, request_id: Option<Uuid>) -> Self {
        self.request_id = request_id;
        self
    }
}
