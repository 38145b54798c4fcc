use std::path::PathBuf;
use std::time::Duration;

/// All orchestrator configuration loaded from environment variables at
/// startup. Missing required variables cause an immediate panic with a
/// clear message.
#[derive(Debug, Clone)]
pub struct Config {
    // MQTT broker
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub mqtt_client_id: String,

    // Worker invocation
    pub worker_bin: String,
    pub worker_args: Vec<String>,

    // On-disk layout
    pub strategies_dir: PathBuf,
    pub logs_dir: PathBuf,

    // Timing
    pub monitor_interval: Duration,
    pub spawn_settle: Duration,
    pub terminate_grace: Duration,
    pub shutdown_timeout: Duration,
    pub response_timeout: Duration,
}

impl Config {
    /// Load all configuration from environment variables.
    /// Loads `.env` if present. Panics on any missing required variable.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        let worker_args = optional_env("WORKER_ARGS")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Config {
            mqtt_host: optional_env("MQTT_HOST").unwrap_or_else(|| "localhost".to_string()),
            mqtt_port: parsed_env("MQTT_PORT", 1883),
            mqtt_username: optional_env("MQTT_USERNAME"),
            mqtt_password: optional_env("MQTT_PASSWORD"),
            mqtt_client_id: optional_env("MQTT_CLIENT_ID").unwrap_or_else(|| "fleetd".to_string()),
            worker_bin: required_env("WORKER_BIN"),
            worker_args,
            strategies_dir: optional_env("STRATEGIES_DIR")
                .unwrap_or_else(|| "conf/strategies".to_string())
                .into(),
            logs_dir: optional_env("LOGS_DIR").unwrap_or_else(|| "logs".to_string()).into(),
            monitor_interval: Duration::from_secs(parsed_env("MONITOR_INTERVAL_SECS", 30)),
            spawn_settle: Duration::from_millis(parsed_env("SPAWN_SETTLE_MS", 3000)),
            terminate_grace: Duration::from_secs(parsed_env("TERMINATE_GRACE_SECS", 10)),
            shutdown_timeout: Duration::from_secs(parsed_env("SHUTDOWN_TIMEOUT_SECS", 15)),
            response_timeout: Duration::from_secs(parsed_env("RESPONSE_TIMEOUT_SECS", 30)),
        }
    }
}

fn required_env(key: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| {
        panic!("Required environment variable '{key}' is not set. Check your .env file.")
    })
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Parse an optional numeric variable. An unset variable yields the
/// default; a set-but-unparsable one is a configuration mistake and
/// panics rather than silently running with the default.
fn parsed_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    match optional_env(key) {
        Some(v) => v.parse().unwrap_or_else(|_| {
            panic!("Environment variable '{key}' has invalid value '{v}'. Check your .env file.")
        }),
        None => default,
    }
}
