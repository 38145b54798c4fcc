//! MQTT topic layout shared by the orchestrator and its clients.
//!
//! Commands arrive on `control/command/<command_name>`; the matching response
//! is published on `control/status/<command_name>` with the request's
//! correlation ID echoed in the payload.

pub const COMMAND_PREFIX: &str = "control/command";
pub const STATUS_PREFIX: &str = "control/status";
pub const LOGS_PREFIX: &str = "control/logs";

/// Wildcard the orchestrator subscribes to for inbound commands.
pub const COMMAND_WILDCARD: &str = "control/command/+";
/// Wildcards a client subscribes to for responses and broadcasts.
pub const STATUS_WILDCARD: &str = "control/status/+";
pub const LOGS_WILDCARD: &str = "control/logs/+";

pub const HEARTBEAT: &str = "control/status/heartbeat";
pub const STATUS_UPDATE: &str = "control/status/update";
pub const ERROR_LOG: &str = "control/logs/error";

pub fn command(name: &str) -> String {
    format!("{COMMAND_PREFIX}/{name}")
}

pub fn status(command_name: &str) -> String {
    format!("{STATUS_PREFIX}/{command_name}")
}

/// Last segment of a topic, used to recover the command name.
pub fn leaf(topic: &str) -> &str {
    topic.rsplit('/').next().unwrap_or(topic)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_and_status_topics_pair_up() {
        assert_eq!(command("start_strategy"), "control/command/start_strategy");
        assert_eq!(status("start_strategy"), "control/status/start_strategy");
    }

    #[test]
    fn leaf_extracts_command_name() {
        assert_eq!(leaf("control/command/create_strategy"), "create_strategy");
        assert_eq!(leaf("no_slashes"), "no_slashes");
    }
}
