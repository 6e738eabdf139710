//! Link timing and addressing.
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Identifier the device answers to on the message bus.
    pub device_id: String,
    pub commands_topic: String,
    pub responses_topic: String,
    /// Bound on waiting for the first line of a command's reply.
    pub command_timeout_ms: u64,
    pub ready_timeout_ms: u64,
    pub format_timeout_ms: u64,
    pub baud_ack_timeout_ms: u64,
    /// A channel that stays silent this long counts as drained.
    pub drain_idle_ms: u64,
    pub bus_timeout_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            device_id: "datalogger".to_string(),
            commands_topic: "datalogger/commands".to_string(),
            responses_topic: "datalogger/telemetry/response".to_string(),
            command_timeout_ms: 2_000,
            ready_timeout_ms: 10_000,
            format_timeout_ms: 5_000,
            baud_ack_timeout_ms: 1_000,
            drain_idle_ms: 300,
            bus_timeout_ms: 10_000,
        }
    }
}

impl LinkConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn format_timeout(&self) -> Duration {
        Duration::from_millis(self.format_timeout_ms)
    }

    pub fn baud_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.baud_ack_timeout_ms)
    }

    pub fn drain_idle(&self) -> Duration {
        Duration::from_millis(self.drain_idle_ms)
    }

    pub fn bus_timeout(&self) -> Duration {
        Duration::from_millis(self.bus_timeout_ms)
    }
}
