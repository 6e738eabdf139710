//! Command and response envelopes shared by both command channels.
//!
//! On the message bus they travel as JSON; on the control channel only the
//! command line is sent and the reply lines are wrapped into a
//! [`ResponseEnvelope`] by the correlator.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const RESPONSE_KIND: &str = "command_response";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    #[serde(rename = "deviceId")]
    pub device_id: String,
    pub command: String,
    #[serde(default)]
    pub args: String,
    #[serde(rename = "id", default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl CommandEnvelope {
    pub fn new(device_id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            command: command.into(),
            args: String::new(),
            correlation_id: None,
        }
    }

    pub fn with_args(mut self, args: impl Into<String>) -> Self {
        self.args = args.into();
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Text sent on the control channel.
    pub fn control_line(&self) -> String {
        if self.args.is_empty() {
            self.command.clone()
        } else {
            format!("{} {}", self.command, self.args)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    #[serde(rename = "type", default)]
    pub kind: String,
    pub command: String,
    pub status: ResponseStatus,
    #[serde(default)]
    pub message: String,
    #[serde(rename = "id", default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(rename = "deviceId", default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Text lines of the reply, regardless of which channel carried it.
    #[serde(skip)]
    pub lines: Vec<String>,
}

impl ResponseEnvelope {
    /// Reply assembled from control-channel lines.
    pub fn from_lines(command: &str, lines: Vec<String>) -> Self {
        Self {
            kind: RESPONSE_KIND.to_string(),
            command: command.to_string(),
            status: ResponseStatus::Ok,
            message: lines.last().cloned().unwrap_or_default(),
            correlation_id: None,
            data: None,
            device_id: None,
            error: None,
            lines,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ResponseStatus::Ok
    }

    /// Decode a bus payload. `None` if it is not a command response.
    pub fn from_bus_payload(payload: &[u8]) -> Option<Self> {
        let value: Value = serde_json::from_slice(payload).ok()?;
        if value.get("type").and_then(Value::as_str) != Some(RESPONSE_KIND) {
            return None;
        }
        let mut envelope: ResponseEnvelope = serde_json::from_value(value).ok()?;
        envelope.lines = envelope.text_lines();
        Some(envelope)
    }

    /// Flatten `message` and `data` into lines the telemetry parser can scan.
    fn text_lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = self.message.lines().map(str::to_string).collect();
        match &self.data {
            Some(Value::String(text)) => lines.extend(text.lines().map(str::to_string)),
            Some(Value::Array(items)) => lines.extend(items.iter().map(|item| match item {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            })),
            Some(Value::Object(fields)) => {
                lines.push(
                    fields
                        .iter()
                        .map(|(key, value)| format!("{key}={value}"))
                        .collect::<Vec<_>>()
                        .join(", "),
                );
            }
            Some(Value::Null) | None => {}
            Some(other) => lines.push(other.to_string()),
        }
        lines
    }
}
