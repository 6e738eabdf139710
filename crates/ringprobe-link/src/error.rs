use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("failed to open {port}: {reason}")]
    TransportOpen { port: String, reason: String },

    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no response to '{command}' after {waited:?}")]
    Timeout { command: String, waited: Duration },

    #[error("{0} channel closed")]
    Closed(&'static str),

    #[error("no message bus attached")]
    NoBus,

    #[error("envelope encoding failed: {0}")]
    Envelope(#[from] serde_json::Error),

    #[error("device did not acknowledge rate {rate}: {reply}")]
    UnacknowledgedReconfiguration { rate: u32, reply: String },

    #[error("device rejected '{command}': {message}")]
    Rejected { command: String, message: String },
}

impl LinkError {
    /// Whether the error ends the enclosing scenario rather than a single
    /// check or sweep candidate.
    pub fn is_scenario_fatal(&self) -> bool {
        !matches!(
            self,
            LinkError::UnacknowledgedReconfiguration { .. } | LinkError::Rejected { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatality_classification() {
        let timeout = LinkError::Timeout {
            command: "stats".into(),
            waited: Duration::from_secs(2),
        };
        assert!(timeout.is_scenario_fatal());
        assert!(timeout.to_string().contains("stats"));

        let unacked = LinkError::UnacknowledgedReconfiguration {
            rate: 2_000_000,
            reply: "BAUD_FAIL".into(),
        };
        assert!(!unacked.is_scenario_fatal());
    }
}
