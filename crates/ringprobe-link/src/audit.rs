//! Append-only record of every unit sent to or received from the device.

use std::io::{self, Write};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Sent,
    Received,
    /// Received but not matched to any request.
    Discarded,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    /// Monotonic sequence number (total order).
    pub seqno: u64,
    pub unix_ms: u64,
    /// Milliseconds since the log was opened.
    pub elapsed_ms: u64,
    pub direction: Direction,
    pub channel: &'static str,
    pub payload: String,
}

#[derive(Debug, Clone)]
pub struct AuditLog {
    entries: Vec<AuditEntry>,
    next_seqno: u64,
    opened: Instant,
}

impl AuditLog {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_seqno: 0,
            opened: Instant::now(),
        }
    }

    pub fn record(&mut self, channel: &'static str, direction: Direction, payload: impl Into<String>) {
        let unix_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        self.entries.push(AuditEntry {
            seqno: self.next_seqno,
            unix_ms,
            elapsed_ms: self.opened.elapsed().as_millis() as u64,
            direction,
            channel,
            payload: payload.into(),
        });
        self.next_seqno += 1;
    }

    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    /// Most recent payload sent on `channel`.
    pub fn last_sent(&self, channel: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.direction == Direction::Sent && e.channel == channel)
            .map(|e| e.payload.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// One JSON object per line.
    pub fn write_jsonl<W: Write>(&self, mut out: W) -> io::Result<()> {
        for entry in &self.entries {
            serde_json::to_writer(&mut out, entry)?;
            out.write_all(b"\n")?;
        }
        out.flush()
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_in_order() {
        let mut log = AuditLog::new();
        log.record("control", Direction::Sent, "stats");
        log.record("control", Direction::Received, "total=0");
        log.record("bus", Direction::Discarded, "{}");

        assert_eq!(log.len(), 3);
        let seqnos: Vec<u64> = log.entries().iter().map(|e| e.seqno).collect();
        assert_eq!(seqnos, vec![0, 1, 2]);
        assert_eq!(log.last_sent("control"), Some("stats"));
        assert_eq!(log.last_sent("bus"), None);
    }

    #[test]
    fn test_jsonl_output() {
        let mut log = AuditLog::new();
        log.record("data", Direction::Sent, "<1000 bytes>");
        log.record("control", Direction::Sent, "format");

        let mut out = Vec::new();
        log.write_jsonl(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["direction"], "sent");
        assert_eq!(first["channel"], "data");
        assert_eq!(first["seqno"], 0);
    }
}
