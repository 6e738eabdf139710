//! Counter extraction from the device's free-text `stats` output.
//!
//! The scanner is tolerant: it looks for labelled `key=value` tokens anywhere
//! in a line and reports what it found as a [`PartialCounters`]. Absent labels
//! stay `None` so the caller can merge onto the previous snapshot instead of
//! resetting a counter to zero. Tokens that look like a counter but do not
//! parse are reported as [`ParseAmbiguity`] and skipped.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Snapshot of device-reported state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCounters {
    /// Cumulative bytes ingested since the last `format`.
    pub total_bytes: u64,
    pub burst_count: u32,
    pub overflow_count: u32,
    pub dropped_bytes: u64,
    /// Current occupancy of the circular log.
    pub used_bytes: u32,
    /// Times the write head has wrapped the log's capacity.
    pub wrap_count: u32,
    /// Physical log capacity, when the device reports it.
    pub capacity: Option<u32>,
}

impl DeviceCounters {
    /// Overlay the fields present in `partial` onto this snapshot.
    pub fn merge(&self, partial: &PartialCounters) -> DeviceCounters {
        DeviceCounters {
            total_bytes: partial.total_bytes.unwrap_or(self.total_bytes),
            burst_count: partial.burst_count.unwrap_or(self.burst_count),
            overflow_count: partial.overflow_count.unwrap_or(self.overflow_count),
            dropped_bytes: partial.dropped_bytes.unwrap_or(self.dropped_bytes),
            used_bytes: partial.used_bytes.unwrap_or(self.used_bytes),
            wrap_count: partial.wrap_count.unwrap_or(self.wrap_count),
            capacity: partial.capacity.or(self.capacity),
        }
    }
}

/// Counters found in one parse. `None` means the label was not seen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PartialCounters {
    pub total_bytes: Option<u64>,
    pub burst_count: Option<u32>,
    pub overflow_count: Option<u32>,
    pub dropped_bytes: Option<u64>,
    pub used_bytes: Option<u32>,
    pub wrap_count: Option<u32>,
    pub capacity: Option<u32>,
}

impl PartialCounters {
    pub fn is_empty(&self) -> bool {
        *self == PartialCounters::default()
    }

    /// Names of the fields that were present.
    pub fn present_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.total_bytes.is_some() {
            fields.push("total");
        }
        if self.burst_count.is_some() {
            fields.push("bursts");
        }
        if self.overflow_count.is_some() {
            fields.push("overflows");
        }
        if self.dropped_bytes.is_some() {
            fields.push("dropped");
        }
        if self.used_bytes.is_some() {
            fields.push("used");
        }
        if self.wrap_count.is_some() {
            fields.push("wraps");
        }
        if self.capacity.is_some() {
            fields.push("capacity");
        }
        fields
    }
}

/// A telemetry token that looked like a counter but could not be read.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("ambiguous '{label}' token in {line:?}: {reason}")]
pub struct ParseAmbiguity {
    pub line: String,
    pub label: &'static str,
    pub reason: String,
}

/// Result of scanning a batch of lines.
#[derive(Debug, Clone, Default)]
pub struct CounterParse {
    pub counters: PartialCounters,
    pub ambiguities: Vec<ParseAmbiguity>,
}

#[derive(Debug, Clone, Copy)]
enum Field {
    Total,
    Bursts,
    Overflows,
    Dropped,
    Used,
    Wraps,
}

const LABELS: [(&str, Field); 6] = [
    ("total", Field::Total),
    ("bursts", Field::Bursts),
    ("overflows", Field::Overflows),
    ("dropped", Field::Dropped),
    ("used", Field::Used),
    ("wraps", Field::Wraps),
];

/// Scan free-text lines for counter tokens.
///
/// Later occurrences of a label win over earlier ones. Never fails: lines
/// without tokens contribute nothing and malformed tokens are reported in
/// [`CounterParse::ambiguities`].
pub fn parse_counters<S: AsRef<str>>(lines: &[S]) -> CounterParse {
    let mut parse = CounterParse::default();

    for line in lines {
        let line = line.as_ref();
        for (label, field) in LABELS {
            scan_label(line, label, field, &mut parse);
        }
        scan_flash_usage(line, &mut parse);
    }

    for ambiguity in &parse.ambiguities {
        warn!(
            label = ambiguity.label,
            line = %ambiguity.line,
            reason = %ambiguity.reason,
            "skipping ambiguous telemetry token"
        );
    }

    parse
}

fn is_terminator(c: char) -> bool {
    matches!(c, ',' | ')' | '/' | ';') || c.is_whitespace()
}

fn scan_label(line: &str, label: &'static str, field: Field, parse: &mut CounterParse) {
    let key = format!("{label}=");
    for (at, _) in line.match_indices(&key) {
        let boundary = line[..at]
            .chars()
            .next_back()
            .map_or(true, |c| !(c.is_ascii_alphanumeric() || c == '_'));
        if !boundary {
            continue;
        }

        let rest = &line[at + key.len()..];
        let digits_len = rest.bytes().take_while(u8::is_ascii_digit).count();
        let digits = &rest[..digits_len];

        if digits.is_empty() {
            parse.ambiguities.push(ambiguity(line, label, "no digits after label"));
            continue;
        }
        if let Some(next) = rest[digits_len..].chars().next() {
            if !is_terminator(next) {
                parse
                    .ambiguities
                    .push(ambiguity(line, label, &format!("unexpected terminator {next:?}")));
                continue;
            }
        }

        let value: u64 = match digits.parse() {
            Ok(v) => v,
            Err(e) => {
                parse.ambiguities.push(ambiguity(line, label, &e.to_string()));
                continue;
            }
        };
        if let Err(reason) = store(&mut parse.counters, field, value) {
            parse.ambiguities.push(ambiguity(line, label, &reason));
        }
    }
}

fn store(counters: &mut PartialCounters, field: Field, value: u64) -> Result<(), String> {
    let narrow = || u32::try_from(value).map_err(|_| format!("{value} does not fit in 32 bits"));
    match field {
        Field::Total => counters.total_bytes = Some(value),
        Field::Dropped => counters.dropped_bytes = Some(value),
        Field::Bursts => counters.burst_count = Some(narrow()?),
        Field::Overflows => counters.overflow_count = Some(narrow()?),
        Field::Used => counters.used_bytes = Some(narrow()?),
        Field::Wraps => counters.wrap_count = Some(narrow()?),
    }
    Ok(())
}

/// `Flash: <used>/<capacity> bytes (..%), wraps=<n>` as printed by `stats`.
fn scan_flash_usage(line: &str, parse: &mut CounterParse) {
    let Some(at) = line.find("Flash:") else {
        return;
    };
    let rest = line[at + "Flash:".len()..].trim_start();
    let used_len = rest.bytes().take_while(u8::is_ascii_digit).count();
    if used_len == 0 {
        return;
    }
    let Some(after) = rest[used_len..].strip_prefix('/') else {
        parse
            .ambiguities
            .push(ambiguity(line, "used", "flash usage without capacity"));
        return;
    };
    let cap_len = after.bytes().take_while(u8::is_ascii_digit).count();

    match (rest[..used_len].parse::<u32>(), after[..cap_len].parse::<u32>()) {
        (Ok(used), Ok(capacity)) => {
            parse.counters.used_bytes = Some(used);
            parse.counters.capacity = Some(capacity);
        }
        (Err(e), _) | (_, Err(e)) => {
            parse.ambiguities.push(ambiguity(line, "used", &e.to_string()));
        }
    }
}

fn ambiguity(line: &str, label: &'static str, reason: &str) -> ParseAmbiguity {
    ParseAmbiguity {
        line: line.to_string(),
        label,
        reason: reason.to_string(),
    }
}
