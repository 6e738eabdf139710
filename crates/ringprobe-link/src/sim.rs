//! In-process model of the data-logger device.
//!
//! The simulated device exposes the same three surfaces as the hardware: a
//! control line speaking the console command set, a raw data input feeding
//! a circular flash log, and a message bus carrying JSON command envelopes.
//! Time is virtual. Injected bytes advance the clock by their transmission
//! time at the sender's line rate and idle holds advance it by the gap, so
//! throughput and burst behaviour are deterministic and tests never sleep.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crossbeam::channel::Sender;
use ringprobe_telemetry::{encode_hex_dump, DeviceCounters};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::config::LinkConfig;
use crate::correlator::Correlator;
use crate::error::LinkError;
use crate::session::DeviceSession;
use crate::transport::{BusMessage, DataChannel, LineChannel, MessageBus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimProfile {
    pub device_id: String,
    /// Flash log capacity in bytes.
    pub capacity: usize,
    /// UART receive buffer in bytes.
    pub rx_buffer: usize,
    /// Rate at which the receive buffer drains into flash, bytes/s.
    pub flash_rate: u64,
    /// Highest rate the device acknowledges.
    pub max_baud: u32,
    pub initial_baud: u32,
    /// Idle time that separates two bursts.
    pub burst_gap_ms: u64,
    /// Longest `read` the device serves.
    pub read_cap: usize,
    pub commands_topic: String,
    pub responses_topic: String,
    /// Publish an unrelated status message ahead of every bus response.
    pub bus_noise: bool,
    /// Echo the request id in bus responses.
    pub echo_correlation_id: bool,
}

impl Default for SimProfile {
    fn default() -> Self {
        Self {
            device_id: "datalogger".to_string(),
            capacity: 49_152,
            rx_buffer: 8_192,
            flash_rate: 8_000,
            max_baud: 921_600,
            initial_baud: 115_200,
            burst_gap_ms: 100,
            read_cap: 256,
            commands_topic: "datalogger/commands".to_string(),
            responses_topic: "datalogger/telemetry/response".to_string(),
            bus_noise: false,
            echo_correlation_id: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Level {
    Info,
    Warn,
    Error,
    /// Printed without the log prefix.
    Raw,
}

struct Reply {
    ok: bool,
    error: Option<&'static str>,
    lines: Vec<(Level, String)>,
}

impl Reply {
    fn ok(lines: Vec<(Level, String)>) -> Self {
        Self {
            ok: true,
            error: None,
            lines,
        }
    }

    fn failed(error: &'static str, lines: Vec<(Level, String)>) -> Self {
        Self {
            ok: false,
            error: Some(error),
            lines,
        }
    }
}

struct SimState {
    profile: SimProfile,
    console: VecDeque<String>,
    flash: VecDeque<u8>,
    flash_written: u64,
    total_bytes: u64,
    burst_count: u32,
    overflow_count: u32,
    dropped_bytes: u64,
    device_baud: u32,
    sender_baud: u32,
    clock: Duration,
    last_rx_end: Option<Duration>,
    backlog: f64,
    subscribers: Vec<(String, Sender<BusMessage>)>,
}

impl SimState {
    fn new(profile: SimProfile) -> Self {
        let baud = profile.initial_baud;
        let mut state = Self {
            profile,
            console: VecDeque::new(),
            flash: VecDeque::new(),
            flash_written: 0,
            total_bytes: 0,
            burst_count: 0,
            overflow_count: 0,
            dropped_bytes: 0,
            device_baud: baud,
            sender_baud: baud,
            clock: Duration::ZERO,
            last_rx_end: None,
            backlog: 0.0,
            subscribers: Vec::new(),
        };
        state.emit(Level::Info, "Data logger starting");
        state.emit(Level::Raw, "READY");
        state
    }

    fn uptime_ms(&self) -> u128 {
        1_000 + self.clock.as_millis()
    }

    fn emit(&mut self, level: Level, text: &str) {
        let line = match level {
            Level::Info => format!("I ({}) CommandSystem: {}", self.uptime_ms(), text),
            Level::Warn => format!("W ({}) CommandSystem: {}", self.uptime_ms(), text),
            Level::Error => format!("E ({}) CommandSystem: {}", self.uptime_ms(), text),
            Level::Raw => text.to_string(),
        };
        self.console.push_back(line);
    }

    fn used_bytes(&self) -> usize {
        self.flash.len()
    }

    fn wrap_count(&self) -> u32 {
        if self.profile.capacity == 0 {
            return 0;
        }
        (self.flash_written / self.profile.capacity as u64) as u32
    }

    fn counters(&self) -> DeviceCounters {
        DeviceCounters {
            total_bytes: self.total_bytes,
            burst_count: self.burst_count,
            overflow_count: self.overflow_count,
            dropped_bytes: self.dropped_bytes,
            used_bytes: self.used_bytes() as u32,
            wrap_count: self.wrap_count(),
            capacity: Some(self.profile.capacity as u32),
        }
    }

    fn reset(&mut self) {
        self.flash.clear();
        self.flash_written = 0;
        self.total_bytes = 0;
        self.burst_count = 0;
        self.overflow_count = 0;
        self.dropped_bytes = 0;
        self.last_rx_end = None;
        self.backlog = 0.0;
    }

    fn write_flash(&mut self, bytes: &[u8]) {
        for &b in bytes {
            if self.flash.len() == self.profile.capacity {
                self.flash.pop_front();
            }
            if self.profile.capacity > 0 {
                self.flash.push_back(b);
            }
        }
        self.flash_written += bytes.len() as u64;
    }

    fn receive(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let line_rate = f64::from(self.sender_baud.max(1)) / 10.0;
        let duration = Duration::from_secs_f64(bytes.len() as f64 / line_rate);
        let gap = self.last_rx_end.map(|end| self.clock.saturating_sub(end));
        self.clock += duration;

        if self.sender_baud != self.device_baud {
            debug!(
                sender = self.sender_baud,
                device = self.device_baud,
                bytes = bytes.len(),
                "line rate mismatch, bytes lost"
            );
            return;
        }

        let drain = self.profile.flash_rate as f64;
        if let Some(gap) = gap {
            self.backlog = (self.backlog - drain * gap.as_secs_f64()).max(0.0);
        }
        if gap.map_or(true, |g| g >= Duration::from_millis(self.profile.burst_gap_ms)) {
            self.burst_count += 1;
        }

        let drained_during = drain * duration.as_secs_f64();
        let room = self.profile.rx_buffer as f64 - self.backlog + drained_during;
        let accepted = (room.max(0.0).floor() as usize).min(bytes.len());
        let lost = bytes.len() - accepted;
        if lost > 0 {
            self.overflow_count += 1;
            self.dropped_bytes += lost as u64;
        }
        self.backlog = (self.backlog + accepted as f64 - drained_during).max(0.0);

        self.total_bytes += accepted as u64;
        self.write_flash(&bytes[..accepted]);
        self.last_rx_end = Some(self.clock);
    }

    fn execute(&mut self, command: &str, args: &str) -> Reply {
        match command {
            "format" | "erase" => {
                self.reset();
                Reply::ok(vec![
                    (Level::Info, "Erasing flash and resetting stats...".to_string()),
                    (Level::Info, "Flash erased and stats reset!".to_string()),
                ])
            }
            "stats" => {
                let used = self.used_bytes();
                let capacity = self.profile.capacity;
                let percent = if capacity == 0 { 0 } else { used * 100 / capacity };
                Reply::ok(vec![
                    (Level::Info, "=== Data Logger Statistics ===".to_string()),
                    (
                        Level::Info,
                        format!("Flash: {used}/{capacity} bytes ({percent}%), wraps={}", self.wrap_count()),
                    ),
                    (
                        Level::Info,
                        format!(
                            "Transport: total={}, bursts={}, overflows={}, dropped={}",
                            self.total_bytes, self.burst_count, self.overflow_count, self.dropped_bytes
                        ),
                    ),
                ])
            }
            "read" => self.read(args),
            "baud" => self.baud(args),
            "config" => Reply::ok(vec![
                (Level::Info, format!("Device: {}", self.profile.device_id)),
                (Level::Info, format!("Log capacity: {} bytes", self.profile.capacity)),
            ]),
            "help" => Reply::ok(vec![(
                Level::Info,
                "Commands: format, stats, read <offset> <len>, baud [rate], config, help".to_string(),
            )]),
            "" => Reply::ok(Vec::new()),
            other => Reply::failed(
                "ESP_ERR_NOT_SUPPORTED",
                vec![(Level::Warn, format!("Unknown command: {other} (type 'help')"))],
            ),
        }
    }

    fn read(&mut self, args: &str) -> Reply {
        let mut parts = args.split_whitespace().map(str::parse::<usize>);
        let (Some(Ok(offset)), Some(Ok(length))) = (parts.next(), parts.next()) else {
            return Reply::failed(
                "ESP_ERR_INVALID_ARG",
                vec![(Level::Warn, "Usage: read <offset> <length>".to_string())],
            );
        };
        let length = length.min(self.profile.read_cap);
        let used = self.used_bytes();
        if offset >= used {
            return Reply::failed("ESP_FAIL", vec![(Level::Error, "Read failed".to_string())]);
        }

        let end = offset.saturating_add(length).min(used);
        let bytes: Vec<u8> = self.flash.range(offset..end).copied().collect();
        let mut lines = vec![(
            Level::Info,
            format!("Read {} bytes at offset {offset}:", bytes.len()),
        )];
        lines.extend(
            encode_hex_dump(offset, &bytes)
                .into_iter()
                .map(|row| (Level::Info, row)),
        );
        Reply::ok(lines)
    }

    fn baud(&mut self, args: &str) -> Reply {
        let args = args.trim();
        if args.is_empty() {
            return Reply::ok(vec![
                (Level::Info, format!("Current baud rate: {}", self.device_baud)),
                (Level::Raw, format!("BAUD {}", self.device_baud)),
            ]);
        }
        match args.parse::<u32>() {
            Ok(rate) if (1_200..=self.profile.max_baud).contains(&rate) => {
                self.device_baud = rate;
                Reply::ok(vec![
                    (Level::Info, format!("Baudrate set to {rate}")),
                    (Level::Raw, format!("BAUD_OK {rate}")),
                ])
            }
            _ => Reply::failed("ESP_ERR_INVALID_ARG", vec![(Level::Raw, "BAUD_FAIL".to_string())]),
        }
    }

    fn console_command(&mut self, line: &str) {
        let line = line.trim();
        let (command, args) = line.split_once(' ').unwrap_or((line, ""));
        let reply = self.execute(command, args);
        for (level, text) in reply.lines {
            self.emit(level, &text);
        }
    }

    fn deliver(&mut self, topic: &str, payload: &[u8]) {
        self.subscribers.retain(|(subscribed, inbox)| {
            if subscribed != topic {
                return true;
            }
            inbox
                .send(BusMessage {
                    topic: topic.to_string(),
                    payload: payload.to_vec(),
                })
                .is_ok()
        });
    }

    fn bus_command(&mut self, payload: &[u8]) {
        let Ok(request) = serde_json::from_slice::<Value>(payload) else {
            debug!("simulated device ignoring non-JSON command");
            return;
        };
        let Some(device_id) = request.get("deviceId").and_then(Value::as_str) else {
            debug!("simulated device ignoring command without deviceId");
            return;
        };
        if device_id != self.profile.device_id {
            return;
        }
        let command = request.get("command").and_then(Value::as_str).unwrap_or("").to_string();
        let args = request.get("args").and_then(Value::as_str).unwrap_or("").to_string();

        let reply = self.execute(&command, &args);
        let mut texts = reply.lines.into_iter().map(|(_, text)| text);
        let message = texts.next().unwrap_or_default();
        let data: Vec<String> = texts.collect();

        let status = if reply.ok { "ok" } else { "error" };
        let mut response = json!({
            "type": "command_response",
            "deviceId": self.profile.device_id,
            "deviceName": "datalogger",
            "command": command,
            "status": status,
            "message": message,
        });
        if !data.is_empty() {
            response["data"] = Value::String(data.join("\n"));
        }
        if let Some(error) = reply.error {
            response["error"] = Value::String(error.to_string());
        }
        if self.profile.echo_correlation_id {
            if let Some(id) = request.get("id") {
                response["id"] = id.clone();
            }
        }

        let topic = self.profile.responses_topic.clone();
        if self.profile.bus_noise {
            let status = json!({
                "type": "status",
                "deviceId": self.profile.device_id,
                "uptime": self.uptime_ms() as u64,
            });
            self.deliver(&topic, status.to_string().as_bytes());
        }
        self.deliver(&topic, response.to_string().as_bytes());
    }
}

/// Shared handle to one simulated device.
#[derive(Clone)]
pub struct SimulatedLogger {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedLogger {
    pub fn new(profile: SimProfile) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState::new(profile))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn control(&self) -> SimControl {
        SimControl { device: self.clone() }
    }

    pub fn data(&self) -> SimData {
        SimData { device: self.clone() }
    }

    pub fn bus(&self) -> SimBus {
        SimBus { device: self.clone() }
    }

    pub fn profile(&self) -> SimProfile {
        self.lock().profile.clone()
    }

    /// The device's own view of its counters.
    pub fn counters(&self) -> DeviceCounters {
        self.lock().counters()
    }

    /// Current log contents, oldest byte first.
    pub fn flash_contents(&self) -> Vec<u8> {
        self.lock().flash.iter().copied().collect()
    }

    pub fn device_baud(&self) -> u32 {
        self.lock().device_baud
    }

    pub fn clock(&self) -> Duration {
        self.lock().clock
    }

    /// A session wired to this device over all three surfaces.
    pub fn session(&self, config: LinkConfig) -> Result<DeviceSession, LinkError> {
        let mut correlator = Correlator::new(Box::new(self.control()));
        correlator.attach_bus(
            Box::new(self.bus()),
            &config.commands_topic,
            &config.responses_topic,
        )?;
        Ok(DeviceSession::new(correlator, Box::new(self.data()), config))
    }
}

pub struct SimControl {
    device: SimulatedLogger,
}

impl LineChannel for SimControl {
    fn write_line(&mut self, line: &str) -> Result<(), LinkError> {
        self.device.lock().console_command(line);
        Ok(())
    }

    fn read_line(&mut self, _timeout: Duration) -> Result<Option<String>, LinkError> {
        Ok(self.device.lock().console.pop_front())
    }
}

pub struct SimData {
    device: SimulatedLogger,
}

impl DataChannel for SimData {
    fn inject(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        self.device.lock().receive(bytes);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), LinkError> {
        Ok(())
    }

    fn reopen(&mut self, baud_rate: u32) -> Result<(), LinkError> {
        self.device.lock().sender_baud = baud_rate;
        Ok(())
    }

    fn baud_rate(&self) -> u32 {
        self.device.lock().sender_baud
    }

    fn hold_idle(&mut self, gap: Duration) {
        self.device.lock().clock += gap;
    }

    fn line_clock(&self) -> Duration {
        self.device.lock().clock
    }
}

pub struct SimBus {
    device: SimulatedLogger,
}

impl MessageBus for SimBus {
    fn subscribe(&mut self, topic: &str, inbox: Sender<BusMessage>) -> Result<(), LinkError> {
        self.device.lock().subscribers.push((topic.to_string(), inbox));
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), LinkError> {
        let mut state = self.device.lock();
        state.deliver(topic, payload);
        if topic == state.profile.commands_topic {
            state.bus_command(payload);
        }
        Ok(())
    }
}
