//! Command/response correlation over the control line and the message bus.
//!
//! Every wait is bounded. A `None` from [`LineChannel::read_line`] is taken to
//! mean the channel was silent for the whole requested wait, so elapsed time is
//! the larger of wall time and accumulated silence. This keeps timeouts exact
//! against in-memory transports that never block.

use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError};
use tracing::{debug, trace};

use crate::audit::{AuditLog, Direction};
use crate::envelope::{CommandEnvelope, ResponseEnvelope};
use crate::error::LinkError;
use crate::transport::{BusMessage, LineChannel, MessageBus};

pub const CONTROL: &str = "control";
pub const BUS: &str = "bus";
pub const DATA: &str = "data";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Control,
    Bus,
}

impl Channel {
    pub fn name(self) -> &'static str {
        match self {
            Channel::Control => CONTROL,
            Channel::Bus => BUS,
        }
    }
}

/// Identity of a sent request, used to match its reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestKey {
    pub seq: u64,
    pub channel: Channel,
    pub device_id: String,
    pub command: String,
    pub correlation_id: Option<String>,
}

/// The transport accepted the write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub request: RequestKey,
    pub bytes: usize,
}

/// What counts as "the response" when waiting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Matcher {
    /// The first non-blank status line.
    AnyLine,
    /// The first line containing any of these substrings.
    Token(Vec<String>),
    /// Everything that arrives until the line is quiet for `idle`. Never
    /// times out; an empty result is a valid drain.
    Drain { idle: Duration },
    /// Like `Drain`, but at least one line must arrive before the timeout.
    Collect { idle: Duration },
    /// The bus reply to a specific request.
    Reply(RequestKey),
}

impl Matcher {
    pub fn token(token: &str) -> Self {
        Matcher::Token(vec![token.to_string()])
    }

    pub fn tokens(tokens: &[&str]) -> Self {
        Matcher::Token(tokens.iter().map(|t| t.to_string()).collect())
    }
}

struct BusLink {
    bus: Box<dyn MessageBus>,
    inbox: Receiver<BusMessage>,
    commands_topic: String,
}

pub struct Correlator {
    control: Box<dyn LineChannel>,
    bus: Option<BusLink>,
    outstanding: Vec<RequestKey>,
    audit: AuditLog,
    next_seq: u64,
    last_command: String,
}

impl Correlator {
    pub fn new(control: Box<dyn LineChannel>) -> Self {
        Self {
            control,
            bus: None,
            outstanding: Vec::new(),
            audit: AuditLog::new(),
            next_seq: 0,
            last_command: String::new(),
        }
    }

    /// Subscribe to `responses_topic` and start routing bus replies. The
    /// subscription is active before any command can be published.
    pub fn attach_bus(
        &mut self,
        mut bus: Box<dyn MessageBus>,
        commands_topic: &str,
        responses_topic: &str,
    ) -> Result<(), LinkError> {
        let (tx, inbox) = channel::unbounded();
        bus.subscribe(responses_topic, tx)?;
        debug!(topic = responses_topic, "subscribed to responses");
        self.bus = Some(BusLink {
            bus,
            inbox,
            commands_topic: commands_topic.to_string(),
        });
        Ok(())
    }

    pub fn has_bus(&self) -> bool {
        self.bus.is_some()
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn audit_mut(&mut self) -> &mut AuditLog {
        &mut self.audit
    }

    /// Bus requests still waiting for a reply, oldest first.
    pub fn outstanding(&self) -> &[RequestKey] {
        &self.outstanding
    }

    pub fn last_command(&self) -> &str {
        &self.last_command
    }

    pub fn send(&mut self, channel: Channel, envelope: &CommandEnvelope) -> Result<Ack, LinkError> {
        let payload = match channel {
            Channel::Control => {
                let line = envelope.control_line();
                self.control.write_line(&line)?;
                line
            }
            Channel::Bus => {
                let link = self.bus.as_mut().ok_or(LinkError::NoBus)?;
                let json = serde_json::to_string(envelope)?;
                link.bus.publish(&link.commands_topic, json.as_bytes())?;
                json
            }
        };
        debug!(channel = channel.name(), payload = %payload, "sent");
        self.audit.record(channel.name(), Direction::Sent, payload.clone());

        let request = RequestKey {
            seq: self.next_seq,
            channel,
            device_id: envelope.device_id.clone(),
            command: envelope.command.clone(),
            correlation_id: envelope.correlation_id.clone(),
        };
        self.next_seq += 1;
        self.last_command = envelope.control_line();
        if channel == Channel::Bus {
            self.outstanding.push(request.clone());
        }

        Ok(Ack {
            request,
            bytes: payload.len(),
        })
    }

    pub fn await_response(
        &mut self,
        channel: Channel,
        matcher: &Matcher,
        timeout: Duration,
    ) -> Result<ResponseEnvelope, LinkError> {
        match channel {
            Channel::Control => self.await_control(matcher, timeout),
            Channel::Bus => {
                let request = match matcher {
                    Matcher::Reply(request) => Some(request.clone()),
                    _ => self.outstanding.last().cloned(),
                };
                match request {
                    Some(request) => self.await_bus_reply(&request, timeout),
                    None => Err(LinkError::Timeout {
                        command: self.last_command.clone(),
                        waited: Duration::ZERO,
                    }),
                }
            }
        }
    }

    /// Send, then wait for the reply. `control_matcher` decides what the
    /// reply is on the control line; on the bus it is always the correlated
    /// response.
    pub fn exchange(
        &mut self,
        channel: Channel,
        envelope: &CommandEnvelope,
        control_matcher: Matcher,
        timeout: Duration,
    ) -> Result<ResponseEnvelope, LinkError> {
        let ack = self.send(channel, envelope)?;
        let matcher = match channel {
            Channel::Control => control_matcher,
            Channel::Bus => Matcher::Reply(ack.request),
        };
        self.await_response(channel, &matcher, timeout)
    }

    /// Discard pending control output until the line is quiet for `idle`.
    pub fn drain(&mut self, idle: Duration, cap: Duration) -> Result<Vec<String>, LinkError> {
        let response = self.await_control(&Matcher::Drain { idle }, cap)?;
        if !response.lines.is_empty() {
            trace!(lines = response.lines.len(), "drained control output");
        }
        Ok(response.lines)
    }

    fn await_control(&mut self, matcher: &Matcher, timeout: Duration) -> Result<ResponseEnvelope, LinkError> {
        let started = Instant::now();
        let mut silent = Duration::ZERO;
        let mut lines: Vec<String> = Vec::new();

        loop {
            let spent = started.elapsed().max(silent);
            let remaining = timeout.saturating_sub(spent);
            let quiet_window = match matcher {
                Matcher::Drain { idle } => Some(*idle),
                Matcher::Collect { idle } if !lines.is_empty() => Some(*idle),
                _ => None,
            };
            let wait = quiet_window.map_or(remaining, |idle| idle.min(remaining));

            let line = if remaining.is_zero() {
                None
            } else {
                self.control.read_line(wait)?
            };

            match line {
                Some(line) => {
                    trace!(line = %line, "control rx");
                    self.audit.record(CONTROL, Direction::Received, line.clone());
                    let done = match matcher {
                        Matcher::AnyLine => !line.trim().is_empty(),
                        Matcher::Token(tokens) => tokens.iter().any(|t| line.contains(t.as_str())),
                        _ => false,
                    };
                    lines.push(line);
                    if done {
                        return Ok(ResponseEnvelope::from_lines(&self.last_command, lines));
                    }
                }
                None => {
                    silent = spent + wait;
                    let settled = match matcher {
                        Matcher::Drain { .. } => true,
                        Matcher::Collect { .. } => !lines.is_empty(),
                        _ => false,
                    };
                    if settled {
                        return Ok(ResponseEnvelope::from_lines(&self.last_command, lines));
                    }
                    if remaining.is_zero() || wait >= remaining {
                        return Err(LinkError::Timeout {
                            command: self.last_command.clone(),
                            waited: started.elapsed().max(silent),
                        });
                    }
                }
            }
        }
    }

    fn await_bus_reply(&mut self, request: &RequestKey, timeout: Duration) -> Result<ResponseEnvelope, LinkError> {
        let started = Instant::now();
        let mut silent = Duration::ZERO;

        loop {
            let spent = started.elapsed().max(silent);
            let remaining = timeout.saturating_sub(spent);
            let link = self.bus.as_ref().ok_or(LinkError::NoBus)?;

            let message = if remaining.is_zero() {
                None
            } else {
                match link.inbox.recv_timeout(remaining) {
                    Ok(message) => Some(message),
                    Err(RecvTimeoutError::Timeout) => {
                        silent = spent + remaining;
                        None
                    }
                    Err(RecvTimeoutError::Disconnected) => return Err(LinkError::Closed(BUS)),
                }
            };

            let Some(message) = message else {
                self.outstanding.retain(|k| k.seq != request.seq);
                return Err(LinkError::Timeout {
                    command: request.command.clone(),
                    waited: started.elapsed().max(silent),
                });
            };

            let text = String::from_utf8_lossy(&message.payload).into_owned();
            let Some(response) = ResponseEnvelope::from_bus_payload(&message.payload) else {
                debug!(topic = %message.topic, payload = %text, "discarding non-response bus message");
                self.audit.record(BUS, Direction::Discarded, text);
                continue;
            };
            if let Err(reason) = self.accepts(request, &response) {
                debug!(reason, payload = %text, "discarding unmatched bus response");
                self.audit.record(BUS, Direction::Discarded, text);
                continue;
            }

            self.audit.record(BUS, Direction::Received, text);
            self.outstanding.retain(|k| k.seq != request.seq);
            return Ok(response);
        }
    }

    /// A reply with an id matches only the request bearing that id. One
    /// without an id matches only the newest outstanding request for the
    /// same device.
    fn accepts(&self, request: &RequestKey, response: &ResponseEnvelope) -> Result<(), &'static str> {
        if let Some(device) = &response.device_id {
            if *device != request.device_id {
                return Err("device id mismatch");
            }
        }
        if response.command != request.command {
            return Err("command mismatch");
        }
        match (&response.correlation_id, &request.correlation_id) {
            (Some(got), Some(want)) if got == want => Ok(()),
            (Some(_), _) => Err("correlation id mismatch"),
            (None, _) => {
                let newest = self
                    .outstanding
                    .iter()
                    .filter(|k| k.device_id == request.device_id)
                    .map(|k| k.seq)
                    .max();
                if newest == Some(request.seq) {
                    Ok(())
                } else {
                    Err("id-less reply for an older request")
                }
            }
        }
    }
}
