//! One device's command surface over an exclusively owned set of transports.

use std::time::Duration;

use ringprobe_telemetry::{decode_hex_dump, parse_counters, DeviceCounters};
use tracing::{debug, info};

use crate::audit::{AuditLog, Direction};
use crate::config::LinkConfig;
use crate::correlator::{Channel, Correlator, Matcher, DATA};
use crate::envelope::{CommandEnvelope, ResponseEnvelope};
use crate::error::LinkError;
use crate::transport::DataChannel;

const READY_TOKEN: &str = "READY";
const FORMAT_ACK_TOKEN: &str = "stats reset";
const BAUD_OK_TOKEN: &str = "BAUD_OK";
const BAUD_FAIL_TOKEN: &str = "BAUD_FAIL";

pub struct DeviceSession {
    correlator: Correlator,
    data: Box<dyn DataChannel>,
    config: LinkConfig,
    channel: Channel,
    counters: DeviceCounters,
    next_id: u64,
}

impl DeviceSession {
    pub fn new(correlator: Correlator, data: Box<dyn DataChannel>, config: LinkConfig) -> Self {
        Self {
            correlator,
            data,
            config,
            channel: Channel::Control,
            counters: DeviceCounters::default(),
            next_id: 1,
        }
    }

    /// Route subsequent commands over `channel`.
    pub fn use_channel(&mut self, channel: Channel) -> Result<(), LinkError> {
        if channel == Channel::Bus && !self.correlator.has_bus() {
            return Err(LinkError::NoBus);
        }
        self.channel = channel;
        Ok(())
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn correlator(&self) -> &Correlator {
        &self.correlator
    }

    pub fn correlator_mut(&mut self) -> &mut Correlator {
        &mut self.correlator
    }

    pub fn audit(&self) -> &AuditLog {
        self.correlator.audit()
    }

    /// Counters from the most recent `stats`, merged across queries.
    pub fn last_counters(&self) -> DeviceCounters {
        self.counters
    }

    /// Wait for the device's boot banner on the control line.
    pub fn wait_ready(&mut self) -> Result<(), LinkError> {
        let timeout = self.config.ready_timeout();
        self.correlator
            .await_response(Channel::Control, &Matcher::token(READY_TOKEN), timeout)?;
        info!("device ready");
        Ok(())
    }

    /// Issue a command on the active channel. A bus reply with error status
    /// becomes [`LinkError::Rejected`].
    pub fn execute(
        &mut self,
        command: &str,
        args: &str,
        control_matcher: Matcher,
        timeout: Duration,
    ) -> Result<ResponseEnvelope, LinkError> {
        let envelope = self.envelope(command, args);
        let timeout = match self.channel {
            Channel::Control => timeout,
            Channel::Bus => timeout.max(self.config.bus_timeout()),
        };
        let reply = self
            .correlator
            .exchange(self.channel, &envelope, control_matcher, timeout)?;
        if !reply.is_ok() {
            return Err(LinkError::Rejected {
                command: envelope.control_line(),
                message: reply.error.clone().unwrap_or_else(|| reply.message.clone()),
            });
        }
        Ok(reply)
    }

    /// Erase the log and reset the device counters, then discard whatever
    /// the device prints afterwards.
    pub fn format(&mut self) -> Result<(), LinkError> {
        let timeout = self.config.format_timeout();
        self.execute("format", "", Matcher::token(FORMAT_ACK_TOKEN), timeout)?;
        self.drain()?;
        self.counters = DeviceCounters::default();
        debug!("device formatted");
        Ok(())
    }

    pub fn drain(&mut self) -> Result<Vec<String>, LinkError> {
        let idle = self.config.drain_idle();
        let cap = self.config.command_timeout();
        self.correlator.drain(idle, cap)
    }

    /// Query counters. Fields missing from the reply keep their previous
    /// values.
    pub fn stats(&mut self) -> Result<DeviceCounters, LinkError> {
        let reply = self.execute("stats", "", self.collect(), self.config.command_timeout())?;
        let parse = parse_counters(&reply.lines);
        if parse.counters.is_empty() {
            return Err(LinkError::Rejected {
                command: "stats".to_string(),
                message: "reply carried no counters".to_string(),
            });
        }
        self.counters = self.counters.merge(&parse.counters);
        debug!(
            total = self.counters.total_bytes,
            used = self.counters.used_bytes,
            wraps = self.counters.wrap_count,
            overflows = self.counters.overflow_count,
            fields = ?parse.counters.present_fields(),
            "stats"
        );
        Ok(self.counters)
    }

    /// Read `length` bytes starting at `offset` within the live log.
    pub fn read(&mut self, offset: usize, length: usize) -> Result<Vec<u8>, LinkError> {
        let args = format!("{offset} {length}");
        let reply = self.execute("read", &args, self.collect(), self.config.command_timeout())?;
        Ok(decode_hex_dump(&reply.lines))
    }

    /// Switch the device's UART rate and, only once the device confirms,
    /// reopen the data channel at the same rate.
    pub fn set_baud(&mut self, rate: u32) -> Result<(), LinkError> {
        let matcher = Matcher::tokens(&[BAUD_OK_TOKEN, BAUD_FAIL_TOKEN]);
        let reply = match self.execute("baud", &rate.to_string(), matcher, self.config.baud_ack_timeout()) {
            Ok(reply) => reply,
            Err(LinkError::Timeout { waited, .. }) => {
                return Err(LinkError::UnacknowledgedReconfiguration {
                    rate,
                    reply: format!("no acknowledgement within {waited:?}"),
                })
            }
            Err(LinkError::Rejected { message, .. }) => {
                return Err(LinkError::UnacknowledgedReconfiguration { rate, reply: message })
            }
            Err(e) => return Err(e),
        };

        let expected = format!("{BAUD_OK_TOKEN} {rate}");
        if !reply.lines.iter().any(|line| line.trim_end().ends_with(&expected)) {
            return Err(LinkError::UnacknowledgedReconfiguration {
                rate,
                reply: reply.message,
            });
        }

        self.data.reopen(rate)?;
        info!(rate, "data channel reopened");
        Ok(())
    }

    pub fn inject(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        self.data.inject(bytes)?;
        self.data.flush()?;
        self.correlator
            .audit_mut()
            .record(DATA, Direction::Sent, format!("<{} bytes>", bytes.len()));
        Ok(())
    }

    pub fn hold_idle(&mut self, gap: Duration) {
        self.data.hold_idle(gap);
    }

    pub fn line_clock(&self) -> Duration {
        self.data.line_clock()
    }

    pub fn data_baud(&self) -> u32 {
        self.data.baud_rate()
    }

    fn collect(&self) -> Matcher {
        Matcher::Collect {
            idle: self.config.drain_idle(),
        }
    }

    fn envelope(&mut self, command: &str, args: &str) -> CommandEnvelope {
        let envelope = CommandEnvelope::new(self.config.device_id.clone(), command).with_args(args);
        match self.channel {
            Channel::Control => envelope,
            Channel::Bus => {
                let id = format!("rp-{}", self.next_id);
                self.next_id += 1;
                envelope.with_correlation_id(id)
            }
        }
    }
}
