use std::collections::VecDeque;
use std::time::Duration;

use ringprobe_link::{DeviceSession, LinkError};
use ringprobe_telemetry::DeviceCounters;

#[derive(Debug, thiserror::Error)]
pub enum RigError {
    #[error("rate change to {rate} not acknowledged: {reply}")]
    UnacknowledgedReconfiguration { rate: u32, reply: String },

    #[error(transparent)]
    Link(LinkError),
}

impl From<LinkError> for RigError {
    fn from(err: LinkError) -> Self {
        match err {
            LinkError::UnacknowledgedReconfiguration { rate, reply } => {
                RigError::UnacknowledgedReconfiguration { rate, reply }
            }
            other => RigError::Link(other),
        }
    }
}

impl RigError {
    pub fn is_scenario_fatal(&self) -> bool {
        match self {
            RigError::UnacknowledgedReconfiguration { .. } => false,
            RigError::Link(err) => err.is_scenario_fatal(),
        }
    }
}

/// The device operations probes and verification need.
///
/// Abstracted behind a trait so we can:
/// - Drive the real device through a [`DeviceSession`]
/// - Use [`ScriptedRig`] to test sweep logic without any device
pub trait TestRig {
    /// Erase the log, reset counters and discard residual output.
    fn reset(&mut self) -> Result<(), RigError>;

    /// Reconfigure the transfer rate on both ends.
    fn set_transfer_rate(&mut self, rate: u32) -> Result<(), RigError>;

    fn transfer_rate(&self) -> u32;

    fn inject(&mut self, bytes: &[u8]) -> Result<(), RigError>;

    fn hold_idle(&mut self, gap: Duration);

    /// Time on the data line, for throughput measurement.
    fn clock(&self) -> Duration;

    fn counters(&mut self) -> Result<DeviceCounters, RigError>;

    fn read(&mut self, offset: usize, length: usize) -> Result<Vec<u8>, RigError>;
}

impl TestRig for DeviceSession {
    fn reset(&mut self) -> Result<(), RigError> {
        Ok(self.format()?)
    }

    fn set_transfer_rate(&mut self, rate: u32) -> Result<(), RigError> {
        Ok(self.set_baud(rate)?)
    }

    fn transfer_rate(&self) -> u32 {
        self.data_baud()
    }

    fn inject(&mut self, bytes: &[u8]) -> Result<(), RigError> {
        Ok(DeviceSession::inject(self, bytes)?)
    }

    fn hold_idle(&mut self, gap: Duration) {
        DeviceSession::hold_idle(self, gap);
    }

    fn clock(&self) -> Duration {
        self.line_clock()
    }

    fn counters(&mut self) -> Result<DeviceCounters, RigError> {
        Ok(self.stats()?)
    }

    fn read(&mut self, offset: usize, length: usize) -> Result<Vec<u8>, RigError> {
        Ok(DeviceSession::read(self, offset, length)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RigCall {
    Reset,
    SetRate(u32),
    Inject(usize),
    HoldIdle(Duration),
    Counters,
    Read(usize, usize),
}

/// Scripted device for testing: lossless unless told otherwise, with an
/// optional per-injection size limit above which bytes are dropped.
pub struct ScriptedRig {
    pub calls: Vec<RigCall>,
    rate: u32,
    max_rate: u32,
    burst_limit: Option<usize>,
    clock: Duration,
    log: Vec<u8>,
    counters: DeviceCounters,
    /// Overrides returned by `counters()` before the computed ones.
    queued: VecDeque<DeviceCounters>,
    /// Upcoming resets the device rejects.
    refused_resets: usize,
}

impl ScriptedRig {
    pub fn new() -> Self {
        Self {
            calls: Vec::new(),
            rate: 115_200,
            max_rate: u32::MAX,
            burst_limit: None,
            clock: Duration::ZERO,
            log: Vec::new(),
            counters: DeviceCounters::default(),
            queued: VecDeque::new(),
            refused_resets: 0,
        }
    }

    /// Injections larger than `limit` overflow and keep only `limit` bytes.
    pub fn with_burst_limit(mut self, limit: usize) -> Self {
        self.burst_limit = Some(limit);
        self
    }

    /// Rates above `max` are refused.
    pub fn with_max_rate(mut self, max: u32) -> Self {
        self.max_rate = max;
        self
    }

    /// The next `count` resets are rejected by the device.
    pub fn refuse_resets(&mut self, count: usize) {
        self.refused_resets = count;
    }

    pub fn queue_counters(&mut self, counters: DeviceCounters) {
        self.queued.push_back(counters);
    }

    /// Corrupt one stored byte, as a faulty device would.
    pub fn corrupt(&mut self, index: usize) {
        if let Some(b) = self.log.get_mut(index) {
            *b ^= 0xFF;
        }
    }

    pub fn count(&self, call: fn(&RigCall) -> bool) -> usize {
        self.calls.iter().filter(|c| call(c)).count()
    }
}

impl Default for ScriptedRig {
    fn default() -> Self {
        Self::new()
    }
}

impl TestRig for ScriptedRig {
    fn reset(&mut self) -> Result<(), RigError> {
        self.calls.push(RigCall::Reset);
        if self.refused_resets > 0 {
            self.refused_resets -= 1;
            return Err(RigError::Link(LinkError::Rejected {
                command: "format".to_string(),
                message: "ESP_FAIL".to_string(),
            }));
        }
        self.log.clear();
        self.counters = DeviceCounters::default();
        Ok(())
    }

    fn set_transfer_rate(&mut self, rate: u32) -> Result<(), RigError> {
        self.calls.push(RigCall::SetRate(rate));
        if rate > self.max_rate {
            return Err(RigError::UnacknowledgedReconfiguration {
                rate,
                reply: "BAUD_FAIL".to_string(),
            });
        }
        self.rate = rate;
        Ok(())
    }

    fn transfer_rate(&self) -> u32 {
        self.rate
    }

    fn inject(&mut self, bytes: &[u8]) -> Result<(), RigError> {
        self.calls.push(RigCall::Inject(bytes.len()));
        let kept = match self.burst_limit {
            Some(limit) if bytes.len() > limit => {
                self.counters.overflow_count += 1;
                self.counters.dropped_bytes += (bytes.len() - limit) as u64;
                limit
            }
            _ => bytes.len(),
        };
        self.log.extend_from_slice(&bytes[..kept]);
        self.counters.total_bytes += kept as u64;
        self.counters.burst_count += 1;
        self.counters.used_bytes = self.log.len() as u32;
        self.clock += Duration::from_secs_f64(bytes.len() as f64 * 10.0 / f64::from(self.rate));
        Ok(())
    }

    fn hold_idle(&mut self, gap: Duration) {
        self.calls.push(RigCall::HoldIdle(gap));
        self.clock += gap;
    }

    fn clock(&self) -> Duration {
        self.clock
    }

    fn counters(&mut self) -> Result<DeviceCounters, RigError> {
        self.calls.push(RigCall::Counters);
        Ok(self.queued.pop_front().unwrap_or(self.counters))
    }

    fn read(&mut self, offset: usize, length: usize) -> Result<Vec<u8>, RigError> {
        self.calls.push(RigCall::Read(offset, length));
        let end = offset.saturating_add(length).min(self.log.len());
        Ok(self.log.get(offset..end).map(<[u8]>::to_vec).unwrap_or_default())
    }
}
