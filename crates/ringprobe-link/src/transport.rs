//! Transport seams. Adapters for real ports and brokers live outside this
//! crate; [`crate::sim`] provides in-memory implementations.

use std::time::Duration;

use crossbeam::channel::Sender;

use crate::error::LinkError;

/// Line-oriented duplex used for commands and status output.
pub trait LineChannel: Send {
    fn write_line(&mut self, line: &str) -> Result<(), LinkError>;

    /// Next complete line without its terminator, or `None` if nothing
    /// arrives within `timeout`.
    fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, LinkError>;
}

/// Raw byte sink that feeds the device's sensor input.
pub trait DataChannel: Send {
    fn inject(&mut self, bytes: &[u8]) -> Result<(), LinkError>;

    /// Block until queued bytes have left the host.
    fn flush(&mut self) -> Result<(), LinkError>;

    /// Close and reopen the port at `baud_rate`.
    fn reopen(&mut self, baud_rate: u32) -> Result<(), LinkError>;

    fn baud_rate(&self) -> u32;

    /// Keep the line idle for `gap`.
    fn hold_idle(&mut self, gap: Duration) {
        std::thread::sleep(gap);
    }

    /// Monotonic time as seen by the line, used to measure throughput.
    fn line_clock(&self) -> Duration;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Topic-keyed publish/subscribe duplex.
pub trait MessageBus: Send {
    /// Deliver every message later published on `topic` into `inbox`.
    /// Returns once the subscription is active.
    fn subscribe(&mut self, topic: &str, inbox: Sender<BusMessage>) -> Result<(), LinkError>;

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), LinkError>;
}
