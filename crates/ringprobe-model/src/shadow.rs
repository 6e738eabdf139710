//! Harness-side reconstruction of the device's circular log.
//!
//! The shadow keeps the full injection history and never evicts. Which suffix
//! of that history the device still holds is decided solely by the counters
//! the device reports: the window is the last `min(used, capacity)` bytes
//! ending at the logical write cursor. The shadow never infers wrap state on
//! its own.

use ringprobe_telemetry::DeviceCounters;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShadowError {
    #[error("slice {offset}+{length} exceeds visible window of {window} bytes")]
    OutOfVisibleRange {
        offset: usize,
        length: usize,
        window: usize,
    },

    #[error("device counters contradict injection history: {0}")]
    Contradiction(Contradiction),
}

/// Device counters that cannot be reconciled with what was injected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
pub enum Contradiction {
    #[error("device holds {used} bytes but only {sent} were injected")]
    UsedExceedsHistory { used: usize, sent: usize },

    #[error("device reports {wraps} wrap(s) after only {sent} of {capacity} bytes")]
    PrematureWrap {
        wraps: u32,
        sent: usize,
        capacity: usize,
    },
}

#[derive(Debug, Clone)]
pub struct ShadowLog {
    history: Vec<u8>,
    capacity: usize,
}

impl ShadowLog {
    /// Empty shadow for a freshly formatted log of `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            history: Vec::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Adopt the capacity the device reports for itself.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
    }

    /// Record injected bytes; the write cursor advances by `bytes.len()`.
    pub fn append(&mut self, bytes: &[u8]) {
        self.history.extend_from_slice(bytes);
    }

    /// Logical end-of-stream offset.
    pub fn cursor(&self) -> u64 {
        self.history.len() as u64
    }

    pub fn history(&self) -> &[u8] {
        &self.history
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Bytes the device should currently hold, given its own counters.
    pub fn visible_window(&self, counters: &DeviceCounters) -> Result<&[u8], ShadowError> {
        let sent = self.history.len();
        let used = counters.used_bytes as usize;

        if counters.wrap_count >= 1 && sent < self.capacity {
            return Err(ShadowError::Contradiction(Contradiction::PrematureWrap {
                wraps: counters.wrap_count,
                sent,
                capacity: self.capacity,
            }));
        }

        let window = used.min(self.capacity);
        if window > sent {
            return Err(ShadowError::Contradiction(Contradiction::UsedExceedsHistory {
                used,
                sent,
            }));
        }

        Ok(&self.history[sent - window..])
    }

    /// `visible_window(counters)[offset..offset + length]`, never truncated.
    pub fn expected_slice(
        &self,
        offset: usize,
        length: usize,
        counters: &DeviceCounters,
    ) -> Result<&[u8], ShadowError> {
        let window = self.visible_window(counters)?;
        match offset.checked_add(length) {
            Some(end) if end <= window.len() => Ok(&window[offset..end]),
            _ => Err(ShadowError::OutOfVisibleRange {
                offset,
                length,
                window: window.len(),
            }),
        }
    }
}
