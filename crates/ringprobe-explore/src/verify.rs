//! Randomized read-back checks against the shadow log.
//!
//! A check reads one window of the device log and compares it with the
//! shadow's expectation. Offsets are drawn uniformly from the closed range
//! `[0, window - length]`, so a passing check covers only that window.
//! Repeated checks raise confidence but never prove the whole log correct.

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use ringprobe_model::{Contradiction, ShadowError, ShadowLog};
use ringprobe_telemetry::DeviceCounters;
use serde::Serialize;
use tracing::{debug, warn};

use crate::rig::{RigError, TestRig};
use crate::rng::sample_rng;

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("need {length} bytes to sample but only {available} are visible")]
    InsufficientData { available: usize, length: usize },

    #[error("sample outside the visible window: {0}")]
    OutOfVisibleRange(ShadowError),

    #[error("counters contradict the shadow: {0}")]
    Contradiction(Contradiction),

    #[error(transparent)]
    Rig(#[from] RigError),
}

impl From<ShadowError> for VerifyError {
    fn from(err: ShadowError) -> Self {
        match err {
            ShadowError::Contradiction(c) => VerifyError::Contradiction(c),
            other => VerifyError::OutOfVisibleRange(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SampleCheck {
    pub offset: usize,
    pub length: usize,
    pub expected: Vec<u8>,
    pub actual: Vec<u8>,
    pub matched: bool,
    /// Positions that differ, counting a length difference as differing.
    pub differing: usize,
}

pub struct SampleVerifier {
    rng: ChaCha8Rng,
    length: usize,
}

impl SampleVerifier {
    pub fn new(seed: u64, length: usize) -> Self {
        Self {
            rng: sample_rng(seed, 0),
            length,
        }
    }

    pub fn length(&self) -> usize {
        self.length
    }

    /// Check one randomly placed window of the live log.
    pub fn verify<R: TestRig + ?Sized>(
        &mut self,
        rig: &mut R,
        shadow: &ShadowLog,
        counters: &DeviceCounters,
    ) -> Result<SampleCheck, VerifyError> {
        let available = shadow.visible_window(counters)?.len();
        if available < self.length {
            return Err(VerifyError::InsufficientData {
                available,
                length: self.length,
            });
        }
        let offset = self.rng.gen_range(0..=available - self.length);
        check_at(rig, shadow, counters, offset, self.length)
    }
}

/// Check the window at a fixed `offset`.
pub fn check_at<R: TestRig + ?Sized>(
    rig: &mut R,
    shadow: &ShadowLog,
    counters: &DeviceCounters,
    offset: usize,
    length: usize,
) -> Result<SampleCheck, VerifyError> {
    let expected = shadow.expected_slice(offset, length, counters)?.to_vec();
    let actual = rig.read(offset, length)?;

    let differing = expected
        .iter()
        .zip(&actual)
        .filter(|(e, a)| e != a)
        .count()
        + expected.len().abs_diff(actual.len());
    let matched = differing == 0;

    if matched {
        debug!(offset, length, "sample matched");
    } else {
        warn!(offset, length, differing, received = actual.len(), "sample mismatch");
    }

    Ok(SampleCheck {
        offset,
        length,
        expected,
        actual,
        matched,
        differing,
    })
}
