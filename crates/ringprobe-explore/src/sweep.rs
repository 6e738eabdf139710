//! Linear limit search.
//!
//! Candidates are tried strictly in the given order, each after a device
//! reset. The first failing candidate ends the sweep and the last passing one
//! is reported as the known-good operating point. Near a threshold the device
//! may behave non-monotonically, so every candidate up to the failure is
//! tried rather than bisecting.

use std::fmt::Display;

use ringprobe_telemetry::DeviceCounters;
use serde::Serialize;
use tracing::{info, warn};

use crate::rig::{RigError, TestRig};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LimitSweep<T> {
    pub candidates: Vec<T>,
    /// Most recent candidate that passed.
    pub last_good: Option<T>,
    /// Set on the first failure; no candidate is tried afterwards.
    pub failed: bool,
    pub cursor: usize,
}

impl<T: Clone> LimitSweep<T> {
    pub fn new(candidates: Vec<T>) -> Self {
        Self {
            candidates,
            last_good: None,
            failed: false,
            cursor: 0,
        }
    }

    /// Candidate to try next, if the sweep is still running.
    pub fn next_candidate(&self) -> Option<&T> {
        if self.failed {
            None
        } else {
            self.candidates.get(self.cursor)
        }
    }

    /// Record the verdict for the current candidate and advance.
    pub fn record(&mut self, passed: bool) {
        let Some(candidate) = self.next_candidate().cloned() else {
            return;
        };
        self.cursor += 1;
        if passed {
            self.last_good = Some(candidate);
        } else {
            self.failed = true;
        }
    }

    pub fn is_finished(&self) -> bool {
        self.next_candidate().is_none()
    }

    pub fn first_failure(&self) -> Option<&T> {
        if self.failed {
            self.candidates.get(self.cursor - 1)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeResult {
    pub passed: bool,
    pub detail: String,
    pub counters: Option<DeviceCounters>,
    /// Measured quantity for probes that report one, e.g. bytes/s.
    pub measured: Option<f64>,
}

impl ProbeResult {
    pub fn judged(passed: bool, detail: impl Into<String>, counters: DeviceCounters) -> Self {
        Self {
            passed,
            detail: detail.into(),
            counters: Some(counters),
            measured: None,
        }
    }

    /// Failed candidate whose probe could not finish.
    pub fn errored(err: &RigError) -> Self {
        Self {
            passed: false,
            detail: err.to_string(),
            counters: None,
            measured: None,
        }
    }

    pub fn with_measurement(mut self, value: f64) -> Self {
        self.measured = Some(value);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trial<T> {
    pub candidate: T,
    pub result: ProbeResult,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepOutcome<T> {
    pub dimension: String,
    pub unit: &'static str,
    pub last_good: Option<T>,
    pub first_failure: Option<T>,
    pub trials: Vec<Trial<T>>,
    /// Set when putting the device back after the sweep was refused.
    pub restore_failure: Option<String>,
}

/// Dimension-agnostic view of a sweep for reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepSummary {
    pub dimension: String,
    pub unit: String,
    pub last_good: Option<String>,
    pub first_failure: Option<String>,
    pub trials: usize,
    pub measured: Option<f64>,
    pub restore_failure: Option<String>,
}

impl<T: Display> SweepOutcome<T> {
    pub fn summary(&self) -> SweepSummary {
        SweepSummary {
            dimension: self.dimension.clone(),
            unit: self.unit.to_string(),
            last_good: self.last_good.as_ref().map(ToString::to_string),
            first_failure: self.first_failure.as_ref().map(ToString::to_string),
            trials: self.trials.len(),
            measured: self.trials.iter().rev().find_map(|t| t.result.measured),
            restore_failure: self.restore_failure.clone(),
        }
    }
}

/// Sweep `candidates` in order, resetting the device before each probe.
///
/// An unacknowledged reconfiguration or a rejected command, including one
/// from the reset, fails the candidate. Errors that end the scenario are
/// returned immediately.
pub fn run_sweep<T, R, F>(
    rig: &mut R,
    dimension: &str,
    unit: &'static str,
    candidates: Vec<T>,
    mut probe: F,
) -> Result<SweepOutcome<T>, RigError>
where
    T: Clone + Display,
    R: TestRig + ?Sized,
    F: FnMut(&mut R, &T) -> Result<ProbeResult, RigError>,
{
    let mut sweep = LimitSweep::new(candidates);
    let mut trials = Vec::new();

    while let Some(candidate) = sweep.next_candidate().cloned() {
        let attempt = match rig.reset() {
            Ok(()) => probe(rig, &candidate),
            Err(err) => Err(err),
        };
        let result = match attempt {
            Ok(result) => result,
            Err(err) if !err.is_scenario_fatal() => ProbeResult::errored(&err),
            Err(err) => return Err(err),
        };

        if result.passed {
            info!(dimension, candidate = %candidate, unit, detail = %result.detail, "PASS");
        } else {
            warn!(dimension, candidate = %candidate, unit, detail = %result.detail, "FAIL");
        }
        sweep.record(result.passed);
        trials.push(Trial { candidate, result });
    }

    Ok(SweepOutcome {
        dimension: dimension.to_string(),
        unit,
        first_failure: sweep.first_failure().cloned(),
        last_good: sweep.last_good,
        trials,
        restore_failure: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sweep_state_stops_at_failure() {
        let mut sweep = LimitSweep::new(vec![1, 2, 3, 4]);
        sweep.record(true);
        sweep.record(true);
        sweep.record(false);
        assert!(sweep.is_finished());
        assert_eq!(sweep.last_good, Some(2));
        assert_eq!(sweep.first_failure(), Some(&3));

        // Further verdicts are ignored.
        sweep.record(true);
        assert_eq!(sweep.last_good, Some(2));
        assert_eq!(sweep.cursor, 3);
    }

    #[test]
    fn test_all_pass_has_no_failure() {
        let mut sweep = LimitSweep::new(vec!["a", "b"]);
        sweep.record(true);
        sweep.record(true);
        assert_eq!(sweep.last_good, Some("b"));
        assert_eq!(sweep.first_failure(), None);
        assert!(!sweep.failed);
    }

    #[test]
    fn test_first_candidate_failing_leaves_no_good_value() {
        let mut sweep = LimitSweep::new(vec![10]);
        sweep.record(false);
        assert_eq!(sweep.last_good, None);
        assert_eq!(sweep.first_failure(), Some(&10));
    }
}
