//! Step, scenario and run reporting.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Instant;

use ringprobe_explore::{SampleCheck, SweepSummary};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// One structured result line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub scenario: String,
    pub step: String,
    pub passed: bool,
    pub detail: String,
}

/// Diagnostic summary of a [`SampleCheck`]; raw bytes are dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckRecord {
    pub offset: usize,
    pub length: usize,
    pub matched: bool,
    pub differing: usize,
}

impl From<&SampleCheck> for CheckRecord {
    fn from(check: &SampleCheck) -> Self {
        Self {
            offset: check.offset,
            length: check.length,
            matched: check.matched,
            differing: check.differing,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum Outcome {
    Passed,
    Failed,
    Aborted(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub name: String,
    pub outcome: Outcome,
    pub steps: Vec<StepRecord>,
    pub sweeps: Vec<SweepSummary>,
    pub checks: Vec<CheckRecord>,
    pub elapsed_secs: f64,
}

impl ScenarioReport {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            outcome: Outcome::Passed,
            steps: Vec::new(),
            sweeps: Vec::new(),
            checks: Vec::new(),
            elapsed_secs: 0.0,
        }
    }

    /// Record a step; a failing step fails the scenario.
    pub fn step(&mut self, step: &str, passed: bool, detail: impl Into<String>) {
        let detail = detail.into();
        if passed {
            info!(scenario = %self.name, step, detail = %detail, "PASS");
        } else {
            warn!(scenario = %self.name, step, detail = %detail, "FAIL");
            if self.outcome == Outcome::Passed {
                self.outcome = Outcome::Failed;
            }
        }
        self.steps.push(StepRecord {
            scenario: self.name.clone(),
            step: step.to_string(),
            passed,
            detail,
        });
    }

    pub fn check(&mut self, step: &str, check: &SampleCheck) {
        let detail = if check.matched {
            format!("{} bytes at offset {} match", check.length, check.offset)
        } else {
            format!(
                "{} of {} bytes differ at offset {}",
                check.differing, check.length, check.offset
            )
        };
        self.checks.push(CheckRecord::from(check));
        self.step(step, check.matched, detail);
    }

    pub fn sweep(&mut self, summary: SweepSummary) {
        let detail = format!(
            "last good {} {}, first failure {}",
            summary.last_good.as_deref().unwrap_or("none"),
            summary.unit,
            summary.first_failure.as_deref().unwrap_or("none"),
        );
        self.step(&summary.dimension, summary.last_good.is_some(), detail);
        if let Some(reason) = &summary.restore_failure {
            self.step(&format!("{}_restore", summary.dimension), false, reason.clone());
        }
        self.sweeps.push(summary);
    }

    pub fn abort(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(scenario = %self.name, reason = %reason, "scenario aborted");
        self.outcome = Outcome::Aborted(reason);
    }

    pub fn passed(&self) -> bool {
        self.outcome == Outcome::Passed
    }
}

/// Aggregate of every scenario in one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub seed: u64,
    pub passed: usize,
    pub failed: usize,
    pub aborted: usize,
    /// Last known-good value per swept dimension.
    pub last_good: BTreeMap<String, Option<String>>,
    /// Measured throughput per dimension that reports one, bytes/s.
    pub measured: BTreeMap<String, f64>,
    pub scenarios: Vec<ScenarioReport>,
    pub elapsed_secs: f64,
}

impl RunSummary {
    pub fn from_reports(reports: Vec<ScenarioReport>, seed: u64, elapsed_secs: f64) -> Self {
        let mut last_good = BTreeMap::new();
        let mut measured = BTreeMap::new();
        for sweep in reports.iter().flat_map(|r| &r.sweeps) {
            last_good.insert(sweep.dimension.clone(), sweep.last_good.clone());
            if let Some(value) = sweep.measured {
                measured.insert(sweep.dimension.clone(), value);
            }
        }
        let count = |f: fn(&Outcome) -> bool| reports.iter().filter(|r| f(&r.outcome)).count();

        Self {
            seed,
            passed: count(|o| *o == Outcome::Passed),
            failed: count(|o| *o == Outcome::Failed),
            aborted: count(|o| matches!(o, Outcome::Aborted(_))),
            last_good,
            measured,
            scenarios: reports,
            elapsed_secs,
        }
    }

    pub fn all_passed(&self) -> bool {
        !self.scenarios.is_empty() && self.failed == 0 && self.aborted == 0
    }

    /// Human-readable summary block.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "=== ringprobe summary (seed {}) ===", self.seed);
        for report in &self.scenarios {
            let status = match &report.outcome {
                Outcome::Passed => "PASS".to_string(),
                Outcome::Failed => "FAIL".to_string(),
                Outcome::Aborted(reason) => format!("ABORTED ({reason})"),
            };
            let failed_steps = report.steps.iter().filter(|s| !s.passed).count();
            let _ = writeln!(
                out,
                "{:<10} {:<24} steps={} failed={} {:.1}s",
                report.name,
                status,
                report.steps.len(),
                failed_steps,
                report.elapsed_secs
            );
        }
        if !self.last_good.is_empty() {
            let _ = writeln!(out, "--- last known good ---");
            for (dimension, value) in &self.last_good {
                let _ = writeln!(out, "{dimension:<16} {}", value.as_deref().unwrap_or("none"));
            }
        }
        for (dimension, value) in &self.measured {
            let _ = writeln!(out, "{dimension:<16} {value:.0} B/s measured");
        }
        let _ = writeln!(
            out,
            "{} passed, {} failed, {} aborted in {:.1}s",
            self.passed, self.failed, self.aborted, self.elapsed_secs
        );
        out
    }
}

/// A simple wall-clock timer for scenario duration.
#[derive(Debug)]
pub struct ScenarioTimer {
    start: Instant,
}

impl ScenarioTimer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(dimension: &str, last_good: Option<&str>) -> SweepSummary {
        SweepSummary {
            dimension: dimension.to_string(),
            unit: "bytes".to_string(),
            last_good: last_good.map(str::to_string),
            first_failure: None,
            trials: 1,
            measured: None,
            restore_failure: None,
        }
    }

    #[test]
    fn test_failing_step_fails_scenario() {
        let mut report = ScenarioReport::new("smoke");
        report.step("format", true, "ok");
        assert!(report.passed());
        report.step("stats", false, "total=999");
        assert_eq!(report.outcome, Outcome::Failed);
        report.step("read", true, "ok");
        assert_eq!(report.outcome, Outcome::Failed);
        assert_eq!(report.steps.len(), 3);
    }

    #[test]
    fn test_abort_overrides_failure() {
        let mut report = ScenarioReport::new("wrap");
        report.step("stats", false, "");
        report.abort("timeout");
        assert_eq!(report.outcome, Outcome::Aborted("timeout".into()));
    }

    #[test]
    fn test_sweep_without_good_value_fails_step() {
        let mut report = ScenarioReport::new("limits");
        report.sweep(summary("burst_size", None));
        assert!(!report.passed());
    }

    #[test]
    fn test_refused_restore_is_its_own_failed_step() {
        let mut report = ScenarioReport::new("baud");
        let mut restored = summary("transfer_rate", Some("921600"));
        restored.restore_failure = Some("rate change to 2000000 not acknowledged: BAUD_FAIL".into());
        report.sweep(restored);

        assert_eq!(report.outcome, Outcome::Failed);
        assert_eq!(report.sweeps.len(), 1);
        let steps: Vec<(&str, bool)> = report.steps.iter().map(|s| (s.step.as_str(), s.passed)).collect();
        assert_eq!(steps, [("transfer_rate", true), ("transfer_rate_restore", false)]);
    }

    #[test]
    fn test_run_summary_counts_and_last_good() {
        let mut a = ScenarioReport::new("smoke");
        a.step("x", true, "");
        let mut b = ScenarioReport::new("burst");
        b.sweep(summary("burst_size", Some("2000")));
        let mut c = ScenarioReport::new("wrap");
        c.abort("timeout");

        let run = RunSummary::from_reports(vec![a, b, c], 1, 0.5);
        assert_eq!((run.passed, run.failed, run.aborted), (2, 0, 1));
        assert_eq!(run.last_good["burst_size"], Some("2000".to_string()));
        assert!(!run.all_passed());
        assert!(run.render().contains("ABORTED (timeout)"));

        let json = serde_json::to_value(&run).unwrap();
        assert_eq!(json["scenarios"][2]["outcome"]["status"], "aborted");
    }

    #[test]
    fn test_empty_run_is_not_a_pass() {
        assert!(!RunSummary::from_reports(Vec::new(), 0, 0.0).all_passed());
    }
}
