//! Scenario orchestration over one exclusively owned device session.
//!
//! Each scenario runs to completion or aborts. Timeouts and transport
//! failures abort the scenario; every other error is confined to the step,
//! check or sweep candidate that raised it and lands in the report.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use ringprobe_explore::verify::check_at;
use ringprobe_explore::{
    measure_flash_write, sweep_burst_size, sweep_spacing, sweep_sustained, sweep_transfer_rate,
    RigError, SampleCheck, SampleVerifier, TestRig, VerifyError,
};
use ringprobe_link::{Channel, DeviceSession, Matcher};
use ringprobe_model::{pattern, stream_pattern, ShadowLog};
use ringprobe_telemetry::{parse_counters, DeviceCounters};
use tracing::info;

use crate::config::HarnessConfig;
use crate::report::{ScenarioReport, ScenarioTimer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    Smoke,
    Wrap,
    Baud,
    Burst,
    Sustained,
    Spacing,
    Flash,
    Bus,
    Limits,
    All,
}

#[derive(Debug, thiserror::Error)]
#[error("unknown scenario {0:?} (expected one of {names})", names = Scenario::names())]
pub struct UnknownScenario(pub String);

impl Scenario {
    pub const EVERY: [Scenario; 10] = [
        Scenario::Smoke,
        Scenario::Wrap,
        Scenario::Baud,
        Scenario::Burst,
        Scenario::Sustained,
        Scenario::Spacing,
        Scenario::Flash,
        Scenario::Bus,
        Scenario::Limits,
        Scenario::All,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Scenario::Smoke => "smoke",
            Scenario::Wrap => "wrap",
            Scenario::Baud => "baud",
            Scenario::Burst => "burst",
            Scenario::Sustained => "sustained",
            Scenario::Spacing => "spacing",
            Scenario::Flash => "flash",
            Scenario::Bus => "bus",
            Scenario::Limits => "limits",
            Scenario::All => "all",
        }
    }

    fn names() -> String {
        Self::EVERY.map(Scenario::name).join(", ")
    }

    /// The scenarios actually run for this selection.
    pub fn expand(self, has_bus: bool) -> Vec<Scenario> {
        match self {
            Scenario::All if has_bus => {
                vec![Scenario::Smoke, Scenario::Wrap, Scenario::Limits, Scenario::Bus]
            }
            Scenario::All => vec![Scenario::Smoke, Scenario::Wrap, Scenario::Limits],
            single => vec![single],
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Scenario {
    type Err = UnknownScenario;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::EVERY
            .into_iter()
            .find(|scenario| scenario.name() == s)
            .ok_or_else(|| UnknownScenario(s.to_string()))
    }
}

pub struct Orchestrator {
    session: DeviceSession,
    config: HarnessConfig,
    shadow: ShadowLog,
    verifier: SampleVerifier,
    ready: bool,
}

impl Orchestrator {
    pub fn new(session: DeviceSession, config: HarnessConfig) -> Self {
        let shadow = ShadowLog::new(config.shadow.capacity);
        let verifier = SampleVerifier::new(config.verify.seed, config.verify.sample_length);
        Self {
            session,
            config,
            shadow,
            verifier,
            ready: false,
        }
    }

    pub fn session(&self) -> &DeviceSession {
        &self.session
    }

    pub fn shadow(&self) -> &ShadowLog {
        &self.shadow
    }

    pub fn into_session(self) -> DeviceSession {
        self.session
    }

    /// Run `scenario`, expanding composite selections.
    pub fn run_selection(&mut self, scenario: Scenario) -> Vec<ScenarioReport> {
        let has_bus = self.session.correlator().has_bus();
        scenario
            .expand(has_bus)
            .into_iter()
            .map(|s| self.run(s))
            .collect()
    }

    pub fn run(&mut self, scenario: Scenario) -> ScenarioReport {
        let timer = ScenarioTimer::start();
        let mut report = ScenarioReport::new(scenario.name());
        info!(scenario = scenario.name(), "scenario started");

        let result = self.dispatch(scenario, &mut report);

        if let Err(err) = result {
            if err.is_scenario_fatal() {
                report.abort(err.to_string());
            } else {
                report.step("error", false, err.to_string());
            }
        }
        report.elapsed_secs = timer.elapsed_secs();
        info!(scenario = scenario.name(), outcome = ?report.outcome, "scenario finished");
        report
    }

    fn dispatch(&mut self, scenario: Scenario, report: &mut ScenarioReport) -> Result<(), RigError> {
        match scenario {
            Scenario::Smoke => self.smoke(report),
            Scenario::Wrap => self.wrap(report),
            Scenario::Baud => self.baud(report),
            Scenario::Burst => self.burst(report),
            Scenario::Sustained => self.sustained(report),
            Scenario::Spacing => self.spacing(report),
            Scenario::Flash => self.flash(report),
            Scenario::Bus => self.bus(report),
            Scenario::Limits => self.dispatch_each(
                &[
                    Scenario::Baud,
                    Scenario::Burst,
                    Scenario::Sustained,
                    Scenario::Spacing,
                    Scenario::Flash,
                ],
                report,
            ),
            Scenario::All => {
                let parts = Scenario::All.expand(self.session.correlator().has_bus());
                self.dispatch_each(&parts, report)
            }
        }
    }

    /// Run every part; a part's non-fatal error fails only that part.
    fn dispatch_each(&mut self, parts: &[Scenario], report: &mut ScenarioReport) -> Result<(), RigError> {
        for &part in parts {
            match self.dispatch(part, report) {
                Ok(()) => {}
                Err(err) if err.is_scenario_fatal() => return Err(err),
                Err(err) => report.step(part.name(), false, err.to_string()),
            }
        }
        Ok(())
    }

    fn ensure_ready(&mut self, report: &mut ScenarioReport) -> Result<(), RigError> {
        if !self.ready {
            self.session.wait_ready()?;
            self.ready = true;
            report.step("ready", true, "READY received");
        }
        Ok(())
    }

    /// Fresh log on the device and a matching empty shadow.
    fn prepare(&mut self, report: &mut ScenarioReport) -> Result<(), RigError> {
        self.ensure_ready(report)?;
        self.session.reset()?;
        self.shadow = ShadowLog::new(self.shadow.capacity());
        report.step("format", true, "log erased");
        Ok(())
    }

    fn inject_shadowed(&mut self, bytes: &[u8]) -> Result<(), RigError> {
        TestRig::inject(&mut self.session, bytes)?;
        self.shadow.append(bytes);
        Ok(())
    }

    /// Continue the non-periodic stream from the shadow's cursor.
    fn inject_stream(&mut self, len: usize) -> Result<(), RigError> {
        let bytes = stream_pattern(len, self.shadow.cursor());
        self.inject_shadowed(&bytes)
    }

    fn counters(&mut self) -> Result<DeviceCounters, RigError> {
        let counters = TestRig::counters(&mut self.session)?;
        if self.config.shadow.adopt_device_capacity {
            if let Some(capacity) = counters.capacity.filter(|&c| c > 0) {
                let capacity = capacity as usize;
                if capacity != self.shadow.capacity() {
                    info!(capacity, "adopting device log capacity");
                    self.shadow.set_capacity(capacity);
                }
            }
        }
        Ok(counters)
    }

    /// Fold one check result into the report. Only device errors escape.
    fn record_check(
        report: &mut ScenarioReport,
        step: &str,
        result: Result<SampleCheck, VerifyError>,
    ) -> Result<Option<SampleCheck>, RigError> {
        match result {
            Ok(check) => {
                report.check(step, &check);
                Ok(Some(check))
            }
            Err(VerifyError::Contradiction(contradiction)) => {
                report.step(step, false, format!("verification mismatch: {contradiction}"));
                Ok(None)
            }
            Err(VerifyError::Rig(err)) => Err(err),
            Err(precondition) => {
                report.step(step, false, precondition.to_string());
                Ok(None)
            }
        }
    }

    fn sample(&mut self, report: &mut ScenarioReport, counters: &DeviceCounters) -> Result<(), RigError> {
        for _ in 0..self.config.verify.samples_per_check {
            let result = self.verifier.verify(&mut self.session, &self.shadow, counters);
            Self::record_check(report, "sample", result)?;
        }
        Ok(())
    }

    fn smoke(&mut self, report: &mut ScenarioReport) -> Result<(), RigError> {
        let cfg = self.config.smoke.clone();
        self.prepare(report)?;
        self.inject_shadowed(&pattern(cfg.inject_bytes, 0))?;
        self.session.hold_idle(Duration::from_millis(cfg.settle_ms));

        let counters = self.counters()?;
        report.step(
            "stats",
            counters.total_bytes == cfg.inject_bytes as u64,
            format!("total={} expected={}", counters.total_bytes, cfg.inject_bytes),
        );

        let length = self.config.verify.sample_length;
        let head = check_at(&mut self.session, &self.shadow, &counters, 0, length);
        Self::record_check(report, "read_head", head)?;
        self.sample(report, &counters)
    }

    fn wrap(&mut self, report: &mut ScenarioReport) -> Result<(), RigError> {
        let cfg = self.config.wrap.clone();
        let settle = Duration::from_millis(cfg.settle_ms);
        self.prepare(report)?;
        self.inject_stream(cfg.initial_bytes)?;
        self.session.hold_idle(settle);
        // Learn the real capacity before choosing a stopping point.
        self.counters()?;

        let ceiling = 2 * self.shadow.capacity() as u64;
        let mut chunks = 0usize;
        let mut after_wrap = 0usize;
        loop {
            self.inject_stream(cfg.chunk_bytes)?;
            self.session.hold_idle(settle);
            chunks += 1;

            let counters = self.counters()?;
            let sent = self.shadow.cursor();
            report.step(
                &format!("chunk_{chunks}"),
                counters.total_bytes == sent,
                format!(
                    "sent={sent} total={} used={} wraps={}",
                    counters.total_bytes, counters.used_bytes, counters.wrap_count
                ),
            );
            self.sample(report, &counters)?;

            if counters.wrap_count >= 1 {
                after_wrap += 1;
                if after_wrap > cfg.post_wrap_iterations {
                    break;
                }
            }
            if sent > ceiling {
                break;
            }
        }

        let counters = self.counters()?;
        report.step(
            "wrapped",
            counters.wrap_count >= 1,
            format!("wraps={} after {} bytes", counters.wrap_count, self.shadow.cursor()),
        );

        let length = self.config.verify.sample_length;
        let original = self.shadow.history()[..length.min(self.shadow.history().len())].to_vec();
        let head = check_at(&mut self.session, &self.shadow, &counters, 0, length);
        if let Some(check) = Self::record_check(report, "read_head", head)? {
            report.step(
                "overwritten",
                check.actual != original,
                format!("head of log starts with {:02x?}", &check.actual[..check.actual.len().min(8)]),
            );
        }
        Ok(())
    }

    fn baud(&mut self, report: &mut ScenarioReport) -> Result<(), RigError> {
        self.ensure_ready(report)?;
        let outcome = sweep_transfer_rate(&mut self.session, &self.config.sweeps.rate)?;
        report.sweep(outcome.summary());
        Ok(())
    }

    fn burst(&mut self, report: &mut ScenarioReport) -> Result<(), RigError> {
        self.ensure_ready(report)?;
        let outcome = sweep_burst_size(&mut self.session, &self.config.sweeps.burst)?;
        report.sweep(outcome.summary());
        Ok(())
    }

    fn sustained(&mut self, report: &mut ScenarioReport) -> Result<(), RigError> {
        self.ensure_ready(report)?;
        let outcome = sweep_sustained(&mut self.session, &self.config.sweeps.sustained)?;
        report.sweep(outcome.summary());
        Ok(())
    }

    fn spacing(&mut self, report: &mut ScenarioReport) -> Result<(), RigError> {
        self.ensure_ready(report)?;
        let outcome = sweep_spacing(&mut self.session, &self.config.sweeps.spacing)?;
        report.sweep(outcome.summary());
        Ok(())
    }

    fn flash(&mut self, report: &mut ScenarioReport) -> Result<(), RigError> {
        self.ensure_ready(report)?;
        // Capacity comes from the device when it reports one.
        self.session.reset()?;
        self.counters()?;
        let capacity = self.shadow.capacity();
        let outcome = measure_flash_write(&mut self.session, &self.config.sweeps.flash, capacity)?;
        report.sweep(outcome.summary());
        Ok(())
    }

    /// `stats` over the message bus with a correlation id.
    fn bus(&mut self, report: &mut ScenarioReport) -> Result<(), RigError> {
        self.ensure_ready(report)?;
        self.session.use_channel(Channel::Bus)?;
        let timeout = self.session.config().command_timeout();
        let reply = self.session.execute("stats", "", Matcher::AnyLine, timeout);
        self.session.use_channel(Channel::Control)?;
        let reply = reply?;

        report.step("status", reply.is_ok(), format!("message={:?}", reply.message));
        report.step(
            "correlation_id",
            reply.correlation_id.is_some(),
            format!("id={}", reply.correlation_id.as_deref().unwrap_or("none")),
        );
        let parse = parse_counters(&reply.lines);
        report.step(
            "counters",
            !parse.counters.is_empty(),
            format!("fields={:?}", parse.counters.present_fields()),
        );
        Ok(())
    }
}
