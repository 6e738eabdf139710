use ringprobe_core::config::HarnessConfig;
use ringprobe_core::report::{Outcome, RunSummary};
use ringprobe_core::scenario::{Orchestrator, Scenario};
use ringprobe_link::{Correlator, DeviceSession, LinkConfig, SimProfile, SimulatedLogger};
use ringprobe_model::pattern;

const SMALL_LOG: &str = include_str!("fixtures/small_log.json");

fn small_log() -> HarnessConfig {
    HarnessConfig::from_json(SMALL_LOG).unwrap()
}

fn simulated(config: HarnessConfig) -> (SimulatedLogger, Orchestrator) {
    let device = SimulatedLogger::new(config.simulator.clone());
    let session = device.session(config.link.clone()).unwrap();
    (device, Orchestrator::new(session, config))
}

#[test]
fn test_smoke_counts_and_reads_back() {
    let (device, mut orchestrator) = simulated(HarnessConfig::default());
    let report = orchestrator.run(Scenario::Smoke);

    assert_eq!(report.outcome, Outcome::Passed, "{:#?}", report.steps);
    assert_eq!(device.counters().total_bytes, 1_000);

    let stats = report.steps.iter().find(|s| s.step == "stats").unwrap();
    assert!(stats.detail.contains("total=1000"));
    let head = &report.checks[0];
    assert_eq!((head.offset, head.length), (0, 64));
    assert!(head.matched);
    assert_eq!(&device.flash_contents()[..64], pattern(64, 0).as_slice());
}

#[test]
fn test_wrap_overwrites_log_head() {
    let (device, mut orchestrator) = simulated(small_log());
    let report = orchestrator.run(Scenario::Wrap);

    assert_eq!(report.outcome, Outcome::Passed, "{:#?}", report.steps);
    assert!(device.counters().wrap_count >= 1);
    // The device's own capacity replaced the configured one.
    assert_eq!(orchestrator.shadow().capacity(), 8_192);

    let overwritten = report.steps.iter().find(|s| s.step == "overwritten").unwrap();
    assert!(overwritten.passed);
    assert_ne!(&device.flash_contents()[..64], pattern(64, 0).as_slice());
    assert!(report.checks.iter().all(|c| c.matched));
}

#[test]
fn test_wrap_with_block_aligned_sizes() {
    let mut config = small_log();
    config.wrap.initial_bytes = 1_024;
    config.wrap.chunk_bytes = 4_096;
    let (device, mut orchestrator) = simulated(config);
    let report = orchestrator.run(Scenario::Wrap);

    assert_eq!(report.outcome, Outcome::Passed, "{:#?}", report.steps);
    // The visible window starts 9216 bytes in, a multiple of 256.
    assert_eq!(device.counters().total_bytes, 17_408);
    assert_eq!((device.counters().total_bytes - 8_192) % 256, 0);
    let overwritten = report.steps.iter().find(|s| s.step == "overwritten").unwrap();
    assert!(overwritten.passed, "{}", overwritten.detail);
}

#[test]
fn test_burst_scenario_reports_last_good() {
    let mut config = small_log();
    config.simulator = SimProfile {
        rx_buffer: 3_000,
        flash_rate: 0,
        ..Default::default()
    };
    let (_device, mut orchestrator) = simulated(config);
    let report = orchestrator.run(Scenario::Burst);

    assert_eq!(report.sweeps.len(), 1);
    assert_eq!(report.sweeps[0].last_good.as_deref(), Some("2000"));
    assert_eq!(report.sweeps[0].first_failure.as_deref(), Some("4000"));
    // A known-good value exists, so the sweep step itself passes.
    assert!(report.passed());
}

#[test]
fn test_limits_against_default_device() {
    let (device, mut orchestrator) = simulated(HarnessConfig::default());
    let reports = orchestrator.run_selection(Scenario::Limits);
    assert_eq!(reports.len(), 1);

    let summary = RunSummary::from_reports(reports, 0, 0.0);
    let last_good = |dim: &str| summary.last_good[dim].clone();
    assert_eq!(last_good("transfer_rate"), Some("921600".into()));
    assert_eq!(last_good("burst_size"), Some("24000".into()));
    assert_eq!(last_good("sustained"), Some("10".into()));
    assert_eq!(last_good("burst_spacing"), Some("20".into()));
    assert_eq!(last_good("flash_write"), Some("921600".into()));
    assert!(summary.measured["flash_write"] > 0.0);
    assert!(summary.all_passed());

    // Rate sweeps leave the line at its default rate.
    assert_eq!(device.device_baud(), 115_200);
    assert_eq!(orchestrator.session().data_baud(), 115_200);
}

#[test]
fn test_limits_continues_past_refused_restore() {
    let mut config = HarnessConfig::default();
    config.sweeps.rate.restore_rate = 2_000_000;
    let (_device, mut orchestrator) = simulated(config);
    let report = orchestrator.run(Scenario::Limits);

    assert_eq!(report.outcome, Outcome::Failed);
    let dimensions: Vec<&str> = report.sweeps.iter().map(|s| s.dimension.as_str()).collect();
    assert_eq!(
        dimensions,
        ["transfer_rate", "burst_size", "sustained", "burst_spacing", "flash_write"]
    );
    assert_eq!(report.sweeps[0].last_good.as_deref(), Some("921600"));

    let restore = report
        .steps
        .iter()
        .find(|s| s.step == "transfer_rate_restore")
        .unwrap();
    assert!(!restore.passed);
    assert!(restore.detail.contains("2000000"));
    assert!(report.steps.iter().all(|s| s.step != "error"));
}

#[test]
fn test_bus_stats_with_correlation_id() {
    let (_device, mut orchestrator) = simulated(HarnessConfig::default());
    let report = orchestrator.run(Scenario::Bus);

    assert_eq!(report.outcome, Outcome::Passed, "{:#?}", report.steps);
    let id = report.steps.iter().find(|s| s.step == "correlation_id").unwrap();
    assert_eq!(id.detail, "id=rp-1");
    assert_eq!(orchestrator.session().channel(), ringprobe_link::Channel::Control);
}

#[test]
fn test_all_without_bus_skips_bus_scenario() {
    let config = small_log();
    let device = SimulatedLogger::new(config.simulator.clone());
    let session = DeviceSession::new(
        Correlator::new(Box::new(device.control())),
        Box::new(device.data()),
        LinkConfig::default(),
    );
    let mut orchestrator = Orchestrator::new(session, config);

    let names: Vec<String> = orchestrator
        .run_selection(Scenario::All)
        .into_iter()
        .map(|r| r.name)
        .collect();
    assert_eq!(names, ["smoke", "wrap", "limits"]);

    let report = orchestrator.run(Scenario::Bus);
    assert!(matches!(report.outcome, Outcome::Aborted(_)));
}

#[test]
fn test_missing_banner_aborts_scenario() {
    let device = SimulatedLogger::new(SimProfile::default());
    let mut session = device.session(LinkConfig::default()).unwrap();
    // Consume the only READY the device prints.
    session.wait_ready().unwrap();

    let mut orchestrator = Orchestrator::new(session, HarnessConfig::default());
    let report = orchestrator.run(Scenario::Smoke);
    match &report.outcome {
        Outcome::Aborted(reason) => assert!(reason.contains("no response")),
        other => panic!("expected abort, got {other:?}"),
    }
    assert_eq!(device.counters().total_bytes, 0);

    let summary = RunSummary::from_reports(vec![report], 0, 0.0);
    assert!(!summary.all_passed());
    assert_eq!(summary.aborted, 1);
}

#[test]
fn test_audit_trail_serializes_every_exchange() {
    let (_device, mut orchestrator) = simulated(HarnessConfig::default());
    orchestrator.run(Scenario::Smoke);

    let audit = orchestrator.session().audit();
    let mut out = Vec::new();
    audit.write_jsonl(&mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert_eq!(text.lines().count(), audit.len());

    let first: serde_json::Value = serde_json::from_str(text.lines().next().unwrap()).unwrap();
    assert!(first.get("direction").is_some());
    assert!(text.contains("<1000 bytes>"));
}

#[test]
fn test_summary_json_shape() {
    let (_device, mut orchestrator) = simulated(HarnessConfig::default());
    let reports = orchestrator.run_selection(Scenario::Smoke);
    let summary = RunSummary::from_reports(reports, 0x5EED, 1.0);

    let json = serde_json::to_value(&summary).unwrap();
    assert_eq!(json["seed"], 0x5EED);
    assert_eq!(json["passed"], 1);
    assert_eq!(json["scenarios"][0]["outcome"]["status"], "passed");
    assert!(json["scenarios"][0]["steps"].as_array().unwrap().len() >= 5);
}
