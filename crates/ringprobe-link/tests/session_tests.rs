use std::time::Duration;

use ringprobe_link::{
    Channel, CommandEnvelope, Direction, LinkConfig, LinkError, Matcher, MessageBus, SimProfile,
    SimulatedLogger,
};

fn ramp(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 256) as u8).collect()
}

fn quick_config() -> LinkConfig {
    LinkConfig {
        ready_timeout_ms: 100,
        bus_timeout_ms: 50,
        ..Default::default()
    }
}

#[test]
fn test_smoke_over_control_channel() {
    let device = SimulatedLogger::new(SimProfile::default());
    let mut session = device.session(quick_config()).unwrap();

    session.wait_ready().unwrap();
    session.format().unwrap();
    session.inject(&ramp(1000)).unwrap();

    let counters = session.stats().unwrap();
    assert_eq!(counters.total_bytes, 1000);
    assert_eq!(counters.used_bytes, 1000);
    assert_eq!(counters.capacity, Some(49_152));

    let bytes = session.read(0, 64).unwrap();
    assert_eq!(bytes, ramp(64));
}

#[test]
fn test_second_wait_ready_times_out() {
    let device = SimulatedLogger::new(SimProfile::default());
    let mut session = device.session(quick_config()).unwrap();
    session.wait_ready().unwrap();

    let err = session.wait_ready().unwrap_err();
    assert!(matches!(err, LinkError::Timeout { .. }));
    assert!(err.is_scenario_fatal());
}

#[test]
fn test_stats_over_bus() {
    let device = SimulatedLogger::new(SimProfile::default());
    let mut session = device.session(quick_config()).unwrap();
    session.wait_ready().unwrap();
    session.use_channel(Channel::Bus).unwrap();

    session.format().unwrap();
    session.inject(&ramp(300)).unwrap();
    let counters = session.stats().unwrap();
    assert_eq!(counters.total_bytes, 300);
    assert!(session.correlator().outstanding().is_empty());

    let sent = session.audit().last_sent("bus").unwrap();
    assert!(sent.contains("\"id\":\"rp-2\""));
}

#[test]
fn test_interleaved_telemetry_is_discarded() {
    let device = SimulatedLogger::new(SimProfile {
        bus_noise: true,
        ..Default::default()
    });
    let mut session = device.session(quick_config()).unwrap();
    session.use_channel(Channel::Bus).unwrap();

    session.stats().unwrap();
    let discarded = session
        .audit()
        .entries()
        .iter()
        .filter(|e| e.direction == Direction::Discarded)
        .count();
    assert_eq!(discarded, 1);
}

#[test]
fn test_stale_and_foreign_replies_are_discarded() {
    let device = SimulatedLogger::new(SimProfile::default());
    let mut session = device.session(quick_config()).unwrap();
    session.use_channel(Channel::Bus).unwrap();

    let mut side = device.bus();
    side.publish(
        "datalogger/telemetry/response",
        br#"{"type":"command_response","command":"stats","status":"ok","message":"total=999","id":"rp-77"}"#,
    )
    .unwrap();
    side.publish(
        "datalogger/telemetry/response",
        br#"{"type":"command_response","command":"stats","status":"ok","message":"total=555","deviceId":"other"}"#,
    )
    .unwrap();

    let counters = session.stats().unwrap();
    assert_eq!(counters.total_bytes, 0);
    let discarded = session
        .audit()
        .entries()
        .iter()
        .filter(|e| e.direction == Direction::Discarded)
        .count();
    assert_eq!(discarded, 2);
}

#[test]
fn test_idless_reply_matches_only_newest_request() {
    let device = SimulatedLogger::new(SimProfile {
        echo_correlation_id: false,
        ..Default::default()
    });
    let config = quick_config();
    let mut session = device.session(config.clone()).unwrap();
    let correlator = session.correlator_mut();

    let first = correlator
        .send(Channel::Bus, &CommandEnvelope::new("datalogger", "stats"))
        .unwrap();
    let second = correlator
        .send(Channel::Bus, &CommandEnvelope::new("datalogger", "stats"))
        .unwrap();

    // Both replies lack an id, so neither may be claimed by the older request.
    let err = correlator
        .await_response(
            Channel::Bus,
            &Matcher::Reply(first.request),
            Duration::from_millis(50),
        )
        .unwrap_err();
    assert!(matches!(err, LinkError::Timeout { .. }));
    assert_eq!(correlator.outstanding(), &[second.request]);
}

#[test]
fn test_idless_reply_accepted_for_sole_request() {
    let device = SimulatedLogger::new(SimProfile {
        echo_correlation_id: false,
        ..Default::default()
    });
    let mut session = device.session(quick_config()).unwrap();
    session.use_channel(Channel::Bus).unwrap();
    assert!(session.stats().is_ok());
}

#[test]
fn test_bus_error_status_is_rejected() {
    let device = SimulatedLogger::new(SimProfile::default());
    let mut session = device.session(quick_config()).unwrap();
    session.use_channel(Channel::Bus).unwrap();

    let err = session
        .execute("selfdestruct", "", Matcher::AnyLine, Duration::from_millis(50))
        .unwrap_err();
    assert!(matches!(err, LinkError::Rejected { .. }));
    assert!(!err.is_scenario_fatal());
}

#[test]
fn test_baud_change_reopens_data_channel() {
    let device = SimulatedLogger::new(SimProfile::default());
    let mut session = device.session(quick_config()).unwrap();
    session.wait_ready().unwrap();

    session.set_baud(460_800).unwrap();
    assert_eq!(session.data_baud(), 460_800);
    assert_eq!(device.device_baud(), 460_800);

    session.format().unwrap();
    session.inject(&ramp(5000)).unwrap();
    assert_eq!(session.stats().unwrap().total_bytes, 5000);
}

#[test]
fn test_refused_baud_keeps_data_channel() {
    let device = SimulatedLogger::new(SimProfile::default());
    let mut session = device.session(quick_config()).unwrap();
    session.wait_ready().unwrap();

    let err = session.set_baud(2_000_000).unwrap_err();
    assert!(matches!(
        err,
        LinkError::UnacknowledgedReconfiguration { rate: 2_000_000, .. }
    ));
    assert_eq!(session.data_baud(), 115_200);
}

#[test]
fn test_audit_log_covers_all_channels() {
    let device = SimulatedLogger::new(SimProfile::default());
    let mut session = device.session(quick_config()).unwrap();
    session.wait_ready().unwrap();
    session.inject(&[1, 2, 3]).unwrap();
    session.stats().unwrap();

    let audit = session.audit();
    assert_eq!(audit.last_sent("data"), Some("<3 bytes>"));
    assert_eq!(audit.last_sent("control"), Some("stats"));

    let mut out = Vec::new();
    audit.write_jsonl(&mut out).unwrap();
    assert_eq!(String::from_utf8(out).unwrap().lines().count(), audit.len());
}
