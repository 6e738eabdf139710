//! The five limit-search dimensions and their workloads.

use std::time::Duration;

use ringprobe_model::pattern;
use ringprobe_telemetry::DeviceCounters;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::rig::{RigError, TestRig};
use crate::sweep::{run_sweep, ProbeResult, SweepOutcome};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateSweepConfig {
    /// Ascending line rates.
    pub candidates: Vec<u32>,
    pub payload_bytes: usize,
    /// Rate restored once the sweep ends.
    pub restore_rate: u32,
}

impl Default for RateSweepConfig {
    fn default() -> Self {
        Self {
            candidates: vec![
                115_200, 230_400, 460_800, 576_000, 921_600, 1_000_000, 1_500_000, 2_000_000,
            ],
            payload_bytes: 5_000,
            restore_rate: 115_200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BurstSweepConfig {
    /// Ascending burst sizes in bytes.
    pub candidates: Vec<usize>,
    pub settle_floor_ms: u64,
    /// Settle time grows by one second per this many bytes.
    pub settle_bytes_per_sec: u64,
}

impl Default for BurstSweepConfig {
    fn default() -> Self {
        Self {
            candidates: vec![1_000, 2_000, 4_000, 8_000, 16_000, 24_000, 32_000, 40_000, 48_000],
            settle_floor_ms: 2_000,
            settle_bytes_per_sec: 5_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SustainedConfig {
    /// Stream durations to try, in seconds.
    pub durations_secs: Vec<u64>,
    pub chunk_bytes: usize,
    pub pause_ms: u64,
    pub settle_ms: u64,
}

impl Default for SustainedConfig {
    fn default() -> Self {
        Self {
            durations_secs: vec![10],
            chunk_bytes: 1_000,
            pause_ms: 50,
            settle_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpacingSweepConfig {
    /// Descending gaps between bursts, in milliseconds.
    pub candidates_ms: Vec<u64>,
    pub bursts: usize,
    pub burst_bytes: usize,
    pub settle_ms: u64,
}

impl Default for SpacingSweepConfig {
    fn default() -> Self {
        Self {
            candidates_ms: vec![200, 150, 120, 100, 80, 60, 50, 40, 30, 20],
            bursts: 20,
            burst_bytes: 1_000,
            settle_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlashWriteConfig {
    pub rate: u32,
    /// Bytes to write; the device's capacity when unset.
    pub fill_bytes: Option<usize>,
    pub chunk_bytes: usize,
    pub settle_ms: u64,
    pub restore_rate: u32,
}

impl Default for FlashWriteConfig {
    fn default() -> Self {
        Self {
            rate: 921_600,
            fill_bytes: None,
            chunk_bytes: 8_000,
            settle_ms: 3_000,
            restore_rate: 115_200,
        }
    }
}

fn lossless(sent: u64, counters: &DeviceCounters) -> bool {
    counters.total_bytes == sent && counters.overflow_count == 0
}

fn transfer_detail(sent: u64, counters: &DeviceCounters) -> String {
    format!(
        "sent={sent} received={} overflows={} dropped={}",
        counters.total_bytes, counters.overflow_count, counters.dropped_bytes
    )
}

/// Put the line back to `rate` after a rate-changing sweep. A refused
/// restore is kept on the outcome; only scenario-fatal errors discard it.
fn restore_rate<R: TestRig + ?Sized, T>(
    rig: &mut R,
    outcome: Result<SweepOutcome<T>, RigError>,
    rate: u32,
) -> Result<SweepOutcome<T>, RigError> {
    let restored = rig.set_transfer_rate(rate);
    let mut outcome = outcome?;
    match restored {
        Ok(()) => {}
        Err(err) if !err.is_scenario_fatal() => {
            warn!(dimension = %outcome.dimension, rate, error = %err, "rate not restored");
            outcome.restore_failure = Some(err.to_string());
        }
        Err(err) => return Err(err),
    }
    Ok(outcome)
}

/// Highest line rate that carries a fixed payload without loss. The restore
/// rate is set with the same handshake once the sweep ends.
pub fn sweep_transfer_rate<R: TestRig + ?Sized>(
    rig: &mut R,
    config: &RateSweepConfig,
) -> Result<SweepOutcome<u32>, RigError> {
    let payload = pattern(config.payload_bytes, 0);
    let outcome = run_sweep(rig, "transfer_rate", "baud", config.candidates.clone(), |rig, &rate| {
        rig.set_transfer_rate(rate)?;
        rig.inject(&payload)?;
        let line_secs = payload.len() as f64 / (f64::from(rate) / 10.0);
        rig.hold_idle(Duration::from_secs_f64((line_secs + 0.5).max(1.0)));
        let counters = rig.counters()?;
        let sent = payload.len() as u64;
        Ok(ProbeResult::judged(
            lossless(sent, &counters),
            transfer_detail(sent, &counters),
            counters,
        ))
    });
    restore_rate(rig, outcome, config.restore_rate)
}

/// Largest single burst the device absorbs without overflow.
pub fn sweep_burst_size<R: TestRig + ?Sized>(
    rig: &mut R,
    config: &BurstSweepConfig,
) -> Result<SweepOutcome<usize>, RigError> {
    run_sweep(rig, "burst_size", "bytes", config.candidates.clone(), |rig, &size| {
        rig.inject(&pattern(size, 0))?;
        let proportional = Duration::from_secs_f64(size as f64 / config.settle_bytes_per_sec.max(1) as f64);
        rig.hold_idle(proportional.max(Duration::from_millis(config.settle_floor_ms)));
        let counters = rig.counters()?;
        let sent = size as u64;
        Ok(ProbeResult::judged(
            lossless(sent, &counters),
            transfer_detail(sent, &counters),
            counters,
        ))
    })
}

/// Continuous chunked stream for a fixed time; passes on zero byte loss.
pub fn sweep_sustained<R: TestRig + ?Sized>(
    rig: &mut R,
    config: &SustainedConfig,
) -> Result<SweepOutcome<u64>, RigError> {
    run_sweep(rig, "sustained", "s", config.durations_secs.clone(), |rig, &secs| {
        let duration = Duration::from_secs(secs);
        let pause = Duration::from_millis(config.pause_ms);
        let started = rig.clock();
        let mut sent = 0u64;
        let mut offset = 0u64;

        while rig.clock().saturating_sub(started) < duration {
            rig.inject(&pattern(config.chunk_bytes, offset))?;
            sent += config.chunk_bytes as u64;
            offset += config.chunk_bytes as u64;
            rig.hold_idle(pause);
        }
        let elapsed = rig.clock().saturating_sub(started);
        rig.hold_idle(Duration::from_millis(config.settle_ms));

        let counters = rig.counters()?;
        let lost = sent.saturating_sub(counters.total_bytes);
        let rate = sent as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
        Ok(ProbeResult::judged(
            lost == 0 && counters.total_bytes <= sent,
            format!("sent={sent} received={} lost={lost} rate={rate:.0}B/s", counters.total_bytes),
            counters,
        )
        .with_measurement(rate))
    })
}

/// Tightest gap between equal bursts that stays lossless.
pub fn sweep_spacing<R: TestRig + ?Sized>(
    rig: &mut R,
    config: &SpacingSweepConfig,
) -> Result<SweepOutcome<u64>, RigError> {
    run_sweep(rig, "burst_spacing", "ms", config.candidates_ms.clone(), |rig, &gap_ms| {
        let gap = Duration::from_millis(gap_ms);
        let mut sent = 0u64;
        for i in 0..config.bursts {
            if i > 0 {
                rig.hold_idle(gap);
            }
            rig.inject(&pattern(config.burst_bytes, sent))?;
            sent += config.burst_bytes as u64;
        }
        rig.hold_idle(Duration::from_millis(config.settle_ms));
        let counters = rig.counters()?;
        Ok(ProbeResult::judged(
            lossless(sent, &counters),
            transfer_detail(sent, &counters),
            counters,
        ))
    })
}

/// Fill the log as fast as the line allows and report both the send rate on
/// the line and the effective rate at which the log absorbed the bytes.
/// There is no pass threshold; the probe fails only if the rate change is
/// refused.
pub fn measure_flash_write<R: TestRig + ?Sized>(
    rig: &mut R,
    config: &FlashWriteConfig,
    capacity: usize,
) -> Result<SweepOutcome<u32>, RigError> {
    let fill = config.fill_bytes.unwrap_or(capacity);
    let outcome = run_sweep(rig, "flash_write", "baud", vec![config.rate], |rig, &rate| {
        rig.set_transfer_rate(rate)?;
        let started = rig.clock();
        let mut sent = 0usize;
        while sent < fill {
            let chunk = config.chunk_bytes.max(1).min(fill - sent);
            rig.inject(&pattern(chunk, sent as u64))?;
            sent += chunk;
        }
        let send_time = rig.clock().saturating_sub(started);
        rig.hold_idle(Duration::from_millis(config.settle_ms));
        let elapsed = rig.clock().saturating_sub(started);

        let counters = rig.counters()?;
        let send_rate = sent as f64 / send_time.as_secs_f64().max(f64::EPSILON);
        let effective = counters.total_bytes as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
        info!(
            sent,
            received = counters.total_bytes,
            elapsed_ms = elapsed.as_millis() as u64,
            send_bytes_per_sec = send_rate,
            bytes_per_sec = effective,
            "flash write throughput"
        );
        Ok(ProbeResult::judged(
            true,
            format!(
                "sent={sent} received={} elapsed={:.2}s send={send_rate:.0}B/s rate={effective:.0}B/s",
                counters.total_bytes,
                elapsed.as_secs_f64()
            ),
            counters,
        )
        .with_measurement(effective))
    });
    restore_rate(rig, outcome, config.restore_rate)
}
