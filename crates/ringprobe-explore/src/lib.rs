pub mod probes;
pub mod rig;
pub mod rng;
pub mod sweep;
pub mod verify;

pub use probes::{
    measure_flash_write, sweep_burst_size, sweep_spacing, sweep_sustained, sweep_transfer_rate,
    BurstSweepConfig, FlashWriteConfig, RateSweepConfig, SpacingSweepConfig, SustainedConfig,
};
pub use rig::{RigCall, RigError, ScriptedRig, TestRig};
pub use rng::sample_rng;
pub use sweep::{run_sweep, LimitSweep, ProbeResult, SweepOutcome, SweepSummary, Trial};
pub use verify::{SampleCheck, SampleVerifier, VerifyError};
