//! Harness configuration.
//!
//! Every section has a `Default`, and missing fields in a JSON file fall back
//! to it, so a config file only needs to name what it changes.

use std::path::Path;

use ringprobe_explore::{
    BurstSweepConfig, FlashWriteConfig, RateSweepConfig, SpacingSweepConfig, SustainedConfig,
};
use ringprobe_link::{LinkConfig, SimProfile};
use serde::{Deserialize, Serialize};

/// Longest `read` the device serves.
pub const DEVICE_READ_CAP: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("malformed config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub link: LinkConfig,
    pub shadow: ShadowConfig,
    pub verify: VerifyConfig,
    pub smoke: SmokeConfig,
    pub wrap: WrapConfig,
    pub sweeps: SweepConfig,
    /// Device model used with `--simulate`.
    pub simulator: SimProfile,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowConfig {
    /// Log capacity assumed until the device reports its own.
    pub capacity: usize,
    /// Replace `capacity` with the value the device reports in `stats`.
    pub adopt_device_capacity: bool,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            capacity: 48 * 1024,
            adopt_device_capacity: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    pub sample_length: usize,
    /// Random samples taken per verification step.
    pub samples_per_check: usize,
    pub seed: u64,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            sample_length: 64,
            samples_per_check: 1,
            seed: 0x5EED,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmokeConfig {
    pub inject_bytes: usize,
    pub settle_ms: u64,
}

impl Default for SmokeConfig {
    fn default() -> Self {
        Self {
            inject_bytes: 1_000,
            settle_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WrapConfig {
    pub initial_bytes: usize,
    pub chunk_bytes: usize,
    /// Chunks injected after the first observed wrap.
    pub post_wrap_iterations: usize,
    pub settle_ms: u64,
}

impl Default for WrapConfig {
    fn default() -> Self {
        Self {
            initial_bytes: 1_000,
            chunk_bytes: 4_000,
            post_wrap_iterations: 3,
            settle_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub rate: RateSweepConfig,
    pub burst: BurstSweepConfig,
    pub sustained: SustainedConfig,
    pub spacing: SpacingSweepConfig,
    pub flash: FlashWriteConfig,
}

impl HarnessConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: HarnessConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Reject settings no run could satisfy.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &'static str, reason: &str| {
            Err(ConfigError::Invalid {
                field,
                reason: reason.to_string(),
            })
        };

        if self.link.device_id.is_empty() {
            return invalid("link.device_id", "must not be empty");
        }
        if self.shadow.capacity == 0 {
            return invalid("shadow.capacity", "must be positive");
        }
        let length = self.verify.sample_length;
        if length == 0 || length > DEVICE_READ_CAP {
            return invalid(
                "verify.sample_length",
                &format!("must be within 1..={DEVICE_READ_CAP}"),
            );
        }
        if length > self.shadow.capacity {
            return invalid("verify.sample_length", "exceeds log capacity");
        }
        if self.verify.samples_per_check == 0 {
            return invalid("verify.samples_per_check", "must be positive");
        }
        if self.smoke.inject_bytes < length {
            return invalid("smoke.inject_bytes", "must cover one sample");
        }
        if self.wrap.chunk_bytes == 0 {
            return invalid("wrap.chunk_bytes", "must be positive");
        }

        let sweeps = &self.sweeps;
        if sweeps.rate.candidates.is_empty() {
            return invalid("sweeps.rate.candidates", "must not be empty");
        }
        if sweeps.rate.candidates.contains(&0) || sweeps.rate.restore_rate == 0 {
            return invalid("sweeps.rate", "rates must be positive");
        }
        if sweeps.burst.candidates.is_empty() {
            return invalid("sweeps.burst.candidates", "must not be empty");
        }
        if sweeps.sustained.durations_secs.is_empty() || sweeps.sustained.chunk_bytes == 0 {
            return invalid("sweeps.sustained", "needs a duration and a positive chunk size");
        }
        if sweeps.spacing.candidates_ms.is_empty() || sweeps.spacing.bursts == 0 {
            return invalid("sweeps.spacing", "needs candidates and at least one burst");
        }
        if sweeps.flash.rate == 0 || sweeps.flash.chunk_bytes == 0 {
            return invalid("sweeps.flash", "rate and chunk size must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        HarnessConfig::default().validate().unwrap();
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = HarnessConfig::from_json(r#"{ "verify": { "seed": 7 }, "wrap": { "chunk_bytes": 2000 } }"#)
            .unwrap();
        assert_eq!(config.verify.seed, 7);
        assert_eq!(config.verify.sample_length, 64);
        assert_eq!(config.wrap.chunk_bytes, 2000);
        assert_eq!(config.link.commands_topic, "datalogger/commands");
        assert_eq!(config.sweeps.burst.candidates.len(), 9);
    }

    #[test]
    fn test_sample_length_above_read_cap() {
        let err = HarnessConfig::from_json(r#"{ "verify": { "sample_length": 512 } }"#).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "verify.sample_length",
                ..
            }
        ));
    }

    #[test]
    fn test_empty_candidates_rejected() {
        let mut config = HarnessConfig::default();
        config.sweeps.burst.candidates.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_json_is_error() {
        assert!(matches!(
            HarnessConfig::from_json("[1, 2]"),
            Err(ConfigError::Parse(_))
        ));
    }
}
