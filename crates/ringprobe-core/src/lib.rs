//! Harness orchestration: configuration, scenarios, reporting and the serial
//! adapters used by the `ringprobe` binary.

pub mod config;
pub mod report;
pub mod scenario;
pub mod serial;
