use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;

use anyhow::{bail, Context, Result};
use clap::Parser;
use ringprobe_core::config::HarnessConfig;
use ringprobe_core::report::{RunSummary, ScenarioTimer};
use ringprobe_core::scenario::{Orchestrator, Scenario};
use ringprobe_core::serial::{SerialData, SerialLine};
use ringprobe_link::{Correlator, DeviceSession, SimulatedLogger};
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "ringprobe")]
#[command(about = "Stress and verification harness for a circular-log data logger")]
#[command(version)]
struct Cli {
    /// smoke, wrap, baud, burst, sustained, spacing, flash, bus, limits or all.
    #[arg(long, default_value = "smoke")]
    scenario: Scenario,

    /// Serial port carrying the command console.
    #[arg(long, required_unless_present = "simulate")]
    control_port: Option<String>,

    /// Serial port feeding the device's capture input.
    #[arg(long, required_unless_present = "simulate")]
    data_port: Option<String>,

    #[arg(long, default_value_t = 115_200)]
    baud: u32,

    /// Also write the log to this file.
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Write every sent and received unit as JSON lines.
    #[arg(long)]
    audit_file: Option<PathBuf>,

    /// JSON harness configuration.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides the sampling seed from the config.
    #[arg(long)]
    seed: Option<u64>,

    /// Run against the in-process simulated logger.
    #[arg(long, default_value_t = false)]
    simulate: bool,
}

fn init_tracing(log_file: Option<&Path>) -> Result<()> {
    let file_layer = match log_file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("cannot create log file {}", path.display()))?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    Ok(())
}

fn open_session(cli: &Cli, config: &HarnessConfig) -> Result<DeviceSession> {
    if cli.simulate {
        info!(device_id = %config.simulator.device_id, "using simulated logger");
        let device = SimulatedLogger::new(config.simulator.clone());
        return Ok(device.session(config.link.clone())?);
    }

    let (Some(control_port), Some(data_port)) = (&cli.control_port, &cli.data_port) else {
        bail!("--control-port and --data-port are required unless --simulate is given");
    };
    let control = SerialLine::open(control_port, cli.baud)?;
    let data = SerialData::open(data_port, cli.baud)?;
    info!(control = %control_port, data = %data_port, baud = cli.baud, "serial ports open");
    Ok(DeviceSession::new(
        Correlator::new(Box::new(control)),
        Box::new(data),
        config.link.clone(),
    ))
}

fn run(cli: &Cli) -> Result<RunSummary> {
    let mut config = match &cli.config {
        Some(path) => HarnessConfig::from_file(path)?,
        None => HarnessConfig::default(),
    };
    if let Some(seed) = cli.seed {
        config.verify.seed = seed;
    }
    let seed = config.verify.seed;

    let session = open_session(cli, &config)?;
    let timer = ScenarioTimer::start();
    let mut orchestrator = Orchestrator::new(session, config);
    let reports = orchestrator.run_selection(cli.scenario);
    let summary = RunSummary::from_reports(reports, seed, timer.elapsed_secs());

    if let Some(path) = &cli.audit_file {
        let file = File::create(path)
            .with_context(|| format!("cannot create audit file {}", path.display()))?;
        orchestrator.session().audit().write_jsonl(BufWriter::new(file))?;
        info!(path = %path.display(), entries = orchestrator.session().audit().len(), "audit log written");
    }

    eprint!("{}", summary.render());
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(summary)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(err) = init_tracing(cli.log_file.as_deref()) {
        eprintln!("ringprobe: {err:#}");
        return ExitCode::from(2);
    }

    match run(&cli) {
        Ok(summary) if summary.all_passed() => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(err) => {
            error!("{err:#}");
            ExitCode::from(2)
        }
    }
}
