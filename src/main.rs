//! CLI Entry Point for ion_daq
//!
//! Provides command-line interface for:
//! - Running a scan against the simulated ion trap
//! - Validating a configuration file
//!
//! # Usage
//!
//! Run a scan and write the report:
//! ```bash
//! ion_daq scan --config config/ion_daq.toml --points 11 --output report.json
//! ```
//!
//! Check a configuration (prints the merged result):
//! ```bash
//! ION_DAQ_RECOVERY__LOSS_CEILING=8 ion_daq check-config
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ion_daq::config::{IonDaqConfig, DEFAULT_CONFIG_PATH};
use ion_daq::control::{ShotController, TriggerGate};
use ion_daq::hardware::mock::{MockPeerLink, PeriodicReference, SimulatedIonTrap};
use ion_daq::logging;
use ion_daq::safety::CancellationFlag;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "ion_daq")]
#[command(about = "Shot-sampling controller for trapped-ion scans", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scan on the simulated trap
    Scan {
        /// Override the number of scan points
        #[arg(long)]
        points: Option<usize>,

        /// Override accepted samples per point
        #[arg(long)]
        samples: Option<u32>,

        /// Override the simulation seed
        #[arg(long)]
        seed: Option<u64>,

        /// Write the JSON report here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Load, validate and print the effective configuration
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = IonDaqConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    match cli.command {
        Commands::Scan {
            points,
            samples,
            seed,
            output,
        } => {
            if let Some(points) = points {
                config.scan.points = points;
            }
            if let Some(samples) = samples {
                config.scan.samples_per_point = samples;
            }
            if let Some(seed) = seed {
                config.simulation.seed = seed;
            }
            config.validate()?;
            logging::init_from_config(&config).map_err(anyhow::Error::msg)?;
            run_scan(config, output).await
        }
        Commands::CheckConfig => {
            config.validate()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

async fn run_scan(config: IonDaqConfig, output: Option<PathBuf>) -> Result<()> {
    info!(
        name = %config.application.name,
        points = config.scan.points,
        samples_per_point = config.scan.samples_per_point,
        seed = config.simulation.seed,
        "Starting simulated scan"
    );

    let trap = SimulatedIonTrap::new(config.simulation.clone());
    let nudge = Arc::new(trap.nudge());
    let recapture = Arc::new(trap.recapture());
    let routines: Vec<_> = config
        .calibration
        .iter()
        .map(|task| trap.calibration(task.name.clone()))
        .collect();

    let mut gate = TriggerGate::new(Arc::new(PeriodicReference::new(
        config.simulation.line_period,
    )));
    if config.trigger.use_peer {
        gate = gate.with_peer(Arc::new(MockPeerLink::reliable()));
    }

    let cancel = CancellationFlag::new();
    let mut controller = ShotController::new(
        trap,
        config.threshold_classifier()?,
        gate,
        nudge,
        recapture,
    )
    .with_sampling(config.sampling())
    .with_policy(ion_daq::control::RecoveryPolicy::new(config.recovery.clone()))
    .with_cancellation(cancel.clone());

    for (task, routine) in config
        .calibration_tasks(Instant::now())
        .into_iter()
        .zip(routines)
    {
        controller.register_calibration_task(task, Box::new(routine));
    }

    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received, cancelling after the current shot");
            ctrl_c.cancel("Ctrl-C");
        }
    });

    let events = controller.subscribe();
    tokio::spawn(logging::log_point_events(events));

    let report = controller.run_scan(&config.scan_points()).await?;
    let json = serde_json::to_string_pretty(&report)?;
    match output {
        Some(path) => {
            tokio::fs::write(&path, json)
                .await
                .with_context(|| format!("writing {}", path.display()))?;
            info!(path = %path.display(), "Report written");
        }
        None => println!("{}", json),
    }

    Ok(())
}
