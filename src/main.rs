//! cap-ctl - drive CAP through its command directory.
//!
//! Every subcommand that talks to CAP performs exactly one exchange and maps
//! the outcome to the exit status: 0 for success, 1 for any other outcome
//! (error, stopped, closed, timeout), 2 when the exchange could not run.

use anyhow::{Context, Result};
use cap_control::{
    strategy::{stage_strategy, StrategyHeader},
    Axis, CapCommand, CapConfig, Command, Controller, OutcomeCode, ScanParams,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Command-line controller for the CAP diffractometer application
#[derive(Parser, Debug)]
#[command(name = "cap-ctl")]
#[command(version)]
#[command(about = "Send commands to CAP through its watched directory")]
struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "config/cap.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Send raw command text
    Send {
        text: String,
        /// Timeout in seconds (defaults to the configured timeout)
        #[arg(short, long)]
        timeout: Option<u64>,
    },
    /// Connect to the XtalCheck stage
    Connect,
    /// Initialize the XtalCheck stage
    Initialize,
    /// Disconnect from the XtalCheck stage
    Disconnect,
    /// Move the XtalCheck stage along one axis
    Move {
        axis: Axis,
        mm: f64,
        /// Move relative to the current position
        #[arg(short, long)]
        relative: bool,
    },
    /// Capture still images
    Image {
        folder: String,
        base_name: String,
        #[arg(short, long, default_value_t = 1.0)]
        exposure: f64,
        #[arg(short = 'n', long, default_value_t = 1)]
        count: u32,
    },
    /// Run an omega scan
    Scan {
        folder: String,
        base_name: String,
        #[arg(short, long, default_value_t = 5.0)]
        exposure: f64,
        #[arg(short, long, default_value_t = 0.5)]
        width: f64,
        /// Scan range in degrees (5 for a short scan, 90 otherwise)
        #[arg(short, long)]
        range: Option<f64>,
        /// Short screening scan
        #[arg(short, long)]
        short: bool,
    },
    /// Move the goniometer to the given angles
    Gonio {
        omega: f64,
        theta: f64,
        kappa: f64,
        phi: f64,
    },
    /// Merge a sequence of runs
    Merge {
        #[arg(required = true)]
        runs: Vec<String>,
    },
    /// Stage a strategy run file from a template and execute it
    Strategy {
        template: PathBuf,
        parameters: PathBuf,
        /// Directory the run and parameter files are written to
        dest_dir: PathBuf,
        run_name: String,
        base_name: String,
        output_path: String,
        #[arg(short, long)]
        timeout: Option<u64>,
    },
    /// Empty the watched directory
    Clean,
    /// Print the effective configuration
    Config,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match CapConfig::load_from(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::from(2);
        }
    };

    // Initialize tracing with RUST_LOG, falling back to the configured level
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    match run(cli.command, config) {
        Ok(Some(outcome)) => {
            println!("{} ({})", outcome.message(), outcome.code());
            if outcome.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            }
        }
        Ok(None) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:?}");
            ExitCode::from(2)
        }
    }
}

fn run(action: Action, config: CapConfig) -> Result<Option<OutcomeCode>> {
    let command = match action {
        Action::Config => {
            print!("{}", config.to_toml()?);
            return Ok(None);
        }
        Action::Clean => {
            let controller = Controller::new(config)?;
            let report = controller.clean()?;
            println!("Removed {} entries", report.removed.len());
            return Ok(None);
        }
        Action::Send { text, timeout } => {
            let timeout = timeout.unwrap_or(config.default_timeout_secs);
            let mut controller = Controller::new(config)?;
            let outcome = controller.exchange(&Command::new(text, timeout))?;
            return Ok(Some(outcome));
        }
        Action::Connect => CapCommand::Connect,
        Action::Initialize => CapCommand::Initialize,
        Action::Disconnect => CapCommand::Disconnect,
        Action::Move { axis, mm, relative } => {
            if relative {
                CapCommand::RelativeMove { axis, mm }
            } else {
                CapCommand::AbsoluteMove { axis, mm }
            }
        }
        Action::Image {
            folder,
            base_name,
            exposure,
            count,
        } => CapCommand::TakeImage {
            folder,
            base_name,
            exposure_s: exposure,
            count,
        },
        Action::Scan {
            folder,
            base_name,
            exposure,
            width,
            range,
            short,
        } => {
            let defaults = if short {
                ScanParams::short(folder, base_name)
            } else {
                ScanParams::full(folder, base_name)
            };
            let params = ScanParams {
                exposure_s: exposure,
                width,
                range: range.unwrap_or(defaults.range),
                ..defaults
            };
            if short {
                CapCommand::ShortOmegaScan(params)
            } else {
                CapCommand::OmegaScan(params)
            }
        }
        Action::Gonio {
            omega,
            theta,
            kappa,
            phi,
        } => CapCommand::GoniometerMove {
            omega,
            theta,
            kappa,
            phi,
        },
        Action::Merge { runs } => CapCommand::Merge { sequence: runs },
        Action::Strategy {
            template,
            parameters,
            dest_dir,
            run_name,
            base_name,
            output_path,
            timeout,
        } => {
            let header = StrategyHeader::new(base_name, output_path);
            let staged = stage_strategy(&template, &parameters, &dest_dir, &run_name, &header)
                .with_context(|| format!("Failed to stage strategy from {}", template.display()))?;
            CapCommand::Strategy {
                run_file: staged.run_file,
                timeout_secs: timeout,
            }
        }
    };

    let mut controller = Controller::new(config)?;
    let outcome = controller
        .send(&command)
        .with_context(|| format!("Exchange for {:?} failed", command))?;
    Ok(Some(outcome))
}
