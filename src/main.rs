//! CLI entry point for the stage plugin
//!
//! A bench tool for exercising a stage without the host application:
//! - `describe` prints a variant's option dialog and capability mask
//! - `move` initializes a session, issues moves and reports the simulated result
//! - `settings` prints the effective settings after file and environment merging
//!
//! # Usage
//!
//! ```bash
//! omxyz describe --variant tomography
//! omxyz move --variant universal --dry-run --position 1.0,0.5,0 \
//!     --option 5 --option 9600 --option 8N1 --option 0.00254 --option 0.00254 \
//!     --option missing --option missing --option missing --option missing
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use omxyz_stage::axis::AxisId;
use omxyz_stage::logging;
use omxyz_stage::profile::Variant;
use omxyz_stage::session::PluginSession;
use omxyz_stage::settings::PluginSettings;
use omxyz_stage::status::AxisFlags;
use serde::Serialize;
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "omxyz")]
#[command(about = "Simulated-feedback stepper stage bench tool", long_about = None)]
struct Cli {
    /// Settings file (defaults to config/omxyz.toml)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the option dialog and capabilities of a variant
    Describe {
        /// Stage variant
        #[arg(long, value_enum, default_value = "universal")]
        variant: Variant,
    },

    /// Initialize a stage, move it and print the simulated outcome as JSON
    Move {
        /// Stage variant
        #[arg(long, value_enum, default_value = "universal")]
        variant: Variant,

        /// Option values in dialog order (defaults when omitted)
        #[arg(long = "option")]
        options: Vec<String>,

        /// Do not open serial ports
        #[arg(long)]
        dry_run: bool,

        /// Origin to set before moving, as x,y,z
        #[arg(long, value_parser = parse_triple)]
        origin: Option<[f64; 3]>,

        /// Linear target as x,y,z
        #[arg(long, value_parser = parse_triple)]
        position: Option<[f64; 3]>,

        /// Angular target as r1,r2,r3
        #[arg(long, value_parser = parse_triple)]
        angle: Option<[f64; 3]>,

        /// Give up polling after this many seconds
        #[arg(long, default_value_t = 10)]
        timeout_secs: u64,
    },

    /// Print the effective settings as TOML
    Settings,
}

#[derive(Serialize)]
struct OptionRow<'a> {
    header: &'a str,
    default: &'a str,
}

#[derive(Serialize)]
struct Description<'a> {
    variant: &'a str,
    name: &'a str,
    description: &'a str,
    version: String,
    capabilities: u32,
    options: Vec<OptionRow<'a>>,
}

#[derive(Serialize)]
struct MoveReport {
    position: [f64; 3],
    angle: [f64; 3],
    status: String,
    polls: u32,
    fault: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.settings {
        Some(path) => PluginSettings::load_from(path),
        None => PluginSettings::load(),
    }
    .context("Failed to load settings")?;
    settings.validate()?;
    logging::init_from_settings(&settings)?;

    match cli.command {
        Commands::Describe { variant } => describe(variant),
        Commands::Settings => {
            print!("{}", settings.to_toml()?);
            Ok(())
        }
        Commands::Move {
            variant,
            options,
            dry_run,
            origin,
            position,
            angle,
            timeout_secs,
        } => {
            let mut settings = settings;
            settings.dry_run |= dry_run;
            let request = MoveRequest {
                options,
                origin,
                position,
                angle,
                timeout: Duration::from_secs(timeout_secs),
            };
            run_move(variant, settings, request)
        }
    }
}

fn describe(variant: Variant) -> Result<()> {
    let profile = variant.profile();
    let (major, minor, build) = profile.version();
    let description = Description {
        variant: variant.id(),
        name: profile.name(),
        description: profile.description(),
        version: format!("{}.{}.{}", major, minor, build),
        capabilities: profile.capabilities(None).bits(),
        options: profile
            .option_headers()
            .iter()
            .zip(profile.option_defaults())
            .map(|(header, default)| OptionRow {
                header: *header,
                default: *default,
            })
            .collect(),
    };
    println!("{}", serde_json::to_string_pretty(&description)?);
    Ok(())
}

struct MoveRequest {
    options: Vec<String>,
    origin: Option<[f64; 3]>,
    position: Option<[f64; 3]>,
    angle: Option<[f64; 3]>,
    timeout: Duration,
}

fn run_move(variant: Variant, settings: PluginSettings, request: MoveRequest) -> Result<()> {
    let mut session = PluginSession::new(variant, settings);
    let options = if request.options.is_empty() {
        session
            .profile()
            .option_defaults()
            .iter()
            .map(|s| s.to_string())
            .collect()
    } else {
        request.options
    };
    if !session.initialize(&options) {
        bail!("Stage initialization failed (see log for details)");
    }

    session.power_on(true);
    if let Some(origin) = request.origin {
        session.set_current_position(origin);
    }
    if let Some(position) = request.position {
        session.move_to_position(position);
    }
    if let Some(angle) = request.angle {
        session.move_to_angle(angle);
    }

    // same polling pattern as the host: position first, then status
    let deadline = Instant::now() + request.timeout;
    let mut polls = 0;
    let (position, angle) = loop {
        polls += 1;
        let position = session.get_position();
        let angle = session.get_angle();
        let status = session.stage_status();
        let moving = AxisId::ALL
            .iter()
            .any(|id| status.axis(*id).contains(AxisFlags::MOVING));
        if !moving {
            break (position, angle);
        }
        if Instant::now() >= deadline {
            bail!("Stage still moving after {:?}", request.timeout);
        }
        std::thread::sleep(Duration::from_millis(50));
    };

    let report = MoveReport {
        position,
        angle,
        status: format!("{:#018x}", session.stage_status().bits()),
        polls,
        fault: session.last_fault_text(),
    };
    session.shutdown();

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn parse_triple(s: &str) -> Result<[f64; 3], String> {
    let values: Vec<f64> = s
        .split(',')
        .map(|part| part.trim().parse::<f64>().map_err(|e| format!("'{}': {}", part, e)))
        .collect::<Result<_, _>>()?;
    values
        .try_into()
        .map_err(|v: Vec<f64>| format!("expected 3 comma-separated values, got {}", v.len()))
}
