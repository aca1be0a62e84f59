//! Deviation Flux CLI
//!
//! Commands:
//! - update: Advance a user's local tracker by one observation
//! - fuse: Fuse a global label and a local deviation
//! - run: Process a daily entry through both layers and fusion
//! - doctor: Diagnose configuration, model and stored state

use clap::{Parser, Subcommand};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use chrono::NaiveDate;
use tracing::Level;

use deviation_flux::config::DEFAULT_CONFIG_FILE;
use deviation_flux::store::StateStore;
use deviation_flux::{
    days_since_account_creation, fuse, DailyEntry, DailyObservation, DeviationError,
    DeviationLabel, DeviationProcessor, EngineConfig, FeatureDeriver, FileStateStore, FusionInput,
    LinearEstimator, LocalBaselineTracker, UserProfile, FLUX_VERSION, PRODUCER_NAME,
};

/// Devflux - Per-user deviation tracking and global/local fusion
#[derive(Parser)]
#[command(name = "devflux")]
#[command(version = FLUX_VERSION)]
#[command(about = "Track behavioral baselines and fuse deviation signals", long_about = None)]
struct Cli {
    /// Config file (defaults to ./devflux.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the state directory from the config
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Advance a user's local tracker by one observation
    Update {
        /// User identifier
        #[arg(short, long)]
        user: String,

        /// Observation JSON file (use - for stdin)
        #[arg(short, long)]
        observation: PathBuf,
    },

    /// Fuse a global label with a local cumulative deviation
    Fuse {
        /// Days since account creation
        #[arg(long)]
        days: u32,

        /// Discretized global deviation (-1, 0 or 1)
        #[arg(long, allow_hyphen_values = true)]
        global: i8,

        /// Local cumulative deviation
        #[arg(long, allow_hyphen_values = true, default_value = "0.0")]
        local: f64,

        /// Local signal is ready (baseline established)
        #[arg(long)]
        ready: bool,
    },

    /// Process a daily entry through both layers and fusion
    Run {
        /// Daily entry JSON file (use - for stdin)
        #[arg(short, long)]
        entry: PathBuf,

        /// User profile JSON file
        #[arg(short, long)]
        profile: PathBuf,

        /// Days since account creation
        #[arg(long, conflicts_with = "account_created")]
        days: Option<u32>,

        /// Account creation date (YYYY-MM-DD); age is measured to the entry date
        #[arg(long)]
        account_created: Option<NaiveDate>,

        /// Override the global model weights file from the config
        #[arg(long)]
        model: Option<PathBuf>,
    },

    /// Diagnose configuration, model and stored state
    Doctor {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8, json: bool) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let builder = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn run(cli: Cli) -> Result<(), DevfluxCliError> {
    let mut config = EngineConfig::discover(cli.config.as_deref())?;
    if let Some(dir) = cli.state_dir {
        config.state_dir = dir;
    }

    match cli.command {
        Commands::Update { user, observation } => cmd_update(&config, &user, &observation),
        Commands::Fuse {
            days,
            global,
            local,
            ready,
        } => cmd_fuse(days, global, local, ready),
        Commands::Run {
            entry,
            profile,
            days,
            account_created,
            model,
        } => cmd_run(
            &config,
            &entry,
            &profile,
            days,
            account_created,
            model.as_deref(),
        ),
        Commands::Doctor { json } => cmd_doctor(&config, cli.config.as_deref(), json),
    }
}

fn cmd_update(config: &EngineConfig, user: &str, observation: &Path) -> Result<(), DevfluxCliError> {
    let observation: DailyObservation = serde_json::from_str(&read_input(observation)?)?;

    let tracker = LocalBaselineTracker::new(config.tracker);
    let mut store = FileStateStore::with_tracker(&config.state_dir, tracker.clone())?;

    let state = store.load(user)?;
    let (next, result) = tracker.update(&state, observation)?;
    store.save(user, &next)?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn cmd_fuse(days: u32, global: i8, local: f64, ready: bool) -> Result<(), DevfluxCliError> {
    let label = DeviationLabel::try_from(global).map_err(DevfluxCliError::InvalidArgument)?;

    let output = fuse(&FusionInput {
        global_deviation: label.into(),
        local_cumulative_deviation: local,
        local_signal_ready: ready,
        days_since_account_creation: days,
    });

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn cmd_run(
    config: &EngineConfig,
    entry: &Path,
    profile: &Path,
    days: Option<u32>,
    account_created: Option<NaiveDate>,
    model: Option<&Path>,
) -> Result<(), DevfluxCliError> {
    let entry: DailyEntry = serde_json::from_str(&read_input(entry)?)?;
    let profile: UserProfile = serde_json::from_str(&fs::read_to_string(profile)?)?;

    let days = match (days, account_created) {
        (Some(days), _) => days,
        (None, Some(created)) => days_since_account_creation(created, entry.behavioral_date)?,
        (None, None) => return Err(DevfluxCliError::MissingAccountAge),
    };

    let model_path = model
        .map(Path::to_path_buf)
        .or_else(|| config.model_path.clone())
        .ok_or(DevfluxCliError::NoModel)?;
    let estimator = LinearEstimator::from_path(&model_path)?;

    let tracker = LocalBaselineTracker::new(config.tracker);
    let store = FileStateStore::with_tracker(&config.state_dir, tracker.clone())?;

    let mut processor = DeviationProcessor::new(store, estimator)
        .with_tracker(tracker)
        .with_deriver(FeatureDeriver::new(config.missing_fields));

    let report = processor.process_day(&entry, &profile, days)?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn cmd_doctor(
    config: &EngineConfig,
    config_path: Option<&Path>,
    json: bool,
) -> Result<(), DevfluxCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "flux_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Deviation Flux version {}", FLUX_VERSION),
    });

    let source = match config_path {
        Some(path) => path.display().to_string(),
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => DEFAULT_CONFIG_FILE.to_string(),
        None => "built-in defaults".to_string(),
    };
    checks.push(DoctorCheck {
        name: "config".to_string(),
        status: CheckStatus::Ok,
        message: format!(
            "Loaded from {} (baseline window {} days)",
            source, config.tracker.min_baseline_days
        ),
    });

    match &config.model_path {
        Some(path) => match LinearEstimator::from_path(path) {
            Ok(_) => checks.push(DoctorCheck {
                name: "global_model".to_string(),
                status: CheckStatus::Ok,
                message: format!("Model weights valid ({})", path.display()),
            }),
            Err(e) => checks.push(DoctorCheck {
                name: "global_model".to_string(),
                status: CheckStatus::Error,
                message: e.to_string(),
            }),
        },
        None => checks.push(DoctorCheck {
            name: "global_model".to_string(),
            status: CheckStatus::Warning,
            message: "No model_path configured; `run` requires --model".to_string(),
        }),
    }

    if config.state_dir.exists() {
        let tracker = LocalBaselineTracker::new(config.tracker);
        match FileStateStore::with_tracker(&config.state_dir, tracker) {
            Ok(store) => match store.users() {
                Ok(users) => {
                    let mut invalid = 0;
                    for user in &users {
                        if let Err(e) = store.load(user) {
                            invalid += 1;
                            checks.push(DoctorCheck {
                                name: format!("state:{user}"),
                                status: CheckStatus::Error,
                                message: e.to_string(),
                            });
                        }
                    }
                    checks.push(DoctorCheck {
                        name: "state_dir".to_string(),
                        status: if invalid == 0 {
                            CheckStatus::Ok
                        } else {
                            CheckStatus::Error
                        },
                        message: format!(
                            "{} user states, {} invalid ({})",
                            users.len(),
                            invalid,
                            config.state_dir.display()
                        ),
                    });
                }
                Err(e) => checks.push(DoctorCheck {
                    name: "state_dir".to_string(),
                    status: CheckStatus::Error,
                    message: e.to_string(),
                }),
            },
            Err(e) => checks.push(DoctorCheck {
                name: "state_dir".to_string(),
                status: CheckStatus::Error,
                message: e.to_string(),
            }),
        }
    } else {
        checks.push(DoctorCheck {
            name: "state_dir".to_string(),
            status: CheckStatus::Warning,
            message: format!(
                "State directory {} does not exist yet",
                config.state_dir.display()
            ),
        });
    }

    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (pass input files explicitly)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (`-` inputs ready)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: FLUX_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Devflux Doctor Report");
        println!("=====================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report
        .checks
        .iter()
        .any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(DevfluxCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

// Helper functions

fn read_input(path: &Path) -> Result<String, DevfluxCliError> {
    if path.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(path)?)
    }
}

// Error types

#[derive(Debug)]
enum DevfluxCliError {
    Io(io::Error),
    Flux(DeviationError),
    Json(serde_json::Error),
    InvalidArgument(String),
    MissingAccountAge,
    NoModel,
    DoctorFailed,
}

impl From<io::Error> for DevfluxCliError {
    fn from(e: io::Error) -> Self {
        DevfluxCliError::Io(e)
    }
}

impl From<DeviationError> for DevfluxCliError {
    fn from(e: DeviationError) -> Self {
        DevfluxCliError::Flux(e)
    }
}

impl From<serde_json::Error> for DevfluxCliError {
    fn from(e: serde_json::Error) -> Self {
        DevfluxCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<DevfluxCliError> for CliError {
    fn from(e: DevfluxCliError) -> Self {
        match e {
            DevfluxCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            DevfluxCliError::Flux(e) => {
                let (code, hint) = match &e {
                    DeviationError::MissingPrecondition { .. } => (
                        "MISSING_PRECONDITION",
                        "Supply the field or set missing_fields = \"apply_defaults\"",
                    ),
                    DeviationError::NonFiniteFeature { .. } => {
                        ("NON_FINITE_FEATURE", "Feature values must be finite numbers")
                    }
                    DeviationError::InvalidState { .. } => (
                        "INVALID_STATE",
                        "Stored state failed validation; run 'devflux doctor'",
                    ),
                    DeviationError::InvalidUserId(_) => (
                        "INVALID_USER_ID",
                        "User ids may contain only letters, digits, '-' and '_'",
                    ),
                    DeviationError::Config(_) => ("CONFIG_ERROR", "Check devflux.toml"),
                    DeviationError::Model(_) => {
                        ("MODEL_ERROR", "Check the global model weights file")
                    }
                    DeviationError::AccountAge(_) => {
                        ("ACCOUNT_AGE_ERROR", "Check --account-created")
                    }
                    DeviationError::Io { .. } => ("IO_ERROR", "Check file paths and permissions"),
                    DeviationError::JsonError(_) => ("JSON_ERROR", "Check JSON syntax"),
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            DevfluxCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            DevfluxCliError::InvalidArgument(msg) => CliError {
                code: "INVALID_ARGUMENT".to_string(),
                message: msg,
                hint: None,
            },
            DevfluxCliError::MissingAccountAge => CliError {
                code: "MISSING_ACCOUNT_AGE".to_string(),
                message: "Account age is required".to_string(),
                hint: Some("Pass --days or --account-created".to_string()),
            },
            DevfluxCliError::NoModel => CliError {
                code: "NO_MODEL".to_string(),
                message: "No global model configured".to_string(),
                hint: Some("Set model_path in devflux.toml or pass --model".to_string()),
            },
            DevfluxCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
