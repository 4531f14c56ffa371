//! Adherence CLI - Command-line interface for the adherence engine
//!
//! Commands:
//! - evaluate: Run the pipeline over usage events and prescription targets
//! - validate: Check usage events for malformed intervals
//! - doctor: Diagnose configuration and environment
//! - config: Print the default configuration as TOML

use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use ortho_adherence::{
    logging, AdherenceEngine, AdherenceError, CohortEvaluation, DateRange, EngineConfig,
    InMemoryEventStore, PrescriptionTarget, RecordParser, SubjectFailure, UsageEvent,
    ENGINE_VERSION, PRODUCER_NAME,
};

/// Adherence - wear-time analytics for orthotic devices
#[derive(Parser)]
#[command(name = "adherence")]
#[command(author = "Orthotracker Team")]
#[command(version = ENGINE_VERSION)]
#[command(about = "Compute compliance, trends and alerts from device wear events", long_about = None)]
struct Cli {
    /// Default log level (overridden by RUST_LOG)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate every patient/device pair found in the input
    Evaluate {
        /// Usage events file (use - for stdin)
        #[arg(short, long)]
        events: PathBuf,

        /// Prescription targets file
        #[arg(short, long)]
        targets: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Input format of both files
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,

        /// Default device timezone (IANA format, e.g., "Europe/Berlin")
        #[arg(long, default_value = "UTC")]
        timezone: String,

        /// Per-device timezone as DEVICE_ID=ZONE (repeatable)
        #[arg(long = "device-timezone", value_parser = parse_device_timezone)]
        device_timezones: Vec<(String, String)>,

        /// Engine configuration file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,

        /// First day to cover even without events (YYYY-MM-DD)
        #[arg(long, requires = "to")]
        from: Option<NaiveDate>,

        /// Last day to cover even without events (YYYY-MM-DD)
        #[arg(long, requires = "from")]
        to: Option<NaiveDate>,

        /// Evaluation time stamped on alerts (RFC 3339, defaults to now)
        #[arg(long)]
        evaluated_at: Option<DateTime<Utc>>,

        /// Write one cohort document (reports, failures, summary) instead of bare reports
        #[arg(long)]
        summary: bool,
    },

    /// Validate usage events
    Validate {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        events: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Diagnose configuration and environment
    Doctor {
        /// Check a configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the default configuration as TOML
    Config,
}

#[derive(Clone, ValueEnum)]
enum InputFormat {
    /// Newline-delimited JSON (one record per line)
    Ndjson,
    /// JSON array of records
    Json,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one report per line)
    Ndjson,
    /// JSON array of reports
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init_with_level(&cli.log_level);

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

fn run(cli: Cli) -> Result<(), AdherenceCliError> {
    match cli.command {
        Commands::Evaluate {
            events,
            targets,
            output,
            input_format,
            output_format,
            timezone,
            device_timezones,
            config,
            from,
            to,
            evaluated_at,
            summary,
        } => {
            let period = match (from, to) {
                (Some(from), Some(to)) => Some(DateRange::new(from, to)),
                _ => None,
            };
            cmd_evaluate(
                &events,
                &targets,
                &output,
                input_format,
                output_format,
                &timezone,
                device_timezones,
                config.as_deref(),
                period,
                evaluated_at.unwrap_or_else(Utc::now),
                summary,
            )
        }

        Commands::Validate {
            events,
            input_format,
            json,
        } => cmd_validate(&events, input_format, json),

        Commands::Doctor { config, json } => cmd_doctor(config.as_deref(), json),

        Commands::Config => {
            print!("{}", EngineConfig::default().to_toml_string()?);
            Ok(())
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn cmd_evaluate(
    events_path: &Path,
    targets_path: &Path,
    output: &Path,
    input_format: InputFormat,
    output_format: OutputFormat,
    timezone: &str,
    device_timezones: Vec<(String, String)>,
    config_path: Option<&Path>,
    period: Option<DateRange>,
    evaluated_at: DateTime<Utc>,
    summary: bool,
) -> Result<(), AdherenceCliError> {
    if is_std_stream(events_path) && is_std_stream(targets_path) {
        return Err(AdherenceCliError::Usage(
            "--events and --targets cannot both read from stdin".to_string(),
        ));
    }

    let config = match config_path {
        Some(path) => EngineConfig::load_from(path)?,
        None => EngineConfig::default(),
    };
    let engine = AdherenceEngine::new(config)?;

    let events = read_events(events_path, &input_format)?;
    let targets = read_targets(targets_path, &input_format)?;
    if events.is_empty() && targets.is_empty() {
        return Err(AdherenceCliError::NoRecords);
    }

    let store = device_timezones.into_iter().fold(
        InMemoryEventStore::new(events, targets, timezone),
        |store, (device, zone)| store.with_device_timezone(device, zone),
    );

    let cohort = engine.evaluate_store(&store, period, evaluated_at)?;
    let output_data = format_output(&cohort, &output_format, summary)?;

    if is_std_stream(output) {
        print!("{}", output_data);
    } else {
        fs::write(output, output_data)?;
    }

    if cohort.is_complete() {
        Ok(())
    } else {
        Err(AdherenceCliError::SubjectsFailed(cohort.failures))
    }
}

fn cmd_validate(
    events_path: &Path,
    input_format: InputFormat,
    json: bool,
) -> Result<(), AdherenceCliError> {
    let events = read_events(events_path, &input_format)?;
    let results = RecordParser::validate_events(&events);

    let report = ValidationReport {
        total_events: events.len(),
        valid_events: events.len() - results.len(),
        invalid_events: results.len(),
        errors: results
            .iter()
            .map(|r| ValidationErrorDetail {
                index: r.index,
                event_id: r.event_id.clone(),
                error: r.error.to_string(),
            })
            .collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Total events:   {}", report.total_events);
        println!("Valid events:   {}", report.valid_events);
        println!("Invalid events: {}", report.invalid_events);

        if !report.errors.is_empty() {
            println!("\nErrors:");
            for err in &report.errors {
                println!(
                    "  - Event {} (index {}): {}",
                    err.event_id.as_deref().unwrap_or("unknown"),
                    err.index,
                    err.error
                );
            }
        }
    }

    if report.invalid_events > 0 {
        Err(AdherenceCliError::ValidationFailed(report.invalid_events))
    } else {
        Ok(())
    }
}

fn cmd_doctor(config_path: Option<&Path>, json: bool) -> Result<(), AdherenceCliError> {
    let mut checks: Vec<DoctorCheck> = vec![DoctorCheck {
        name: "engine_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Engine version {}", ENGINE_VERSION),
    }];

    if let Some(path) = config_path {
        let check = if !path.exists() {
            DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Warning,
                message: "Config file does not exist, defaults will be used".to_string(),
            }
        } else {
            match EngineConfig::load_from(path) {
                Ok(config) => DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Ok,
                    message: format!(
                        "Config valid ({}-day window, alerts below {} / {})",
                        config.compliance.window_days,
                        config.alerts.critical_below,
                        config.alerts.notice_below
                    ),
                },
                Err(e) => DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Error,
                    message: e.to_string(),
                },
            }
        };
        checks.push(check);
    }

    let stdin_message = if atty::is(atty::Stream::Stdin) {
        "stdin is a TTY (interactive mode)"
    } else {
        "stdin is a pipe (events can be streamed with --events -)"
    };
    checks.push(DoctorCheck {
        name: "stdin".to_string(),
        status: CheckStatus::Ok,
        message: stdin_message.to_string(),
    });

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: ENGINE_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Adherence Doctor Report");
        println!("=======================");
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
        Err(AdherenceCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

// Helper functions

/// `-` stands for stdin or stdout
fn is_std_stream(path: &Path) -> bool {
    path.to_string_lossy() == "-"
}

fn read_input(path: &Path) -> Result<String, AdherenceCliError> {
    if is_std_stream(path) {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(path)?)
    }
}

fn read_events(path: &Path, format: &InputFormat) -> Result<Vec<UsageEvent>, AdherenceCliError> {
    let data = read_input(path)?;
    Ok(match format {
        InputFormat::Ndjson => RecordParser::events_from_ndjson(&data)?,
        InputFormat::Json => RecordParser::events_from_array(&data)?,
    })
}

fn read_targets(
    path: &Path,
    format: &InputFormat,
) -> Result<Vec<PrescriptionTarget>, AdherenceCliError> {
    let data = read_input(path)?;
    Ok(match format {
        InputFormat::Ndjson => RecordParser::targets_from_ndjson(&data)?,
        InputFormat::Json => RecordParser::targets_from_array(&data)?,
    })
}

fn parse_device_timezone(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((device, zone)) if !device.is_empty() && !zone.is_empty() => {
            Ok((device.to_string(), zone.to_string()))
        }
        _ => Err(format!("expected DEVICE_ID=ZONE, got '{}'", value)),
    }
}

fn format_output(
    cohort: &CohortEvaluation,
    format: &OutputFormat,
    summary: bool,
) -> Result<String, AdherenceCliError> {
    if summary {
        return Ok(match format {
            OutputFormat::Ndjson | OutputFormat::Json => serde_json::to_string(cohort)? + "\n",
            OutputFormat::JsonPretty => serde_json::to_string_pretty(cohort)?,
        });
    }

    match format {
        OutputFormat::Ndjson => {
            let mut lines: Vec<String> = Vec::new();
            for report in &cohort.reports {
                lines.push(serde_json::to_string(report)?);
            }
            Ok(lines.join("\n") + "\n")
        }
        OutputFormat::Json => Ok(serde_json::to_string(&cohort.reports)?),
        OutputFormat::JsonPretty => Ok(serde_json::to_string_pretty(&cohort.reports)?),
    }
}

// Error types

#[derive(Debug)]
enum AdherenceCliError {
    Io(io::Error),
    Engine(AdherenceError),
    Json(serde_json::Error),
    NoRecords,
    Usage(String),
    SubjectsFailed(Vec<SubjectFailure>),
    ValidationFailed(usize),
    DoctorFailed,
}

impl From<io::Error> for AdherenceCliError {
    fn from(e: io::Error) -> Self {
        AdherenceCliError::Io(e)
    }
}

impl From<AdherenceError> for AdherenceCliError {
    fn from(e: AdherenceError) -> Self {
        AdherenceCliError::Engine(e)
    }
}

impl From<serde_json::Error> for AdherenceCliError {
    fn from(e: serde_json::Error) -> Self {
        AdherenceCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<AdherenceCliError> for CliError {
    fn from(e: AdherenceCliError) -> Self {
        match e {
            AdherenceCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            AdherenceCliError::Engine(e) => {
                let (code, hint) = match &e {
                    AdherenceError::InvalidTimezone(_) => (
                        "INVALID_TIMEZONE",
                        "Use an IANA zone name such as Europe/Berlin",
                    ),
                    AdherenceError::InvalidConfig(_) | AdherenceError::TomlError(_) => (
                        "CONFIG_ERROR",
                        "Run 'adherence doctor --config <file>' for details",
                    ),
                    _ => (
                        "ENGINE_ERROR",
                        "Ensure events and targets match the documented record fields",
                    ),
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            AdherenceCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            AdherenceCliError::NoRecords => CliError {
                code: "NO_RECORDS".to_string(),
                message: "No usage events or prescription targets found in input".to_string(),
                hint: Some("Ensure input files are not empty".to_string()),
            },
            AdherenceCliError::Usage(message) => CliError {
                code: "USAGE_ERROR".to_string(),
                message,
                hint: Some("Read at most one input from stdin".to_string()),
            },
            AdherenceCliError::SubjectsFailed(failures) => CliError {
                code: "SUBJECTS_FAILED".to_string(),
                message: format!(
                    "{} subjects failed: {}",
                    failures.len(),
                    failures
                        .iter()
                        .map(|f| format!("{}/{} ({})", f.patient_id, f.device_id, f.error))
                        .collect::<Vec<_>>()
                        .join("; ")
                ),
                hint: Some("Reports for the other subjects were written".to_string()),
            },
            AdherenceCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} events failed validation", count),
                hint: Some("Invalid events are skipped during evaluation".to_string()),
            },
            AdherenceCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct ValidationReport {
    total_events: usize,
    valid_events: usize,
    invalid_events: usize,
    errors: Vec<ValidationErrorDetail>,
}

#[derive(serde::Serialize)]
struct ValidationErrorDetail {
    index: usize,
    event_id: Option<String>,
    error: String,
}

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
