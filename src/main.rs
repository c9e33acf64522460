//! FlowRunner CLI Entry Point
//!
//! Provides command-line interface for workflow execution.
//!
//! # Usage
//!
//! ```bash
//! # Run a workflow with a job order
//! flowrunner workflow.yaml job.yaml
//!
//! # Dry run mode (no tool is executed)
//! flowrunner workflow.yaml job.yaml --dry-run
//!
//! # Specify working directory for tool commands
//! flowrunner workflow.yaml --working-dir /path/to/data
//!
//! # Set maximum parallel tool units and print the timeline
//! flowrunner workflow.yaml job.json --parallel 8 --timeline
//! ```

use std::env;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use colored::Colorize;
use log::{error, info};

use flowrunner::execution::Engine;
use flowrunner::workflow::parser::{load_job_order, load_workflow};
use flowrunner::workflow::ValueMap;
use flowrunner::{FlowError, RunOutcome, APP_NAME, VERSION};

/// Command-line configuration parsed from arguments.
#[derive(Debug)]
struct Config {
    workflow_path: Option<PathBuf>,
    job_order_path: Option<PathBuf>,
    dry_run: bool,
    working_dir: Option<PathBuf>,
    max_parallel: usize,
    show_timeline: bool,
    verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workflow_path: None,
            job_order_path: None,
            dry_run: false,
            working_dir: None,
            max_parallel: num_cpus::get(),
            show_timeline: false,
            verbose: false,
        }
    }
}

/// What the command line asked for.
#[derive(Debug)]
enum Command {
    Run(Config),
    Help,
    Version,
}

/// Configures the logging system with appropriate formatting.
///
/// Logs go to stderr so stdout carries only the output document.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

fn print_banner() {
    eprintln!();
    eprintln!("{} v{}", APP_NAME.bold(), VERSION);
    eprintln!("Dataflow Workflow Engine");
    eprintln!();
}

fn print_usage() {
    println!("Usage: flowrunner [OPTIONS] <WORKFLOW_FILE> [JOB_ORDER_FILE]");
    println!();
    println!("Arguments:");
    println!("  <WORKFLOW_FILE>     Path to workflow file (YAML, or JSON by extension)");
    println!("  [JOB_ORDER_FILE]    Optional file mapping workflow inputs to values");
    println!();
    println!("Options:");
    println!("  --dry-run           Resolve and schedule without running any tool");
    println!("  --working-dir PATH  Set working directory for tool commands");
    println!("  --parallel N        Maximum parallel tool units (default: CPU count)");
    println!("  --timeline          Print an execution timeline when done");
    println!("  --verbose           Enable debug logging");
    println!("  --help              Show this help message");
    println!("  --version           Show version information");
    println!();
    println!("Examples:");
    println!("  flowrunner pipeline.yaml job.yaml");
    println!("  flowrunner pipeline.yaml job.yaml --dry-run");
    println!("  flowrunner pipeline.json --working-dir /data/analysis --parallel 8");
}

/// Parses command-line arguments (program name excluded).
fn parse_arguments(args: &[String]) -> Result<Command, String> {
    let mut config = Config::default();
    let mut positional_index = 0;
    let mut i = 0;

    while i < args.len() {
        let arg = &args[i];

        match arg.as_str() {
            "--help" | "-h" => return Ok(Command::Help),
            "--version" | "-V" => return Ok(Command::Version),
            "--dry-run" => config.dry_run = true,
            "--timeline" => config.show_timeline = true,
            "--verbose" | "-v" => config.verbose = true,
            "--working-dir" => {
                i += 1;
                let dir = args
                    .get(i)
                    .ok_or_else(|| "--working-dir requires a path argument".to_string())?;
                config.working_dir = Some(PathBuf::from(dir));
            }
            "--parallel" => {
                i += 1;
                let value = args
                    .get(i)
                    .ok_or_else(|| "--parallel requires a number argument".to_string())?;
                config.max_parallel = match value.parse() {
                    Ok(n) if n > 0 => n,
                    _ => return Err(format!("Invalid parallel value: {}", value)),
                };
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            _ => {
                match positional_index {
                    0 => config.workflow_path = Some(PathBuf::from(arg)),
                    1 => config.job_order_path = Some(PathBuf::from(arg)),
                    _ => return Err(format!("Unexpected argument: {}", arg)),
                }
                positional_index += 1;
            }
        }
        i += 1;
    }

    if config.workflow_path.is_none() {
        return Err("Missing <WORKFLOW_FILE>".to_string());
    }
    Ok(Command::Run(config))
}

/// Checks that the working directory exists and is a directory.
fn check_working_directory(dir: &Path) -> Result<(), String> {
    if !dir.exists() {
        return Err(format!("Working directory does not exist: {}", dir.display()));
    }
    if !dir.is_dir() {
        return Err(format!("Path is not a directory: {}", dir.display()));
    }
    Ok(())
}

fn print_summary(outcome: &RunOutcome, show_timeline: bool) {
    for diagnostic in &outcome.diagnostics {
        eprintln!("{} {}", "warning:".yellow().bold(), diagnostic);
    }

    let summary = outcome.timeline.summary();
    eprintln!();
    eprintln!(
        "{} started {}, {} tool units completed, {} skipped in {:.2?}",
        "Workflow completed successfully.".green().bold(),
        outcome.started_at.format("%Y-%m-%d %H:%M:%S"),
        summary.completed,
        summary.skipped,
        outcome.elapsed
    );

    if show_timeline {
        eprintln!("{}", outcome.timeline.gantt_chart());
    }
}

fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    setup_logging(config.verbose);
    print_banner();

    if config.dry_run {
        info!("Mode: DRY RUN (tools will not execute)");
    }

    let workflow_path = config
        .workflow_path
        .ok_or_else(|| FlowError::Parse("no workflow file given".to_string()))?;
    let workflow = load_workflow(&workflow_path).map_err(|e| {
        error!("Failed to load workflow: {}", e);
        e
    })?;

    let job = match &config.job_order_path {
        Some(path) => load_job_order(path)?,
        None => ValueMap::new(),
    };

    let mut engine = Engine::new();
    engine.set_max_parallel(config.max_parallel);
    engine.set_dry_run(config.dry_run);
    if let Some(dir) = config.working_dir {
        check_working_directory(&dir)?;
        info!("Working directory: {}", dir.display());
        engine.set_working_dir(dir);
    }

    let outcome = engine.run(&workflow, job)?;

    let document = serde_json::to_string_pretty(&outcome.outputs)?;
    println!("{}", document);
    print_summary(&outcome, config.show_timeline);

    Ok(())
}

fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();

    let config = match parse_arguments(&args) {
        Ok(Command::Run(config)) => config,
        Ok(Command::Help) => {
            print_usage();
            return ExitCode::SUCCESS;
        }
        Ok(Command::Version) => {
            println!("{} {}", APP_NAME, VERSION);
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            eprintln!();
            print_usage();
            return ExitCode::FAILURE;
        }
    };

    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("{} {}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_full_command_line() {
        let command = parse_arguments(&args(&[
            "wf.yaml",
            "job.json",
            "--parallel",
            "3",
            "--dry-run",
            "--timeline",
            "--working-dir",
            "/tmp",
        ]))
        .unwrap();

        let Command::Run(config) = command else {
            panic!("expected a run command");
        };
        assert_eq!(config.workflow_path, Some(PathBuf::from("wf.yaml")));
        assert_eq!(config.job_order_path, Some(PathBuf::from("job.json")));
        assert_eq!(config.max_parallel, 3);
        assert!(config.dry_run);
        assert!(config.show_timeline);
        assert_eq!(config.working_dir, Some(PathBuf::from("/tmp")));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_arguments(&args(&[])).is_err());
        assert!(parse_arguments(&args(&["wf.yaml", "--parallel", "0"])).is_err());
        assert!(parse_arguments(&args(&["wf.yaml", "--parallel"])).is_err());
        assert!(parse_arguments(&args(&["wf.yaml", "--bogus"])).is_err());
        assert!(parse_arguments(&args(&["a", "b", "c"])).is_err());
    }

    #[test]
    fn test_parse_help_and_version() {
        assert!(matches!(parse_arguments(&args(&["--help"])), Ok(Command::Help)));
        assert!(matches!(parse_arguments(&args(&["-V"])), Ok(Command::Version)));
    }

    #[test]
    fn test_check_working_directory() {
        let temp_dir = tempfile::tempdir().unwrap();
        assert!(check_working_directory(temp_dir.path()).is_ok());
        assert!(check_working_directory(&temp_dir.path().join("missing")).is_err());
    }
}
