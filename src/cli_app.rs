//! Top-level CLI definition and dispatch.

use std::ffi::OsString;
use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::thread::JoinHandle;
use std::time::Duration;

use clap::error::ErrorKind;
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use thiserror::Error;

use quarantine_crawler::classifier::ClassifierKind;
use quarantine_crawler::cli::{ConsoleReporter, rewrite_legacy_args};
use quarantine_crawler::control::CancellationController;
use quarantine_crawler::core::config::Config;
use quarantine_crawler::core::errors::QcError;
use quarantine_crawler::engine::{Engine, RunOptions, RunSummary};
use quarantine_crawler::logger::jsonl::JsonlConfig;
use quarantine_crawler::logger::{ActivityLoggerConfig, ActivityLoggerHandle, spawn_logger};

/// Quarantine crawler: classify files under a root and move selected ones aside.
#[derive(Debug, Parser)]
#[command(
    name = "qcrawl",
    author,
    version,
    about = "Quarantine crawler - resumable file classification and relocation",
    long_about = None
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Crawl root (legacy: /r, /root).
    #[arg(long, global = true, value_name = "PATH")]
    root: Option<PathBuf>,
    /// Load the checkpoint before crawling (legacy: /res, /resume).
    #[arg(long, global = true)]
    resume: bool,
    /// Checkpoint file (legacy: /st, /state).
    #[arg(long, global = true, value_name = "PATH")]
    state: Option<PathBuf>,
    /// With --resume, work from the checkpoint only (legacy: /skip).
    #[arg(long, global = true)]
    skip: bool,
    /// Quarantine root; without it files are only listed (legacy: /d, /destinationroot).
    #[arg(long = "destination-root", global = true, value_name = "PATH")]
    destination_root: Option<PathBuf>,
    /// Classifier worker threads.
    #[arg(long, global = true, value_name = "N")]
    parallelism: Option<usize>,
    /// Files classified between periodic checkpoints.
    #[arg(long, global = true, value_name = "N")]
    save_every: Option<usize>,
    /// Mode; defaults to the configured classifier.
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Move every file carrying a valid PE executable header.
    Exe,
    /// Move all but the first copy of byte-identical files.
    Dupes,
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Target shell.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// Internal bug or invariant violation.
    #[error("{0}")]
    Internal(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Internal(_) | Self::Json(_) => 3,
        }
    }
}

/// Parse raw process arguments and run.
///
/// Fewer than two arguments prints usage and succeeds.
pub fn main_with_args<I>(raw: I) -> Result<(), CliError>
where
    I: IntoIterator<Item = OsString>,
{
    let args = rewrite_legacy_args(raw);
    let info_request = args
        .get(1)
        .and_then(|a| a.to_str())
        .is_some_and(|a| matches!(a, "-h" | "--help" | "-V" | "--version"));
    if args.len() < 3 && !info_request {
        return print_usage();
    }

    let cli = match Cli::try_parse_from(&args) {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            print!("{e}");
            return Ok(());
        }
        Err(e) => return Err(CliError::User(e.to_string().trim_end().to_string())),
    };
    run(&cli)
}

fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    if let Some(Command::Completions(args)) = &cli.command {
        let mut command = Cli::command();
        let binary_name = command.get_name().to_string();
        generate(args.shell, &mut command, binary_name, &mut io::stdout());
        return Ok(());
    }

    let mut config = Config::load(cli.config.as_deref()).map_err(config_error)?;
    apply_flags(&mut config, cli);
    config.validate().map_err(config_error)?;
    let Some(root) = config.crawl.root.clone() else {
        return print_usage();
    };

    let mode = output_mode(cli);
    let options = run_options(&config, cli, root)?;
    let logger = start_logger(&config);

    let mut reporter = ConsoleReporter::new(Duration::from_millis(config.progress.throttle_ms));
    if mode == OutputMode::Json {
        reporter = reporter.without_progress();
    }

    let result = Engine::new(options, CancellationController::with_os_signals(), &mut reporter)
        .with_logger(logger.as_ref().map(|(handle, _)| handle.clone()))
        .run();
    reporter.finish();

    if let Some((handle, join)) = logger {
        handle.shutdown();
        let _ = join.join();
    }

    let summary = result.map_err(engine_error)?;
    emit_summary(mode, &summary)
}

fn print_usage() -> Result<(), CliError> {
    let mut stdout = io::stdout();
    write!(stdout, "{}", Cli::command().render_help())?;
    Ok(())
}

/// Merge flags over file and environment values.
fn apply_flags(config: &mut Config, cli: &Cli) {
    match cli.command {
        Some(Command::Exe) => config.classifier.kind = ClassifierKind::Signature,
        Some(Command::Dupes) => config.classifier.kind = ClassifierKind::Digest,
        Some(Command::Completions(_)) | None => {}
    }
    if let Some(root) = &cli.root {
        config.crawl.root = Some(root.clone());
    }
    if let Some(state) = &cli.state {
        config.checkpoint.path = state.clone();
    }
    if let Some(destination) = &cli.destination_root {
        config.quarantine.destination_root = Some(destination.clone());
    }
    if let Some(parallelism) = cli.parallelism {
        config.classifier.parallelism = parallelism;
    }
    if let Some(save_every) = cli.save_every {
        config.checkpoint.save_every = save_every;
    }
}

fn run_options(config: &Config, cli: &Cli, root: PathBuf) -> Result<RunOptions, CliError> {
    let config_hash = config
        .stable_hash()
        .map_err(|e| CliError::Internal(e.to_string()))?;
    Ok(RunOptions {
        root,
        classifier: config.classifier.kind,
        resume: cli.resume,
        skip_reconcile: cli.skip,
        state_path: config.checkpoint.path.clone(),
        destination_root: config.quarantine.destination_root.clone(),
        save_every: config.checkpoint.save_every,
        parallelism: config.classifier.parallelism,
        excluded_paths: config.crawl.excluded_paths.clone(),
        follow_symlinks: config.crawl.follow_symlinks,
        config_hash,
    })
}

fn start_logger(config: &Config) -> Option<(ActivityLoggerHandle, JoinHandle<()>)> {
    if !config.logging.enabled {
        return None;
    }
    let logger_config = ActivityLoggerConfig {
        jsonl_config: JsonlConfig {
            path: config.logging.jsonl_log.clone(),
            fallback_path: config.logging.fallback_log.clone(),
            ..JsonlConfig::default()
        },
        ..ActivityLoggerConfig::default()
    };
    match spawn_logger(logger_config) {
        Ok(pair) => Some(pair),
        Err(e) => {
            eprintln!("qcrawl: activity log disabled: {e}");
            None
        }
    }
}

fn config_error(err: QcError) -> CliError {
    match err {
        QcError::InvalidConfig { .. }
        | QcError::MissingConfig { .. }
        | QcError::ConfigParse { .. } => CliError::User(err.to_string()),
        other => CliError::Runtime(other.to_string()),
    }
}

fn engine_error(err: QcError) -> CliError {
    match err {
        QcError::InvalidConfig { .. } => CliError::User(err.to_string()),
        other => CliError::Runtime(other.to_string()),
    }
}

fn emit_summary(mode: OutputMode, summary: &RunSummary) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    match mode {
        OutputMode::Json => {
            let json = serde_json::to_string_pretty(summary)?;
            writeln!(stdout, "{json}")?;
        }
        OutputMode::Human => write_human_summary(&mut stdout, summary)?,
    }
    Ok(())
}

fn write_human_summary(out: &mut impl Write, summary: &RunSummary) -> io::Result<()> {
    writeln!(
        out,
        "{} {} run over {}",
        "qcrawl:".bold(),
        summary.classifier,
        summary.root.display()
    )?;
    if let Some(reason) = &summary.checkpoint_discarded {
        writeln!(out, "  {} {reason}", "checkpoint discarded:".yellow())?;
    } else if summary.restored_pending + summary.restored_resolved > 0 {
        writeln!(
            out,
            "  restored {} classified and {} pending files",
            summary.restored_resolved, summary.restored_pending
        )?;
    }
    writeln!(
        out,
        "  discovered {} new files in {} directories ({} skipped, {} excluded)",
        summary.discovered,
        summary.directories_visited,
        summary.directories_skipped,
        summary.directories_excluded
    )?;
    writeln!(
        out,
        "  classified {} files ({} skipped, {} failed)",
        summary.classified, summary.classification_skipped, summary.classification_failed
    )?;

    if let Some(phase) = summary.cancelled_in {
        writeln!(
            out,
            "  {} during {}; checkpoint saved, rerun with --resume",
            "cancelled".yellow().bold(),
            phase.as_str()
        )?;
        return Ok(());
    }

    if summary.classifier == ClassifierKind::Digest {
        writeln!(
            out,
            "  {} duplicate groups, {} files selected",
            summary.duplicate_groups,
            summary.selected.len()
        )?;
    } else {
        writeln!(out, "  {} executables selected", summary.selected.len())?;
    }

    if summary.moved.is_empty() && summary.move_skipped + summary.move_failed == 0 {
        for path in &summary.selected {
            writeln!(out, "    {} {}", "match".cyan(), path.display())?;
        }
    } else {
        for record in &summary.moved {
            writeln!(
                out,
                "    {} {} -> {}",
                "moved".green(),
                record.source.display(),
                record.destination.display()
            )?;
        }
        writeln!(
            out,
            "  moved {} ({} skipped, {} failed)",
            summary.moved.len(),
            summary.move_skipped,
            summary.move_failed
        )?;
    }
    writeln!(out, "  checkpoints saved: {}", summary.checkpoints_saved)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("QC_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}
