use anyhow::{Context, Result};
use clap::Parser;
use std::io::{self, IsTerminal, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use aprscan::browser::ChromeLauncher;
use aprscan::checkpoint::{Checkpoint, ResumeMode, SessionKey};
use aprscan::cli::Cli;
use aprscan::config::{self, AppConfig};
use aprscan::export;
use aprscan::input;
use aprscan::logger::{ScanLogger, VerbosityLevel};
use aprscan::scan::{ScanError, ScanRequest, Scanner};

/// Exit code for bad arguments or input, reported before any browser starts.
const EXIT_INVALID: i32 = 2;
/// 130 = 128 + SIGINT(2), standard exit code for Ctrl-C
const EXIT_INTERRUPTED: i32 = 130;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle --init flag first (before any other processing)
    if cli.init {
        match AppConfig::create_default_config() {
            Ok(path) => {
                println!("✅ Created default configuration file at: {}", path.display());
                println!("   Edit this file to customize settings, then run aprscan again.");
                std::process::exit(0);
            }
            Err(e) => {
                eprintln!("❌ Failed to create configuration file: {}", e);
                std::process::exit(1);
            }
        }
    }

    if let Err(e) = cli.validate() {
        eprintln!("❌ Invalid arguments: {}", e);
        std::process::exit(EXIT_INVALID);
    }

    let verbosity = VerbosityLevel::from_verbose_count(cli.verbose);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(verbosity.tracing_directive()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();

    let app_config = load_config(&cli);

    let logger = match &cli.log_file {
        Some(path) => ScanLogger::with_log_file(verbosity, path),
        None => ScanLogger::new(verbosity),
    };

    // validate() guarantees both are present
    let (Some(credentials), Some(input_path)) = (cli.credentials(), cli.input.as_deref()) else {
        eprintln!("❌ Invalid arguments: user, password and input are required");
        std::process::exit(EXIT_INVALID);
    };

    let identifiers = match input::load_identifiers(input_path, &app_config.input.column_marker) {
        Ok(ids) if ids.is_empty() => {
            eprintln!(
                "❌ No project identifiers found in column '{}' of {}",
                app_config.input.column_marker,
                input_path.display()
            );
            std::process::exit(EXIT_INVALID);
        }
        Ok(ids) => ids,
        Err(e) => {
            eprintln!("❌ {}", e);
            std::process::exit(EXIT_INVALID);
        }
    };
    logger.event(&format!(
        "Loaded {} project identifiers from {}",
        identifiers.len(),
        input_path.display()
    ));

    let output_dir = cli.get_output_dir();
    let request = ScanRequest::new(credentials, cli.region, identifiers);

    let checkpoint_enabled = app_config.checkpoint.enabled && !cli.no_checkpoint;
    let resume_from = if checkpoint_enabled {
        let key = SessionKey::new(&request.credentials.user, request.region, &request.identifiers);
        resolve_checkpoint(&output_dir, &key, cli.get_resume_mode(), &logger)
    } else {
        None
    };

    // First Ctrl-C asks the scan to stop after the current identifier; a second one exits immediately.
    let interrupted = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&interrupted);
    ctrlc::set_handler(move || {
        if handler_flag.swap(true, Ordering::SeqCst) {
            eprintln!("\n⚠️  Force exiting (checkpoint may be incomplete).");
            std::process::exit(EXIT_INTERRUPTED);
        }
        eprintln!("\n⚠️  Interrupt received. Finishing the current project, saving checkpoint and exiting...");
    })
    .unwrap_or_else(|e| {
        eprintln!("⚠️  Warning: Failed to set Ctrl-C handler: {}. Interrupt signals may not be handled gracefully.", e);
    });

    // The portal session is fully blocking; keep it off the async runtime.
    let scan_logger = logger.clone();
    let scan_config = app_config.clone();
    let headed = cli.headed;
    let checkpoint_dir = output_dir.clone();
    let scan_request = request;
    let result = tokio::task::spawn_blocking(move || {
        let launcher = ChromeLauncher::from_config(&scan_config, headed);
        let mut scanner = Scanner::new(launcher, scan_config, scan_logger).with_interrupt(interrupted);
        if checkpoint_enabled {
            scanner = scanner.with_checkpoint(checkpoint_dir, resume_from);
        }
        scanner.run(&scan_request)
    })
    .await
    .context("Scan worker panicked")?;

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            export_logs(&logger);
            // Fatal errors were already reported on the progress channel.
            let code = match e {
                ScanError::Validation(_) => {
                    eprintln!("❌ {}", e);
                    EXIT_INVALID
                }
                ScanError::Interrupted { .. } => {
                    eprintln!("⚠️  Re-run with the same arguments to resume.");
                    EXIT_INTERRUPTED
                }
                _ => 1,
            };
            std::process::exit(code);
        }
    };

    let written = match export::write_results(&outcome, &output_dir, cli.format) {
        Ok(path) => path,
        Err(e) => {
            logger.error(&format!("Failed to export results: {:#}", e));
            export_logs(&logger);
            std::process::exit(1);
        }
    };
    if let Some(path) = &written {
        logger.event(&format!("Results exported: {}", path.display()));
    }

    export_logs(&logger);
    export::print_scan_summary(&outcome, written.as_deref());
    Ok(())
}

fn load_config(cli: &Cli) -> AppConfig {
    let loaded = match &cli.config {
        Some(path) => AppConfig::load_from_path(path),
        None => AppConfig::load(),
    };

    match loaded {
        Ok(cfg) => cfg,
        Err(config::ConfigError::FileNotFound(path)) if cli.config.is_none() => {
            // Config not found - prompt to create if interactive
            match AppConfig::prompt_create_config() {
                Ok(Some(created_path)) => {
                    println!("✅ Created default configuration file at: {}", created_path.display());
                    println!("   Edit this file to customize settings, then run aprscan again.");
                    std::process::exit(0);
                }
                Ok(None) => {
                    eprintln!("❌ Configuration file not found at: {}", path.display());
                    eprintln!("   Run with --init to create a default configuration file.");
                    std::process::exit(1);
                }
                Err(e) => {
                    eprintln!("❌ Failed to create configuration file: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Err(e) => {
            eprintln!("❌ Configuration error: {}", e);
            std::process::exit(1);
        }
    }
}

/// Decide whether an existing checkpoint in `output_dir` is resumed.
fn resolve_checkpoint(output_dir: &Path, key: &SessionKey, mode: ResumeMode, logger: &ScanLogger) -> Option<Checkpoint> {
    if !Checkpoint::exists(output_dir) {
        return None;
    }

    let existing = match Checkpoint::load(output_dir) {
        Ok(checkpoint) => checkpoint,
        Err(e) => {
            logger.warn(&format!("Failed to load existing checkpoint: {}. Starting fresh.", e));
            let _ = Checkpoint::delete(output_dir);
            return None;
        }
    };
    let summary = existing.summary();

    if !existing.is_compatible(key) {
        println!("⚠️  Existing checkpoint belongs to a different scan (user, region or project list).");
        println!("   Starting fresh.");
        let _ = Checkpoint::delete(output_dir);
        return None;
    }

    let resume = match mode {
        ResumeMode::AutoResume => true,
        ResumeMode::Fresh => {
            println!("🔄 Starting fresh scan (--no-resume specified).");
            false
        }
        // Auto-resume compatible checkpoints in non-interactive mode
        ResumeMode::Prompt if !io::stdin().is_terminal() => true,
        ResumeMode::Prompt => {
            println!();
            println!("Incomplete scan found: {}", summary);
            print!("Resume from checkpoint? [Y/n]: ");
            let _ = io::stdout().flush();

            let mut answer = String::new();
            let _ = io::stdin().read_line(&mut answer);
            let answer = answer.trim().to_lowercase();
            answer.is_empty() || answer == "y" || answer == "yes"
        }
    };

    if resume {
        println!("📋 Resuming from checkpoint: {}", summary);
        Some(existing)
    } else {
        let _ = Checkpoint::delete(output_dir);
        None
    }
}

fn export_logs(logger: &ScanLogger) {
    match logger.export_logs() {
        Ok(Some(path)) => eprintln!("📝 Log written to: {}", path.display()),
        Ok(None) => {}
        Err(e) => eprintln!("⚠️  Failed to write log file: {}", e),
    }
}
