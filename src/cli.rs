use clap::Parser;
use std::path::PathBuf;

use crate::checkpoint::ResumeMode;
use crate::export::OutputFormat;
use crate::record::{Credentials, Region};

#[derive(Parser, Debug)]
#[command(name = "aprscan")]
#[command(about = "Collects currently valid APR records from the permit portal for a list of projects")]
#[command(version)]
pub struct Cli {
    /// Create default configuration file at ./config/aprscan.toml
    #[arg(long)]
    pub init: bool,

    /// Portal login
    #[arg(short, long, env = "APR_USER")]
    pub user: Option<String>,

    /// Portal password
    #[arg(short, long, env = "APR_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Distributor region: Campos, Lagos, Macaé, Magé, Niterói, São Gonçalo,
    /// Serrana, Sul or Noroeste (accents optional, e.g. "sao-goncalo")
    #[arg(short, long, default_value = "niteroi")]
    pub region: Region,

    /// Spreadsheet (.xlsx, .xls, .ods) or CSV file with a PROJETOS.PY column
    #[arg(short, long, value_name = "FILE")]
    pub input: Option<PathBuf>,

    /// Output directory for the results file (defaults to Desktop)
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Output format
    #[arg(short = 'f', long, value_enum, default_value_t = OutputFormat::Xlsx)]
    pub format: OutputFormat,

    /// Configuration file (defaults to ./config/aprscan.toml)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Show the browser window instead of running headless
    #[arg(long)]
    pub headed: bool,

    /// Verbose logging (use -v for warnings and skipped rows, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Export the progress log to a file
    #[arg(long, value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    /// Auto-resume from checkpoint if one exists (skip resume prompt)
    #[arg(long, conflicts_with = "no_resume")]
    pub resume: bool,

    /// Start a fresh scan, ignore any existing checkpoint
    #[arg(long, conflicts_with = "resume")]
    pub no_resume: bool,

    /// Do not save a checkpoint while scanning
    #[arg(long)]
    pub no_checkpoint: bool,
}

impl Cli {
    /// Checks that need no browser and no file access.
    pub fn validate(&self) -> Result<(), String> {
        if self.init {
            return Ok(());
        }

        match &self.user {
            Some(user) if !user.trim().is_empty() => {}
            _ => return Err("User is required (use --user or APR_USER)".to_string()),
        }
        match &self.password {
            Some(password) if !password.is_empty() => {}
            _ => return Err("Password is required (use --password or APR_PASSWORD)".to_string()),
        }
        if self.input.is_none() {
            return Err("Input file is required (use --input)".to_string());
        }

        Ok(())
    }

    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.user, &self.password) {
            (Some(user), Some(password)) => Some(Credentials::new(user.trim(), password.as_str())),
            _ => None,
        }
    }

    pub fn get_default_output_dir() -> PathBuf {
        // Fallback to current directory if Desktop can't be found
        dirs::desktop_dir().unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn get_output_dir(&self) -> PathBuf {
        match &self.output_dir {
            Some(dir) => dir.clone(),
            None => Self::get_default_output_dir(),
        }
    }

    /// Get the resume mode based on CLI flags
    pub fn get_resume_mode(&self) -> ResumeMode {
        if self.resume {
            ResumeMode::AutoResume
        } else if self.no_resume {
            ResumeMode::Fresh
        } else {
            ResumeMode::Prompt
        }
    }
}
