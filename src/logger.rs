use chrono::Local;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub enum VerbosityLevel {
    Silent = 0,   // Only progress bar and final summary
    Summary = 1,  // Progress events (default)
    Detailed = 2, // Plus warnings and skipped rows
    Debug = 3,    // Everything
}

impl VerbosityLevel {
    pub fn from_verbose_count(count: u8) -> Self {
        match count {
            0 => VerbosityLevel::Summary,
            1 => VerbosityLevel::Detailed,
            2.. => VerbosityLevel::Debug,
        }
    }

    /// Default `tracing` filter directive for this level.
    pub fn tracing_directive(&self) -> &'static str {
        match self {
            VerbosityLevel::Silent => "error",
            VerbosityLevel::Summary => "warn",
            VerbosityLevel::Detailed => "info",
            VerbosityLevel::Debug => "debug",
        }
    }
}

/// The scan's progress channel.
///
/// Every line is `[HH:MM:SS] message`. Lines are appended to an in-memory
/// history that is never rewritten within a run; verbosity only controls
/// what reaches the terminal.
#[derive(Clone)]
pub struct ScanLogger {
    verbosity: VerbosityLevel,
    progress_bar: Arc<Mutex<Option<ProgressBar>>>,
    history: Arc<Mutex<Vec<String>>>,
    log_file_path: Option<PathBuf>,
}

impl ScanLogger {
    pub fn new(verbosity: VerbosityLevel) -> Self {
        Self {
            verbosity,
            progress_bar: Arc::new(Mutex::new(None)),
            history: Arc::new(Mutex::new(Vec::new())),
            log_file_path: None,
        }
    }

    pub fn with_log_file(verbosity: VerbosityLevel, log_file_path: impl Into<PathBuf>) -> Self {
        Self {
            log_file_path: Some(log_file_path.into()),
            ..Self::new(verbosity)
        }
    }

    /// Logger that records history without printing anything.
    pub fn silent() -> Self {
        Self::new(VerbosityLevel::Silent)
    }

    /// A progress event: a major transition the operator follows.
    pub fn event(&self, message: &str) {
        self.record(message, VerbosityLevel::Summary);
    }

    pub fn warn(&self, message: &str) {
        self.record(&format!("WARN: {}", message), VerbosityLevel::Detailed);
    }

    /// Errors are always shown.
    pub fn error(&self, message: &str) {
        let line = self.append(&format!("ERROR: {}", message));
        self.print(&line);
    }

    fn record(&self, message: &str, min_level: VerbosityLevel) {
        let line = self.append(message);
        if self.verbosity >= min_level {
            self.print(&line);
        }
    }

    fn append(&self, message: &str) -> String {
        let line = format!("[{}] {}", timestamp(), message);
        if let Ok(mut history) = self.history.lock() {
            history.push(line.clone());
        }
        line
    }

    fn print(&self, line: &str) {
        // Print above an active progress bar instead of through it.
        if let Ok(guard) = self.progress_bar.lock() {
            if let Some(pb) = guard.as_ref() {
                pb.println(line);
                return;
            }
        }
        eprintln!("{}", line);
    }

    /// Snapshot of every recorded line, oldest first.
    pub fn history(&self) -> Vec<String> {
        self.history.lock().map(|h| h.clone()).unwrap_or_default()
    }

    /// History lines with the timestamp prefix removed.
    pub fn messages(&self) -> Vec<String> {
        self.history()
            .into_iter()
            .map(|line| match line.split_once("] ") {
                Some((_, message)) => message.to_string(),
                None => line,
            })
            .collect()
    }

    pub fn start_progress(&self, total: u64) {
        let pb = ProgressBar::new(total);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("##-"),
        );
        if let Ok(mut guard) = self.progress_bar.lock() {
            *guard = Some(pb);
        }
    }

    pub fn advance_progress(&self, message: &str) {
        if let Ok(guard) = self.progress_bar.lock() {
            if let Some(pb) = guard.as_ref() {
                pb.set_message(message.to_string());
                pb.inc(1);
            }
        }
    }

    pub fn finish_progress(&self) {
        if let Ok(mut guard) = self.progress_bar.lock() {
            if let Some(pb) = guard.take() {
                pb.finish_and_clear();
            }
        }
    }

    /// Write the full history to the configured log file, if any.
    pub fn export_logs(&self) -> std::io::Result<Option<PathBuf>> {
        match &self.log_file_path {
            Some(path) => {
                write_history(path, &self.history())?;
                Ok(Some(path.clone()))
            }
            None => Ok(None),
        }
    }
}

fn timestamp() -> String {
    Local::now().format("%H:%M:%S").to_string()
}

fn write_history(path: &Path, lines: &[String]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut file = OpenOptions::new().create(true).write(true).truncate(true).open(path)?;
    for line in lines {
        writeln!(file, "{}", line)?;
    }
    file.flush()
}
