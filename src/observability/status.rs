/// Severity-coded terminal status lines with durable log mirroring.
///
/// Every status line is also appended to the caller-scoped log file when one
/// is configured, so a failed run leaves a complete transcript behind. The
/// file handle is scoped to each append; nothing stays open between calls.
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use log::warn;

const RED: &str = "\x1b[91m";
const GREEN: &str = "\x1b[92m";
const YELLOW: &str = "\x1b[93m";
const BLUE: &str = "\x1b[94m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

#[derive(Debug, Clone, Default)]
pub struct StatusReporter {
    verbose: bool,
    no_status: bool,
    log_file: Option<PathBuf>,
}

impl StatusReporter {
    pub fn new(verbose: bool, no_status: bool) -> Self {
        Self {
            verbose,
            no_status,
            log_file: None,
        }
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    /// Redirect durable mirroring to `path` (or disable it with `None`).
    pub fn set_log_file(&mut self, path: Option<PathBuf>) {
        self.log_file = path;
    }

    pub fn log_file(&self) -> Option<&PathBuf> {
        self.log_file.as_ref()
    }

    /// Append raw text to the log file. Mirroring failures are reported once
    /// through the `log` facade and never affect the caller.
    pub fn log(&self, text: &str) {
        let Some(path) = &self.log_file else {
            return;
        };
        if text.is_empty() {
            return;
        }
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut f| f.write_all(text.as_bytes()));
        if let Err(e) = result {
            warn!("failed to append to log file {}: {}", path.display(), e);
        }
    }

    fn line(&self, color: &str, message: &str) {
        self.log(&format!("{message}\n"));
        if self.no_status {
            return;
        }
        if color.is_empty() {
            println!("{message}");
        } else {
            println!("{color}{message}{RESET}");
        }
    }

    pub fn info(&self, message: &str) {
        self.line(BLUE, message);
    }

    pub fn ok(&self, message: &str) {
        self.line(GREEN, message);
    }

    pub fn fail(&self, message: &str) {
        self.line(RED, message);
    }

    pub fn warn(&self, message: &str) {
        self.line(YELLOW, message);
    }

    pub fn bold(&self, message: &str) {
        self.line(BOLD, message);
    }

    pub fn plain(&self, message: &str) {
        self.line("", message);
    }
}
