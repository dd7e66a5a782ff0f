/// Typed command builders for the external tools.
///
/// Each external tool gets a builder value that is validated before it is
/// turned into an `ExecSpec`, so a malformed invocation fails in the caller
/// instead of surfacing as an opaque tool error.
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::types::{HarnessError, Result};

/// A fully resolved command ready for the supervisor: argument vector,
/// working directory, environment overrides, optional deadline.
#[derive(Debug, Clone)]
pub struct ExecSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub timeout: Option<Duration>,
}

impl ExecSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            timeout: None,
        }
    }

    /// A shell-string command, run through `sh -c`.
    pub fn shell(command: impl Into<String>) -> Self {
        let mut spec = Self::new("sh");
        spec.args = vec!["-c".to_string(), command.into()];
        spec
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Human-readable rendition for transcripts.
    pub fn display_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Fresh 48-byte hex seed handed to the driver for every POV invocation.
pub fn pov_seed() -> String {
    let mut seed = String::with_capacity(96);
    for _ in 0..48 {
        seed.push_str(&format!("{:02x}", fastrand::u8(..)));
    }
    seed
}

/// Invocation of the legacy cb-test driver for one test file.
#[derive(Debug, Clone)]
pub struct CbTestCommand {
    pub python: String,
    pub driver: PathBuf,
    pub build_dir: PathBuf,
    pub test_file: PathBuf,
    pub timeout_secs: u64,
    pub bin_names: Vec<String>,
    pub port: Option<String>,
    /// Core-dump directory; present only for POV runs.
    pub cores_path: Option<PathBuf>,
}

impl CbTestCommand {
    pub fn build(&self) -> Result<ExecSpec> {
        if self.bin_names.is_empty() {
            return Err(HarnessError::Config(
                "cb-test invocation needs at least one binary name".to_string(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(HarnessError::Config(
                "cb-test invocation needs a positive timeout".to_string(),
            ));
        }

        let mut spec = ExecSpec::new(&self.python)
            .arg(self.driver.to_string_lossy())
            .arg("--directory")
            .arg(self.build_dir.to_string_lossy())
            .arg("--xml")
            .arg(self.test_file.to_string_lossy())
            .arg("--concurrent")
            .arg("1")
            .arg("--debug")
            .arg("--timeout")
            .arg(self.timeout_secs.to_string())
            .arg("--negotiate_seed")
            .arg("--cb")
            .args(self.bin_names.clone());

        if let Some(port) = &self.port {
            spec = spec.arg("--port").arg(port);
        }

        if let Some(cores) = &self.cores_path {
            spec = spec
                .arg("--cores_path")
                .arg(cores.to_string_lossy())
                .arg("--should_core")
                .arg("--pov_seed")
                .arg(pov_seed());
        }

        Ok(spec)
    }
}

/// `gcov` run for one counter file, executed next to it so the listing lands
/// in the same directory.
#[derive(Debug, Clone)]
pub struct GcovCommand {
    pub counter: PathBuf,
}

impl GcovCommand {
    pub fn build(&self) -> Result<ExecSpec> {
        let parent = self.counter.parent().ok_or_else(|| {
            HarnessError::Config(format!(
                "counter file {} has no parent directory",
                self.counter.display()
            ))
        })?;
        Ok(ExecSpec::new("gcov")
            .arg(self.counter.to_string_lossy())
            .cwd(parent))
    }
}

/// Invocation of the external build script for one working copy.
#[derive(Debug, Clone)]
pub struct BuildCommand {
    pub script: PathBuf,
    pub working_dir: PathBuf,
    pub challenge: String,
    pub coverage: bool,
    pub inst_files: Vec<PathBuf>,
    pub fix_files: Vec<PathBuf>,
}

impl BuildCommand {
    pub fn build(&self) -> Result<ExecSpec> {
        if self.inst_files.len() != self.fix_files.len() && !self.fix_files.is_empty() {
            return Err(HarnessError::Config(
                "instrumentation and fix file lists must pair up".to_string(),
            ));
        }

        let mut spec = ExecSpec::new(self.script.to_string_lossy())
            .arg(&self.challenge)
            .cwd(&self.working_dir);

        for file in &self.inst_files {
            spec = spec.arg("--inst").arg(file.to_string_lossy());
        }
        for file in &self.fix_files {
            spec = spec.arg("--fix").arg(file.to_string_lossy());
        }
        if self.coverage {
            // The script switches to the gcov-instrumented profile.
            spec = spec.arg("--coverage").env("COVERAGE", "1");
        }

        Ok(spec)
    }
}

/// Binary names under test: challenges whose source holds `cb_*`
/// subdirectories ship multiple binaries named `<challenge>_<k>`.
pub fn challenge_bin_names(challenge: &str, source_dir: &Path) -> Vec<String> {
    let multi = std::fs::read_dir(source_dir)
        .map(|entries| {
            entries
                .flatten()
                .filter(|e| {
                    e.path().is_dir()
                        && e.file_name().to_string_lossy().starts_with("cb_")
                })
                .count()
        })
        .unwrap_or(0);

    if multi > 0 {
        (1..=multi).map(|i| format!("{challenge}_{i}")).collect()
    } else {
        vec![challenge.to_string()]
    }
}
