/// Configuration loading and validation.
///
/// Everything hangs off one install root: the challenge/poll/POV corpora
/// under `lib/`, the external tool-chain under `tools/`, and the metadata
/// document. `validate()` is the gate every command runs before touching
/// anything else.
use std::path::{Path, PathBuf};

use crate::types::{HarnessError, Result};

/// Default per-test timeout in seconds.
pub const DEFAULT_TESTS_TIMEOUT: u64 = 60;
/// Margin in seconds added on top of a history-derived test duration.
pub const DEFAULT_TIMEOUT_MARGIN: u64 = 5;

/// Corpus locations under the install root.
#[derive(Debug, Clone)]
pub struct LibPaths {
    pub root: PathBuf,
    pub challenges: PathBuf,
    pub polls: PathBuf,
    pub povs: PathBuf,
}

impl LibPaths {
    fn new(root: &Path) -> Self {
        let lib = root.join("lib");
        Self {
            challenges: lib.join("challenges"),
            polls: lib.join("polls"),
            povs: lib.join("povs"),
            root: lib,
        }
    }

    pub fn validate(&self) -> bool {
        self.root.is_dir() && self.challenges.is_dir() && self.polls.is_dir()
    }

    /// Per-challenge corpus paths.
    pub fn challenge_paths(&self, name: &str) -> ChallengePaths {
        ChallengePaths {
            source: self.challenges.join(name),
            polls: self.polls.join(name).join("poller"),
            povs: self.povs.join(name),
        }
    }
}

/// Filesystem locations of one challenge's corpora.
#[derive(Debug, Clone)]
pub struct ChallengePaths {
    pub source: PathBuf,
    pub polls: PathBuf,
    pub povs: PathBuf,
}

/// External tool-chain entry points.
#[derive(Debug, Clone)]
pub struct Tools {
    pub root: PathBuf,
    pub test_driver: PathBuf,
    pub gen_polls: PathBuf,
    pub build_script: PathBuf,
    pub cmake_file: PathBuf,
    pub cmake_file_no_patch: PathBuf,
}

impl Tools {
    fn new(root: &Path) -> Self {
        let tools = root.join("tools");
        Self {
            test_driver: tools.join("cb-test.py"),
            gen_polls: tools.join("generate-polls").join("generate-polls"),
            build_script: tools.join("compile.sh"),
            cmake_file: tools.join("CMakeLists.txt"),
            cmake_file_no_patch: tools.join("CMakeListsNoPatch.txt"),
            root: tools,
        }
    }

    pub fn validate(&self) -> bool {
        self.root.is_dir() && self.test_driver.is_file() && self.build_script.is_file()
    }
}

#[derive(Debug, Clone)]
pub struct Configuration {
    pub root: PathBuf,
    pub lib: LibPaths,
    pub tools: Tools,
    /// The persisted metadata document (challenge name -> record).
    pub metadata: PathBuf,
    /// Default per-test timeout in seconds.
    pub tests_timeout: u64,
    /// Seconds added on top of history-derived durations.
    pub margin: u64,
    /// Core-dump directory handed to the test driver for POV runs.
    pub cores: PathBuf,
    /// Interpreter used to launch the legacy python test driver.
    pub python: String,
    /// Parent directory for per-challenge working copies.
    pub working_root: PathBuf,
}

impl Configuration {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let lib = LibPaths::new(&root);
        let tools = Tools::new(&root);
        let metadata = lib.root.join("metadata");
        Self {
            root,
            lib,
            tools,
            metadata,
            tests_timeout: DEFAULT_TESTS_TIMEOUT,
            margin: DEFAULT_TIMEOUT_MARGIN,
            cores: PathBuf::from("/cores"),
            python: "python".to_string(),
            working_root: std::env::temp_dir(),
        }
    }

    /// Working copies are keyed by challenge name only: one sanity iteration
    /// owns the directory exclusively, two processes must not share it.
    pub fn working_dir(&self, challenge: &str) -> PathBuf {
        self.working_root.join(format!("check_{challenge}"))
    }

    pub fn validate(&self) -> Result<()> {
        if !self.metadata.is_file() {
            return Err(HarnessError::Config(format!(
                "Not initialized: missing metadata document {}",
                self.metadata.display()
            )));
        }
        if !self.lib.validate() {
            return Err(HarnessError::Config(format!(
                "Invalid library layout under {}",
                self.lib.root.display()
            )));
        }
        if !self.tools.validate() {
            return Err(HarnessError::Config(format!(
                "Invalid tools layout under {}",
                self.tools.root.display()
            )));
        }
        if self.tests_timeout == 0 || self.margin == 0 {
            return Err(HarnessError::Config(
                "tests_timeout and margin must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_derived_from_root() {
        let cfg = Configuration::new("/opt/bench");
        assert_eq!(cfg.lib.challenges, PathBuf::from("/opt/bench/lib/challenges"));
        assert_eq!(cfg.metadata, PathBuf::from("/opt/bench/lib/metadata"));
        assert_eq!(cfg.tools.build_script, PathBuf::from("/opt/bench/tools/compile.sh"));
        assert_eq!(cfg.tests_timeout, DEFAULT_TESTS_TIMEOUT);
    }

    #[test]
    fn working_dir_is_a_pure_function_of_the_name() {
        let cfg = Configuration::new("/opt/bench");
        assert_eq!(cfg.working_dir("Foo"), cfg.working_dir("Foo"));
        assert_ne!(cfg.working_dir("Foo"), cfg.working_dir("Bar"));
        assert!(cfg
            .working_dir("Foo")
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("check_"));
    }

    #[test]
    fn validate_rejects_missing_metadata() {
        let cfg = Configuration::new("/nonexistent-install-root");
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("Not initialized"));
    }
}
