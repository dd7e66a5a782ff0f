/// Shared type definitions and the crate-wide error taxonomy.
///
/// Expected test/process failures never travel through `HarnessError` - they
/// ride in `exec::RunOutput`'s error slot and in `outcome::TestOutcome`, so
/// callers decide retry/exclude policy. `HarnessError` is reserved for the
/// small fixed set of fatal conditions that abort the current unit of work
/// (one test, one challenge), never the whole run.
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sentinel exit code reported when the supervisor had to kill a run that
/// outlived its deadline. Distinguishable from any natural exit status.
pub const TIMEOUT_EXIT_CODE: i32 = -3;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("No {0} challenge")]
    UnknownChallenge(String),

    #[error("Challenge {0} was excluded")]
    ExcludedChallenge(String),

    #[error("Test {0} not found")]
    UnknownTest(String),

    #[error("Input tests could not be mapped with available tests")]
    EmptySelection,

    #[error("Tracker error: {0}")]
    Tracker(String),
}

pub type Result<T> = std::result::Result<T, HarnessError>;

/// One historical sanity entry for a (challenge, test) pair.
///
/// `outcome` is 0/1 rather than bool to match the persisted document format;
/// `error` and `signal` are present only when the run produced them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SanityRecord {
    pub outcome: u8,
    pub duration: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<i32>,
}

impl SanityRecord {
    pub fn passed(&self) -> bool {
        self.outcome != 0
    }
}
