//! cbharness: a benchmark harness for security-challenge binaries.
//!
//! Runs proof-of-vulnerability (POV) and functional (poll) tests against
//! compiled challenges, tracks per-challenge pass/fail history, and decides
//! whether a challenge stays in the active benchmark set or is quarantined as
//! flaky/broken.
//!
//! # Architecture
//!
//! ## Execution ([`exec`])
//! - [`exec::supervisor`]: supervised subprocess runs with timeout watchdog
//! - [`exec::process_tree`]: process-tree termination and leftover hunting
//! - [`exec::command`]: typed command builders for the external tools
//!
//! ## Classification ([`outcome`])
//! - [`outcome::classifier`]: raw driver output -> structured `TestOutcome`
//!
//! ## State ([`store`])
//! - [`store::metadata`]: flock-guarded install-wide challenge metadata
//! - [`store::tracker`]: per-working-copy, cid-partitioned outcome history
//!
//! ## Orchestration
//! - [`runner`]: per-batch test execution state machine
//! - [`sanity`]: staged checkout/compile/test pipeline with the lookup loop
//! - [`ops`]: external collaborator operations (checkout, compile, genpolls)
//!
//! ## Surface
//! - [`cli`]: clap subcommand wiring shared by the `cbharness` binary
//! - [`config`]: install-rooted configuration and validation
//! - [`observability`]: status lines and per-run log mirroring
//!
//! # Design principles
//!
//! 1. Expected failures are values, not errors - supervised process failures
//!    travel in result slots so callers own retry/exclude policy.
//! 2. Nothing survives a timeout - the whole descendant tree dies before the
//!    supervisor returns.
//! 3. The metadata document is the only cross-process shared state, and every
//!    write replaces it atomically under an advisory lock.

pub mod challenge;
pub mod cli;
pub mod config;
pub mod exec;
pub mod observability;
pub mod ops;
pub mod outcome;
pub mod runner;
pub mod sanity;
pub mod store;
pub mod types;

pub use types::{HarnessError, Result};
