//! Per-batch test execution: selection, adaptive timeouts, classification,
//! the single POV inversion point, leftover-process cleanup, and per-test
//! metadata persistence.
//!
//! Tests run strictly sequentially, each to completion, in the order the
//! selection step yields. Failures local to one test never abort the batch
//! unless fail-fast was requested.

pub mod selection;

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::debug;

pub use selection::{IndexMap, TestSelection};

use crate::challenge::Challenge;
use crate::config::Configuration;
use crate::exec::command::challenge_bin_names;
use crate::exec::{process_tree, CbTestCommand, Supervisor};
use crate::observability::StatusReporter;
use crate::outcome::{classify, TestOutcome};
use crate::store::{MetadataStore, TrackedOutcome, Tracker};
use crate::types::{Result, SanityRecord};

#[derive(Debug, Clone)]
pub struct TestRunnerOptions {
    pub selection: TestSelection,
    /// Selection ids are flat numeric indices.
    pub only_numbers: bool,
    /// Invert the pass bit for negative tests ("exploit succeeded" reads as
    /// logical pass). The default operating mode.
    pub neg_pov: bool,
    /// Fail-fast after the first disqualifying result.
    pub exit_fail: bool,
    /// Persist a SanityRecord per test and reinstate the challenge when a
    /// full run passes.
    pub update: bool,
    /// Explicit per-test timeout override in seconds.
    pub timeout: Option<u64>,
    /// TCP port handed through to the driver.
    pub port: Option<String>,
    /// File receiving `<id> <pass-bit>` result lines.
    pub out_file: Option<PathBuf>,
    /// Also write failed entries to `out_file`.
    pub write_fail: bool,
    /// Echo passing test ids to stdout.
    pub print_ids: bool,
    /// Echo PASS/FAIL per test to stdout.
    pub print_class: bool,
}

impl Default for TestRunnerOptions {
    fn default() -> Self {
        Self {
            selection: TestSelection::All,
            only_numbers: false,
            neg_pov: true,
            exit_fail: false,
            update: false,
            timeout: None,
            port: None,
            out_file: None,
            write_fail: false,
            print_ids: false,
            print_class: false,
        }
    }
}

/// Aggregated batch outcome.
#[derive(Debug)]
pub struct BatchResult {
    pub results: BTreeMap<String, TestOutcome>,
    /// The batch stopped early on a fail-fast signal.
    pub halted: bool,
    neg_pov: bool,
}

impl BatchResult {
    /// Whether the batch counts as fully passing. A failing negative test is
    /// forgiven when inversion is disabled - there the true exploit failing
    /// is itself the interesting signal, not a disqualification.
    pub fn tests_pass(&self) -> bool {
        for outcome in self.results.values() {
            if !outcome.passed {
                if outcome.is_pov && !self.neg_pov {
                    continue;
                }
                return false;
            }
        }
        true
    }

    /// Failing entries, by the batch-failure criterion (pass bit down or a
    /// non-zero driver exit).
    pub fn failures(&self) -> Vec<(&str, &TestOutcome)> {
        self.results
            .iter()
            .filter(|(_, outcome)| !outcome.passed || outcome.code != 0)
            .map(|(id, outcome)| (id.as_str(), outcome))
            .collect()
    }
}

pub struct TestRunner<'a> {
    cfg: &'a Configuration,
    store: &'a mut MetadataStore,
    supervisor: Supervisor,
    status: StatusReporter,
    opts: TestRunnerOptions,
    challenge: Challenge,
    tracker: Tracker,
    build_dir: PathBuf,
    bin_names: Vec<String>,
}

impl<'a> TestRunner<'a> {
    /// Bind a runner to an existing working copy. The challenge name comes
    /// from the working copy's tracker, never from the caller.
    pub fn new(
        cfg: &'a Configuration,
        store: &'a mut MetadataStore,
        working_dir: &Path,
        opts: TestRunnerOptions,
        status: StatusReporter,
    ) -> Result<Self> {
        let tracker = Tracker::open(working_dir)?;
        let name = tracker.name().to_string();
        store.has_challenge(&name)?;

        let build_dir = working_dir.join("build").join(&name);
        let paths = cfg.lib.challenge_paths(&name);
        let challenge = Challenge::load(&name, paths, Some(&build_dir));
        let source_dir = working_dir.join(&name);
        let bin_names = challenge_bin_names(&name, &source_dir);

        Ok(Self {
            cfg,
            store,
            supervisor: Supervisor::new(status.clone()),
            status,
            opts,
            challenge,
            tracker,
            build_dir,
            bin_names,
        })
    }

    pub fn challenge(&self) -> &Challenge {
        &self.challenge
    }

    /// Run the batch. With `strict`, a fail-fast signal halts the batch and
    /// returns; without it, the fail-fast paths terminate the process (the
    /// top-level, non-orchestrated mode).
    pub fn run(&mut self, strict: bool) -> Result<BatchResult> {
        let ids = selection::resolve(
            &self.opts.selection,
            &self.challenge,
            self.opts.only_numbers,
            &self.status,
        )?;

        self.status.info(&format!("Running {} tests.", ids.len()));

        let mut batch = BatchResult {
            results: BTreeMap::new(),
            halted: false,
            neg_pov: self.opts.neg_pov,
        };

        for id in ids {
            let outcome = self.run_one(&id)?;
            let disqualifying = !outcome.passed || outcome.code != 0;
            batch.results.insert(id.clone(), outcome);

            if self.opts.exit_fail && disqualifying {
                if strict {
                    batch.halted = true;
                    break;
                }
                let outcome = &batch.results[&id];
                if !outcome.is_pov {
                    let message = outcome
                        .error
                        .clone()
                        .unwrap_or_else(|| format!("{}", outcome.code));
                    self.status.fail(&message);
                    std::process::exit(1);
                } else if !self.opts.neg_pov {
                    if let Some(error) = &outcome.error {
                        self.status.fail(error);
                    }
                    std::process::exit(1);
                }
            }
        }

        if self.opts.update
            && self.store.is_excluded(self.challenge.name.as_str())
            && batch.tests_pass()
        {
            self.store.include(&self.challenge.name)?;
            self.status
                .info(&format!("Challenge {} included.", self.challenge.name));
        }

        Ok(batch)
    }

    fn run_one(&mut self, id: &str) -> Result<TestOutcome> {
        let (test_file, is_pov) = {
            let (file, is_pov) = self.challenge.test(id)?;
            (file.to_path_buf(), is_pov)
        };
        self.tracker.ensure_test(id, is_pov)?;

        let timeout_secs = self.effective_timeout(id, is_pov);
        let command = CbTestCommand {
            python: self.cfg.python.clone(),
            driver: self.cfg.tools.test_driver.clone(),
            build_dir: self.build_dir.clone(),
            test_file: test_file.clone(),
            timeout_secs,
            bin_names: self.bin_names.clone(),
            port: self.opts.port.clone(),
            cores_path: is_pov.then(|| self.cfg.cores.clone()),
        };
        let spec = command
            .build()?
            .cwd(&self.cfg.tools.root)
            .timeout(Some(Duration::from_secs(timeout_secs)));

        let message = format!(
            "Testing {} on {}",
            self.challenge.name,
            test_file
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default()
        );
        let run = self.supervisor.run(&spec, Some(&message));
        if let Some(error) = &run.error {
            self.status.fail(error);
        }

        let mut outcome = classify(&run, is_pov, 1);
        debug!(
            "{} {}: raw passed={} code={} signal={:?}",
            self.challenge.name, id, outcome.passed, outcome.code, outcome.signal
        );

        // The one and only inversion point. A timeout is the supervisor's
        // sentinel, not the driver observing the exploit, so it is never
        // inverted into a logical pass.
        if is_pov && self.opts.neg_pov && !run.timed_out {
            outcome.invert();
        }

        self.reap_leftovers(&outcome);
        self.record(id, &outcome)?;
        self.echo(id, &outcome);

        Ok(outcome)
    }

    /// Explicit override, else history-derived duration plus margin, else the
    /// configured default.
    fn effective_timeout(&self, id: &str, is_pov: bool) -> u64 {
        if let Some(timeout) = self.opts.timeout {
            return timeout;
        }
        match self
            .store
            .test_duration(&self.challenge.name, id, is_pov)
        {
            Some(duration) => duration + self.cfg.margin,
            None => self.cfg.tests_timeout,
        }
    }

    /// Exploited binaries leave orphaned children behind; when a failure is
    /// not explained by a captured signal, hunt them down by name and by the
    /// pids the driver reported, so nothing survives into the next test.
    fn reap_leftovers(&self, outcome: &TestOutcome) {
        let Some(error) = &outcome.error else {
            return;
        };
        if outcome.is_signaled() {
            return;
        }
        self.status.fail(error);
        self.status
            .bold(&format!("Killing {} process.", self.challenge.name));
        let killed = process_tree::kill_by_name(&self.challenge.name, &outcome.pids);
        if !killed.is_empty() {
            self.status.bold(&format!("Killed processes {killed:?}."));
        }
    }

    fn record(&mut self, id: &str, outcome: &TestOutcome) -> Result<()> {
        let duration = outcome.duration_secs as u64;
        self.tracker.append(
            id,
            outcome.is_pov,
            TrackedOutcome {
                outcome: outcome.passed as u8,
                code: outcome.code,
                duration,
            },
        )?;

        if self.opts.update {
            let error = (outcome.error.is_some() && outcome.code != 0).then_some(outcome.code);
            let signal = outcome
                .signal
                .filter(|&sig| sig != 0 && !outcome.is_pov);
            self.store.update_sanity(
                &self.challenge.name,
                id,
                SanityRecord {
                    outcome: outcome.passed as u8,
                    duration,
                    error,
                    signal,
                },
            )?;
        }
        Ok(())
    }

    fn echo(&self, id: &str, outcome: &TestOutcome) {
        if self.opts.print_ids && outcome.passed {
            if self.opts.only_numbers {
                if let Some(index) = IndexMap::build(&self.challenge).index_of(id) {
                    println!("{index}");
                }
            } else {
                println!("{id}");
            }
        }
        if self.opts.print_class {
            println!("{}", if outcome.passed { "PASS" } else { "FAIL" });
        }

        if let Some(out_file) = &self.opts.out_file {
            if outcome.passed || self.opts.write_fail {
                let line = format!("{id} {}\n", outcome.passed as u8);
                let write = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(out_file)
                    .and_then(|mut f| f.write_all(line.as_bytes()));
                if let Err(e) = write {
                    self.status
                        .warn(&format!("could not write {}: {}", out_file.display(), e));
                }
            }
        }
    }
}
