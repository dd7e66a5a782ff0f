//! The sanity-check workflow: per challenge, drive the staged pipeline
//! `GenPolls?(optional) -> Checkout -> Compile -> Test`, persist exclusion
//! decisions, archive newly validated POVs, and clean the working copy up.
//!
//! The lookup loop is the alternate path for seed-driven poll generation:
//! Checkout and Compile run once up front, then up to `lookup` rounds of
//! `GenPolls -> Test` hunt for a seed whose suite passes, stopping on the
//! first fully-passing round. Exclusion under `persistent` is suppressed for
//! every round but the last.

pub mod coverage;
pub mod report;

use std::fs;
use std::path::Path;

use log::{error, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::challenge::Challenge;
use crate::config::Configuration;
use crate::exec::Supervisor;
use crate::observability::StatusReporter;
use crate::ops::{checkout, compile, genpolls};
use crate::runner::{TestRunner, TestRunnerOptions, TestSelection};
use crate::store::MetadataStore;
use crate::types::Result;

use report::CheckReport;

#[derive(Debug, Clone)]
pub struct SanityOptions {
    /// Explicit per-test timeout override in seconds.
    pub timeout: Option<u64>,
    /// Run poll generation as the first stage.
    pub genpolls: bool,
    /// Persist outcomes and exclusion decisions into the metadata document.
    pub persistent: bool,
    /// Downgrade generator assertion failures to warnings.
    pub suppress_assertion: bool,
    /// Polls to generate per GenPolls stage.
    pub count: u32,
    /// Retain the working copy (also on the error path, for postmortem).
    pub keep: bool,
    /// Stop the test stage at the first failure.
    pub strict: bool,
    /// Bounded lookup rounds; implies the lookup path when `genpolls` is set.
    pub lookup: Option<u32>,
    /// Test only the negative corpus.
    pub povs: bool,
    /// Build instrumented and capture coverage diagnostics.
    pub coverage: bool,
}

impl Default for SanityOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            genpolls: false,
            persistent: false,
            suppress_assertion: false,
            count: 10,
            keep: false,
            strict: false,
            lookup: None,
            povs: false,
            coverage: false,
        }
    }
}

pub struct SanityWorkflow<'a> {
    cfg: &'a Configuration,
    store: &'a mut MetadataStore,
    opts: SanityOptions,
    status: StatusReporter,
}

impl<'a> SanityWorkflow<'a> {
    pub fn new(
        cfg: &'a Configuration,
        store: &'a mut MetadataStore,
        opts: SanityOptions,
        status: StatusReporter,
    ) -> Self {
        Self {
            cfg,
            store,
            opts,
            status,
        }
    }

    /// Check every named challenge, or the whole non-excluded set when no
    /// names are given. One broken challenge never aborts the outer loop.
    pub fn run(&mut self, challenges: Vec<String>) -> Result<()> {
        let names = if challenges.is_empty() {
            self.store.challenge_names(false)
        } else {
            let mut names = challenges;
            for name in &names {
                self.store.has_challenge(name)?;
            }
            names.sort();
            names
        };

        let run_id = Uuid::new_v4();
        info!("sanity run {run_id} over {} challenge(s)", names.len());

        for name in names {
            if let Err(e) = self.run_challenge(&name) {
                self.status.fail(&format!(
                    "The following error was raised for the challenge {name}"
                ));
                self.status.fail(&e.to_string());
                error!("sanity for {name} aborted: {e}");
            }
        }
        Ok(())
    }

    fn run_challenge(&mut self, name: &str) -> Result<bool> {
        let working_dir = self.cfg.working_dir(name);
        fs::create_dir_all(&working_dir)?;
        self.status.set_log_file(Some(working_dir.join("check.log")));

        let mut report = CheckReport::new(self.status.clone());
        report.begin(name);

        let result = match self.opts.lookup.filter(|_| self.opts.genpolls) {
            Some(rounds) => self.lookup(name, &working_dir, &mut report, rounds),
            None => self.check(name, &working_dir, &mut report),
        };

        report.print();

        // Disposal runs on the error path too, unless retention was asked
        // for.
        if self.opts.keep {
            self.status.info(&format!(
                "Keeping working directory {}",
                working_dir.display()
            ));
            self.status.set_log_file(None);
        } else {
            self.dispose(&working_dir);
        }

        result
    }

    fn check(&mut self, name: &str, working_dir: &Path, report: &mut CheckReport) -> Result<bool> {
        if self.opts.genpolls && !self.stage_genpolls(name, false, report)? {
            report.failed();
            return Ok(false);
        }
        if !self.stage_checkout(name, working_dir, report) {
            report.failed();
            return Ok(false);
        }
        if !self.stage_compile(name, working_dir, report) {
            report.failed();
            return Ok(false);
        }
        if !self.stage_test(name, working_dir, false, report)? {
            report.failed();
            return Ok(false);
        }
        report.passed();
        Ok(true)
    }

    fn lookup(
        &mut self,
        name: &str,
        working_dir: &Path,
        report: &mut CheckReport,
        rounds: u32,
    ) -> Result<bool> {
        if !self.stage_checkout(name, working_dir, report) {
            report.failed();
            return Ok(false);
        }
        if !self.stage_compile(name, working_dir, report) {
            report.failed();
            return Ok(false);
        }

        for round in 1..=rounds {
            report.lookup_round(round, rounds);
            let nonfinal = round < rounds;
            if self.stage_genpolls(name, nonfinal, report)?
                && self.stage_test(name, working_dir, nonfinal, report)?
            {
                report.passed();
                return Ok(true);
            }
        }
        report.failed();
        Ok(false)
    }

    /// `suppressed_exclusion` marks a non-final lookup round, where a failure
    /// is retried instead of quarantining the challenge.
    fn stage_genpolls(
        &mut self,
        name: &str,
        suppressed_exclusion: bool,
        report: &mut CheckReport,
    ) -> Result<bool> {
        let supervisor = Supervisor::new(self.status.clone());
        let result = genpolls::run(self.cfg, name, self.opts.count, &supervisor);

        if let Some(err) = &result.op.error {
            if self.opts.suppress_assertion && err.contains("AssertionError") {
                report.warn("Genpolls", err);
                return Ok(true);
            }
            report.fail("Genpolls", err);
            if self.opts.persistent && !suppressed_exclusion {
                self.store.exclude(name, "generating polls failed")?;
                self.status
                    .warn(&format!("Challenge {name} excluded: generating polls failed"));
            }
            return Ok(false);
        }

        report.ok("Genpolls", Some(&format!("(generated {} polls)", result.generated)));
        Ok(true)
    }

    fn stage_checkout(&mut self, name: &str, working_dir: &Path, report: &mut CheckReport) -> bool {
        let out = checkout::run(self.cfg, name, working_dir);
        match &out.error {
            Some(err) => {
                report.fail("Checkout", err);
                false
            }
            None => {
                report.ok("Checkout", None);
                true
            }
        }
    }

    fn stage_compile(&mut self, name: &str, working_dir: &Path, report: &mut CheckReport) -> bool {
        let supervisor = Supervisor::new(self.status.clone());
        let out = compile::run(
            self.cfg,
            name,
            working_dir,
            self.opts.coverage,
            Vec::new(),
            Vec::new(),
            &supervisor,
        );
        match &out.error {
            Some(err) => {
                report.fail("Compile", err);
                false
            }
            None => {
                report.ok("Compile", None);
                true
            }
        }
    }

    fn stage_test(
        &mut self,
        name: &str,
        working_dir: &Path,
        suppressed_exclusion: bool,
        report: &mut CheckReport,
    ) -> Result<bool> {
        self.status.info(&format!(
            "Testing with timeout {}.",
            self.opts.timeout.unwrap_or(self.cfg.tests_timeout)
        ));

        let run_opts = TestRunnerOptions {
            selection: if self.opts.povs {
                TestSelection::Negative
            } else {
                TestSelection::All
            },
            exit_fail: self.opts.strict,
            update: self.opts.persistent,
            timeout: self.opts.timeout,
            ..Default::default()
        };

        let (batch, challenge) = {
            let mut runner = TestRunner::new(
                self.cfg,
                self.store,
                working_dir,
                run_opts,
                self.status.clone(),
            )?;
            let batch = runner.run(true)?;
            let challenge = runner.challenge().clone();
            (batch, challenge)
        };

        let mut fails = Vec::new();
        let mut passing = Vec::new();
        let mut pos_fails = Vec::new();
        let mut neg_fails = Vec::new();

        for (id, outcome) in &batch.results {
            self.status.log(&format!("{name} {id};\n"));
            if !outcome.passed || outcome.code != 0 {
                fails.push(format!("{id} {}", outcome.passed as u8));
                if outcome.is_pov {
                    neg_fails.push(id.clone());
                    self.diagnose_pov_failure(name, id, outcome, working_dir);
                } else {
                    pos_fails.push(id.clone());
                }
            } else {
                passing.push(format!("{id} {}", outcome.passed as u8));
            }
        }

        if batch.results.is_empty() || !fails.is_empty() {
            report.fail("Test", &fails.join(", "));
            if !passing.is_empty() {
                report.ok("Test", Some(&passing.join(", ")));
            }
            if self.opts.persistent && !suppressed_exclusion {
                let msg = if !neg_fails.is_empty() {
                    format!("POVs {neg_fails:?} not working properly")
                } else {
                    format!("Polls {pos_fails:?} not working properly")
                };
                self.store.exclude(name, &msg)?;
                self.status.warn(&format!("Challenge {name} excluded: {msg}"));
            }
            return Ok(false);
        }

        // The only path by which new exploits enter the persisted benchmark:
        // a fully-passing test stage with no POV corpus on disk yet.
        if !challenge.has_persisted_povs() {
            self.archive_povs(&challenge, &working_dir.join("build").join(name))?;
        }

        report.ok("Test", None);
        Ok(true)
    }

    /// Best-effort triage for a failed exploit: a captured signal explains
    /// itself; otherwise the coverage counters show which lines the exploit
    /// actually reached.
    fn diagnose_pov_failure(
        &self,
        name: &str,
        id: &str,
        outcome: &crate::outcome::TestOutcome,
        working_dir: &Path,
    ) {
        if outcome.is_signaled() {
            if let Some(err) = &outcome.error {
                self.status.log(&format!("{name} {id}: {err}\n"));
            }
            return;
        }
        let build_dir = working_dir.join("build").join(name);
        let supervisor = Supervisor::new(self.status.clone());
        let executed = coverage::extract(&build_dir, &supervisor);
        for (file, hits) in executed {
            self.status
                .log(&format!("{name} {id} gcov {file}: {} executed lines\n", hits.len()));
            for hit in hits {
                self.status
                    .log(&format!("  {}: {}: {}\n", hit.count, hit.line, hit.source));
            }
        }
    }

    fn archive_povs(&mut self, challenge: &Challenge, build_dir: &Path) -> Result<()> {
        fs::create_dir_all(&challenge.paths.povs)?;
        self.status.plain("Saving povs.");

        let mut archived = 0usize;
        for entry in WalkDir::new(build_dir).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("pov") {
                continue;
            }
            let Some(file_name) = path.file_name() else {
                continue;
            };
            fs::copy(path, challenge.paths.povs.join(file_name))?;
            archived += 1;
        }
        info!("archived {archived} POV(s) for {}", challenge.name);
        Ok(())
    }

    fn dispose(&mut self, working_dir: &Path) {
        // The transcript lives inside the directory being removed.
        self.status.set_log_file(None);
        match fs::remove_dir_all(working_dir) {
            Ok(()) => self.status.bold("Deleted temporary files generated"),
            Err(e) => warn!("cannot remove {}: {}", working_dir.display(), e),
        }
    }
}
