/// Per-challenge stage report: immediate severity-coded lines while the
/// pipeline runs, plus a compact summary block printed when the challenge
/// finishes.
use crate::observability::StatusReporter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StageState {
    Ok,
    Warn,
    Fail,
}

#[derive(Debug)]
pub struct CheckReport {
    status: StatusReporter,
    challenge: String,
    entries: Vec<(StageState, String)>,
    verdict: Option<bool>,
}

impl CheckReport {
    pub fn new(status: StatusReporter) -> Self {
        Self {
            status,
            challenge: String::new(),
            entries: Vec::new(),
            verdict: None,
        }
    }

    pub fn begin(&mut self, challenge: &str) {
        self.challenge = challenge.to_string();
        self.entries.clear();
        self.verdict = None;
        self.status.bold(&format!("Checking {challenge}"));
    }

    pub fn lookup_round(&mut self, round: u32, total: u32) {
        self.status
            .info(&format!("Lookup {round}/{total} for {}", self.challenge));
    }

    pub fn ok(&mut self, operation: &str, detail: Option<&str>) {
        let line = match detail {
            Some(detail) => format!("{operation}: ok {detail}"),
            None => format!("{operation}: ok"),
        };
        self.status.ok(&line);
        self.entries.push((StageState::Ok, line));
    }

    pub fn warn(&mut self, operation: &str, detail: &str) {
        let line = format!("{operation}: warning {detail}");
        self.status.warn(&line);
        self.entries.push((StageState::Warn, line));
    }

    pub fn fail(&mut self, operation: &str, detail: &str) {
        let line = format!("{operation}: failed {detail}");
        self.status.fail(&line);
        self.entries.push((StageState::Fail, line));
    }

    pub fn passed(&mut self) {
        self.verdict = Some(true);
    }

    pub fn failed(&mut self) {
        self.verdict = Some(false);
    }

    /// Print the summary block for the finished challenge.
    pub fn print(&self) {
        self.status.bold(&format!("=== {} ===", self.challenge));
        for (state, line) in &self.entries {
            match state {
                StageState::Ok => self.status.ok(line),
                StageState::Warn => self.status.warn(line),
                StageState::Fail => self.status.fail(line),
            }
        }
        match self.verdict {
            Some(true) => self.status.ok("PASSED"),
            Some(false) => self.status.fail("FAILED"),
            None => {}
        }
    }
}
