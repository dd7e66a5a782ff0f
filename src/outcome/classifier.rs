/// Parses one finished run's captured output into a `TestOutcome`.
///
/// The classifier always reports the raw pass/fail as observed by the test
/// driver. POV inversion is runner policy and never happens here.
///
/// Recognized driver markers, all line-oriented:
///   `# total tests passed: N` / `# total tests failed: N`  pass/fail tallies
///   `not ok ...`                                            failure diagnostics
///   `# process generated signal (pid: P, signal: S)`        signal termination
///   `pid: P`                                                challenge process ids
use crate::exec::RunOutput;

const PASSED_MARKER: &str = "total tests passed:";
const FAILED_MARKER: &str = "total tests failed:";
const NOT_OK_MARKER: &str = "not ok";
const SIGNAL_MARKER: &str = "generated signal";
const PID_MARKER: &str = "pid:";

/// Result of one executed test, as observed.
#[derive(Debug, Clone)]
pub struct TestOutcome {
    pub passed: bool,
    pub code: i32,
    pub signal: Option<i32>,
    pub is_pov: bool,
    pub error: Option<String>,
    pub duration_secs: f64,
    /// Challenge process ids harvested from the transcript, for cleanup.
    pub pids: Vec<i32>,
}

impl TestOutcome {
    pub fn is_signaled(&self) -> bool {
        self.signal.is_some()
    }

    /// Flip the pass bit. Applied exactly once, by the runner, for negative
    /// tests under the inversion policy.
    pub fn invert(&mut self) {
        self.passed = !self.passed;
    }
}

/// Classify a finished run. `expected` is the number of test cases the driver
/// was asked to run (always 1 per invocation in this harness).
pub fn classify(run: &RunOutput, is_pov: bool, expected: u32) -> TestOutcome {
    let passed_tally = tally(&run.output, PASSED_MARKER);
    let failed_tally = tally(&run.output, FAILED_MARKER);

    let passed = run.code == 0
        && failed_tally == Some(0)
        && passed_tally.map(|n| n >= expected).unwrap_or(false);

    let signal = signal_of(&run.output);
    let pids = pids_of(&run.output);

    let error = if passed {
        None
    } else {
        let not_ok: Vec<&str> = run
            .output
            .lines()
            .filter(|line| line.trim_start().starts_with(NOT_OK_MARKER))
            .map(str::trim)
            .collect();
        if !not_ok.is_empty() {
            Some(not_ok.join("\n"))
        } else if let Some(error) = &run.error {
            Some(error.clone())
        } else {
            Some(format!("Return code: {}", run.code))
        }
    };

    TestOutcome {
        passed,
        code: run.code,
        signal,
        is_pov,
        error,
        duration_secs: run.duration.as_secs_f64(),
        pids,
    }
}

/// Last `<marker> N` occurrence wins; drivers repeat the banner per phase.
fn tally(output: &str, marker: &str) -> Option<u32> {
    output
        .lines()
        .filter_map(|line| {
            let idx = line.find(marker)?;
            line[idx + marker.len()..].trim().parse::<u32>().ok()
        })
        .last()
}

fn signal_of(output: &str) -> Option<i32> {
    let line = output.lines().find(|line| line.contains(SIGNAL_MARKER))?;
    let idx = line.rfind("signal")?;
    number_after(&line[idx + "signal".len()..])
}

fn pids_of(output: &str) -> Vec<i32> {
    let mut pids = Vec::new();
    for line in output.lines() {
        let mut rest = line;
        while let Some(idx) = rest.find(PID_MARKER) {
            rest = &rest[idx + PID_MARKER.len()..];
            if let Some(pid) = number_after(rest) {
                if !pids.contains(&pid) {
                    pids.push(pid);
                }
            }
        }
    }
    pids
}

/// First integer in `text`, tolerating `: `, `(`, and whitespace prefixes.
fn number_after(text: &str) -> Option<i32> {
    let start = text.find(|c: char| c.is_ascii_digit())?;
    let digits: String = text[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn run(output: &str, code: i32) -> RunOutput {
        RunOutput {
            output: output.to_string(),
            error: if code == 0 {
                None
            } else {
                Some(format!("Return code: {code}"))
            },
            code,
            timed_out: false,
            duration: Duration::from_secs(2),
        }
    }

    #[test]
    fn clean_pass() {
        let out = classify(
            &run("# total tests passed: 1\n# total tests failed: 0\n", 0),
            false,
            1,
        );
        assert!(out.passed);
        assert!(out.error.is_none());
        assert!(out.signal.is_none());
        assert_eq!(out.duration_secs, 2.0);
    }

    #[test]
    fn failed_tally_with_not_ok_diagnostic() {
        let transcript = "not ok - recv timeout\n\
                          # total tests passed: 0\n\
                          # total tests failed: 1\n";
        let out = classify(&run(transcript, 0), false, 1);
        assert!(!out.passed);
        assert_eq!(out.error.as_deref(), Some("not ok - recv timeout"));
    }

    #[test]
    fn signal_termination_is_recognized() {
        let transcript = "# process generated signal (pid: 4242, signal: 11)\n\
                          # total tests passed: 0\n\
                          # total tests failed: 1\n";
        let out = classify(&run(transcript, 0), true, 1);
        assert!(!out.passed);
        assert_eq!(out.signal, Some(11));
        assert!(out.is_signaled());
        assert_eq!(out.pids, vec![4242]);
    }

    #[test]
    fn missing_tallies_never_pass_and_synthesize_a_diagnostic() {
        let out = classify(&run("garbage transcript\n", 0), false, 1);
        assert!(!out.passed);
        assert_eq!(out.error.as_deref(), Some("Return code: 0"));
    }

    #[test]
    fn nonzero_exit_fails_even_with_passing_tallies() {
        let transcript = "# total tests passed: 1\n# total tests failed: 0\n";
        let out = classify(&run(transcript, 2), false, 1);
        assert!(!out.passed);
        assert_eq!(out.error.as_deref(), Some("Return code: 2"));
    }

    #[test]
    fn pids_are_harvested_and_deduplicated() {
        let transcript = "# cb server pid: 100\n# process (pid: 100) pid: 200\n";
        let out = classify(&run(transcript, 1), false, 1);
        assert_eq!(out.pids, vec![100, 200]);
    }

    #[test]
    fn inversion_flips_only_the_pass_bit() {
        let mut out = classify(
            &run("# total tests passed: 1\n# total tests failed: 0\n", 0),
            true,
            1,
        );
        assert!(out.passed);
        out.invert();
        assert!(!out.passed);
        assert!(out.error.is_none());
    }

    #[test]
    fn last_tally_occurrence_wins() {
        let transcript = "# total tests passed: 0\n\
                          # total tests failed: 1\n\
                          # total tests passed: 1\n\
                          # total tests failed: 0\n";
        let out = classify(&run(transcript, 0), false, 1);
        assert!(out.passed);
    }
}
