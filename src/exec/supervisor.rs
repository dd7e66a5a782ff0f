/// Supervised subprocess execution with timeout enforcement.
///
/// The supervisor never returns `Err` for a supervised process's failure:
/// non-zero exits, signals, and timeouts all ride in `RunOutput.error`, so
/// callers decide retry/exclude policy. On a deadline expiry the whole
/// descendant tree is killed before the call returns - the binaries under
/// supervision spawn challenge processes that outlive their parent.
use std::io::{BufRead, BufReader, Read};
use std::process::{Command, Stdio};
use std::sync::mpsc::{channel, Receiver, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};

use log::debug;

#[cfg(unix)]
use std::os::unix::process::ExitStatusExt;

use crate::exec::process_tree;
use crate::exec::ExecSpec;
use crate::observability::StatusReporter;
use crate::types::TIMEOUT_EXIT_CODE;

/// Captured result of one supervised run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub output: String,
    pub error: Option<String>,
    pub code: i32,
    pub timed_out: bool,
    pub duration: Duration,
}

impl RunOutput {
    pub fn failed(&self) -> bool {
        self.error.is_some()
    }

    fn spawn_failure(message: String) -> Self {
        Self {
            output: String::new(),
            error: Some(message),
            code: -1,
            timed_out: false,
            duration: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Supervisor {
    status: StatusReporter,
    exit_on_error: bool,
}

impl Supervisor {
    pub fn new(status: StatusReporter) -> Self {
        Self {
            status,
            exit_on_error: false,
        }
    }

    /// Terminate the calling process with the child's exit code when the run
    /// fails. Only top-level, non-orchestrated invocations set this.
    pub fn exit_on_error(mut self, enabled: bool) -> Self {
        self.exit_on_error = enabled;
        self
    }

    pub fn status(&self) -> &StatusReporter {
        &self.status
    }

    pub fn run(&self, spec: &ExecSpec, msg: Option<&str>) -> RunOutput {
        if let Some(msg) = msg {
            self.status.plain(msg);
            if self.status.verbose() {
                println!("{}", spec.display_line());
            }
        }
        self.status.log(&format!("Command: {}\n", spec.display_line()));

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }
        for (key, value) in &spec.env {
            command.env(key, value);
        }

        let start = Instant::now();
        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                let out = RunOutput::spawn_failure(format!(
                    "Failed to start {}: {}",
                    spec.program, e
                ));
                return self.finish(out);
            }
        };
        let pid = child.id();

        let (line_tx, line_rx) = channel();
        let stdout_handle = child.stdout.take().map(|stdout| {
            thread::spawn(move || {
                for line in BufReader::new(stdout).lines() {
                    match line {
                        Ok(line) => {
                            if line_tx.send(line).is_err() {
                                break;
                            }
                        }
                        Err(_) => break,
                    }
                }
            })
        });
        let stderr_handle = child.stderr.take().map(|stderr| {
            thread::spawn(move || {
                let mut buffer = Vec::new();
                let _ = BufReader::new(stderr).read_to_end(&mut buffer);
                buffer
            })
        });

        let mut output = String::new();
        let mut timed_out = false;
        let status = loop {
            self.drain_lines(&line_rx, &mut output);

            match child.try_wait() {
                Ok(Some(status)) => break Some(status),
                Ok(None) => {
                    if let Some(limit) = spec.timeout {
                        if start.elapsed() >= limit {
                            self.status.plain("Command timed out");
                            process_tree::kill_tree(pid);
                            timed_out = true;
                            break child.wait().ok();
                        }
                    }
                    thread::sleep(Duration::from_millis(10));
                }
                Err(e) => {
                    debug!("monitoring pid {pid} failed: {e}");
                    break child.wait().ok();
                }
            }
        };

        // Reader threads hit EOF once the child (and its tree) is gone.
        if let Some(handle) = stdout_handle {
            let _ = handle.join();
        }
        self.drain_lines(&line_rx, &mut output);
        let stderr_text = stderr_handle
            .and_then(|handle| handle.join().ok())
            .map(|buffer| String::from_utf8_lossy(&buffer).to_string())
            .unwrap_or_default();

        let duration = start.elapsed();
        let code = if timed_out {
            TIMEOUT_EXIT_CODE
        } else {
            status.map(exit_code_of).unwrap_or(TIMEOUT_EXIT_CODE)
        };

        let error = if timed_out {
            Some("Command timed out".to_string())
        } else if code != 0 {
            let text = stderr_text.trim_end();
            if text.is_empty() {
                Some(format!("Return code: {code}"))
            } else {
                Some(text.to_string())
            }
        } else {
            None
        };

        if let Some(error) = &error {
            if self.status.verbose() {
                eprintln!("{error}");
            }
            self.status.log(&format!("{error}\n"));
        }

        self.finish(RunOutput {
            output,
            error,
            code,
            timed_out,
            duration,
        })
    }

    fn drain_lines(&self, rx: &Receiver<String>, output: &mut String) {
        loop {
            match rx.try_recv() {
                Ok(line) => {
                    if self.status.verbose() {
                        println!("{line}");
                    }
                    self.status.log(&format!("{line}\n"));
                    output.push_str(&line);
                    output.push('\n');
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    fn finish(&self, out: RunOutput) -> RunOutput {
        if self.exit_on_error {
            if let Some(error) = &out.error {
                self.status.fail(error);
                std::process::exit(out.code);
            }
        }
        out
    }
}

#[cfg(unix)]
fn exit_code_of(status: std::process::ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|sig| -sig))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code_of(status: std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet() -> Supervisor {
        Supervisor::new(StatusReporter::new(false, true))
    }

    #[test]
    fn captures_stdout_of_a_clean_run() {
        let spec = ExecSpec::shell("echo one; echo two");
        let out = quiet().run(&spec, None);
        assert_eq!(out.output, "one\ntwo\n");
        assert_eq!(out.code, 0);
        assert!(out.error.is_none());
        assert!(!out.timed_out);
    }

    #[test]
    fn nonzero_exit_reports_stderr_in_the_error_slot() {
        let spec = ExecSpec::shell("echo diag >&2; exit 3");
        let out = quiet().run(&spec, None);
        assert_eq!(out.code, 3);
        assert_eq!(out.error.as_deref(), Some("diag"));
    }

    #[test]
    fn nonzero_exit_with_silent_stderr_synthesizes_a_message() {
        let spec = ExecSpec::shell("exit 7");
        let out = quiet().run(&spec, None);
        assert_eq!(out.error.as_deref(), Some("Return code: 7"));
    }

    #[test]
    fn spawn_failure_uses_the_error_slot_not_a_panic() {
        let spec = ExecSpec::new("/nonexistent/cbharness-binary");
        let out = quiet().run(&spec, None);
        assert!(out.failed());
        assert_eq!(out.code, -1);
    }

    #[test]
    fn timeout_kills_the_whole_tree() {
        let marker = format!("cbharness_tmo_{}", std::process::id());
        let spec = ExecSpec::shell(format!("sleep 300; echo {marker}"))
            .timeout(Some(Duration::from_secs(1)));
        let out = quiet().run(&spec, None);

        assert!(out.timed_out);
        assert_eq!(out.code, TIMEOUT_EXIT_CODE);
        assert_eq!(out.error.as_deref(), Some("Command timed out"));

        // Nothing carrying the marker may survive the call.
        let mut survivors = 0;
        if let Ok(entries) = std::fs::read_dir("/proc") {
            for entry in entries.flatten() {
                let path = entry.path().join("cmdline");
                if let Ok(cmdline) = std::fs::read(path) {
                    if String::from_utf8_lossy(&cmdline).contains(&marker) {
                        survivors += 1;
                    }
                }
            }
        }
        assert_eq!(survivors, 0);
    }

    #[test]
    fn cwd_and_env_are_applied() {
        let spec = ExecSpec::shell("pwd; printf '%s\\n' \"$CB_PROBE\"")
            .cwd("/tmp")
            .env("CB_PROBE", "ok");
        let out = quiet().run(&spec, None);
        let mut lines = out.output.lines();
        assert_eq!(lines.next(), Some("/tmp"));
        assert_eq!(lines.next(), Some("ok"));
    }
}
