/// Compile: invoke the external build tool-chain for a working copy.
///
/// The heavy lifting lives in the install's build script; this operation only
/// builds the typed invocation and relays the supervisor's result. `coverage`
/// switches the script to the gcov-instrumented profile.
use std::path::{Path, PathBuf};

use crate::config::Configuration;
use crate::exec::{BuildCommand, Supervisor};
use crate::ops::OpOutput;

pub fn run(
    cfg: &Configuration,
    challenge: &str,
    working_dir: &Path,
    coverage: bool,
    inst_files: Vec<PathBuf>,
    fix_files: Vec<PathBuf>,
    supervisor: &Supervisor,
) -> OpOutput {
    let command = BuildCommand {
        script: cfg.tools.build_script.clone(),
        working_dir: working_dir.to_path_buf(),
        challenge: challenge.to_string(),
        coverage,
        inst_files,
        fix_files,
    };
    let spec = match command.build() {
        Ok(spec) => spec,
        Err(e) => return OpOutput::err(e.to_string()),
    };
    supervisor
        .run(&spec, Some(&format!("Compiling {challenge}")))
        .into()
}
