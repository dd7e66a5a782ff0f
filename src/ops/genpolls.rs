/// GenPolls: run the external poll generator for a challenge.
///
/// Poll generation is seed-driven and inherently probabilistic; the workflow
/// may call this repeatedly in its lookup loop hunting for a seed whose suite
/// passes. The actual number of descriptors on disk after the run is the
/// authoritative generated count.
use walkdir::WalkDir;

use crate::config::Configuration;
use crate::exec::{ExecSpec, Supervisor};
use crate::ops::OpOutput;

#[derive(Debug)]
pub struct GenPollsResult {
    pub op: OpOutput,
    /// Poll descriptors present in the corpus after the run.
    pub generated: usize,
}

pub fn run(
    cfg: &Configuration,
    challenge: &str,
    count: u32,
    supervisor: &Supervisor,
) -> GenPollsResult {
    let paths = cfg.lib.challenge_paths(challenge);
    if let Err(e) = std::fs::create_dir_all(&paths.polls) {
        return GenPollsResult {
            op: OpOutput::err(format!("cannot create polls dir: {e}")),
            generated: 0,
        };
    }

    let spec = ExecSpec::new(&cfg.python)
        .arg(cfg.tools.gen_polls.to_string_lossy())
        .arg("--count")
        .arg(count.to_string())
        .arg("--store_seed")
        .arg(paths.source.to_string_lossy())
        .arg(paths.polls.to_string_lossy());

    let op: OpOutput = supervisor
        .run(&spec, Some(&format!("Generating {count} polls for {challenge}")))
        .into();

    GenPollsResult {
        generated: poll_count(cfg, challenge),
        op,
    }
}

fn poll_count(cfg: &Configuration, challenge: &str) -> usize {
    let polls = cfg.lib.challenge_paths(challenge).polls;
    WalkDir::new(polls)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry.path().extension().and_then(|e| e.to_str()) == Some("xml")
        })
        .count()
}
