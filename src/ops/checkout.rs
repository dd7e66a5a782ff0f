/// Checkout: materialize a challenge working copy.
///
/// Copies the challenge source corpus into `working_dir/<name>`, lays out the
/// build skeleton, and creates (or advances) the working copy's execution
/// tracker - each checkout opens a fresh cid partition.
use std::fs;
use std::path::Path;

use walkdir::WalkDir;

use crate::config::Configuration;
use crate::ops::OpOutput;
use crate::store::Tracker;

pub fn run(cfg: &Configuration, challenge: &str, working_dir: &Path) -> OpOutput {
    let source = cfg.lib.challenges.join(challenge);
    if !source.is_dir() {
        return OpOutput::err(format!(
            "challenge source {} does not exist",
            source.display()
        ));
    }

    let dest = working_dir.join(challenge);
    if let Err(e) = copy_tree(&source, &dest) {
        return OpOutput::err(format!("checkout copy failed: {e}"));
    }

    let build_dir = working_dir.join("build").join(challenge);
    if let Err(e) = fs::create_dir_all(&build_dir) {
        return OpOutput::err(format!("cannot create build dir: {e}"));
    }

    match Tracker::create(working_dir, challenge) {
        Ok(tracker) => OpOutput::ok(format!(
            "Checked out {} into {} (cid {})",
            challenge,
            working_dir.display(),
            tracker.cid()
        )),
        Err(e) => OpOutput::err(format!("cannot create tracker: {e}")),
    }
}

fn copy_tree(source: &Path, dest: &Path) -> std::io::Result<()> {
    for entry in WalkDir::new(source).into_iter().filter_map(|e| e.ok()) {
        let relative = entry
            .path()
            .strip_prefix(source)
            .expect("walked path is under its root");
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn install(tag: &str) -> (PathBuf, Configuration) {
        let root = std::env::temp_dir().join(format!("cbharness_co_{}_{}", tag, std::process::id()));
        let cfg = Configuration::new(&root);
        fs::create_dir_all(cfg.lib.challenges.join("Foo").join("src")).unwrap();
        fs::write(cfg.lib.challenges.join("Foo").join("src").join("main.c"), "int main;").unwrap();
        (root, cfg)
    }

    #[test]
    fn checkout_copies_source_and_creates_tracker() {
        let (root, cfg) = install("basic");
        let wd = root.join("wd");
        fs::create_dir_all(&wd).unwrap();

        let out = run(&cfg, "Foo", &wd);
        assert!(!out.failed(), "{:?}", out.error);
        assert!(wd.join("Foo").join("src").join("main.c").is_file());
        assert!(wd.join("build").join("Foo").is_dir());

        let tracker = Tracker::open(&wd).unwrap();
        assert_eq!(tracker.name(), "Foo");
        assert_eq!(tracker.cid(), 0);

        // A second checkout advances the partition.
        let out = run(&cfg, "Foo", &wd);
        assert!(!out.failed());
        assert_eq!(Tracker::open(&wd).unwrap().cid(), 1);

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn missing_source_reports_through_the_error_slot() {
        let (root, cfg) = install("missing");
        let wd = root.join("wd");
        fs::create_dir_all(&wd).unwrap();
        let out = run(&cfg, "Ghost", &wd);
        assert!(out.failed());
        fs::remove_dir_all(&root).unwrap();
    }
}
