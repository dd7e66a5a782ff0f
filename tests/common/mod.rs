//! Shared fixture: a miniature install root with a fake tool-chain.
//!
//! The legacy python driver and generator are stood in for by shell scripts
//! (the configuration's interpreter is pointed at `sh`), so the harness can
//! be exercised end-to-end without the real CGC tooling.
#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use cbharness::config::Configuration;
use cbharness::observability::StatusReporter;
use cbharness::ops::checkout;

pub const CHALLENGE: &str = "Foo";

pub struct Install {
    pub root: PathBuf,
    pub cfg: Configuration,
}

impl Drop for Install {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.root);
    }
}

/// Driver that passes polls and reports a raw failure (exit 1) for POVs -
/// the shape of a working exploit.
pub const DRIVER_EXPLOITS_WORK: &str = r##"
xml=""
prev=""
for a in "$@"; do
  [ "$prev" = "--xml" ] && xml="$a"
  prev="$a"
done
case "$xml" in
  *.pov)
    echo "not ok - exploit triggered"
    echo "# total tests passed: 0"
    echo "# total tests failed: 1"
    exit 1
    ;;
  *)
    echo "# total tests passed: 1"
    echo "# total tests failed: 0"
    exit 0
    ;;
esac
"##;

/// Driver that reports every test as passing.
pub const DRIVER_PASS_ALL: &str = r##"
echo "# total tests passed: 1"
echo "# total tests failed: 0"
exit 0
"##;

/// Driver that reports every test as failing.
pub const DRIVER_FAIL_ALL: &str = r##"
echo "not ok - nothing works"
echo "# total tests passed: 0"
echo "# total tests failed: 1"
exit 1
"##;

/// Driver that hangs forever on POVs and passes polls.
pub const DRIVER_HANGING_POVS: &str = r##"
xml=""
prev=""
for a in "$@"; do
  [ "$prev" = "--xml" ] && xml="$a"
  prev="$a"
done
case "$xml" in
  *.pov) sleep 300 ;;
esac
echo "# total tests passed: 1"
echo "# total tests failed: 0"
exit 0
"##;

pub fn install(tag: &str) -> Install {
    let root = std::env::temp_dir().join(format!("cbharness_it_{}_{}", tag, std::process::id()));
    let _ = fs::remove_dir_all(&root);

    let mut cfg = Configuration::new(&root);
    cfg.python = "sh".to_string();
    cfg.working_root = root.join("work");
    cfg.cores = root.join("cores");

    fs::create_dir_all(cfg.lib.challenges.join(CHALLENGE).join("src")).unwrap();
    fs::create_dir_all(cfg.lib.polls.join(CHALLENGE).join("poller")).unwrap();
    fs::create_dir_all(&cfg.tools.root).unwrap();
    fs::create_dir_all(cfg.tools.gen_polls.parent().unwrap()).unwrap();
    fs::create_dir_all(&cfg.working_root).unwrap();
    fs::create_dir_all(&cfg.cores).unwrap();

    fs::write(
        cfg.lib.challenges.join(CHALLENGE).join("src").join("main.c"),
        "int main(void) { return 0; }\n",
    )
    .unwrap();

    write_metadata(&cfg, &format!(r#"{{"{CHALLENGE}": {{"excluded": false, "sanity": {{}}}}}}"#));
    write_executable(&cfg.tools.build_script, "#!/bin/sh\nexit 0\n");
    write_driver_body(&cfg, DRIVER_EXPLOITS_WORK);
    fs::write(&cfg.tools.gen_polls, "echo generator stub\n").unwrap();

    Install { root, cfg }
}

pub fn write_metadata(cfg: &Configuration, json: &str) {
    fs::write(&cfg.metadata, json).unwrap();
}

/// Replace the fake driver's body (interpreted by `sh`).
pub fn write_driver_body(cfg: &Configuration, body: &str) {
    fs::write(&cfg.tools.test_driver, body).unwrap();
}

pub fn write_executable(path: &Path, content: &str) {
    fs::write(path, content).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
    }
}

pub fn add_poll(cfg: &Configuration, name: &str) {
    let polls = cfg.lib.polls.join(CHALLENGE).join("poller");
    fs::write(polls.join(format!("{name}.xml")), "<poll/>\n").unwrap();
}

pub fn add_pov(cfg: &Configuration, name: &str) {
    let povs = cfg.lib.povs.join(CHALLENGE);
    fs::create_dir_all(&povs).unwrap();
    fs::write(povs.join(format!("{name}.pov")), "pov\n").unwrap();
}

/// Materialize a working copy the way the checkout operation does.
pub fn checked_out_working_dir(cfg: &Configuration, tag: &str) -> PathBuf {
    let wd = cfg.working_root.join(format!("wd_{tag}"));
    fs::create_dir_all(&wd).unwrap();
    let out = checkout::run(cfg, CHALLENGE, &wd);
    assert!(out.error.is_none(), "checkout failed: {:?}", out.error);
    wd
}

pub fn quiet() -> StatusReporter {
    StatusReporter::new(false, true)
}
