/// File-backed challenge metadata with cross-process mutual exclusion.
///
/// One JSON document maps challenge name -> record. Writes happen under an
/// advisory flock on a dedicated lock inode (document path + `.lock`) and
/// replace the document atomically via a temp-file rename, so a concurrent
/// reader never observes a partial write.
///
/// The lock covers only the write. Mutating callers must reload before an
/// exclude/include decision; the read-then-decide window is a known race
/// under concurrent multi-process runs and is reproduced deliberately -
/// see the race test in `tests/metadata_test.rs`.
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{HarnessError, Result, SanityRecord};

const LOCK_SUFFIX: &str = ".lock";

/// Persisted record for one challenge. Unknown document fields survive a
/// load/save round trip untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChallengeMeta {
    #[serde(default)]
    pub excluded: bool,
    #[serde(default)]
    pub sanity: BTreeMap<String, SanityRecord>,
    #[serde(flatten)]
    pub rest: serde_json::Map<String, Value>,
}

#[derive(Debug)]
pub struct MetadataStore {
    path: PathBuf,
    lock_path: PathBuf,
    entries: BTreeMap<String, ChallengeMeta>,
}

impl MetadataStore {
    /// Open the document at `path`. The document must already exist - an
    /// uninitialized install is a fatal configuration error.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut lock_name = path.file_name().unwrap_or_default().to_os_string();
        lock_name.push(LOCK_SUFFIX);
        let lock_path = path.with_file_name(lock_name);
        let mut store = Self {
            path,
            lock_path,
            entries: BTreeMap::new(),
        };
        store.load()?;
        Ok(store)
    }

    /// Re-read the whole document. Callers mutate state only after a fresh
    /// load to keep the stale-overwrite window as small as it can be without
    /// widening the lock.
    pub fn load(&mut self) -> Result<()> {
        let text = fs::read_to_string(&self.path).map_err(|e| {
            HarnessError::Config(format!(
                "Not initialized: cannot read {}: {}",
                self.path.display(),
                e
            ))
        })?;
        self.entries = serde_json::from_str(&text)
            .map_err(|e| HarnessError::Metadata(format!("malformed metadata document: {e}")))?;
        Ok(())
    }

    /// Serialize the full in-memory map and replace the document atomically
    /// under the advisory lock.
    pub fn save(&self) -> Result<()> {
        let serialized = serde_json::to_string_pretty(&self.entries)?;
        self.with_lock(|| {
            let tmp = self.path.with_extension(format!("tmp.{}", std::process::id()));
            {
                let mut file = File::create(&tmp)?;
                file.write_all(serialized.as_bytes())?;
                file.sync_all()?;
            }
            fs::rename(&tmp, &self.path)?;
            Ok(())
        })
    }

    /// Run `operation` while holding an exclusive flock on the lock inode.
    /// The lock file is never removed, only reused, so two processes can
    /// never hold locks on different inodes for the same document.
    fn with_lock<T>(&self, operation: impl FnOnce() -> Result<T>) -> Result<T> {
        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&self.lock_path)?;
        let rc = unsafe { libc::flock(lock_file.as_raw_fd(), libc::LOCK_EX) };
        if rc != 0 {
            return Err(HarnessError::Lock(format!(
                "flock on {} failed: {}",
                self.lock_path.display(),
                std::io::Error::last_os_error()
            )));
        }
        // flock is released when lock_file drops.
        operation()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, challenge: &str) -> Option<&ChallengeMeta> {
        self.entries.get(challenge)
    }

    pub fn has_challenge(&self, challenge: &str) -> Result<()> {
        if self.entries.contains_key(challenge) {
            Ok(())
        } else {
            Err(HarnessError::UnknownChallenge(challenge.to_string()))
        }
    }

    pub fn is_excluded(&self, challenge: &str) -> bool {
        self.entries
            .get(challenge)
            .map(|meta| meta.excluded)
            .unwrap_or(false)
    }

    /// Sorted challenge names. Excluded challenges are gated out unless the
    /// caller explicitly overrides.
    pub fn challenge_names(&self, include_excluded: bool) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, meta)| include_excluded || !meta.excluded)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Quarantine a challenge. Idempotent on state; the reason is logged on
    /// every call so the latest decision is always on record.
    pub fn exclude(&mut self, challenge: &str, reason: &str) -> Result<()> {
        self.load()?;
        self.has_challenge(challenge)?;
        if let Some(meta) = self.entries.get_mut(challenge) {
            meta.excluded = true;
        }
        self.save()?;
        warn!("Challenge {challenge} excluded: {reason}");
        Ok(())
    }

    /// Reinstate a challenge into the active set. Idempotent on state.
    pub fn include(&mut self, challenge: &str) -> Result<()> {
        self.load()?;
        self.has_challenge(challenge)?;
        if let Some(meta) = self.entries.get_mut(challenge) {
            meta.excluded = false;
        }
        self.save()?;
        info!("Challenge {challenge} included");
        Ok(())
    }

    pub fn has_sanity(&self, challenge: &str) -> bool {
        self.entries
            .get(challenge)
            .map(|meta| !meta.sanity.is_empty())
            .unwrap_or(false)
    }

    pub fn reset_sanity(&mut self, challenge: &str) -> Result<()> {
        if let Some(meta) = self.entries.get_mut(challenge) {
            meta.sanity.clear();
        }
        self.save()
    }

    /// Record the last-run outcome for one test. Persisted immediately -
    /// durability is per test, not per batch.
    pub fn update_sanity(
        &mut self,
        challenge: &str,
        test: &str,
        record: SanityRecord,
    ) -> Result<()> {
        self.has_challenge(challenge)?;
        if let Some(meta) = self.entries.get_mut(challenge) {
            meta.sanity.insert(test.to_string(), record);
        }
        self.save()
    }

    /// History-derived duration for a test, in seconds.
    ///
    /// Negative tests get twice the slowest recorded duration across the
    /// whole sanity history - an exploit's runtime varies with the seed, so
    /// its own last duration is not a safe bound. Positive tests replay
    /// deterministically and reuse their recorded duration.
    pub fn test_duration(&self, challenge: &str, test: &str, is_pov: bool) -> Option<u64> {
        let sanity = &self.entries.get(challenge)?.sanity;
        if !sanity.contains_key(test) {
            return None;
        }
        if is_pov {
            sanity.values().map(|record| record.duration).max().map(|d| d * 2)
        } else {
            sanity.get(test).map(|record| record.duration)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_doc(name: &str, content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("cbharness_{}_{}.json", name, std::process::id()));
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn open_requires_an_existing_document() {
        let missing = std::env::temp_dir().join("cbharness_missing_metadata.json");
        let err = MetadataStore::open(&missing).unwrap_err();
        assert!(err.to_string().contains("Not initialized"));
    }

    #[test]
    fn duration_rule_doubles_the_slowest_for_povs() {
        let path = scratch_doc(
            "durations",
            r#"{"Foo": {"excluded": false, "sanity": {
                "p1": {"outcome": 1, "duration": 3},
                "p2": {"outcome": 1, "duration": 7},
                "n1": {"outcome": 1, "duration": 2}
            }}}"#,
        );
        let store = MetadataStore::open(&path).unwrap();

        assert_eq!(store.test_duration("Foo", "p2", false), Some(7));
        assert_eq!(store.test_duration("Foo", "n1", true), Some(14));
        assert_eq!(store.test_duration("Foo", "n2", true), None);
        assert_eq!(store.test_duration("Bar", "p1", false), None);

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn unknown_challenge_is_a_typed_error() {
        let path = scratch_doc("unknown", r#"{}"#);
        let mut store = MetadataStore::open(&path).unwrap();
        assert!(matches!(
            store.exclude("Ghost", "broken"),
            Err(HarnessError::UnknownChallenge(_))
        ));
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn excluded_names_are_gated_unless_overridden() {
        let path = scratch_doc(
            "gating",
            r#"{"A": {"excluded": true, "sanity": {}},
                "B": {"excluded": false, "sanity": {}}}"#,
        );
        let store = MetadataStore::open(&path).unwrap();
        assert_eq!(store.challenge_names(false), vec!["B".to_string()]);
        assert_eq!(
            store.challenge_names(true),
            vec!["A".to_string(), "B".to_string()]
        );
        fs::remove_file(&path).unwrap();
    }
}
