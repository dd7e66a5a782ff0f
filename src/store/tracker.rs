/// Per-working-copy execution tracker (`.tracker`).
///
/// Scoped to one transient working copy, unlike the install-wide metadata
/// document: it lives with the checkout and dies with it. Outcome history is
/// partitioned by an execution pointer (`cid`); every fresh checkout of the
/// same working copy advances the pointer and opens a new empty partition.
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::types::{HarnessError, Result};

/// Most recent entries kept per (cid, test); older ones age out.
const HISTORY_CAP: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedOutcome {
    pub outcome: u8,
    pub code: i32,
    pub duration: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CidHistory {
    #[serde(default)]
    pub pos_tests: BTreeMap<String, Vec<TrackedOutcome>>,
    #[serde(default)]
    pub neg_tests: BTreeMap<String, Vec<TrackedOutcome>>,
}

impl CidHistory {
    fn bucket(&mut self, is_pov: bool) -> &mut BTreeMap<String, Vec<TrackedOutcome>> {
        if is_pov {
            &mut self.neg_tests
        } else {
            &mut self.pos_tests
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct TrackerDoc {
    name: String,
    ptr: u64,
    outcomes: BTreeMap<String, CidHistory>,
}

#[derive(Debug)]
pub struct Tracker {
    path: PathBuf,
    doc: TrackerDoc,
}

impl Tracker {
    pub const FILE_NAME: &'static str = ".tracker";

    fn file_path(working_dir: &Path) -> PathBuf {
        working_dir.join(Self::FILE_NAME)
    }

    /// Create the tracker for a fresh checkout. If one already exists the
    /// pointer advances and a new empty partition opens; prior history stays.
    pub fn create(working_dir: &Path, name: &str) -> Result<Self> {
        let path = Self::file_path(working_dir);
        let mut doc = match Self::read_doc(&path) {
            Ok(mut doc) => {
                doc.ptr += 1;
                doc.name = name.to_string();
                doc
            }
            Err(_) => TrackerDoc {
                name: name.to_string(),
                ptr: 0,
                outcomes: BTreeMap::new(),
            },
        };
        doc.outcomes.insert(doc.ptr.to_string(), CidHistory::default());
        let tracker = Self { path, doc };
        tracker.save()?;
        Ok(tracker)
    }

    /// Open the tracker of an existing working copy.
    pub fn open(working_dir: &Path) -> Result<Self> {
        let path = Self::file_path(working_dir);
        let doc = Self::read_doc(&path)?;
        Ok(Self { path, doc })
    }

    fn read_doc(path: &Path) -> Result<TrackerDoc> {
        let text = fs::read_to_string(path).map_err(|e| {
            HarnessError::Tracker(format!("cannot read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&text)
            .map_err(|e| HarnessError::Tracker(format!("malformed tracker {}: {}", path.display(), e)))
    }

    pub fn save(&self) -> Result<()> {
        let text = serde_json::to_string_pretty(&self.doc)?;
        fs::write(&self.path, text)?;
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.doc.name
    }

    /// Current execution pointer.
    pub fn cid(&self) -> u64 {
        self.doc.ptr
    }

    fn current(&mut self) -> &mut CidHistory {
        let key = self.doc.ptr.to_string();
        self.doc.outcomes.entry(key).or_default()
    }

    /// Make sure the current partition has a slot for `test`; persisted
    /// immediately so a crashed run still shows which test was in flight.
    pub fn ensure_test(&mut self, test: &str, is_pov: bool) -> Result<()> {
        let bucket = self.current().bucket(is_pov);
        if bucket.contains_key(test) {
            return Ok(());
        }
        bucket.insert(test.to_string(), Vec::new());
        self.save()
    }

    /// Append one outcome to the current partition.
    pub fn append(&mut self, test: &str, is_pov: bool, outcome: TrackedOutcome) -> Result<()> {
        let bucket = self.current().bucket(is_pov);
        let history = bucket.entry(test.to_string()).or_default();
        history.push(outcome);
        if history.len() > HISTORY_CAP {
            let excess = history.len() - HISTORY_CAP;
            history.drain(..excess);
        }
        self.save()
    }

    pub fn history(&self, test: &str, is_pov: bool) -> Option<&[TrackedOutcome]> {
        let partition = self.doc.outcomes.get(&self.doc.ptr.to_string())?;
        let bucket = if is_pov {
            &partition.neg_tests
        } else {
            &partition.pos_tests
        };
        bucket.get(test).map(|v| v.as_slice())
    }
}
