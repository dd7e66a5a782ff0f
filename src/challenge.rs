/// Runtime view of one benchmark challenge: corpus paths plus the discovered
/// test sets. Positive tests (polls) are the `.xml` descriptors under the
/// polls corpus; negative tests (POVs) are the `.pov` descriptors under the
/// POV corpus, falling back to a freshly built working copy when no POV
/// corpus has been persisted yet.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::config::ChallengePaths;
use crate::types::{HarnessError, Result};

#[derive(Debug, Clone)]
pub struct Challenge {
    pub name: String,
    pub paths: ChallengePaths,
    /// id -> descriptor file, ids assigned `p1..pP` in corpus order.
    pos_tests: BTreeMap<String, PathBuf>,
    pos_order: Vec<String>,
    /// id -> descriptor file, ids assigned `n1..nN` in corpus order.
    neg_tests: BTreeMap<String, PathBuf>,
    neg_order: Vec<String>,
}

impl Challenge {
    pub fn load(name: &str, paths: ChallengePaths, pov_fallback: Option<&Path>) -> Self {
        let polls = sorted_files(&paths.polls, "xml");
        let povs = if dir_has_files(&paths.povs, "pov") {
            sorted_files(&paths.povs, "pov")
        } else if let Some(fallback) = pov_fallback {
            sorted_files(fallback, "pov")
        } else {
            Vec::new()
        };

        let mut pos_tests = BTreeMap::new();
        let mut pos_order = Vec::new();
        for (i, file) in polls.into_iter().enumerate() {
            let id = format!("p{}", i + 1);
            pos_order.push(id.clone());
            pos_tests.insert(id, file);
        }

        let mut neg_tests = BTreeMap::new();
        let mut neg_order = Vec::new();
        for (i, file) in povs.into_iter().enumerate() {
            let id = format!("n{}", i + 1);
            neg_order.push(id.clone());
            neg_tests.insert(id, file);
        }

        Self {
            name: name.to_string(),
            paths,
            pos_tests,
            pos_order,
            neg_tests,
            neg_order,
        }
    }

    /// Positive test ids in corpus order.
    pub fn pos_ids(&self) -> &[String] {
        &self.pos_order
    }

    /// Negative test ids in corpus order.
    pub fn neg_ids(&self) -> &[String] {
        &self.neg_order
    }

    /// Resolve a test id to its descriptor file and polarity.
    pub fn test(&self, id: &str) -> Result<(&Path, bool)> {
        if let Some(file) = self.neg_tests.get(id) {
            return Ok((file.as_path(), true));
        }
        if let Some(file) = self.pos_tests.get(id) {
            return Ok((file.as_path(), false));
        }
        Err(HarnessError::UnknownTest(id.to_string()))
    }

    pub fn is_pov(&self, id: &str) -> bool {
        self.neg_tests.contains_key(id)
    }

    /// Whether a persisted POV corpus exists on disk.
    pub fn has_persisted_povs(&self) -> bool {
        dir_has_files(&self.paths.povs, "pov")
    }
}

fn dir_has_files(dir: &Path, extension: &str) -> bool {
    !sorted_files(dir, extension).is_empty()
}

fn sorted_files(dir: &Path, extension: &str) -> Vec<PathBuf> {
    if !dir.is_dir() {
        return Vec::new();
    }
    WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| path.extension().and_then(|e| e.to_str()) == Some(extension))
        .collect()
}
