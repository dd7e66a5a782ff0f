/// Test selection and the flat numeric id namespace.
///
/// The numeric namespace is an explicit bidirectional map built once per
/// batch: positive tests occupy `[0, P)` in corpus order, negative tests
/// occupy `[P, P+N)`. Unmappable or unknown ids are soft, per-item errors -
/// the batch continues unless nothing at all survives resolution.
use std::collections::HashMap;

use crate::challenge::Challenge;
use crate::observability::StatusReporter;
use crate::types::{HarnessError, Result};

#[derive(Debug, Clone)]
pub enum TestSelection {
    /// Caller-supplied ids, order preserved.
    Explicit(Vec<String>),
    /// All positive tests in corpus order.
    Positive,
    /// All negative tests in corpus order.
    Negative,
    /// Union of both corpora: negatives first, then positives.
    All,
}

/// Bidirectional mapping between test ids and the flat numeric namespace.
#[derive(Debug, Clone)]
pub struct IndexMap {
    by_index: Vec<String>,
    by_id: HashMap<String, usize>,
}

impl IndexMap {
    pub fn build(challenge: &Challenge) -> Self {
        let mut by_index = Vec::new();
        by_index.extend(challenge.pos_ids().iter().cloned());
        by_index.extend(challenge.neg_ids().iter().cloned());
        let by_id = by_index
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect();
        Self { by_index, by_id }
    }

    pub fn id_of(&self, index: usize) -> Option<&str> {
        self.by_index.get(index).map(String::as_str)
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.by_id.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.by_index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_index.is_empty()
    }
}

/// Resolve a selection against the challenge's corpora into the ordered id
/// list the runner will execute.
pub fn resolve(
    selection: &TestSelection,
    challenge: &Challenge,
    only_numbers: bool,
    status: &StatusReporter,
) -> Result<Vec<String>> {
    let resolved = match selection {
        TestSelection::Positive => challenge.pos_ids().to_vec(),
        TestSelection::Negative => challenge.neg_ids().to_vec(),
        TestSelection::All => {
            let mut ids = challenge.neg_ids().to_vec();
            ids.extend(challenge.pos_ids().iter().cloned());
            ids
        }
        TestSelection::Explicit(ids) if only_numbers => {
            let index_map = IndexMap::build(challenge);
            let mut resolved = Vec::new();
            for raw in ids {
                let mapped = raw
                    .parse::<usize>()
                    .ok()
                    .and_then(|index| index_map.id_of(index));
                match mapped {
                    Some(id) => resolved.push(id.to_string()),
                    None => status.fail(&format!(
                        "Test {raw} could not be mapped with available tests."
                    )),
                }
            }
            resolved
        }
        TestSelection::Explicit(ids) => {
            let mut resolved = Vec::new();
            for id in ids {
                if challenge.test(id).is_ok() {
                    resolved.push(id.clone());
                } else {
                    status.fail(&format!(
                        "Test {id} could not be mapped with available tests."
                    ));
                }
            }
            resolved
        }
    };

    if resolved.is_empty() {
        status.fail("Input tests could not be mapped with available tests.");
        return Err(HarnessError::EmptySelection);
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChallengePaths;
    use std::fs;
    use std::path::PathBuf;

    fn challenge(pos: usize, neg: usize, tag: &str) -> (PathBuf, Challenge) {
        let root = std::env::temp_dir().join(format!("cbharness_sel_{}_{}", tag, std::process::id()));
        let paths = ChallengePaths {
            source: root.join("src"),
            polls: root.join("polls"),
            povs: root.join("povs"),
        };
        fs::create_dir_all(&paths.polls).unwrap();
        fs::create_dir_all(&paths.povs).unwrap();
        for i in 0..pos {
            fs::write(paths.polls.join(format!("GEN_{i:05}.xml")), "").unwrap();
        }
        for i in 0..neg {
            fs::write(paths.povs.join(format!("pov_{i}.pov")), "").unwrap();
        }
        (root.clone(), Challenge::load("Foo", paths, None))
    }

    fn quiet() -> StatusReporter {
        StatusReporter::new(false, true)
    }

    #[test]
    fn numeric_namespace_is_zero_based_positive_first() {
        let (root, challenge) = challenge(1, 1, "flat");
        let ids = resolve(
            &TestSelection::Explicit(vec!["0".to_string(), "1".to_string()]),
            &challenge,
            true,
            &quiet(),
        )
        .unwrap();
        assert_eq!(ids, ["p1", "n1"]);
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn index_map_is_bidirectional() {
        let (root, challenge) = challenge(2, 2, "bidi");
        let map = IndexMap::build(&challenge);
        assert_eq!(map.len(), 4);
        assert_eq!(map.id_of(0), Some("p1"));
        assert_eq!(map.id_of(2), Some("n1"));
        assert_eq!(map.index_of("n2"), Some(3));
        assert_eq!(map.index_of("p9"), None);
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn out_of_range_indices_are_soft_errors() {
        let (root, challenge) = challenge(1, 1, "soft");
        let ids = resolve(
            &TestSelection::Explicit(vec!["7".to_string(), "abc".to_string(), "1".to_string()]),
            &challenge,
            true,
            &quiet(),
        )
        .unwrap();
        assert_eq!(ids, ["n1"]);
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn empty_resolution_fails_the_batch() {
        let (root, challenge) = challenge(1, 0, "empty");
        let err = resolve(
            &TestSelection::Explicit(vec!["42".to_string()]),
            &challenge,
            true,
            &quiet(),
        )
        .unwrap_err();
        assert!(matches!(err, HarnessError::EmptySelection));
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn union_runs_negatives_before_positives() {
        let (root, challenge) = challenge(2, 1, "union");
        let ids = resolve(&TestSelection::All, &challenge, false, &quiet()).unwrap();
        assert_eq!(ids, ["n1", "p1", "p2"]);
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn explicit_names_preserve_caller_order() {
        let (root, challenge) = challenge(2, 1, "order");
        let ids = resolve(
            &TestSelection::Explicit(vec![
                "p2".to_string(),
                "bogus".to_string(),
                "n1".to_string(),
            ]),
            &challenge,
            false,
            &quiet(),
        )
        .unwrap();
        assert_eq!(ids, ["p2", "n1"]);
        fs::remove_dir_all(&root).unwrap();
    }
}
