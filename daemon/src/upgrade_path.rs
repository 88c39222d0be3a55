//! The upgrade-path table: a read-only mapping from a source version to
//! the ordered sequence of versions that takes an appliance to its
//! target. Versions are opaque strings; the table is the only ordering
//! authority.

use crate::common::{error::Result, file};
use std::{
    collections::{HashMap, HashSet},
    path::Path,
};

#[derive(Clone, Debug, Default)]
pub struct UpgradePathTable {
    paths: HashMap<String, Vec<String>>,
}

impl UpgradePathTable {
    /// Load `config/upgrade_paths.json`. An absent file is an empty table;
    /// every device then plans to "skip".
    pub fn load(path: &Path) -> Result<Self> {
        let paths: HashMap<String, Vec<String>> =
            file::read_json_opt(path)?.unwrap_or_default();
        Ok(Self { paths })
    }

    pub fn from_map(paths: HashMap<String, Vec<String>>) -> Self {
        Self { paths }
    }

    /// Plan the hop sequence for a device at `from_version`. `None` means
    /// "skip, not in table", never an error.
    pub fn plan(&self, from_version: &str) -> Option<&[String]> {
        self.paths
            .get(from_version)
            .filter(|seq| !seq.is_empty())
            .map(|seq| seq.as_slice())
    }

    /// The final version a device at `from_version` would land on.
    pub fn target(&self, from_version: &str) -> Option<&str> {
        self.plan(from_version)
            .and_then(|seq| seq.last())
            .map(|v| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.paths.iter()
    }

    /// Table hygiene check used by `bastionctl path validate`: every
    /// sequence must be non-empty, no hop may repeat inside a sequence,
    /// and chaining table entries must never cycle back to a source.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        for (source, seq) in &self.paths {
            if seq.is_empty() {
                problems.push(format!("source {source} maps to an empty sequence"));
                continue;
            }
            let mut seen = HashSet::new();
            for hop in seq {
                if !seen.insert(hop.as_str()) {
                    problems.push(format!("source {source} repeats hop {hop}"));
                }
            }
            if seq.iter().any(|hop| hop == source) {
                problems.push(format!("source {source} appears in its own sequence"));
            }
        }

        for source in self.paths.keys() {
            let mut visited = HashSet::new();
            let mut cursor = source.as_str();
            visited.insert(cursor);
            while let Some(next) = self
                .paths
                .get(cursor)
                .and_then(|seq| seq.last())
                .map(|v| v.as_str())
            {
                if !visited.insert(next) {
                    problems.push(format!("chained paths starting at {source} form a cycle"));
                    break;
                }
                cursor = next;
            }
        }

        problems.sort();
        problems.dedup();
        problems
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(entries: &[(&str, &[&str])]) -> UpgradePathTable {
        let map = entries
            .iter()
            .map(|(k, v)| {
                (
                    k.to_string(),
                    v.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
                )
            })
            .collect();
        UpgradePathTable::from_map(map)
    }

    #[test]
    fn plan_returns_the_ordered_sequence() {
        let table = table(&[("10.0.2", &["10.1.0", "10.5.1", "11.1.0"])]);
        let plan = table.plan("10.0.2").unwrap();
        assert_eq!(plan, ["10.1.0", "10.5.1", "11.1.0"]);
        assert_eq!(table.target("10.0.2"), Some("11.1.0"));
    }

    #[test]
    fn unknown_source_is_a_skip_not_an_error() {
        let table = table(&[("10.0.2", &["11.1.0"])]);
        assert!(table.plan("9.1.0").is_none());
        assert!(table.target("9.1.0").is_none());
    }

    #[test]
    fn empty_sequence_is_treated_as_absent_and_flagged() {
        let table = table(&[("10.0.2", &[])]);
        assert!(table.plan("10.0.2").is_none());
        assert_eq!(table.validate().len(), 1);
    }

    #[test]
    fn validate_detects_cycles_across_entries() {
        let table = table(&[("a", &["b"]), ("b", &["a"])]);
        assert!(table
            .validate()
            .iter()
            .any(|p| p.contains("cycle")));
    }

    #[test]
    fn validate_accepts_a_clean_table() {
        let table = table(&[
            ("10.0.2", &["10.1.0", "10.5.1", "11.1.0"]),
            ("10.5.1", &["11.1.0"]),
        ]);
        assert!(table.validate().is_empty());
    }
}
