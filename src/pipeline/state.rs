// src/pipeline/state.rs

use anyhow::{Context, Result};
use serde::Serialize;
use std::{
    collections::{BTreeMap, HashSet},
    fs,
    path::PathBuf,
};
use tracing::{debug, warn};

use super::output::atomic_write;

/// Row-level changes between two pipeline runs, by primary key.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DiffResult {
    pub new: Vec<String>,
    pub updated: Vec<String>,
    pub removed: Vec<String>,
}

impl DiffResult {
    pub fn has_changes(&self) -> bool {
        !(self.new.is_empty() && self.updated.is_empty() && self.removed.is_empty())
    }
}

/// Last-seen `pk → hash` per table, one JSON file per table.
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).with_context(|| format!("creating state directory {:?}", &dir))?;
        Ok(Self { dir })
    }

    fn path(&self, table: &str) -> PathBuf {
        self.dir.join(format!("{}.json", table))
    }

    fn load(&self, table: &str) -> BTreeMap<String, String> {
        let path = self.path(table);
        let Ok(text) = fs::read_to_string(&path) else {
            debug!(table, "no previous state");
            return BTreeMap::new();
        };
        serde_json::from_str(&text).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "state file malformed; treating every row as new");
            BTreeMap::new()
        })
    }

    /// Compare `rows` (pk, hash) against the stored state, then replace the
    /// stored state with `rows`.
    pub fn diff_and_update<'a, I>(&self, table: &str, rows: I) -> Result<DiffResult>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let existing = self.load(table);
        let mut diff = DiffResult::default();
        let mut current = BTreeMap::new();
        let mut seen = HashSet::new();

        for (pk, hash) in rows {
            current.insert(pk.to_string(), hash.to_string());
            if !seen.insert(pk) {
                continue;
            }
            match existing.get(pk) {
                None => diff.new.push(pk.to_string()),
                Some(old) if old != hash => diff.updated.push(pk.to_string()),
                Some(_) => {}
            }
        }
        diff.removed = existing
            .keys()
            .filter(|pk| !current.contains_key(*pk))
            .cloned()
            .collect();

        atomic_write(&self.path(table), &serde_json::to_string_pretty(&current)?)?;
        debug!(
            table,
            new = diff.new.len(),
            updated = diff.updated.len(),
            removed = diff.removed.len(),
            "diffed against state"
        );
        Ok(diff)
    }
}
