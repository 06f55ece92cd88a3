//! Snapshot discovery and selective restore.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use mmeval_core::ParameterSet;
use ndarray::ArrayD;
use tracing::info;

use crate::{
    CheckpointError,
    snapshot::{INDEX_FILE, SNAPSHOT_EXT, SnapshotIndex, read_snapshot},
};

type NameSelector = Box<dyn Fn(&str) -> bool + Send + Sync>;
type NameRewrite = Box<dyn Fn(&str) -> String + Send + Sync>;

/// One restore source: which snapshot directory to read, which live
/// parameters it covers, and how their names map onto stored entries.
pub struct RestoreRule {
    dir: PathBuf,
    selector: NameSelector,
    rewrite: NameRewrite,
}

impl RestoreRule {
    /// Cover every live parameter, names unchanged.
    #[must_use]
    pub fn all(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            selector: Box::new(|_| true),
            rewrite: Box::new(str::to_string),
        }
    }

    /// Cover live parameters under `live_prefix` and look them up in the
    /// snapshot under `stored_prefix`. Prefixes are slash-delimited name
    /// segments.
    #[must_use]
    pub fn prefix_remap(dir: &Path, live_prefix: &str, stored_prefix: &str) -> Self {
        let live = format!("{live_prefix}/");
        let stored = format!("{stored_prefix}/");
        let selector_prefix = live.clone();
        Self {
            dir: dir.to_path_buf(),
            selector: Box::new(move |name| name.starts_with(&selector_prefix)),
            rewrite: Box::new(move |name| format!("{stored}{}", &name[live.len()..])),
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Resolve the newest snapshot file in `dir`: the one named by `index.json`
/// if present, otherwise the lexicographically greatest `*.snap` file.
pub fn latest_snapshot(dir: &Path) -> Result<PathBuf, CheckpointError> {
    let index_path = dir.join(INDEX_FILE);
    if let Ok(content) = std::fs::read_to_string(&index_path) {
        let index: SnapshotIndex = serde_json::from_str(&content)
            .map_err(|e| CheckpointError::Corrupt(index_path.clone(), format!("bad index: {e}")))?;
        let path = dir.join(format!("{}.{SNAPSHOT_EXT}", index.latest));
        if !path.is_file() {
            return Err(CheckpointError::Corrupt(
                index_path,
                format!("index names missing snapshot {}", index.latest),
            ));
        }
        return Ok(path);
    }

    let mut snapshots: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|e| CheckpointError::Io(dir.to_path_buf(), e))?
        .filter_map(std::result::Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == SNAPSHOT_EXT))
        .collect();
    snapshots.sort();
    snapshots
        .pop()
        .ok_or_else(|| CheckpointError::NoCheckpoint(dir.to_path_buf()))
}

/// Restore live parameters from the latest snapshot of each rule's directory.
///
/// Rules walk the live parameter names in sorted order: a selected live name
/// is rewritten to its stored name, which must exist in the rule's snapshot
/// with an identical shape. All rules are staged before anything is written
/// back, so on any failure the live parameter set is left untouched. Every
/// live parameter may be covered by at most one rule, and each rule must
/// cover at least one.
pub fn restore(params: &mut ParameterSet, rules: &[RestoreRule]) -> Result<(), CheckpointError> {
    let live_names: Vec<String> = params.names().map(str::to_string).collect();
    let mut staged: BTreeMap<String, ArrayD<f32>> = BTreeMap::new();

    for rule in rules {
        let snapshot_path = latest_snapshot(&rule.dir)?;
        let entries = read_snapshot(&snapshot_path)?;
        let mut selected = 0usize;

        for live_name in &live_names {
            if !(rule.selector)(live_name) {
                continue;
            }
            selected += 1;
            let stored_name = (rule.rewrite)(live_name);
            let value = entries.get(&stored_name).ok_or_else(|| {
                CheckpointError::MissingParameter {
                    name: live_name.clone(),
                    snapshot: snapshot_path.clone(),
                }
            })?;
            let expected = params.shape_of(live_name).unwrap_or(&[]);
            if expected != value.shape() {
                return Err(CheckpointError::ShapeMismatch {
                    name: live_name.clone(),
                    expected: expected.to_vec(),
                    found: value.shape().to_vec(),
                });
            }
            if staged.insert(live_name.clone(), value.clone()).is_some() {
                return Err(CheckpointError::Conflict(live_name.clone()));
            }
        }

        if selected == 0 {
            return Err(CheckpointError::EmptySelection(rule.dir.clone()));
        }
        info!(snapshot = %snapshot_path.display(), parameters = selected, "staged restore");
    }

    for (name, value) in staged {
        // Staged values already passed the shape check against the live set.
        if let Err(err) = params.assign(&name, value) {
            return Err(CheckpointError::Corrupt(
                PathBuf::new(),
                format!("staged value rejected for {name}: {err}"),
            ));
        }
    }
    Ok(())
}
