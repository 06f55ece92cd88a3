//! Dataset access by split.

use std::{collections::BTreeMap, path::Path, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{DataError, shard::Shard};

/// Name of the id-to-class mapping file written by the converter.
pub const LABEL_FILE: &str = "labels.txt";

/// Which part of the dataset to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Train,
    Validation,
}

impl Split {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Validation => "validation",
        }
    }
}

impl FromStr for Split {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "train" => Ok(Self::Train),
            "validation" => Ok(Self::Validation),
            other => Err(DataError::InvalidSplit(other.to_string())),
        }
    }
}

impl std::fmt::Display for Split {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable description of a bound dataset, owned by the harness for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatasetDescriptor {
    pub sample_count: usize,
    pub feature_len: usize,
    pub split: Split,
}

/// All shards of one split, opened and indexed as a single dataset.
#[derive(Debug)]
pub struct RecordDataset {
    shards: Vec<Shard>,
    /// Cumulative record count before each shard.
    offsets: Vec<usize>,
    sample_count: usize,
    feature_len: usize,
    split: Split,
}

impl RecordDataset {
    /// Open every `{split}_*.rec` shard in `dir`, in name order.
    pub fn open(dir: &Path, split: Split) -> Result<Self, DataError> {
        if !dir.is_dir() {
            return Err(DataError::SourceMissing(dir.to_path_buf()));
        }

        let prefix = format!("{split}_");
        let mut shard_paths: Vec<_> = std::fs::read_dir(dir)
            .map_err(|e| DataError::Io(dir.to_path_buf(), e))?
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(&prefix) && n.ends_with(".rec"))
            })
            .collect();
        shard_paths.sort();

        if shard_paths.is_empty() {
            return Err(DataError::NoShards {
                dir: dir.to_path_buf(),
                split,
            });
        }

        let mut shards = Vec::with_capacity(shard_paths.len());
        let mut offsets = Vec::with_capacity(shard_paths.len());
        let mut sample_count = 0;
        let mut feature_len = None;

        for path in &shard_paths {
            let shard = Shard::open(path)?;
            match feature_len {
                None => feature_len = Some(shard.feature_len()),
                Some(len) if len != shard.feature_len() => {
                    return Err(DataError::InconsistentShards {
                        dir: dir.to_path_buf(),
                        detail: format!(
                            "{} has feature_len {}, expected {len}",
                            path.display(),
                            shard.feature_len()
                        ),
                    });
                }
                Some(_) => {}
            }
            offsets.push(sample_count);
            sample_count += shard.num_records();
            shards.push(shard);
        }

        Ok(Self {
            shards,
            offsets,
            sample_count,
            feature_len: feature_len.unwrap_or(0),
            split,
        })
    }

    #[must_use]
    pub fn descriptor(&self) -> DatasetDescriptor {
        DatasetDescriptor {
            sample_count: self.sample_count,
            feature_len: self.feature_len,
            split: self.split,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sample_count
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sample_count == 0
    }

    #[must_use]
    pub fn feature_len(&self) -> usize {
        self.feature_len
    }

    #[must_use]
    pub fn split(&self) -> Split {
        self.split
    }

    /// Feature slice and label of the record at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<(&[f32], u32)> {
        if index >= self.sample_count {
            return None;
        }
        let shard_idx = self.offsets.partition_point(|&o| o <= index) - 1;
        let local = index - self.offsets[shard_idx];
        let shard = &self.shards[shard_idx];
        Some((shard.features(local)?, shard.label(local)?))
    }
}

/// Read `labels.txt` (`id:class` per line) from a dataset directory.
pub fn read_label_file(dir: &Path) -> Result<BTreeMap<u32, String>, DataError> {
    let path = dir.join(LABEL_FILE);
    let content = std::fs::read_to_string(&path).map_err(|e| DataError::Io(path.clone(), e))?;
    let mut labels = BTreeMap::new();
    for line in content.lines().filter(|l| !l.is_empty()) {
        let (id, name) = line.split_once(':').ok_or_else(|| {
            DataError::Malformed(path.clone(), format!("bad label line: {line}"))
        })?;
        let id = id
            .parse()
            .map_err(|_| DataError::Malformed(path.clone(), format!("bad label id: {id}")))?;
        labels.insert(id, name.to_string());
    }
    Ok(labels)
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::shard::{RawSample, shard_file_name, write_shard};

    fn write_split(dir: &Path, split: Split, per_shard: &[usize], feature_len: usize) {
        let num_shards = per_shard.len();
        let mut next = 0u32;
        for (shard_id, &count) in per_shard.iter().enumerate() {
            let samples: Vec<_> = (0..count)
                .map(|_| {
                    let label = next;
                    next += 1;
                    RawSample {
                        features: vec![label as f32; feature_len],
                        label,
                    }
                })
                .collect();
            let path = dir.join(shard_file_name(split, shard_id, num_shards));
            write_shard(&path, feature_len, &samples).unwrap();
        }
    }

    #[test]
    fn test_open_spans_shards() {
        let dir = tempdir().unwrap();
        write_split(dir.path(), Split::Validation, &[3, 2, 4], 2);

        let dataset = RecordDataset::open(dir.path(), Split::Validation).unwrap();
        assert_eq!(dataset.len(), 9);
        assert_eq!(dataset.feature_len(), 2);
        assert_eq!(
            dataset.descriptor(),
            DatasetDescriptor {
                sample_count: 9,
                feature_len: 2,
                split: Split::Validation
            }
        );

        // Records keep their global order across shard boundaries.
        for i in 0..9 {
            let (features, label) = dataset.get(i).unwrap();
            assert_eq!(label, i as u32);
            assert_eq!(features, &[i as f32, i as f32]);
        }
        assert!(dataset.get(9).is_none());
    }

    #[test]
    fn test_missing_source() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope");
        let err = RecordDataset::open(&missing, Split::Train).unwrap_err();
        assert!(matches!(err, DataError::SourceMissing(_)));
    }

    #[test]
    fn test_no_shards_for_split() {
        let dir = tempdir().unwrap();
        write_split(dir.path(), Split::Train, &[2], 1);
        let err = RecordDataset::open(dir.path(), Split::Validation).unwrap_err();
        assert!(matches!(err, DataError::NoShards { .. }));
    }

    #[test]
    fn test_inconsistent_feature_len() {
        let dir = tempdir().unwrap();
        let p0 = dir.path().join(shard_file_name(Split::Train, 0, 2));
        let p1 = dir.path().join(shard_file_name(Split::Train, 1, 2));
        write_shard(
            &p0,
            2,
            &[RawSample {
                features: vec![0.0; 2],
                label: 0,
            }],
        )
        .unwrap();
        write_shard(
            &p1,
            3,
            &[RawSample {
                features: vec![0.0; 3],
                label: 0,
            }],
        )
        .unwrap();

        let err = RecordDataset::open(dir.path(), Split::Train).unwrap_err();
        assert!(matches!(err, DataError::InconsistentShards { .. }));
    }

    #[test]
    fn test_split_parse() {
        assert_eq!("train".parse::<Split>().unwrap(), Split::Train);
        assert_eq!("validation".parse::<Split>().unwrap(), Split::Validation);
        assert!(matches!(
            "test".parse::<Split>(),
            Err(DataError::InvalidSplit(_))
        ));
    }

    #[test]
    fn test_label_file_roundtrip() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(LABEL_FILE), "0:A\n1:B\n").unwrap();
        let labels = read_label_file(dir.path()).unwrap();
        assert_eq!(labels.get(&0).map(String::as_str), Some("A"));
        assert_eq!(labels.get(&1).map(String::as_str), Some("B"));
    }
}
