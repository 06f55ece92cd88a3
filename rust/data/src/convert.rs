//! Raw dataset to sharded records.
//!
//! Expects a source layout of `<dir>/<split>/<class>/<sample files>`, where
//! each sample file is a flat sequence of little-endian f32 features. All
//! samples must have the same feature width. Class ids are assigned from the
//! sorted union of class directory names across both splits, and the mapping
//! is written to `labels.txt` next to the shards.

use std::{
    collections::BTreeSet,
    io::Write,
    path::{Path, PathBuf},
};

use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};
use rayon::prelude::*;
use serde::Deserialize;
use tracing::info;

use crate::{
    DataError,
    provider::{LABEL_FILE, Split},
    shard::{RawSample, shard_file_name, write_shard},
};

fn default_num_shards() -> usize {
    5
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConvertOptions {
    #[serde(default = "default_num_shards")]
    pub num_shards: usize,
    #[serde(default)]
    pub seed: u64,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            num_shards: default_num_shards(),
            seed: 0,
        }
    }
}

/// What a conversion produced, per split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertSummary {
    pub train_samples: usize,
    pub validation_samples: usize,
    pub num_classes: usize,
    pub feature_len: usize,
}

fn sorted_subdirs(dir: &Path) -> Result<Vec<PathBuf>, DataError> {
    let mut dirs: Vec<_> = std::fs::read_dir(dir)
        .map_err(|e| DataError::Io(dir.to_path_buf(), e))?
        .filter_map(std::result::Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    dirs.sort();
    Ok(dirs)
}

fn sorted_files(dir: &Path) -> Result<Vec<PathBuf>, DataError> {
    let mut files: Vec<_> = std::fs::read_dir(dir)
        .map_err(|e| DataError::Io(dir.to_path_buf(), e))?
        .filter_map(std::result::Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    files.sort();
    Ok(files)
}

fn dir_name(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
}

fn read_raw_sample(path: &Path, label: u32) -> Result<RawSample, DataError> {
    let bytes = std::fs::read(path).map_err(|e| DataError::Io(path.to_path_buf(), e))?;
    if bytes.len() % 4 != 0 {
        return Err(DataError::Malformed(
            path.to_path_buf(),
            format!("length {} is not a multiple of 4", bytes.len()),
        ));
    }
    let features = bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Ok(RawSample { features, label })
}

fn convert_split(
    split_dir: &Path,
    output_dir: &Path,
    split: Split,
    classes: &[String],
    options: &ConvertOptions,
    rng: &mut StdRng,
) -> Result<(usize, usize), DataError> {
    let mut work = Vec::new();
    for class_dir in sorted_subdirs(split_dir)? {
        let Some(name) = dir_name(&class_dir) else {
            continue;
        };
        let label = classes.iter().position(|c| *c == name).ok_or_else(|| {
            DataError::Malformed(class_dir.clone(), "class not in label set".to_string())
        })? as u32;
        for file in sorted_files(&class_dir)? {
            work.push((file, label));
        }
    }

    let mut samples = work
        .par_iter()
        .map(|(path, label)| read_raw_sample(path, *label))
        .collect::<Result<Vec<_>, _>>()?;

    let feature_len = samples.first().map_or(0, |s| s.features.len());
    for sample in &samples {
        if sample.features.len() != feature_len {
            return Err(DataError::InconsistentShards {
                dir: split_dir.to_path_buf(),
                detail: format!(
                    "sample width {} differs from {feature_len}",
                    sample.features.len()
                ),
            });
        }
    }

    // Shuffle once, then cut into shards, so class order does not survive
    // into the record files.
    samples.shuffle(rng);

    let total = samples.len();
    let num_shards = options.num_shards.max(1);
    let per_shard = total.div_ceil(num_shards.max(1)).max(1);
    for (shard_id, chunk) in samples.chunks(per_shard).enumerate() {
        let path = output_dir.join(shard_file_name(split, shard_id, num_shards));
        write_shard(&path, feature_len, chunk)?;
    }

    info!(split = %split, samples = total, shards = num_shards, "converted split");
    Ok((total, feature_len))
}

/// Convert a raw dataset tree into sharded records under `output_dir`.
/// Both the `train` and `validation` split directories must exist.
pub fn convert_dataset(
    dataset_dir: &Path,
    output_dir: &Path,
    options: &ConvertOptions,
) -> Result<ConvertSummary, DataError> {
    let train_dir = dataset_dir.join(Split::Train.as_str());
    let validation_dir = dataset_dir.join(Split::Validation.as_str());
    for dir in [&train_dir, &validation_dir] {
        if !dir.is_dir() {
            return Err(DataError::SourceMissing(dir.clone()));
        }
    }
    std::fs::create_dir_all(output_dir).map_err(|e| DataError::Io(output_dir.to_path_buf(), e))?;

    let mut class_names = BTreeSet::new();
    for dir in [&train_dir, &validation_dir] {
        for class_dir in sorted_subdirs(dir)? {
            if let Some(name) = dir_name(&class_dir) {
                class_names.insert(name);
            }
        }
    }
    let classes: Vec<String> = class_names.into_iter().collect();

    let mut rng = StdRng::seed_from_u64(options.seed);
    let (train_samples, train_len) = convert_split(
        &train_dir,
        output_dir,
        Split::Train,
        &classes,
        options,
        &mut rng,
    )?;
    let (validation_samples, validation_len) = convert_split(
        &validation_dir,
        output_dir,
        Split::Validation,
        &classes,
        options,
        &mut rng,
    )?;

    if train_samples > 0 && validation_samples > 0 && train_len != validation_len {
        return Err(DataError::InconsistentShards {
            dir: output_dir.to_path_buf(),
            detail: format!("train width {train_len} differs from validation {validation_len}"),
        });
    }

    let label_path = output_dir.join(LABEL_FILE);
    let mut label_file =
        std::fs::File::create(&label_path).map_err(|e| DataError::Io(label_path.clone(), e))?;
    for (id, name) in classes.iter().enumerate() {
        writeln!(label_file, "{id}:{name}").map_err(|e| DataError::Io(label_path.clone(), e))?;
    }

    Ok(ConvertSummary {
        train_samples,
        validation_samples,
        num_classes: classes.len(),
        feature_len: train_len.max(validation_len),
    })
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::provider::{RecordDataset, read_label_file};

    fn write_raw(dir: &Path, split: &str, class: &str, name: &str, features: &[f32]) {
        let class_dir = dir.join(split).join(class);
        std::fs::create_dir_all(&class_dir).unwrap();
        let bytes: Vec<u8> = features.iter().flat_map(|f| f.to_le_bytes()).collect();
        std::fs::write(class_dir.join(name), bytes).unwrap();
    }

    #[test]
    fn test_convert_produces_readable_shards() {
        let source = tempdir().unwrap();
        let out = tempdir().unwrap();
        for i in 0..4 {
            write_raw(
                source.path(),
                "train",
                "wave",
                &format!("{i}.raw"),
                &[i as f32, 0.0],
            );
            write_raw(
                source.path(),
                "train",
                "point",
                &format!("{i}.raw"),
                &[i as f32, 1.0],
            );
        }
        write_raw(source.path(), "validation", "wave", "0.raw", &[9.0, 0.0]);
        write_raw(source.path(), "validation", "point", "0.raw", &[9.0, 1.0]);

        let options = ConvertOptions {
            num_shards: 2,
            seed: 7,
        };
        let summary = convert_dataset(source.path(), out.path(), &options).unwrap();
        assert_eq!(summary.train_samples, 8);
        assert_eq!(summary.validation_samples, 2);
        assert_eq!(summary.num_classes, 2);
        assert_eq!(summary.feature_len, 2);

        let train = RecordDataset::open(out.path(), Split::Train).unwrap();
        assert_eq!(train.len(), 8);
        assert_eq!(train.feature_len(), 2);
        let validation = RecordDataset::open(out.path(), Split::Validation).unwrap();
        assert_eq!(validation.len(), 2);

        // Labels come from the sorted class names: point < wave.
        let labels = read_label_file(out.path()).unwrap();
        assert_eq!(labels.get(&0).map(String::as_str), Some("point"));
        assert_eq!(labels.get(&1).map(String::as_str), Some("wave"));
    }

    #[test]
    fn test_missing_split_rejected() {
        let source = tempdir().unwrap();
        let out = tempdir().unwrap();
        write_raw(source.path(), "train", "wave", "0.raw", &[1.0]);

        let err =
            convert_dataset(source.path(), out.path(), &ConvertOptions::default()).unwrap_err();
        assert!(matches!(err, DataError::SourceMissing(_)));
    }

    #[test]
    fn test_mixed_widths_rejected() {
        let source = tempdir().unwrap();
        let out = tempdir().unwrap();
        write_raw(source.path(), "train", "wave", "0.raw", &[1.0, 2.0]);
        write_raw(source.path(), "train", "wave", "1.raw", &[1.0]);
        write_raw(source.path(), "validation", "wave", "0.raw", &[1.0, 2.0]);

        let err =
            convert_dataset(source.path(), out.path(), &ConvertOptions::default()).unwrap_err();
        assert!(matches!(err, DataError::InconsistentShards { .. }));
    }

    #[test]
    fn test_odd_byte_length_rejected() {
        let source = tempdir().unwrap();
        let out = tempdir().unwrap();
        let class_dir = source.path().join("train").join("wave");
        std::fs::create_dir_all(&class_dir).unwrap();
        std::fs::write(class_dir.join("0.raw"), [0u8; 5]).unwrap();
        std::fs::create_dir_all(source.path().join("validation").join("wave")).unwrap();

        let err =
            convert_dataset(source.path(), out.path(), &ConvertOptions::default()).unwrap_err();
        assert!(matches!(err, DataError::Malformed(..)));
    }
}
