//! On-disk record shard format.
//!
//! Format: `[magic: 4 bytes][version: u32][num_records: u64]`
//! `[feature_len: u32][pad: 4 bytes]` followed by `num_records` records of
//! `[features: [f32; feature_len]][label: u32]`. Shards are memory-mapped
//! and accessed by index without copying.

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use bytemuck::{Pod, Zeroable};
use memmap2::Mmap;

use crate::{DataError, provider::Split};

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct ShardHeader {
    magic: [u8; 4],
    version: u32,
    num_records: u64,
    feature_len: u32,
    _pad: u32,
}

const MAGIC: [u8; 4] = *b"MREC";
const VERSION: u32 = 1;
const HEADER_SIZE: usize = std::mem::size_of::<ShardHeader>();
const LABEL_SIZE: usize = std::mem::size_of::<u32>();

/// Shard file name for a split: `{split}_{shard:05}-of-{total:05}.rec`.
#[must_use]
pub fn shard_file_name(split: Split, shard_id: usize, num_shards: usize) -> String {
    format!("{split}_{shard_id:05}-of-{num_shards:05}.rec")
}

/// One raw sample headed for a shard.
#[derive(Debug, Clone)]
pub struct RawSample {
    pub features: Vec<f32>,
    pub label: u32,
}

/// Write a complete shard in one pass.
pub fn write_shard(
    path: &Path,
    feature_len: usize,
    samples: &[RawSample],
) -> Result<(), DataError> {
    for sample in samples {
        if sample.features.len() != feature_len {
            return Err(DataError::Malformed(
                path.to_path_buf(),
                format!(
                    "sample has {} features, shard expects {feature_len}",
                    sample.features.len()
                ),
            ));
        }
    }

    let file = File::create(path).map_err(|e| DataError::Io(path.to_path_buf(), e))?;
    let mut writer = BufWriter::with_capacity(1024 * 1024, file);

    let header = ShardHeader {
        magic: MAGIC,
        version: VERSION,
        num_records: samples.len() as u64,
        feature_len: feature_len as u32,
        _pad: 0,
    };
    writer
        .write_all(bytemuck::bytes_of(&header))
        .map_err(|e| DataError::Io(path.to_path_buf(), e))?;

    for sample in samples {
        writer
            .write_all(bytemuck::cast_slice(&sample.features))
            .map_err(|e| DataError::Io(path.to_path_buf(), e))?;
        writer
            .write_all(&sample.label.to_le_bytes())
            .map_err(|e| DataError::Io(path.to_path_buf(), e))?;
    }
    writer
        .flush()
        .map_err(|e| DataError::Io(path.to_path_buf(), e))
}

/// A memory-mapped record shard.
#[derive(Debug)]
pub struct Shard {
    mmap: Mmap,
    num_records: usize,
    feature_len: usize,
}

impl Shard {
    pub fn open(path: &Path) -> Result<Self, DataError> {
        let file = File::open(path).map_err(|e| DataError::Io(path.to_path_buf(), e))?;
        // SAFETY: the mapping is read-only and shards are not mutated once written.
        let mmap =
            unsafe { Mmap::map(&file) }.map_err(|e| DataError::Io(path.to_path_buf(), e))?;

        if mmap.len() < HEADER_SIZE {
            return Err(DataError::Malformed(
                path.to_path_buf(),
                "file too small for header".to_string(),
            ));
        }

        let header: &ShardHeader = bytemuck::from_bytes(&mmap[..HEADER_SIZE]);
        if header.magic != MAGIC {
            return Err(DataError::Malformed(
                path.to_path_buf(),
                "invalid magic bytes".to_string(),
            ));
        }
        if header.version != VERSION {
            return Err(DataError::Malformed(
                path.to_path_buf(),
                format!("unsupported version: {}", header.version),
            ));
        }

        let num_records = header.num_records as usize;
        let feature_len = header.feature_len as usize;
        let stride = feature_len * std::mem::size_of::<f32>() + LABEL_SIZE;
        let expected = HEADER_SIZE + num_records * stride;
        if mmap.len() != expected {
            return Err(DataError::Malformed(
                path.to_path_buf(),
                format!("size mismatch: expected {expected}, got {}", mmap.len()),
            ));
        }

        Ok(Self {
            mmap,
            num_records,
            feature_len,
        })
    }

    #[must_use]
    pub fn num_records(&self) -> usize {
        self.num_records
    }

    #[must_use]
    pub fn feature_len(&self) -> usize {
        self.feature_len
    }

    fn record_offset(&self, index: usize) -> usize {
        let stride = self.feature_len * std::mem::size_of::<f32>() + LABEL_SIZE;
        HEADER_SIZE + index * stride
    }

    /// Feature slice of a record, without copying.
    #[must_use]
    pub fn features(&self, index: usize) -> Option<&[f32]> {
        if index >= self.num_records {
            return None;
        }
        let start = self.record_offset(index);
        let end = start + self.feature_len * std::mem::size_of::<f32>();
        Some(bytemuck::cast_slice(&self.mmap[start..end]))
    }

    #[must_use]
    pub fn label(&self, index: usize) -> Option<u32> {
        if index >= self.num_records {
            return None;
        }
        let start = self.record_offset(index) + self.feature_len * std::mem::size_of::<f32>();
        let bytes: [u8; 4] = self.mmap[start..start + LABEL_SIZE].try_into().ok()?;
        Some(u32::from_le_bytes(bytes))
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn sample(features: &[f32], label: u32) -> RawSample {
        RawSample {
            features: features.to_vec(),
            label,
        }
    }

    #[test]
    fn test_shard_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(shard_file_name(Split::Train, 0, 1));

        let samples = vec![sample(&[1.0, 2.0, 3.0], 7), sample(&[4.0, 5.0, 6.0], 2)];
        write_shard(&path, 3, &samples).unwrap();

        let shard = Shard::open(&path).unwrap();
        assert_eq!(shard.num_records(), 2);
        assert_eq!(shard.feature_len(), 3);
        assert_eq!(shard.features(0).unwrap(), &[1.0, 2.0, 3.0]);
        assert_eq!(shard.label(0), Some(7));
        assert_eq!(shard.features(1).unwrap(), &[4.0, 5.0, 6.0]);
        assert_eq!(shard.label(1), Some(2));
        assert_eq!(shard.features(2), None);
    }

    #[test]
    fn test_wrong_width_rejected_at_write() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.rec");
        let err = write_shard(&path, 3, &[sample(&[1.0], 0)]).unwrap_err();
        assert!(matches!(err, DataError::Malformed(..)));
    }

    #[test]
    fn test_truncated_shard_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("trunc.rec");
        write_shard(&path, 2, &[sample(&[1.0, 2.0], 0)]).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 2]).unwrap();
        let err = Shard::open(&path).unwrap_err();
        assert!(matches!(err, DataError::Malformed(..)));
    }

    #[test]
    fn test_bad_magic_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad_magic.rec");
        write_shard(&path, 1, &[sample(&[1.0], 0)]).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[0] = b'X';
        std::fs::write(&path, &bytes).unwrap();
        let err = Shard::open(&path).unwrap_err();
        assert!(matches!(err, DataError::Malformed(..)));
    }
}
