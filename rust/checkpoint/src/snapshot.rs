//! Binary snapshot files.
//!
//! Format: `[magic: 4 bytes][version: u32][num_entries: u64]` followed by one
//! entry per parameter: `[name_len: u32][name bytes][rank: u32]`
//! `[dims: u64 x rank][values: f32 x product(dims)]`. All integers and floats
//! are little-endian. A directory of snapshots carries an `index.json` that
//! names the latest one.

use std::{
    collections::BTreeMap,
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use mmeval_core::ParameterSet;
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::CheckpointError;

pub(crate) const MAGIC: [u8; 4] = *b"MSNP";
pub(crate) const VERSION: u32 = 1;

/// Extension of snapshot files.
pub const SNAPSHOT_EXT: &str = "snap";

/// Name of the per-directory index file.
pub const INDEX_FILE: &str = "index.json";

/// Points at the newest snapshot in a directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotIndex {
    pub latest: String,
    #[serde(default)]
    pub all: Vec<String>,
}

/// Write all parameters of `params` as `<dir>/<name>.snap` and update the
/// directory index to point at it.
pub fn write_snapshot(
    dir: &Path,
    name: &str,
    params: &ParameterSet,
) -> Result<(), CheckpointError> {
    std::fs::create_dir_all(dir).map_err(|e| CheckpointError::Io(dir.to_path_buf(), e))?;
    let path = dir.join(format!("{name}.{SNAPSHOT_EXT}"));
    let file = File::create(&path).map_err(|e| CheckpointError::Io(path.clone(), e))?;
    let mut writer = BufWriter::new(file);

    let io = |e| CheckpointError::Io(path.clone(), e);
    writer.write_all(&MAGIC).map_err(io)?;
    writer.write_all(&VERSION.to_le_bytes()).map_err(io)?;
    writer
        .write_all(&(params.len() as u64).to_le_bytes())
        .map_err(io)?;

    for (param_name, value) in params.iter() {
        writer
            .write_all(&(param_name.len() as u32).to_le_bytes())
            .map_err(io)?;
        writer.write_all(param_name.as_bytes()).map_err(io)?;
        writer
            .write_all(&(value.ndim() as u32).to_le_bytes())
            .map_err(io)?;
        for &dim in value.shape() {
            writer.write_all(&(dim as u64).to_le_bytes()).map_err(io)?;
        }
        for &v in value.iter() {
            writer.write_all(&v.to_le_bytes()).map_err(io)?;
        }
    }
    writer.flush().map_err(io)?;

    let index_path = dir.join(INDEX_FILE);
    let mut index = match std::fs::read_to_string(&index_path) {
        Ok(content) => serde_json::from_str::<SnapshotIndex>(&content).map_err(|e| {
            CheckpointError::Corrupt(index_path.clone(), format!("bad index: {e}"))
        })?,
        Err(_) => SnapshotIndex {
            latest: String::new(),
            all: Vec::new(),
        },
    };
    index.latest = name.to_string();
    if !index.all.iter().any(|n| n == name) {
        index.all.push(name.to_string());
    }
    let json = serde_json::to_string_pretty(&index)
        .map_err(|e| CheckpointError::Corrupt(index_path.clone(), e.to_string()))?;
    std::fs::write(&index_path, json).map_err(|e| CheckpointError::Io(index_path.clone(), e))?;

    debug!(snapshot = %path.display(), entries = params.len(), "wrote snapshot");
    Ok(())
}

fn take<'a>(
    bytes: &'a [u8],
    offset: &mut usize,
    len: usize,
    path: &Path,
) -> Result<&'a [u8], CheckpointError> {
    let end = offset.checked_add(len).filter(|&end| end <= bytes.len());
    let Some(end) = end else {
        return Err(CheckpointError::Corrupt(
            path.to_path_buf(),
            "unexpected end of file".to_string(),
        ));
    };
    let slice = &bytes[*offset..end];
    *offset = end;
    Ok(slice)
}

fn take_u32(bytes: &[u8], offset: &mut usize, path: &Path) -> Result<u32, CheckpointError> {
    let slice = take(bytes, offset, 4, path)?;
    Ok(u32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]))
}

fn take_u64(bytes: &[u8], offset: &mut usize, path: &Path) -> Result<u64, CheckpointError> {
    let slice = take(bytes, offset, 8, path)?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(slice);
    Ok(u64::from_le_bytes(buf))
}

/// Read every entry of a snapshot file into name-keyed arrays.
pub fn read_snapshot(path: &Path) -> Result<BTreeMap<String, ArrayD<f32>>, CheckpointError> {
    let bytes = std::fs::read(path).map_err(|e| CheckpointError::Io(path.to_path_buf(), e))?;
    let mut offset = 0;

    let magic = take(&bytes, &mut offset, 4, path)?;
    if magic != MAGIC {
        return Err(CheckpointError::Corrupt(
            path.to_path_buf(),
            "invalid magic bytes".to_string(),
        ));
    }
    let version = take_u32(&bytes, &mut offset, path)?;
    if version != VERSION {
        return Err(CheckpointError::Corrupt(
            path.to_path_buf(),
            format!("unsupported version: {version}"),
        ));
    }

    let num_entries = take_u64(&bytes, &mut offset, path)?;
    let mut entries = BTreeMap::new();
    for _ in 0..num_entries {
        let name_len = take_u32(&bytes, &mut offset, path)? as usize;
        let name = std::str::from_utf8(take(&bytes, &mut offset, name_len, path)?)
            .map_err(|_| {
                CheckpointError::Corrupt(path.to_path_buf(), "entry name is not utf-8".to_string())
            })?
            .to_string();
        let rank = take_u32(&bytes, &mut offset, path)? as usize;
        let mut shape = Vec::with_capacity(rank);
        for _ in 0..rank {
            shape.push(take_u64(&bytes, &mut offset, path)? as usize);
        }
        let count: usize = shape.iter().product();
        let raw = take(&bytes, &mut offset, count * 4, path)?;
        let values: Vec<f32> = bytemuck::pod_collect_to_vec::<u8, f32>(raw);
        let array = ArrayD::from_shape_vec(shape.clone(), values).map_err(|_| {
            CheckpointError::Corrupt(path.to_path_buf(), format!("bad shape {shape:?} for {name}"))
        })?;
        entries.insert(name, array);
    }

    if offset != bytes.len() {
        return Err(CheckpointError::Corrupt(
            path.to_path_buf(),
            "trailing bytes after last entry".to_string(),
        ));
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn params() -> ParameterSet {
        let mut params = ParameterSet::new();
        params.declare("Color/Encode/weights", &[2, 3]).unwrap();
        params.declare("Color/Encode/biases", &[3]).unwrap();
        params
            .assign(
                "Color/Encode/biases",
                ArrayD::from_shape_vec(vec![3], vec![1.0, 2.0, 3.0]).unwrap(),
            )
            .unwrap();
        params
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let dir = tempdir().unwrap();
        write_snapshot(dir.path(), "step-10", &params()).unwrap();

        let path = dir.path().join("step-10.snap");
        let entries = read_snapshot(&path).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries["Color/Encode/weights"].shape(), &[2, 3]);
        assert_eq!(
            entries["Color/Encode/biases"]
                .as_slice()
                .unwrap(),
            &[1.0, 2.0, 3.0]
        );
    }

    #[test]
    fn test_index_tracks_latest() {
        let dir = tempdir().unwrap();
        write_snapshot(dir.path(), "step-10", &params()).unwrap();
        write_snapshot(dir.path(), "step-20", &params()).unwrap();

        let content = std::fs::read_to_string(dir.path().join(INDEX_FILE)).unwrap();
        let index: SnapshotIndex = serde_json::from_str(&content).unwrap();
        assert_eq!(index.latest, "step-20");
        assert_eq!(index.all, vec!["step-10", "step-20"]);
    }

    #[test]
    fn test_truncated_snapshot_rejected() {
        let dir = tempdir().unwrap();
        write_snapshot(dir.path(), "step-10", &params()).unwrap();

        let path = dir.path().join("step-10.snap");
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();
        let err = read_snapshot(&path).unwrap_err();
        assert!(matches!(err, CheckpointError::Corrupt(..)));
    }
}
