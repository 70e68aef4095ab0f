//! On-disk snapshots.
//!
//! A persistent store keeps its committed state in a data directory:
//!
//! ```text
//! <data_dir>/
//! ├─ LOCK           # Advisory lock for single-writer
//! ├─ SNAPSHOT       # Committed state
//! └─ SNAPSHOT.tmp   # Written then renamed over SNAPSHOT
//! ```
//!
//! The snapshot file is `magic (4) | version (u16 LE) | sha256 (32) | body`
//! where the body is the CBOR encoding of every collection and index.

use crate::collection::{Catalog, CollectionData};
use crate::document::Document;
use crate::error::{StoreError, StoreResult};
use crate::index::IndexSpec;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const SNAPSHOT_FILE: &str = "SNAPSHOT";
const SNAPSHOT_TEMP: &str = "SNAPSHOT.tmp";

const MAGIC: &[u8; 4] = b"DSNP";
const FORMAT_VERSION: u16 = 1;
const HEADER_LEN: usize = 4 + 2 + 32;

#[derive(Serialize, Deserialize)]
struct SnapshotBody {
    collections: Vec<SnapshotCollection>,
    indexes: Vec<IndexSpec>,
}

#[derive(Serialize, Deserialize)]
struct SnapshotCollection {
    name: String,
    documents: Vec<Document>,
}

/// An exclusively locked data directory.
#[derive(Debug)]
pub struct DataDir {
    path: PathBuf,
    _lock_file: File,
}

impl DataDir {
    /// Opens or creates a data directory and takes its lock.
    ///
    /// # Errors
    ///
    /// Returns `Locked` if another process holds the directory.
    pub fn open(path: &Path, create_if_missing: bool) -> StoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(StoreError::corrupted(format!(
                    "data directory does not exist: {}",
                    path.display()
                )));
            }
        }
        if !path.is_dir() {
            return Err(StoreError::corrupted(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(StoreError::Locked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the last snapshot, if one was written.
    pub fn load(&self) -> StoreResult<Option<Catalog>> {
        let path = self.path.join(SNAPSHOT_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path)?;
        decode(&bytes).map(Some)
    }

    /// Writes a snapshot atomically: temp file, optional fsync, rename.
    pub fn save(&self, catalog: &Catalog, sync: bool) -> StoreResult<()> {
        let bytes = encode(catalog)?;
        let temp = self.path.join(SNAPSHOT_TEMP);
        {
            let mut file = File::create(&temp)?;
            file.write_all(&bytes)?;
            if sync {
                file.sync_all()?;
            }
        }
        fs::rename(&temp, self.path.join(SNAPSHOT_FILE))?;
        Ok(())
    }
}

fn encode(catalog: &Catalog) -> StoreResult<Vec<u8>> {
    let mut names: Vec<&String> = catalog.collections.keys().collect();
    names.sort();
    let body = SnapshotBody {
        collections: names
            .into_iter()
            .map(|name| SnapshotCollection {
                name: name.clone(),
                documents: catalog.collections[name].iter().cloned().collect(),
            })
            .collect(),
        indexes: catalog.indexes.clone(),
    };

    let mut encoded = Vec::new();
    ciborium::into_writer(&body, &mut encoded).map_err(|e| StoreError::codec(e.to_string()))?;

    let mut bytes = Vec::with_capacity(HEADER_LEN + encoded.len());
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    bytes.extend_from_slice(&Sha256::digest(&encoded));
    bytes.extend_from_slice(&encoded);
    Ok(bytes)
}

fn decode(bytes: &[u8]) -> StoreResult<Catalog> {
    if bytes.len() < HEADER_LEN || &bytes[..4] != MAGIC {
        return Err(StoreError::corrupted("bad snapshot header"));
    }
    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if version != FORMAT_VERSION {
        return Err(StoreError::corrupted(format!(
            "unsupported snapshot version {version}"
        )));
    }
    let body = &bytes[HEADER_LEN..];
    if Sha256::digest(body).as_slice() != &bytes[6..HEADER_LEN] {
        return Err(StoreError::corrupted("snapshot checksum mismatch"));
    }
    let body: SnapshotBody =
        ciborium::from_reader(body).map_err(|e| StoreError::codec(e.to_string()))?;

    let mut catalog = Catalog::default();
    for collection in body.collections {
        let mut data = CollectionData::default();
        for doc in collection.documents {
            data.insert(&collection.name, doc)?;
        }
        catalog.collections.insert(collection.name, data);
    }
    for spec in body.indexes {
        catalog.add_index(spec)?;
    }
    Ok(catalog)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::DocumentId;
    use crate::op::WriteOp;
    use serde_json::json;
    use tempfile::TempDir;

    fn sample() -> Catalog {
        let mut catalog = Catalog::default();
        catalog.add_index(IndexSpec::single("base.user", "email")).unwrap();
        let mut doc = json!({"email": "a@b.c", "age": 3}).as_object().cloned().unwrap();
        doc.insert("_id".into(), DocumentId::new().to_value());
        catalog
            .apply(&[WriteOp::Insert {
                collection: "base.user".into(),
                documents: vec![doc],
            }])
            .unwrap();
        catalog
    }

    #[test]
    fn save_then_load() {
        let temp = TempDir::new().unwrap();
        let dir = DataDir::open(temp.path(), true).unwrap();
        assert!(dir.load().unwrap().is_none());

        dir.save(&sample(), true).unwrap();
        let loaded = dir.load().unwrap().unwrap();
        let users = loaded.collection("base.user").unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users.iter().next().unwrap()["age"], json!(3));
        assert_eq!(loaded.indexes().len(), 1);
    }

    #[test]
    fn second_open_is_locked() {
        let temp = TempDir::new().unwrap();
        let _first = DataDir::open(temp.path(), true).unwrap();
        assert!(matches!(
            DataDir::open(temp.path(), true),
            Err(StoreError::Locked)
        ));
    }

    #[test]
    fn corrupted_body_is_rejected() {
        let mut bytes = encode(&sample()).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        assert!(matches!(decode(&bytes), Err(StoreError::Corrupted { .. })));
        assert!(decode(b"nope").is_err());
    }

    #[test]
    fn missing_dir_without_create_fails() {
        let temp = TempDir::new().unwrap();
        assert!(DataDir::open(&temp.path().join("absent"), false).is_err());
    }
}
