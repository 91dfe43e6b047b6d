//! Disk Store Module
//!
//! Filesystem-backed [`CacheStore`]. Each key maps to one file under the
//! configured root, named by the SHA-256 of the key and sharded by the first
//! byte of the digest:
//!
//! ```text
//! <root>/3f/3fa1...e9.entry
//! ```
//!
//! A file holds a 4 byte magic, a big-endian `u32` metadata length, the JSON
//! metadata and then the raw body. Writes go to a temporary file in the same
//! shard directory and are published with a rename, so readers never observe
//! a partial entry and need no lock.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::cache::{CacheEntry, CacheKey, CacheStore};
use crate::error::{CacheError, Result};

const MAGIC: &[u8; 4] = b"HCE1";
const ENTRY_EXTENSION: &str = "entry";
const TEMP_EXTENSION: &str = "tmp";

#[derive(Serialize, Deserialize)]
struct StoredMeta {
    /// Full key, checked on read to rule out digest collisions
    key: String,
    entry: CacheEntry,
}

// == Disk Store ==
/// Persistent [`CacheStore`] rooted at a directory.
///
/// The root directory must already exist; shard directories below it are
/// created on demand. No index is kept in memory.
#[derive(Debug)]
pub struct DiskStore {
    root: PathBuf,
    temp_counter: AtomicU64,
}

impl DiskStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            temp_counter: AtomicU64::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deterministic location of the entry for `key`.
    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        let digest = hex::encode(Sha256::digest(key.as_str().as_bytes()));
        self.root
            .join(&digest[..2])
            .join(format!("{}.{}", digest, ENTRY_EXTENSION))
    }

    fn temp_path_for(&self, final_path: &Path) -> PathBuf {
        let n = self.temp_counter.fetch_add(1, Ordering::Relaxed);
        let mut name = final_path
            .file_stem()
            .map(|s| s.to_os_string())
            .unwrap_or_default();
        name.push(format!(".{}-{}.{}", std::process::id(), n, TEMP_EXTENSION));
        final_path.with_file_name(name)
    }

    // == Sweep ==
    /// Removes temporary files older than `older_than`.
    ///
    /// Temporary files are left behind when a write is abandoned mid-way
    /// (cancelled request, crash). Published entries are never touched.
    pub async fn sweep_temp_files(&self, older_than: Duration) -> Result<usize> {
        let mut removed = 0;
        let mut shards = fs::read_dir(&self.root).await?;
        while let Some(shard) = shards.next_entry().await? {
            if !shard.file_type().await?.is_dir() {
                continue;
            }
            let mut files = fs::read_dir(shard.path()).await?;
            while let Some(file) = files.next_entry().await? {
                let path = file.path();
                if path.extension().and_then(|e| e.to_str()) != Some(TEMP_EXTENSION) {
                    continue;
                }
                let age = file
                    .metadata()
                    .await?
                    .modified()
                    .ok()
                    .and_then(|m| SystemTime::now().duration_since(m).ok())
                    .unwrap_or_default();
                if age < older_than {
                    continue;
                }
                match fs::remove_file(&path).await {
                    Ok(()) => removed += 1,
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => warn!(path = %path.display(), error = %e, "failed to remove temp file"),
                }
            }
        }
        Ok(removed)
    }
}

// == Encoding ==
fn encode(key: &CacheKey, entry: &CacheEntry) -> Result<Vec<u8>> {
    let meta = serde_json::to_vec(&StoredMeta {
        key: key.as_str().to_string(),
        entry: entry.clone(),
    })?;
    let meta_len = u32::try_from(meta.len())
        .map_err(|_| CacheError::Internal("entry metadata too large".to_string()))?;

    let mut buf = Vec::with_capacity(MAGIC.len() + 4 + meta.len() + entry.body.len());
    buf.extend_from_slice(MAGIC);
    buf.extend_from_slice(&meta_len.to_be_bytes());
    buf.extend_from_slice(&meta);
    buf.extend_from_slice(&entry.body);
    Ok(buf)
}

fn decode(data: Vec<u8>) -> Result<StoredMeta> {
    let header_len = MAGIC.len() + 4;
    if data.len() < header_len || &data[..MAGIC.len()] != MAGIC {
        return Err(CacheError::Corrupt("bad entry header".to_string()));
    }
    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&data[MAGIC.len()..header_len]);
    let meta_end = header_len + u32::from_be_bytes(len_bytes) as usize;
    if data.len() < meta_end {
        return Err(CacheError::Corrupt("truncated metadata".to_string()));
    }

    let mut meta: StoredMeta = serde_json::from_slice(&data[header_len..meta_end])?;
    let mut data = Bytes::from(data);
    meta.entry.body = data.split_off(meta_end);
    Ok(meta)
}

#[async_trait]
impl CacheStore for DiskStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let path = self.path_for(key);
        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let meta = decode(data)?;
        if meta.key != key.as_str() {
            debug!(key = %key, stored = %meta.key, "digest collision, treating as miss");
            return Ok(None);
        }
        Ok(Some(meta.entry))
    }

    async fn set(&self, key: &CacheKey, entry: CacheEntry) -> Result<()> {
        let path = self.path_for(key);
        if let Some(shard) = path.parent() {
            match fs::create_dir(shard).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e.into()),
            }
        }

        let data = encode(key, &entry)?;
        let temp = self.temp_path_for(&path);
        let written = async {
            let mut file = fs::File::create(&temp).await?;
            file.write_all(&data).await?;
            file.sync_data().await?;
            drop(file);
            fs::rename(&temp, &path).await
        }
        .await;

        if let Err(e) = written {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<()> {
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
