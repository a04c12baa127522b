//! Persistent hash cache keyed by file identity
//!
//! A cache entry is valid only while the file's path, size, and modification
//! time all match the values recorded at hashing time. Any change to the file
//! produces a different key, so stale digests are never returned and no
//! explicit invalidation pass is needed.

use crate::error::{Error, Result};
use crate::hashing::{HashAlgorithm, HashDigest};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, warn};

/// Default cache file name, placed in the user's home directory.
const CACHE_FILE_NAME: &str = ".rom_librarian_hash_cache.json";

/// Identity of one cached digest
///
/// The modification time is kept at the filesystem's full precision; a
/// same-size rewrite within the same second still changes the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Absolute path of the file as a string
    pub path: String,
    /// File size in bytes
    pub size: u64,
    /// Modification time as nanoseconds since the Unix epoch
    pub mtime_nanos: u128,
    /// Algorithm the cached value was produced by
    pub algorithm: HashAlgorithm,
}

impl CacheKey {
    /// Build a key from the file's current on-disk metadata.
    pub fn for_file(path: &Path, algorithm: HashAlgorithm) -> Result<Self> {
        let metadata = std::fs::metadata(path).map_err(|e| Error::io(path, e))?;
        let mtime_nanos = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        Ok(Self {
            path: path.to_string_lossy().into_owned(),
            size: metadata.len(),
            mtime_nanos,
            algorithm,
        })
    }

    /// Flat string form used in the on-disk JSON map.
    fn storage_key(&self) -> String {
        format!("{}|{}|{}|{}", self.path, self.size, self.mtime_nanos, self.algorithm)
    }
}

/// On-disk format: a flat map from storage key to hex digest.
#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile(HashMap<String, String>);

/// In-memory hash cache with JSON persistence
///
/// Entries are never evicted; the identity-based key already drops stale
/// entries from use, and cache files stay small relative to the ROM sets
/// they describe.
#[derive(Debug, Default)]
pub struct HashCache {
    entries: HashMap<String, String>,
    hits: u64,
}

impl HashCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Default cache location in the user's home directory.
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(CACHE_FILE_NAME))
    }

    /// Load a cache from disk.
    ///
    /// A missing or unreadable cache file yields an empty cache rather than
    /// an error; the cache is an accelerator, never a requirement.
    pub async fn load(path: &Path) -> Self {
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => match serde_json::from_str::<CacheFile>(&contents) {
                Ok(file) => {
                    debug!(entries = file.0.len(), "loaded hash cache");
                    Self { entries: file.0, hits: 0 }
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "hash cache unreadable, starting empty");
                    Self::new()
                }
            },
            Err(_) => Self::new(),
        }
    }

    /// Persist the cache to disk as JSON.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string(&self.entries)
            .map_err(|e| Error::io(path, std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
        tokio::fs::write(path, contents)
            .await
            .map_err(|e| Error::io(path, e))?;
        debug!(entries = self.entries.len(), path = %path.display(), "saved hash cache");
        Ok(())
    }

    /// Look up a digest, counting a hit on success.
    pub fn get(&mut self, key: &CacheKey) -> Option<String> {
        let value = self.entries.get(&key.storage_key()).cloned();
        if value.is_some() {
            self.hits += 1;
        }
        value
    }

    /// Record a digest for the given identity.
    pub fn insert(&mut self, key: &CacheKey, digest: &str) {
        self.entries.insert(key.storage_key(), digest.to_string());
    }

    /// Look up the full digest triple for a file, valid only if all three
    /// algorithm entries are present.
    pub fn get_digest(&mut self, path: &Path) -> Option<HashDigest> {
        let crc_key = CacheKey::for_file(path, HashAlgorithm::Crc32).ok()?;
        let md5_key = CacheKey { algorithm: HashAlgorithm::Md5, ..crc_key.clone() };
        let sha1_key = CacheKey { algorithm: HashAlgorithm::Sha1, ..crc_key.clone() };

        let crc32 = self.entries.get(&crc_key.storage_key()).cloned()?;
        let md5 = self.entries.get(&md5_key.storage_key()).cloned()?;
        let sha1 = self.entries.get(&sha1_key.storage_key()).cloned()?;
        self.hits += 1;
        Some(HashDigest { crc32, md5, sha1 })
    }

    /// Record the digest triple for a file under its current identity.
    pub fn insert_digest(&mut self, path: &Path, digest: &HashDigest) -> Result<()> {
        let crc_key = CacheKey::for_file(path, HashAlgorithm::Crc32)?;
        let md5_key = CacheKey { algorithm: HashAlgorithm::Md5, ..crc_key.clone() };
        let sha1_key = CacheKey { algorithm: HashAlgorithm::Sha1, ..crc_key.clone() };
        self.entries.insert(crc_key.storage_key(), digest.crc32.clone());
        self.entries.insert(md5_key.storage_key(), digest.md5.clone());
        self.entries.insert(sha1_key.storage_key(), digest.sha1.clone());
        Ok(())
    }

    /// Number of lookups answered from the cache since load.
    pub fn hits(&self) -> u64 {
        self.hits
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn key(path: &str, size: u64, mtime: u128) -> CacheKey {
        CacheKey {
            path: path.to_string(),
            size,
            mtime_nanos: mtime,
            algorithm: HashAlgorithm::Crc32,
        }
    }

    #[test]
    fn get_counts_hits_only_on_success() {
        let mut cache = HashCache::new();
        let k = key("/roms/game.nes", 512, 1_700_000_000);
        cache.insert(&k, "deadbeef");

        assert_eq!(cache.get(&k).as_deref(), Some("deadbeef"));
        assert_eq!(cache.get(&key("/roms/other.nes", 512, 1_700_000_000)), None);
        assert_eq!(cache.hits(), 1);
    }

    #[test]
    fn changed_metadata_misses() {
        let mut cache = HashCache::new();
        cache.insert(&key("/roms/game.nes", 512, 100), "deadbeef");

        assert_eq!(cache.get(&key("/roms/game.nes", 513, 100)), None);
        assert_eq!(cache.get(&key("/roms/game.nes", 512, 101)), None);
        assert_eq!(cache.hits(), 0);
    }

    #[test]
    fn file_identity_invalidates_after_rewrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("game.gba");
        std::fs::write(&path, b"original").unwrap();

        let mut cache = HashCache::new();
        let before = CacheKey::for_file(&path, HashAlgorithm::Sha1).unwrap();
        cache.insert(&before, "cafebabe");
        assert!(cache.get(&before).is_some());

        // Grow the file; size alone changes the key.
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b" plus more bytes").unwrap();
        drop(file);

        let after = CacheKey::for_file(&path, HashAlgorithm::Sha1).unwrap();
        assert_ne!(before, after);
        assert_eq!(cache.get(&after), None);
    }

    #[test]
    fn digest_triple_requires_all_three_entries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("game.sfc");
        std::fs::write(&path, b"content").unwrap();

        let mut cache = HashCache::new();
        let crc_key = CacheKey::for_file(&path, HashAlgorithm::Crc32).unwrap();
        cache.insert(&crc_key, "0000aaaa");
        assert!(cache.get_digest(&path).is_none());

        let digest = HashDigest {
            crc32: "0000aaaa".to_string(),
            md5: "b".repeat(32),
            sha1: "c".repeat(40),
        };
        cache.insert_digest(&path, &digest).unwrap();
        assert_eq!(cache.get_digest(&path), Some(digest));
    }

    #[tokio::test]
    async fn round_trips_through_disk() {
        let dir = TempDir::new().unwrap();
        let cache_path = dir.path().join("cache.json");

        let mut cache = HashCache::new();
        cache.insert(&key("/roms/a.nes", 10, 20), "11112222");
        cache.save(&cache_path).await.unwrap();

        let mut loaded = HashCache::load(&cache_path).await;
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.get(&key("/roms/a.nes", 10, 20)).as_deref(), Some("11112222"));
    }

    #[tokio::test]
    async fn corrupt_cache_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let cache_path = dir.path().join("cache.json");
        tokio::fs::write(&cache_path, b"{not valid json").await.unwrap();

        let cache = HashCache::load(&cache_path).await;
        assert!(cache.is_empty());
    }
}
