//! Streaming hash computation for ROM files
//!
//! Files are read once in fixed 1 MiB chunks and fed into all running digests
//! before the next read, so even multi-gigabyte disc images never sit in
//! memory. For `.zip` archives the digests cover the decompressed content of
//! the first recognized ROM entry, not the archive bytes: DAT files record
//! hashes of the ROM payload.

use crate::error::{Error, Result};
use crate::scanner;
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Read size for the streaming loop.
const CHUNK_SIZE: usize = 1024 * 1024;

/// Hash algorithms available for single-digest operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HashAlgorithm {
    Crc32,
    Md5,
    Sha1,
}

impl std::fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HashAlgorithm::Crc32 => write!(f, "crc32"),
            HashAlgorithm::Md5 => write!(f, "md5"),
            HashAlgorithm::Sha1 => write!(f, "sha1"),
        }
    }
}

impl std::str::FromStr for HashAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "crc32" => Ok(HashAlgorithm::Crc32),
            "md5" => Ok(HashAlgorithm::Md5),
            "sha1" => Ok(HashAlgorithm::Sha1),
            other => Err(format!("unknown hash algorithm: {other}")),
        }
    }
}

/// The three digests of one file's content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashDigest {
    /// CRC32, lowercase, zero-padded to 8 hex digits
    pub crc32: String,
    /// MD5, lowercase, 32 hex digits
    pub md5: String,
    /// SHA1, lowercase, 40 hex digits
    pub sha1: String,
}

impl HashDigest {
    /// The digest produced by the given algorithm.
    pub fn get(&self, algorithm: HashAlgorithm) -> &str {
        match algorithm {
            HashAlgorithm::Crc32 => &self.crc32,
            HashAlgorithm::Md5 => &self.md5,
            HashAlgorithm::Sha1 => &self.sha1,
        }
    }
}

/// Accumulates all three digests over streamed chunks.
struct TripleHasher {
    crc32: crc32fast::Hasher,
    md5: Md5,
    sha1: Sha1,
}

impl TripleHasher {
    fn new() -> Self {
        Self {
            crc32: crc32fast::Hasher::new(),
            md5: Md5::new(),
            sha1: Sha1::new(),
        }
    }

    fn update(&mut self, chunk: &[u8]) {
        self.crc32.update(chunk);
        self.md5.update(chunk);
        self.sha1.update(chunk);
    }

    fn finalize(self) -> HashDigest {
        HashDigest {
            crc32: format!("{:08x}", self.crc32.finalize()),
            md5: format!("{:032x}", self.md5.finalize()),
            sha1: format!("{:040x}", self.sha1.finalize()),
        }
    }
}

/// Compute the CRC32/MD5/SHA1 digest triple for a file.
///
/// `.zip` archives are opened and the first non-directory entry with a
/// whitelisted ROM extension is hashed through its decompressed stream.
/// An archive with no such entry fails with [`Error::NoRomInArchive`]; a
/// `.zip` that cannot be opened as an archive fails with
/// [`Error::BadArchive`]. The caller is expected to skip the offending file
/// and continue its batch.
pub async fn digest_file(path: &Path) -> Result<HashDigest> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || digest_file_sync(&path))
        .await
        .expect("hashing task panicked")
}

/// Compute a single digest over a file's raw bytes.
///
/// Used by duplicate scans and deep comparison, where one algorithm is
/// enough and archives are treated as opaque files.
pub async fn hash_file(path: &Path, algorithm: HashAlgorithm) -> Result<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || hash_file_sync(&path, algorithm))
        .await
        .expect("hashing task panicked")
}

/// Synchronous form of [`digest_file`].
pub fn digest_file_sync(path: &Path) -> Result<HashDigest> {
    debug!(path = %path.display(), "computing digest triple");
    if is_zip_path(path) {
        digest_zip_payload(path)
    } else {
        digest_raw(path)
    }
}

/// Synchronous form of [`hash_file`].
pub fn hash_file_sync(path: &Path, algorithm: HashAlgorithm) -> Result<String> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let mut reader = BufReader::new(file);
    let mut buffer = vec![0u8; CHUNK_SIZE];

    match algorithm {
        HashAlgorithm::Crc32 => {
            let mut hasher = crc32fast::Hasher::new();
            stream_into(&mut reader, &mut buffer, path, |chunk| hasher.update(chunk))?;
            Ok(format!("{:08x}", hasher.finalize()))
        }
        HashAlgorithm::Md5 => {
            let mut hasher = Md5::new();
            stream_into(&mut reader, &mut buffer, path, |chunk| hasher.update(chunk))?;
            Ok(format!("{:032x}", hasher.finalize()))
        }
        HashAlgorithm::Sha1 => {
            let mut hasher = Sha1::new();
            stream_into(&mut reader, &mut buffer, path, |chunk| hasher.update(chunk))?;
            Ok(format!("{:040x}", hasher.finalize()))
        }
    }
}

fn is_zip_path(path: &Path) -> bool {
    crate::models::extension_lower(path).as_deref() == Some(".zip")
}

fn stream_into<R: Read>(
    reader: &mut R,
    buffer: &mut [u8],
    path: &Path,
    mut feed: impl FnMut(&[u8]),
) -> Result<()> {
    loop {
        let n = reader.read(buffer).map_err(|e| Error::io(path, e))?;
        if n == 0 {
            break;
        }
        feed(&buffer[..n]);
    }
    Ok(())
}

fn digest_raw(path: &Path) -> Result<HashDigest> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let mut reader = BufReader::new(file);
    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut hasher = TripleHasher::new();
    stream_into(&mut reader, &mut buffer, path, |chunk| hasher.update(chunk))?;
    Ok(hasher.finalize())
}

fn digest_zip_payload(path: &Path) -> Result<HashDigest> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let mut archive = zip::ZipArchive::new(BufReader::new(file)).map_err(|e| Error::BadArchive {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let rom_index = find_rom_entry(&mut archive).ok_or_else(|| Error::NoRomInArchive(path.to_path_buf()))?;

    let mut entry = archive.by_index(rom_index).map_err(|e| Error::BadArchive {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    debug!(path = %path.display(), entry = entry.name(), "hashing archive payload");

    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut hasher = TripleHasher::new();
    stream_into(&mut entry, &mut buffer, path, |chunk| hasher.update(chunk))?;
    Ok(hasher.finalize())
}

/// Index of the first non-directory entry with a whitelisted ROM extension.
fn find_rom_entry<R: Read + std::io::Seek>(archive: &mut zip::ZipArchive<R>) -> Option<usize> {
    for i in 0..archive.len() {
        let entry = match archive.by_index_raw(i) {
            Ok(entry) => entry,
            Err(_) => continue,
        };
        if entry.is_dir() {
            continue;
        }
        let name = PathBuf::from(entry.name().to_string());
        if let Some(ext) = crate::models::extension_lower(&name) {
            if scanner::is_rom_extension(&ext) {
                return Some(i);
            }
        }
    }
    None
}
