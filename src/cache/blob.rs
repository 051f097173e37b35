//! Content-addressed file storage for cached artifacts.
//!
//! A blob is named `<first 16 hex digits of its SHA-256>-<file name>`. The
//! hash makes the name unique per content; the file name keeps the
//! extension (and a readable hint) for anyone browsing the cache.

use super::{CacheError, io_error};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;
use walkdir::WalkDir;

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Hex length of the content hash in blob names.
const HASH_PREFIX_LEN: usize = 16;

pub fn blob_name(bytes: &[u8], file_name: &str) -> String {
    let digest = format!("{:x}", Sha256::digest(bytes));
    format!("{}-{file_name}", &digest[..HASH_PREFIX_LEN])
}

#[derive(Debug, Clone)]
pub struct BlobStore {
    dir: PathBuf,
}

impl BlobStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path(name).is_file()
    }

    /// Store `bytes` and return the blob name. Storing identical content
    /// twice yields the same blob.
    pub fn store_bytes(&self, file_name: &str, bytes: &[u8]) -> Result<String, CacheError> {
        let name = blob_name(bytes, file_name);
        let path = self.path(&name);
        if path.is_file() {
            return Ok(name);
        }
        let tmp = self.dir.join(format!(
            ".{}.{}.tmp",
            std::process::id(),
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        fs::write(&tmp, bytes).map_err(io_error(&tmp))?;
        fs::rename(&tmp, &path).map_err(io_error(&path))?;
        trace!(blob = %name, size = bytes.len(), "stored blob");
        Ok(name)
    }

    /// Store the contents of `source`, removing `source` afterwards.
    pub fn store_moved(&self, file_name: &str, source: &Path) -> Result<String, CacheError> {
        let bytes = fs::read(source).map_err(io_error(source))?;
        let name = self.store_bytes(file_name, &bytes)?;
        fs::remove_file(source).map_err(io_error(source))?;
        Ok(name)
    }

    /// Scratch path inside the store for a backend to write into before
    /// the result is stored with [`store_moved`](Self::store_moved).
    pub fn scratch_path(&self, file_name: &str) -> PathBuf {
        self.dir.join(format!(
            ".{}.{}.{file_name}",
            std::process::id(),
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ))
    }

    /// Make blob `name` available at `target`. Hard-links where possible and
    /// copies otherwise. An existing `target` is left alone.
    ///
    /// Returns `true` if the file was created.
    pub fn link_into(&self, name: &str, target: &Path) -> Result<bool, CacheError> {
        if target.exists() {
            return Ok(false);
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(io_error(parent))?;
        }
        let source = self.path(name);
        match fs::hard_link(&source, target) {
            Ok(()) => Ok(true),
            // Linked concurrently by another worker. Copying now would
            // truncate the blob through the fresh link.
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(_) => {
                fs::copy(&source, target).map_err(io_error(&source))?;
                Ok(true)
            }
        }
    }

    /// Names of all stored blobs.
    pub(crate) fn names(&self) -> Result<Vec<String>, CacheError> {
        let mut names = Vec::new();
        for entry in WalkDir::new(&self.dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| CacheError::Io {
                path: self.dir.clone(),
                source: e.into(),
            })?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().is_file() && !name.starts_with('.') {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    pub(crate) fn remove(&self, name: &str) -> Result<(), CacheError> {
        let path = self.path(name);
        fs::remove_file(&path).map_err(io_error(&path))
    }
}
