use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// File-backed response cache.
///
/// Keys are arbitrary strings collapsed to a SHA-256 hex digest that names
/// the entry file, so one logical key maps to exactly one file regardless
/// of key length or content. Entries never expire and are never evicted.
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        self.dir.join(format!("{:x}.json", hasher.finalize()))
    }

    /// Look up a cached value. Missing entries read as `None`.
    pub fn get(&self, key: &str) -> Option<String> {
        std::fs::read_to_string(self.entry_path(key)).ok()
    }

    /// Store a value, creating the cache directory on first write.
    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create cache dir: {}", self.dir.display()))?;
        let path = self.entry_path(key);
        std::fs::write(&path, value)
            .with_context(|| format!("Failed to write cache entry: {}", path.display()))?;
        Ok(())
    }
}
