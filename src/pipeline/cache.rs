//! Content-addressed cache for derived climate tables
//!
//! The key is a SHA-256 digest over the extract bytes and the serialized
//! settings that shape the derived tables. Any change to either produces a new
//! key, so entries are never invalidated in place.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::loader::load_frame;

const MANIFEST_FILE: &str = "manifest.json";

/// Hex digest identifying one cache entry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Digest of a file's bytes and a serializable settings value
    pub fn for_extract<S: Serialize>(extract: &Path, settings: &S) -> Result<Self> {
        let mut hasher = Sha256::new();
        let file = File::open(extract)
            .with_context(|| format!("Failed to open extract for hashing: {}", extract.display()))?;
        let mut reader = BufReader::new(file);
        let mut buffer = [0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }
        let settings = serde_json::to_vec(settings).context("Failed to serialize cache settings")?;
        hasher.update(&settings);
        Ok(Self(format!("{:x}", hasher.finalize())))
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.0[..12.min(self.0.len())])
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheManifest {
    key: String,
    created_at: String,
    tables: Vec<String>,
}

/// Directory-backed table cache, one subdirectory per key
#[derive(Debug, Clone)]
pub struct ArtifactCache {
    root: PathBuf,
}

impl ArtifactCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn entry_dir(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.as_str())
    }

    /// Load every table of an entry, or None on a miss or incomplete entry
    pub fn load(&self, key: &CacheKey) -> Result<Option<BTreeMap<String, DataFrame>>> {
        let dir = self.entry_dir(key);
        let manifest_path = dir.join(MANIFEST_FILE);
        if !manifest_path.exists() {
            tracing::debug!(key = %key, "cache miss");
            return Ok(None);
        }

        let text = fs::read_to_string(&manifest_path)
            .with_context(|| format!("Failed to read cache manifest: {}", manifest_path.display()))?;
        let manifest: CacheManifest = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse cache manifest: {}", manifest_path.display()))?;

        let mut tables = BTreeMap::new();
        for name in &manifest.tables {
            let path = dir.join(format!("{}.parquet", name));
            if !path.exists() {
                tracing::warn!(key = %key, table = %name, "cache entry incomplete, recomputing");
                return Ok(None);
            }
            tables.insert(name.clone(), load_frame(&path)?);
        }

        tracing::debug!(key = %key, tables = tables.len(), "cache hit");
        Ok(Some(tables))
    }

    /// Store tables under a key; the manifest is written last
    pub fn store(&self, key: &CacheKey, tables: &mut BTreeMap<String, DataFrame>) -> Result<()> {
        let dir = self.entry_dir(key);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create cache directory: {}", dir.display()))?;

        for (name, df) in tables.iter_mut() {
            let path = dir.join(format!("{}.parquet", name));
            let file = File::create(&path)
                .with_context(|| format!("Failed to create cache file: {}", path.display()))?;
            ParquetWriter::new(file)
                .finish(df)
                .with_context(|| format!("Failed to write cache file: {}", path.display()))?;
        }

        let manifest = CacheManifest {
            key: key.as_str().to_string(),
            created_at: Utc::now().to_rfc3339(),
            tables: tables.keys().cloned().collect(),
        };
        let manifest_path = dir.join(MANIFEST_FILE);
        fs::write(&manifest_path, serde_json::to_string_pretty(&manifest)?)
            .with_context(|| format!("Failed to write cache manifest: {}", manifest_path.display()))?;

        tracing::debug!(key = %key, tables = tables.len(), "cache entry stored");
        Ok(())
    }
}
