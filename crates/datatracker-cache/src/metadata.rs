//! Per-resource-type cache metadata.
//!
//! Each resource type directory carries a `_cache_info.json` file recording
//! when the type was first cached, when it was last refreshed, whether the
//! cache is a partial subset of the server's objects, and which queries have
//! already been answered from the server.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{CacheError, ResourceUri};

/// Name of the metadata file inside a resource type directory.
pub const METADATA_FILE: &str = "_cache_info.json";

/// Cache state for one resource type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetadata {
    /// When the type was first cached.
    pub created: DateTime<Utc>,
    /// When the type was last brought up to date.
    pub updated: DateTime<Utc>,
    /// Whether the cache holds only a subset of the server's objects.
    pub partial: bool,
    /// Queries already answered from the server, in the order they were made.
    /// Only meaningful while `partial` is true.
    pub queries: Vec<String>,
}

impl CacheMetadata {
    /// Fresh metadata for a newly cached type.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            created: now,
            updated: now,
            partial: true,
            queries: Vec::new(),
        }
    }

    /// Whether `query` has already been answered from the server.
    pub fn has_query(&self, query: &str) -> bool {
        self.queries.iter().any(|q| q == query)
    }

    /// Record a satisfied query.
    ///
    /// Returns true if the metadata changed. Nothing is recorded once the cache
    /// holds every object of the type.
    pub fn record_query(&mut self, query: &str) -> bool {
        if !self.partial || self.has_query(query) {
            return false;
        }
        self.queries.push(query.to_string());
        true
    }

    /// Mark the type as holding every server object.
    pub fn promote(&mut self, now: DateTime<Utc>) {
        self.partial = false;
        self.queries.clear();
        self.updated = now;
    }
}

/// Reads and writes `_cache_info.json` files under a cache root.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    root: PathBuf,
}

impl MetadataStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the objects of a resource type.
    pub fn type_dir(&self, type_uri: &ResourceUri) -> PathBuf {
        self.root.join(type_uri.storage_key())
    }

    /// Path of the metadata file for a resource type.
    pub fn path(&self, type_uri: &ResourceUri) -> PathBuf {
        self.type_dir(type_uri).join(METADATA_FILE)
    }

    /// Load metadata, or `None` if the type has never been cached.
    pub fn load(&self, type_uri: &ResourceUri) -> Result<Option<CacheMetadata>, CacheError> {
        let path = self.path(type_uri);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|source| CacheError::CacheCorrupt { path, source })
    }

    /// Write metadata, replacing the previous file atomically.
    pub fn save(&self, type_uri: &ResourceUri, meta: &CacheMetadata) -> Result<(), CacheError> {
        let dir = self.type_dir(type_uri);
        fs::create_dir_all(&dir)?;
        let json = serde_json::to_vec_pretty(meta)?;
        write_atomic(&dir, &self.path(type_uri), &json)
    }

    /// Load metadata, creating a fresh partial entry if the type is new.
    pub fn ensure_initialized(
        &self,
        type_uri: &ResourceUri,
        now: DateTime<Utc>,
    ) -> Result<CacheMetadata, CacheError> {
        if let Some(meta) = self.load(type_uri)? {
            return Ok(meta);
        }
        let meta = CacheMetadata::new(now);
        self.save(type_uri, &meta)?;
        debug!(resource_type = %type_uri, "initialized cache metadata");
        Ok(meta)
    }

    /// Record a satisfied query for a type, saving only if it changed.
    pub fn record_query(
        &self,
        type_uri: &ResourceUri,
        query: &str,
        now: DateTime<Utc>,
    ) -> Result<(), CacheError> {
        let mut meta = self.ensure_initialized(type_uri, now)?;
        if meta.record_query(query) {
            self.save(type_uri, &meta)?;
        }
        Ok(())
    }
}

/// Write `bytes` to `target` through a temporary file in `dir`.
///
/// Readers never observe a half-written file.
pub(crate) fn write_atomic(dir: &Path, target: &Path, bytes: &[u8]) -> Result<(), CacheError> {
    let mut tmp = tempfile::Builder::new()
        .prefix(".tmp-")
        .suffix(".partial")
        .tempfile_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(target).map_err(|e| CacheError::Io(e.error))?;
    Ok(())
}
