//! On-disk object store with an in-process lookaside cache.
//!
//! Each object is stored as `<root>/<uri path without slashes>.json`, so the
//! objects of a resource type sit next to that type's `_cache_info.json`. The
//! lookaside map holds every object read or written during the session and is
//! never evicted.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, trace};

use crate::metadata::{METADATA_FILE, MetadataStore, write_atomic};
use crate::{CacheError, ResourceUri, SessionStats};

/// Cached objects, keyed by item URI.
#[derive(Debug)]
pub struct ObjectStore {
    root: PathBuf,
    metadata: MetadataStore,
    lookaside: DashMap<String, Value>,
    stats: Arc<SessionStats>,
}

impl ObjectStore {
    pub fn new(root: impl Into<PathBuf>, stats: Arc<SessionStats>) -> Self {
        let root = root.into();
        Self {
            metadata: MetadataStore::new(root.clone()),
            root,
            lookaside: DashMap::new(),
            stats,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    /// File holding an object.
    pub fn object_path(&self, uri: &ResourceUri) -> PathBuf {
        self.root.join(format!("{}.json", uri.storage_key()))
    }

    /// Number of objects held in memory.
    pub fn lookaside_len(&self) -> usize {
        self.lookaside.len()
    }

    /// Whether the cache can answer a lookup for `uri` without the network.
    ///
    /// True if the object is in memory or on disk, and also true when the
    /// owning type is fully cached: the object then does not exist remotely.
    pub fn has(&self, uri: &ResourceUri) -> Result<bool, CacheError> {
        let key = uri.path();
        if self.lookaside.contains_key(key) || self.object_path(uri).is_file() {
            return Ok(true);
        }
        match self.metadata.load(&uri.parent())? {
            Some(meta) => Ok(!meta.partial),
            None => Ok(false),
        }
    }

    /// Read an object, checking memory before disk.
    pub fn get(&self, uri: &ResourceUri) -> Result<Option<Value>, CacheError> {
        let key = uri.path();
        if let Some(value) = self.lookaside.get(key) {
            self.stats.lookaside_request(true);
            return Ok(Some(value.clone()));
        }
        self.stats.lookaside_request(false);

        let path = self.object_path(uri);
        let Some(value) = read_object(&path)? else {
            return Ok(None);
        };
        self.lookaside.insert(key.to_string(), value.clone());
        Ok(Some(value))
    }

    /// Store an object.
    ///
    /// Initializes the parent type's metadata on first use. A write whose
    /// content matches what is already stored leaves the file untouched.
    pub fn put(&self, uri: &ResourceUri, value: &Value) -> Result<(), CacheError> {
        let type_uri = uri.parent();
        let dir = self.metadata.type_dir(&type_uri);
        if !dir.is_dir() {
            self.metadata.ensure_initialized(&type_uri, Utc::now())?;
        }

        let key = uri.path();
        if self.lookaside.get(key).is_some_and(|v| *v == *value) {
            trace!(uri = %uri, "object unchanged");
            return Ok(());
        }

        let path = self.object_path(uri);
        let unchanged = matches!(read_object(&path), Ok(Some(ref existing)) if existing == value);
        if !unchanged {
            let bytes = serde_json::to_vec(value)?;
            write_atomic(&dir, &path, &bytes)?;
            debug!(uri = %uri, "stored object");
        }
        self.lookaside.insert(key.to_string(), value.clone());
        Ok(())
    }

    /// Every cached object of a resource type.
    pub fn scan(&self, type_uri: &ResourceUri) -> Result<Vec<(ResourceUri, Value)>, CacheError> {
        let dir = self.metadata.type_dir(type_uri);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut objects = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name == METADATA_FILE || name.starts_with('.') || !entry.file_type()?.is_file() {
                continue;
            }
            let Some(id) = name.strip_suffix(".json") else {
                continue;
            };
            let uri = ResourceUri::new(format!("{}{}/", type_uri.path(), id))?;
            if let Some(value) = self.get(&uri)? {
                objects.push((uri, value));
            }
        }
        Ok(objects)
    }
}

fn read_object(path: &Path) -> Result<Option<Value>, CacheError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|source| CacheError::CacheCorrupt {
            path: path.to_path_buf(),
            source,
        })
}
