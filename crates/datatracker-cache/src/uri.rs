//! Resource URI parsing utilities.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use url::form_urlencoded;

/// Error when parsing a resource URI.
#[derive(Debug, Error)]
#[error("invalid resource URI: {0}")]
pub struct UriError(String);

/// A Datatracker resource URI: a path plus query parameters.
///
/// Paths always start and end with `/`, e.g. `/api/v1/person/person/20209/`.
/// Two URIs with the same path but different parameters name the same
/// resource type but different queries. Parameters are kept in sorted order so
/// that equivalent queries render to the same string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceUri {
    path: String,
    params: BTreeMap<String, String>,
}

impl ResourceUri {
    /// Create a URI for a bare path with no parameters.
    pub fn new(path: impl Into<String>) -> Result<Self, UriError> {
        let path = path.into();
        validate_path(&path)?;
        Ok(Self {
            path,
            params: BTreeMap::new(),
        })
    }

    /// Parse a `path?query` string.
    ///
    /// # Example
    ///
    /// ```
    /// use datatracker_cache::ResourceUri;
    ///
    /// let uri = ResourceUri::parse("/api/v1/doc/document/?group=2161&limit=100").unwrap();
    /// assert_eq!(uri.path(), "/api/v1/doc/document/");
    /// assert_eq!(uri.param("group"), Some("2161"));
    /// ```
    pub fn parse(uri: &str) -> Result<Self, UriError> {
        let (path, query) = match uri.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (uri, None),
        };

        let mut parsed = Self::new(path)?;
        if let Some(query) = query {
            for (name, value) in form_urlencoded::parse(query.as_bytes()) {
                parsed.params.insert(name.into_owned(), value.into_owned());
            }
        }
        Ok(parsed)
    }

    /// The path component.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// All query parameters, sorted by name.
    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    /// A single query parameter.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Whether the URI carries any query parameters.
    pub fn has_params(&self) -> bool {
        !self.params.is_empty()
    }

    /// Return a copy with `name` set to `value`.
    pub fn with_param(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.set_param(name, value);
        self
    }

    /// Set `name` to `value`, replacing any previous value.
    pub fn set_param(&mut self, name: impl Into<String>, value: impl ToString) {
        self.params.insert(name.into(), value.to_string());
    }

    /// Return a copy without the named parameters.
    pub fn without_params(&self, names: &[&str]) -> Self {
        let params = self
            .params
            .iter()
            .filter(|(name, _)| !names.contains(&name.as_str()))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        Self {
            path: self.path.clone(),
            params,
        }
    }

    /// The same path with every parameter dropped.
    ///
    /// For a collection query this is the resource type URI.
    pub fn path_only(&self) -> Self {
        Self {
            path: self.path.clone(),
            params: BTreeMap::new(),
        }
    }

    /// The owning collection: the path with its final segment removed.
    ///
    /// ```
    /// use datatracker_cache::ResourceUri;
    ///
    /// let item = ResourceUri::new("/api/v1/person/person/20209/").unwrap();
    /// assert_eq!(item.parent().path(), "/api/v1/person/person/");
    /// ```
    pub fn parent(&self) -> Self {
        let trimmed = &self.path[..self.path.len() - 1];
        let separator = trimmed.rfind('/').unwrap_or(0);
        Self {
            path: self.path[..=separator].to_string(),
            params: BTreeMap::new(),
        }
    }

    /// The final path segment (the object id for item URIs).
    pub fn id(&self) -> &str {
        Self::id_suffix(&self.path)
    }

    /// Path relative to a cache root, without surrounding slashes.
    pub fn storage_key(&self) -> &str {
        self.path.trim_matches('/')
    }

    /// Quick id extraction from any URI-like string without full parsing.
    ///
    /// Returns the last non-empty path segment, ignoring a single trailing
    /// slash.
    ///
    /// ```
    /// use datatracker_cache::ResourceUri;
    ///
    /// assert_eq!(ResourceUri::id_suffix("/api/v1/group/group/2161/"), "2161");
    /// assert_eq!(ResourceUri::id_suffix("2161"), "2161");
    /// ```
    pub fn id_suffix(uri: &str) -> &str {
        let uri = uri.split('?').next().unwrap_or("");
        let uri = uri.strip_suffix('/').unwrap_or(uri);
        uri.rsplit('/').next().unwrap_or("")
    }
}

fn validate_path(path: &str) -> Result<(), UriError> {
    if !path.starts_with('/') || !path.ends_with('/') || path.len() < 2 {
        return Err(UriError(format!(
            "path must start and end with '/': {path}"
        )));
    }

    let inner = &path[1..path.len() - 1];
    for segment in inner.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." || segment.contains('\\') {
            return Err(UriError(format!("bad path segment {segment:?} in {path}")));
        }
    }

    Ok(())
}

impl fmt::Display for ResourceUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.params.is_empty() {
            return f.write_str(&self.path);
        }
        let query = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.params.iter())
            .finish();
        write!(f, "{}?{}", self.path, query)
    }
}

impl FromStr for ResourceUri {
    type Err = UriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
