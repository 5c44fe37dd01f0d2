//! Typed resource access.

use serde::de::DeserializeOwned;

use crate::{CacheError, ResourceUri};

/// A Datatracker resource type with a typed representation.
///
/// ```
/// use datatracker_cache::Resource;
/// use serde::Deserialize;
///
/// #[derive(Deserialize)]
/// struct Person {
///     id: u64,
///     name: String,
/// }
///
/// impl Resource for Person {
///     const TYPE_PATH: &'static str = "/api/v1/person/person/";
/// }
///
/// assert!(Person::accepts("/api/v1/person/person/20209/"));
/// assert!(!Person::accepts("/api/v1/person/email/a@example.com/"));
/// ```
pub trait Resource: DeserializeOwned + Send {
    /// Collection path, e.g. `/api/v1/doc/document/`.
    const TYPE_PATH: &'static str;

    /// Whether `uri` names an object or query of this type.
    fn accepts(uri: &str) -> bool {
        uri.starts_with(Self::TYPE_PATH)
    }

    /// The collection URI.
    fn type_uri() -> Result<ResourceUri, CacheError> {
        Ok(ResourceUri::new(Self::TYPE_PATH)?)
    }

    /// Check that `uri` belongs to this type.
    fn check(uri: &ResourceUri) -> Result<(), CacheError> {
        if Self::accepts(uri.path()) {
            Ok(())
        } else {
            Err(CacheError::WrongResourceType {
                uri: uri.to_string(),
                expected: Self::TYPE_PATH.to_string(),
            })
        }
    }
}
